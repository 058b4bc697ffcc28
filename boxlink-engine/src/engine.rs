//! Engine backend interface
//!
//! The proxy engine is opaque to the controller. A backend supplies an
//! [`EngineFactory`] that strictly parses configuration text and constructs
//! [`EngineHandle`]s; the controller only ever starts and closes them.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use boxlink_config::{EngineOptions, Schema, SchemaError};
use boxlink_platform::PlatformInterface;

use crate::diagnostics::LogWriter;
use crate::error::EngineError;

/// Everything an engine instance receives at construction
#[derive(Clone)]
pub struct EngineContext {
    /// Cancelled when the session is stopped or cleaned up
    pub scope: CancellationToken,
    /// Engine log output
    pub log: Arc<dyn LogWriter>,
    /// Capability override supplied by mobile platforms
    pub platform: Option<Arc<dyn PlatformInterface>>,
}

/// A constructed engine instance
#[async_trait]
pub trait EngineHandle: Send + Sync {
    async fn start(&self) -> Result<(), EngineError>;

    async fn close(&self) -> Result<(), EngineError>;
}

/// Engine backend
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Backend name, used in the version string
    fn name(&self) -> &str;

    /// Strictly decode configuration text
    fn parse(&self, text: &str, scope: &CancellationToken) -> Result<EngineOptions, SchemaError>;

    /// Build an engine instance from decoded options
    async fn create(
        &self,
        options: EngineOptions,
        context: EngineContext,
    ) -> Result<Arc<dyn EngineHandle>, EngineError>;
}

/// Parse with `schema`, honouring cancellation before and after the decode
pub fn parse_with(
    schema: &Schema,
    text: &str,
    scope: &CancellationToken,
) -> Result<EngineOptions, SchemaError> {
    if scope.is_cancelled() {
        return Err(SchemaError::Cancelled);
    }
    let options = schema.parse(text)?;
    if scope.is_cancelled() {
        return Err(SchemaError::Cancelled);
    }
    Ok(options)
}

/// Stand-in used until a real backend is installed.
///
/// Configuration is validated against the current schema so `testConfig`
/// works, but construction always fails.
#[derive(Debug, Clone, Default)]
pub struct UnlinkedEngine {
    schema: Schema,
}

impl UnlinkedEngine {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }
}

#[async_trait]
impl EngineFactory for UnlinkedEngine {
    fn name(&self) -> &str {
        "boxlink"
    }

    fn parse(&self, text: &str, scope: &CancellationToken) -> Result<EngineOptions, SchemaError> {
        parse_with(&self.schema, text, scope)
    }

    async fn create(
        &self,
        _options: EngineOptions,
        _context: EngineContext,
    ) -> Result<Arc<dyn EngineHandle>, EngineError> {
        Err(EngineError::Unlinked)
    }
}
