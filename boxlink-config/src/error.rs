//! Error types for boxlink-config

use thiserror::Error;

use crate::schema::SchemaError;

/// Result type alias for configuration transforms
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while reading or rewriting a configuration document
#[derive(Debug, Error)]
pub enum Error {
    /// Document is not valid JSON
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A JSON object was expected at the given location
    #[error("expected a JSON object at {0}")]
    NotAnObject(String),

    /// A JSON array was expected at the given location
    #[error("expected a JSON array at {0}")]
    NotAnArray(String),

    /// No base configuration has been recorded
    #[error("no base config available")]
    MissingBase,

    /// The engine schema rejected the document
    #[error("schema rejected document: {0}")]
    Schema(#[from] SchemaError),
}
