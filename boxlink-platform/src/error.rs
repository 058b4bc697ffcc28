//! Error types for boxlink-platform

use std::io;
use thiserror::Error;

/// Result type alias for platform operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by platform adapters
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The descriptor passed by the host is not usable
    #[error("invalid tunnel descriptor: {0}")]
    InvalidDescriptor(i32),

    /// The recorded descriptor was already handed to the engine
    #[error("tunnel descriptor already handed over")]
    DescriptorConsumed,

    /// Operation not supported on this platform
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// Unknown target name
    #[error("unknown target: {0}")]
    UnknownTarget(String),
}

impl Error {
    /// Check if the error is a permission-related error
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::PermissionDenied)
    }
}
