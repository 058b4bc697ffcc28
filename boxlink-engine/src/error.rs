//! Error types for the lifecycle controller

use thiserror::Error;

use boxlink_config::SchemaError;

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by an engine backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Backend-specific failure
    #[error("{0}")]
    Failed(String),

    /// The operation was abandoned because its scope was cancelled
    #[error("cancelled")]
    Cancelled,

    /// No engine backend was linked into this build
    #[error("no engine backend installed")]
    Unlinked,

    /// The platform interface refused a request
    #[error("platform: {0}")]
    Platform(String),
}

impl From<boxlink_platform::Error> for EngineError {
    fn from(err: boxlink_platform::Error) -> Self {
        EngineError::Platform(err.to_string())
    }
}

/// Errors that can occur during lifecycle operations
#[derive(Debug, Error)]
pub enum Error {
    /// An engine instance already exists
    #[error("already running")]
    AlreadyRunning,

    /// No engine instance exists
    #[error("not running")]
    NotRunning,

    /// The engine refused the configuration
    #[error("parse options: {0}")]
    Parse(SchemaError),

    /// Engine construction failed
    #[error("create engine: {0}")]
    Construct(EngineError),

    /// Engine start failed
    #[error("engine start: {0}")]
    Start(EngineError),

    /// Engine close failed
    #[error("close engine: {0}")]
    Close(EngineError),

    /// Rule document is not a JSON object
    #[error("invalid rule json: {0}")]
    InvalidRule(boxlink_config::Error),

    /// No dynamic rule matches the given text
    #[error("rule not found")]
    RuleNotFound,

    /// Rules could not be merged into the base configuration
    #[error("merge: {0}")]
    Merge(boxlink_config::Error),

    /// A restart failed; the engine is left stopped
    #[error("restart: {0}")]
    Restart(Box<Error>),

    /// Connectivity probe failed
    #[error("{kind} probe: {message}")]
    Probe { kind: &'static str, message: String },

    /// A probe was abandoned because the execution scope was cancelled
    #[error("{0} probe: cancelled")]
    ProbeCancelled(&'static str),

    /// Caller passed an unusable argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Controller settings are invalid
    #[error("settings error: {0}")]
    Settings(String),

    /// Failed to parse a settings file
    #[error("failed to parse settings: {0}")]
    SettingsParse(#[from] toml::de::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is a lifecycle precondition failure
    pub fn is_precondition(&self) -> bool {
        matches!(self, Error::AlreadyRunning | Error::NotRunning)
    }

    /// Check if the failure came from cancelling the execution scope
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Parse(SchemaError::Cancelled) => true,
            Error::Construct(EngineError::Cancelled) | Error::Start(EngineError::Cancelled) => true,
            Error::ProbeCancelled(_) => true,
            Error::Restart(inner) => inner.is_cancelled(),
            _ => false,
        }
    }

    pub(crate) fn probe(kind: &'static str, message: impl ToString) -> Self {
        Error::Probe {
            kind,
            message: message.to_string(),
        }
    }
}
