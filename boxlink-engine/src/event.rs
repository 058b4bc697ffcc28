//! Lifecycle states and start stages

use std::fmt;

/// Controller lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No command has been issued yet
    Uninitialized,
    /// Ready, no engine instance
    Idle,
    /// Parsing, constructing or starting an engine
    Starting,
    /// An engine instance is running
    Running,
    /// Closing the engine instance
    Stopping,
}

impl LifecycleState {
    /// Check if an engine instance exists or is being built
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            LifecycleState::Starting | LifecycleState::Running | LifecycleState::Stopping
        )
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "Uninitialized",
            LifecycleState::Idle => "Idle",
            LifecycleState::Starting => "Starting...",
            LifecycleState::Running => "Running",
            LifecycleState::Stopping => "Stopping...",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Step of a start sequence, reported by the watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStage {
    ParseOptions,
    Construct,
    EngineStart,
    Done,
}

impl StartStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartStage::ParseOptions => "parse_options",
            StartStage::Construct => "construct",
            StartStage::EngineStart => "engine_start",
            StartStage::Done => "done",
        }
    }
}

impl fmt::Display for StartStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log level for messages written through the diagnostics sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub(crate) fn to_log(self) -> log::Level {
        match self {
            LogLevel::Trace => log::Level::Trace,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}
