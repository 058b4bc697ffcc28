//! Diagnostics sink
//!
//! Lines leave the controller through one of two routes. A registered log
//! receiver gets everything. Without one, every line goes to the `log` facade
//! and is also appended to a per-user file, so a start that hangs before the
//! host wires up logging still leaves a trace. Engine output and lifecycle
//! messages are tagged with their level there, native diagnostics (step
//! markers, watchdog heartbeats) with `[NATIVE]`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::event::LogLevel;
use crate::settings::DiagnosticsSettings;

/// Host callback receiving log lines
pub type LogReceiver = Arc<dyn Fn(&str) + Send + Sync>;

/// Destination for engine log output
pub trait LogWriter: Send + Sync {
    fn write_message(&self, level: LogLevel, message: &str);
}

const NATIVE_PREFIX: &str = "[NATIVE]";

pub struct Diagnostics {
    receiver: RwLock<Option<LogReceiver>>,
    receiver_supported: bool,
    file: Option<PathBuf>,
    file_lock: Mutex<()>,
}

impl Diagnostics {
    /// `file` is where lines go while no receiver is registered
    pub fn new(receiver_supported: bool, file: Option<PathBuf>) -> Self {
        Self {
            receiver: RwLock::new(None),
            receiver_supported,
            file,
            file_lock: Mutex::new(()),
        }
    }

    pub fn from_settings(settings: &DiagnosticsSettings, receiver_supported: bool) -> Self {
        let file = settings
            .file_enabled
            .then(|| settings.file.clone().unwrap_or_else(Self::default_file));
        Self::new(receiver_supported, file)
    }

    /// `<Documents>/boxlink/early_start.log`, or the working directory when
    /// the platform has no documents folder
    pub fn default_file() -> PathBuf {
        dirs::document_dir()
            .map(|dir| dir.join("boxlink").join("early_start.log"))
            .unwrap_or_else(|| PathBuf::from("early_start.log"))
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Register or clear the log receiver.
    ///
    /// Returns false when the platform does not allow receivers; the call is
    /// then ignored and file logging stays in effect.
    pub fn register(&self, receiver: Option<LogReceiver>) -> bool {
        if !self.receiver_supported {
            log::debug!("log receiver ignored on this platform");
            return false;
        }
        *self.receiver.write() = receiver;
        true
    }

    pub fn has_receiver(&self) -> bool {
        self.receiver.read().is_some()
    }

    fn current_receiver(&self) -> Option<LogReceiver> {
        self.receiver.read().clone()
    }

    /// Lifecycle message meant for the host
    pub fn message(&self, level: LogLevel, message: &str) {
        match self.current_receiver() {
            Some(receiver) => receiver(message),
            None => {
                log::log!(level.to_log(), "{}", message);
                self.append(&format!("[{}]", level), message);
            }
        }
    }

    /// Native diagnostic line
    pub fn native(&self, message: &str) {
        log::debug!("{} {}", NATIVE_PREFIX, message);
        match self.current_receiver() {
            Some(receiver) => receiver(&format!("{} {}", NATIVE_PREFIX, message)),
            None => self.append(NATIVE_PREFIX, message),
        }
    }

    fn append(&self, tag: &str, message: &str) {
        let Some(path) = self.file.as_deref() else {
            return;
        };
        let line = format!(
            "{} {} {}\n",
            chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            tag,
            message
        );

        let _guard = self.file_lock.lock();
        let result = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|_| OpenOptions::new().create(true).append(true).open(path))
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(err) = result {
            log::trace!("diagnostics file {} unavailable: {}", path.display(), err);
        }
    }
}

impl LogWriter for Diagnostics {
    fn write_message(&self, level: LogLevel, message: &str) {
        self.message(level, message);
    }
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("has_receiver", &self.has_receiver())
            .field("receiver_supported", &self.receiver_supported)
            .field("file", &self.file)
            .finish()
    }
}
