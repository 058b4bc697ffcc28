//! Target operating systems

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Operating system the controller adapts configuration for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetOs {
    Android,
    Ios,
    Linux,
    Macos,
    Windows,
}

impl TargetOs {
    /// The OS this binary was built for. Unlisted Unix flavours map to Linux.
    pub fn current() -> Self {
        if cfg!(target_os = "android") {
            TargetOs::Android
        } else if cfg!(target_os = "ios") {
            TargetOs::Ios
        } else if cfg!(target_os = "macos") {
            TargetOs::Macos
        } else if cfg!(target_os = "windows") {
            TargetOs::Windows
        } else {
            TargetOs::Linux
        }
    }

    /// Hosts where the tunnel is opened by the app and passed in
    pub fn is_mobile(&self) -> bool {
        matches!(self, TargetOs::Android | TargetOs::Ios)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetOs::Android => "android",
            TargetOs::Ios => "ios",
            TargetOs::Linux => "linux",
            TargetOs::Macos => "macos",
            TargetOs::Windows => "windows",
        }
    }
}

impl fmt::Display for TargetOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetOs {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "android" => Ok(TargetOs::Android),
            "ios" => Ok(TargetOs::Ios),
            "linux" => Ok(TargetOs::Linux),
            "macos" | "darwin" => Ok(TargetOs::Macos),
            "windows" => Ok(TargetOs::Windows),
            other => Err(Error::UnknownTarget(other.to_string())),
        }
    }
}
