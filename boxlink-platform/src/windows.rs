//! Windows adaptation
//!
//! Tun inbounds need the WinTun driver library (<https://www.wintun.net/>),
//! either next to the executable or in System32. A missing library is
//! reported up front so the host can show something better than the
//! engine's start failure.

use std::path::PathBuf;

use crate::adapter::{Capabilities, PlatformAdapter};
use crate::target::TargetOs;

const WINTUN_DLL: &str = "wintun.dll";

/// Locate wintun.dll, preferring the executable's directory
pub fn wintun_path() -> Option<PathBuf> {
    let local = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(WINTUN_DLL)));
    if let Some(local) = local.filter(|p| p.exists()) {
        return Some(local);
    }

    let system_root = std::env::var_os("SystemRoot")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\Windows"));
    let system = system_root.join("System32").join(WINTUN_DLL);
    system.exists().then_some(system)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsAdapter;

impl PlatformAdapter for WindowsAdapter {
    fn target(&self) -> TargetOs {
        TargetOs::Windows
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::desktop()
    }

    fn preflight(&self) -> Vec<String> {
        if !cfg!(windows) {
            return Vec::new();
        }
        match wintun_path() {
            Some(path) => {
                log::debug!("wintun found at {}", path.display());
                Vec::new()
            }
            None => vec![format!(
                "{} not found next to the executable or in System32",
                WINTUN_DLL
            )],
        }
    }
}
