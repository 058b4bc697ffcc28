//! macOS adaptation
//!
//! Direct utun creation needs root. Apps shipping a NetworkExtension pass the
//! packet flow descriptor in the same way iOS does and should use
//! [`crate::ios::IosAdapter`] instead.

use crate::adapter::{Capabilities, PlatformAdapter};
use crate::target::TargetOs;

#[derive(Debug, Default, Clone, Copy)]
pub struct MacosAdapter;

impl PlatformAdapter for MacosAdapter {
    fn target(&self) -> TargetOs {
        TargetOs::Macos
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::desktop()
    }
}
