//! Linux adaptation
//!
//! The engine creates its own tun device, which needs the tun module loaded
//! and CAP_NET_ADMIN.

use std::path::Path;

use crate::adapter::{Capabilities, PlatformAdapter};
use crate::target::TargetOs;

const TUN_DEVICE: &str = "/dev/net/tun";

#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxAdapter;

impl PlatformAdapter for LinuxAdapter {
    fn target(&self) -> TargetOs {
        TargetOs::Linux
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::desktop()
    }

    fn preflight(&self) -> Vec<String> {
        if !cfg!(target_os = "linux") || Path::new(TUN_DEVICE).exists() {
            return Vec::new();
        }
        vec![format!(
            "{} not found, tun inbounds will fail (try `modprobe tun`)",
            TUN_DEVICE
        )]
    }
}
