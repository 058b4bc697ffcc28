//! Android adaptation
//!
//! The VpnService owns the tunnel and the routing table. The descriptor it
//! opens is injected into the tun inbound, route auto-detection is turned off
//! (netlink route monitoring is denied by SELinux), and engine log callbacks
//! are never invoked since calling back into the host from engine threads is
//! not safe there.

use std::sync::Arc;

use crate::adapter::{Capabilities, DescriptorInterface, PlatformAdapter, PlatformInterface};
use crate::descriptor::TunnelDescriptor;
use crate::target::TargetOs;

#[derive(Debug, Default, Clone, Copy)]
pub struct AndroidAdapter;

impl PlatformAdapter for AndroidAdapter {
    fn target(&self) -> TargetOs {
        TargetOs::Android
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            log_receiver_supported: false,
            ..Capabilities::mobile()
        }
    }

    fn interface_provider(
        &self,
        descriptor: Option<TunnelDescriptor>,
    ) -> Option<Arc<dyn PlatformInterface>> {
        let descriptor = descriptor?;
        log::debug!("registering platform interface with tunnel {}", descriptor);
        Some(Arc::new(DescriptorInterface::new(descriptor)))
    }
}
