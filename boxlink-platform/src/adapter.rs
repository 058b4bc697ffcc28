//! Platform adapter interface
//!
//! An adapter tells the controller how to prepare a configuration for one
//! target OS, and on mobile targets supplies the interface through which the
//! engine acquires the host's tunnel.

use std::sync::Arc;

use boxlink_config::DescriptorPlacement;

use crate::descriptor::{DescriptorSlot, TunnelDescriptor, TunnelHandoff};
use crate::error::Result;
use crate::target::TargetOs;

/// What the controller may do on a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// Inject a host-provided tunnel descriptor into the tun inbound
    pub inject_descriptor: bool,
    /// Placements tried, in order, when injecting
    pub descriptor_placements: Vec<DescriptorPlacement>,
    /// Turn off route auto-detection before parsing
    pub suppress_route_auto_detect: bool,
    /// Host log receivers may be invoked from engine threads
    pub log_receiver_supported: bool,
    /// The engine may watch the default route itself
    pub monitor_default_interface: bool,
}

impl Capabilities {
    /// Desktop defaults: the engine owns the tunnel and the routing table
    pub fn desktop() -> Self {
        Self {
            inject_descriptor: false,
            descriptor_placements: Vec::new(),
            suppress_route_auto_detect: false,
            log_receiver_supported: true,
            monitor_default_interface: true,
        }
    }

    /// Mobile defaults: the host owns the tunnel and the routing table
    pub fn mobile() -> Self {
        Self {
            inject_descriptor: true,
            descriptor_placements: boxlink_config::DEFAULT_PLACEMENTS.to_vec(),
            suppress_route_auto_detect: true,
            log_receiver_supported: true,
            monitor_default_interface: false,
        }
    }
}

/// Parameters the engine passes when it opens its tunnel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunRequest {
    pub tag: Option<String>,
    pub mtu: Option<u32>,
}

/// Watches the system default route
pub trait InterfaceMonitor: Send + Sync {
    fn start(&self) -> Result<()>;
    fn close(&self) -> Result<()>;
    /// Name of the current default interface, if known
    fn default_interface(&self) -> Option<String>;
}

/// Monitor that never reports anything, for hosts that forbid route watching
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInterfaceMonitor;

impl InterfaceMonitor for NoopInterfaceMonitor {
    fn start(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn default_interface(&self) -> Option<String> {
        None
    }
}

/// Capability override given to the engine at construction
pub trait PlatformInterface: Send + Sync {
    /// Hand the host's tunnel to the engine
    fn open_tun(&self, request: &TunRequest) -> Result<TunnelHandoff>;

    fn default_interface_monitor(&self) -> Box<dyn InterfaceMonitor>;

    /// The host, not the engine, configures routes
    fn uses_platform_routing(&self) -> bool {
        true
    }
}

/// Platform interface backed by a descriptor recorded by the controller
#[derive(Debug)]
pub struct DescriptorInterface {
    slot: DescriptorSlot,
}

impl DescriptorInterface {
    pub fn new(descriptor: TunnelDescriptor) -> Self {
        Self {
            slot: DescriptorSlot::new(descriptor),
        }
    }
}

impl PlatformInterface for DescriptorInterface {
    fn open_tun(&self, request: &TunRequest) -> Result<TunnelHandoff> {
        let handoff = self.slot.take()?;
        log::debug!(
            "handing {} to tun inbound {}",
            handoff.descriptor(),
            request.tag.as_deref().unwrap_or("<untagged>")
        );
        Ok(handoff)
    }

    fn default_interface_monitor(&self) -> Box<dyn InterfaceMonitor> {
        Box::new(NoopInterfaceMonitor)
    }
}

/// Per-target adaptation strategy
pub trait PlatformAdapter: Send + Sync {
    fn target(&self) -> TargetOs;

    fn capabilities(&self) -> Capabilities;

    /// Soft environment checks, reported as diagnostics and never fatal
    fn preflight(&self) -> Vec<String> {
        Vec::new()
    }

    /// Interface override for the engine, if this target needs one
    fn interface_provider(
        &self,
        _descriptor: Option<TunnelDescriptor>,
    ) -> Option<Arc<dyn PlatformInterface>> {
        None
    }
}
