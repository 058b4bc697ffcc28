//! Per-platform adaptation for the boxlink engine controller
//!
//! Each target OS gets a [`PlatformAdapter`] describing what the controller
//! should do to a configuration before the engine sees it:
//!
//! | target  | inject tunnel fd | suppress auto-detect | log receiver |
//! |---------|------------------|----------------------|--------------|
//! | android | yes              | yes                  | ignored      |
//! | ios     | yes              | yes                  | yes          |
//! | linux   | no               | no                   | yes          |
//! | macos   | no               | no                   | yes          |
//! | windows | no               | no                   | yes          |
//!
//! Mobile adapters also provide a [`PlatformInterface`] that hands the
//! host-opened tunnel descriptor to the engine exactly once.

pub mod adapter;
pub mod android;
pub mod descriptor;
pub mod error;
pub mod ios;
pub mod linux;
pub mod macos;
pub mod target;
pub mod windows;

use std::sync::Arc;

pub use adapter::{
    Capabilities, DescriptorInterface, InterfaceMonitor, NoopInterfaceMonitor, PlatformAdapter,
    PlatformInterface, TunRequest,
};
pub use descriptor::{DescriptorSlot, TunnelDescriptor, TunnelHandoff};
pub use error::{Error, Result};
pub use target::TargetOs;

/// Adapter for an explicit target
pub fn adapter_for(target: TargetOs) -> Arc<dyn PlatformAdapter> {
    match target {
        TargetOs::Android => Arc::new(android::AndroidAdapter),
        TargetOs::Ios => Arc::new(ios::IosAdapter),
        TargetOs::Linux => Arc::new(linux::LinuxAdapter),
        TargetOs::Macos => Arc::new(macos::MacosAdapter),
        TargetOs::Windows => Arc::new(windows::WindowsAdapter),
    }
}

/// Adapter for the OS this binary runs on
pub fn native() -> Arc<dyn PlatformAdapter> {
    adapter_for(TargetOs::current())
}
