//! iOS adaptation
//!
//! The packet tunnel provider hands over the utun descriptor from its packet
//! flow. Unlike Android, log callbacks into the extension are safe.

use std::sync::Arc;

use crate::adapter::{Capabilities, DescriptorInterface, PlatformAdapter, PlatformInterface};
use crate::descriptor::TunnelDescriptor;
use crate::target::TargetOs;

#[derive(Debug, Default, Clone, Copy)]
pub struct IosAdapter;

impl PlatformAdapter for IosAdapter {
    fn target(&self) -> TargetOs {
        TargetOs::Ios
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::mobile()
    }

    fn interface_provider(
        &self,
        descriptor: Option<TunnelDescriptor>,
    ) -> Option<Arc<dyn PlatformInterface>> {
        descriptor.map(|d| Arc::new(DescriptorInterface::new(d)) as Arc<dyn PlatformInterface>)
    }
}
