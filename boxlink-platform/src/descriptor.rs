//! Tunnel descriptor handling
//!
//! The host opens the tunnel and keeps ownership of the descriptor until the
//! engine takes it. Nothing in this crate ever closes a descriptor.

use std::fmt;

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Raw tunnel file descriptor passed in by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TunnelDescriptor(i32);

impl TunnelDescriptor {
    pub fn new(raw: i32) -> Result<Self> {
        if raw < 0 {
            return Err(Error::InvalidDescriptor(raw));
        }
        Ok(Self(raw))
    }

    pub fn raw(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for TunnelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd={}", self.0)
    }
}

/// A descriptor handed to the engine. Dropping it does not close the fd.
#[derive(Debug, PartialEq, Eq)]
pub struct TunnelHandoff {
    descriptor: TunnelDescriptor,
}

impl TunnelHandoff {
    pub fn descriptor(&self) -> TunnelDescriptor {
        self.descriptor
    }

    /// Give up the handoff and return the raw fd to the engine
    pub fn into_raw(self) -> i32 {
        self.descriptor.raw()
    }
}

/// Holds a recorded descriptor until the engine asks for it once
#[derive(Debug, Default)]
pub struct DescriptorSlot {
    slot: Mutex<Option<TunnelDescriptor>>,
}

impl DescriptorSlot {
    pub fn new(descriptor: TunnelDescriptor) -> Self {
        Self {
            slot: Mutex::new(Some(descriptor)),
        }
    }

    /// Take the descriptor. Later calls fail with [`Error::DescriptorConsumed`].
    pub fn take(&self) -> Result<TunnelHandoff> {
        self.slot
            .lock()
            .take()
            .map(|descriptor| TunnelHandoff { descriptor })
            .ok_or(Error::DescriptorConsumed)
    }

    pub fn is_consumed(&self) -> bool {
        self.slot.lock().is_none()
    }
}
