//! Tunnel descriptor injection
//!
//! On mobile targets the host opens the tunnel and passes its descriptor in.
//! The tun inbound is rewritten to carry that descriptor and to leave routing
//! to the host: no auto route, no strict route, user-space stack, no MTU
//! override. Engine revisions disagree on the field name, so every placement
//! in [`DEFAULT_PLACEMENTS`] is a separate [`Rewrite`] candidate.

use std::fmt;

use serde_json::{Map, Value};

use crate::document::ConfigDocument;
use crate::error::Result;
use crate::probe::Rewrite;

/// Tag given to a tun inbound appended by injection
pub const DEFAULT_TUN_TAG: &str = "tun-in";

/// Where a tunnel descriptor is written inside the tun inbound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorPlacement {
    /// Directly on the inbound, e.g. `file_descriptor`
    Inbound(&'static str),
    /// Under the inbound's `platform` object, e.g. `platform.fd`
    Platform(&'static str),
}

impl DescriptorPlacement {
    /// Field name written by this placement
    pub fn key(&self) -> &'static str {
        match self {
            DescriptorPlacement::Inbound(key) | DescriptorPlacement::Platform(key) => key,
        }
    }
}

impl fmt::Display for DescriptorPlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorPlacement::Inbound(key) => f.write_str(key),
            DescriptorPlacement::Platform(key) => write!(f, "platform.{}", key),
        }
    }
}

/// Placements tried in order when injecting a descriptor
pub const DEFAULT_PLACEMENTS: [DescriptorPlacement; 4] = [
    DescriptorPlacement::Inbound("file_descriptor"),
    DescriptorPlacement::Inbound("fd"),
    DescriptorPlacement::Platform("file_descriptor"),
    DescriptorPlacement::Platform("fd"),
];

/// Rewrite the first tun inbound to carry `descriptor` at `placement`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectDescriptor {
    pub placement: DescriptorPlacement,
    pub descriptor: i32,
}

impl InjectDescriptor {
    pub fn new(placement: DescriptorPlacement, descriptor: i32) -> Self {
        Self {
            placement,
            descriptor,
        }
    }

    /// One candidate per placement, in the given order
    pub fn candidates(placements: &[DescriptorPlacement], descriptor: i32) -> Vec<Self> {
        placements
            .iter()
            .map(|placement| Self::new(*placement, descriptor))
            .collect()
    }

    fn normalized_inbound(&self, tag: Option<Value>) -> Value {
        let mut inbound = Map::new();
        inbound.insert("type".into(), Value::from("tun"));
        inbound.insert(
            "tag".into(),
            tag.unwrap_or_else(|| Value::from(DEFAULT_TUN_TAG)),
        );
        match self.placement {
            DescriptorPlacement::Inbound(key) => {
                inbound.insert(key.into(), Value::from(self.descriptor));
            }
            DescriptorPlacement::Platform(key) => {
                let mut platform = Map::new();
                platform.insert(key.into(), Value::from(self.descriptor));
                inbound.insert("platform".into(), Value::Object(platform));
            }
        }
        inbound.insert("auto_route".into(), Value::Bool(false));
        inbound.insert("strict_route".into(), Value::Bool(false));
        inbound.insert("stack".into(), Value::from("gvisor"));
        Value::Object(inbound)
    }
}

impl Rewrite for InjectDescriptor {
    fn describe(&self) -> String {
        self.placement.to_string()
    }

    fn fields(&self) -> Vec<&str> {
        vec![self.placement.key()]
    }

    fn apply(&self, document: &mut ConfigDocument) -> Result<()> {
        let existing = document.find_inbound("tun");
        let inbounds = document.inbounds_mut();
        match existing {
            Some(index) => {
                let tag = inbounds[index].get("tag").cloned();
                inbounds[index] = self.normalized_inbound(tag);
            }
            None => inbounds.push(self.normalized_inbound(None)),
        }
        Ok(())
    }
}

/// The first tun inbound rendered as compact JSON, for diagnostics
pub fn tun_inbound_snippet(text: &str) -> String {
    match ConfigDocument::parse(text) {
        Ok(document) => match document.inbound("tun") {
            Some(inbound) => serde_json::to_string(inbound)
                .unwrap_or_else(|err| format!("unprintable tun inbound: {}", err)),
            None => "no tun inbound".into(),
        },
        Err(err) => format!("parse cfg fail: {}", err),
    }
}
