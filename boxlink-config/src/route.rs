//! Route auto-detect suppression
//!
//! Mobile hosts own the default route, so the engine must not watch it. The
//! preferred rewrite turns off both `auto_detect_interface` and
//! `auto_detect_interface_ipv6`; older engines only know the IPv4 flag.

use serde_json::Value;

use crate::document::ConfigDocument;
use crate::error::Result;
use crate::probe::Rewrite;

const V4_FLAG: &str = "auto_detect_interface";
const V6_FLAG: &str = "auto_detect_interface_ipv6";

/// Disable route auto-detection, optionally including the IPv6 flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuppressAutoDetect {
    pub ipv6: bool,
}

impl SuppressAutoDetect {
    /// Both flags first, then IPv4 only
    pub fn candidates() -> [Self; 2] {
        [Self { ipv6: true }, Self { ipv6: false }]
    }
}

impl Rewrite for SuppressAutoDetect {
    fn describe(&self) -> String {
        if self.ipv6 {
            "auto-detect v4+v6".into()
        } else {
            "auto-detect v4 only".into()
        }
    }

    fn fields(&self) -> Vec<&str> {
        if self.ipv6 {
            vec![V6_FLAG, V4_FLAG]
        } else {
            vec![V4_FLAG]
        }
    }

    fn apply(&self, document: &mut ConfigDocument) -> Result<()> {
        let route = document.route_mut();
        route.insert(V4_FLAG.into(), Value::Bool(false));
        if self.ipv6 {
            route.insert(V6_FLAG.into(), Value::Bool(false));
        } else {
            route.remove(V6_FLAG);
        }
        Ok(())
    }
}
