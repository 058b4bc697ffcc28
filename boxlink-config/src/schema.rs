//! Strict engine option schema
//!
//! The engine decodes its configuration strictly: an unrecognized field is a
//! hard error. [`Schema`] models the parts of that decoder the controller
//! rewrites (the tun inbound and the route section) and produces typed
//! [`EngineOptions`]. Other sections are checked for shape only.
//!
//! Two revisions are provided. [`Schema::current`] accepts the tunnel
//! descriptor as a top-level tun field and knows both route auto-detect flags.
//! [`Schema::legacy`] only accepts `platform.fd` and has no IPv6 flag.

use std::collections::BTreeSet;
use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

/// Errors produced by a strict parse
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// Text is not JSON
    #[error("syntax error: {0}")]
    Syntax(String),

    /// A field the decoder does not know
    #[error("json: unknown field \"{field}\" in {path}")]
    UnknownField { path: String, field: String },

    /// A value of the wrong JSON type
    #[error("{path}: expected {expected}")]
    InvalidType { path: String, expected: &'static str },

    /// A value of the right type that the decoder refuses
    #[error("{path}: invalid value {value}")]
    InvalidValue { path: String, value: String },

    /// A required field is absent
    #[error("{path}: missing field \"{field}\"")]
    MissingField { path: String, field: String },

    /// Free-form decoder error from an engine build without structured errors
    #[error("{0}")]
    Engine(String),

    /// The parse was abandoned because its scope was cancelled
    #[error("parse cancelled")]
    Cancelled,
}

impl SchemaError {
    /// Check whether this rejection names `field` as unknown.
    ///
    /// Structured errors are matched exactly. Free-form engine messages fall
    /// back to a case-insensitive search for "unknown" and the field name.
    pub fn rejects_field(&self, field: &str) -> bool {
        match self {
            SchemaError::UnknownField { field: rejected, .. } => rejected == field,
            SchemaError::Engine(message) => {
                let message = message.to_lowercase();
                message.contains("unknown") && message.contains(&field.to_lowercase())
            }
            _ => false,
        }
    }

    /// Check if this error means the field is unsupported by the decoder
    pub fn is_unknown_field(&self) -> bool {
        match self {
            SchemaError::UnknownField { .. } => true,
            SchemaError::Engine(message) => message.to_lowercase().contains("unknown"),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SchemaError {
    fn from(err: serde_json::Error) -> Self {
        SchemaError::Syntax(err.to_string())
    }
}

type SchemaResult<T> = std::result::Result<T, SchemaError>;

/// Network stack used by a tun inbound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunStack {
    System,
    Gvisor,
    Mixed,
}

impl TunStack {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "system" => Some(TunStack::System),
            "gvisor" => Some(TunStack::Gvisor),
            "mixed" => Some(TunStack::Mixed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TunStack::System => "system",
            TunStack::Gvisor => "gvisor",
            TunStack::Mixed => "mixed",
        }
    }
}

impl fmt::Display for TunStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded tun inbound options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TunOptions {
    /// Tunnel descriptor, wherever the document placed it
    pub file_descriptor: Option<i32>,
    pub auto_route: bool,
    pub strict_route: bool,
    pub stack: Option<TunStack>,
    pub mtu: Option<u32>,
}

/// Decoded inbound
#[derive(Debug, Clone, PartialEq)]
pub struct InboundOptions {
    pub kind: String,
    pub tag: Option<String>,
    pub tun: Option<TunOptions>,
}

/// Decoded outbound
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundOptions {
    pub kind: String,
    pub tag: Option<String>,
}

/// Decoded route section
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteOptions {
    pub rules: Vec<Value>,
    pub final_outbound: Option<String>,
    pub auto_detect_interface: Option<bool>,
    pub auto_detect_interface_ipv6: Option<bool>,
}

/// Typed result of a successful strict parse
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    pub inbounds: Vec<InboundOptions>,
    pub outbounds: Vec<OutboundOptions>,
    pub route: RouteOptions,
    /// The accepted document
    pub document: Map<String, Value>,
}

impl EngineOptions {
    /// The first tun inbound, if any
    pub fn tun(&self) -> Option<&TunOptions> {
        self.inbounds.iter().find_map(|inbound| inbound.tun.as_ref())
    }
}

/// Field sets recognized by one engine revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    name: String,
    top_level: BTreeSet<String>,
    tun_fields: BTreeSet<String>,
    tun_platform_fields: BTreeSet<String>,
    route_fields: BTreeSet<String>,
}

const TOP_LEVEL_FIELDS: &[&str] = &[
    "log",
    "dns",
    "ntp",
    "certificate",
    "endpoints",
    "inbounds",
    "outbounds",
    "route",
    "services",
    "experimental",
];

const TUN_FIELDS: &[&str] = &[
    "type",
    "tag",
    "interface_name",
    "address",
    "inet4_address",
    "inet6_address",
    "mtu",
    "auto_route",
    "auto_redirect",
    "strict_route",
    "route_address",
    "route_exclude_address",
    "endpoint_independent_nat",
    "udp_timeout",
    "stack",
    "include_package",
    "exclude_package",
    "platform",
    "sniff",
    "sniff_override_destination",
];

const ROUTE_FIELDS: &[&str] = &[
    "rules",
    "rule_set",
    "final",
    "find_process",
    "auto_detect_interface",
    "override_android_vpn",
    "default_interface",
    "default_mark",
    "default_domain_resolver",
];

const DESCRIPTOR_KEYS: &[&str] = &["file_descriptor", "fd"];

fn field_set(fields: &[&str]) -> BTreeSet<String> {
    fields.iter().map(|f| f.to_string()).collect()
}

impl Schema {
    /// Current engine revision
    pub fn current() -> Self {
        Self {
            name: "current".into(),
            top_level: field_set(TOP_LEVEL_FIELDS),
            tun_fields: field_set(TUN_FIELDS),
            tun_platform_fields: field_set(&["http_proxy"]),
            route_fields: field_set(ROUTE_FIELDS),
        }
        .with_tun_field("file_descriptor")
        .with_route_field("auto_detect_interface_ipv6")
    }

    /// Older engine revision: descriptor only under `platform.fd`, no IPv6
    /// auto-detect flag
    pub fn legacy() -> Self {
        Self {
            name: "legacy".into(),
            top_level: field_set(TOP_LEVEL_FIELDS),
            tun_fields: field_set(TUN_FIELDS),
            tun_platform_fields: field_set(&["http_proxy", "fd"]),
            route_fields: field_set(ROUTE_FIELDS),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_tun_field(mut self, field: &str) -> Self {
        self.tun_fields.insert(field.to_string());
        self
    }

    pub fn without_tun_field(mut self, field: &str) -> Self {
        self.tun_fields.remove(field);
        self
    }

    pub fn without_tun_platform_field(mut self, field: &str) -> Self {
        self.tun_platform_fields.remove(field);
        self
    }

    pub fn with_route_field(mut self, field: &str) -> Self {
        self.route_fields.insert(field.to_string());
        self
    }

    pub fn without_route_field(mut self, field: &str) -> Self {
        self.route_fields.remove(field);
        self
    }

    /// Strictly decode a configuration document
    pub fn parse(&self, text: &str) -> SchemaResult<EngineOptions> {
        let value: Value = serde_json::from_str(text)?;
        let document = match value {
            Value::Object(map) => map,
            _ => return Err(invalid_type("$", "object")),
        };

        check_known(&document, &self.top_level, "$")?;

        let inbounds = match document.get("inbounds") {
            Some(value) => self.parse_inbounds(value)?,
            None => Vec::new(),
        };
        let outbounds = match document.get("outbounds") {
            Some(value) => parse_outbounds(value)?,
            None => Vec::new(),
        };
        let route = match document.get("route") {
            Some(value) => self.parse_route(value)?,
            None => RouteOptions::default(),
        };

        Ok(EngineOptions {
            inbounds,
            outbounds,
            route,
            document,
        })
    }

    fn parse_inbounds(&self, value: &Value) -> SchemaResult<Vec<InboundOptions>> {
        let items = value
            .as_array()
            .ok_or_else(|| invalid_type("inbounds", "array"))?;

        let mut inbounds = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let path = format!("inbounds[{}]", index);
            let map = item
                .as_object()
                .ok_or_else(|| invalid_type(&path, "object"))?;
            let kind = required_str(map, "type", &path)?;
            let tag = optional_str(map, "tag", &path)?;
            let tun = if kind == "tun" {
                Some(self.parse_tun(map, &path)?)
            } else {
                None
            };
            inbounds.push(InboundOptions {
                kind: kind.to_string(),
                tag: tag.map(str::to_string),
                tun,
            });
        }
        Ok(inbounds)
    }

    fn parse_tun(&self, map: &Map<String, Value>, path: &str) -> SchemaResult<TunOptions> {
        check_known(map, &self.tun_fields, path)?;

        let mut tun = TunOptions {
            auto_route: optional_bool(map, "auto_route", path)?.unwrap_or(false),
            strict_route: optional_bool(map, "strict_route", path)?.unwrap_or(false),
            ..TunOptions::default()
        };

        if let Some(stack) = optional_str(map, "stack", path)? {
            tun.stack = Some(TunStack::parse(stack).ok_or_else(|| SchemaError::InvalidValue {
                path: format!("{}.stack", path),
                value: stack.to_string(),
            })?);
        }

        if let Some(mtu) = map.get("mtu") {
            let mtu = mtu
                .as_u64()
                .and_then(|m| u32::try_from(m).ok())
                .ok_or_else(|| invalid_type(&format!("{}.mtu", path), "unsigned integer"))?;
            // zero leaves the engine default in place
            tun.mtu = (mtu > 0).then_some(mtu);
        }

        for key in DESCRIPTOR_KEYS {
            if let Some(fd) = descriptor_value(map, key, path)? {
                tun.file_descriptor = Some(fd);
            }
        }

        if let Some(platform) = map.get("platform") {
            let platform_path = format!("{}.platform", path);
            let platform = platform
                .as_object()
                .ok_or_else(|| invalid_type(&platform_path, "object"))?;
            check_known(platform, &self.tun_platform_fields, &platform_path)?;
            for key in DESCRIPTOR_KEYS {
                if let Some(fd) = descriptor_value(platform, key, &platform_path)? {
                    tun.file_descriptor = Some(fd);
                }
            }
        }

        Ok(tun)
    }

    fn parse_route(&self, value: &Value) -> SchemaResult<RouteOptions> {
        let map = value
            .as_object()
            .ok_or_else(|| invalid_type("route", "object"))?;
        check_known(map, &self.route_fields, "route")?;

        let rules = match map.get("rules") {
            Some(Value::Array(rules)) => {
                for (index, rule) in rules.iter().enumerate() {
                    if !rule.is_object() {
                        return Err(invalid_type(&format!("route.rules[{}]", index), "object"));
                    }
                }
                rules.clone()
            }
            Some(_) => return Err(invalid_type("route.rules", "array")),
            None => Vec::new(),
        };

        Ok(RouteOptions {
            rules,
            final_outbound: optional_str(map, "final", "route")?.map(str::to_string),
            auto_detect_interface: optional_bool(map, "auto_detect_interface", "route")?,
            auto_detect_interface_ipv6: optional_bool(map, "auto_detect_interface_ipv6", "route")?,
        })
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::current()
    }
}

fn parse_outbounds(value: &Value) -> SchemaResult<Vec<OutboundOptions>> {
    let items = value
        .as_array()
        .ok_or_else(|| invalid_type("outbounds", "array"))?;
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let path = format!("outbounds[{}]", index);
            let map = item
                .as_object()
                .ok_or_else(|| invalid_type(&path, "object"))?;
            Ok(OutboundOptions {
                kind: required_str(map, "type", &path)?.to_string(),
                tag: optional_str(map, "tag", &path)?.map(str::to_string),
            })
        })
        .collect()
}

fn check_known(map: &Map<String, Value>, known: &BTreeSet<String>, path: &str) -> SchemaResult<()> {
    match map.keys().find(|key| !known.contains(key.as_str())) {
        Some(field) => Err(SchemaError::UnknownField {
            path: path.to_string(),
            field: field.clone(),
        }),
        None => Ok(()),
    }
}

fn invalid_type(path: &str, expected: &'static str) -> SchemaError {
    SchemaError::InvalidType {
        path: path.to_string(),
        expected,
    }
}

fn required_str<'a>(map: &'a Map<String, Value>, key: &str, path: &str) -> SchemaResult<&'a str> {
    optional_str(map, key, path)?.ok_or_else(|| SchemaError::MissingField {
        path: path.to_string(),
        field: key.to_string(),
    })
}

fn optional_str<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    path: &str,
) -> SchemaResult<Option<&'a str>> {
    match map.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(invalid_type(&format!("{}.{}", path, key), "string")),
    }
}

fn optional_bool(map: &Map<String, Value>, key: &str, path: &str) -> SchemaResult<Option<bool>> {
    match map.get(key) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(invalid_type(&format!("{}.{}", path, key), "boolean")),
    }
}

fn descriptor_value(map: &Map<String, Value>, key: &str, path: &str) -> SchemaResult<Option<i32>> {
    match map.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_i64()
            .and_then(|fd| i32::try_from(fd).ok())
            .map(Some)
            .ok_or_else(|| invalid_type(&format!("{}.{}", path, key), "integer")),
    }
}
