//! Generic configuration document
//!
//! A thin wrapper around a JSON object that keeps key order, so rewritten
//! documents stay readable when they are logged or shown to the user.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Parsed configuration document
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    root: Map<String, Value>,
}

impl ConfigDocument {
    /// Parse a document from JSON text. The top level must be an object.
    pub fn parse(text: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(text)? {
            Value::Object(root) => Ok(Self { root }),
            _ => Err(Error::NotAnObject("$".into())),
        }
    }

    /// Wrap an existing JSON object
    pub fn from_map(root: Map<String, Value>) -> Self {
        Self { root }
    }

    /// Serialize back to compact JSON text
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.root)?)
    }

    /// Serialize to indented JSON text
    pub fn to_pretty_text(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.root)?)
    }

    pub fn root(&self) -> &Map<String, Value> {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.root
    }

    /// The `inbounds` array, created when missing.
    ///
    /// A non-array `inbounds` value is replaced by an empty array.
    pub fn inbounds_mut(&mut self) -> &mut Vec<Value> {
        let slot = self
            .root
            .entry("inbounds")
            .or_insert_with(|| Value::Array(Vec::new()));
        if !slot.is_array() {
            log::debug!("replacing non-array inbounds value");
            *slot = Value::Array(Vec::new());
        }
        match slot {
            Value::Array(items) => items,
            _ => unreachable!("inbounds slot was just set to an array"),
        }
    }

    /// The `route` object, created when missing or not an object.
    pub fn route_mut(&mut self) -> &mut Map<String, Value> {
        let slot = self
            .root
            .entry("route")
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        match slot {
            Value::Object(route) => route,
            _ => unreachable!("route slot was just set to an object"),
        }
    }

    /// Index of the first inbound whose `type` is `kind`
    pub fn find_inbound(&self, kind: &str) -> Option<usize> {
        let inbounds = self.root.get("inbounds")?.as_array()?;
        inbounds
            .iter()
            .position(|inbound| inbound.get("type").and_then(Value::as_str) == Some(kind))
    }

    /// The first inbound of the given type
    pub fn inbound(&self, kind: &str) -> Option<&Map<String, Value>> {
        let index = self.find_inbound(kind)?;
        self.root.get("inbounds")?.as_array()?.get(index)?.as_object()
    }
}

/// A routing rule as submitted by the host
///
/// The original text is kept verbatim; rules are compared by their exact text
/// when the host asks to remove one.
#[derive(Debug, Clone)]
pub struct RuleDocument {
    text: String,
    value: Value,
}

impl RuleDocument {
    /// Parse a rule. Only JSON objects are accepted.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(Error::NotAnObject("rule".into()));
        }
        Ok(Self {
            text: text.to_string(),
            value,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl PartialEq for RuleDocument {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for RuleDocument {}
