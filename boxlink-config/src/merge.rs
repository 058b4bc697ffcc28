//! Dynamic rule merge
//!
//! Rules added at runtime take priority over the base configuration: they are
//! placed in front of `route.rules`, and among themselves the most recently
//! added rule comes first. Base `[A, B]` plus added `[R1, R2]` merges to
//! `[R2, R1, A, B]`. Every other section is carried over untouched.

use serde_json::Value;

use crate::document::{ConfigDocument, RuleDocument};
use crate::error::{Error, Result};

/// Splice `rules` into `base`.
///
/// When `base` cannot be parsed, `fallback` (the last configuration the engine
/// ran with) is tried before giving up.
pub fn merge_rules(
    base: Option<&str>,
    fallback: Option<&str>,
    rules: &[RuleDocument],
) -> Result<String> {
    let base = base.filter(|text| !text.is_empty()).ok_or(Error::MissingBase)?;

    let mut document = match ConfigDocument::parse(base) {
        Ok(document) => document,
        Err(err) => match fallback.map(ConfigDocument::parse) {
            Some(Ok(document)) => {
                log::warn!("base config unreadable ({}), merging onto last working config", err);
                document
            }
            _ => return Err(err),
        },
    };

    let slot = document
        .route_mut()
        .entry("rules")
        .or_insert_with(|| Value::Array(Vec::new()));
    let existing = match std::mem::take(slot) {
        Value::Array(rules) => rules,
        _ => Vec::new(),
    };

    let mut merged = Vec::with_capacity(rules.len() + existing.len());
    merged.extend(rules.iter().rev().map(|rule| rule.value().clone()));
    merged.extend(existing);
    *slot = Value::Array(merged);

    document.to_text()
}
