//! Boxlink configuration transforms
//!
//! The engine consumes a JSON configuration document. Before a document is
//! handed over, the lifecycle controller rewrites it: dynamic routing rules
//! are spliced into `route.rules`, and on mobile targets a tunnel file
//! descriptor is injected and route auto-detection is switched off.
//!
//! Engine builds disagree on where some fields live, so platform rewrites are
//! expressed as an ordered list of candidates. Each candidate is applied to a
//! copy of the document and trial-parsed against the engine's strict
//! [`Schema`]; the first accepted candidate wins.
//!
//! ```text
//!   config text ──▶ ConfigDocument ──▶ candidate 1 ──▶ trial parse ──▶ accepted
//!                                          │ rejected (unknown field)
//!                                          ▼
//!                                      candidate 2 ──▶ ...
//! ```

pub mod document;
pub mod error;
pub mod inject;
pub mod merge;
pub mod probe;
pub mod route;
pub mod schema;

pub use document::{ConfigDocument, RuleDocument};
pub use error::{Error, Result};
pub use inject::{DescriptorPlacement, InjectDescriptor, DEFAULT_PLACEMENTS, DEFAULT_TUN_TAG};
pub use merge::merge_rules;
pub use probe::{probe, Attempt, ProbeOutcome, Rewrite};
pub use route::SuppressAutoDetect;
pub use schema::{
    EngineOptions, InboundOptions, OutboundOptions, RouteOptions, Schema, SchemaError,
    TunOptions, TunStack,
};
