//! Boxlink Engine
//!
//! Lifecycle control for an embedded proxy engine. The host application
//! never drives the engine directly; it issues synchronous commands to a
//! [`Controller`], which serializes them, prepares configuration for the
//! current platform and reports failures as step-tagged errors.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Host Layer                               │
//! │  ┌─────────────────┐              ┌─────────────────────┐   │
//! │  │  boxlink-ffi    │              │    boxlink-cli      │   │
//! │  │  (C ABI)        │              │    (developer tool) │   │
//! │  └────────┬────────┘              └──────────┬──────────┘   │
//! │           └───────────────┬──────────────────┘              │
//! │                           ▼                                 │
//! │  ┌────────────────────────────────────────────────────────┐ │
//! │  │                   boxlink-engine                       │ │
//! │  │  - Controller (lifecycle state machine)                │ │
//! │  │  - EngineFactory / EngineHandle (opaque backend)       │ │
//! │  │  - Diagnostics, Watchdog, Settings, probes             │ │
//! │  └────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Library Layer                            │
//! │  ┌─────────────────┐    ┌─────────────────┐                 │
//! │  │ boxlink-config  │    │ boxlink-platform│                 │
//! │  │  - Schema       │    │  - Adapters     │                 │
//! │  │  - Rewrites     │    │  - Tunnel fd    │                 │
//! │  │  - Rule merge   │    │  - Capabilities │                 │
//! │  └─────────────────┘    └─────────────────┘                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod adapt;
pub mod controller;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod event;
pub mod mock;
pub mod probe;
pub mod scope;
pub mod settings;
pub mod status;
pub mod watchdog;

pub use adapt::{adapt_config, Adaptation};
pub use controller::{Controller, ControllerBuilder};
pub use diagnostics::{Diagnostics, LogReceiver, LogWriter};
pub use engine::{EngineContext, EngineFactory, EngineHandle, UnlinkedEngine};
pub use error::{EngineError, Error, Result};
pub use event::{LifecycleState, LogLevel, StartStage};
pub use probe::{ProbeReport, ProbeTarget, DEFAULT_QUIC_ALPN, DEFAULT_TIMEOUT};
pub use settings::{DiagnosticsSettings, Settings};
pub use status::Operation;
