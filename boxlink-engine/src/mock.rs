//! Mock engine backend for testing
//!
//! [`MockEngine`] parses with a configurable [`Schema`] and records every
//! construct, start and close in a journal with timestamps, so lifecycle
//! behaviour (ordering, restart spacing, rule merging, descriptor handoff)
//! can be checked without a real proxy engine. Failures and delays can be
//! injected per step. Create and start delays honour the session's
//! cancellation; a close delay does not, like a slow teardown.
//!
//! # Example
//!
//! ```ignore
//! use boxlink_engine::mock::MockEngine;
//! use boxlink_engine::Controller;
//!
//! let mock = MockEngine::new();
//! let controller = Controller::new(mock.clone())?;
//! controller.start(r#"{"route":{}}"#)?;
//! assert_eq!(mock.live_instances(), 1);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use boxlink_config::{EngineOptions, Schema, SchemaError};
use boxlink_platform::TunRequest;

use crate::engine::{parse_with, EngineContext, EngineFactory, EngineHandle};
use crate::error::EngineError;
use crate::event::LogLevel;
use crate::scope::run_until_cancelled;

/// One recorded engine call
#[derive(Debug, Clone)]
pub enum JournalEntry {
    Created {
        instance: usize,
        at: Instant,
        options: EngineOptions,
    },
    Started {
        instance: usize,
        at: Instant,
    },
    /// The instance took the host's tunnel descriptor
    TunOpened {
        instance: usize,
        descriptor: i32,
    },
    Closed {
        instance: usize,
        at: Instant,
        /// Whether the session scope was already cancelled when close began
        scope_cancelled: bool,
    },
}

/// Failures and delays to inject
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    pub fail_create: Option<String>,
    pub fail_start: Option<String>,
    pub fail_close: Option<String>,
    pub create_delay: Duration,
    pub start_delay: Duration,
    pub close_delay: Duration,
}

struct Shared {
    journal: Mutex<Vec<JournalEntry>>,
    behavior: Mutex<MockBehavior>,
    live: AtomicUsize,
    next_instance: AtomicUsize,
}

impl Shared {
    fn record(&self, entry: JournalEntry) {
        self.journal.lock().push(entry);
    }
}

/// Engine backend that only records what it is asked to do
pub struct MockEngine {
    schema: Mutex<Schema>,
    shared: Arc<Shared>,
}

impl MockEngine {
    /// Mock using the current schema
    pub fn new() -> Arc<Self> {
        Self::with_schema(Schema::current())
    }

    pub fn with_schema(schema: Schema) -> Arc<Self> {
        Arc::new(Self {
            schema: Mutex::new(schema),
            shared: Arc::new(Shared {
                journal: Mutex::new(Vec::new()),
                behavior: Mutex::new(MockBehavior::default()),
                live: AtomicUsize::new(0),
                next_instance: AtomicUsize::new(0),
            }),
        })
    }

    pub fn set_schema(&self, schema: Schema) {
        *self.schema.lock() = schema;
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.shared.behavior.lock() = behavior;
    }

    pub fn update_behavior(&self, update: impl FnOnce(&mut MockBehavior)) {
        update(&mut self.shared.behavior.lock());
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.shared.journal.lock().clone()
    }

    /// Instances constructed and not yet closed
    pub fn live_instances(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    pub fn created_count(&self) -> usize {
        self.count(|e| matches!(e, JournalEntry::Created { .. }))
    }

    pub fn started_count(&self) -> usize {
        self.count(|e| matches!(e, JournalEntry::Started { .. }))
    }

    pub fn closed_count(&self) -> usize {
        self.count(|e| matches!(e, JournalEntry::Closed { .. }))
    }

    fn count(&self, filter: impl Fn(&JournalEntry) -> bool) -> usize {
        self.shared.journal.lock().iter().filter(|e| filter(e)).count()
    }

    /// For each close, whether the session scope was cancelled beforehand
    pub fn close_scopes_cancelled(&self) -> Vec<bool> {
        self.shared
            .journal
            .lock()
            .iter()
            .filter_map(|e| match e {
                JournalEntry::Closed {
                    scope_cancelled, ..
                } => Some(*scope_cancelled),
                _ => None,
            })
            .collect()
    }

    /// Times at which engine starts were attempted
    pub fn start_times(&self) -> Vec<Instant> {
        self.shared
            .journal
            .lock()
            .iter()
            .filter_map(|e| match e {
                JournalEntry::Started { at, .. } => Some(*at),
                _ => None,
            })
            .collect()
    }

    /// Options passed to the most recent construction
    pub fn last_options(&self) -> Option<EngineOptions> {
        self.shared.journal.lock().iter().rev().find_map(|e| match e {
            JournalEntry::Created { options, .. } => Some(options.clone()),
            _ => None,
        })
    }

    /// Descriptors handed over through the platform interface
    pub fn opened_descriptors(&self) -> Vec<i32> {
        self.shared
            .journal
            .lock()
            .iter()
            .filter_map(|e| match e {
                JournalEntry::TunOpened { descriptor, .. } => Some(*descriptor),
                _ => None,
            })
            .collect()
    }
}

async fn pause(scope: &CancellationToken, delay: Duration) -> Result<(), EngineError> {
    if delay.is_zero() {
        return Ok(());
    }
    run_until_cancelled(scope, tokio::time::sleep(delay))
        .await
        .ok_or(EngineError::Cancelled)
}

#[async_trait]
impl EngineFactory for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn parse(&self, text: &str, scope: &CancellationToken) -> Result<EngineOptions, SchemaError> {
        let schema = self.schema.lock().clone();
        parse_with(&schema, text, scope)
    }

    async fn create(
        &self,
        options: EngineOptions,
        context: EngineContext,
    ) -> Result<Arc<dyn EngineHandle>, EngineError> {
        let behavior = self.shared.behavior.lock().clone();
        pause(&context.scope, behavior.create_delay).await?;
        if let Some(message) = behavior.fail_create {
            return Err(EngineError::Failed(message));
        }

        let instance = self.shared.next_instance.fetch_add(1, Ordering::SeqCst);
        let tun = options
            .inbounds
            .iter()
            .find(|inbound| inbound.tun.is_some())
            .map(|inbound| TunRequest {
                tag: inbound.tag.clone(),
                mtu: inbound.tun.as_ref().and_then(|tun| tun.mtu),
            });
        self.shared.record(JournalEntry::Created {
            instance,
            at: Instant::now(),
            options,
        });
        self.shared.live.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(MockHandle {
            instance,
            tun,
            context,
            shared: self.shared.clone(),
            closed: Mutex::new(false),
        }))
    }
}

struct MockHandle {
    instance: usize,
    tun: Option<TunRequest>,
    context: EngineContext,
    shared: Arc<Shared>,
    closed: Mutex<bool>,
}

#[async_trait]
impl EngineHandle for MockHandle {
    async fn start(&self) -> Result<(), EngineError> {
        self.shared.record(JournalEntry::Started {
            instance: self.instance,
            at: Instant::now(),
        });
        let behavior = self.shared.behavior.lock().clone();
        pause(&self.context.scope, behavior.start_delay).await?;
        if let Some(message) = behavior.fail_start {
            return Err(EngineError::Failed(message));
        }

        if let (Some(platform), Some(request)) = (&self.context.platform, &self.tun) {
            let handoff = platform.open_tun(request)?;
            self.shared.record(JournalEntry::TunOpened {
                instance: self.instance,
                descriptor: handoff.into_raw(),
            });
        }

        self.context
            .log
            .write_message(LogLevel::Info, &format!("mock engine #{} started", self.instance));
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        let scope_cancelled = self.context.scope.is_cancelled();
        let behavior = self.shared.behavior.lock().clone();
        if !behavior.close_delay.is_zero() {
            tokio::time::sleep(behavior.close_delay).await;
        }
        if let Some(message) = behavior.fail_close {
            return Err(EngineError::Failed(message));
        }
        let mut closed = self.closed.lock();
        if !*closed {
            *closed = true;
            self.shared.live.fetch_sub(1, Ordering::SeqCst);
            self.shared.record(JournalEntry::Closed {
                instance: self.instance,
                at: Instant::now(),
                scope_cancelled,
            });
        }
        Ok(())
    }
}
