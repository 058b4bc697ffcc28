//! Engine lifecycle controller
//!
//! The controller owns at most one engine instance and serializes every
//! state-changing command behind a single lock. Commands are synchronous:
//! engine calls are driven to completion on the controller's own runtime.
//!
//! ```text
//!                 start ok
//!   Idle ──▶ Starting ──────▶ Running ──▶ Stopping ──▶ Idle
//!    ▲          │ fail          │  ▲          │ close failed
//!    └──────────┘               │  └──────────┘
//!                    reload / replace (close, then start again)
//! ```
//!
//! `stop` is the only command that gives the lock up part way through: it
//! cancels the session scope while still holding the lock, then closes the
//! engine without it so a slow close cannot block other callers. `cleanup`
//! cancels the scope before it even asks for the lock, which unblocks a start
//! that is stuck inside the engine.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use boxlink_config::{merge_rules, RuleDocument};
use boxlink_platform::{Capabilities, PlatformAdapter, TunnelDescriptor};

use crate::adapt::{adapt_config, Adaptation};
use crate::diagnostics::{Diagnostics, LogReceiver};
use crate::engine::{EngineContext, EngineFactory, EngineHandle};
use crate::error::{EngineError, Error, Result};
use crate::event::{LifecycleState, LogLevel, StartStage};
use crate::probe::{self, ProbeReport, ProbeTarget};
use crate::scope::{run_until_cancelled, ExecutionScope};
use crate::settings::Settings;
use crate::watchdog::Watchdog;

/// Mutable state guarded by the controller lock
#[derive(Default)]
struct Session {
    handle: Option<Arc<dyn EngineHandle>>,
    /// Text of the last start or replace, after platform pre-processing
    base: Option<String>,
    /// Text the running engine was last built from
    current: Option<String>,
    rules: Vec<RuleDocument>,
    descriptor: Option<TunnelDescriptor>,
    last_restart_at: Option<Instant>,
}

impl Session {
    fn clear_configuration(&mut self) {
        self.base = None;
        self.current = None;
        self.descriptor = None;
    }
}

/// Builder for [`Controller`]
pub struct ControllerBuilder {
    factory: Arc<dyn EngineFactory>,
    platform: Option<Arc<dyn PlatformAdapter>>,
    settings: Settings,
    diagnostics: Option<Arc<Diagnostics>>,
}

impl ControllerBuilder {
    /// Platform adapter, defaults to the one for the running OS
    pub fn platform(mut self, platform: Arc<dyn PlatformAdapter>) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Diagnostics sink, defaults to one built from the settings
    pub fn diagnostics(mut self, diagnostics: Arc<Diagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn build(self) -> Result<Controller> {
        self.settings.validate()?;
        let platform = self.platform.unwrap_or_else(boxlink_platform::native);
        let capabilities = platform.capabilities();
        let diagnostics = self.diagnostics.unwrap_or_else(|| {
            Arc::new(Diagnostics::from_settings(
                &self.settings.diagnostics,
                capabilities.log_receiver_supported,
            ))
        });

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.settings.worker_threads)
            .thread_name("boxlink-worker")
            .enable_all()
            .build()?;

        log::debug!(
            "controller ready: engine={} target={}",
            self.factory.name(),
            platform.target()
        );

        Ok(Controller {
            runtime,
            factory: self.factory,
            platform,
            capabilities,
            diagnostics,
            settings: self.settings,
            scope: ExecutionScope::new(),
            session: Mutex::new(Session::default()),
            phase: Mutex::new(LifecycleState::Uninitialized),
            last_error: Mutex::new(String::new()),
        })
    }
}

/// Lifecycle controller for one embedded engine
///
/// All methods block the calling thread; do not call them from inside an
/// async runtime.
pub struct Controller {
    runtime: Runtime,
    factory: Arc<dyn EngineFactory>,
    platform: Arc<dyn PlatformAdapter>,
    capabilities: Capabilities,
    diagnostics: Arc<Diagnostics>,
    settings: Settings,
    scope: ExecutionScope,
    session: Mutex<Session>,
    phase: Mutex<LifecycleState>,
    last_error: Mutex<String>,
}

impl Controller {
    /// Controller for the running OS with default settings
    pub fn new(factory: Arc<dyn EngineFactory>) -> Result<Self> {
        Self::builder(factory).build()
    }

    pub fn builder(factory: Arc<dyn EngineFactory>) -> ControllerBuilder {
        ControllerBuilder {
            factory,
            platform: None,
            settings: Settings::default(),
            diagnostics: None,
        }
    }

    /// Reset the execution scope. Idempotent.
    pub fn init(&self) {
        self.scope.renew();
        let mut phase = self.phase.lock();
        if *phase == LifecycleState::Uninitialized {
            *phase = LifecycleState::Idle;
        }
        drop(phase);
        self.diagnostics.native("init: execution scope ready");
    }

    /// Start an engine from `config`
    pub fn start(&self, config: &str) -> Result<()> {
        let result = self.start_session(config, None);
        self.record(result)
    }

    /// Start with a tunnel opened by the host.
    ///
    /// A negative descriptor is treated as none. The controller never closes
    /// the descriptor.
    pub fn start_with_tunnel_descriptor(&self, config: &str, descriptor: i32) -> Result<()> {
        let descriptor = match TunnelDescriptor::new(descriptor) {
            Ok(descriptor) => Some(descriptor),
            Err(err) => {
                self.diagnostics.native(&format!("start: {}, ignoring", err));
                None
            }
        };
        let result = self.start_session(config, descriptor);
        self.record(result)
    }

    fn start_session(&self, config: &str, descriptor: Option<TunnelDescriptor>) -> Result<()> {
        let mut session = self.session.lock();
        if session.handle.is_none() {
            session.descriptor = descriptor;
        }
        self.start_locked(&mut session, config)
    }

    /// Stop the running engine
    pub fn stop(&self) -> Result<()> {
        let result = self.stop_inner();
        self.record(result)
    }

    /// Rebuild the engine from the base configuration plus dynamic rules
    pub fn reload(&self) -> Result<()> {
        let result = {
            let mut session = self.session.lock();
            self.reload_locked(&mut session)
        };
        self.record(result)
    }

    /// Swap the base configuration and restart, keeping dynamic rules.
    ///
    /// `None` is the host passing no configuration at all.
    pub fn replace(&self, config: Option<&str>) -> Result<()> {
        let result = match config {
            None => Err(Error::InvalidArgument("config is null".into())),
            Some(config) => {
                let mut session = self.session.lock();
                self.replace_locked(&mut session, config)
            }
        };
        self.record(result)
    }

    /// Queue a routing rule. It takes effect on the next reload.
    pub fn add_rule(&self, rule: &str) -> Result<()> {
        let result = {
            let mut session = self.session.lock();
            self.require_running(&session).and_then(|_| {
                let rule = RuleDocument::parse(rule).map_err(Error::InvalidRule)?;
                session.rules.push(rule);
                Ok(())
            })
        };
        self.record(result)
    }

    /// Drop the first queued rule whose text equals `rule`
    pub fn remove_rule(&self, rule: &str) -> Result<()> {
        let result = {
            let mut session = self.session.lock();
            self.require_running(&session).and_then(|_| {
                let rule = RuleDocument::parse(rule).map_err(Error::InvalidRule)?;
                let index = session
                    .rules
                    .iter()
                    .position(|existing| *existing == rule)
                    .ok_or(Error::RuleNotFound)?;
                session.rules.remove(index);
                Ok(())
            })
        };
        self.record(result)
    }

    /// Forget all queued rules. Does not restart the engine.
    pub fn clear_rules(&self) {
        self.session.lock().rules.clear();
        self.last_error.lock().clear();
    }

    /// Tear everything down, whatever state the controller is in
    pub fn cleanup(&self) {
        self.scope.cancel();
        let handle = {
            let mut session = self.session.lock();
            let handle = session.handle.take();
            session.clear_configuration();
            session.rules.clear();
            self.scope.renew();
            self.set_phase(LifecycleState::Uninitialized);
            handle
        };

        if let Some(handle) = handle {
            if let Err(err) = self.runtime.block_on(handle.close()) {
                self.diagnostics
                    .native(&format!("cleanup: close engine failed: {}", err));
            }
        }
        self.last_error.lock().clear();
        self.diagnostics.native("cleanup: done");
    }

    pub fn is_running(&self) -> bool {
        *self.phase.lock() == LifecycleState::Running
    }

    pub fn state(&self) -> LifecycleState {
        *self.phase.lock()
    }

    /// Message of the most recent failure, empty after a success
    pub fn last_error(&self) -> String {
        self.last_error.lock().clone()
    }

    /// Check that `config` would get past the parse step of a start
    pub fn test_config(&self, config: &str) -> Result<()> {
        let scope = CancellationToken::new();
        let adaptation = self.adapt(config, None, &scope);
        let result = self
            .factory
            .parse(&adaptation.text, &scope)
            .map(|_| ())
            .map_err(Error::Parse);
        self.record(result)
    }

    /// Configuration a reload would start the engine with
    pub fn merged_config(&self) -> Result<String> {
        let session = self.session.lock();
        merge_rules(
            session.base.as_deref(),
            session.current.as_deref(),
            &session.rules,
        )
        .map_err(Error::Merge)
    }

    /// Queued rules, oldest first
    pub fn dynamic_rules(&self) -> Vec<String> {
        self.session
            .lock()
            .rules
            .iter()
            .map(|rule| rule.text().to_string())
            .collect()
    }

    /// Register or clear the host log receiver. Returns false when the
    /// platform ignores receivers.
    pub fn register_log_receiver(&self, receiver: Option<LogReceiver>) -> bool {
        self.diagnostics.register(receiver)
    }

    pub fn version(&self) -> String {
        format!(
            "{} integrated v{}",
            self.factory.name(),
            env!("CARGO_PKG_VERSION")
        )
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// TLS handshake against `target`. Cancelled by `cleanup`.
    pub fn probe_tls(&self, target: &ProbeTarget) -> Result<ProbeReport> {
        self.probe("tls", probe::probe_tls(target))
    }

    /// QUIC handshake against `target`. Cancelled by `cleanup`.
    pub fn probe_quic(&self, target: &ProbeTarget) -> Result<ProbeReport> {
        self.probe("quic", probe::probe_quic(target))
    }

    fn probe(
        &self,
        kind: &'static str,
        handshake: impl Future<Output = Result<ProbeReport>>,
    ) -> Result<ProbeReport> {
        self.scope.ensure_live();
        let scope = self.scope.token();
        let result = self.runtime.block_on(async {
            run_until_cancelled(&scope, handshake)
                .await
                .unwrap_or(Err(Error::ProbeCancelled(kind)))
        });
        match result {
            // the teardown that cancelled us owns LastError
            Err(err) if err.is_cancelled() => {
                log::debug!("{}", err);
                Err(err)
            }
            result => self.record(result),
        }
    }

    fn record<T>(&self, result: Result<T>) -> Result<T> {
        let mut last_error = self.last_error.lock();
        match &result {
            Ok(_) => last_error.clear(),
            Err(err) => {
                log::debug!("command failed: {}", err);
                *last_error = err.to_string();
            }
        }
        result
    }

    fn set_phase(&self, next: LifecycleState) {
        let mut phase = self.phase.lock();
        if *phase != next {
            log::debug!("lifecycle {} -> {}", *phase, next);
            *phase = next;
        }
    }

    /// An engine exists and is not being stopped
    fn engine_present(&self, session: &Session) -> bool {
        session.handle.is_some() && self.state() != LifecycleState::Stopping
    }

    fn require_running(&self, session: &Session) -> Result<()> {
        if self.engine_present(session) {
            Ok(())
        } else {
            Err(Error::NotRunning)
        }
    }

    fn adapt(
        &self,
        config: &str,
        descriptor: Option<TunnelDescriptor>,
        scope: &CancellationToken,
    ) -> Adaptation {
        adapt_config(
            config,
            &self.capabilities,
            descriptor,
            &self.diagnostics,
            |candidate| self.factory.parse(candidate, scope).map(|_| ()),
        )
    }

    fn start_locked(&self, session: &mut MutexGuard<'_, Session>, config: &str) -> Result<()> {
        if session.handle.is_some() {
            self.diagnostics.message(LogLevel::Warn, "already running");
            return Err(Error::AlreadyRunning);
        }

        self.scope.ensure_live();
        self.set_phase(LifecycleState::Starting);
        for finding in self.platform.preflight() {
            self.diagnostics.native(&format!("preflight: {}", finding));
        }

        let processed = self.adapt(config, session.descriptor, &self.scope.token()).text;
        session.base = Some(processed.clone());
        session.current = Some(processed.clone());
        session.rules.clear();

        match self.launch(&processed, session.descriptor) {
            Ok(handle) => {
                session.handle = Some(handle);
                self.set_phase(LifecycleState::Running);
                self.diagnostics.message(LogLevel::Info, "engine started");
                Ok(())
            }
            Err(err) => {
                self.set_phase(LifecycleState::Idle);
                self.diagnostics.message(LogLevel::Error, &err.to_string());
                Err(err)
            }
        }
    }

    /// Parse, construct and start an engine under the current scope
    fn launch(
        &self,
        config: &str,
        descriptor: Option<TunnelDescriptor>,
    ) -> Result<Arc<dyn EngineHandle>> {
        let scope = self.scope.token();
        let watchdog = Watchdog::spawn(
            self.runtime.handle(),
            "start",
            self.settings.watchdog_interval(),
            self.diagnostics.clone(),
        );

        self.stage(&watchdog, StartStage::ParseOptions, "begin");
        let options = match self.factory.parse(config, &scope) {
            Ok(options) => options,
            Err(err) => {
                self.stage(&watchdog, StartStage::ParseOptions, "fail");
                return Err(Error::Parse(err));
            }
        };
        self.stage(&watchdog, StartStage::ParseOptions, "ok");

        self.stage(&watchdog, StartStage::Construct, "begin");
        let platform = descriptor.and_then(|descriptor| {
            self.diagnostics.native(&format!(
                "registering platform interface with tunnel {}",
                descriptor
            ));
            self.platform.interface_provider(Some(descriptor))
        });
        let context = EngineContext {
            scope: scope.clone(),
            log: self.diagnostics.clone(),
            platform,
        };
        let created = self.runtime.block_on(async {
            run_until_cancelled(&scope, self.factory.create(options, context))
                .await
                .unwrap_or(Err(EngineError::Cancelled))
        });
        let handle = match created {
            Ok(handle) => handle,
            Err(err) => {
                self.stage(&watchdog, StartStage::Construct, "fail");
                return Err(Error::Construct(err));
            }
        };
        self.stage(&watchdog, StartStage::Construct, "ok");

        self.stage(&watchdog, StartStage::EngineStart, "begin");
        let started = self.runtime.block_on(async {
            run_until_cancelled(&scope, handle.start())
                .await
                .unwrap_or(Err(EngineError::Cancelled))
        });
        if let Err(err) = started {
            self.stage(&watchdog, StartStage::EngineStart, "fail");
            if let Err(close_err) = self.runtime.block_on(handle.close()) {
                self.diagnostics.native(&format!(
                    "start: releasing partial engine failed: {}",
                    close_err
                ));
            }
            return Err(Error::Start(err));
        }
        self.stage(&watchdog, StartStage::EngineStart, "ok");
        watchdog.set_stage(StartStage::Done);

        Ok(handle)
    }

    fn stage(&self, watchdog: &Watchdog, stage: StartStage, event: &str) {
        watchdog.set_stage(stage);
        self.diagnostics
            .native(&format!("start phase={} {}", stage, event));
    }

    fn stop_inner(&self) -> Result<()> {
        let handle = {
            let session = self.session.lock();
            if !self.engine_present(&session) {
                return Err(Error::NotRunning);
            }
            let Some(handle) = session.handle.clone() else {
                return Err(Error::NotRunning);
            };
            self.set_phase(LifecycleState::Stopping);
            // cancel while still holding the lock so no new work joins this session
            self.scope.cancel();
            handle
        };

        self.diagnostics.native("stop: closing engine");
        let closed = self.runtime.block_on(handle.close());

        let mut session = self.session.lock();
        let still_current = session
            .handle
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &handle));
        match closed {
            Ok(()) => {
                if still_current {
                    session.handle = None;
                    session.clear_configuration();
                    self.scope.renew();
                    self.set_phase(LifecycleState::Idle);
                }
                self.diagnostics.message(LogLevel::Info, "engine stopped");
                Ok(())
            }
            Err(err) => {
                if still_current {
                    self.set_phase(LifecycleState::Running);
                }
                Err(Error::Close(err))
            }
        }
    }

    fn reload_locked(&self, session: &mut MutexGuard<'_, Session>) -> Result<()> {
        self.require_running(session)?;
        let merged = merge_rules(
            session.base.as_deref(),
            session.current.as_deref(),
            &session.rules,
        )
        .map_err(Error::Merge)?;
        self.restart_locked(session, &merged)
            .map_err(|err| Error::Restart(Box::new(err)))
    }

    fn replace_locked(&self, session: &mut MutexGuard<'_, Session>, config: &str) -> Result<()> {
        self.require_running(session)?;
        let processed = self.adapt(config, session.descriptor, &self.scope.token()).text;
        session.base = Some(processed.clone());
        session.current = Some(processed);
        let merged = merge_rules(
            session.base.as_deref(),
            session.current.as_deref(),
            &session.rules,
        )
        .map_err(Error::Merge)?;
        self.restart_locked(session, &merged)
            .map_err(|err| Error::Restart(Box::new(err)))
    }

    fn restart_locked(&self, session: &mut MutexGuard<'_, Session>, config: &str) -> Result<()> {
        if let Some(last) = session.last_restart_at {
            let throttle = self.settings.restart_throttle();
            let elapsed = last.elapsed();
            if elapsed < throttle {
                std::thread::sleep(throttle - elapsed);
            }
        }

        let result = match session.handle.take() {
            None => self.start_locked(session, config),
            Some(handle) => self.rebuild_locked(session, handle, config),
        };
        if result.is_ok() {
            session.last_restart_at = Some(Instant::now());
        }
        result
    }

    fn rebuild_locked(
        &self,
        session: &mut MutexGuard<'_, Session>,
        handle: Arc<dyn EngineHandle>,
        config: &str,
    ) -> Result<()> {
        self.set_phase(LifecycleState::Stopping);
        let closed = self.runtime.block_on(handle.close());
        drop(handle);
        if let Err(err) = closed {
            self.set_phase(LifecycleState::Idle);
            return Err(Error::Close(err));
        }

        self.scope.renew();
        self.set_phase(LifecycleState::Starting);
        match self.launch(config, session.descriptor) {
            Ok(handle) => {
                session.handle = Some(handle);
                session.current = Some(config.to_string());
                self.set_phase(LifecycleState::Running);
                self.diagnostics.message(LogLevel::Info, "engine restarted");
                Ok(())
            }
            Err(err) => {
                self.set_phase(LifecycleState::Idle);
                self.diagnostics
                    .message(LogLevel::Error, &format!("restart: {}", err));
                Err(err)
            }
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("engine", &self.factory.name())
            .field("target", &self.platform.target())
            .field("state", &self.state())
            .finish()
    }
}
