//! Start watchdog
//!
//! While a start is in progress a background task reports, once per interval,
//! how long the start has been running and which step it is in. A hung
//! construct or engine start then shows up in the diagnostics file even when
//! the host never gets control back.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::diagnostics::Diagnostics;
use crate::event::StartStage;

/// Heartbeat task bound to one start. Dropping the guard stops it.
pub struct Watchdog {
    stage: Arc<Mutex<StartStage>>,
    stop: CancellationToken,
    started: Instant,
}

impl Watchdog {
    pub fn spawn(
        runtime: &Handle,
        label: &'static str,
        interval: Duration,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        let stage = Arc::new(Mutex::new(StartStage::ParseOptions));
        let stop = CancellationToken::new();
        let started = Instant::now();

        let task_stage = stage.clone();
        let task_stop = stop.clone();
        runtime.spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = task_stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let stage = *task_stage.lock();
                        diagnostics.native(&format!(
                            "{} watchdog elapsed={}ms stage={}",
                            label,
                            started.elapsed().as_millis(),
                            stage
                        ));
                    }
                }
            }
        });

        Self {
            stage,
            stop,
            started,
        }
    }

    pub fn set_stage(&self, stage: StartStage) {
        *self.stage.lock() = stage;
    }

    pub fn stage(&self) -> StartStage {
        *self.stage.lock()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
