//! Execution scope
//!
//! Every engine session runs under one cancellation token. Cancelling it
//! unblocks whatever parse, construct or start step is in flight; a fresh
//! token is installed once the session is torn down.

use std::future::Future;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Holder of the current session's cancellation token
#[derive(Debug, Default)]
pub struct ExecutionScope {
    token: Mutex<CancellationToken>,
}

impl ExecutionScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token of the current session
    pub fn token(&self) -> CancellationToken {
        self.token.lock().clone()
    }

    /// Cancel the current session
    pub fn cancel(&self) {
        self.token.lock().cancel();
    }

    /// Cancel the current session and start a new one
    pub fn renew(&self) {
        let mut token = self.token.lock();
        token.cancel();
        *token = CancellationToken::new();
    }

    /// Install a fresh token only if the current one was cancelled
    pub fn ensure_live(&self) {
        let mut token = self.token.lock();
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.lock().is_cancelled()
    }
}

/// Run `future` until it completes or `token` is cancelled
pub async fn run_until_cancelled<F: Future>(token: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        output = future => Some(output),
    }
}
