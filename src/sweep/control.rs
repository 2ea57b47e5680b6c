//! Cancellation and abort signalling shared by every sweep task

use std::fmt;
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Why a sweep was aborted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// 401 (or login redirect) while `fatal_abort_on_auth_expired` is set
    AuthExpired { target: u64 },
    /// The cookie set produced no authenticated response
    AuthExhausted(String),
    /// The login collaborator failed
    LoginFailed(String),
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthExpired { .. } => "auth_expired",
            Self::AuthExhausted(_) => "auth_exhausted",
            Self::LoginFailed(_) => "login_failed",
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthExpired { target } => write!(f, "auth_expired (target {})", target),
            Self::AuthExhausted(detail) => write!(f, "auth_exhausted: {}", detail),
            Self::LoginFailed(detail) => write!(f, "login_failed: {}", detail),
        }
    }
}

/// Handle used to stop a running sweep
///
/// Cancelling moves the sweep from running to draining: workers stop pulling
/// new batches and the publisher flushes what it has. Aborting additionally
/// latches a reason (the first one wins) and makes the sweep end `Aborted`.
#[derive(Debug, Default)]
pub struct SweepControl {
    token: CancellationToken,
    abort: Mutex<Option<AbortReason>>,
}

impl SweepControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// External cancellation (e.g. Ctrl-C)
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("Cancellation requested, draining");
        }
        self.token.cancel();
    }

    /// Fatal abort; the first reason is kept
    pub fn abort(&self, reason: AbortReason) {
        {
            let mut slot = self.abort.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                tracing::error!(reason = %reason, "Aborting sweep");
                *slot = Some(reason);
            }
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        self.abort
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Token observed by tasks between units of work
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Future that resolves once cancelled or aborted
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}
