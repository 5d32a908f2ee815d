//! Cancellation and deadlines
//!
//! Every suspension point (RPC dispatch, poll sleep) races against both a
//! [`CancellationToken`] and a [`Deadline`].

use crate::error::ProviderError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Cloneable cancel signal shared between a caller and the work it started
#[derive(Debug, Clone)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signal every clone; idempotent
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            // The sender lives as long as `self`, so this only fails on shutdown
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Point in (tokio) time after which an action gives up
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    /// Deadline `budget` from now
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub fn at(&self) -> Instant {
        self.at
    }

    /// Total time granted when the deadline was set
    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }
}

/// Why a guarded future did not finish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Cancelled,
    DeadlineElapsed,
}

impl Interrupted {
    /// Turn the interruption into the error the caller reports
    pub fn into_error(
        self,
        action: &str,
        operation_id: Option<&str>,
        deadline: &Deadline,
    ) -> ProviderError {
        let operation_id = operation_id.map(|s| s.to_string());
        match self {
            Interrupted::Cancelled => ProviderError::Cancelled {
                action: action.to_string(),
                operation_id,
            },
            Interrupted::DeadlineElapsed => ProviderError::Timeout {
                action: action.to_string(),
                operation_id,
                after: deadline.budget(),
            },
        }
    }
}

/// Run `work` unless the token fires or the deadline passes first
///
/// Cancellation wins over the deadline, and both win over a ready result,
/// so an expired call never reports success.
pub async fn guard<F: Future>(
    work: F,
    deadline: &Deadline,
    cancel: &CancellationToken,
) -> Result<F::Output, Interrupted> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupted::Cancelled),
        _ = tokio::time::sleep_until(deadline.at()) => Err(Interrupted::DeadlineElapsed),
        output = work => Ok(output),
    }
}
