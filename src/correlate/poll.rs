//! Window resolver — bounded polling for a just-launched application.
//!
//! The launch signal fires when the process starts, usually before the
//! window manager has mapped any window for it. [`WindowResolver`] bridges
//! that gap by asking the runtime lookup again every `interval`, up to
//! `max_attempts` times. Each check runs on the blocking pool, since
//! lookups talk to the window system synchronously.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::resolver::{AppQuery, RuntimeLookup};

/// Retry budget for one resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay before the first check and between checks.
    pub interval: Duration,
    /// Number of checks before giving up. Must be at least 1.
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            max_attempts: 10,
        }
    }
}

/// Terminal result of one resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// At least one window was observed. `windows` is never empty.
    Resolved {
        pids: BTreeSet<u32>,
        windows: BTreeSet<u64>,
    },
    /// No window appeared within the budget.
    TimedOut,
}

/// A resolution in progress.
///
/// Awaiting [`outcome`](Self::outcome) yields the result exactly once.
/// Cancelling through [`cancel_handle`](Self::cancel_handle) stops the
/// timer; the outcome is then `None`.
pub struct PendingResolution {
    task: JoinHandle<Option<ResolutionOutcome>>,
    cancel: CancellationToken,
}

impl PendingResolution {
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the resolution. `None` if it was cancelled.
    pub async fn outcome(self) -> Option<ResolutionOutcome> {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!(error = %e, "resolution task ended abnormally");
                None
            }
        }
    }
}

/// Polls a [`RuntimeLookup`] until an application shows a window.
#[derive(Clone)]
pub struct WindowResolver {
    lookup: Arc<dyn RuntimeLookup>,
    policy: PollPolicy,
}

impl WindowResolver {
    pub fn new(lookup: Arc<dyn RuntimeLookup>, policy: PollPolicy) -> Self {
        Self { lookup, policy }
    }

    /// Start resolving `query`. Every call is independent: resolving an
    /// app that already has a pending resolution starts a second one.
    ///
    /// `cancel` stops this resolution when cancelled; pass a child of a
    /// shutdown token to tie it to a lifecycle.
    pub fn resolve(&self, query: AppQuery, cancel: CancellationToken) -> PendingResolution {
        let task = tokio::spawn(poll_runtime(
            Arc::clone(&self.lookup),
            query,
            self.policy,
            cancel.clone(),
        ));
        PendingResolution { task, cancel }
    }
}

async fn poll_runtime(
    lookup: Arc<dyn RuntimeLookup>,
    query: AppQuery,
    policy: PollPolicy,
    cancel: CancellationToken,
) -> Option<ResolutionOutcome> {
    let mut ticker = tokio::time::interval_at(Instant::now() + policy.interval, policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    for attempt in 1..=policy.max_attempts {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(app_id = %query.id, attempt, "resolution cancelled");
                return None;
            }
            _ = ticker.tick() => {}
        }

        let check = tokio::task::spawn_blocking({
            let lookup = Arc::clone(&lookup);
            let query = query.clone();
            move || lookup.lookup(&query)
        });
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(app_id = %query.id, attempt, "resolution cancelled during lookup");
                return None;
            }
            result = check => result,
        };

        match result {
            Ok(Ok(Some(runtime))) if !runtime.windows.is_empty() => {
                tracing::debug!(
                    app_id = %query.id,
                    attempt,
                    windows = runtime.windows.len(),
                    "application windows found"
                );
                return Some(ResolutionOutcome::Resolved {
                    pids: runtime.pids,
                    windows: runtime.windows,
                });
            }
            Ok(Ok(_)) => tracing::trace!(app_id = %query.id, attempt, "no windows yet"),
            Ok(Err(e)) => {
                tracing::warn!(app_id = %query.id, attempt, error = %e, "runtime lookup failed")
            }
            Err(e) => {
                tracing::warn!(app_id = %query.id, attempt, error = %e, "runtime lookup panicked")
            }
        }
    }

    Some(ResolutionOutcome::TimedOut)
}
