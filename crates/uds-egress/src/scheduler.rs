//! Coalescing scheduler for reconciliation passes
//!
//! Only one pass runs at a time. A trigger that arrives while a pass is in
//! flight waits for it and returns early when its package was part of that
//! pass's snapshot; otherwise it loops and starts (or joins) the next pass.
//! A failed pass never blocks later triggers: waiters simply try again.
//!
//! ```text
//!   Idle ──trigger──▶ Running(rx) ──pass done──▶ Idle
//!                        ▲   │
//!          trigger waits ┘   └─ outcome broadcast on the watch channel
//! ```

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info};

use uds_common::Result;

use crate::types::PackageId;

/// Package ids a finished pass covered, or the message it failed with
type PassOutcome = std::result::Result<Arc<BTreeSet<PackageId>>, String>;

enum SchedulerState {
    Idle,
    Running(watch::Receiver<Option<PassOutcome>>),
}

enum Step {
    Wait(watch::Receiver<Option<PassOutcome>>),
    Drive(watch::Sender<Option<PassOutcome>>),
}

/// Serializes reconciliation passes and coalesces concurrent triggers
pub struct ReconciliationScheduler {
    state: Mutex<SchedulerState>,
    passes: AtomicU64,
}

impl Default for ReconciliationScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconciliationScheduler {
    /// Create an idle scheduler
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SchedulerState::Idle),
            passes: AtomicU64::new(0),
        }
    }

    /// Number of passes started so far
    pub fn passes_started(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    /// Whether a pass is currently running
    pub fn is_running(&self) -> bool {
        matches!(*self.lock(), SchedulerState::Running(_))
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make sure a pass that covers `pkg_id` completes
    ///
    /// `pass` returns the package ids it snapshotted before applying.
    /// The error of a pass is only returned to the trigger that drove it.
    pub async fn trigger<F, Fut>(&self, pkg_id: &str, pass: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<BTreeSet<PackageId>>>,
    {
        loop {
            let step = {
                let mut state = self.lock();
                match &*state {
                    SchedulerState::Running(rx) => Step::Wait(rx.clone()),
                    SchedulerState::Idle => {
                        let (tx, rx) = watch::channel(None);
                        *state = SchedulerState::Running(rx);
                        Step::Drive(tx)
                    }
                }
            };

            match step {
                Step::Drive(tx) => return self.drive(tx, pkg_id, &pass).await,
                Step::Wait(rx) => {
                    debug!(package = pkg_id, "reconciliation in progress, waiting");
                    match wait_for_outcome(rx).await {
                        Some(Ok(snapshot)) if snapshot.contains(pkg_id) => {
                            debug!(package = pkg_id, "covered by in-flight reconciliation");
                            return Ok(());
                        }
                        Some(Ok(_)) => {
                            debug!(package = pkg_id, "not in last reconciliation, scheduling another")
                        }
                        Some(Err(error)) => {
                            debug!(package = pkg_id, %error, "in-flight reconciliation failed, retrying")
                        }
                        None => debug!(package = pkg_id, "in-flight reconciliation was cancelled"),
                    }
                }
            }
        }
    }

    async fn drive<F, Fut>(
        &self,
        tx: watch::Sender<Option<PassOutcome>>,
        pkg_id: &str,
        pass: &F,
    ) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<BTreeSet<PackageId>>>,
    {
        let guard = PassGuard {
            scheduler: self,
            tx: Some(tx),
        };
        let number = self.passes.fetch_add(1, Ordering::SeqCst) + 1;
        info!(package = pkg_id, pass = number, "starting egress reconciliation");

        let result = pass().await;
        let outcome = match &result {
            Ok(snapshot) => Ok(Arc::new(snapshot.clone())),
            Err(e) => Err(e.to_string()),
        };
        guard.finish(outcome);

        result.map(|_| ())
    }
}

async fn wait_for_outcome(mut rx: watch::Receiver<Option<PassOutcome>>) -> Option<PassOutcome> {
    loop {
        let current = rx.borrow_and_update().clone();
        if let Some(outcome) = current {
            return Some(outcome);
        }
        if rx.changed().await.is_err() {
            return rx.borrow().clone();
        }
    }
}

/// Returns the scheduler to Idle however the driving future ends
struct PassGuard<'a> {
    scheduler: &'a ReconciliationScheduler,
    tx: Option<watch::Sender<Option<PassOutcome>>>,
}

impl PassGuard<'_> {
    /// Go Idle before waking waiters so a retrying waiter can start the next pass
    fn finish(mut self, outcome: PassOutcome) {
        *self.scheduler.lock() = SchedulerState::Idle;
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(outcome));
        }
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            *self.scheduler.lock() = SchedulerState::Idle;
        }
    }
}
