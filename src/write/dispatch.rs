//! Concurrent batch dispatch
//!
//! Each partition owns one [`BatchDispatcher`]. Sealed batches become tokio
//! tasks gated by a semaphore of `thread-count` permits, so at most that
//! many store calls from this partition are in flight at once.
//!
//! ## Phases
//!
//! ```text
//! Open ──submit──► Dispatching ──finish──► Finalized
//!                      │                       ▲
//!                      └─failure + abort──► Aborting ──drain──┘
//! ```
//!
//! In abort mode the task whose batch failed raises the partition's
//! [`AbortSignal`] before releasing its permit. The dispatcher checks the
//! signal before and after waiting for a permit, so nothing is submitted
//! once the failure is observed. Tasks already running are drained, never
//! cancelled: a store call in flight may not be safely revocable.

use crate::error::{ErrorDetail, FailureKind};
use crate::store::DocumentStore;
use crate::write::batch::SealedBatch;
use crate::write::state::{DispatchOutcome, WriteJobState};
use crate::write::strategy::InvocationStrategy;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

pub use crate::write::state::AbortSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    /// Nothing submitted yet
    Open,
    Dispatching,
    /// A failure was observed in abort mode; only draining remains
    Aborting,
    Finalized,
}

/// Whether a batch was handed to a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Dispatched,
    /// The partition is aborting; the batch was dropped
    Rejected,
}

pub struct BatchDispatcher<S: DocumentStore> {
    store: Arc<S>,
    strategy: Arc<InvocationStrategy>,
    permits: Arc<Semaphore>,
    tasks: JoinSet<DispatchOutcome>,
    state: WriteJobState,
    phase: DispatchPhase,
    submitted: u64,
}

impl<S: DocumentStore> BatchDispatcher<S> {
    pub fn new(
        store: Arc<S>,
        strategy: Arc<InvocationStrategy>,
        thread_count: usize,
        state: WriteJobState,
    ) -> Self {
        BatchDispatcher {
            store,
            strategy,
            permits: Arc::new(Semaphore::new(thread_count.max(1))),
            tasks: JoinSet::new(),
            state,
            phase: DispatchPhase::Open,
            submitted: 0,
        }
    }

    pub fn phase(&self) -> DispatchPhase {
        self.phase
    }

    pub fn state(&self) -> &WriteJobState {
        &self.state
    }

    /// Batches handed to tasks so far
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// True once a failure in abort mode has been observed
    pub fn is_aborting(&mut self) -> bool {
        self.observe_abort();
        self.phase == DispatchPhase::Aborting
    }

    /// Submit a sealed batch, waiting for a free permit
    pub async fn submit(&mut self, batch: SealedBatch) -> Submission {
        self.reap_finished();
        if self.reject_if_aborting(&batch) {
            return Submission::Rejected;
        }

        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                // The semaphore is never closed while the dispatcher is alive
                self.state.record_skipped_batch();
                return Submission::Rejected;
            }
        };
        // A task may have failed while this call waited for its permit
        if self.reject_if_aborting(&batch) {
            return Submission::Rejected;
        }

        let store = Arc::clone(&self.store);
        let strategy = Arc::clone(&self.strategy);
        let signal = self.state.abort_signal().clone();
        let abort_on_failure = self.state.abort_on_failure();
        let partition = self.state.partition();
        let batch_id = batch.id();
        let items = batch.len();

        self.tasks.spawn(async move {
            let outcome = strategy.execute(&batch, store.as_ref(), abort_on_failure).await;
            if !outcome.success && abort_on_failure && signal.raise() {
                tracing::debug!(partition, batch_id, "abort_signal_raised");
            }
            drop(permit);
            outcome
        });

        self.submitted += 1;
        self.phase = DispatchPhase::Dispatching;
        tracing::debug!(
            partition,
            batch_id,
            items,
            strategy = self.strategy.name(),
            "batch_dispatched"
        );
        Submission::Dispatched
    }

    /// Record a row that failed conversion before reaching a batch
    pub fn record_conversion_failure(&mut self, failure: ErrorDetail) {
        tracing::warn!(
            partition = self.state.partition(),
            error = %failure,
            "row_conversion_failed"
        );
        self.state.record_conversion_failure(failure);
        if self.state.abort_on_failure() {
            self.state.abort_signal().raise();
            self.observe_abort();
        }
    }

    /// Wait for every in-flight task and hand back the final state
    pub async fn finish(mut self) -> WriteJobState {
        while let Some(result) = self.tasks.join_next().await {
            self.record(result);
        }
        self.observe_abort();
        self.phase = DispatchPhase::Finalized;
        let summary = self.state.summary();
        tracing::debug!(
            partition = summary.partition,
            batches_succeeded = summary.batches_succeeded,
            batches_failed = summary.batches_failed,
            batches_skipped = summary.batches_skipped,
            "partition_drained"
        );
        self.state
    }

    fn reject_if_aborting(&mut self, batch: &SealedBatch) -> bool {
        if !self.is_aborting() {
            return false;
        }
        self.state.record_skipped_batch();
        tracing::debug!(
            partition = self.state.partition(),
            batch_id = batch.id(),
            "batch_skipped"
        );
        true
    }

    fn reap_finished(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            self.record(result);
        }
    }

    fn record(&mut self, result: Result<DispatchOutcome, JoinError>) {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                // A panicking task counts as a failed batch of unknown size
                if self.state.abort_on_failure() {
                    self.state.abort_signal().raise();
                }
                DispatchOutcome::failed(
                    u64::MAX,
                    ErrorDetail {
                        kind: FailureKind::RemoteExecution,
                        message: format!("dispatch task failed: {e}"),
                        batch_id: None,
                        item: None,
                    },
                    0,
                    0,
                )
            }
        };
        if let Some(failure) = &outcome.failure {
            tracing::warn!(
                partition = self.state.partition(),
                batch_id = outcome.batch_id,
                items_failed = outcome.items_failed,
                error = %failure,
                "batch_failed"
            );
        }
        self.state.record_outcome(outcome);
        self.observe_abort();
    }

    fn observe_abort(&mut self) {
        if self.state.is_aborting()
            && matches!(self.phase, DispatchPhase::Open | DispatchPhase::Dispatching)
        {
            self.phase = DispatchPhase::Aborting;
            tracing::warn!(
                partition = self.state.partition(),
                in_flight = self.tasks.len(),
                "partition_aborting"
            );
        }
    }
}
