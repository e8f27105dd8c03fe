//! Per-partition write state
//!
//! Every partition writer owns one [`WriteJobState`]: the abort policy, the
//! failure counters and the abort signal shared with its in-flight tasks.
//! It is created with the writer and consumed when the writer produces its
//! final message; nothing is shared between partitions.

use crate::error::ErrorDetail;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Failure details kept per partition; counters keep counting past this
const MAX_RECORDED_FAILURES: usize = 100;

/// Abort flag shared by a partition's dispatcher and its tasks.
///
/// Raising it only stops new submissions; tasks already running finish.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    raised: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal; returns true if this call raised it
    pub fn raise(&self) -> bool {
        !self.raised.swap(true, Ordering::AcqRel)
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}

/// Result of dispatching one sealed batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub batch_id: u64,
    pub success: bool,
    /// First failure inside the batch
    pub failure: Option<ErrorDetail>,
    /// Items the store accepted
    pub items_affected: usize,
    /// Items the store rejected, plus items left unsent after an aborting
    /// failure
    pub items_failed: usize,
}

impl DispatchOutcome {
    pub fn succeeded(batch_id: u64, items_affected: usize) -> Self {
        DispatchOutcome {
            batch_id,
            success: true,
            failure: None,
            items_affected,
            items_failed: 0,
        }
    }

    pub fn failed(batch_id: u64, failure: ErrorDetail, items_affected: usize, items_failed: usize) -> Self {
        DispatchOutcome {
            batch_id,
            success: false,
            failure: Some(failure),
            items_affected,
            items_failed,
        }
    }
}

/// Counters reported in a partition's final message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSummary {
    pub partition: usize,
    pub batches_succeeded: u64,
    pub batches_failed: u64,
    pub items_written: u64,
    pub items_failed: u64,
    /// Rows rejected before batching
    pub conversion_failures: u64,
    /// Sealed batches never submitted because the partition was aborting
    pub batches_skipped: u64,
}

#[derive(Debug)]
pub struct WriteJobState {
    partition: usize,
    abort_on_failure: bool,
    abort: AbortSignal,
    summary: PartitionSummary,
    failures: Vec<ErrorDetail>,
}

impl WriteJobState {
    pub fn new(partition: usize, abort_on_failure: bool) -> Self {
        WriteJobState {
            partition,
            abort_on_failure,
            abort: AbortSignal::new(),
            summary: PartitionSummary {
                partition,
                ..PartitionSummary::default()
            },
            failures: Vec::new(),
        }
    }

    pub fn partition(&self) -> usize {
        self.partition
    }

    pub fn abort_on_failure(&self) -> bool {
        self.abort_on_failure
    }

    pub fn abort_signal(&self) -> &AbortSignal {
        &self.abort
    }

    pub fn is_aborting(&self) -> bool {
        self.abort.is_raised()
    }

    pub fn record_outcome(&mut self, outcome: DispatchOutcome) {
        self.summary.items_written += outcome.items_affected as u64;
        self.summary.items_failed += outcome.items_failed as u64;
        if outcome.success {
            self.summary.batches_succeeded += 1;
        } else {
            self.summary.batches_failed += 1;
        }
        if let Some(failure) = outcome.failure {
            self.push_failure(failure);
        }
    }

    pub fn record_conversion_failure(&mut self, failure: ErrorDetail) {
        self.summary.conversion_failures += 1;
        self.summary.items_failed += 1;
        self.push_failure(failure);
    }

    pub fn record_skipped_batch(&mut self) {
        self.summary.batches_skipped += 1;
    }

    fn push_failure(&mut self, failure: ErrorDetail) {
        if self.failures.len() < MAX_RECORDED_FAILURES {
            self.failures.push(failure);
        }
    }

    pub fn has_failures(&self) -> bool {
        self.summary.batches_failed > 0 || self.summary.conversion_failures > 0
    }

    /// Failure in the order outcomes were recorded
    pub fn first_failure(&self) -> Option<&ErrorDetail> {
        self.failures.first()
    }

    pub fn failures(&self) -> &[ErrorDetail] {
        &self.failures
    }

    pub fn summary(&self) -> PartitionSummary {
        self.summary
    }

    pub fn into_parts(self) -> (PartitionSummary, Vec<ErrorDetail>) {
        (self.summary, self.failures)
    }
}
