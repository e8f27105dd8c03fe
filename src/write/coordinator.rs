//! Write job coordination
//!
//! [`DocumentWrite`] is the driver side of the two-phase write protocol:
//!
//! ```text
//! DocumentWrite::create_batch_writer_factory()
//!     └─► PartitionWriter per partition ──► PartitionMessage
//! DocumentWrite::commit(messages) | DocumentWrite::abort(messages)
//! ```
//!
//! Commit is all or nothing: a single abort message aborts the job. In
//! continue mode partitions commit despite failures, so the job succeeds and
//! the failures are only logged. That trade-off is intended.

use crate::config::WriteDefaults;
use crate::error::{ConfigurationError, ErrorDetail, WriteError};
use crate::options::{OptionMap, WriteOptions};
use crate::store::DocumentStore;
use crate::write::state::PartitionSummary;
use crate::write::strategy::InvocationStrategy;
use crate::write::writer::{PartitionMessage, StreamingWriterFactory, WriterContext, WriterFactory};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Totals over all partitions of a committed job or epoch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub epoch: Option<u64>,
    pub partitions: usize,
    pub batches_succeeded: u64,
    pub batches_failed: u64,
    pub items_written: u64,
    pub items_failed: u64,
    /// Failure details collected from every partition
    pub failures: Vec<ErrorDetail>,
}

impl JobSummary {
    fn from_messages(job_id: Uuid, epoch: Option<u64>, messages: &[PartitionMessage]) -> Self {
        let mut summary = JobSummary {
            job_id,
            epoch,
            partitions: messages.len(),
            batches_succeeded: 0,
            batches_failed: 0,
            items_written: 0,
            items_failed: 0,
            failures: Vec::new(),
        };
        for message in messages {
            let PartitionSummary {
                batches_succeeded,
                batches_failed,
                items_written,
                items_failed,
                ..
            } = *message.summary();
            summary.batches_succeeded += batches_succeeded;
            summary.batches_failed += batches_failed;
            summary.items_written += items_written;
            summary.items_failed += items_failed;
            summary.failures.extend(message.failures().iter().cloned());
        }
        summary
    }

    /// Committed, but some items were not written
    pub fn has_failures(&self) -> bool {
        self.items_failed > 0 || self.batches_failed > 0
    }
}

/// A configured write job against one store
pub struct DocumentWrite<S: DocumentStore> {
    context: WriterContext<S>,
}

impl<S: DocumentStore> DocumentWrite<S> {
    /// Validate options and resolve the invocation strategy
    pub fn new(store: Arc<S>, options: WriteOptions) -> Result<Self, ConfigurationError> {
        let strategy = InvocationStrategy::resolve(&options)?;
        let job_id = Uuid::new_v4();
        tracing::info!(
            job_id = %job_id,
            strategy = strategy.name(),
            batch_size = options.batch_size,
            thread_count = options.thread_count,
            abort_on_failure = options.abort_on_failure,
            "write_job_planned"
        );
        Ok(DocumentWrite {
            context: WriterContext {
                job_id,
                store,
                options: Arc::new(options),
                strategy: Arc::new(strategy),
            },
        })
    }

    /// Parse raw connector options over process defaults
    pub fn from_options(
        store: Arc<S>,
        options: &OptionMap,
        defaults: &WriteDefaults,
    ) -> Result<Self, ConfigurationError> {
        Self::new(store, WriteOptions::parse(options, defaults)?)
    }

    pub fn job_id(&self) -> Uuid {
        self.context.job_id
    }

    pub fn options(&self) -> &WriteOptions {
        &self.context.options
    }

    pub fn strategy(&self) -> &InvocationStrategy {
        &self.context.strategy
    }

    pub fn create_batch_writer_factory(&self) -> WriterFactory<S> {
        WriterFactory::new(self.context.clone())
    }

    pub fn create_streaming_writer_factory(&self) -> StreamingWriterFactory<S> {
        StreamingWriterFactory::new(self.context.clone())
    }

    /// Driver commit. Fails if any partition sent an abort message.
    pub fn commit(&self, messages: &[PartitionMessage]) -> Result<JobSummary, WriteError> {
        if messages.iter().any(PartitionMessage::is_abort) {
            return Err(self.abort(messages));
        }
        let summary = JobSummary::from_messages(self.job_id(), None, messages);
        self.log_commit(&summary);
        Ok(summary)
    }

    /// Driver abort: the whole job fails with one representative message
    pub fn abort(&self, messages: &[PartitionMessage]) -> WriteError {
        let aborted_partitions = messages.iter().filter(|m| m.is_abort()).count();
        let message = representative_failure(messages);
        tracing::error!(
            job_id = %self.job_id(),
            partitions = messages.len(),
            aborted_partitions,
            error = %message,
            "write_job_aborted"
        );
        WriteError::JobAborted {
            aborted_partitions,
            message,
        }
    }

    /// Commit one streaming epoch
    pub fn commit_epoch(&self, epoch: u64, messages: &[PartitionMessage]) -> Result<JobSummary, WriteError> {
        self.check_epoch(epoch, messages);
        if messages.iter().any(PartitionMessage::is_abort) {
            return Err(self.abort_epoch(epoch, messages));
        }
        let summary = JobSummary::from_messages(self.job_id(), Some(epoch), messages);
        self.log_commit(&summary);
        Ok(summary)
    }

    /// Abort one streaming epoch
    pub fn abort_epoch(&self, epoch: u64, messages: &[PartitionMessage]) -> WriteError {
        self.check_epoch(epoch, messages);
        let message = representative_failure(messages);
        tracing::error!(
            job_id = %self.job_id(),
            epoch,
            aborted_partitions = messages.iter().filter(|m| m.is_abort()).count(),
            error = %message,
            "write_epoch_aborted"
        );
        WriteError::EpochAborted { epoch, message }
    }

    /// Commit when every partition committed, abort otherwise
    pub fn finalize(&self, messages: Vec<PartitionMessage>) -> Result<JobSummary, WriteError> {
        self.commit(&messages)
    }

    fn check_epoch(&self, epoch: u64, messages: &[PartitionMessage]) {
        for message in messages.iter().filter(|m| m.epoch() != Some(epoch)) {
            tracing::warn!(
                partition = message.partition(),
                expected = epoch,
                found = ?message.epoch(),
                "partition_message_epoch_mismatch"
            );
        }
    }

    fn log_commit(&self, summary: &JobSummary) {
        if summary.has_failures() {
            tracing::warn!(
                job_id = %summary.job_id,
                epoch = ?summary.epoch,
                items_written = summary.items_written,
                items_failed = summary.items_failed,
                batches_failed = summary.batches_failed,
                "write_job_committed_with_failures"
            );
        } else {
            tracing::info!(
                job_id = %summary.job_id,
                epoch = ?summary.epoch,
                items_written = summary.items_written,
                batches = summary.batches_succeeded,
                "write_job_committed"
            );
        }
    }
}

/// Cause of the lowest-numbered aborted partition, else any recorded failure
fn representative_failure(messages: &[PartitionMessage]) -> String {
    let mut aborted: Vec<_> = messages
        .iter()
        .filter_map(|m| match m {
            PartitionMessage::Abort(abort) => Some(abort),
            PartitionMessage::Commit(_) => None,
        })
        .collect();
    aborted.sort_by_key(|abort| abort.partition);

    aborted
        .iter()
        .find_map(|abort| abort.cause.as_ref())
        .or_else(|| messages.iter().find_map(|m| m.failures().first()))
        .map_or_else(
            || "aborted by the host engine".to_string(),
            ToString::to_string,
        )
}
