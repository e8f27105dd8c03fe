//! Partition writers and the factories that create them
//!
//! The host creates one [`PartitionWriter`] per output partition (and per
//! epoch when streaming), feeds it rows, and asks it for a final
//! [`PartitionMessage`]. `write` never returns an error: conversion and
//! store failures are recorded in the partition state and surface only in
//! the final message.

use crate::error::ErrorDetail;
use crate::options::WriteOptions;
use crate::store::DocumentStore;
use crate::value::Row;
use crate::write::batch::BatchAccumulator;
use crate::write::convert::RowConverter;
use crate::write::dispatch::{BatchDispatcher, Submission};
use crate::write::state::{PartitionSummary, WriteJobState};
use crate::write::strategy::InvocationStrategy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Result of handing one row to a writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Accepted,
    /// The partition is aborting; further rows are ignored
    Aborting,
}

/// Sent by a partition that finished normally.
///
/// In continue mode `failures` may be non-empty: the job still commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMessage {
    pub job_id: Uuid,
    pub partition: usize,
    pub epoch: Option<u64>,
    pub summary: PartitionSummary,
    pub failures: Vec<ErrorDetail>,
}

/// Sent by a partition that aborted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortMessage {
    pub job_id: Uuid,
    pub partition: usize,
    pub epoch: Option<u64>,
    pub summary: PartitionSummary,
    /// The failure that triggered the abort, if one was recorded
    pub cause: Option<ErrorDetail>,
    pub failures: Vec<ErrorDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionMessage {
    Commit(CommitMessage),
    Abort(AbortMessage),
}

impl PartitionMessage {
    pub fn partition(&self) -> usize {
        match self {
            PartitionMessage::Commit(m) => m.partition,
            PartitionMessage::Abort(m) => m.partition,
        }
    }

    pub fn epoch(&self) -> Option<u64> {
        match self {
            PartitionMessage::Commit(m) => m.epoch,
            PartitionMessage::Abort(m) => m.epoch,
        }
    }

    pub fn summary(&self) -> &PartitionSummary {
        match self {
            PartitionMessage::Commit(m) => &m.summary,
            PartitionMessage::Abort(m) => &m.summary,
        }
    }

    pub fn failures(&self) -> &[ErrorDetail] {
        match self {
            PartitionMessage::Commit(m) => &m.failures,
            PartitionMessage::Abort(m) => &m.failures,
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, PartitionMessage::Abort(_))
    }
}

/// Everything a writer needs, shared by all writers of one job
pub(crate) struct WriterContext<S: DocumentStore> {
    pub job_id: Uuid,
    pub store: Arc<S>,
    pub options: Arc<WriteOptions>,
    pub strategy: Arc<InvocationStrategy>,
}

impl<S: DocumentStore> Clone for WriterContext<S> {
    fn clone(&self) -> Self {
        WriterContext {
            job_id: self.job_id,
            store: Arc::clone(&self.store),
            options: Arc::clone(&self.options),
            strategy: Arc::clone(&self.strategy),
        }
    }
}

impl<S: DocumentStore> WriterContext<S> {
    fn writer(&self, partition: usize, epoch: Option<u64>) -> PartitionWriter<S> {
        let state = WriteJobState::new(partition, self.options.abort_on_failure);
        PartitionWriter {
            job_id: self.job_id,
            partition,
            epoch,
            converter: RowConverter::new(Arc::clone(&self.options)),
            accumulator: BatchAccumulator::new(partition, self.options.batch_size),
            dispatcher: BatchDispatcher::new(
                Arc::clone(&self.store),
                Arc::clone(&self.strategy),
                self.options.thread_count,
                state,
            ),
            rows_seen: 0,
        }
    }
}

/// Creates writers for a batch job
pub struct WriterFactory<S: DocumentStore> {
    context: WriterContext<S>,
}

impl<S: DocumentStore> WriterFactory<S> {
    pub(crate) fn new(context: WriterContext<S>) -> Self {
        WriterFactory { context }
    }

    pub fn create_writer(&self, partition: usize) -> PartitionWriter<S> {
        self.context.writer(partition, None)
    }
}

/// Creates writers for one streaming query; each micro-batch is an epoch
pub struct StreamingWriterFactory<S: DocumentStore> {
    context: WriterContext<S>,
}

impl<S: DocumentStore> StreamingWriterFactory<S> {
    pub(crate) fn new(context: WriterContext<S>) -> Self {
        StreamingWriterFactory { context }
    }

    pub fn create_writer(&self, partition: usize, epoch: u64) -> PartitionWriter<S> {
        self.context.writer(partition, Some(epoch))
    }
}

/// Converts, batches and dispatches the rows of one partition
pub struct PartitionWriter<S: DocumentStore> {
    job_id: Uuid,
    partition: usize,
    epoch: Option<u64>,
    converter: RowConverter,
    accumulator: BatchAccumulator,
    dispatcher: BatchDispatcher<S>,
    rows_seen: u64,
}

impl<S: DocumentStore> PartitionWriter<S> {
    pub fn partition(&self) -> usize {
        self.partition
    }

    pub fn epoch(&self) -> Option<u64> {
        self.epoch
    }

    pub fn rows_seen(&self) -> u64 {
        self.rows_seen
    }

    pub async fn write(&mut self, row: &Row) -> WriteStatus {
        self.rows_seen += 1;
        if self.dispatcher.is_aborting() {
            return WriteStatus::Aborting;
        }
        match self.converter.convert(row) {
            Ok(item) => {
                if let Some(batch) = self.accumulator.push(item) {
                    if self.dispatcher.submit(batch).await == Submission::Rejected {
                        return WriteStatus::Aborting;
                    }
                }
            }
            Err(e) => {
                let mut failure = ErrorDetail::conversion(&e);
                failure.item = Some(format!("row {}", self.rows_seen));
                self.dispatcher.record_conversion_failure(failure);
            }
        }
        if self.dispatcher.is_aborting() {
            WriteStatus::Aborting
        } else {
            WriteStatus::Accepted
        }
    }

    /// Flush the last batch, drain in-flight work and report.
    ///
    /// Returns an abort message if the partition aborted along the way.
    pub async fn commit(mut self) -> PartitionMessage {
        if !self.dispatcher.is_aborting() {
            if let Some(batch) = self.accumulator.finish() {
                self.dispatcher.submit(batch).await;
            }
        }
        self.finalize(false).await
    }

    /// Abort requested by the host: drop pending items and drain
    pub async fn abort(self) -> PartitionMessage {
        self.finalize(true).await
    }

    async fn finalize(mut self, host_abort: bool) -> PartitionMessage {
        let dropped = self.accumulator.discard();
        if dropped > 0 {
            tracing::debug!(partition = self.partition, dropped, "pending_items_discarded");
        }
        let state = self.dispatcher.finish().await;
        let aborted = host_abort || state.is_aborting();
        let cause = state.first_failure().cloned();
        let (summary, failures) = state.into_parts();

        if aborted {
            tracing::warn!(
                partition = self.partition,
                epoch = ?self.epoch,
                host_abort,
                batches_failed = summary.batches_failed,
                "partition_aborted"
            );
            PartitionMessage::Abort(AbortMessage {
                job_id: self.job_id,
                partition: self.partition,
                epoch: self.epoch,
                summary,
                cause,
                failures,
            })
        } else {
            tracing::debug!(
                partition = self.partition,
                epoch = ?self.epoch,
                rows = self.rows_seen,
                items_written = summary.items_written,
                items_failed = summary.items_failed,
                "partition_committed"
            );
            PartitionMessage::Commit(CommitMessage {
                job_id: self.job_id,
                partition: self.partition,
                epoch: self.epoch,
                summary,
                failures,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriteDefaults;
    use crate::options::{self, OptionMap};
    use crate::store::MemoryStore;
    use crate::value::{DataType, Field, Schema, Value};

    fn context(store: Arc<MemoryStore>, pairs: &[(&str, &str)]) -> WriterContext<MemoryStore> {
        let map: OptionMap = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let options = WriteOptions::parse(&map, &WriteDefaults::default()).unwrap();
        let strategy = InvocationStrategy::resolve(&options).unwrap();
        WriterContext {
            job_id: Uuid::new_v4(),
            store,
            options: Arc::new(options),
            strategy: Arc::new(strategy),
        }
    }

    fn uri_rows(uris: &[&str]) -> Vec<Row> {
        let schema = Schema::new(vec![Field::nullable("URI", DataType::String)]).into_shared();
        uris.iter()
            .map(|uri| Row::new(schema.clone(), vec![Value::from(*uri)]).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_writer_commits_and_flushes_final_batch() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(
            store.clone(),
            &[(options::URI_COLUMN, "URI"), (options::BATCH_SIZE, "2")],
        );
        let mut writer = WriterFactory::new(ctx).create_writer(3);
        for row in uri_rows(&["/a.json", "/b.json", "/c.json"]) {
            assert_eq!(writer.write(&row).await, WriteStatus::Accepted);
        }
        let message = writer.commit().await;
        assert!(!message.is_abort());
        assert_eq!(message.partition(), 3);
        assert_eq!(message.summary().batches_succeeded, 2);
        assert_eq!(store.document_count(), 3);
    }

    #[tokio::test]
    async fn test_conversion_failure_in_continue_mode_commits() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(
            store.clone(),
            &[(options::URI_COLUMN, "URI"), (options::ABORT_ON_FAILURE, "false")],
        );
        let schema = Schema::new(vec![Field::nullable("URI", DataType::String)]).into_shared();
        let null_uri = Row::new(schema, vec![Value::Null]).unwrap();
        let mut writer = WriterFactory::new(ctx).create_writer(0);
        writer.write(&null_uri).await;
        for row in uri_rows(&["/a.json"]) {
            writer.write(&row).await;
        }
        let message = writer.commit().await;
        assert!(!message.is_abort());
        assert_eq!(message.summary().conversion_failures, 1);
        assert_eq!(message.failures()[0].item.as_deref(), Some("row 1"));
        assert_eq!(store.document_count(), 1);
    }

    #[tokio::test]
    async fn test_conversion_failure_in_abort_mode_aborts() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone(), &[(options::URI_COLUMN, "URI")]);
        let schema = Schema::new(vec![Field::nullable("URI", DataType::String)]).into_shared();
        let null_uri = Row::new(schema, vec![Value::Null]).unwrap();
        let mut writer = WriterFactory::new(ctx).create_writer(0);
        assert_eq!(writer.write(&null_uri).await, WriteStatus::Aborting);
        let message = writer.commit().await;
        let PartitionMessage::Abort(abort) = message else {
            panic!("expected abort message");
        };
        assert!(abort.cause.unwrap().message.contains("URI column 'URI' is null"));
        assert_eq!(store.document_count(), 0);
    }

    #[tokio::test]
    async fn test_host_abort_discards_pending_items() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(
            store.clone(),
            &[(options::URI_COLUMN, "URI"), (options::BATCH_SIZE, "10")],
        );
        let mut writer = StreamingWriterFactory::new(ctx).create_writer(1, 7);
        for row in uri_rows(&["/a.json", "/b.json"]) {
            writer.write(&row).await;
        }
        let message = writer.abort().await;
        assert!(message.is_abort());
        assert_eq!(message.epoch(), Some(7));
        assert_eq!(store.document_count(), 0);
    }
}
