//! Local job driver
//!
//! Stands in for the host engine's scheduler: splits rows into contiguous
//! partitions, runs one partition writer per partition on its own task,
//! collects their messages and commits or aborts the job as a whole.

use crate::error::WriteError;
use crate::store::DocumentStore;
use crate::value::Row;
use crate::write::{DocumentWrite, JobSummary, PartitionMessage, PartitionWriter, WriteStatus};
use std::collections::HashMap;
use tokio::task::JoinSet;

pub struct LocalJob<S: DocumentStore> {
    write: DocumentWrite<S>,
    partitions: usize,
}

impl<S: DocumentStore> LocalJob<S> {
    /// A job over `partitions` partitions (at least one)
    pub fn new(write: DocumentWrite<S>, partitions: usize) -> Self {
        LocalJob {
            write,
            partitions: partitions.max(1),
        }
    }

    pub fn write(&self) -> &DocumentWrite<S> {
        &self.write
    }

    /// Run a batch job over `rows`
    pub async fn run(&self, rows: Vec<Row>) -> Result<JobSummary, WriteError> {
        let factory = self.write.create_batch_writer_factory();
        let writers = split(rows, self.partitions)
            .into_iter()
            .enumerate()
            .map(|(partition, rows)| (factory.create_writer(partition), rows))
            .collect();
        let messages = run_partitions(writers).await?;
        self.write.finalize(messages)
    }

    /// Run one streaming micro-batch
    pub async fn run_epoch(&self, epoch: u64, rows: Vec<Row>) -> Result<JobSummary, WriteError> {
        let factory = self.write.create_streaming_writer_factory();
        let writers = split(rows, self.partitions)
            .into_iter()
            .enumerate()
            .map(|(partition, rows)| (factory.create_writer(partition, epoch), rows))
            .collect();
        let messages = run_partitions(writers).await?;
        self.write.commit_epoch(epoch, &messages)
    }
}

async fn run_partitions<S: DocumentStore>(
    writers: Vec<(PartitionWriter<S>, Vec<Row>)>,
) -> Result<Vec<PartitionMessage>, WriteError> {
    let mut tasks = JoinSet::new();
    let mut partitions = HashMap::new();
    for (mut writer, rows) in writers {
        let partition = writer.partition();
        let handle = tasks.spawn(async move {
            for row in &rows {
                if writer.write(row).await == WriteStatus::Aborting {
                    break;
                }
            }
            writer.commit().await
        });
        partitions.insert(handle.id(), partition);
    }

    let mut messages = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(message) => messages.push(message),
            Err(e) => {
                tasks.abort_all();
                return Err(WriteError::PartitionFailed {
                    partition: partitions.get(&e.id()).copied().unwrap_or_default(),
                    message: e.to_string(),
                });
            }
        }
    }
    messages.sort_by_key(PartitionMessage::partition);
    Ok(messages)
}

/// Contiguous chunks, so arrival order holds within each partition
fn split(rows: Vec<Row>, partitions: usize) -> Vec<Vec<Row>> {
    if rows.is_empty() {
        return vec![Vec::new()];
    }
    let chunk = rows.len().div_ceil(partitions);
    let mut out = Vec::with_capacity(partitions);
    let mut rows = rows.into_iter();
    loop {
        let part: Vec<Row> = rows.by_ref().take(chunk).collect();
        if part.is_empty() {
            break;
        }
        out.push(part);
    }
    out
}
