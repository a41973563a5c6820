//! Per-partition copy loop: page through one partition, buffer records into
//! chunks and hand each full chunk to the destination.

use std::sync::Arc;
use std::time::Instant;

use ferry_core::{
    BatchWriter, CopyError, PagedReader, Partition, PartitionResult, PartitionStatus, Record,
    SourceReader,
};
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::metrics::WorkerMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Reading,
    Writing,
    Completed,
    Failed,
}

/// Copies exactly one partition. Owns its chunk buffer; shares nothing
/// mutable with other workers.
pub struct PartitionWorker {
    partition: Partition,
    source: Arc<dyn SourceReader>,
    destination: Arc<dyn BatchWriter>,
    fetch_page_size: usize,
    chunk_size: usize,
    metrics: WorkerMetrics,
    shutdown: watch::Receiver<bool>,
    state: WorkerState,
    records_read: u64,
    records_written: u64,
    chunks_written: u64,
}

impl PartitionWorker {
    pub fn new(
        partition: Partition,
        source: Arc<dyn SourceReader>,
        destination: Arc<dyn BatchWriter>,
        fetch_page_size: usize,
        chunk_size: usize,
        metrics: WorkerMetrics,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            partition,
            source,
            destination,
            fetch_page_size,
            chunk_size: chunk_size.max(1),
            metrics,
            shutdown,
            state: WorkerState::Idle,
            records_read: 0,
            records_written: 0,
            chunks_written: 0,
        }
    }

    /// Drive the partition to completion or failure. Never panics on I/O
    /// errors; they are recorded in the returned result.
    pub async fn run(mut self) -> PartitionResult {
        let index = self.partition.index;

        if *self.shutdown.borrow() {
            info!("Partition {} cancelled before start", index);
            self.metrics.finished("cancelled");
            return PartitionResult::not_started(
                index,
                CopyError::Cancelled("shutdown requested before partition started".to_string()),
            );
        }

        let started = Instant::now();
        self.metrics.active_partitions.inc();
        info!("Partition {} started: keys {}", index, self.partition);

        let outcome = self.copy().await;
        self.metrics.active_partitions.dec();

        let status = match outcome {
            Ok(()) => {
                self.state = WorkerState::Completed;
                self.metrics.finished("success");
                info!(
                    "Partition {} completed: {} read, {} written in {} chunks",
                    index, self.records_read, self.records_written, self.chunks_written
                );
                PartitionStatus::Success
            }
            Err(e) => {
                let failed_while = self.state;
                self.state = WorkerState::Failed;
                self.metrics.finished("failed");
                warn!(
                    "Partition {} failed while {:?} after {} records written: {}",
                    index, failed_while, self.records_written, e
                );
                PartitionStatus::Failed(e)
            }
        };

        PartitionResult {
            partition_index: index,
            records_read: self.records_read,
            records_written: self.records_written,
            chunks_written: self.chunks_written,
            elapsed_ms: started.elapsed().as_millis() as u64,
            status,
        }
    }

    async fn copy(&mut self) -> Result<(), CopyError> {
        let mut records = PagedReader::new(
            Arc::clone(&self.source),
            self.partition,
            self.fetch_page_size,
        )
        .open();
        let mut chunk: Vec<Record> = Vec::with_capacity(self.chunk_size);

        self.state = WorkerState::Reading;
        while let Some(record) = records.next().await {
            chunk.push(record?);
            self.records_read += 1;
            self.metrics.records_read.inc();

            if chunk.len() >= self.chunk_size {
                self.flush(&mut chunk).await?;
                self.state = WorkerState::Reading;
            }
        }

        if !chunk.is_empty() {
            self.flush(&mut chunk).await?;
        }
        Ok(())
    }

    async fn flush(&mut self, chunk: &mut Vec<Record>) -> Result<(), CopyError> {
        self.state = WorkerState::Writing;
        let written = self.destination.write_chunk(chunk).await?;

        self.records_written += written;
        self.chunks_written += 1;
        self.metrics.records_written.inc_by(written);
        self.metrics.chunks_written.inc();
        debug!(
            "Partition {}: chunk {} committed ({} rows)",
            self.partition.index, self.chunks_written, written
        );
        chunk.clear();
        Ok(())
    }
}
