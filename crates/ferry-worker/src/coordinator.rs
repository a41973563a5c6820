//! Job coordinator: probe, partition, dispatch, wait, aggregate.

use std::sync::Arc;

use chrono::Utc;
use ferry_core::{
    partition, BatchWriter, CopyError, JobConfig, JobOutcome, PartitionResult, SourceReader,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::metrics::WorkerMetrics;
use crate::partition_worker::PartitionWorker;
use crate::pool::{PoolConfig, TaskHandle, WorkerPool};

enum Dispatched {
    Submitted(usize, TaskHandle<PartitionResult>),
    NotStarted(PartitionResult),
}

pub struct JobCoordinator {
    source: Arc<dyn SourceReader>,
    destination: Arc<dyn BatchWriter>,
    metrics: WorkerMetrics,
}

impl JobCoordinator {
    pub fn new(
        source: Arc<dyn SourceReader>,
        destination: Arc<dyn BatchWriter>,
        metrics: WorkerMetrics,
    ) -> Self {
        Self {
            source,
            destination,
            metrics,
        }
    }

    /// Run one copy job to completion.
    ///
    /// Returns `Err` only for job-level problems (bad configuration, a failed
    /// probe). Partition failures are reported inside the outcome and never
    /// stop sibling partitions.
    pub async fn run(
        &self,
        config: &JobConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<JobOutcome, CopyError> {
        config.validate()?;

        let job_id = Uuid::new_v4();
        let start_time = Utc::now();
        info!(
            "Job {} started: {} -> {} by '{}'",
            job_id, config.source_table, config.destination_table, config.source_key_column
        );

        let domain = match self.source.probe().await {
            Ok(domain) => domain,
            Err(CopyError::EmptyDomain(table)) => {
                info!("Job {}: source '{}' is empty, nothing to copy", job_id, table);
                return Ok(JobOutcome::empty(job_id, start_time));
            }
            Err(e) => {
                error!("Job {}: probe failed: {}", job_id, e);
                return Err(e);
            }
        };

        let partitions = partition(domain.min, domain.max, config.grid_size)?;
        info!(
            "Job {}: domain [{}, {}] split into {} partitions",
            job_id,
            domain.min,
            domain.max,
            partitions.len()
        );

        let pool = WorkerPool::new(PoolConfig {
            core_size: config.core_pool_size,
            max_size: config.max_pool_size,
            queue_capacity: config.queue_capacity,
            rejection_policy: config.rejection_policy,
        });

        let mut dispatched = Vec::with_capacity(partitions.len());
        for part in partitions {
            if *shutdown.borrow() {
                self.metrics.finished("cancelled");
                dispatched.push(Dispatched::NotStarted(PartitionResult::not_started(
                    part.index,
                    CopyError::Cancelled("shutdown requested before submission".to_string()),
                )));
                continue;
            }

            let worker = PartitionWorker::new(
                part,
                Arc::clone(&self.source),
                Arc::clone(&self.destination),
                config.fetch_page_size,
                config.chunk_size,
                self.metrics.clone(),
                shutdown.clone(),
            );
            match pool.submit(worker.run()).await {
                Ok(handle) => dispatched.push(Dispatched::Submitted(part.index, handle)),
                Err(e) => {
                    warn!("Job {}: partition {} not submitted: {}", job_id, part.index, e);
                    self.metrics.finished("rejected");
                    dispatched.push(Dispatched::NotStarted(PartitionResult::not_started(
                        part.index,
                        CopyError::Rejected(e.to_string()),
                    )));
                }
            }
        }

        let mut results = Vec::with_capacity(dispatched.len());
        for entry in dispatched {
            let result = match entry {
                Dispatched::NotStarted(result) => result,
                Dispatched::Submitted(index, handle) => match handle.await {
                    Ok(result) => result,
                    Err(_) => {
                        self.metrics.finished("lost");
                        PartitionResult::not_started(
                            index,
                            CopyError::WorkerLost(format!(
                                "partition {} ended without reporting a result",
                                index
                            )),
                        )
                    }
                },
            };
            results.push(result);
        }
        pool.shutdown().await;

        let outcome = JobOutcome::aggregate(job_id, start_time, results);
        if outcome.is_success() {
            info!(
                "Job {} succeeded: {} records in {} partitions",
                job_id, outcome.total_records, outcome.partition_count
            );
        } else {
            for (index, cause) in outcome.failures() {
                error!("Job {}: partition {} failed: {}", job_id, index, cause);
            }
            error!(
                "Job {} failed: {} of {} partitions failed, {} records written",
                job_id,
                outcome.failures().len(),
                outcome.partition_count,
                outcome.total_records
            );
        }
        Ok(outcome)
    }
}
