//! Partition and job results.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::CopyError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "cause", rename_all = "snake_case")]
pub enum PartitionStatus {
    Success,
    Failed(CopyError),
}

/// Outcome of copying one partition. Written once by the worker that owned it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionResult {
    pub partition_index: usize,
    pub records_read: u64,
    pub records_written: u64,
    pub chunks_written: u64,
    pub elapsed_ms: u64,
    pub status: PartitionStatus,
}

impl PartitionResult {
    /// Result for a partition that never ran.
    pub fn not_started(partition_index: usize, cause: CopyError) -> Self {
        Self {
            partition_index,
            records_read: 0,
            records_written: 0,
            chunks_written: 0,
            elapsed_ms: 0,
            status: PartitionStatus::Failed(cause),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, PartitionStatus::Success)
    }

    pub fn failure(&self) -> Option<&CopyError> {
        match &self.status {
            PartitionStatus::Failed(cause) => Some(cause),
            PartitionStatus::Success => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    Failed,
}

/// Terminal summary of one job run.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub partition_count: usize,
    /// Records durably written across all partitions.
    pub total_records: u64,
    pub partitions: Vec<PartitionResult>,
    pub overall_status: JobStatus,
}

impl JobOutcome {
    /// Aggregate partition results. Any failed partition fails the job;
    /// results are kept in partition order.
    pub fn aggregate(
        job_id: Uuid,
        start_time: DateTime<Utc>,
        mut partitions: Vec<PartitionResult>,
    ) -> Self {
        partitions.sort_by_key(|p| p.partition_index);
        let total_records = partitions.iter().map(|p| p.records_written).sum();
        let overall_status = if partitions.iter().all(PartitionResult::is_success) {
            JobStatus::Success
        } else {
            JobStatus::Failed
        };

        Self {
            job_id,
            start_time,
            end_time: Utc::now(),
            partition_count: partitions.len(),
            total_records,
            partitions,
            overall_status,
        }
    }

    /// Outcome for a source with no rows: nothing to partition, nothing failed.
    pub fn empty(job_id: Uuid, start_time: DateTime<Utc>) -> Self {
        Self::aggregate(job_id, start_time, Vec::new())
    }

    pub fn is_success(&self) -> bool {
        self.overall_status == JobStatus::Success
    }

    /// Every partition-level cause, in partition order.
    pub fn failures(&self) -> Vec<(usize, &CopyError)> {
        self.partitions
            .iter()
            .filter_map(|p| p.failure().map(|e| (p.partition_index, e)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(index: usize, written: u64) -> PartitionResult {
        PartitionResult {
            partition_index: index,
            records_read: written,
            records_written: written,
            chunks_written: 1,
            elapsed_ms: 3,
            status: PartitionStatus::Success,
        }
    }

    #[test]
    fn aggregate_all_success() {
        let outcome = JobOutcome::aggregate(Uuid::new_v4(), Utc::now(), vec![ok(1, 5), ok(0, 7)]);
        assert!(outcome.is_success());
        assert_eq!(outcome.total_records, 12);
        assert_eq!(outcome.partitions[0].partition_index, 0);
        assert!(outcome.failures().is_empty());
    }

    #[test]
    fn aggregate_one_failure_fails_job_but_keeps_partials() {
        let failed = PartitionResult {
            status: PartitionStatus::Failed(CopyError::DestinationWrite("boom".into())),
            ..ok(2, 3)
        };
        let outcome =
            JobOutcome::aggregate(Uuid::new_v4(), Utc::now(), vec![ok(0, 5), ok(1, 5), failed]);
        assert_eq!(outcome.overall_status, JobStatus::Failed);
        assert_eq!(outcome.total_records, 13);
        assert_eq!(outcome.failures().len(), 1);
        assert_eq!(outcome.failures()[0].0, 2);
    }

    #[test]
    fn empty_outcome_is_success() {
        let outcome = JobOutcome::empty(Uuid::new_v4(), Utc::now());
        assert!(outcome.is_success());
        assert_eq!(outcome.total_records, 0);
        assert_eq!(outcome.partition_count, 0);
    }

    #[test]
    fn failed_status_serializes_cause() {
        let result = PartitionResult::not_started(4, CopyError::Cancelled("shutdown".into()));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"]["status"], "failed");
        assert_eq!(json["status"]["cause"]["kind"], "cancelled");
    }
}
