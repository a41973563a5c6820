//! Typed errors for copy jobs.

use serde::Serialize;
use thiserror::Error;

/// Errors raised while planning or running a copy job.
///
/// Partition-scoped variants (`SourceRead`, `DestinationWrite`, `Rejected`,
/// `Cancelled`, `WorkerLost`) end up inside a [`crate::PartitionResult`]
/// rather than aborting the job.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum CopyError {
    /// The source table has no rows, so there is no key domain to split.
    #[error("source table '{0}' is empty")]
    EmptyDomain(String),

    /// Bad partition count, non-positive sizes, malformed mapping.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reading a page from the source failed.
    #[error("source read failed: {0}")]
    SourceRead(String),

    /// Writing a chunk to the destination failed. The chunk was rolled back.
    #[error("destination write failed: {0}")]
    DestinationWrite(String),

    /// The worker pool was saturated and refused the partition.
    #[error("partition rejected by worker pool: {0}")]
    Rejected(String),

    /// Shutdown was requested before the partition started.
    #[error("partition cancelled: {0}")]
    Cancelled(String),

    /// The task running the partition died without reporting a result.
    #[error("partition worker lost: {0}")]
    WorkerLost(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_kind_and_message() {
        let err = CopyError::DestinationWrite("duplicate key id=7".to_string());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "destination_write");
        assert_eq!(json["message"], "duplicate key id=7");
    }
}
