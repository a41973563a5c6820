//! Ferry Core - partitioned table copy primitives
//!
//! This crate holds everything about a copy job that does not depend on a
//! particular database driver or runtime: the record model, range
//! partitioning, the collaborator traits and the paged partition reader.

pub mod config;
pub mod error;
pub mod job;
pub mod paged;
pub mod partitioned;
pub mod record;
pub mod source;

pub use config::{ColumnMapping, ColumnPair, JobConfig, RejectionPolicy};
pub use error::CopyError;
pub use job::{JobOutcome, JobStatus, PartitionResult, PartitionStatus};
pub use paged::{PagedReader, RecordStream};
pub use partitioned::{partition, Domain, Partition};
pub use record::{Record, Value};
pub use source::{BatchWriter, RowMapper, SourceReader};
