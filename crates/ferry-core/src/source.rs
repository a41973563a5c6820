//! Collaborator traits implemented by connectors.

use async_trait::async_trait;

use crate::error::CopyError;
use crate::partitioned::{Domain, Partition};
use crate::record::Record;

/// A row-oriented source offering range-bounded, key-ordered paged reads.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Return the `[min, max]` key range of the table.
    ///
    /// Fails with [`CopyError::EmptyDomain`] when the table has no rows.
    async fn probe(&self) -> Result<Domain, CopyError>;

    /// Fetch at most `limit` records with keys inside `partition`, strictly
    /// greater than `after` when given, ascending by key.
    async fn fetch_page(
        &self,
        partition: &Partition,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Record>, CopyError>;
}

/// A destination that inserts a whole chunk atomically.
#[async_trait]
pub trait BatchWriter: Send + Sync {
    /// Insert every record of `chunk` or none of them.
    ///
    /// Returns the number of records written.
    async fn write_chunk(&self, chunk: &[Record]) -> Result<u64, CopyError>;
}

/// Maps a driver row into a [`Record`].
pub trait RowMapper<R>: Send + Sync {
    fn map_row(&self, row: &R) -> Result<Record, CopyError>;
}
