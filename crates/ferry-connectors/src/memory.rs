//! In-memory source and destination.
//!
//! Both sides honour the same contracts as the PostgreSQL connectors: the
//! source serves key-ordered pages bounded by the partition, the destination
//! enforces a unique `id` and applies each chunk atomically.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Mutex;

use async_trait::async_trait;
use ferry_core::{BatchWriter, CopyError, Domain, Partition, Record, SourceReader};
use tracing::debug;

#[derive(Debug, Default)]
pub struct MemorySource {
    name: String,
    rows: BTreeMap<i64, Record>,
}

impl MemorySource {
    pub fn new(name: &str, records: impl IntoIterator<Item = Record>) -> Self {
        Self {
            name: name.to_string(),
            rows: records.into_iter().map(|r| (r.id, r)).collect(),
        }
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    async fn probe(&self) -> Result<Domain, CopyError> {
        match (self.rows.keys().next(), self.rows.keys().next_back()) {
            (Some(&min), Some(&max)) => Ok(Domain::new(min, max)),
            _ => Err(CopyError::EmptyDomain(self.name.clone())),
        }
    }

    async fn fetch_page(
        &self,
        partition: &Partition,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Record>, CopyError> {
        let upper = match partition.max_value {
            Some(max) if partition.min_value >= max => return Ok(Vec::new()),
            Some(max) => Bound::Excluded(max),
            None => Bound::Unbounded,
        };
        let lower = match after {
            Some(after) if after >= partition.min_value => Bound::Excluded(after),
            _ => Bound::Included(partition.min_value),
        };
        if let (Bound::Excluded(after), Bound::Excluded(max)) = (lower, upper) {
            if after >= max {
                return Ok(Vec::new());
            }
        }

        Ok(self
            .rows
            .range((lower, upper))
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect())
    }
}

/// Destination table with a primary key on `id`.
#[derive(Debug, Default)]
pub struct MemoryDestination {
    name: String,
    rows: Mutex<BTreeMap<i64, Record>>,
}

impl MemoryDestination {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rows: Mutex::new(BTreeMap::new()),
        }
    }

    /// Start with rows already present, e.g. to provoke key conflicts.
    pub fn with_rows(name: &str, records: impl IntoIterator<Item = Record>) -> Self {
        Self {
            name: name.to_string(),
            rows: Mutex::new(records.into_iter().map(|r| (r.id, r)).collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.lock().contains_key(&id)
    }

    /// Snapshot of every row, ordered by id.
    pub fn rows(&self) -> Vec<Record> {
        self.lock().values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<i64, Record>> {
        // A poisoned map still holds consistent data: chunks are applied
        // only after every conflict check has passed.
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl BatchWriter for MemoryDestination {
    async fn write_chunk(&self, chunk: &[Record]) -> Result<u64, CopyError> {
        let mut rows = self.lock();

        let mut incoming = std::collections::HashSet::with_capacity(chunk.len());
        for record in chunk {
            if rows.contains_key(&record.id) || !incoming.insert(record.id) {
                return Err(CopyError::DestinationWrite(format!(
                    "duplicate key value violates unique constraint on '{}': id={}",
                    self.name, record.id
                )));
            }
        }

        for record in chunk {
            rows.insert(record.id, record.clone());
        }
        debug!("Inserted chunk of {} rows into '{}'", chunk.len(), self.name);
        Ok(chunk.len() as u64)
    }
}
