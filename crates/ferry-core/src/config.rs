//! Job configuration bundle passed to the coordinator at invocation.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::CopyError;

/// What the worker pool does with a submission when its queue is full and
/// it is already running `max_pool_size` workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionPolicy {
    /// Wait for queue space.
    #[default]
    Block,
    /// Refuse the partition; it is reported as failed without running.
    Reject,
}

impl FromStr for RejectionPolicy {
    type Err = CopyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(RejectionPolicy::Block),
            "reject" => Ok(RejectionPolicy::Reject),
            other => Err(CopyError::InvalidConfig(format!(
                "unknown rejection policy '{other}' (expected 'block' or 'reject')"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnPair {
    pub source: String,
    pub destination: String,
}

/// Ordered source-to-destination column mapping.
///
/// Text form is a comma separated list of `src` or `src:dst` entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMapping {
    pairs: Vec<ColumnPair>,
}

impl ColumnMapping {
    pub fn new(pairs: Vec<ColumnPair>) -> Result<Self, CopyError> {
        if pairs.is_empty() {
            return Err(CopyError::InvalidConfig(
                "column mapping must name at least one column".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for pair in &pairs {
            if pair.source.is_empty() || pair.destination.is_empty() {
                return Err(CopyError::InvalidConfig(
                    "column mapping contains an empty column name".to_string(),
                ));
            }
            if !seen.insert(pair.destination.as_str()) {
                return Err(CopyError::InvalidConfig(format!(
                    "destination column '{}' is mapped twice",
                    pair.destination
                )));
            }
        }
        Ok(Self { pairs })
    }

    /// Same column names on both sides.
    pub fn identity<S: AsRef<str>>(columns: &[S]) -> Result<Self, CopyError> {
        Self::new(
            columns
                .iter()
                .map(|c| ColumnPair {
                    source: c.as_ref().to_string(),
                    destination: c.as_ref().to_string(),
                })
                .collect(),
        )
    }

    pub fn pairs(&self) -> &[ColumnPair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn source_columns(&self) -> Vec<&str> {
        self.pairs.iter().map(|p| p.source.as_str()).collect()
    }

    pub fn destination_columns(&self) -> Vec<&str> {
        self.pairs.iter().map(|p| p.destination.as_str()).collect()
    }
}

impl FromStr for ColumnMapping {
    type Err = CopyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pairs = s
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once(':') {
                Some((src, dst)) => ColumnPair {
                    source: src.trim().to_string(),
                    destination: dst.trim().to_string(),
                },
                None => ColumnPair {
                    source: entry.to_string(),
                    destination: entry.to_string(),
                },
            })
            .collect();
        Self::new(pairs)
    }
}

impl fmt::Display for ColumnMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self
            .pairs
            .iter()
            .map(|p| {
                if p.source == p.destination {
                    p.source.clone()
                } else {
                    format!("{}:{}", p.source, p.destination)
                }
            })
            .collect();
        write!(f, "{}", entries.join(","))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobConfig {
    pub source_table: String,
    pub source_key_column: String,
    pub destination_table: String,
    pub column_mapping: ColumnMapping,
    /// Rows per source read.
    pub fetch_page_size: usize,
    /// Records per destination insert.
    pub chunk_size: usize,
    /// Steady-state worker count.
    pub core_pool_size: usize,
    /// Burst worker count, used once the queue is full.
    pub max_pool_size: usize,
    pub queue_capacity: usize,
    /// Number of partitions to split the key domain into.
    pub grid_size: usize,
    pub rejection_policy: RejectionPolicy,
}

impl JobConfig {
    /// Check the bundle before any work starts.
    pub fn validate(&self) -> Result<(), CopyError> {
        for (name, value) in [
            ("source_table", &self.source_table),
            ("source_key_column", &self.source_key_column),
            ("destination_table", &self.destination_table),
        ] {
            if value.trim().is_empty() {
                return Err(CopyError::InvalidConfig(format!("{name} must not be empty")));
            }
        }
        if self.column_mapping.is_empty() {
            return Err(CopyError::InvalidConfig(
                "column mapping must name at least one column".to_string(),
            ));
        }
        for (name, value) in [
            ("fetch_page_size", self.fetch_page_size),
            ("chunk_size", self.chunk_size),
            ("core_pool_size", self.core_pool_size),
            ("max_pool_size", self.max_pool_size),
            ("queue_capacity", self.queue_capacity),
            ("grid_size", self.grid_size),
        ] {
            if value == 0 {
                return Err(CopyError::InvalidConfig(format!("{name} must be at least 1")));
            }
        }
        if self.max_pool_size < self.core_pool_size {
            return Err(CopyError::InvalidConfig(format!(
                "max_pool_size ({}) is smaller than core_pool_size ({})",
                self.max_pool_size, self.core_pool_size
            )));
        }
        Ok(())
    }
}
