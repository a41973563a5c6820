//! Ferry Connectors - source and destination adapters
//!
//! This crate provides connectors for:
//! - PostgreSQL (keyset-paged reads, chunk-atomic multi-row inserts)
//! - In-memory tables (same contracts, used for dry runs and tests)

pub mod error;
pub mod memory;
pub mod postgres;

pub use error::ConnectorError;
pub use memory::{MemoryDestination, MemorySource};
pub use postgres::{ColumnRowMapper, PostgresDestination, PostgresSource};
