//! Worker configuration from environment variables.

use anyhow::{Context, Result};
use ferry_core::{ColumnMapping, JobConfig, RejectionPolicy};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub source_database_url: String,
    /// Defaults to the source database.
    pub destination_database_url: String,
    /// Connections per database pool.
    pub db_max_connections: u32,
    pub job: JobConfig,
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", key)),
        Err(_) => Ok(default),
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let source_database_url =
            std::env::var("SOURCE_DATABASE_URL").context("SOURCE_DATABASE_URL is not set")?;
        let destination_database_url =
            std::env::var("DESTINATION_DATABASE_URL").unwrap_or_else(|_| source_database_url.clone());

        let core_pool_size: usize = parse_var("CORE_POOL_SIZE", 4)?;
        let max_pool_size: usize = parse_var("MAX_POOL_SIZE", core_pool_size)?;

        let job = JobConfig {
            source_table: var_or("SOURCE_TABLE", "customer"),
            source_key_column: var_or("SOURCE_KEY_COLUMN", "id"),
            destination_table: var_or("DESTINATION_TABLE", "new_customer"),
            column_mapping: var_or("COLUMN_MAPPING", "id,firstName,lastName,birthdate")
                .parse::<ColumnMapping>()
                .context("Invalid COLUMN_MAPPING")?,
            fetch_page_size: parse_var("FETCH_PAGE_SIZE", 1000)?,
            chunk_size: parse_var("CHUNK_SIZE", 1000)?,
            core_pool_size,
            max_pool_size,
            queue_capacity: parse_var("QUEUE_CAPACITY", core_pool_size)?,
            grid_size: parse_var("GRID_SIZE", core_pool_size)?,
            rejection_policy: var_or("REJECTION_POLICY", "block")
                .parse::<RejectionPolicy>()
                .context("Invalid REJECTION_POLICY")?,
        };

        Ok(Self {
            source_database_url,
            destination_database_url,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", max_pool_size as u32 + 1)?,
            job,
        })
    }
}
