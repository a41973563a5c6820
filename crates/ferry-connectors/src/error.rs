//! Typed errors for connector setup.
//!
//! Runtime read and write faults are reported as `ferry_core::CopyError`
//! so they can be attached to a partition result; this type covers the
//! faults that stop a job before it starts.

use std::fmt;

/// Errors that can occur while building a connector.
#[derive(Debug)]
pub enum ConnectorError {
    /// Failed to establish a connection to the database.
    ConnectionFailed(String),
    /// The requested table does not exist.
    TableNotFound(String),
    /// Invalid or missing configuration.
    ConfigError(String),
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorError::ConnectionFailed(msg) => write!(f, "connection failed: {}", msg),
            ConnectorError::TableNotFound(msg) => write!(f, "table not found: {}", msg),
            ConnectorError::ConfigError(msg) => write!(f, "config error: {}", msg),
        }
    }
}

impl std::error::Error for ConnectorError {}

impl From<sqlx::Error> for ConnectorError {
    fn from(e: sqlx::Error) -> Self {
        ConnectorError::ConnectionFailed(e.to_string())
    }
}
