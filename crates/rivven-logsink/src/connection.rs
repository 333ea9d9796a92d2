//! Database capability traits
//!
//! The sink never talks to a driver directly. A backend provides:
//! - ConnectionFactory: opens a connection from a resolved connection string
//! - Connection: executes one batch statement per call, array-bound
//! - Transaction: the same, inside BEGIN/COMMIT
//!
//! Timeouts are the backend's responsibility and surface as ordinary errors.

use async_trait::async_trait;

use crate::error::Result;
use crate::statement::BatchStatement;
use crate::types::SensitiveString;

/// An open connection to a database
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a batch statement as a single array-bound round trip.
    ///
    /// Returns the number of affected rows as reported by the driver.
    async fn execute(&self, statement: &BatchStatement) -> Result<u64>;

    /// Begin a transaction
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// A database transaction
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Execute a batch statement within the transaction
    async fn execute(&self, statement: &BatchStatement) -> Result<u64>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Configuration for opening connections
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Resolved connection string
    pub connection_string: SensitiveString,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Command timeout in milliseconds (0 = no timeout)
    pub command_timeout_ms: u64,
    /// Application name reported to the server, where supported
    pub application_name: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_string: SensitiveString::default(),
            connect_timeout_ms: 10_000,
            command_timeout_ms: 30_000,
            application_name: Some("rivven-logsink".into()),
        }
    }
}

impl ConnectionConfig {
    /// Create configuration with just a connection string
    pub fn new(connection_string: impl Into<SensitiveString>) -> Self {
        Self {
            connection_string: connection_string.into(),
            ..Default::default()
        }
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Set command timeout
    pub fn with_command_timeout(mut self, ms: u64) -> Self {
        self.command_timeout_ms = ms;
        self
    }

    /// Set application name
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }
}

/// Factory for creating connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Open a new connection
    async fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>>;

    /// Get the database type
    fn database_type(&self) -> DatabaseType;
}

/// Database type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    /// PostgreSQL
    PostgreSQL,
    /// Unknown/custom
    Unknown,
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PostgreSQL => write!(f, "PostgreSQL"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_config_builder() {
        let config = ConnectionConfig::new("host=localhost user=logger password=secret")
            .with_connect_timeout(5000)
            .with_command_timeout(15000)
            .with_application_name("billing");

        assert_eq!(config.connect_timeout_ms, 5000);
        assert_eq!(config.command_timeout_ms, 15000);
        assert_eq!(config.application_name, Some("billing".into()));
        assert!(!format!("{:?}", config).contains("secret"));
    }

    #[test]
    fn test_database_type_display() {
        assert_eq!(format!("{}", DatabaseType::PostgreSQL), "PostgreSQL");
        assert_eq!(format!("{}", DatabaseType::Unknown), "Unknown");
    }
}
