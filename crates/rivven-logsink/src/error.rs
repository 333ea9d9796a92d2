//! Error types for rivven-logsink
//!
//! Errors are split by where they can happen:
//! - Configuration errors are fatal and surface while the sink is activated
//! - Connection, statement and execution errors are scoped to a single flush
//! - `Closed` is returned for work offered after shutdown

use std::fmt;
use thiserror::Error;

/// Result type for rivven-logsink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection string or option problems (fatal at activation)
    Configuration,
    /// Opening or closing a connection failed
    Connection,
    /// Building or preparing the batch statement failed
    Statement,
    /// The batched execute (or its commit) failed
    Execution,
    /// The sink has been shut down
    Closed,
    /// Unknown/other errors
    Other,
}

impl ErrorCategory {
    /// Whether errors in this category only affect the current flush
    #[inline]
    pub const fn is_flush_scoped(self) -> bool {
        matches!(self, Self::Connection | Self::Statement | Self::Execution)
    }
}

/// Phase of a flush cycle in which a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushPhase {
    /// Opening the database connection
    Open,
    /// Building the batch statement from the buffered events
    Build,
    /// Starting a transaction
    Begin,
    /// Executing the batched statement
    Execute,
    /// Committing the transaction
    Commit,
    /// Closing the connection
    Close,
}

impl fmt::Display for FlushPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Build => write!(f, "build"),
            Self::Begin => write!(f, "begin"),
            Self::Execute => write!(f, "execute"),
            Self::Commit => write!(f, "commit"),
            Self::Close => write!(f, "close"),
        }
    }
}

/// Main error type for rivven-logsink
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Connection failed to open or close
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Batch statement could not be built or prepared
    #[error("statement error: {message}")]
    Statement {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A bound value could not be converted to its column type
    #[error("type conversion error in column {column}: {message}")]
    TypeConversion { column: String, message: String },

    /// Batched execution failed
    #[error("execution error: {message}")]
    Execution {
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out inside the database capability
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// A flush failed; the batch was discarded
    #[error("flush of {events} events failed during {phase}: {source}")]
    Flush {
        phase: FlushPhase,
        events: usize,
        #[source]
        source: Box<Error>,
    },

    /// The sink no longer accepts work
    #[error("sink is closed")]
    Closed,

    /// Internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Statement { .. } | Self::TypeConversion { .. } => ErrorCategory::Statement,
            Self::Execution { .. } | Self::Timeout { .. } => ErrorCategory::Execution,
            Self::Flush { source, .. } => source.category(),
            Self::Closed => ErrorCategory::Closed,
            Self::Internal { .. } => ErrorCategory::Other,
        }
    }

    /// Whether the underlying cause is transient.
    ///
    /// The sink never retries on its own; this is a hint for callers that
    /// opted into `rethrow_on_failure` and want to resubmit.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => true,
            Self::Flush { source, .. } => source.is_retriable(),
            _ => false,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a statement error
    pub fn statement(message: impl Into<String>) -> Self {
        Self::Statement {
            message: message.into(),
            source: None,
        }
    }

    /// Create a statement error with source
    pub fn statement_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Statement {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a type conversion error for a column
    pub fn type_conversion(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TypeConversion {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create an execution error
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create an execution error carrying the statement text
    pub fn execution_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Create an execution error with source
    pub fn execution_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Execution {
            message: message.into(),
            sql: None,
            source: Some(Box::new(source)),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Wrap a flush-scoped error with the phase and batch size it hit
    pub fn flush(phase: FlushPhase, events: usize, source: Error) -> Self {
        Self::Flush {
            phase,
            events,
            source: Box::new(source),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Connection => write!(f, "connection"),
            Self::Statement => write!(f, "statement"),
            Self::Execution => write!(f, "execution"),
            Self::Closed => write!(f, "closed"),
            Self::Other => write!(f, "other"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_scoped_categories() {
        assert!(ErrorCategory::Connection.is_flush_scoped());
        assert!(ErrorCategory::Statement.is_flush_scoped());
        assert!(ErrorCategory::Execution.is_flush_scoped());

        assert!(!ErrorCategory::Configuration.is_flush_scoped());
        assert!(!ErrorCategory::Closed.is_flush_scoped());
    }

    #[test]
    fn test_flush_error_inherits_category() {
        let err = Error::flush(FlushPhase::Execute, 3, Error::execution("ORA-00001"));
        assert_eq!(err.category(), ErrorCategory::Execution);
        assert!(!err.is_retriable());

        let err = Error::flush(FlushPhase::Open, 3, Error::connection("refused"));
        assert_eq!(err.category(), ErrorCategory::Connection);
        assert!(err.is_retriable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::flush(FlushPhase::Execute, 5, Error::timeout("30s elapsed"));
        let msg = err.to_string();
        assert!(msg.contains("5 events"));
        assert!(msg.contains("execute"));
        assert!(msg.contains("30s elapsed"));

        let err = Error::type_conversion("level", "expected INTEGER");
        assert!(err.to_string().contains("level"));
    }
}
