//! # rivven-logsink
//!
//! Buffered, batch-writing database sink for structured log events.
//!
//! Events are collected in memory and written in one round trip per batch:
//! each configured parameter becomes a typed array holding one value per
//! buffered event, and the statement is executed once with those arrays.
//!
//! ## Features
//!
//! - **Array Binding**: N events, one execute, one array per column
//! - **Flush Triggers**: capacity, explicit flush, optional interval, shutdown
//! - **Connection String Resolution**: explicit, named setting or app setting
//! - **Failure Policy**: report and drop, or rethrow to the triggering caller
//! - **Transactions & Stored Procedures**: per-batch transaction, `CALL` mode
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rivven_logsink::prelude::*;
//! use rivven_logsink::postgres::PgConnectionFactory;
//!
//! let sink = LogSink::builder()
//!     .connection_string("host=localhost user=logger dbname=logs")
//!     .command_text(
//!         "INSERT INTO app_log (log_date, log_level, message) \
//!          SELECT * FROM UNNEST(:log_date, :log_level, :message)",
//!     )
//!     .column(ColumnBinding::new("log_date", EventField::Timestamp))
//!     .column(ColumnBinding::new("log_level", EventField::Level).with_size(16))
//!     .column(ColumnBinding::new("message", EventField::Message))
//!     .buffer_size(256)
//!     .build(Arc::new(PgConnectionFactory))?;
//!
//! sink.submit(LogEvent::new(Level::Info, "billing", "invoice sent")).await?;
//! sink.shutdown().await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` - PostgreSQL backend via tokio-postgres
//! - `cli` - the `logsink` binary

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod buffer;
pub mod column;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod layout;
pub mod reporter;
pub mod resolver;
pub mod security;
pub mod sink;
pub mod statement;
pub mod testing;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;

/// Prelude module for convenient imports
pub mod prelude {
    pub use std::sync::Arc;

    // Error types
    pub use crate::error::{Error, ErrorCategory, FlushPhase, Result};

    // Events and values
    pub use crate::event::{Level, LogEvent};
    pub use crate::types::{DbType, SensitiveString, Value};

    // Column mapping and statements
    pub use crate::column::ColumnBinding;
    pub use crate::layout::{EventField, Layout};
    pub use crate::statement::{BatchStatement, ColumnArray, CommandKind};

    // Database seam
    pub use crate::connection::{
        Connection, ConnectionConfig, ConnectionFactory, DatabaseType, Transaction,
    };

    // Settings and resolution
    pub use crate::resolver::{
        resolve_connection_string, ConnectionStringContext, ConnectionStringSources,
        EnvironmentSettings, SettingsSource, StaticSettings,
    };

    // Sink
    pub use crate::buffer::{BatchBuffer, BatchHandler, SinkState};
    pub use crate::config::{LogSinkConfig, ParameterConfig};
    pub use crate::reporter::{ErrorReporter, FlushFailure, TracingErrorReporter};
    pub use crate::sink::{AtomicSinkStats, LogSink, LogSinkBuilder, SinkOptions, SinkStats};
}

// Re-export commonly used items at crate root
pub use error::{Error, Result};
pub use event::{Level, LogEvent};
pub use sink::{LogSink, LogSinkBuilder};
pub use types::Value;
