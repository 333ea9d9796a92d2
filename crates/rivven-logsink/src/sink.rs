//! Buffered database log sink
//!
//! Provides:
//! - LogSink: accepts events, flushes them as one array-bound statement
//! - LogSinkBuilder: immutable options resolved once at activation
//! - Capacity, explicit, interval and shutdown flush triggers
//! - Failure reporting with optional rethrow to the triggering caller
//!
//! A flush never retries and never re-queues: a failed batch is reported and
//! dropped.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::buffer::{BatchBuffer, BatchHandler, SinkState};
use crate::column::ColumnBinding;
use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, Transaction};
use crate::error::{Error, FlushPhase, Result};
use crate::event::LogEvent;
use crate::reporter::{ErrorReporter, FlushFailure, TracingErrorReporter};
use crate::resolver::{
    resolve_connection_string, ConnectionStringContext, ConnectionStringSources,
    EnvironmentSettings, SettingsSource,
};
use crate::security::validate_procedure_name;
use crate::statement::{BatchStatement, CommandKind};
use crate::types::SensitiveString;

/// Default number of events buffered before a flush
pub const DEFAULT_BUFFER_SIZE: usize = 512;

/// Sink statistics
#[derive(Debug, Clone, Default)]
pub struct SinkStats {
    /// Events accepted into the buffer
    pub events_accepted: u64,
    /// Events rejected because the sink was closed
    pub events_rejected: u64,
    /// Events written by successful flushes
    pub events_written: u64,
    /// Events discarded by failed flushes
    pub events_dropped: u64,
    /// Successful flushes
    pub batches_written: u64,
    /// Failed flushes
    pub batches_failed: u64,
    /// Rows reported affected by the driver
    pub rows_affected: u64,
    /// Total time spent in successful flushes (milliseconds)
    pub total_write_time_ms: u64,
}

/// Atomic sink statistics
#[derive(Debug, Default)]
#[allow(missing_docs)]
pub struct AtomicSinkStats {
    pub events_accepted: AtomicU64,
    pub events_rejected: AtomicU64,
    pub events_written: AtomicU64,
    pub events_dropped: AtomicU64,
    pub batches_written: AtomicU64,
    pub batches_failed: AtomicU64,
    pub rows_affected: AtomicU64,
    pub total_write_time_ms: AtomicU64,
}

impl AtomicSinkStats {
    /// Record an accepted event
    pub fn record_accepted(&self) {
        self.events_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected event
    pub fn record_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful batch
    pub fn record_batch(&self, events: u64, rows: u64, duration: Duration) {
        self.events_written.fetch_add(events, Ordering::Relaxed);
        self.rows_affected.fetch_add(rows, Ordering::Relaxed);
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        self.total_write_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record a failed batch
    pub fn record_batch_failure(&self, events: u64) {
        self.events_dropped.fetch_add(events, Ordering::Relaxed);
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot
    pub fn snapshot(&self) -> SinkStats {
        SinkStats {
            events_accepted: self.events_accepted.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            events_written: self.events_written.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            rows_affected: self.rows_affected.load(Ordering::Relaxed),
            total_write_time_ms: self.total_write_time_ms.load(Ordering::Relaxed),
        }
    }
}

/// Immutable sink options, fixed at activation
#[derive(Debug, Clone)]
pub struct SinkOptions {
    /// Where the connection string comes from
    pub sources: ConnectionStringSources,
    /// Statement text, or procedure name for stored procedures
    pub command_text: String,
    /// How `command_text` is interpreted
    pub command_kind: CommandKind,
    /// Ordered column bindings
    pub columns: Arc<[ColumnBinding]>,
    /// Number of events that triggers a flush
    pub buffer_size: usize,
    /// Return flush failures to the caller that triggered the flush
    pub rethrow_on_failure: bool,
    /// Flush periodically in the background
    pub flush_interval: Option<Duration>,
    /// Wrap each batch in a transaction
    pub use_transactions: bool,
    /// Connect timeout handed to the backend
    pub connect_timeout_ms: u64,
    /// Command timeout handed to the backend
    pub command_timeout_ms: u64,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            sources: ConnectionStringSources::default(),
            command_text: String::new(),
            command_kind: CommandKind::Text,
            columns: Arc::from(Vec::new()),
            buffer_size: DEFAULT_BUFFER_SIZE,
            rethrow_on_failure: false,
            flush_interval: None,
            use_transactions: false,
            connect_timeout_ms: 10_000,
            command_timeout_ms: 30_000,
        }
    }
}

impl SinkOptions {
    /// Check options that would make every flush fail
    pub fn validate(&self) -> Result<()> {
        if self.command_text.trim().is_empty() {
            return Err(Error::config("command text is required"));
        }
        if self.command_kind == CommandKind::StoredProcedure {
            validate_procedure_name(self.command_text.trim())?;
        }
        if self.columns.is_empty() {
            return Err(Error::config("at least one parameter is required"));
        }
        if self.buffer_size == 0 {
            return Err(Error::config("buffer size must be at least 1"));
        }
        if self.flush_interval == Some(Duration::ZERO) {
            return Err(Error::config("flush interval must be positive"));
        }

        let mut names = std::collections::HashSet::new();
        for column in self.columns.iter() {
            column.validate()?;
            if !names.insert(column.bare_name().to_ascii_lowercase()) {
                return Err(Error::config(format!(
                    "duplicate parameter '{}'",
                    column.bare_name()
                )));
            }
        }
        Ok(())
    }
}

/// Builder for [`LogSink`]
pub struct LogSinkBuilder {
    options: SinkOptions,
    columns: Vec<ColumnBinding>,
    settings: Option<Arc<dyn SettingsSource>>,
    reporter: Option<Arc<dyn ErrorReporter>>,
}

impl LogSinkBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            options: SinkOptions::default(),
            columns: Vec::new(),
            settings: None,
            reporter: None,
        }
    }

    /// Use an explicit connection string
    pub fn connection_string(mut self, connection_string: impl Into<SensitiveString>) -> Self {
        self.options.sources.connection_string = Some(connection_string.into());
        self
    }

    /// Look up the connection string by name in the settings
    pub fn connection_string_name(mut self, name: impl Into<String>) -> Self {
        self.options.sources.connection_string_name = Some(name.into());
        self
    }

    /// Look up the connection string in the application settings
    pub fn app_settings_key(mut self, key: impl Into<String>) -> Self {
        self.options.sources.app_settings_key = Some(key.into());
        self
    }

    /// Replace all connection string sources
    pub fn sources(mut self, sources: ConnectionStringSources) -> Self {
        self.options.sources = sources;
        self
    }

    /// Settings used to resolve named connection strings and app settings.
    ///
    /// Defaults to [`EnvironmentSettings`] with no named connection strings.
    pub fn settings(mut self, settings: impl SettingsSource + 'static) -> Self {
        let settings: Arc<dyn SettingsSource> = Arc::new(settings);
        self.settings = Some(settings);
        self
    }

    /// Statement text with bind parameters
    pub fn command_text(mut self, text: impl Into<String>) -> Self {
        self.options.command_text = text.into();
        self
    }

    /// Statement kind
    pub fn command_kind(mut self, kind: CommandKind) -> Self {
        self.options.command_kind = kind;
        self
    }

    /// Call a stored procedure with the parameters in binding order
    pub fn stored_procedure(mut self, name: impl Into<String>) -> Self {
        self.options.command_text = name.into();
        self.options.command_kind = CommandKind::StoredProcedure;
        self
    }

    /// Append a column binding
    pub fn column(mut self, column: ColumnBinding) -> Self {
        self.columns.push(column);
        self
    }

    /// Append several column bindings
    pub fn columns(mut self, columns: impl IntoIterator<Item = ColumnBinding>) -> Self {
        self.columns.extend(columns);
        self
    }

    /// Events buffered before a flush
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.options.buffer_size = size;
        self
    }

    /// Return flush failures to the triggering caller
    pub fn rethrow_on_failure(mut self, rethrow: bool) -> Self {
        self.options.rethrow_on_failure = rethrow;
        self
    }

    /// Flush periodically in the background
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.options.flush_interval = Some(interval);
        self
    }

    /// Wrap each batch in a transaction
    pub fn use_transactions(mut self, enabled: bool) -> Self {
        self.options.use_transactions = enabled;
        self
    }

    /// Connect timeout handed to the backend
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Command timeout handed to the backend
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.options.command_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Where flush failures are reported. Defaults to [`TracingErrorReporter`].
    pub fn reporter(mut self, reporter: impl ErrorReporter + 'static) -> Self {
        let reporter: Arc<dyn ErrorReporter> = Arc::new(reporter);
        self.reporter = Some(reporter);
        self
    }

    /// Activate the sink.
    ///
    /// Resolves the connection string and validates the options; any problem
    /// is a configuration error and no sink is created. Starting an interval
    /// flush requires a tokio runtime.
    pub fn build(self, factory: Arc<dyn ConnectionFactory>) -> Result<LogSink> {
        let Self {
            mut options,
            columns,
            settings,
            reporter,
        } = self;

        if !columns.is_empty() {
            options.columns = Arc::from(columns);
        }
        options.validate()?;

        let settings: Arc<dyn SettingsSource> =
            settings.unwrap_or_else(|| Arc::new(EnvironmentSettings::default()));
        let resolved = resolve_connection_string(&options.sources, settings.as_ref())?;
        if resolved.is_unresolved() {
            warn!("No connection string configured; every flush will fail to connect");
        }

        let connection = ConnectionConfig::new(resolved.value.clone())
            .with_connect_timeout(options.connect_timeout_ms)
            .with_command_timeout(options.command_timeout_ms);

        let flusher = DatabaseFlusher {
            options: options.clone(),
            connection,
            factory,
            reporter: reporter.unwrap_or_else(|| Arc::new(TracingErrorReporter)),
            stats: Arc::new(AtomicSinkStats::default()),
            phase: Mutex::new(FlushPhase::Open),
        };

        info!(
            database = %flusher.factory.database_type(),
            source = %resolved.context,
            command_kind = ?options.command_kind,
            columns = options.columns.len(),
            buffer_size = options.buffer_size,
            rethrow_on_failure = options.rethrow_on_failure,
            use_transactions = options.use_transactions,
            "Activating log sink"
        );

        let stats = flusher.stats.clone();
        let buffer = Arc::new(BatchBuffer::new(options.buffer_size, flusher));
        let cancel = CancellationToken::new();

        if let Some(interval) = options.flush_interval {
            let runtime = tokio::runtime::Handle::try_current()
                .map_err(|_| Error::config("flush interval requires a tokio runtime"))?;
            runtime.spawn(run_interval_flush(buffer.clone(), interval, cancel.clone()));
        }

        Ok(LogSink {
            buffer,
            stats,
            context: resolved.context,
            cancel,
        })
    }
}

impl Default for LogSinkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Buffered, batch-writing database log sink
pub struct LogSink {
    buffer: Arc<BatchBuffer<LogEvent, DatabaseFlusher>>,
    stats: Arc<AtomicSinkStats>,
    context: ConnectionStringContext,
    cancel: CancellationToken,
}

impl LogSink {
    /// Start building a sink
    pub fn builder() -> LogSinkBuilder {
        LogSinkBuilder::new()
    }

    /// Accept an event.
    ///
    /// Fails with `Error::Closed` after shutdown. When the event fills the
    /// buffer the flush runs before this returns, and its failure is returned
    /// here if `rethrow_on_failure` is set.
    pub async fn submit(&self, event: LogEvent) -> Result<()> {
        let result = self.buffer.submit(event).await;
        match &result {
            Err(Error::Closed) => self.stats.record_rejected(),
            _ => self.stats.record_accepted(),
        }
        result
    }

    /// Flush buffered events now. A no-op on an empty buffer.
    pub async fn flush_now(&self) -> Result<()> {
        self.buffer.flush().await
    }

    /// Stop accepting events and flush what is left.
    ///
    /// Waits for a flush already in progress before the final flush.
    pub async fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();
        let result = self.buffer.shutdown().await;
        let stats = self.stats.snapshot();
        info!(
            events_written = stats.events_written,
            events_dropped = stats.events_dropped,
            batches_written = stats.batches_written,
            batches_failed = stats.batches_failed,
            "Log sink closed"
        );
        result
    }

    /// Current lifecycle state
    pub fn state(&self) -> SinkState {
        self.buffer.state()
    }

    /// Events waiting for the next flush
    pub async fn buffered(&self) -> usize {
        self.buffer.len().await
    }

    /// Where the connection string came from
    pub fn connection_context(&self) -> &ConnectionStringContext {
        &self.context
    }

    /// Options the sink was activated with
    pub fn options(&self) -> &SinkOptions {
        &self.buffer.handler().options
    }

    /// Get sink statistics
    pub fn stats(&self) -> SinkStats {
        self.stats.snapshot()
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_interval_flush(
    buffer: Arc<BatchBuffer<LogEvent, DatabaseFlusher>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // consume initial immediate tick

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match buffer.flush().await {
            Ok(()) => {}
            Err(Error::Closed) => break,
            // already reported by the flusher
            Err(e) => debug!(error = %e, "Interval flush failed"),
        }
    }
    trace!("Interval flush task stopped");
}

/// Executor abstraction for batch operations.
/// Enables unified interface for both Connection and Transaction.
enum BatchExecutor<'a> {
    Connection(&'a dyn Connection),
    Transaction(&'a dyn Transaction),
}

impl BatchExecutor<'_> {
    async fn execute(&self, statement: &BatchStatement) -> Result<u64> {
        match self {
            BatchExecutor::Connection(conn) => conn.execute(statement).await,
            BatchExecutor::Transaction(tx) => tx.execute(statement).await,
        }
    }
}

type PhaseResult<T> = std::result::Result<T, (FlushPhase, Error)>;

/// The flush procedure plugged into the generic buffer
struct DatabaseFlusher {
    options: SinkOptions,
    connection: ConnectionConfig,
    factory: Arc<dyn ConnectionFactory>,
    reporter: Arc<dyn ErrorReporter>,
    stats: Arc<AtomicSinkStats>,
    /// Phase of the running flush, read when a flush is abandoned
    phase: Mutex<FlushPhase>,
}

#[async_trait]
impl BatchHandler<LogEvent> for DatabaseFlusher {
    async fn flush(&self, batch: Vec<LogEvent>) -> Result<()> {
        let count = batch.len();
        let start = Instant::now();

        let (outcome, close_error) = self.write(&batch).await;

        let failure = match outcome {
            Ok(rows) => {
                self.stats.record_batch(count as u64, rows, start.elapsed());
                debug!(
                    events = count,
                    rows,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Batch flushed"
                );
                close_error.map(|e| (FlushPhase::Close, e))
            }
            Err((phase, e)) => {
                self.stats.record_batch_failure(count as u64);
                if let Some(close_error) = close_error {
                    warn!(error = %close_error, "Failed to close connection after failed flush");
                }
                Some((phase, e))
            }
        };

        match failure {
            None => Ok(()),
            Some((phase, e)) => {
                self.reporter.report(&FlushFailure::new(phase, count, &e));
                if self.options.rethrow_on_failure {
                    Err(Error::flush(phase, count, e))
                } else {
                    Ok(())
                }
            }
        }
    }

    fn abandoned(&self, events: usize) {
        let phase = *self.phase.lock();
        self.stats.record_batch_failure(events as u64);
        let e = Error::internal("flush cancelled before completion");
        self.reporter.report(&FlushFailure::new(phase, events, &e));
    }
}

impl DatabaseFlusher {
    fn enter(&self, phase: FlushPhase) {
        *self.phase.lock() = phase;
    }

    /// Open, build, execute, close. The close outcome is returned separately
    /// so a close failure after a successful execute does not turn the batch
    /// into a loss.
    async fn write(&self, batch: &[LogEvent]) -> (PhaseResult<u64>, Option<Error>) {
        self.enter(FlushPhase::Open);
        let conn = match self.factory.open(&self.connection).await {
            Ok(conn) => conn,
            Err(e) => return (Err((FlushPhase::Open, e)), None),
        };

        let outcome = self.execute(&*conn, batch).await;
        self.enter(FlushPhase::Close);
        let close_error = conn.close().await.err();
        (outcome, close_error)
    }

    async fn execute(&self, conn: &dyn Connection, batch: &[LogEvent]) -> PhaseResult<u64> {
        self.enter(FlushPhase::Build);
        let statement = BatchStatement::build(
            &self.options.command_text,
            self.options.command_kind,
            &self.options.columns,
            batch,
        )
        .map_err(|e| (FlushPhase::Build, e))?;

        if !self.options.use_transactions {
            self.enter(FlushPhase::Execute);
            let executor = BatchExecutor::Connection(conn);
            return executor
                .execute(&statement)
                .await
                .map_err(|e| (FlushPhase::Execute, e));
        }

        self.enter(FlushPhase::Begin);
        let tx = conn.begin().await.map_err(|e| (FlushPhase::Begin, e))?;
        trace!(events = batch.len(), "Transaction started for batch");

        self.enter(FlushPhase::Execute);
        let result = BatchExecutor::Transaction(&*tx).execute(&statement).await;
        match result {
            Ok(rows) => {
                self.enter(FlushPhase::Commit);
                tx.commit().await.map_err(|e| (FlushPhase::Commit, e))?;
                trace!(rows, "Transaction committed");
                Ok(rows)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!(error = %rollback_err, "Rollback failed after batch error");
                }
                Err((FlushPhase::Execute, e))
            }
        }
    }
}
