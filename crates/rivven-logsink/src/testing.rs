//! Testing utilities for the log sink
//!
//! In-memory doubles for the database seam, so sinks can be exercised
//! without a server.
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_logsink::prelude::*;
//! use rivven_logsink::testing::MockConnectionFactory;
//!
//! #[tokio::test]
//! async fn test_flush() {
//!     let factory = Arc::new(MockConnectionFactory::new());
//!     let sink = LogSink::builder()
//!         .connection_string("mock://")
//!         .command_text("INSERT INTO logs (msg) VALUES (:msg)")
//!         .column(ColumnBinding::new("msg", EventField::Message))
//!         .build(factory.clone())
//!         .unwrap();
//!
//!     sink.submit(LogEvent::new(Level::Info, "app", "hello")).await.unwrap();
//!     sink.flush_now().await.unwrap();
//!
//!     assert_eq!(factory.executed().len(), 1);
//! }
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType, Transaction};
use crate::error::{Error, FlushPhase, Result};
use crate::reporter::{ErrorReporter, FlushFailure};
use crate::statement::BatchStatement;

// ============================================================================
// Mock database
// ============================================================================

#[derive(Default)]
struct MockState {
    executed: Mutex<Vec<BatchStatement>>,
    connection_strings: Mutex<Vec<String>>,
    failures: Mutex<Vec<FlushPhase>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    hold: Mutex<Option<Arc<Semaphore>>>,
    entered: Notify,
}

impl MockState {
    fn check(&self, phase: FlushPhase) -> Result<()> {
        if !self.failures.lock().contains(&phase) {
            return Ok(());
        }
        Err(match phase {
            FlushPhase::Open => Error::connection("mock connection refused"),
            FlushPhase::Begin | FlushPhase::Commit => {
                Error::execution(format!("mock {} failure", phase))
            }
            FlushPhase::Close => Error::connection("mock close failure"),
            _ => Error::execution("mock execute failure"),
        })
    }

    async fn execute(&self, statement: &BatchStatement) -> Result<u64> {
        self.entered.notify_one();
        let hold = self.hold.lock().clone();
        if let Some(gate) = hold {
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| Error::internal("mock execute gate closed"))?;
        }

        self.check(FlushPhase::Execute)?;
        self.executed.lock().push(statement.clone());
        Ok(statement.array_length() as u64)
    }
}

/// In-memory connection factory recording every executed batch.
///
/// Failures can be injected per flush phase; [`FlushPhase::Build`] is never
/// reached by the database and is ignored.
#[derive(Clone, Default)]
pub struct MockConnectionFactory {
    state: Arc<MockState>,
}

impl MockConnectionFactory {
    /// Create a factory where every operation succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `phase` fail until [`clear_failures`](Self::clear_failures)
    pub fn fail_on(self, phase: FlushPhase) -> Self {
        self.set_failure(phase);
        self
    }

    /// Make `phase` fail from now on
    pub fn set_failure(&self, phase: FlushPhase) {
        let mut failures = self.state.failures.lock();
        if !failures.contains(&phase) {
            failures.push(phase);
        }
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        self.state.failures.lock().clear();
    }

    /// Block executes until [`release_executes`](Self::release_executes)
    pub fn hold_executes(&self) {
        *self.state.hold.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let held executes proceed and stop holding new ones
    pub fn release_executes(&self) {
        if let Some(gate) = self.state.hold.lock().take() {
            gate.add_permits(Semaphore::MAX_PERMITS);
        }
    }

    /// Wait until an execute has started
    pub async fn execute_started(&self) {
        self.state.entered.notified().await;
    }

    /// Statements executed successfully, in order
    pub fn executed(&self) -> Vec<BatchStatement> {
        self.state.executed.lock().clone()
    }

    /// Connection strings passed to `open`
    pub fn connection_strings(&self) -> Vec<String> {
        self.state.connection_strings.lock().clone()
    }

    /// Connections opened
    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Connections closed
    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Transactions begun
    pub fn begins(&self) -> usize {
        self.state.begins.load(Ordering::SeqCst)
    }

    /// Transactions committed
    pub fn commits(&self) -> usize {
        self.state.commits.load(Ordering::SeqCst)
    }

    /// Transactions rolled back
    pub fn rollbacks(&self) -> usize {
        self.state.rollbacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        self.state.check(FlushPhase::Open)?;
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        self.state
            .connection_strings
            .lock()
            .push(config.connection_string.expose_secret().to_string());

        Ok(Box::new(MockConnection {
            state: self.state.clone(),
        }))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Unknown
    }
}

struct MockConnection {
    state: Arc<MockState>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&self, statement: &BatchStatement) -> Result<u64> {
        self.state.execute(statement).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.state.check(FlushPhase::Begin)?;
        self.state.begins.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockTransaction {
            state: self.state.clone(),
            pending: Mutex::new(Vec::new()),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.state.check(FlushPhase::Close)
    }
}

/// Statements are recorded only once the transaction commits
struct MockTransaction {
    state: Arc<MockState>,
    pending: Mutex<Vec<BatchStatement>>,
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn execute(&self, statement: &BatchStatement) -> Result<u64> {
        self.state.entered.notify_one();
        self.state.check(FlushPhase::Execute)?;
        self.pending.lock().push(statement.clone());
        Ok(statement.array_length() as u64)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.state.check(FlushPhase::Commit)?;
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        let pending = std::mem::take(&mut *self.pending.lock());
        self.state.executed.lock().extend(pending);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Collecting reporter
// ============================================================================

/// Reporter that keeps every failure for later inspection
#[derive(Debug, Clone, Default)]
pub struct CollectingReporter {
    failures: Arc<Mutex<Vec<FlushFailure>>>,
}

impl CollectingReporter {
    /// Create an empty reporter
    pub fn new() -> Self {
        Self::default()
    }

    /// Failures reported so far
    pub fn failures(&self) -> Vec<FlushFailure> {
        self.failures.lock().clone()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, failure: &FlushFailure) {
        self.failures.lock().push(failure.clone());
    }
}
