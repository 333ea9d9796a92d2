//! Flush failure reporting
//!
//! Every failed flush is reported here whether or not the error is also
//! returned to the caller. Reporters are called on the flush path and must
//! not block.

use tracing::error;

use crate::error::{Error, ErrorCategory, FlushPhase};

/// Description of a failed flush
#[derive(Debug, Clone, PartialEq)]
pub struct FlushFailure {
    /// Where the flush failed
    pub phase: FlushPhase,
    /// Error classification of the cause
    pub category: ErrorCategory,
    /// Number of events discarded with the batch
    pub events: usize,
    /// Human readable summary
    pub message: String,
    /// Rendered underlying cause
    pub cause: String,
}

impl FlushFailure {
    /// Describe a failure of `events` events in `phase`
    pub fn new(phase: FlushPhase, events: usize, cause: &Error) -> Self {
        Self {
            phase,
            category: cause.category(),
            events,
            message: format!("failed to {} batch of {} log events", verb(phase), events),
            cause: cause.to_string(),
        }
    }
}

fn verb(phase: FlushPhase) -> &'static str {
    match phase {
        FlushPhase::Open => "open connection for",
        FlushPhase::Build => "build statement for",
        FlushPhase::Begin => "begin transaction for",
        FlushPhase::Execute => "execute",
        FlushPhase::Commit => "commit",
        FlushPhase::Close => "close connection after",
    }
}

/// Receives flush failures
pub trait ErrorReporter: Send + Sync {
    /// Report a failure; must return promptly
    fn report(&self, failure: &FlushFailure);
}

impl<F> ErrorReporter for F
where
    F: Fn(&FlushFailure) + Send + Sync,
{
    fn report(&self, failure: &FlushFailure) {
        self(failure)
    }
}

/// Default reporter: logs through `tracing` at ERROR level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, failure: &FlushFailure) {
        error!(
            phase = %failure.phase,
            category = %failure.category,
            events = failure.events,
            cause = %failure.cause,
            "{}",
            failure.message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_failure_describes_phase() {
        let failure = FlushFailure::new(FlushPhase::Open, 12, &Error::connection("refused"));

        assert_eq!(failure.category, ErrorCategory::Connection);
        assert_eq!(failure.events, 12);
        assert!(failure.message.contains("open connection"));
        assert!(failure.cause.contains("refused"));
    }

    #[test]
    fn test_closure_reporter() {
        let seen = Mutex::new(Vec::new());
        let reporter = |f: &FlushFailure| seen.lock().push(f.phase);

        reporter.report(&FlushFailure::new(
            FlushPhase::Execute,
            1,
            &Error::execution("boom"),
        ));
        assert_eq!(*seen.lock(), vec![FlushPhase::Execute]);
    }
}
