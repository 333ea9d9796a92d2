//! Tests for the error taxonomy

use rivven_logsink::error::{Error, ErrorCategory, FlushPhase};

#[test]
fn test_categories() {
    assert_eq!(Error::config("x").category(), ErrorCategory::Configuration);
    assert_eq!(Error::connection("x").category(), ErrorCategory::Connection);
    assert_eq!(Error::statement("x").category(), ErrorCategory::Statement);
    assert_eq!(
        Error::type_conversion("col", "x").category(),
        ErrorCategory::Statement
    );
    assert_eq!(Error::execution("x").category(), ErrorCategory::Execution);
    assert_eq!(Error::timeout("x").category(), ErrorCategory::Execution);
    assert_eq!(Error::Closed.category(), ErrorCategory::Closed);
}

#[test]
fn test_retriable() {
    assert!(Error::connection("refused").is_retriable());
    assert!(Error::timeout("slow").is_retriable());
    assert!(!Error::execution("constraint violated").is_retriable());
    assert!(!Error::config("bad").is_retriable());
    assert!(Error::flush(FlushPhase::Open, 3, Error::connection("refused")).is_retriable());
}

#[test]
fn test_flush_error_display_and_source() {
    let err = Error::flush(FlushPhase::Execute, 25, Error::execution("ORA-00001"));
    let message = err.to_string();

    assert!(message.contains("25 events"));
    assert!(message.contains("execute"));
    assert!(message.contains("ORA-00001"));
    assert!(std::error::Error::source(&err).is_some());
    assert_eq!(err.category(), ErrorCategory::Execution);
}

#[test]
fn test_source_chain() {
    let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
    let err = Error::connection_with_source("failed to connect", io);

    let source = std::error::Error::source(&err).unwrap();
    assert!(source.to_string().contains("refused"));
}
