//! Tests for file-based sink configuration

use rivven_logsink::config::LogSinkConfig;
use rivven_logsink::prelude::*;
use rivven_logsink::testing::MockConnectionFactory;
use serial_test::serial;
use std::io::Write;

const FULL: &str = r#"
connection_string_name: logging
connection_strings:
  logging: "Host=${RIVVEN_LOGSINK_CFG_HOST:-localhost};Password=${RIVVEN_LOGSINK_CFG_PASSWORD}"
command_text: logging.write_batch
command_type: stored_procedure
buffer_size: 2
rethrow_on_failure: true
use_transactions: true
parameters:
  - name: p_date
    db_type: timestamp
    layout: timestamp
  - name: p_level
    size: 16
    layout: level
  - name: p_user
    layout: "field:user"
"#;

#[test]
#[serial]
fn test_load_from_file_expands_environment() {
    std::env::set_var("RIVVEN_LOGSINK_CFG_PASSWORD", "s3cret");
    std::env::remove_var("RIVVEN_LOGSINK_CFG_HOST");

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(FULL.as_bytes()).unwrap();

    let config = LogSinkConfig::from_file(file.path()).unwrap();
    std::env::remove_var("RIVVEN_LOGSINK_CFG_PASSWORD");

    assert_eq!(config.command_type, CommandKind::StoredProcedure);
    assert_eq!(config.buffer_size, 2);
    assert!(config.rethrow_on_failure);
    assert!(config.use_transactions);
    assert_eq!(config.parameters.len(), 3);
    assert_eq!(config.parameters[0].db_type, Some(DbType::Timestamp));
    assert_eq!(config.parameters[1].size, 16);
    assert_eq!(
        config.connection_strings["logging"].expose_secret(),
        "Host=localhost;Password=s3cret"
    );
    assert!(!format!("{:?}", config).contains("s3cret"));
}

#[tokio::test]
#[serial]
async fn test_config_builds_working_sink() {
    std::env::set_var("RIVVEN_LOGSINK_CFG_PASSWORD", "pw");
    let config = LogSinkConfig::from_yaml_str(FULL).unwrap();
    std::env::remove_var("RIVVEN_LOGSINK_CFG_PASSWORD");

    let factory = Arc::new(MockConnectionFactory::new());
    let sink = config.into_builder().unwrap().build(factory.clone()).unwrap();

    assert_eq!(
        sink.connection_context(),
        &ConnectionStringContext::ConnectionStringName("logging".into())
    );

    sink.submit(LogEvent::new(Level::Info, "auth", "login").with_field("user", "ana"))
        .await
        .unwrap();
    sink.submit(LogEvent::new(Level::Warn, "auth", "retry")).await.unwrap();

    let executed = factory.executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].command_kind(), CommandKind::StoredProcedure);
    assert_eq!(executed[0].column("p_level").unwrap().size, Some(16));
    assert_eq!(
        executed[0].column("p_user").unwrap().values,
        vec![Value::from("ana"), Value::Null]
    );
    assert_eq!(factory.commits(), 1);
    assert_eq!(
        factory.connection_strings(),
        vec!["Host=localhost;Password=pw".to_string()]
    );

    sink.shutdown().await.unwrap();
}

#[test]
fn test_missing_named_connection_string_fails_activation() {
    let yaml = r#"
connection_string_name: nowhere
command_text: "INSERT INTO log (m) VALUES (:m)"
parameters:
  - name: m
    layout: message
"#;
    let config = LogSinkConfig::from_yaml_str(yaml).unwrap();
    let result = config
        .into_builder()
        .unwrap()
        .build(Arc::new(MockConnectionFactory::new()));

    assert!(matches!(result, Err(Error::Configuration { .. })));
}

#[test]
fn test_rejects_empty_parameters() {
    let yaml = r#"
command_text: "INSERT INTO log DEFAULT VALUES"
parameters: []
"#;
    assert!(LogSinkConfig::from_yaml_str(yaml).is_err());
}

#[test]
fn test_rejects_unknown_db_type() {
    let yaml = r#"
command_text: "INSERT INTO log (m) VALUES (:m)"
parameters:
  - name: m
    db_type: varchar2
    layout: message
"#;
    assert!(LogSinkConfig::from_yaml_str(yaml).is_err());
}

#[test]
fn test_missing_file() {
    let err = LogSinkConfig::from_file("/nonexistent/rivven-logsink.yaml").unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[test]
fn test_connection_string_is_redacted() {
    let yaml = r#"
connection_string: "Host=db;Password=topsecret"
command_text: "INSERT INTO log (m) VALUES (:m)"
parameters:
  - name: m
    layout: message
"#;
    let config = LogSinkConfig::from_yaml_str(yaml).unwrap();
    assert!(!format!("{:?}", config).contains("topsecret"));
    assert_eq!(
        config.connection_string.unwrap().expose_secret(),
        "Host=db;Password=topsecret"
    );
}
