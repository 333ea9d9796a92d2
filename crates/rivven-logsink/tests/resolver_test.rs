//! Tests for connection string resolution

use rivven_logsink::resolver::*;
use rivven_logsink::error::ErrorCategory;
use serial_test::serial;
use std::collections::HashMap;

fn settings() -> StaticSettings {
    StaticSettings::new()
        .with_connection_string("logging", "Host=named")
        .with_app_setting("LOGGING_DB", "Host=app")
}

#[test]
fn test_precedence_explicit_over_named_over_app_setting() {
    let all = ConnectionStringSources {
        connection_string: Some("Host=explicit".into()),
        connection_string_name: Some("logging".into()),
        app_settings_key: Some("LOGGING_DB".into()),
    };
    let resolved = resolve_connection_string(&all, &settings()).unwrap();
    assert_eq!(resolved.value.expose_secret(), "Host=explicit");

    let named_and_app = ConnectionStringSources {
        connection_string: None,
        ..all.clone()
    };
    let resolved = resolve_connection_string(&named_and_app, &settings()).unwrap();
    assert_eq!(resolved.value.expose_secret(), "Host=named");
    assert_eq!(
        resolved.context,
        ConnectionStringContext::ConnectionStringName("logging".into())
    );

    let app_only = ConnectionStringSources::app_setting("LOGGING_DB");
    let resolved = resolve_connection_string(&app_only, &settings()).unwrap();
    assert_eq!(resolved.value.expose_secret(), "Host=app");
    assert_eq!(resolved.context.to_string(), "AppSettingsKey[LOGGING_DB]");
}

#[test]
fn test_missing_named_setting_does_not_fall_back() {
    let sources = ConnectionStringSources {
        connection_string: None,
        connection_string_name: Some("missing".into()),
        app_settings_key: Some("LOGGING_DB".into()),
    };

    let err = resolve_connection_string(&sources, &settings()).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert!(err.to_string().contains("missing"));
}

#[test]
fn test_empty_app_setting_is_an_error() {
    let settings = StaticSettings::new().with_app_setting("LOGGING_DB", "");
    let err = resolve_connection_string(&ConnectionStringSources::app_setting("LOGGING_DB"), &settings)
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[test]
#[serial]
fn test_environment_settings_reads_process_env() {
    std::env::set_var("RIVVEN_LOGSINK_TEST_DB", "Host=env");
    let settings = EnvironmentSettings::new(HashMap::new());

    let resolved = resolve_connection_string(
        &ConnectionStringSources::app_setting("RIVVEN_LOGSINK_TEST_DB"),
        &settings,
    )
    .unwrap();
    assert_eq!(resolved.value.expose_secret(), "Host=env");

    std::env::remove_var("RIVVEN_LOGSINK_TEST_DB");
    assert!(resolve_connection_string(
        &ConnectionStringSources::app_setting("RIVVEN_LOGSINK_TEST_DB"),
        &settings,
    )
    .is_err());
}

#[test]
fn test_resolved_value_is_redacted_in_debug() {
    let resolved = resolve_connection_string(
        &ConnectionStringSources::explicit("Password=hunter2"),
        &StaticSettings::new(),
    )
    .unwrap();
    assert!(!format!("{:?}", resolved).contains("hunter2"));
}
