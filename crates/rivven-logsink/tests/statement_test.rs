//! Tests for batch statement construction

use rivven_logsink::prelude::*;
use rust_decimal::Decimal;

fn events() -> Vec<LogEvent> {
    vec![
        LogEvent::new(Level::Info, "billing", "invoice created")
            .with_field("amount", "12.50")
            .with_field("customer", 42i64),
        LogEvent::new(Level::Warn, "billing", "invoice overdue").with_field("amount", "7"),
        LogEvent::new(Level::Error, "billing", "payment failed").with_field("customer", 7i64),
    ]
}

#[test]
fn test_one_array_per_binding_in_order() {
    let bindings = vec![
        ColumnBinding::new(":log_level", EventField::Level),
        ColumnBinding::new(":message", EventField::Message),
        ColumnBinding::new(":customer", EventField::Field("customer".into())),
    ];
    let statement = BatchStatement::build(
        "INSERT INTO log (lvl, msg, cust) VALUES (:log_level, :message, :customer)",
        CommandKind::Text,
        &bindings,
        &events(),
    )
    .unwrap();

    let names: Vec<_> = statement.columns().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["log_level", "message", "customer"]);
    assert_eq!(statement.array_length(), 3);
    assert!(statement.columns().iter().all(|c| c.values.len() == 3));

    let customer = statement.column("customer").unwrap();
    assert_eq!(customer.db_type, DbType::Int64);
    assert_eq!(
        customer.values,
        vec![Value::Int64(42), Value::Null, Value::Int64(7)]
    );
}

#[test]
fn test_declared_type_coerces_values() {
    let bindings = vec![ColumnBinding::new("amount", EventField::Field("amount".into()))
        .with_db_type(DbType::Decimal)
        .with_precision(10)
        .with_scale(2)];
    let statement =
        BatchStatement::build("x", CommandKind::Text, &bindings, &events()).unwrap();

    let amount = statement.column("amount").unwrap();
    assert!(!amount.inferred);
    assert_eq!(amount.precision, Some(10));
    assert_eq!(amount.scale, Some(2));
    assert_eq!(amount.size, None);
    assert_eq!(
        amount.values,
        vec![
            Value::Decimal(Decimal::new(1250, 2)),
            Value::Decimal(Decimal::from(7)),
            Value::Null
        ]
    );
}

#[test]
fn test_declared_type_rejects_unconvertible_value() {
    let bindings = vec![ColumnBinding::new("level", EventField::Level).with_db_type(DbType::Int32)];
    let err = BatchStatement::build("x", CommandKind::Text, &bindings, &events()).unwrap_err();

    assert!(matches!(err, Error::TypeConversion { ref column, .. } if column == "level"));
    assert_eq!(err.category(), ErrorCategory::Statement);
}

#[test]
fn test_literal_and_custom_layouts() {
    let bindings = vec![
        ColumnBinding::new("app", EventField::Literal(Value::from("billing-service"))),
        ColumnBinding::new("msg_len", |event: &LogEvent| {
            Some(Value::Int32(event.message.len() as i32))
        }),
    ];
    let statement =
        BatchStatement::build("x", CommandKind::Text, &bindings, &events()).unwrap();

    assert_eq!(statement.column("app").unwrap().null_count(), 0);
    assert_eq!(
        statement.column("msg_len").unwrap().values[0],
        Value::Int32("invoice created".len() as i32)
    );
}

#[test]
fn test_invalid_stored_procedure_name() {
    let bindings = vec![ColumnBinding::new("msg", EventField::Message)];
    let err = BatchStatement::build(
        "write_log; DROP TABLE log",
        CommandKind::StoredProcedure,
        &bindings,
        &events(),
    )
    .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Statement);
}

#[test]
fn test_empty_command_text() {
    let bindings = vec![ColumnBinding::new("msg", EventField::Message)];
    assert!(BatchStatement::build("  ", CommandKind::Text, &bindings, &events()).is_err());
}
