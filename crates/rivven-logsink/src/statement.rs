//! Batch statement construction
//!
//! Turns N buffered events into one statement with one value array per
//! column. Building is pure; nothing here touches a connection, so the
//! result can be checked in isolation and handed to any backend that
//! supports array binding.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::column::ColumnBinding;
use crate::error::{Error, Result};
use crate::event::LogEvent;
use crate::security::validate_procedure_name;
use crate::types::{DbType, Value};

/// How the command text is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Plain SQL text with bind parameters
    #[default]
    Text,
    /// Name of a stored procedure called with the parameters in order
    StoredProcedure,
}

/// One column of a batch: a typed array with one value per event
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnArray {
    /// Parameter name without bind prefix
    pub name: String,
    /// Type the array is bound as
    pub db_type: DbType,
    /// Whether `db_type` was inferred rather than declared
    pub inferred: bool,
    /// Numeric precision, only when configured non-zero
    pub precision: Option<u8>,
    /// Numeric scale, only when configured non-zero
    pub scale: Option<u8>,
    /// Parameter size, only when configured non-zero
    pub size: Option<u32>,
    /// Values in buffer order; NULLs are `Value::Null`
    pub values: Vec<Value>,
}

impl ColumnArray {
    /// Number of NULL entries
    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_null()).count()
    }
}

/// A fully materialized batch ready for a single execute
#[derive(Debug, Clone, PartialEq)]
pub struct BatchStatement {
    command_text: String,
    command_kind: CommandKind,
    columns: Vec<ColumnArray>,
    array_length: usize,
}

impl BatchStatement {
    /// Build a batch statement from buffered events.
    ///
    /// Columns follow the order of `bindings`; index `i` of every column
    /// array belongs to `events[i]`. Fails on an empty batch, an empty
    /// command, duplicate parameter names, or values that do not fit the
    /// column type.
    pub fn build(
        command_text: &str,
        command_kind: CommandKind,
        bindings: &[ColumnBinding],
        events: &[LogEvent],
    ) -> Result<Self> {
        if events.is_empty() {
            return Err(Error::statement(
                "cannot build a batch statement from zero events",
            ));
        }
        if command_text.trim().is_empty() {
            return Err(Error::statement("command text is empty"));
        }
        if bindings.is_empty() {
            return Err(Error::statement("batch statement has no parameters"));
        }
        if command_kind == CommandKind::StoredProcedure {
            validate_procedure_name(command_text.trim())
                .map_err(|e| Error::statement_with_source("invalid stored procedure", e))?;
        }

        let mut seen = HashSet::with_capacity(bindings.len());
        let mut columns = Vec::with_capacity(bindings.len());

        for binding in bindings {
            if !seen.insert(binding.bare_name().to_ascii_lowercase()) {
                return Err(Error::statement(format!(
                    "duplicate parameter '{}'",
                    binding.bare_name()
                )));
            }

            let values = events
                .iter()
                .map(|event| binding.bind(event))
                .collect::<Result<Vec<_>>>()?;

            let (db_type, inferred) = match binding.db_type() {
                Some(db_type) => (db_type, false),
                None => (infer_type(binding.bare_name(), &values)?, true),
            };

            columns.push(ColumnArray {
                name: binding.bare_name().to_string(),
                db_type,
                inferred,
                precision: binding.precision(),
                scale: binding.scale(),
                size: binding.size(),
                values,
            });
        }

        Ok(Self {
            command_text: command_text.trim().to_string(),
            command_kind,
            columns,
            array_length: events.len(),
        })
    }

    /// Statement text or procedure name
    pub fn command_text(&self) -> &str {
        &self.command_text
    }

    /// How the command text is interpreted
    pub fn command_kind(&self) -> CommandKind {
        self.command_kind
    }

    /// Column arrays in binding order
    pub fn columns(&self) -> &[ColumnArray] {
        &self.columns
    }

    /// Column array by parameter name
    pub fn column(&self, name: &str) -> Option<&ColumnArray> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Number of rows bound in every column array
    pub fn array_length(&self) -> usize {
        self.array_length
    }
}

/// Resolve a column type from its first non-null value.
///
/// All non-null values must agree. A column with only NULLs falls back to
/// [`DbType::UNTYPED_NULL_DEFAULT`].
fn infer_type(column: &str, values: &[Value]) -> Result<DbType> {
    let mut resolved: Option<DbType> = None;

    for value in values {
        let Some(db_type) = DbType::of(value) else {
            continue;
        };
        match resolved {
            None => resolved = Some(db_type),
            Some(first) if first != db_type => {
                return Err(Error::type_conversion(
                    column,
                    format!(
                        "inferred {} from the first value but found {}; declare a db_type",
                        first, db_type
                    ),
                ));
            }
            Some(_) => {}
        }
    }

    Ok(resolved.unwrap_or(DbType::UNTYPED_NULL_DEFAULT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Level;
    use crate::layout::EventField;

    fn events(n: usize) -> Vec<LogEvent> {
        (0..n)
            .map(|i| LogEvent::new(Level::Info, "test", format!("event {}", i)))
            .collect()
    }

    #[test]
    fn test_rejects_empty_batch() {
        let bindings = vec![ColumnBinding::new("message", EventField::Message)];
        let err = BatchStatement::build("INSERT", CommandKind::Text, &bindings, &[]).unwrap_err();
        assert!(err.to_string().contains("zero events"));
    }

    #[test]
    fn test_infer_type_mixed() {
        let values = vec![Value::Null, Value::Int64(1), Value::from("x")];
        assert!(infer_type("c", &values).is_err());
    }

    #[test]
    fn test_infer_type_skips_leading_nulls() {
        let values = vec![Value::Null, Value::Int64(1), Value::Null];
        assert_eq!(infer_type("c", &values).unwrap(), DbType::Int64);
    }

    #[test]
    fn test_arrays_share_event_index() {
        let bindings = vec![
            ColumnBinding::new("level", EventField::Level),
            ColumnBinding::new("message", EventField::Message),
        ];
        let stmt =
            BatchStatement::build("INSERT", CommandKind::Text, &bindings, &events(2)).unwrap();

        assert_eq!(stmt.array_length(), 2);
        assert_eq!(stmt.columns()[0].values[1], Value::from("INFO"));
        assert_eq!(stmt.columns()[1].values[1], Value::from("event 1"));
    }

    #[test]
    fn test_duplicate_parameters() {
        let bindings = vec![
            ColumnBinding::new(":msg", EventField::Message),
            ColumnBinding::new("MSG", EventField::Message),
        ];
        let err =
            BatchStatement::build("INSERT", CommandKind::Text, &bindings, &events(1)).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
