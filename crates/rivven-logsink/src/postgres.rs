//! PostgreSQL backend
//!
//! Realizes array binding by sending one typed SQL array per column in a
//! single execute. Named placeholders (`:name` or `@name`) in the command
//! text are rewritten to positional array parameters, so a statement such as
//!
//! ```sql
//! INSERT INTO app_log (log_date, log_level, message)
//! SELECT * FROM UNNEST(:log_date, :log_level, :message)
//! ```
//!
//! becomes `UNNEST($1::timestamptz[], $2::text[], $3::text[])`. A declared
//! precision renders `numeric(p,s)[]` and a string size `varchar(n)[]`. Stored
//! procedures are invoked with `CALL name($1::..[], ...)`.

use async_trait::async_trait;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::types::ToSql;
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType, Transaction};
use crate::error::{Error, Result};
use crate::statement::{BatchStatement, ColumnArray, CommandKind};
use crate::types::{DbType, Value};

type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// PostgreSQL element type for a column type
fn pg_element_type(db_type: DbType) -> &'static str {
    match db_type {
        DbType::Boolean => "boolean",
        DbType::Int16 => "smallint",
        DbType::Int32 => "integer",
        DbType::Int64 => "bigint",
        DbType::Double => "double precision",
        DbType::Decimal => "numeric",
        DbType::String => "text",
        DbType::Binary => "bytea",
        DbType::Timestamp => "timestamptz",
        DbType::Guid => "uuid",
        DbType::Json => "jsonb",
    }
}

/// PostgreSQL array cast for a column, carrying its precision, scale and
/// size. `bytea` takes no length modifier, so a binary size is not rendered.
fn pg_array_type(column: &ColumnArray) -> String {
    let db_type = column.db_type;
    if db_type.is_numeric() {
        return match (column.precision, column.scale) {
            (Some(p), Some(s)) => format!("numeric({},{})[]", p, s),
            (Some(p), None) => format!("numeric({})[]", p),
            _ => "numeric[]".to_string(),
        };
    }
    if let (true, Some(size)) = (db_type.is_sized(), column.size) {
        if db_type == DbType::String {
            return format!("varchar({})[]", size);
        }
    }
    format!("{}[]", pg_element_type(db_type))
}

fn collect<T>(
    column: &ColumnArray,
    convert: impl Fn(&Value) -> Option<T>,
) -> Result<Vec<Option<T>>> {
    column
        .values
        .iter()
        .map(|value| match value {
            Value::Null => Ok(None),
            other => convert(other).map(Some).ok_or_else(|| {
                Error::type_conversion(
                    &column.name,
                    format!("cannot bind {} as {}", other.sql_type(), column.db_type),
                )
            }),
        })
        .collect()
}

/// Convert a column array to a tokio-postgres array parameter
fn column_to_sql(column: &ColumnArray) -> Result<BoxedParam> {
    let param: BoxedParam = match column.db_type {
        DbType::Boolean => Box::new(collect(column, Value::as_bool)?),
        DbType::Int16 => Box::new(collect(column, |v| {
            v.as_i64().and_then(|n| i16::try_from(n).ok())
        })?),
        DbType::Int32 => Box::new(collect(column, |v| {
            v.as_i64().and_then(|n| i32::try_from(n).ok())
        })?),
        DbType::Int64 => Box::new(collect(column, Value::as_i64)?),
        DbType::Double => Box::new(collect(column, Value::as_f64)?),
        DbType::Decimal => Box::new(collect(column, |v| match v {
            Value::Decimal(d) => Some(*d),
            _ => None,
        })?),
        DbType::String => Box::new(collect(column, Value::as_string)?),
        DbType::Binary => Box::new(collect(column, |v| match v {
            Value::Bytes(b) => Some(b.clone()),
            _ => None,
        })?),
        DbType::Timestamp => Box::new(collect(column, |v| match v {
            Value::DateTimeTz(dt) => Some(*dt),
            _ => None,
        })?),
        DbType::Guid => Box::new(collect(column, Value::as_uuid)?),
        DbType::Json => Box::new(collect(column, |v| Some(v.to_json()))?),
    };
    Ok(param)
}

/// Rewrite named placeholders to typed positional array parameters.
///
/// Quoted literals, quoted identifiers and `::` casts are left alone.
/// Placeholders that match no column are kept verbatim.
fn rewrite_placeholders(sql: &str, columns: &[ColumnArray]) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len() + columns.len() * 12);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                out.push(c);
                i += 1;
                while i < chars.len() {
                    out.push(chars[i]);
                    i += 1;
                    if chars[i - 1] == c {
                        break;
                    }
                }
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                out.push_str("::");
                i += 2;
            }
            ':' | '@' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                let position = columns
                    .iter()
                    .position(|col| !name.is_empty() && col.name.eq_ignore_ascii_case(&name));

                match position {
                    Some(idx) => {
                        out.push_str(&format!(
                            "${}::{}",
                            idx + 1,
                            pg_array_type(&columns[idx])
                        ));
                        i = end;
                    }
                    None => {
                        out.push(c);
                        i += 1;
                    }
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// SQL sent for a batch statement
fn render_sql(statement: &BatchStatement) -> String {
    match statement.command_kind() {
        CommandKind::Text => rewrite_placeholders(statement.command_text(), statement.columns()),
        CommandKind::StoredProcedure => {
            let args = statement
                .columns()
                .iter()
                .enumerate()
                .map(|(idx, col)| format!("${}::{}", idx + 1, pg_array_type(col)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("CALL {}({})", statement.command_text(), args)
        }
    }
}

async fn execute_batch(
    client: &tokio_postgres::Client,
    statement: &BatchStatement,
    command_timeout: Option<Duration>,
) -> Result<u64> {
    let sql = render_sql(statement);
    let boxed_params = statement
        .columns()
        .iter()
        .map(column_to_sql)
        .collect::<Result<Vec<_>>>()?;

    let param_refs: Vec<&(dyn ToSql + Sync)> = boxed_params
        .iter()
        .map(|b| b.as_ref() as &(dyn ToSql + Sync))
        .collect();

    let execute = client.execute(sql.as_str(), &param_refs);
    let affected = match command_timeout {
        Some(timeout) => tokio::time::timeout(timeout, execute)
            .await
            .map_err(|_| Error::timeout(format!("batch execute exceeded {:?}", timeout)))?,
        None => execute.await,
    }
    .map_err(|e| Error::execution_with_sql(e.to_string(), sql.as_str()))?;

    debug!(
        rows = affected,
        array_length = statement.array_length(),
        "PostgreSQL batch executed"
    );
    Ok(affected)
}

/// PostgreSQL connection
pub struct PgConnection {
    client: Arc<tokio_postgres::Client>,
    command_timeout: Option<Duration>,
    closed: AtomicBool,
}

impl PgConnection {
    fn new(client: tokio_postgres::Client, command_timeout: Option<Duration>) -> Self {
        Self {
            client: Arc::new(client),
            command_timeout,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn execute(&self, statement: &BatchStatement) -> Result<u64> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::connection("connection is closed"));
        }
        execute_batch(&self.client, statement, self.command_timeout).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::connection("connection is closed"));
        }

        self.client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| Error::execution_with_source("failed to begin transaction", e))?;

        Ok(Box::new(PgTransaction {
            client: Arc::clone(&self.client),
            command_timeout: self.command_timeout,
        }))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// PostgreSQL transaction
pub struct PgTransaction {
    client: Arc<tokio_postgres::Client>,
    command_timeout: Option<Duration>,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn execute(&self, statement: &BatchStatement) -> Result<u64> {
        execute_batch(&self.client, statement, self.command_timeout).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.client
            .batch_execute("COMMIT")
            .await
            .map_err(|e| Error::execution_with_source("failed to commit transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.client
            .batch_execute("ROLLBACK")
            .await
            .map_err(|e| Error::execution_with_source("failed to rollback transaction", e))
    }
}

/// PostgreSQL connection factory
#[derive(Debug, Clone, Default)]
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let mut pg_config = tokio_postgres::Config::from_str(config.connection_string.expose_secret())
            .map_err(|e| Error::connection_with_source("invalid connection string", e))?;
        if config.connect_timeout_ms > 0 {
            pg_config.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
        }
        if let Some(name) = &config.application_name {
            pg_config.application_name(name);
        }

        let (client, connection) = pg_config
            .connect(tokio_postgres::NoTls)
            .await
            .map_err(|e| Error::connection_with_source("failed to connect", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "PostgreSQL connection error");
            }
        });

        let command_timeout =
            (config.command_timeout_ms > 0).then(|| Duration::from_millis(config.command_timeout_ms));
        Ok(Box::new(PgConnection::new(client, command_timeout)))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnBinding;
    use crate::event::{Level, LogEvent};
    use crate::layout::EventField;
    use rust_decimal::Decimal;

    fn statement(command_text: &str, kind: CommandKind) -> BatchStatement {
        BatchStatement::build(
            command_text,
            kind,
            &[
                ColumnBinding::new(":log_date", EventField::Timestamp),
                ColumnBinding::new(":log_level", EventField::Level),
                ColumnBinding::new(":attempt", EventField::Field("attempt".into())),
            ],
            &[
                LogEvent::new(Level::Info, "app", "a").with_field("attempt", 1i64),
                LogEvent::new(Level::Warn, "app", "b"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_rewrite_named_placeholders() {
        let stmt = statement(
            "INSERT INTO app_log SELECT * FROM UNNEST(:log_date, :log_level, @attempt)",
            CommandKind::Text,
        );

        assert_eq!(
            render_sql(&stmt),
            "INSERT INTO app_log SELECT * FROM UNNEST($1::timestamptz[], $2::text[], $3::bigint[])"
        );
    }

    #[test]
    fn test_rewrite_skips_casts_and_literals() {
        let stmt = statement(
            "SELECT ':log_level', x::text FROM UNNEST(:LOG_LEVEL) x WHERE :other",
            CommandKind::Text,
        );

        assert_eq!(
            render_sql(&stmt),
            "SELECT ':log_level', x::text FROM UNNEST($2::text[]) x WHERE :other"
        );
    }

    #[test]
    fn test_stored_procedure_call() {
        let stmt = statement("logging.write_batch", CommandKind::StoredProcedure);

        assert_eq!(
            render_sql(&stmt),
            "CALL logging.write_batch($1::timestamptz[], $2::text[], $3::bigint[])"
        );
    }

    #[test]
    fn test_column_to_sql_handles_nulls() {
        let stmt = statement("x", CommandKind::Text);
        for column in stmt.columns() {
            assert!(column_to_sql(column).is_ok());
        }
        assert_eq!(stmt.column("attempt").unwrap().null_count(), 1);
    }

    #[test]
    fn test_casts_carry_precision_and_size() {
        let stmt = BatchStatement::build(
            "INSERT INTO billing_log SELECT * FROM UNNEST(:amount, :log_level, :fee)",
            CommandKind::Text,
            &[
                ColumnBinding::new("amount", EventField::Field("amount".into()))
                    .with_db_type(DbType::Decimal)
                    .with_precision(10)
                    .with_scale(2),
                ColumnBinding::new("log_level", EventField::Level).with_size(16),
                ColumnBinding::new("fee", EventField::Field("fee".into()))
                    .with_db_type(DbType::Decimal)
                    .with_precision(12),
            ],
            &[LogEvent::new(Level::Info, "billing", "charged")
                .with_field("amount", Decimal::new(1999, 2))
                .with_field("fee", Decimal::new(3, 0))],
        )
        .unwrap();

        assert_eq!(
            render_sql(&stmt),
            "INSERT INTO billing_log SELECT * FROM \
             UNNEST($1::numeric(10,2)[], $2::varchar(16)[], $3::numeric(12)[])"
        );
    }
}
