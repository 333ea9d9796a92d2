//! Value types for rivven-logsink
//!
//! - `Value`: a single bound parameter value, including the typed SQL NULL
//! - `DbType`: the column type a parameter array is bound as
//! - `SensitiveString`: connection strings that must never reach the logs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// SQL value produced by a layout and bound into a column array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean value
    Bool(bool),
    /// 16-bit signed integer (SMALLINT)
    Int16(i16),
    /// 32-bit signed integer (INTEGER)
    Int32(i32),
    /// 64-bit signed integer (BIGINT)
    Int64(i64),
    /// 64-bit floating point (DOUBLE PRECISION)
    Float64(f64),
    /// Arbitrary precision decimal (NUMERIC, DECIMAL)
    Decimal(Decimal),
    /// Text string (VARCHAR, TEXT)
    String(String),
    /// Binary data (BYTEA, BLOB, RAW)
    Bytes(Vec<u8>),
    /// Timestamp with timezone (TIMESTAMPTZ)
    DateTimeTz(DateTime<Utc>),
    /// UUID
    Uuid(Uuid),
    /// JSON value
    Json(serde_json::Value),
}

impl Value {
    /// Check if value is NULL
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get SQL type name
    pub fn sql_type(&self) -> &'static str {
        match DbType::of(self) {
            Some(db_type) => db_type.sql_type(),
            None => "NULL",
        }
    }

    /// Try to convert to bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int16(n) => Some(*n != 0),
            Self::Int32(n) => Some(*n != 0),
            Self::Int64(n) => Some(*n != 0),
            Self::String(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => Some(true),
                "false" | "f" | "no" | "n" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int16(n) => Some(i64::from(*n)),
            Self::Int32(n) => Some(i64::from(*n)),
            Self::Int64(n) => Some(*n),
            Self::Float64(n) => {
                // i64::MAX as f64 rounds up to 2^63, which is out of range
                if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n < i64::MAX as f64 {
                    Some(*n as i64)
                } else {
                    None
                }
            }
            Self::Decimal(d) if d.fract().is_zero() => d.to_string().parse().ok(),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int16(n) => Some(f64::from(*n)),
            Self::Int32(n) => Some(f64::from(*n)),
            Self::Int64(n) => Some(*n as f64),
            Self::Float64(n) => Some(*n),
            Self::Decimal(d) => d.to_string().parse().ok(),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Try to convert to UUID
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(u) => Some(*u),
            Self::String(s) => Uuid::parse_str(s).ok(),
            Self::Bytes(b) if b.len() == 16 => Uuid::from_slice(b).ok(),
            _ => None,
        }
    }

    /// Convert to owned string representation
    pub fn as_string(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::String(s) => Some(s.clone()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Int16(n) => Some(n.to_string()),
            Self::Int32(n) => Some(n.to_string()),
            Self::Int64(n) => Some(n.to_string()),
            Self::Float64(n) => Some(n.to_string()),
            Self::Decimal(d) => Some(d.to_string()),
            Self::DateTimeTz(dt) => Some(dt.to_rfc3339()),
            Self::Uuid(u) => Some(u.to_string()),
            Self::Json(j) => Some(j.to_string()),
            Self::Bytes(b) => String::from_utf8(b.clone()).ok(),
        }
    }

    /// Convert to a JSON value
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::from(*b),
            Self::Int16(n) => serde_json::Value::from(*n),
            Self::Int32(n) => serde_json::Value::from(*n),
            Self::Int64(n) => serde_json::Value::from(*n),
            Self::Float64(n) => serde_json::Value::from(*n),
            Self::Json(j) => j.clone(),
            Self::Bytes(b) => serde_json::Value::from(b.clone()),
            other => other
                .as_string()
                .map(serde_json::Value::from)
                .unwrap_or(serde_json::Value::Null),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Self::Int16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTimeTz(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Self::Null,
        }
    }
}

/// Column type a parameter array is bound as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbType {
    /// BOOLEAN
    Boolean,
    /// SMALLINT
    Int16,
    /// INTEGER
    Int32,
    /// BIGINT
    Int64,
    /// DOUBLE PRECISION
    Double,
    /// NUMERIC / DECIMAL (honors precision and scale)
    Decimal,
    /// VARCHAR / TEXT (honors size)
    String,
    /// BYTEA / RAW (honors size)
    Binary,
    /// TIMESTAMP WITH TIME ZONE
    Timestamp,
    /// UUID
    Guid,
    /// JSON / JSONB
    Json,
}

impl DbType {
    /// Type an untyped column falls back to when every value is NULL
    pub const UNTYPED_NULL_DEFAULT: DbType = DbType::String;

    /// Infer the column type of a runtime value; `None` for NULL
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(Self::Boolean),
            Value::Int16(_) => Some(Self::Int16),
            Value::Int32(_) => Some(Self::Int32),
            Value::Int64(_) => Some(Self::Int64),
            Value::Float64(_) => Some(Self::Double),
            Value::Decimal(_) => Some(Self::Decimal),
            Value::String(_) => Some(Self::String),
            Value::Bytes(_) => Some(Self::Binary),
            Value::DateTimeTz(_) => Some(Self::Timestamp),
            Value::Uuid(_) => Some(Self::Guid),
            Value::Json(_) => Some(Self::Json),
        }
    }

    /// Get SQL type name
    pub const fn sql_type(self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::Int16 => "SMALLINT",
            Self::Int32 => "INTEGER",
            Self::Int64 => "BIGINT",
            Self::Double => "DOUBLE PRECISION",
            Self::Decimal => "DECIMAL",
            Self::String => "VARCHAR",
            Self::Binary => "BYTEA",
            Self::Timestamp => "TIMESTAMPTZ",
            Self::Guid => "UUID",
            Self::Json => "JSONB",
        }
    }

    /// Whether precision/scale apply to this type
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Decimal)
    }

    /// Whether a size limit applies to this type
    pub const fn is_sized(self) -> bool {
        matches!(self, Self::String | Self::Binary)
    }

    /// Convert `value` into this type. NULL stays NULL.
    pub fn coerce(self, column: &str, value: Value) -> Result<Value> {
        if value.is_null() || DbType::of(&value) == Some(self) {
            return Ok(value);
        }

        let mismatch = |value: &Value| {
            Error::type_conversion(
                column,
                format!("cannot bind {} as {}", value.sql_type(), self.sql_type()),
            )
        };

        let coerced = match self {
            Self::Boolean => value.as_bool().map(Value::Bool),
            Self::Int16 => value
                .as_i64()
                .and_then(|n| i16::try_from(n).ok())
                .map(Value::Int16),
            Self::Int32 => value
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .map(Value::Int32),
            Self::Int64 => value.as_i64().map(Value::Int64),
            Self::Double => value.as_f64().map(Value::Float64),
            Self::Decimal => match &value {
                Value::Int16(n) => Some(Decimal::from(*n)),
                Value::Int32(n) => Some(Decimal::from(*n)),
                Value::Int64(n) => Some(Decimal::from(*n)),
                Value::Float64(n) => Decimal::from_f64_retain(*n),
                Value::String(s) => s.trim().parse::<Decimal>().ok(),
                _ => None,
            }
            .map(Value::Decimal),
            Self::String => value.as_string().map(Value::String),
            Self::Binary => match &value {
                Value::String(s) => Some(Value::Bytes(s.as_bytes().to_vec())),
                _ => None,
            },
            Self::Timestamp => match &value {
                Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
                    .ok()
                    .map(|dt| Value::DateTimeTz(dt.with_timezone(&Utc))),
                _ => None,
            },
            Self::Guid => value.as_uuid().map(Value::Uuid),
            Self::Json => Some(Value::Json(value.to_json())),
        };

        coerced.ok_or_else(|| mismatch(&value))
    }
}

impl std::fmt::Display for DbType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sql_type())
    }
}

/// A string that must not be logged, such as a connection string with
/// embedded credentials.
///
/// ```rust
/// use rivven_logsink::types::SensitiveString;
///
/// let secret = SensitiveString::new("User Id=scott;Password=tiger");
/// assert_eq!(format!("{:?}", secret), "[REDACTED]");
/// assert!(secret.expose_secret().contains("tiger"));
/// ```
#[derive(Clone)]
pub struct SensitiveString(SecretString);

impl SensitiveString {
    /// Create a new sensitive string from any string-like value
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::new(value.into().into_boxed_str()))
    }

    /// Expose the secret value.
    ///
    /// Use sparingly - only when handing the value to the driver.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    /// Whether the wrapped value is empty
    pub fn is_empty(&self) -> bool {
        self.expose_secret().is_empty()
    }
}

impl Default for SensitiveString {
    fn default() -> Self {
        Self::new("")
    }
}

impl std::fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<String> for SensitiveString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SensitiveString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Serialize as redacted to prevent accidental exposure in config dumps/logs
impl Serialize for SensitiveString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("***REDACTED***")
    }
}

impl<'de> Deserialize<'de> for SensitiveString {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}
