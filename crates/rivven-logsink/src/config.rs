//! File-based sink configuration
//!
//! A YAML document describing one sink:
//!
//! ```yaml
//! connection_string_name: logging
//! connection_strings:
//!   logging: "host=${DB_HOST:-localhost} user=logger password=${DB_PASSWORD}"
//! command_text: >
//!   INSERT INTO app_log (log_date, log_level, message)
//!   SELECT * FROM UNNEST(:log_date, :log_level, :message)
//! buffer_size: 256
//! parameters:
//!   - name: log_date
//!     db_type: timestamp
//!     layout: timestamp
//!   - name: log_level
//!     size: 16
//!     layout: level
//!   - name: message
//!     layout: message
//! ```
//!
//! `${VAR}` and `${VAR:-default}` are expanded from the process environment
//! before parsing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use validator::Validate;

use crate::column::ColumnBinding;
use crate::error::{Error, Result};
use crate::layout::EventField;
use crate::resolver::{EnvironmentSettings, StaticSettings};
use crate::sink::{LogSinkBuilder, DEFAULT_BUFFER_SIZE};
use crate::statement::CommandKind;
use crate::types::{DbType, SensitiveString};

/// Pre-compiled regex for environment variable expansion
/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Configuration of one log sink
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LogSinkConfig {
    /// Explicit connection string
    #[serde(default)]
    pub connection_string: Option<SensitiveString>,

    /// Name of an entry in `connection_strings`
    #[serde(default)]
    pub connection_string_name: Option<String>,

    /// Key of an entry in `app_settings`, or of an environment variable
    /// when `app_settings` is empty
    #[serde(default)]
    pub app_settings_key: Option<String>,

    /// Statement text, or procedure name when `command_type` is
    /// `stored_procedure`
    #[validate(length(min = 1))]
    pub command_text: String,

    /// How `command_text` is interpreted
    #[serde(default)]
    pub command_type: CommandKind,

    /// Events buffered before a flush
    #[serde(default = "default_buffer_size")]
    #[validate(range(min = 1, max = 1_000_000))]
    pub buffer_size: usize,

    /// Return flush failures to the caller that triggered them
    #[serde(default)]
    pub rethrow_on_failure: bool,

    /// Background flush period in milliseconds
    #[serde(default)]
    #[validate(range(min = 1, max = 3_600_000))]
    pub flush_interval_ms: Option<u64>,

    /// Wrap each batch in a transaction
    #[serde(default)]
    pub use_transactions: bool,

    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    #[validate(range(min = 100, max = 600_000))]
    pub connect_timeout_ms: u64,

    /// Command timeout in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    #[validate(range(min = 100, max = 3_600_000))]
    pub command_timeout_ms: u64,

    /// Named connection strings
    #[serde(default)]
    pub connection_strings: HashMap<String, SensitiveString>,

    /// Application settings
    #[serde(default, skip_serializing)]
    pub app_settings: HashMap<String, String>,

    /// Statement parameters in bind order
    #[validate(length(min = 1), nested)]
    pub parameters: Vec<ParameterConfig>,
}

/// One statement parameter
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ParameterConfig {
    /// Parameter name, with or without bind prefix
    #[validate(length(min = 1, max = 129))]
    pub name: String,

    /// Declared type; inferred from the values when absent
    #[serde(default)]
    pub db_type: Option<DbType>,

    /// Numeric precision (0 = driver default)
    #[serde(default)]
    pub precision: u8,

    /// Numeric scale (0 = driver default)
    #[serde(default)]
    pub scale: u8,

    /// Parameter size (0 = driver default)
    #[serde(default)]
    pub size: u32,

    /// Event field rendered into the parameter
    #[validate(length(min = 1))]
    pub layout: String,
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_command_timeout_ms() -> u64 {
    30_000
}

impl ParameterConfig {
    /// Build the column binding
    pub fn to_binding(&self) -> Result<ColumnBinding> {
        let layout = EventField::parse(&self.layout)?;
        let mut binding = ColumnBinding::new(self.name.clone(), layout)
            .with_precision(self.precision)
            .with_scale(self.scale)
            .with_size(self.size);
        if let Some(db_type) = self.db_type {
            binding = binding.with_db_type(db_type);
        }
        Ok(binding)
    }
}

impl LogSinkConfig {
    /// Parse a YAML document after environment variable expansion
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = serde_yaml::from_str(&expanded)
            .map_err(|e| Error::config(format!("failed to parse sink config: {}", e)))?;
        config.check()?;
        Ok(config)
    }

    /// Read and parse a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Validate field ranges and parameter layouts
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| Error::config(format!("invalid sink config: {}", e)))?;
        for parameter in &self.parameters {
            EventField::parse(&parameter.layout)?;
        }
        Ok(())
    }

    /// Convert into a builder with settings attached.
    ///
    /// Settings come from `connection_strings` and `app_settings`; when no
    /// `app_settings` are configured, application settings are read from the
    /// process environment.
    pub fn into_builder(self) -> Result<LogSinkBuilder> {
        let columns = self
            .parameters
            .iter()
            .map(ParameterConfig::to_binding)
            .collect::<Result<Vec<_>>>()?;

        let mut builder = LogSinkBuilder::new()
            .command_text(self.command_text)
            .command_kind(self.command_type)
            .columns(columns)
            .buffer_size(self.buffer_size)
            .rethrow_on_failure(self.rethrow_on_failure)
            .use_transactions(self.use_transactions)
            .connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .command_timeout(Duration::from_millis(self.command_timeout_ms));

        if let Some(connection_string) = self.connection_string {
            builder = builder.connection_string(connection_string);
        }
        if let Some(name) = self.connection_string_name {
            builder = builder.connection_string_name(name);
        }
        if let Some(key) = self.app_settings_key {
            builder = builder.app_settings_key(key);
        }
        if let Some(ms) = self.flush_interval_ms {
            builder = builder.flush_interval(Duration::from_millis(ms));
        }

        let connection_strings = self
            .connection_strings
            .into_iter()
            .map(|(name, value)| (name, value.expose_secret().to_string()))
            .collect();

        builder = if self.app_settings.is_empty() {
            builder.settings(EnvironmentSettings::new(connection_strings))
        } else {
            builder.settings(StaticSettings::from_maps(connection_strings, self.app_settings))
        };

        Ok(builder)
    }
}

/// Expand environment variables in the format ${VAR} or ${VAR:-default}
fn expand_env_vars(content: &str) -> String {
    ENV_VAR_REGEX
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str());

            std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
command_text: "INSERT INTO logs (msg) VALUES (:msg)"
parameters:
  - name: msg
    layout: message
"#;

    #[test]
    fn test_defaults() {
        let config = LogSinkConfig::from_yaml_str(MINIMAL).unwrap();

        assert_eq!(config.buffer_size, 512);
        assert_eq!(config.command_type, CommandKind::Text);
        assert!(!config.rethrow_on_failure);
        assert!(!config.use_transactions);
        assert_eq!(config.flush_interval_ms, None);
        assert_eq!(config.parameters.len(), 1);
    }

    #[test]
    fn test_expand_default_value() {
        let expanded = expand_env_vars("a: ${RIVVEN_LOGSINK_SURELY_UNSET_VAR:-fallback}");
        assert_eq!(expanded, "a: fallback");
    }

    #[test]
    fn test_rejects_zero_buffer() {
        let yaml = format!("{}buffer_size: 0\n", MINIMAL);
        assert!(LogSinkConfig::from_yaml_str(&yaml).is_err());
    }

    #[test]
    fn test_rejects_unknown_layout() {
        let yaml = r#"
command_text: "INSERT INTO logs (msg) VALUES (:msg)"
parameters:
  - name: msg
    layout: thread_id
"#;
        let err = LogSinkConfig::from_yaml_str(yaml).unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Configuration);
    }

    #[test]
    fn test_parameter_binding() {
        let parameter = ParameterConfig {
            name: ":amount".into(),
            db_type: Some(DbType::Decimal),
            precision: 18,
            scale: 2,
            size: 0,
            layout: "field:amount".into(),
        };

        let binding = parameter.to_binding().unwrap();
        assert_eq!(binding.bare_name(), "amount");
        assert_eq!(binding.db_type(), Some(DbType::Decimal));
        assert_eq!(binding.precision(), Some(18));
        assert_eq!(binding.scale(), Some(2));
        assert_eq!(binding.size(), None);
    }
}
