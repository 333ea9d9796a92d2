//! Connection string resolution
//!
//! Sources are tried in a fixed order and the first configured one wins:
//!
//! 1. an explicit connection string
//! 2. a named entry in the connection-string settings
//! 3. an application setting key
//!
//! A source that is configured but cannot be found is an error. It never
//! falls through to the next source, so a typo in a setting name fails at
//! activation instead of silently writing somewhere else.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::types::SensitiveString;

/// Lookup of named connection strings and application settings
pub trait SettingsSource: Send + Sync {
    /// Find a connection string by name
    fn connection_string(&self, name: &str) -> Option<String>;

    /// Find an application setting by key
    fn app_setting(&self, key: &str) -> Option<String>;
}

/// In-memory settings, typically loaded from the sink config file
#[derive(Clone, Default)]
pub struct StaticSettings {
    connection_strings: HashMap<String, String>,
    app_settings: HashMap<String, String>,
}

impl StaticSettings {
    /// Create empty settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create settings from existing maps
    pub fn from_maps(
        connection_strings: HashMap<String, String>,
        app_settings: HashMap<String, String>,
    ) -> Self {
        Self {
            connection_strings,
            app_settings,
        }
    }

    /// Add a named connection string
    pub fn with_connection_string(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.connection_strings.insert(name.into(), value.into());
        self
    }

    /// Add an application setting
    pub fn with_app_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.app_settings.insert(key.into(), value.into());
        self
    }
}

impl SettingsSource for StaticSettings {
    fn connection_string(&self, name: &str) -> Option<String> {
        self.connection_strings.get(name).cloned()
    }

    fn app_setting(&self, key: &str) -> Option<String> {
        self.app_settings.get(key).cloned()
    }
}

impl fmt::Debug for StaticSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // values may carry credentials
        f.debug_struct("StaticSettings")
            .field("connection_strings", &self.connection_strings.keys().collect::<Vec<_>>())
            .field("app_settings", &self.app_settings.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Named connection strings from a map, application settings from the
/// process environment
#[derive(Clone, Default)]
pub struct EnvironmentSettings {
    connection_strings: HashMap<String, String>,
}

impl EnvironmentSettings {
    /// Create settings with the given named connection strings
    pub fn new(connection_strings: HashMap<String, String>) -> Self {
        Self { connection_strings }
    }
}

impl SettingsSource for EnvironmentSettings {
    fn connection_string(&self, name: &str) -> Option<String> {
        self.connection_strings.get(name).cloned()
    }

    fn app_setting(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl fmt::Debug for EnvironmentSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentSettings")
            .field("connection_strings", &self.connection_strings.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The configured connection string sources
#[derive(Debug, Clone, Default)]
pub struct ConnectionStringSources {
    /// Explicit connection string
    pub connection_string: Option<SensitiveString>,
    /// Name to look up in the connection-string settings
    pub connection_string_name: Option<String>,
    /// Key to look up in the application settings
    pub app_settings_key: Option<String>,
}

impl ConnectionStringSources {
    /// Use an explicit connection string
    pub fn explicit(connection_string: impl Into<SensitiveString>) -> Self {
        Self {
            connection_string: Some(connection_string.into()),
            ..Default::default()
        }
    }

    /// Use a named connection string
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            connection_string_name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Use an application setting
    pub fn app_setting(key: impl Into<String>) -> Self {
        Self {
            app_settings_key: Some(key.into()),
            ..Default::default()
        }
    }

    /// Whether any source is configured
    pub fn is_configured(&self) -> bool {
        non_empty(self.connection_string.as_ref().map(SensitiveString::expose_secret)).is_some()
            || non_empty(self.connection_string_name.as_deref()).is_some()
            || non_empty(self.app_settings_key.as_deref()).is_some()
    }
}

/// Where a resolved connection string came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStringContext {
    /// The explicit connection string
    ConnectionString,
    /// A named connection-string setting
    ConnectionStringName(String),
    /// An application setting
    AppSettingsKey(String),
    /// No source was configured
    Unresolved,
}

impl fmt::Display for ConnectionStringContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionString => write!(f, "ConnectionString"),
            Self::ConnectionStringName(name) => write!(f, "ConnectionStringName[{}]", name),
            Self::AppSettingsKey(key) => write!(f, "AppSettingsKey[{}]", key),
            Self::Unresolved => write!(f, "Unresolved"),
        }
    }
}

/// A connection string together with its origin
#[derive(Debug, Clone)]
pub struct ResolvedConnectionString {
    /// The connection string; empty when unresolved
    pub value: SensitiveString,
    /// Where it came from
    pub context: ConnectionStringContext,
}

impl ResolvedConnectionString {
    /// Whether no source was configured
    pub fn is_unresolved(&self) -> bool {
        self.context == ConnectionStringContext::Unresolved
    }
}

/// Resolve the effective connection string.
///
/// Returns a configuration error when a named setting or application setting
/// is configured but missing.
pub fn resolve_connection_string(
    sources: &ConnectionStringSources,
    settings: &dyn SettingsSource,
) -> Result<ResolvedConnectionString> {
    if let Some(explicit) = sources
        .connection_string
        .as_ref()
        .filter(|s| !s.is_empty())
    {
        return Ok(ResolvedConnectionString {
            value: explicit.clone(),
            context: ConnectionStringContext::ConnectionString,
        });
    }

    if let Some(name) = non_empty(sources.connection_string_name.as_deref()) {
        return match settings.connection_string(name) {
            Some(value) => Ok(ResolvedConnectionString {
                value: SensitiveString::new(value),
                context: ConnectionStringContext::ConnectionStringName(name.to_string()),
            }),
            None => Err(Error::config(format!(
                "unable to find connection string named [{}]",
                name
            ))),
        };
    }

    if let Some(key) = non_empty(sources.app_settings_key.as_deref()) {
        return match settings.app_setting(key).filter(|v| !v.is_empty()) {
            Some(value) => Ok(ResolvedConnectionString {
                value: SensitiveString::new(value),
                context: ConnectionStringContext::AppSettingsKey(key.to_string()),
            }),
            None => Err(Error::config(format!(
                "unable to find application setting [{}]",
                key
            ))),
        };
    }

    Ok(ResolvedConnectionString {
        value: SensitiveString::default(),
        context: ConnectionStringContext::Unresolved,
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
