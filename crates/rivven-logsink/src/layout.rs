//! Layouts turn one event into one column value
//!
//! A layout must be pure: it reads the event and never mutates it. Returning
//! `None` binds a NULL for that event.

use crate::error::{Error, Result};
use crate::event::LogEvent;
use crate::types::Value;

/// Formats a single event into a single scalar value
pub trait Layout: Send + Sync {
    /// Extract the value for `event`; `None` means NULL
    fn format(&self, event: &LogEvent) -> Option<Value>;
}

impl<F> Layout for F
where
    F: Fn(&LogEvent) -> Option<Value> + Send + Sync,
{
    fn format(&self, event: &LogEvent) -> Option<Value> {
        self(event)
    }
}

/// Built-in layouts addressing the standard parts of a [`LogEvent`]
#[derive(Debug, Clone, PartialEq)]
pub enum EventField {
    /// Event timestamp (TIMESTAMPTZ)
    Timestamp,
    /// Level name, e.g. `INFO`
    Level,
    /// Logger name
    Target,
    /// Rendered message
    Message,
    /// A structured field by name; NULL when absent
    Field(String),
    /// A constant value bound for every event
    Literal(Value),
}

impl EventField {
    /// Parse a layout spec.
    ///
    /// Accepted forms: `timestamp`, `level`, `target` (or `logger`),
    /// `message`, `field:<name>` and `literal:<text>`.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if let Some(name) = spec.strip_prefix("field:") {
            if name.is_empty() {
                return Err(Error::config("layout 'field:' requires a field name"));
            }
            return Ok(Self::Field(name.to_string()));
        }
        if let Some(text) = spec.strip_prefix("literal:") {
            return Ok(Self::Literal(Value::from(text)));
        }

        match spec.to_ascii_lowercase().as_str() {
            "timestamp" | "date" => Ok(Self::Timestamp),
            "level" => Ok(Self::Level),
            "target" | "logger" => Ok(Self::Target),
            "message" => Ok(Self::Message),
            other => Err(Error::config(format!("unknown layout '{}'", other))),
        }
    }
}

impl Layout for EventField {
    fn format(&self, event: &LogEvent) -> Option<Value> {
        match self {
            Self::Timestamp => Some(Value::DateTimeTz(event.timestamp)),
            Self::Level => Some(Value::from(event.level.as_str())),
            Self::Target => Some(Value::from(event.target.as_str())),
            Self::Message => Some(Value::from(event.message.as_str())),
            Self::Field(name) => event.field(name).cloned(),
            Self::Literal(value) => Some(value.clone()),
        }
    }
}
