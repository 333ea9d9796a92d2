//! Column bindings: how one event maps to one statement parameter

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::event::LogEvent;
use crate::layout::Layout;
use crate::security::{bare_parameter_name, validate_parameter_name};
use crate::types::{DbType, Value};

/// One output column of the batch statement.
///
/// Bindings are built once when the sink is activated and are immutable
/// afterwards. `precision`, `scale` and `size` use zero for "driver default".
#[derive(Clone)]
pub struct ColumnBinding {
    name: String,
    db_type: Option<DbType>,
    precision: u8,
    scale: u8,
    size: u32,
    layout: Arc<dyn Layout>,
}

impl ColumnBinding {
    /// Create a binding whose type is inferred from the bound values
    pub fn new(name: impl Into<String>, layout: impl Layout + 'static) -> Self {
        Self {
            name: name.into(),
            db_type: None,
            precision: 0,
            scale: 0,
            size: 0,
            layout: Arc::new(layout),
        }
    }

    /// Create a binding from an already shared layout
    pub fn with_shared_layout(name: impl Into<String>, layout: Arc<dyn Layout>) -> Self {
        Self {
            name: name.into(),
            db_type: None,
            precision: 0,
            scale: 0,
            size: 0,
            layout,
        }
    }

    /// Declare the column type explicitly; values are coerced to it
    pub fn with_db_type(mut self, db_type: DbType) -> Self {
        self.db_type = Some(db_type);
        self
    }

    /// Set numeric precision (0 = driver default)
    pub fn with_precision(mut self, precision: u8) -> Self {
        self.precision = precision;
        self
    }

    /// Set numeric scale (0 = driver default)
    pub fn with_scale(mut self, scale: u8) -> Self {
        self.scale = scale;
        self
    }

    /// Set parameter size (0 = driver default)
    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    /// Parameter name as configured, including any bind prefix
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter name without its bind prefix
    pub fn bare_name(&self) -> &str {
        bare_parameter_name(&self.name)
    }

    /// Declared type, if any
    pub fn db_type(&self) -> Option<DbType> {
        self.db_type
    }

    /// Precision to apply, `None` when the driver default should be used
    pub fn precision(&self) -> Option<u8> {
        (self.precision != 0).then_some(self.precision)
    }

    /// Scale to apply, `None` when the driver default should be used
    pub fn scale(&self) -> Option<u8> {
        (self.scale != 0).then_some(self.scale)
    }

    /// Size to apply, `None` when the driver default should be used
    pub fn size(&self) -> Option<u32> {
        (self.size != 0).then_some(self.size)
    }

    /// Check the parameter name
    pub fn validate(&self) -> Result<()> {
        validate_parameter_name(&self.name)
    }

    /// Extract this column's value for `event`.
    ///
    /// An absent value becomes `Value::Null`. With a declared type the value
    /// is coerced to it.
    pub fn bind(&self, event: &LogEvent) -> Result<Value> {
        let value = self.layout.format(event).unwrap_or(Value::Null);
        match self.db_type {
            Some(db_type) => db_type.coerce(&self.name, value),
            None => Ok(value),
        }
    }
}

impl fmt::Debug for ColumnBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnBinding")
            .field("name", &self.name)
            .field("db_type", &self.db_type)
            .field("precision", &self.precision)
            .field("scale", &self.scale)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Level;
    use crate::layout::EventField;

    #[test]
    fn test_zero_means_driver_default() {
        let binding = ColumnBinding::new("amount", EventField::Field("amount".into()))
            .with_db_type(DbType::Decimal)
            .with_precision(10)
            .with_scale(0);

        assert_eq!(binding.precision(), Some(10));
        assert_eq!(binding.scale(), None);
        assert_eq!(binding.size(), None);
    }

    #[test]
    fn test_bind_absent_is_null() {
        let binding = ColumnBinding::new("user", EventField::Field("user".into()));
        let event = LogEvent::new(Level::Info, "t", "m");

        assert_eq!(binding.bind(&event).unwrap(), Value::Null);
    }

    #[test]
    fn test_bind_coerces_declared_type() {
        let binding = ColumnBinding::new(":code", EventField::Field("code".into()))
            .with_db_type(DbType::Int32);
        let event = LogEvent::new(Level::Error, "t", "m").with_field("code", "404");

        assert_eq!(binding.bind(&event).unwrap(), Value::Int32(404));
        assert_eq!(binding.bare_name(), "code");
    }

    #[test]
    fn test_bind_does_not_mutate_event() {
        let binding = ColumnBinding::new("msg", EventField::Message);
        let event = LogEvent::new(Level::Info, "t", "unchanged");
        let before = event.clone();

        binding.bind(&event).unwrap();
        assert_eq!(event, before);
    }
}
