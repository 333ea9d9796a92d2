//! Identifier validation for names that end up inside SQL text.
//!
//! Parameter names and stored procedure names are configuration, not data,
//! but backends render them into the statement they send. Only plain
//! identifiers are accepted.

use crate::error::Error;

/// Validate a SQL identifier (parameter, column, procedure segment).
///
/// - Must not be empty
/// - Maximum 128 characters
/// - Must start with ASCII letter or underscore
/// - May only contain ASCII alphanumeric characters, underscores and `$`
///
/// # Examples
///
/// ```
/// use rivven_logsink::security::validate_sql_identifier;
///
/// assert!(validate_sql_identifier("log_level").is_ok());
/// assert!(validate_sql_identifier("x; DROP TABLE logs--").is_err());
/// assert!(validate_sql_identifier("").is_err());
/// ```
pub fn validate_sql_identifier(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(Error::config("SQL identifier cannot be empty"));
    }

    if name.len() > 128 {
        return Err(Error::config(format!(
            "SQL identifier too long: {} chars (max 128)",
            name.len()
        )));
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => {
            return Err(Error::config(format!(
                "Invalid SQL identifier '{}': must start with a letter or underscore",
                name
            )));
        }
    }

    for c in chars {
        if !c.is_ascii_alphanumeric() && c != '_' && c != '$' {
            return Err(Error::config(format!(
                "Invalid SQL identifier '{}': contains invalid character '{}'",
                name, c
            )));
        }
    }

    Ok(())
}

/// Strip a driver bind prefix (`:`, `@` or `?`) from a parameter name.
///
/// ```
/// use rivven_logsink::security::bare_parameter_name;
///
/// assert_eq!(bare_parameter_name(":log_level"), "log_level");
/// assert_eq!(bare_parameter_name("@message"), "message");
/// assert_eq!(bare_parameter_name("logger"), "logger");
/// ```
pub fn bare_parameter_name(name: &str) -> &str {
    name.strip_prefix([':', '@', '?']).unwrap_or(name)
}

/// Validate a parameter name, ignoring a leading bind prefix.
pub fn validate_parameter_name(name: &str) -> crate::Result<()> {
    validate_sql_identifier(bare_parameter_name(name))
}

/// Validate a possibly qualified stored procedure name (`schema.pkg.proc`).
///
/// ```
/// use rivven_logsink::security::validate_procedure_name;
///
/// assert!(validate_procedure_name("audit.write_logs").is_ok());
/// assert!(validate_procedure_name("write_logs(1)").is_err());
/// assert!(validate_procedure_name("audit..write").is_err());
/// ```
pub fn validate_procedure_name(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(Error::config("stored procedure name cannot be empty"));
    }
    name.split('.').try_for_each(validate_sql_identifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(validate_sql_identifier("a").is_ok());
        assert!(validate_sql_identifier("_hidden").is_ok());
        assert!(validate_sql_identifier("SYS$LOG").is_ok());
        assert!(validate_sql_identifier(&"x".repeat(128)).is_ok());
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(validate_sql_identifier("1abc").is_err());
        assert!(validate_sql_identifier("a b").is_err());
        assert!(validate_sql_identifier("a'b").is_err());
        assert!(validate_sql_identifier(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_parameter_names() {
        assert!(validate_parameter_name(":log_date").is_ok());
        assert!(validate_parameter_name("@thread").is_ok());
        assert!(validate_parameter_name("::double").is_err());
    }
}
