// Input validation utilities

use regex::Regex;

use crate::error::ConfigError;

/// Validate a single SQL Server identifier (schema or table name) and return it bracket-quoted.
///
/// Only letters, digits and underscore are allowed; the journal DDL interpolates these names,
/// so anything else is rejected rather than escaped.
pub fn validate_sql_identifier(name: &str) -> Result<String, ConfigError> {
    let s = name.trim().trim_matches(['[', ']']);
    if s.is_empty() || s.len() > 128 {
        return Err(ConfigError::InvalidIdentifier(name.to_string()));
    }

    let ident_re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")
        .map_err(|_| ConfigError::InvalidIdentifier(name.to_string()))?;
    if !ident_re.is_match(s) {
        return Err(ConfigError::InvalidIdentifier(name.to_string()));
    }

    Ok(format!("[{}]", s))
}

/// Validate connection string format (basic)
pub fn validate_connection_string(conn_str: &str) -> Result<(), ConfigError> {
    if conn_str.trim().is_empty() {
        return Err(ConfigError::EmptyConnectionString);
    }

    // Parsing happens when the driver builds its config.
    Ok(())
}
