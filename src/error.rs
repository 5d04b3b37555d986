use std::fmt;

use thiserror::Error;

/// A single structural problem found while validating a model reply
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaViolation {
    /// Field the violation refers to
    pub field: String,

    /// What is wrong with it
    pub reason: String,

    /// Offending value, rendered as JSON, when there is one
    pub value: Option<String>,
}

impl SchemaViolation {
    pub fn missing(field: &str) -> Self {
        Self {
            field: field.to_string(),
            reason: "missing required field".to_string(),
            value: None,
        }
    }

    pub fn invalid(field: &str, reason: impl Into<String>, value: Option<&serde_json::Value>) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.into(),
            value: value.map(|v| v.to_string()),
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}: {} (got {})", self.field, self.reason, value),
            None => write!(f, "{}: {}", self.field, self.reason),
        }
    }
}

fn join_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" with status {}", s)).unwrap_or_default()
}

/// Main error type for Consilium operations
#[derive(Error, Debug)]
pub enum ConsiliumError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Request failed{}: {}", status_suffix(.status), .message)]
    Request { status: Option<u16>, message: String },

    #[error("Empty completion returned by {provider}")]
    EmptyCompletion { provider: String },

    #[error("Response is not valid JSON: {message}")]
    Parse { message: String, raw: String },

    #[error("Response failed schema validation: {}", join_violations(.0))]
    Schema(Vec<SchemaViolation>),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Prompt error: {0}")]
    Prompt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConsiliumError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_names_every_violation() {
        let err = ConsiliumError::Schema(vec![
            SchemaViolation::missing("key"),
            SchemaViolation::invalid("type", "must be one of list, multiple, text", Some(&serde_json::json!("radio"))),
        ]);

        let message = err.to_string();
        assert!(message.contains("key: missing required field"));
        assert!(message.contains("type: must be one of list, multiple, text (got \"radio\")"));
    }

    #[test]
    fn request_error_includes_status_when_known() {
        let err = ConsiliumError::Request { status: Some(401), message: "bad key".to_string() };
        assert_eq!(err.to_string(), "Request failed with status 401: bad key");

        let err = ConsiliumError::Request { status: None, message: "connection refused".to_string() };
        assert_eq!(err.to_string(), "Request failed: connection refused");
    }
}
