//! Error types for rtxconf.
//!
//! Decode and validation errors are values scoped to one line or one record.
//! They are collected next to the records that did succeed instead of
//! aborting a whole read, so most APIs return them inside their output types.
//! [`Error`] only wraps them where a single call can fail as a whole, such as
//! the [`Device`](crate::device::Device) helper.

use thiserror::Error;

/// Main error type for rtxconf operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A line failed structured parsing
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A record violated a feature-level invariant
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Dialect definition errors
    #[error("Dialect error: {0}")]
    Dialect(#[from] DialectError),

    /// Command execution errors
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),
}

/// One line inside one feature failed structured parsing.
///
/// The error names the feature and carries the offending line verbatim so
/// the caller can surface it without re-reading the device output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{feature}: cannot parse line {line_number} '{line}': {reason}")]
pub struct DecodeError {
    /// Feature whose decoder rejected the line.
    pub feature: &'static str,

    /// The logical line as seen by the decoder.
    pub line: String,

    /// 1-based physical line number the logical line started on.
    pub line_number: usize,

    /// Why the line was rejected.
    pub reason: String,
}

impl DecodeError {
    /// Create a new decode error.
    pub fn new(
        feature: &'static str,
        line: impl Into<String>,
        line_number: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            feature,
            line: line.into(),
            line_number,
            reason: reason.into(),
        }
    }
}

/// A record violates a feature-level precondition and cannot be encoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is missing or empty
    #[error("{feature}: {field} is required")]
    Missing {
        feature: &'static str,
        field: &'static str,
    },

    /// A numeric field is outside its legal range
    #[error("{feature}: {field} must be in {min}..={max}, got {value}")]
    OutOfRange {
        feature: &'static str,
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    /// A field carries a value the device does not accept
    #[error("{feature}: invalid {field} '{value}'")]
    InvalidValue {
        feature: &'static str,
        field: &'static str,
        value: String,
    },

    /// A field is only legal in combination with another setting
    #[error("{feature}: {field} requires {requirement}")]
    Requires {
        feature: &'static str,
        field: &'static str,
        requirement: String,
    },
}

impl ValidationError {
    /// Name of the offending field.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::Missing { field, .. }
            | ValidationError::OutOfRange { field, .. }
            | ValidationError::InvalidValue { field, .. }
            | ValidationError::Requires { field, .. } => field,
        }
    }
}

/// Dialect definition errors.
#[derive(Error, Debug)]
pub enum DialectError {
    /// Invalid regex pattern in a context definition
    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Header pattern cannot yield a context key
    #[error("Header pattern for context '{kind}' has no capture group")]
    MissingKeyCapture { kind: String },
}

/// Errors raised at the executor boundary.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// The device rejected a command
    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    /// The transport behind the executor failed
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Result type alias using rtxconf's Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::new("ip_filter", "ip filter x pass * *", 12, "invalid filter number");
        assert_eq!(
            err.to_string(),
            "ip_filter: cannot parse line 12 'ip filter x pass * *': invalid filter number"
        );
    }

    #[test]
    fn test_validation_error_wraps() {
        let validation = ValidationError::Requires {
            feature: "ip_filter",
            field: "established",
            requirement: "protocol tcp".into(),
        };
        assert_eq!(validation.field(), "established");
        let err: Error = validation.into();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(
            err.to_string(),
            "Validation error: ip_filter: established requires protocol tcp"
        );
    }
}
