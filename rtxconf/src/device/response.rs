//! Result of one command sent through an executor.

use std::time::Duration;

/// Output of a command plus its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The command that was executed.
    pub command: String,

    /// Device output.
    pub result: String,

    /// Time taken by the executor.
    pub elapsed: Duration,

    /// Failure pattern found in the output, if the device rejected the command.
    pub failure_message: Option<String>,
}

impl Response {
    /// Create a successful response.
    pub fn new(command: impl Into<String>, result: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            command: command.into(),
            result: result.into(),
            elapsed,
            failure_message: None,
        }
    }

    /// Create a failed response.
    pub fn failed(
        command: impl Into<String>,
        result: impl Into<String>,
        elapsed: Duration,
        failure_message: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            result: result.into(),
            elapsed,
            failure_message: Some(failure_message.into()),
        }
    }

    /// Check if the response indicates success.
    pub fn is_success(&self) -> bool {
        self.failure_message.is_none()
    }

    /// Get the result lines as an iterator.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.result.lines()
    }
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.result)
    }
}
