//! Device dialects.
//!
//! A [`Dialect`] is the data that drives text handling for one family of
//! devices: which lines open selection contexts, which words start a
//! command, how wrapped lines are rejoined, and what command output means
//! failure.

mod context;
pub mod rtx;

pub use context::ContextDefinition;

use indexmap::IndexMap;

use crate::text::{Reconstructor, Scanner, WrapOptions};

/// Dialect definition containing all device-family text rules.
#[derive(Debug, Clone)]
pub struct Dialect {
    /// Dialect name (e.g., "yamaha_rtx").
    pub name: String,

    /// Selection contexts keyed by kind.
    pub contexts: IndexMap<String, ContextDefinition>,

    /// Words that begin a command at the start of a line.
    pub command_starts: Vec<String>,

    /// Reconstructor tuning.
    pub wrap: WrapOptions,

    /// Output fragments that mark a rejected command.
    pub failed_when_contains: Vec<String>,

    /// Output fragments that mark a delete of something already absent.
    pub not_found_when_contains: Vec<String>,
}

impl Dialect {
    /// Create a new dialect with default wrap options and no rules.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contexts: IndexMap::new(),
            command_starts: vec![],
            wrap: WrapOptions::default(),
            failed_when_contains: vec![],
            not_found_when_contains: vec![],
        }
    }

    /// Add a selection context.
    pub fn with_context(mut self, context: ContextDefinition) -> Self {
        self.contexts.insert(context.kind.clone(), context);
        self
    }

    /// Add command-start words.
    pub fn with_command_starts<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command_starts.extend(words.into_iter().map(Into::into));
        self
    }

    /// Replace the reconstructor tuning.
    pub fn with_wrap_options(mut self, wrap: WrapOptions) -> Self {
        self.wrap = wrap;
        self
    }

    /// Add a failure pattern.
    pub fn with_failure_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.failed_when_contains.push(pattern.into());
        self
    }

    /// Add a not-found pattern.
    pub fn with_not_found_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.not_found_when_contains.push(pattern.into());
        self
    }

    /// Get a context definition by kind.
    pub fn get_context(&self, kind: &str) -> Option<&ContextDefinition> {
        self.contexts.get(kind)
    }

    /// Build the reconstructor for this dialect.
    pub fn reconstructor(&self) -> Reconstructor {
        Reconstructor::from_options(&self.wrap).with_command_starts(self.command_starts.iter().cloned())
    }

    /// Build the scanner for this dialect.
    pub fn scanner(&self) -> Scanner {
        Scanner::new(self.contexts.values().cloned().collect())
    }

    /// Return the first failure pattern found in `output`, ignoring case.
    pub fn detect_failure(&self, output: &str) -> Option<&str> {
        let output = output.to_lowercase();
        self.failed_when_contains
            .iter()
            .find(|pattern| output.contains(&pattern.to_lowercase()))
            .map(String::as_str)
    }

    /// Check whether `output` reports a missing entry, ignoring case.
    pub fn is_not_found(&self, output: &str) -> bool {
        let output = output.to_lowercase();
        self.not_found_when_contains
            .iter()
            .any(|pattern| output.contains(&pattern.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let context = ContextDefinition::new("zone", r"^zone (\S+)$").unwrap();
        let dialect = Dialect::new("test")
            .with_context(context)
            .with_command_starts(["zone", "rule"])
            .with_failure_pattern("Error:")
            .with_not_found_pattern("not found");

        assert_eq!(dialect.name, "test");
        assert!(dialect.get_context("zone").is_some());
        assert_eq!(dialect.detect_failure("Error: bad"), Some("Error:"));
        assert_eq!(dialect.detect_failure("ok"), None);
        assert_eq!(dialect.detect_failure("ERROR: bad"), Some("Error:"));
        assert!(dialect.is_not_found("Error: entry Not Found"));
        assert!(dialect.reconstructor().is_command_start("rule 1"));
    }
}
