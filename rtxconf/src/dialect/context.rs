//! Selection context definition.

use regex::Regex;

use crate::error::DialectError;
use crate::text::ContextId;

/// A selection context a device groups commands under.
///
/// A context opens on a header line whose first capture group is the
/// selection key. It closes on a `leave` line (consumed), after a `trailer`
/// line (kept in the bucket), on the next header, or when an unindented line
/// that starts with none of the member prefixes appears.
#[derive(Debug, Clone)]
pub struct ContextDefinition {
    /// Context kind (e.g., "tunnel", "pp").
    pub kind: String,

    /// Header pattern; capture group 1 carries the key.
    pub header: Regex,

    /// Lines that close the context without belonging to it.
    pub leave: Vec<Regex>,

    /// Lines that belong to the context and close it.
    pub trailer: Vec<Regex>,

    /// Command prefixes that may appear unindented inside the context.
    /// Empty means every line belongs until an explicit exit.
    pub member_prefixes: Vec<String>,
}

impl ContextDefinition {
    /// Create a new context definition from a header pattern.
    pub fn new(kind: impl Into<String>, header: &str) -> Result<Self, DialectError> {
        let kind = kind.into();
        let header = Regex::new(header)?;
        if header.captures_len() < 2 {
            return Err(DialectError::MissingKeyCapture { kind });
        }
        Ok(Self {
            kind,
            header,
            leave: vec![],
            trailer: vec![],
            member_prefixes: vec![],
        })
    }

    /// Add a leave pattern.
    pub fn with_leave(mut self, pattern: &str) -> Result<Self, DialectError> {
        self.leave.push(Regex::new(pattern)?);
        Ok(self)
    }

    /// Add a trailer pattern.
    pub fn with_trailer(mut self, pattern: &str) -> Result<Self, DialectError> {
        self.trailer.push(Regex::new(pattern)?);
        Ok(self)
    }

    /// Add a member command prefix.
    pub fn with_member_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.member_prefixes.push(prefix.into());
        self
    }

    /// Extract the selection key if `line` is a header of this context.
    pub fn header_key(&self, line: &str) -> Option<ContextId> {
        self.header
            .captures(line)
            .and_then(|caps| caps.get(1))
            .map(|m| ContextId::parse(m.as_str()))
    }

    /// Check if `line` leaves this context.
    pub fn is_leave(&self, line: &str) -> bool {
        self.leave.iter().any(|re| re.is_match(line))
    }

    /// Check if `line` is a closing trailer of this context.
    pub fn is_trailer(&self, line: &str) -> bool {
        self.trailer.iter().any(|re| re.is_match(line))
    }

    /// Check if an unindented `line` still belongs to this context.
    pub fn is_member(&self, line: &str) -> bool {
        self.member_prefixes.is_empty()
            || self
                .member_prefixes
                .iter()
                .any(|prefix| line.starts_with(prefix.as_str()))
    }
}
