//! Stanza scanning.
//!
//! The scanner partitions reconstructed lines into top-level lines and
//! per-context buckets keyed by `(kind, key)`, e.g. every line between
//! `tunnel select 1` and the point where that selection ends. Contexts nest
//! one level only; opening a context while another is active replaces it.

use std::fmt;

use indexmap::IndexMap;
use log::trace;
use serde::{Deserialize, Serialize};

use crate::dialect::ContextDefinition;

use super::wrap::Line;

/// Key carried on a context header line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextId {
    /// Numbered selection (`tunnel select 3`).
    Number(u32),

    /// Named selection (`pp select anonymous`).
    Name(String),
}

impl ContextId {
    /// Parse a header key, preferring the numeric form.
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<u32>() {
            Ok(n) => ContextId::Number(n),
            Err(_) => ContextId::Name(raw.to_string()),
        }
    }

    /// The numeric key, if this is a numbered selection.
    pub fn as_number(&self) -> Option<u32> {
        match self {
            ContextId::Number(n) => Some(*n),
            ContextId::Name(_) => None,
        }
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextId::Number(n) => write!(f, "{}", n),
            ContextId::Name(name) => f.write_str(name),
        }
    }
}

/// Address of one context bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey {
    /// Context kind, as named in the dialect (`tunnel`, `pp`).
    pub kind: String,

    /// Selection key from the header line.
    pub id: ContextId,
}

impl ContextKey {
    /// Create a context key.
    pub fn new(kind: impl Into<String>, id: ContextId) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// Scanner output: top-level lines plus keyed context buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stanza {
    top_level: Vec<Line>,
    contexts: IndexMap<ContextKey, Vec<Line>>,
    skipped: usize,
}

impl Stanza {
    /// Lines outside any context.
    pub fn top_level(&self) -> &[Line] {
        &self.top_level
    }

    /// Lines of one context, if that context was seen.
    pub fn context(&self, key: &ContextKey) -> Option<&[Line]> {
        self.contexts.get(key).map(Vec::as_slice)
    }

    /// All context buckets in first-seen order.
    pub fn contexts(&self) -> impl Iterator<Item = (&ContextKey, &[Line])> {
        self.contexts.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Context buckets of one kind in first-seen order.
    pub fn contexts_of<'a>(
        &'a self,
        kind: &'a str,
    ) -> impl Iterator<Item = (&'a ContextKey, &'a [Line])> + 'a {
        self.contexts()
            .filter(move |(key, _)| key.kind == kind)
    }

    /// Number of context buckets.
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// Number of blank and comment lines dropped during the scan.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Check whether nothing was scanned.
    pub fn is_empty(&self) -> bool {
        self.top_level.is_empty() && self.contexts.is_empty()
    }
}

/// Partitions lines into a [`Stanza`] using context definitions.
#[derive(Debug, Clone, Default)]
pub struct Scanner {
    definitions: Vec<ContextDefinition>,
}

impl Scanner {
    /// Create a scanner for the given contexts.
    pub fn new(definitions: Vec<ContextDefinition>) -> Self {
        Self { definitions }
    }

    /// Scan reconstructed lines. Never fails; unknown lines stay in the
    /// bucket they were found in.
    pub fn scan(&self, lines: &[Line]) -> Stanza {
        let mut stanza = Stanza::default();
        let mut active: Option<(&ContextDefinition, ContextKey)> = None;

        for line in lines {
            let text = line.text.as_str();
            if text.is_empty() || text.starts_with('#') {
                stanza.skipped += 1;
                continue;
            }

            if let Some((definition, id)) = self.header(text) {
                let key = ContextKey::new(definition.kind.clone(), id);
                trace!("line {}: entering {}", line.number, key);
                stanza.contexts.entry(key.clone()).or_default();
                active = Some((definition, key));
                continue;
            }

            if let Some((definition, key)) = &active {
                if definition.is_leave(text) {
                    trace!("line {}: leaving {}", line.number, key);
                    active = None;
                    continue;
                }

                if line.indent > 0 || definition.is_member(text) {
                    stanza
                        .contexts
                        .entry(key.clone())
                        .or_default()
                        .push(line.clone());
                    if definition.is_trailer(text) {
                        trace!("line {}: {} closed by trailer", line.number, key);
                        active = None;
                    }
                    continue;
                }

                trace!("line {}: unindented non-member closes {}", line.number, key);
                active = None;
            } else if self.definitions.iter().any(|d| d.is_leave(text)) {
                continue;
            }

            stanza.top_level.push(line.clone());
        }

        stanza
    }

    fn header(&self, text: &str) -> Option<(&ContextDefinition, ContextId)> {
        self.definitions
            .iter()
            .find_map(|definition| definition.header_key(text).map(|id| (definition, id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::rtx;
    use crate::text::wrap::Reconstructor;

    fn scan(raw: &str) -> Stanza {
        let dialect = rtx::dialect();
        let lines = Reconstructor::new().join_unrecognized(false).reconstruct(raw).lines;
        dialect.scanner().scan(&lines)
    }

    fn texts(lines: &[Line]) -> Vec<&str> {
        lines.iter().map(|l| l.text.as_str()).collect()
    }

    fn tunnel(n: u32) -> ContextKey {
        ContextKey::new("tunnel", ContextId::Number(n))
    }

    #[test]
    fn test_same_kind_contexts_are_independent() {
        let stanza = scan(
            "tunnel select 1\n tunnel encapsulation ipsec\n ipsec tunnel 101\n tunnel enable 1\n\
             tunnel select 2\n tunnel encapsulation l2tpv3\n l2tp hostname rtx\n tunnel enable 2\n",
        );
        assert_eq!(stanza.context_count(), 2);
        assert_eq!(
            texts(stanza.context(&tunnel(1)).unwrap()),
            vec!["tunnel encapsulation ipsec", "ipsec tunnel 101", "tunnel enable 1"]
        );
        assert_eq!(
            texts(stanza.context(&tunnel(2)).unwrap()),
            vec!["tunnel encapsulation l2tpv3", "l2tp hostname rtx", "tunnel enable 2"]
        );
        assert!(stanza.top_level().is_empty());
    }

    #[test]
    fn test_context_lines_not_top_level() {
        let stanza = scan("ip route default gateway pp 1\ntunnel select 1\n description vpn\nip filter 1 pass * *");
        assert_eq!(
            texts(stanza.top_level()),
            vec!["ip route default gateway pp 1", "ip filter 1 pass * *"]
        );
        assert_eq!(texts(stanza.context(&tunnel(1)).unwrap()), vec!["description vpn"]);
    }

    #[test]
    fn test_leave_line_closes_context() {
        let stanza = scan("tunnel select 1\ntunnel encapsulation ipsec\ntunnel select none\ntunnel enable 9");
        assert_eq!(
            texts(stanza.context(&tunnel(1)).unwrap()),
            vec!["tunnel encapsulation ipsec"]
        );
        assert_eq!(texts(stanza.top_level()), vec!["tunnel enable 9"]);
    }

    #[test]
    fn test_unindented_non_member_closes_context() {
        let stanza = scan("pp select 1\npp always-on on\nschedule at 1 startup * lan1");
        let pp = ContextKey::new("pp", ContextId::Number(1));
        assert_eq!(texts(stanza.context(&pp).unwrap()), vec!["pp always-on on"]);
        assert_eq!(texts(stanza.top_level()), vec!["schedule at 1 startup * lan1"]);
    }

    #[test]
    fn test_unknown_indented_line_stays_in_bucket() {
        let stanza = scan("tunnel select 4\n mystery setting 42\n tunnel enable 4");
        assert_eq!(
            texts(stanza.context(&tunnel(4)).unwrap()),
            vec!["mystery setting 42", "tunnel enable 4"]
        );
    }

    #[test]
    fn test_named_context_key() {
        let stanza = scan("pp select anonymous\n pp bind tunnel1\n pp enable anonymous");
        let key = ContextKey::new("pp", ContextId::Name("anonymous".into()));
        assert_eq!(
            texts(stanza.context(&key).unwrap()),
            vec!["pp bind tunnel1", "pp enable anonymous"]
        );
    }

    #[test]
    fn test_reentry_accumulates_and_empty_header_kept() {
        let stanza = scan("tunnel select 1\n description a\ntunnel select 2\ntunnel select 1\n tunnel enable 1");
        assert_eq!(
            texts(stanza.context(&tunnel(1)).unwrap()),
            vec!["description a", "tunnel enable 1"]
        );
        assert_eq!(stanza.context(&tunnel(2)).unwrap().len(), 0);
        let kinds: Vec<String> = stanza.contexts_of("tunnel").map(|(k, _)| k.to_string()).collect();
        assert_eq!(kinds, vec!["tunnel 1", "tunnel 2"]);
    }

    #[test]
    fn test_comments_and_blanks_skipped() {
        let stanza = scan("# header\n\nip filter 1 pass * *\n");
        assert_eq!(texts(stanza.top_level()), vec!["ip filter 1 pass * *"]);
        assert_eq!(stanza.skipped(), 2);
    }

    #[test]
    fn test_context_id_parse() {
        assert_eq!(ContextId::parse("12"), ContextId::Number(12));
        assert_eq!(ContextId::parse("anonymous"), ContextId::Name("anonymous".into()));
        assert_eq!(ContextId::Number(3).as_number(), Some(3));
    }
}
