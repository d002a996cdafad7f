//! Line-wrap reconstruction.
//!
//! RTX routers print configuration at a fixed terminal width and break long
//! commands wherever the column runs out, including in the middle of a
//! number. The [`Reconstructor`] rejoins those physical lines into logical
//! commands before any scanning happens.
//!
//! Each wrap point is classified by an ordered list of [`WrapPolicy`]
//! objects; the first policy with an opinion wins. When no policy decides,
//! a next line that starts with a known command word begins a new logical
//! line, and anything else is space-joined and reported as an
//! [`Ambiguity`].
//!
//! The digit-adjacency rule is a best-effort guess: two legitimate lines where
//! the first ends with a digit and the second starts with one at column 0
//! will be glued together. RTX never starts a top-level command with a digit,
//! so this has not been seen in practice.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use log::{trace, warn};
use serde::{Deserialize, Serialize};

/// How two adjacent physical lines are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Join {
    /// Append the next line with no separator.
    Concatenate,

    /// Append the next line after a single space.
    Space,

    /// Drop a trailing continuation marker of the given byte length, then
    /// space-join.
    StripMarker(usize),

    /// The next line starts a new logical line.
    Break,
}

/// Trait for wrap-point classification, pluggable per dialect.
pub trait WrapPolicy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Classify the boundary between the logical line built so far and the
    /// next raw physical line. `None` means no opinion.
    fn decide(&self, current: &str, next: &str) -> Option<Join>;
}

/// A number split across the wrap column: `...2000` + `21 ...`.
///
/// Only fires when the next physical line starts with a digit at column 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigitSplit;

impl WrapPolicy for DigitSplit {
    fn name(&self) -> &'static str {
        "digit_split"
    }

    fn decide(&self, current: &str, next: &str) -> Option<Join> {
        let ends_digit = current.chars().last().is_some_and(|c| c.is_ascii_digit());
        let starts_digit = next.chars().next().is_some_and(|c| c.is_ascii_digit());
        (ends_digit && starts_digit).then_some(Join::Concatenate)
    }
}

/// A `key=value` option split before the `=`: `edns` + `=on`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualsSplit;

impl WrapPolicy for EqualsSplit {
    fn name(&self) -> &'static str {
        "equals_split"
    }

    fn decide(&self, _current: &str, next: &str) -> Option<Join> {
        next.trim_start().starts_with('=').then_some(Join::Concatenate)
    }
}

/// Explicit trailing continuation marker on the current line.
#[derive(Debug, Clone)]
pub struct ContinuationMarker {
    marker: String,
}

impl ContinuationMarker {
    /// Create a marker policy.
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

impl WrapPolicy for ContinuationMarker {
    fn name(&self) -> &'static str {
        "continuation_marker"
    }

    fn decide(&self, current: &str, _next: &str) -> Option<Join> {
        if self.marker.is_empty() {
            return None;
        }
        current
            .trim_end()
            .ends_with(self.marker.as_str())
            .then_some(Join::StripMarker(self.marker.len()))
    }
}

/// Wrapped numeric list: the next line carries more numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumericContinuation;

impl WrapPolicy for NumericContinuation {
    fn name(&self) -> &'static str {
        "numeric_continuation"
    }

    fn decide(&self, _current: &str, next: &str) -> Option<Join> {
        next.trim_start()
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit())
            .then_some(Join::Space)
    }
}

/// Serializable reconstructor tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WrapOptions {
    /// Enable [`DigitSplit`].
    pub digit_split: bool,

    /// Enable [`EqualsSplit`].
    pub equals_split: bool,

    /// Marker for [`ContinuationMarker`]; `None` disables it.
    pub continuation_marker: Option<String>,

    /// Enable [`NumericContinuation`].
    pub numeric_continuation: bool,

    /// Space-join lines that do not start with a known command word.
    pub join_unrecognized: bool,
}

impl Default for WrapOptions {
    fn default() -> Self {
        Self {
            digit_split: true,
            equals_split: true,
            continuation_marker: Some("\\".to_string()),
            numeric_continuation: true,
            join_unrecognized: true,
        }
    }
}

/// One reconstructed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// 1-based number of the first physical line.
    pub number: usize,

    /// Leading whitespace width of the first physical line.
    pub indent: usize,

    /// The command text, trimmed on both ends.
    pub text: String,
}

/// A wrap point no policy could classify; it was space-joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ambiguity {
    /// 1-based number of the physical line that was joined.
    pub line_number: usize,

    /// Logical line before the join.
    pub current: String,

    /// Physical line that was appended.
    pub next: String,
}

/// Output of [`Reconstructor::reconstruct`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconstruction {
    /// Logical lines in input order, blank lines included.
    pub lines: Vec<Line>,

    /// Joins made without a confident policy decision.
    pub ambiguities: Vec<Ambiguity>,
}

/// Rejoins device-wrapped physical lines into logical lines.
#[derive(Clone)]
pub struct Reconstructor {
    policies: Vec<Arc<dyn WrapPolicy>>,
    command_starts: HashSet<String>,
    join_unrecognized: bool,
}

impl Reconstructor {
    /// Create a reconstructor with no policies and an empty vocabulary.
    ///
    /// With no vocabulary every line is unrecognized, so call
    /// [`join_unrecognized(false)`](Self::join_unrecognized) or add command
    /// starts before use.
    pub fn new() -> Self {
        Self {
            policies: Vec::new(),
            command_starts: HashSet::new(),
            join_unrecognized: true,
        }
    }

    /// Create a reconstructor with the built-in policies selected by `options`.
    pub fn from_options(options: &WrapOptions) -> Self {
        let mut reconstructor = Self::new().join_unrecognized(options.join_unrecognized);
        if options.digit_split {
            reconstructor = reconstructor.with_policy(DigitSplit);
        }
        if options.equals_split {
            reconstructor = reconstructor.with_policy(EqualsSplit);
        }
        if let Some(marker) = &options.continuation_marker {
            reconstructor = reconstructor.with_policy(ContinuationMarker::new(marker.clone()));
        }
        if options.numeric_continuation {
            reconstructor = reconstructor.with_policy(NumericContinuation);
        }
        reconstructor
    }

    /// Append a policy. Policies are consulted in insertion order.
    pub fn with_policy(mut self, policy: impl WrapPolicy + 'static) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    /// Add a recognized command-start word.
    pub fn with_command_start(mut self, word: impl Into<String>) -> Self {
        self.command_starts.insert(word.into());
        self
    }

    /// Add several recognized command-start words.
    pub fn with_command_starts<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command_starts.extend(words.into_iter().map(Into::into));
        self
    }

    /// Whether lines without a known command word are joined to the previous line.
    pub fn join_unrecognized(mut self, join: bool) -> Self {
        self.join_unrecognized = join;
        self
    }

    /// Names of the configured policies in evaluation order.
    pub fn policy_names(&self) -> Vec<&'static str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    /// Check whether a physical line opens a new command.
    pub fn is_command_start(&self, line: &str) -> bool {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            return true;
        }
        trimmed
            .split_whitespace()
            .next()
            .is_some_and(|word| self.command_starts.contains(word))
    }

    /// Rejoin wrapped lines. Never fails.
    pub fn reconstruct(&self, raw: &str) -> Reconstruction {
        let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");
        let mut out = Reconstruction::default();
        let mut current: Option<(usize, usize, String)> = None;

        for (idx, physical) in normalized.lines().enumerate() {
            let number = idx + 1;

            let Some((start, indent, text)) = current.as_mut() else {
                current = Some(Self::open(number, physical));
                continue;
            };

            match self.classify(text, physical) {
                (Join::Break, _) => {
                    out.lines.push(Self::close(*start, *indent, text));
                    current = Some(Self::open(number, physical));
                }
                (join, policy) => {
                    match policy {
                        Some(name) => trace!("line {}: joined by {}", number, name),
                        None => {
                            warn!(
                                "line {}: ambiguous wrap, joining '{}' onto '{}'",
                                number,
                                physical.trim(),
                                text.trim()
                            );
                            out.ambiguities.push(Ambiguity {
                                line_number: number,
                                current: text.trim().to_string(),
                                next: physical.trim().to_string(),
                            });
                        }
                    }
                    Self::apply(text, join, physical);
                }
            }
        }

        if let Some((start, indent, text)) = current {
            out.lines.push(Self::close(start, indent, &text));
        }
        out
    }

    fn classify(&self, current: &str, next: &str) -> (Join, Option<&'static str>) {
        if current.trim().is_empty() || current.trim_start().starts_with('#') {
            return (Join::Break, None);
        }
        if next.trim().is_empty() {
            return (Join::Break, None);
        }
        for policy in &self.policies {
            if let Some(join) = policy.decide(current, next) {
                return (join, Some(policy.name()));
            }
        }
        if self.is_command_start(next) || !self.join_unrecognized {
            return (Join::Break, None);
        }
        (Join::Space, None)
    }

    fn open(number: usize, physical: &str) -> (usize, usize, String) {
        let indent = physical.len() - physical.trim_start().len();
        (number, indent, physical[indent..].to_string())
    }

    fn apply(text: &mut String, join: Join, next: &str) {
        match join {
            Join::Concatenate => {
                Self::trim_end_in_place(text);
                text.push_str(next.trim());
            }
            Join::Space => {
                Self::trim_end_in_place(text);
                text.push(' ');
                text.push_str(next.trim());
            }
            Join::StripMarker(len) => {
                Self::trim_end_in_place(text);
                let cut = text.len().saturating_sub(len);
                text.truncate(cut);
                Self::trim_end_in_place(text);
                text.push(' ');
                text.push_str(next.trim());
            }
            Join::Break => {}
        }
    }

    fn trim_end_in_place(text: &mut String) {
        let len = text.trim_end().len();
        text.truncate(len);
    }

    fn close(number: usize, indent: usize, text: &str) -> Line {
        Line {
            number,
            indent,
            text: text.trim().to_string(),
        }
    }
}

impl Default for Reconstructor {
    fn default() -> Self {
        Self::from_options(&WrapOptions::default())
    }
}

impl fmt::Debug for Reconstructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconstructor")
            .field("policies", &self.policy_names())
            .field("command_starts", &self.command_starts.len())
            .field("join_unrecognized", &self.join_unrecognized)
            .finish()
    }
}
