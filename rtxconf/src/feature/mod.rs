//! Feature decoders and encoders.
//!
//! Each configuration area owns a small decoder/encoder pair built on the
//! shared scanner. Decoders are pure functions of the stanza: a line that
//! carries a feature's command prefix but fails detailed parsing becomes a
//! [`DecodeError`] next to the records that did parse. A record that parses
//! but fails [`Feature::validate`] is rejected the same way, so every decoded
//! record encodes. Encoders validate first and produce nothing when a record
//! is invalid.
//!
//! # Example
//!
//! ```rust
//! use rtxconf::dialect::rtx;
//! use rtxconf::feature::{Feature, Intent, IpFilters};
//! use rtxconf::Parser;
//!
//! let parser = Parser::new(&rtx::dialect());
//! let parsed = parser.parse("ip filter 10 pass 192.168.1.0/24 * tcp * www\n");
//! let decoded = parsed.decode::<IpFilters>();
//! let commands = IpFilters::encode(&decoded.records[0], Intent::Set).unwrap();
//! assert_eq!(commands, vec!["ip filter 10 pass 192.168.1.0/24 * tcp * www"]);
//! ```

mod binding;
pub mod dns_select;
pub mod dynamic_filter;
pub mod ip_filter;
pub mod pp;
pub mod schedule;
pub mod secure_filter;
pub mod static_route;
pub mod tunnel;

pub use binding::{Direction, FilterBinding};
pub use dns_select::{DnsServer, DnsServerSelect, DnsServerSelects};
pub use dynamic_filter::{DynamicFilter, DynamicFilters, DynamicRule};
pub use ip_filter::{FilterAction, IpFamily, IpFilter, IpFilters};
pub use pp::{AddressPool, AuthRequest, PpInterface, PpInterfaces, PpSelector};
pub use schedule::{PpAction, Schedule, ScheduleKey, Schedules, Trigger};
pub use secure_filter::{FilterFamily, InterfaceFilters, SecureFilters};
pub use static_route::{Gateway, Network, NextHop, StaticRoute, StaticRoutes};
pub use tunnel::{Encapsulation, Tunnel, Tunnels};

use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, ValidationError};
use crate::reconcile::Reconcilable;
use crate::text::{Line, Stanza};

/// What an encoded command sequence should do on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Create or overwrite the record.
    Set,

    /// Remove the record.
    Delete,
}

/// Records decoded from one feature plus the lines that failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<R> {
    /// Records that parsed.
    pub records: Vec<R>,

    /// One error per rejected line or record.
    pub errors: Vec<DecodeError>,
}

impl<R> Decoded<R> {
    /// Create an empty result.
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Check whether every line parsed.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Keep `record` only if it would encode; otherwise reject `line`.
    pub(crate) fn push_checked<F>(&mut self, line: &Line, record: R)
    where
        F: Feature<Record = R>,
    {
        match F::validate(&record) {
            Ok(()) => self.records.push(record),
            Err(error) => self.reject(F::NAME, line, error.to_string()),
        }
    }

    /// Keep a context record only if it would encode.
    ///
    /// A failure is reported against the first bucket line starting with
    /// `blame(field)`, falling back to the first line and then to the
    /// context header itself.
    pub(crate) fn push_context<F>(
        &mut self,
        kind: &str,
        id: impl fmt::Display,
        lines: &[Line],
        record: R,
        blame: fn(&str) -> &'static str,
    ) where
        F: Feature<Record = R>,
    {
        let error = match F::validate(&record) {
            Ok(()) => {
                self.records.push(record);
                return;
            }
            Err(error) => error,
        };
        let prefix = blame(error.field());
        let reason = format!("{} {}: {}", kind, id, error);
        match lines
            .iter()
            .find(|line| line.text.starts_with(prefix))
            .or_else(|| lines.first())
        {
            Some(line) => self.reject(F::NAME, line, reason),
            None => {
                let header = Line {
                    number: 0,
                    indent: 0,
                    text: format!("{} select {}", kind, id),
                };
                self.reject(F::NAME, &header, reason);
            }
        }
    }

    /// Record a rejected line and log it.
    pub(crate) fn reject(&mut self, feature: &'static str, line: &Line, reason: impl Into<String>) {
        let error = DecodeError::new(feature, line.text.clone(), line.number, reason);
        warn!("{}", error);
        self.errors.push(error);
    }
}

impl<R> Default for Decoded<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// A configuration area with a decoder and an encoder.
pub trait Feature {
    /// Typed record this feature decodes to.
    type Record: Reconcilable + Clone + PartialEq + fmt::Debug;

    /// Feature name used in errors and logs.
    const NAME: &'static str;

    /// Command that prints the lines this feature decodes.
    fn show_command() -> &'static str {
        "show config"
    }

    /// Decode every record of this feature from a stanza.
    fn decode(stanza: &Stanza) -> Decoded<Self::Record>;

    /// Check feature-level invariants.
    fn validate(record: &Self::Record) -> Result<(), ValidationError>;

    /// Produce the command lines for `record`.
    ///
    /// The same record and intent always produce the same text.
    fn encode(record: &Self::Record, intent: Intent) -> Result<Vec<String>, ValidationError>;
}

pub(crate) fn check_range(
    feature: &'static str,
    field: &'static str,
    value: u64,
    min: u64,
    max: u64,
) -> Result<(), ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            feature,
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

pub(crate) fn require(
    feature: &'static str,
    field: &'static str,
    value: &str,
) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Missing { feature, field });
    }
    Ok(())
}

/// Reject values that would split into several tokens on the device.
pub(crate) fn single_token(
    feature: &'static str,
    field: &'static str,
    value: &str,
) -> Result<(), ValidationError> {
    require(feature, field, value)?;
    if value.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidValue {
            feature,
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn parse_number(token: &str, field: &str) -> Result<u32, String> {
    token
        .parse::<u32>()
        .map_err(|_| format!("invalid {} '{}'", field, token))
}

pub(crate) fn parse_on_off(token: &str, field: &str) -> Result<bool, String> {
    match token {
        "on" => Ok(true),
        "off" => Ok(false),
        _ => Err(format!("{} must be on or off, got '{}'", field, token)),
    }
}

pub(crate) fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

pub(crate) fn join_numbers(numbers: &[u32]) -> String {
    numbers
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse encoded commands back with the RTX dialect and decode them.
#[cfg(test)]
pub(crate) fn round_trip<F: Feature>(record: &F::Record) -> Decoded<F::Record> {
    let commands = F::encode(record, Intent::Set).unwrap();
    let parser = crate::Parser::new(&crate::dialect::rtx::dialect());
    parser.parse_commands(&commands).decode::<F>()
}

#[cfg(test)]
pub(crate) fn decode_text<F: Feature>(raw: &str) -> Decoded<F::Record> {
    let parser = crate::Parser::new(&crate::dialect::rtx::dialect());
    parser.parse(raw).decode::<F>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_and_require() {
        assert!(check_range("f", "id", 5, 1, 10).is_ok());
        assert_eq!(
            check_range("f", "id", 0, 1, 10),
            Err(ValidationError::OutOfRange {
                feature: "f",
                field: "id",
                value: 0,
                min: 1,
                max: 10,
            })
        );
        assert!(require("f", "name", "  ").is_err());
        assert!(single_token("f", "name", "a b").is_err());
        assert!(single_token("f", "name", "ab").is_ok());
    }

    #[test]
    fn test_token_helpers() {
        assert_eq!(parse_number("42", "id"), Ok(42));
        assert!(parse_number("x", "id").is_err());
        assert_eq!(parse_on_off("on", "syslog"), Ok(true));
        assert!(parse_on_off("yes", "syslog").is_err());
        assert_eq!(on_off(false), "off");
        assert_eq!(join_numbers(&[1, 20, 300]), "1 20 300");
    }

    #[test]
    fn test_intent_serde() {
        assert_eq!(serde_json::to_string(&Intent::Delete).unwrap(), "\"delete\"");
    }
}
