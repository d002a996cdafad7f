//! Static IP filter rules.
//!
//! ```text
//! ip filter 200020 reject 10.0.0.0/8 * * * *
//! ip filter 200100 pass * 192.168.1.0/24 tcp * www
//! ip filter 200101 pass * * tcp * * established
//! ipv6 filter 101 pass * * icmp6
//! ```
//!
//! `established` is a trailing keyword on tcp rules. When only a
//! destination port is set the encoder writes `*` for the source port.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Decoded, Feature, Intent, check_range, parse_number, single_token};
use crate::error::ValidationError;
use crate::reconcile::Reconcilable;
use crate::text::{Line, Stanza};

const FEATURE: &str = "ip_filter";

static FILTER_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(ip|ipv6) filter (\d\S*)(?: (.*))?$").expect("static ip filter pattern")
});

const PROTOCOLS: &[&str] = &[
    "*", "ip", "tcp", "udp", "icmp", "icmp6", "gre", "esp", "ah", "tcpfin", "tcprst",
    "tcpsyn", "established",
];

/// Address family of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpFamily {
    Ipv4,
    Ipv6,
}

impl IpFamily {
    /// Command prefix (`ip` or `ipv6`).
    pub fn prefix(self) -> &'static str {
        match self {
            IpFamily::Ipv4 => "ip",
            IpFamily::Ipv6 => "ipv6",
        }
    }

    pub(crate) fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "ip" => Some(IpFamily::Ipv4),
            "ipv6" => Some(IpFamily::Ipv6),
            _ => None,
        }
    }
}

/// What a filter does with matching packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterAction {
    Pass,
    PassLog,
    PassNolog,
    Reject,
    RejectLog,
    RejectNolog,
    Restrict,
    RestrictLog,
}

impl FilterAction {
    /// Device keyword.
    pub fn as_str(self) -> &'static str {
        match self {
            FilterAction::Pass => "pass",
            FilterAction::PassLog => "pass-log",
            FilterAction::PassNolog => "pass-nolog",
            FilterAction::Reject => "reject",
            FilterAction::RejectLog => "reject-log",
            FilterAction::RejectNolog => "reject-nolog",
            FilterAction::Restrict => "restrict",
            FilterAction::RestrictLog => "restrict-log",
        }
    }
}

impl FromStr for FilterAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pass" => Ok(FilterAction::Pass),
            "pass-log" => Ok(FilterAction::PassLog),
            "pass-nolog" => Ok(FilterAction::PassNolog),
            "reject" => Ok(FilterAction::Reject),
            "reject-log" => Ok(FilterAction::RejectLog),
            "reject-nolog" => Ok(FilterAction::RejectNolog),
            "restrict" => Ok(FilterAction::Restrict),
            "restrict-log" => Ok(FilterAction::RestrictLog),
            other => Err(format!("unknown filter action '{}'", other)),
        }
    }
}

impl fmt::Display for FilterAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One numbered filter rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpFilter {
    /// Address family.
    pub family: IpFamily,

    /// Filter number.
    pub number: u32,

    /// Action on match.
    pub action: FilterAction,

    /// Source address, range or `*`.
    pub source: String,

    /// Destination address, range or `*`.
    pub destination: String,

    /// Protocol name, number, or comma list.
    pub protocol: String,

    /// Source port or service name.
    #[serde(default)]
    pub source_port: Option<String>,

    /// Destination port or service name.
    #[serde(default)]
    pub destination_port: Option<String>,

    /// Trailing `established` keyword.
    #[serde(default)]
    pub established: bool,
}

impl IpFilter {
    /// Create an IPv4 filter with no ports.
    pub fn new(
        number: u32,
        action: FilterAction,
        source: impl Into<String>,
        destination: impl Into<String>,
        protocol: impl Into<String>,
    ) -> Self {
        Self {
            family: IpFamily::Ipv4,
            number,
            action,
            source: source.into(),
            destination: destination.into(),
            protocol: protocol.into(),
            source_port: None,
            destination_port: None,
            established: false,
        }
    }

    /// Set the address family.
    pub fn with_family(mut self, family: IpFamily) -> Self {
        self.family = family;
        self
    }

    /// Set the ports.
    pub fn with_ports(mut self, source: Option<&str>, destination: Option<&str>) -> Self {
        self.source_port = source.map(str::to_string);
        self.destination_port = destination.map(str::to_string);
        self
    }

    /// Set the `established` keyword.
    pub fn with_established(mut self, established: bool) -> Self {
        self.established = established;
        self
    }

    /// Everything after the filter number, as printed by the device.
    fn body(&self) -> String {
        let mut parts = vec![
            self.action.as_str(),
            self.source.as_str(),
            self.destination.as_str(),
            self.protocol.as_str(),
        ];
        match (&self.source_port, &self.destination_port) {
            (Some(sport), Some(dport)) => {
                parts.push(sport);
                parts.push(dport);
            }
            (Some(sport), None) => parts.push(sport),
            (None, Some(dport)) => {
                parts.push("*");
                parts.push(dport);
            }
            (None, None) => {}
        }
        if self.established {
            parts.push("established");
        }
        parts.join(" ")
    }
}

impl Reconcilable for IpFilter {
    type Key = (IpFamily, u32);
    type Fallback = (IpFamily, String);

    fn identity(&self) -> Self::Key {
        (self.family, self.number)
    }

    fn fallback_key(&self) -> Option<Self::Fallback> {
        Some((self.family, self.body()))
    }
}

/// Static IP filter feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpFilters;

impl IpFilters {
    /// Decode filters from any bucket of lines.
    pub fn decode_lines(lines: &[Line]) -> Decoded<IpFilter> {
        let mut decoded = Decoded::new();
        for line in lines {
            let Some(caps) = FILTER_LINE.captures(&line.text) else {
                continue;
            };
            let family = IpFamily::from_prefix(&caps[1]).unwrap_or(IpFamily::Ipv4);
            let rest = caps.get(3).map_or("", |m| m.as_str());
            match parse_rule(family, &caps[2], rest) {
                Ok(filter) => decoded.push_checked::<Self>(line, filter),
                Err(reason) => decoded.reject(FEATURE, line, reason),
            }
        }
        decoded
    }
}

fn parse_rule(family: IpFamily, number: &str, rest: &str) -> Result<IpFilter, String> {
    let number = parse_number(number, "filter number")?;
    let mut tokens: Vec<&str> = rest.split_whitespace().collect();

    let established = tokens.len() > 4 && tokens.last() == Some(&"established");
    if established {
        tokens.pop();
    }
    if !(4..=6).contains(&tokens.len()) {
        return Err(format!(
            "expected action, source, destination, protocol and up to two ports, got {} fields",
            tokens.len()
        ));
    }

    let action = tokens[0].parse::<FilterAction>()?;
    Ok(IpFilter {
        family,
        number,
        action,
        source: tokens[1].to_string(),
        destination: tokens[2].to_string(),
        protocol: tokens[3].to_string(),
        source_port: tokens.get(4).map(|s| s.to_string()),
        destination_port: tokens.get(5).map(|s| s.to_string()),
        established,
    })
}

fn valid_protocol(protocol: &str) -> bool {
    protocol.split(',').all(|part| {
        PROTOCOLS.contains(&part.to_ascii_lowercase().as_str())
            || (!part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
    })
}

impl Feature for IpFilters {
    type Record = IpFilter;

    const NAME: &'static str = FEATURE;

    fn show_command() -> &'static str {
        "show config | grep filter"
    }

    fn decode(stanza: &Stanza) -> Decoded<IpFilter> {
        Self::decode_lines(stanza.top_level())
    }

    fn validate(filter: &IpFilter) -> Result<(), ValidationError> {
        check_range(FEATURE, "number", filter.number.into(), 1, 2_147_483_647)?;
        single_token(FEATURE, "source", &filter.source)?;
        single_token(FEATURE, "destination", &filter.destination)?;
        single_token(FEATURE, "protocol", &filter.protocol)?;
        if !valid_protocol(&filter.protocol) {
            return Err(ValidationError::InvalidValue {
                feature: FEATURE,
                field: "protocol",
                value: filter.protocol.clone(),
            });
        }
        if let Some(port) = &filter.source_port {
            single_token(FEATURE, "source_port", port)?;
        }
        if let Some(port) = &filter.destination_port {
            single_token(FEATURE, "destination_port", port)?;
        }
        if filter.established && !filter.protocol.eq_ignore_ascii_case("tcp") {
            return Err(ValidationError::Requires {
                feature: FEATURE,
                field: "established",
                requirement: "protocol tcp".into(),
            });
        }
        Ok(())
    }

    fn encode(filter: &IpFilter, intent: Intent) -> Result<Vec<String>, ValidationError> {
        match intent {
            Intent::Set => {
                Self::validate(filter)?;
                Ok(vec![format!(
                    "{} filter {} {}",
                    filter.family.prefix(),
                    filter.number,
                    filter.body()
                )])
            }
            Intent::Delete => Ok(vec![format!(
                "no {} filter {}",
                filter.family.prefix(),
                filter.number
            )]),
        }
    }
}
