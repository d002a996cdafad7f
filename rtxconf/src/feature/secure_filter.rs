//! Filter bindings on LAN-side interfaces.
//!
//! ```text
//! ip lan2 secure filter in 200020 200021 200099
//! ip lan2 secure filter out 200020 200099 dynamic 200080 200081
//! ipv6 lan2 secure filter in 101000
//! ethernet lan1 filter in 1 100
//! ```
//!
//! These lines are long and usually arrive wrapped. One record covers both
//! directions of one interface; a direction missing from the output is
//! unset, a bare `ip lan1 secure filter in` is an explicitly empty binding.
//! Tunnel and PP bindings live in their own contexts and are decoded there.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::binding::binding_command;
use super::{Decoded, Direction, Feature, FilterBinding, Intent, check_range, single_token};
use crate::error::ValidationError;
use crate::reconcile::Reconcilable;
use crate::text::{Line, Stanza};

const FEATURE: &str = "secure_filter";

static SECURE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(ip|ipv6) (\S+) secure filter(?: (\S+))?(?: (.*))?$")
        .expect("static secure filter pattern")
});

static ETHERNET_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^ethernet (\S+) filter (in|out|\S+)(?: (.*))?$").expect("static ethernet filter pattern")
});

static LAN_INTERFACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^lan\d+$").expect("static lan interface pattern"));

/// Which filter table a binding references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterFamily {
    Ip,
    Ipv6,
    Ethernet,
}

impl FilterFamily {
    fn command_prefix(self, interface: &str) -> String {
        match self {
            FilterFamily::Ip => format!("ip {} secure filter", interface),
            FilterFamily::Ipv6 => format!("ipv6 {} secure filter", interface),
            FilterFamily::Ethernet => format!("ethernet {} filter", interface),
        }
    }
}

/// Inbound and outbound bindings of one interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceFilters {
    /// Filter table.
    pub family: FilterFamily,

    /// Interface name (`lan1`, `bridge1`).
    pub interface: String,

    /// Inbound binding; `None` when not configured.
    #[serde(default)]
    pub inbound: Option<FilterBinding>,

    /// Outbound binding; `None` when not configured.
    #[serde(default)]
    pub outbound: Option<FilterBinding>,
}

impl InterfaceFilters {
    /// Create an interface record with no bindings.
    pub fn new(family: FilterFamily, interface: impl Into<String>) -> Self {
        Self {
            family,
            interface: interface.into(),
            inbound: None,
            outbound: None,
        }
    }

    /// Set the inbound binding.
    pub fn with_inbound(mut self, binding: FilterBinding) -> Self {
        self.inbound = Some(binding);
        self
    }

    /// Set the outbound binding.
    pub fn with_outbound(mut self, binding: FilterBinding) -> Self {
        self.outbound = Some(binding);
        self
    }

    fn binding_mut(&mut self, direction: Direction) -> &mut Option<FilterBinding> {
        match direction {
            Direction::In => &mut self.inbound,
            Direction::Out => &mut self.outbound,
        }
    }

    fn bindings(&self) -> [(Direction, Option<&FilterBinding>); 2] {
        [
            (Direction::In, self.inbound.as_ref()),
            (Direction::Out, self.outbound.as_ref()),
        ]
    }
}

impl Reconcilable for InterfaceFilters {
    type Key = (FilterFamily, String);
    type Fallback = ();

    fn identity(&self) -> Self::Key {
        (self.family, self.interface.clone())
    }

    fn fallback_key(&self) -> Option<()> {
        None
    }
}

/// Interface secure filter feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecureFilters;

impl SecureFilters {
    /// Decode interface bindings from any bucket of lines.
    pub fn decode_lines(lines: &[Line]) -> Decoded<InterfaceFilters> {
        let mut decoded = Decoded::new();
        let mut records: IndexMap<(FilterFamily, String), (&Line, InterfaceFilters)> =
            IndexMap::new();
        let mut failed: Vec<(FilterFamily, String)> = Vec::new();

        for line in lines {
            let Some((family, interface, direction, rest)) = split_line(&line.text) else {
                continue;
            };
            let key = (family, interface.to_string());

            let parsed = Direction::parse(direction)
                .ok_or_else(|| format!("invalid direction '{}'", direction))
                .and_then(|direction| FilterBinding::parse(rest).map(|binding| (direction, binding)));

            match parsed {
                Ok((direction, binding)) => {
                    let (_, record) = records
                        .entry(key.clone())
                        .or_insert_with(|| (line, InterfaceFilters::new(family, interface)));
                    let slot = record.binding_mut(direction);
                    if slot.is_some() {
                        decoded.reject(FEATURE, line, format!("duplicate {} binding", direction));
                        failed.push(key);
                    } else {
                        *slot = Some(binding);
                    }
                }
                Err(reason) => {
                    decoded.reject(FEATURE, line, reason);
                    failed.push(key);
                }
            }
        }

        for (key, (line, record)) in records {
            if !failed.contains(&key) {
                decoded.push_checked::<Self>(line, record);
            }
        }
        decoded
    }
}

fn split_line(text: &str) -> Option<(FilterFamily, &str, &str, &str)> {
    if let Some(caps) = SECURE_LINE.captures(text) {
        let family = match caps.get(1)?.as_str() {
            "ipv6" => FilterFamily::Ipv6,
            _ => FilterFamily::Ip,
        };
        let interface = caps.get(2)?.as_str();
        if interface == "tunnel" || interface == "pp" {
            return None;
        }
        let direction = caps.get(3).map_or("", |m| m.as_str());
        let rest = caps.get(4).map_or("", |m| m.as_str());
        return Some((family, interface, direction, rest));
    }
    let caps = ETHERNET_LINE.captures(text)?;
    Some((
        FilterFamily::Ethernet,
        caps.get(1)?.as_str(),
        caps.get(2)?.as_str(),
        caps.get(3).map_or("", |m| m.as_str()),
    ))
}

impl Feature for SecureFilters {
    type Record = InterfaceFilters;

    const NAME: &'static str = FEATURE;

    fn show_command() -> &'static str {
        "show config | grep filter"
    }

    fn decode(stanza: &Stanza) -> Decoded<InterfaceFilters> {
        Self::decode_lines(stanza.top_level())
    }

    fn validate(record: &InterfaceFilters) -> Result<(), ValidationError> {
        single_token(FEATURE, "interface", &record.interface)?;
        if record.interface == "tunnel" || record.interface == "pp" {
            return Err(ValidationError::InvalidValue {
                feature: FEATURE,
                field: "interface",
                value: record.interface.clone(),
            });
        }
        if record.family == FilterFamily::Ethernet && !LAN_INTERFACE.is_match(&record.interface) {
            return Err(ValidationError::Requires {
                feature: FEATURE,
                field: "interface",
                requirement: "a lanN interface for ethernet filters".into(),
            });
        }
        for (_, binding) in record.bindings() {
            let Some(binding) = binding else { continue };
            if record.family == FilterFamily::Ethernet && !binding.dynamic.is_empty() {
                return Err(ValidationError::InvalidValue {
                    feature: FEATURE,
                    field: "dynamic",
                    value: "dynamic filters on an ethernet binding".into(),
                });
            }
            for &number in binding.filters.iter().chain(&binding.dynamic) {
                check_range(FEATURE, "filter number", number.into(), 1, 2_147_483_647)?;
            }
        }
        Ok(())
    }

    fn encode(record: &InterfaceFilters, intent: Intent) -> Result<Vec<String>, ValidationError> {
        Self::validate(record)?;
        let prefix = record.family.command_prefix(&record.interface);
        let commands = record
            .bindings()
            .into_iter()
            .filter_map(|(direction, binding)| {
                let binding = binding?;
                Some(match intent {
                    Intent::Set => binding_command(&prefix, direction, binding),
                    Intent::Delete => format!("no {} {}", prefix, direction),
                })
            })
            .collect();
        Ok(commands)
    }
}
