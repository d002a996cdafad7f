//! Domain-based DNS server selection.
//!
//! ```text
//! dns server select 1 192.168.1.1 edns=on example.com
//! dns server select 2 10.0.0.1 10.0.0.2 aaaa *.corp.example 192.168.1.0/24
//! dns server select 3 2001:db8::53 . restrict pp 1
//! ```
//!
//! Fields are positional with optional members in between, so the line is
//! read in fixed phases: up to two servers each followed by an optional
//! `edns=` flag, an optional record type, the query pattern, an optional
//! original sender, and an optional `restrict pp N`. `.` is always a query
//! pattern, never a record type.

use std::net::IpAddr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{Decoded, Feature, Intent, check_range, on_off, parse_number, single_token};
use crate::error::ValidationError;
use crate::reconcile::Reconcilable;
use crate::text::{Line, Stanza};

const FEATURE: &str = "dns_select";

const PREFIX: &str = "dns server select ";

const RECORD_TYPES: &[&str] = &["a", "aaaa", "ptr", "mx", "ns", "cname", "any"];

/// Record type the device uses when none is printed.
const DEFAULT_RECORD_TYPE: &str = "a";

/// One upstream server of a selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DnsServer {
    pub address: String,

    /// `edns=on|off`; `None` when not printed.
    #[serde(default)]
    pub edns: Option<bool>,
}

impl DnsServer {
    /// Create a server with no EDNS flag.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            edns: None,
        }
    }

    /// Set the EDNS flag.
    pub fn with_edns(mut self, edns: bool) -> Self {
        self.edns = Some(edns);
        self
    }
}

/// A `dns server select` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsServerSelect {
    pub id: u32,

    /// One or two servers.
    pub servers: Vec<DnsServer>,

    /// `None` when not printed; the device then answers for `a` queries.
    #[serde(default)]
    pub record_type: Option<String>,

    pub query_pattern: String,

    #[serde(default)]
    pub original_sender: Option<String>,

    /// `restrict pp N`.
    #[serde(default)]
    pub restrict_pp: Option<u32>,
}

impl DnsServerSelect {
    /// Create a selector.
    pub fn new(id: u32, servers: Vec<DnsServer>, query_pattern: impl Into<String>) -> Self {
        Self {
            id,
            servers,
            record_type: None,
            query_pattern: query_pattern.into(),
            original_sender: None,
            restrict_pp: None,
        }
    }

    /// Set the record type.
    pub fn with_record_type(mut self, record_type: impl Into<String>) -> Self {
        self.record_type = Some(record_type.into());
        self
    }

    /// Set the original sender restriction.
    pub fn with_original_sender(mut self, sender: impl Into<String>) -> Self {
        self.original_sender = Some(sender.into());
        self
    }

    /// Record type with the device default applied.
    pub fn effective_record_type(&self) -> &str {
        self.record_type.as_deref().unwrap_or(DEFAULT_RECORD_TYPE)
    }

    fn render(&self) -> String {
        let mut parts = vec![format!("dns server select {}", self.id)];
        for server in &self.servers {
            parts.push(server.address.clone());
            if let Some(edns) = server.edns {
                parts.push(format!("edns={}", on_off(edns)));
            }
        }
        if let Some(record_type) = &self.record_type {
            parts.push(record_type.clone());
        }
        parts.push(self.query_pattern.clone());
        if let Some(sender) = &self.original_sender {
            parts.push(sender.clone());
        }
        if let Some(pp) = self.restrict_pp {
            parts.push(format!("restrict pp {}", pp));
        }
        parts.join(" ")
    }
}

impl Reconcilable for DnsServerSelect {
    type Key = u32;
    type Fallback = (String, String);

    fn identity(&self) -> u32 {
        self.id
    }

    fn fallback_key(&self) -> Option<Self::Fallback> {
        Some((
            self.query_pattern.clone(),
            self.effective_record_type().to_string(),
        ))
    }

    /// The device may print the default record type explicitly.
    fn normalize_against(&mut self, desired: &Self) {
        if desired.record_type.is_none()
            && self.record_type.as_deref() == Some(DEFAULT_RECORD_TYPE)
        {
            self.record_type = None;
        }
    }
}

fn is_server(token: &str) -> bool {
    token.parse::<IpAddr>().is_ok()
}

fn is_sender(token: &str) -> bool {
    if let Some((address, prefix)) = token.split_once('/') {
        return is_server(address) && prefix.parse::<u8>().is_ok();
    }
    if let Some((from, to)) = token.split_once('-') {
        return is_server(from) && is_server(to);
    }
    is_server(token)
}

fn parse_fields(id: u32, tokens: &[&str]) -> Result<DnsServerSelect, String> {
    let mut i = 0;
    let mut servers = Vec::new();

    while servers.len() < 2 && tokens.get(i).is_some_and(|t| is_server(t)) {
        let mut server = DnsServer::new(tokens[i]);
        i += 1;
        match tokens.get(i).copied() {
            Some("edns=on") => {
                server.edns = Some(true);
                i += 1;
            }
            Some("edns=off") => {
                server.edns = Some(false);
                i += 1;
            }
            _ => {}
        }
        servers.push(server);
    }
    if servers.is_empty() {
        return Err("missing server".into());
    }

    let mut record_type = None;
    if let Some(token) = tokens.get(i).filter(|t| RECORD_TYPES.contains(*t)) {
        record_type = Some(token.to_string());
        i += 1;
    }

    let query_pattern = tokens.get(i).ok_or("missing query pattern")?.to_string();
    i += 1;

    let mut select = DnsServerSelect::new(id, servers, query_pattern);
    select.record_type = record_type;

    if let Some(sender) = tokens.get(i).filter(|t| is_sender(t)) {
        select.original_sender = Some(sender.to_string());
        i += 1;
    }

    match &tokens[i..] {
        [] => {}
        ["restrict", "pp", pp] => select.restrict_pp = Some(parse_number(pp, "restrict pp")?),
        rest => return Err(format!("unexpected '{}'", rest.join(" "))),
    }
    Ok(select)
}

/// DNS server select feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsServerSelects;

impl DnsServerSelects {
    /// Decode selectors from any bucket of lines.
    pub fn decode_lines(lines: &[Line]) -> Decoded<DnsServerSelect> {
        let mut decoded = Decoded::new();
        let mut selects: IndexMap<u32, DnsServerSelect> = IndexMap::new();

        for line in lines {
            let Some(rest) = line.text.strip_prefix(PREFIX) else {
                continue;
            };
            let tokens: Vec<&str> = rest.split_whitespace().collect();
            let parsed = match tokens.split_first() {
                Some((id, fields)) => {
                    parse_number(id, "selector id").and_then(|id| parse_fields(id, fields))
                }
                None => Err("missing selector id".to_string()),
            };
            match parsed {
                Ok(select) if selects.contains_key(&select.id) => {
                    decoded.reject(FEATURE, line, format!("duplicate selector {}", select.id));
                }
                Ok(select) => match Self::validate(&select) {
                    Ok(()) => {
                        selects.insert(select.id, select);
                    }
                    Err(error) => decoded.reject(FEATURE, line, error.to_string()),
                },
                Err(reason) => decoded.reject(FEATURE, line, reason),
            }
        }

        decoded.records = selects.into_values().collect();
        decoded
    }
}

impl Feature for DnsServerSelects {
    type Record = DnsServerSelect;

    const NAME: &'static str = FEATURE;

    fn show_command() -> &'static str {
        "show config | grep \"dns server select\""
    }

    fn decode(stanza: &Stanza) -> Decoded<DnsServerSelect> {
        Self::decode_lines(stanza.top_level())
    }

    fn validate(select: &DnsServerSelect) -> Result<(), ValidationError> {
        check_range(FEATURE, "id", select.id.into(), 1, 65535)?;
        if select.servers.is_empty() {
            return Err(ValidationError::Missing {
                feature: FEATURE,
                field: "servers",
            });
        }
        if select.servers.len() > 2 {
            return Err(ValidationError::OutOfRange {
                feature: FEATURE,
                field: "servers",
                value: select.servers.len() as u64,
                min: 1,
                max: 2,
            });
        }
        for server in &select.servers {
            if !is_server(&server.address) {
                return Err(ValidationError::InvalidValue {
                    feature: FEATURE,
                    field: "servers",
                    value: server.address.clone(),
                });
            }
        }
        if let Some(record_type) = &select.record_type {
            if !RECORD_TYPES.contains(&record_type.as_str()) {
                return Err(ValidationError::InvalidValue {
                    feature: FEATURE,
                    field: "record_type",
                    value: record_type.clone(),
                });
            }
        }
        single_token(FEATURE, "query_pattern", &select.query_pattern)?;
        if is_server(&select.query_pattern) || RECORD_TYPES.contains(&select.query_pattern.as_str()) {
            return Err(ValidationError::InvalidValue {
                feature: FEATURE,
                field: "query_pattern",
                value: select.query_pattern.clone(),
            });
        }
        if let Some(sender) = &select.original_sender {
            if !is_sender(sender) {
                return Err(ValidationError::InvalidValue {
                    feature: FEATURE,
                    field: "original_sender",
                    value: sender.clone(),
                });
            }
        }
        if let Some(pp) = select.restrict_pp {
            check_range(FEATURE, "restrict_pp", pp.into(), 1, 65535)?;
        }
        Ok(())
    }

    fn encode(select: &DnsServerSelect, intent: Intent) -> Result<Vec<String>, ValidationError> {
        match intent {
            Intent::Set => {
                Self::validate(select)?;
                Ok(vec![select.render()])
            }
            Intent::Delete => Ok(vec![format!("no dns server select {}", select.id)]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{decode_text, round_trip};
    use crate::reconcile::{Resolution, reconcile};

    #[test]
    fn test_decode_phases() {
        let decoded = decode_text::<DnsServerSelects>(
            "dns server select 1 192.168.1.1 edns=on example.com\n\
             dns server select 2 10.0.0.1 10.0.0.2 edns=off aaaa *.corp.example 192.168.1.0/24\n\
             dns server select 3 2001:db8::53 . restrict pp 1\n\
             dns server select 4 10.0.0.1 a . 192.168.1.10-192.168.1.20\n",
        );
        assert!(decoded.is_clean());
        assert_eq!(decoded.records.len(), 4);

        let first = &decoded.records[0];
        assert_eq!(first.servers, vec![DnsServer::new("192.168.1.1").with_edns(true)]);
        assert_eq!(first.record_type, None);
        assert_eq!(first.query_pattern, "example.com");

        let second = &decoded.records[1];
        assert_eq!(second.servers[0].edns, None);
        assert_eq!(second.servers[1].edns, Some(false));
        assert_eq!(second.record_type.as_deref(), Some("aaaa"));
        assert_eq!(second.original_sender.as_deref(), Some("192.168.1.0/24"));

        let third = &decoded.records[2];
        assert_eq!(third.query_pattern, ".");
        assert_eq!(third.restrict_pp, Some(1));

        let fourth = &decoded.records[3];
        assert_eq!(fourth.record_type.as_deref(), Some("a"));
        assert_eq!(fourth.original_sender.as_deref(), Some("192.168.1.10-192.168.1.20"));
    }

    #[test]
    fn test_wrapped_edns_flag() {
        let decoded = decode_text::<DnsServerSelects>(
            "dns server select 1 192.168.1.1 edns\n=on example.com\n",
        );
        assert!(decoded.is_clean());
        assert_eq!(decoded.records[0].servers[0].edns, Some(true));
    }

    #[test]
    fn test_decode_errors() {
        let decoded = decode_text::<DnsServerSelects>(
            "dns server select 1 example.com\n\
             dns server select 2 10.0.0.1\n\
             dns server select 3 10.0.0.1 . restrict pp x\n\
             dns server select 4 10.0.0.1 . 10.0.0.0/8 extra\n\
             dns server select 5 10.0.0.1 .\n\
             dns server select 5 10.0.0.2 .\n",
        );
        assert_eq!(decoded.errors.len(), 5);
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].servers[0].address, "10.0.0.1");
    }

    #[test]
    fn test_unencodable_selector_is_rejected() {
        let decoded = decode_text::<DnsServerSelects>(
            "dns server select 0 10.0.0.1 .\n\
             dns server select 2 10.0.0.1 10.0.0.2 10.0.0.3\n\
             dns server select 3 10.0.0.1 . restrict pp 70000\n\
             dns server select 0 10.0.0.9 example.com\n",
        );
        assert_eq!(decoded.errors.len(), 4);
        assert!(decoded.errors[1].reason.contains("query_pattern"));
        assert_eq!(decoded.errors[2].line_number, 3);
        assert!(decoded.records.is_empty());
    }

    #[test]
    fn test_every_decoded_record_encodes() {
        let decoded = decode_text::<DnsServerSelects>(
            "dns server select 1 192.168.1.1 edns=on example.com\n\
             dns server select 2 10.0.0.1 10.0.0.2 edns=off aaaa *.corp.example 192.168.1.0/24\n\
             dns server select 3 2001:db8::53 . restrict pp 1\n\
             dns server select 4 10.0.0.1 a . 192.168.1.10-192.168.1.20\n",
        );
        assert_eq!(decoded.records.len(), 4);
        for select in &decoded.records {
            assert!(DnsServerSelects::encode(select, Intent::Set).is_ok(), "{:?}", select);
            assert_eq!(round_trip::<DnsServerSelects>(select).records, vec![select.clone()]);
        }
    }

    #[test]
    fn test_encode() {
        let select = DnsServerSelect::new(
            2,
            vec![DnsServer::new("10.0.0.1").with_edns(true), DnsServer::new("10.0.0.2")],
            "*.corp.example",
        )
        .with_record_type("aaaa")
        .with_original_sender("192.168.1.0/24");
        assert_eq!(
            DnsServerSelects::encode(&select, Intent::Set).unwrap(),
            vec!["dns server select 2 10.0.0.1 edns=on 10.0.0.2 aaaa *.corp.example 192.168.1.0/24"]
        );
        assert_eq!(
            DnsServerSelects::encode(&select, Intent::Delete).unwrap(),
            vec!["no dns server select 2"]
        );
        assert_eq!(round_trip::<DnsServerSelects>(&select).records, vec![select]);
    }

    #[test]
    fn test_validate() {
        let three = DnsServerSelect::new(
            1,
            vec![
                DnsServer::new("10.0.0.1"),
                DnsServer::new("10.0.0.2"),
                DnsServer::new("10.0.0.3"),
            ],
            ".",
        );
        assert!(matches!(
            DnsServerSelects::validate(&three),
            Err(ValidationError::OutOfRange { field: "servers", .. })
        ));
        let bad_type = DnsServerSelect::new(1, vec![DnsServer::new("10.0.0.1")], ".")
            .with_record_type("txt");
        assert!(DnsServerSelects::validate(&bad_type).is_err());
        let bad_server = DnsServerSelect::new(1, vec![DnsServer::new("ns.example")], ".");
        assert!(DnsServerSelects::validate(&bad_server).is_err());
    }

    #[test]
    fn test_reconcile_normalizes_default_record_type() {
        let desired = vec![DnsServerSelect::new(1, vec![DnsServer::new("10.0.0.1")], "example.com")];
        let observed = vec![
            DnsServerSelect::new(1, vec![DnsServer::new("10.0.0.1")], "example.com")
                .with_record_type("a"),
        ];
        let result = reconcile(&desired, &observed);
        assert!(matches!(result.slots[0].resolution, Resolution::MatchedWithKey { .. }));
        assert_eq!(result.into_normalized(), desired);
    }

    #[test]
    fn test_fallback_treats_absent_type_as_a() {
        let desired = vec![DnsServerSelect::new(1, vec![DnsServer::new("10.0.0.1")], "example.com")];
        let observed = vec![
            DnsServerSelect::new(8, vec![DnsServer::new("10.0.0.1")], "example.com")
                .with_record_type("a"),
        ];
        let result = reconcile(&desired, &observed);
        assert!(matches!(result.slots[0].resolution, Resolution::MatchedByFallback { .. }));
        assert_eq!(result.normalized()[0].record_type, None);
        assert_eq!(result.normalized()[0].id, 8);
    }
}
