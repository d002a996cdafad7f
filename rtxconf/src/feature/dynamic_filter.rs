//! Dynamic (stateful) IP filters.
//!
//! Two forms share one command:
//!
//! ```text
//! ip filter dynamic 200080 * * ftp syslog on
//! ip filter dynamic 200090 * * filter 200091 in 200092 out 200093 timeout=60
//! ```
//!
//! The `filter` keyword selects the rule-list form; otherwise the token
//! after the addresses is an application protocol.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::ip_filter::IpFamily;
use super::{
    Decoded, Feature, Intent, check_range, join_numbers, on_off, parse_number, parse_on_off,
    single_token,
};
use crate::error::ValidationError;
use crate::reconcile::Reconcilable;
use crate::text::{Line, Stanza};

const FEATURE: &str = "dynamic_filter";

static DYNAMIC_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(ip|ipv6) filter dynamic (\S+)(?: (.*))?$").expect("static dynamic filter pattern")
});

/// Application names vary by firmware (`ftp`, `sip`, `https`, `pptp`, ...),
/// so any single name token is accepted except the rule-list keyword.
fn is_protocol(token: &str) -> bool {
    token == "*"
        || (token != "filter"
            && !token.is_empty()
            && token.starts_with(|c: char| c.is_ascii_alphanumeric())
            && token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'))
}

/// What a dynamic filter inspects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum DynamicRule {
    /// Application protocol inspection (`... * * ftp`).
    Protocol { protocol: String },

    /// Rule-list form (`... filter F.. [in F..] [out F..]`).
    Filters {
        filters: Vec<u32>,
        #[serde(default)]
        inbound: Option<Vec<u32>>,
        #[serde(default)]
        outbound: Option<Vec<u32>>,
    },
}

impl DynamicRule {
    fn render(&self) -> String {
        match self {
            DynamicRule::Protocol { protocol } => protocol.clone(),
            DynamicRule::Filters {
                filters,
                inbound,
                outbound,
            } => {
                let mut out = format!("filter {}", join_numbers(filters));
                if let Some(inbound) = inbound {
                    out.push_str(" in ");
                    out.push_str(&join_numbers(inbound));
                }
                if let Some(outbound) = outbound {
                    out.push_str(" out ");
                    out.push_str(&join_numbers(outbound));
                }
                out
            }
        }
    }
}

/// One dynamic filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicFilter {
    /// Address family.
    pub family: IpFamily,

    /// Filter number.
    pub number: u32,

    /// Source address or `*`.
    pub source: String,

    /// Destination address or `*`.
    pub destination: String,

    /// Protocol or rule-list form.
    pub rule: DynamicRule,

    /// `syslog on|off`, absent when not printed.
    #[serde(default)]
    pub syslog: Option<bool>,

    /// `timeout=N` seconds.
    #[serde(default)]
    pub timeout: Option<u32>,
}

impl DynamicFilter {
    /// Create an IPv4 protocol-form dynamic filter.
    pub fn protocol(
        number: u32,
        source: impl Into<String>,
        destination: impl Into<String>,
        protocol: impl Into<String>,
    ) -> Self {
        Self {
            family: IpFamily::Ipv4,
            number,
            source: source.into(),
            destination: destination.into(),
            rule: DynamicRule::Protocol {
                protocol: protocol.into(),
            },
            syslog: None,
            timeout: None,
        }
    }

    /// Create an IPv4 rule-list dynamic filter.
    pub fn filters(
        number: u32,
        source: impl Into<String>,
        destination: impl Into<String>,
        filters: Vec<u32>,
        inbound: Option<Vec<u32>>,
        outbound: Option<Vec<u32>>,
    ) -> Self {
        Self {
            family: IpFamily::Ipv4,
            number,
            source: source.into(),
            destination: destination.into(),
            rule: DynamicRule::Filters {
                filters,
                inbound,
                outbound,
            },
            syslog: None,
            timeout: None,
        }
    }
}

impl Reconcilable for DynamicFilter {
    type Key = (IpFamily, u32);
    type Fallback = (IpFamily, String, String, DynamicRule);

    fn identity(&self) -> Self::Key {
        (self.family, self.number)
    }

    fn fallback_key(&self) -> Option<Self::Fallback> {
        Some((
            self.family,
            self.source.clone(),
            self.destination.clone(),
            self.rule.clone(),
        ))
    }
}

/// Dynamic filter feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicFilters;

impl DynamicFilters {
    /// Decode dynamic filters from any bucket of lines.
    pub fn decode_lines(lines: &[Line]) -> Decoded<DynamicFilter> {
        let mut decoded = Decoded::new();
        for line in lines {
            let Some(caps) = DYNAMIC_LINE.captures(&line.text) else {
                continue;
            };
            let family = IpFamily::from_prefix(&caps[1]).unwrap_or(IpFamily::Ipv4);
            let rest = caps.get(3).map_or("", |m| m.as_str());
            match parse_dynamic(family, &caps[2], rest) {
                Ok(filter) => decoded.push_checked::<Self>(line, filter),
                Err(reason) => decoded.reject(FEATURE, line, reason),
            }
        }
        decoded
    }
}

#[derive(Clone, Copy, PartialEq)]
enum ListSection {
    Filters,
    In,
    Out,
}

fn parse_dynamic(family: IpFamily, number: &str, rest: &str) -> Result<DynamicFilter, String> {
    let number = parse_number(number, "filter number")?;
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    if tokens.len() < 3 {
        return Err("expected source, destination and protocol or filter list".into());
    }

    let mut i = 3;
    let rule = if tokens[2] == "filter" {
        let mut filters = Vec::new();
        let mut inbound: Option<Vec<u32>> = None;
        let mut outbound: Option<Vec<u32>> = None;
        let mut section = ListSection::Filters;
        while let Some(&token) = tokens.get(i) {
            match token {
                "in" if inbound.is_none() => {
                    section = ListSection::In;
                    inbound = Some(Vec::new());
                }
                "out" if outbound.is_none() => {
                    section = ListSection::Out;
                    outbound = Some(Vec::new());
                }
                _ if token.starts_with(|c: char| c.is_ascii_digit()) => {
                    let n = parse_number(token, "filter number")?;
                    match section {
                        ListSection::Filters => filters.push(n),
                        ListSection::In => inbound.get_or_insert_with(Vec::new).push(n),
                        ListSection::Out => outbound.get_or_insert_with(Vec::new).push(n),
                    }
                }
                _ => break,
            }
            i += 1;
        }
        if filters.is_empty() {
            return Err("filter keyword without filter numbers".into());
        }
        if inbound.as_ref().is_some_and(Vec::is_empty) || outbound.as_ref().is_some_and(Vec::is_empty) {
            return Err("in/out keyword without filter numbers".into());
        }
        DynamicRule::Filters {
            filters,
            inbound,
            outbound,
        }
    } else if is_protocol(tokens[2]) {
        DynamicRule::Protocol {
            protocol: tokens[2].to_string(),
        }
    } else {
        return Err(format!("invalid protocol '{}'", tokens[2]));
    };

    let mut syslog = None;
    let mut timeout = None;
    while let Some(&token) = tokens.get(i) {
        if token == "syslog" {
            let value = tokens.get(i + 1).ok_or("syslog without on/off")?;
            syslog = Some(parse_on_off(value, "syslog")?);
            i += 2;
        } else if let Some(value) = token.strip_prefix("timeout=") {
            timeout = Some(parse_number(value, "timeout")?);
            i += 1;
        } else {
            return Err(format!("unexpected option '{}'", token));
        }
    }

    Ok(DynamicFilter {
        family,
        number,
        source: tokens[0].to_string(),
        destination: tokens[1].to_string(),
        rule,
        syslog,
        timeout,
    })
}

impl Feature for DynamicFilters {
    type Record = DynamicFilter;

    const NAME: &'static str = FEATURE;

    fn show_command() -> &'static str {
        "show config | grep \"filter dynamic\""
    }

    fn decode(stanza: &Stanza) -> Decoded<DynamicFilter> {
        Self::decode_lines(stanza.top_level())
    }

    fn validate(filter: &DynamicFilter) -> Result<(), ValidationError> {
        check_range(FEATURE, "number", filter.number.into(), 1, 2_147_483_647)?;
        single_token(FEATURE, "source", &filter.source)?;
        single_token(FEATURE, "destination", &filter.destination)?;
        match &filter.rule {
            DynamicRule::Protocol { protocol } => {
                if !is_protocol(protocol) {
                    return Err(ValidationError::InvalidValue {
                        feature: FEATURE,
                        field: "protocol",
                        value: protocol.clone(),
                    });
                }
            }
            DynamicRule::Filters {
                filters,
                inbound,
                outbound,
            } => {
                if filters.is_empty() {
                    return Err(ValidationError::Missing {
                        feature: FEATURE,
                        field: "filters",
                    });
                }
                if inbound.as_ref().is_some_and(Vec::is_empty) {
                    return Err(ValidationError::Missing {
                        feature: FEATURE,
                        field: "inbound",
                    });
                }
                if outbound.as_ref().is_some_and(Vec::is_empty) {
                    return Err(ValidationError::Missing {
                        feature: FEATURE,
                        field: "outbound",
                    });
                }
            }
        }
        if let Some(timeout) = filter.timeout {
            check_range(FEATURE, "timeout", timeout.into(), 1, 21_474_836)?;
        }
        Ok(())
    }

    fn encode(filter: &DynamicFilter, intent: Intent) -> Result<Vec<String>, ValidationError> {
        let prefix = filter.family.prefix();
        if intent == Intent::Delete {
            return Ok(vec![format!("no {} filter dynamic {}", prefix, filter.number)]);
        }

        Self::validate(filter)?;
        let mut command = format!(
            "{} filter dynamic {} {} {} {}",
            prefix,
            filter.number,
            filter.source,
            filter.destination,
            filter.rule.render()
        );
        if let Some(syslog) = filter.syslog {
            command.push_str(" syslog ");
            command.push_str(on_off(syslog));
        }
        if let Some(timeout) = filter.timeout {
            command.push_str(&format!(" timeout={}", timeout));
        }
        Ok(vec![command])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{decode_text, round_trip};

    #[test]
    fn test_decode_both_forms() {
        let decoded = decode_text::<DynamicFilters>(
            "ip filter dynamic 200080 * * ftp syslog on\n\
             ip filter dynamic 200090 * * filter 200091 in 200092 out 200093 timeout=60\n\
             ipv6 filter dynamic 101 * * www\n",
        );
        assert!(decoded.is_clean());
        assert_eq!(decoded.records.len(), 3);

        let ftp = &decoded.records[0];
        assert_eq!(
            ftp.rule,
            DynamicRule::Protocol {
                protocol: "ftp".into()
            }
        );
        assert_eq!(ftp.syslog, Some(true));

        let list = &decoded.records[1];
        assert_eq!(
            list.rule,
            DynamicRule::Filters {
                filters: vec![200091],
                inbound: Some(vec![200092]),
                outbound: Some(vec![200093]),
            }
        );
        assert_eq!(list.timeout, Some(60));

        assert_eq!(decoded.records[2].family, IpFamily::Ipv6);
        assert_eq!(decoded.records[2].syslog, None);
    }

    #[test]
    fn test_keyword_not_field_count_selects_form() {
        // Same field count, different forms.
        let decoded = decode_text::<DynamicFilters>(
            "ip filter dynamic 1 * * filter 10\nip filter dynamic 2 * * tcp syslog off\n",
        );
        assert!(matches!(decoded.records[0].rule, DynamicRule::Filters { .. }));
        assert!(matches!(decoded.records[1].rule, DynamicRule::Protocol { .. }));
        assert_eq!(decoded.records[1].syslog, Some(false));
    }

    #[test]
    fn test_decode_errors() {
        let decoded = decode_text::<DynamicFilters>(
            "ip filter dynamic 1 * * filter\n\
             ip filter dynamic 2 * * ftp bogus\n\
             ip filter dynamic 3 * * filter 5 in\n\
             ip filter dynamic 4 * * ftp\n",
        );
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.errors.len(), 3);
        assert_eq!(decoded.records[0].number, 4);
    }

    #[test]
    fn test_round_trip_preserves_form() {
        let decoded = decode_text::<DynamicFilters>(
            "ip filter dynamic 200080 * * ftp syslog on\n\
             ip filter dynamic 200090 192.168.1.0/24 * filter 200091 200095 out 200093 timeout=60\n",
        );
        for filter in &decoded.records {
            assert_eq!(round_trip::<DynamicFilters>(filter).records, vec![filter.clone()]);
        }
    }

    #[test]
    fn test_every_decoded_record_encodes() {
        let decoded = decode_text::<DynamicFilters>(
            "ip filter dynamic 200080 * * ftp syslog on\n\
             ip filter dynamic 200081 * * sip\n\
             ip filter dynamic 200082 * * https timeout=30\n\
             ip filter dynamic 200083 * * pptp\n\
             ip filter dynamic 200090 * * filter 200091 in 200092 out 200093 timeout=60\n\
             ipv6 filter dynamic 101 * * www\n\
             ip filter dynamic 200099 * * ^bad\n",
        );
        assert_eq!(decoded.records.len(), 6);
        assert_eq!(decoded.errors.len(), 1);
        for filter in &decoded.records {
            assert!(DynamicFilters::encode(filter, Intent::Set).is_ok(), "{:?}", filter);
            assert_eq!(round_trip::<DynamicFilters>(filter).records, vec![filter.clone()]);
        }
    }

    #[test]
    fn test_validate() {
        let keyword = DynamicFilter::protocol(1, "*", "*", "filter");
        assert!(DynamicFilters::validate(&keyword).is_err());
        let spaced = DynamicFilter::protocol(1, "*", "*", "my app");
        assert!(DynamicFilters::validate(&spaced).is_err());
        assert!(DynamicFilters::validate(&DynamicFilter::protocol(1, "*", "*", "sip")).is_ok());

        let empty_in = DynamicFilter::filters(1, "*", "*", vec![5], Some(vec![]), None);
        assert_eq!(
            DynamicFilters::encode(&empty_in, Intent::Set),
            Err(ValidationError::Missing {
                feature: FEATURE,
                field: "inbound"
            })
        );

        let no_filters = DynamicFilter::filters(1, "*", "*", vec![], None, None);
        assert!(DynamicFilters::validate(&no_filters).is_err());
    }

    #[test]
    fn test_encode() {
        let mut filter = DynamicFilter::filters(9, "*", "*", vec![1, 2], None, Some(vec![3]));
        filter.syslog = Some(false);
        assert_eq!(
            DynamicFilters::encode(&filter, Intent::Set).unwrap(),
            vec!["ip filter dynamic 9 * * filter 1 2 out 3 syslog off"]
        );
        assert_eq!(
            DynamicFilters::encode(&filter, Intent::Delete).unwrap(),
            vec!["no ip filter dynamic 9"]
        );
    }
}
