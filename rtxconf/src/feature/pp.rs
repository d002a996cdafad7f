//! PP (point-to-point) interfaces.
//!
//! ```text
//! pp select 1
//!  description pp PRV/PPPoE/0:provider
//!  pp always-on on
//!  pppoe use lan2
//!  pp auth accept pap chap
//!  pp auth myname user@example.jp secret
//!  ppp lcp mru on 1454
//!  ip pp mtu 1454
//!  ip pp nat descriptor 1000
//!  ip pp secure filter in 200020 200099
//!  pp enable 1
//! ```
//!
//! The device prints some descriptions with a leading `pp` word and some
//! without; which form was used is kept so re-encoding is stable.
//!
//! The anonymous context serves remote-access clients and usually carries
//! the server side of authentication:
//!
//! ```text
//! pp select anonymous
//!  pp bind tunnel1
//!  pp auth request mschap-v2
//!  ip pp remote address pool 192.168.1.200-192.168.1.210
//! ```

use std::fmt;
use std::net::Ipv4Addr;

use log::trace;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::binding::binding_command;
use super::{
    Decoded, Direction, Feature, FilterBinding, Intent, check_range, on_off, parse_number,
    parse_on_off, require, single_token,
};
use crate::dialect::rtx::PP;
use crate::error::ValidationError;
use crate::reconcile::Reconcilable;
use crate::text::{ContextId, Line, Stanza};

const FEATURE: &str = "pp";

const AUTH_METHODS: &[&str] = &["pap", "chap", "mschap", "mschap-v2"];

const AUTH_REQUEST_METHODS: &[&str] = &["pap", "chap", "mschap", "mschap-v2", "chap-pap"];

/// Which PP context a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PpSelector {
    Number(u32),
    Anonymous,
}

impl PpSelector {
    fn from_context(id: &ContextId) -> Option<Self> {
        match id {
            ContextId::Number(n) => Some(PpSelector::Number(*n)),
            ContextId::Name(name) if name == "anonymous" => Some(PpSelector::Anonymous),
            ContextId::Name(_) => None,
        }
    }

    fn parse(token: &str) -> Option<Self> {
        match token {
            "anonymous" => Some(PpSelector::Anonymous),
            n => n.parse().ok().map(PpSelector::Number),
        }
    }
}

impl fmt::Display for PpSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PpSelector::Number(n) => write!(f, "{}", n),
            PpSelector::Anonymous => f.write_str("anonymous"),
        }
    }
}

/// Interface description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    pub text: String,

    /// Printed as `description pp TEXT`.
    #[serde(default)]
    pub pp_keyword: bool,
}

/// `pp auth myname USER PASSWORD`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthName {
    pub user: String,

    /// Never serialized.
    #[serde(skip, default = "empty_secret")]
    pub password: SecretString,
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}

impl AuthName {
    /// Create credentials.
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: SecretString::from(password.into()),
        }
    }
}

impl PartialEq for AuthName {
    fn eq(&self, other: &Self) -> bool {
        self.user == other.user && self.password.expose_secret() == other.password.expose_secret()
    }
}

impl Eq for AuthName {}

/// `pp auth request METHOD [arrive-only]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub method: String,

    /// Only request authentication on incoming calls.
    #[serde(default)]
    pub arrive_only: bool,
}

impl AuthRequest {
    /// Request `method` in both directions.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            arrive_only: false,
        }
    }
}

/// `ip pp remote address pool START-END` or `dhcp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressPool {
    Range { start: Ipv4Addr, end: Ipv4Addr },
    Dhcp,
}

impl AddressPool {
    fn parse(value: &str) -> Result<Self, String> {
        if value == "dhcp" {
            return Ok(AddressPool::Dhcp);
        }
        let invalid = || format!("invalid address pool '{}'", value);
        let (start, end) = value.split_once('-').ok_or_else(invalid)?;
        Ok(AddressPool::Range {
            start: start.parse().map_err(|_| invalid())?,
            end: end.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for AddressPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressPool::Range { start, end } => write!(f, "{}-{}", start, end),
            AddressPool::Dhcp => f.write_str("dhcp"),
        }
    }
}

/// `pp disconnect time off|N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectTime {
    Off,
    Seconds(u32),
}

/// One `pp select` context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PpInterface {
    pub selector: PpSelector,

    #[serde(default)]
    pub description: Option<Description>,

    /// `pppoe use IF`.
    #[serde(default)]
    pub pppoe_use: Option<String>,

    /// `pp bind IF`.
    #[serde(default)]
    pub bind: Option<String>,

    #[serde(default)]
    pub pppoe_service_name: Option<String>,

    #[serde(default)]
    pub pppoe_ac_name: Option<String>,

    /// `pp auth accept M [M2]`; `None` when not printed.
    #[serde(default)]
    pub auth_accept: Option<Vec<String>>,

    #[serde(default)]
    pub auth_request: Option<AuthRequest>,

    #[serde(default)]
    pub auth_myname: Option<AuthName>,

    #[serde(default)]
    pub always_on: Option<bool>,

    #[serde(default)]
    pub disconnect_time: Option<DisconnectTime>,

    /// `ip pp address A`.
    #[serde(default)]
    pub ip_address: Option<String>,

    /// Addresses handed to remote-access clients.
    #[serde(default)]
    pub remote_address_pool: Option<AddressPool>,

    #[serde(default)]
    pub mtu: Option<u32>,

    #[serde(default)]
    pub tcp_mss_limit: Option<u32>,

    #[serde(default)]
    pub nat_descriptor: Option<u32>,

    #[serde(default)]
    pub secure_filter_in: Option<FilterBinding>,

    #[serde(default)]
    pub secure_filter_out: Option<FilterBinding>,

    /// Printed `pp enable N`.
    #[serde(default)]
    pub enabled: bool,
}

impl PpInterface {
    /// Create an empty interface.
    pub fn new(selector: PpSelector) -> Self {
        Self {
            selector,
            description: None,
            pppoe_use: None,
            bind: None,
            pppoe_service_name: None,
            pppoe_ac_name: None,
            auth_accept: None,
            auth_request: None,
            auth_myname: None,
            always_on: None,
            disconnect_time: None,
            ip_address: None,
            remote_address_pool: None,
            mtu: None,
            tcp_mss_limit: None,
            nat_descriptor: None,
            secure_filter_in: None,
            secure_filter_out: None,
            enabled: false,
        }
    }

    /// Use PPPoE over an interface.
    pub fn with_pppoe(mut self, interface: impl Into<String>) -> Self {
        self.pppoe_use = Some(interface.into());
        self
    }

    /// Set the accepted authentication methods.
    pub fn with_auth_accept<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.auth_accept = Some(methods.into_iter().map(Into::into).collect());
        self
    }

    /// Set the login credentials.
    pub fn with_auth_myname(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth_myname = Some(AuthName::new(user, password));
        self
    }

    /// Set the enabled flag.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn apply(&mut self, text: &str) -> Result<(), String> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        match tokens.as_slice() {
            ["description", "pp", _, ..] => {
                self.description = Some(Description {
                    text: text["description pp".len()..].trim().to_string(),
                    pp_keyword: true,
                });
            }
            ["description", _, ..] => {
                self.description = Some(Description {
                    text: text["description".len()..].trim().to_string(),
                    pp_keyword: false,
                });
            }
            ["pppoe", "use", interface] => self.pppoe_use = Some(interface.to_string()),
            ["pp", "bind", interface] => self.bind = Some(interface.to_string()),
            ["pppoe", "service-name", _, ..] => {
                self.pppoe_service_name = Some(tokens[2..].join(" "));
            }
            ["pppoe", "ac-name", _, ..] => self.pppoe_ac_name = Some(tokens[2..].join(" ")),
            ["pp", "auth", "accept", methods @ ..] if (1..=2).contains(&methods.len()) => {
                self.auth_accept = Some(methods.iter().map(|m| m.to_string()).collect());
            }
            ["pp", "auth", "request", method] => {
                self.auth_request = Some(AuthRequest::new(*method));
            }
            ["pp", "auth", "request", method, "arrive-only"] => {
                self.auth_request = Some(AuthRequest {
                    method: method.to_string(),
                    arrive_only: true,
                });
            }
            ["pp", "auth", "myname", user, password] => {
                self.auth_myname = Some(AuthName::new(*user, *password));
            }
            ["pp", "always-on", value] => self.always_on = Some(parse_on_off(value, "always-on")?),
            ["pp", "disconnect", "time", value] => {
                self.disconnect_time = Some(match *value {
                    "off" => DisconnectTime::Off,
                    n => DisconnectTime::Seconds(parse_number(n, "disconnect time")?),
                });
            }
            ["pp", switch @ ("enable" | "disable"), selector] => {
                if PpSelector::parse(selector) != Some(self.selector) {
                    return Err(format!("{} for another pp", switch));
                }
                self.enabled = *switch == "enable";
            }
            ["ip", "pp", "address", address] => self.ip_address = Some(address.to_string()),
            ["ip", "pp", "remote", "address", "pool", pool] => {
                self.remote_address_pool = Some(AddressPool::parse(pool)?);
            }
            ["ip", "pp", "mtu", value] => self.mtu = Some(parse_number(value, "mtu")?),
            ["ip", "pp", "tcp", "mss", "limit", value] => {
                self.tcp_mss_limit = Some(parse_number(value, "tcp mss limit")?);
            }
            ["ip", "pp", "nat", "descriptor", value] => {
                self.nat_descriptor = Some(parse_number(value, "nat descriptor")?);
            }
            ["ip", "pp", "secure", "filter", direction, rest @ ..] => {
                let binding = FilterBinding::parse(&rest.join(" "))?;
                match Direction::parse(direction) {
                    Some(Direction::In) => self.secure_filter_in = Some(binding),
                    Some(Direction::Out) => self.secure_filter_out = Some(binding),
                    None => return Err(format!("invalid direction '{}'", direction)),
                }
            }
            ["pppoe", "use" | "service-name" | "ac-name", ..]
            | ["pp", "bind" | "always-on" | "disconnect" | "enable" | "disable", ..]
            | ["pp", "auth", "accept" | "request" | "myname", ..]
            | ["ip", "pp", "address" | "mtu" | "tcp" | "nat" | "secure", ..]
            | ["ip", "pp", "remote", "address", "pool", ..] => {
                return Err("malformed command".into());
            }
            _ => trace!("pp {}: skipping '{}'", self.selector, text),
        }
        Ok(())
    }

    fn bindings(&self) -> [(Direction, Option<&FilterBinding>); 2] {
        [
            (Direction::In, self.secure_filter_in.as_ref()),
            (Direction::Out, self.secure_filter_out.as_ref()),
        ]
    }

    fn body(&self) -> Vec<String> {
        let mut commands = Vec::new();
        if let Some(description) = &self.description {
            commands.push(if description.pp_keyword {
                format!("description pp {}", description.text)
            } else {
                format!("description {}", description.text)
            });
        }
        if let Some(interface) = &self.pppoe_use {
            commands.push(format!("pppoe use {}", interface));
        }
        if let Some(interface) = &self.bind {
            commands.push(format!("pp bind {}", interface));
        }
        if let Some(name) = &self.pppoe_service_name {
            commands.push(format!("pppoe service-name {}", name));
        }
        if let Some(name) = &self.pppoe_ac_name {
            commands.push(format!("pppoe ac-name {}", name));
        }
        if let Some(methods) = &self.auth_accept {
            commands.push(format!("pp auth accept {}", methods.join(" ")));
        }
        match &self.auth_request {
            Some(AuthRequest { method, arrive_only: true }) => {
                commands.push(format!("pp auth request {} arrive-only", method));
            }
            Some(AuthRequest { method, arrive_only: false }) => {
                commands.push(format!("pp auth request {}", method));
            }
            None => {}
        }
        if let Some(auth) = &self.auth_myname {
            commands.push(format!(
                "pp auth myname {} {}",
                auth.user,
                auth.password.expose_secret()
            ));
        }
        if let Some(always_on) = self.always_on {
            commands.push(format!("pp always-on {}", on_off(always_on)));
        }
        match self.disconnect_time {
            Some(DisconnectTime::Off) => commands.push("pp disconnect time off".to_string()),
            Some(DisconnectTime::Seconds(n)) => commands.push(format!("pp disconnect time {}", n)),
            None => {}
        }
        if let Some(address) = &self.ip_address {
            commands.push(format!("ip pp address {}", address));
        }
        if let Some(pool) = &self.remote_address_pool {
            commands.push(format!("ip pp remote address pool {}", pool));
        }
        if let Some(mtu) = self.mtu {
            commands.push(format!("ip pp mtu {}", mtu));
        }
        if let Some(mss) = self.tcp_mss_limit {
            commands.push(format!("ip pp tcp mss limit {}", mss));
        }
        if let Some(descriptor) = self.nat_descriptor {
            commands.push(format!("ip pp nat descriptor {}", descriptor));
        }
        for (direction, binding) in self.bindings() {
            if let Some(binding) = binding {
                commands.push(binding_command("ip pp secure filter", direction, binding));
            }
        }
        commands
    }

    fn teardown(&self) -> Vec<String> {
        let mut commands = Vec::new();
        if self.description.is_some() {
            commands.push("no description".to_string());
        }
        if self.pppoe_use.is_some() {
            commands.push("no pppoe use".to_string());
        }
        if self.bind.is_some() {
            commands.push("no pp bind".to_string());
        }
        if self.pppoe_service_name.is_some() {
            commands.push("no pppoe service-name".to_string());
        }
        if self.pppoe_ac_name.is_some() {
            commands.push("no pppoe ac-name".to_string());
        }
        if self.auth_accept.is_some() {
            commands.push("no pp auth accept".to_string());
        }
        if self.auth_request.is_some() {
            commands.push("no pp auth request".to_string());
        }
        if self.auth_myname.is_some() {
            commands.push("no pp auth myname".to_string());
        }
        if self.always_on.is_some() {
            commands.push("pp always-on off".to_string());
        }
        if self.disconnect_time.is_some() {
            commands.push("no pp disconnect time".to_string());
        }
        if self.ip_address.is_some() {
            commands.push("no ip pp address".to_string());
        }
        if self.remote_address_pool.is_some() {
            commands.push("no ip pp remote address pool".to_string());
        }
        if self.mtu.is_some() {
            commands.push("no ip pp mtu".to_string());
        }
        if self.tcp_mss_limit.is_some() {
            commands.push("no ip pp tcp mss limit".to_string());
        }
        if self.nat_descriptor.is_some() {
            commands.push("no ip pp nat descriptor".to_string());
        }
        for (direction, binding) in self.bindings() {
            if binding.is_some() {
                commands.push(format!("no ip pp secure filter {}", direction));
            }
        }
        commands
    }
}

impl Reconcilable for PpInterface {
    type Key = PpSelector;
    type Fallback = String;

    fn identity(&self) -> PpSelector {
        self.selector
    }

    /// The interface the session runs over.
    fn fallback_key(&self) -> Option<String> {
        self.pppoe_use.clone().or_else(|| self.bind.clone())
    }
}

/// PP interface feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct PpInterfaces;

impl PpInterfaces {
    /// Decode one PP context. Any malformed line drops the interface.
    pub fn decode_context(selector: PpSelector, lines: &[Line], decoded: &mut Decoded<PpInterface>) {
        let mut pp = PpInterface::new(selector);
        let mut clean = true;
        for line in lines {
            if let Err(reason) = pp.apply(&line.text) {
                decoded.reject(FEATURE, line, format!("pp {}: {}", selector, reason));
                clean = false;
            }
        }
        if clean {
            decoded.push_context::<Self>(PP, selector, lines, pp, blame);
        }
    }
}

/// Command prefix of the line that sets a PP field.
fn blame(field: &str) -> &'static str {
    match field {
        "description" => "description",
        "pppoe_use" => "pppoe use",
        "bind" => "pp bind",
        "ip_address" => "ip pp address",
        "remote_address_pool" => "ip pp remote address pool",
        "auth_accept" => "pp auth accept",
        "auth_request" => "pp auth request",
        "mtu" => "ip pp mtu",
        "tcp_mss_limit" => "ip pp tcp mss",
        "nat_descriptor" => "ip pp nat descriptor",
        "disconnect_time" => "pp disconnect time",
        "secure filter" => "ip pp secure filter",
        f if f.starts_with("auth_myname") => "pp auth myname",
        _ => "",
    }
}

impl Feature for PpInterfaces {
    type Record = PpInterface;

    const NAME: &'static str = FEATURE;

    fn decode(stanza: &Stanza) -> Decoded<PpInterface> {
        let mut decoded = Decoded::new();
        for (key, lines) in stanza.contexts_of(PP) {
            match PpSelector::from_context(&key.id) {
                Some(selector) => Self::decode_context(selector, lines, &mut decoded),
                None => trace!("skipping unknown pp context {}", key),
            }
        }
        decoded
    }

    fn validate(pp: &PpInterface) -> Result<(), ValidationError> {
        if let PpSelector::Number(n) = pp.selector {
            check_range(FEATURE, "selector", n.into(), 1, 65535)?;
            if pp.pppoe_use.is_none() && pp.bind.is_none() {
                return Err(ValidationError::Requires {
                    feature: FEATURE,
                    field: "selector",
                    requirement: "pppoe use or pp bind".into(),
                });
            }
        }
        if let Some(description) = &pp.description {
            require(FEATURE, "description", &description.text)?;
            if description.text.contains('\n') {
                return Err(ValidationError::InvalidValue {
                    feature: FEATURE,
                    field: "description",
                    value: description.text.clone(),
                });
            }
        }
        let interfaces = [
            ("pppoe_use", &pp.pppoe_use),
            ("bind", &pp.bind),
            ("ip_address", &pp.ip_address),
        ];
        for (field, value) in interfaces {
            if let Some(value) = value {
                single_token(FEATURE, field, value)?;
            }
        }
        if let Some(methods) = &pp.auth_accept {
            if !(1..=2).contains(&methods.len()) {
                return Err(ValidationError::InvalidValue {
                    feature: FEATURE,
                    field: "auth_accept",
                    value: methods.join(" "),
                });
            }
            for method in methods {
                if !AUTH_METHODS.contains(&method.as_str()) {
                    return Err(ValidationError::InvalidValue {
                        feature: FEATURE,
                        field: "auth_accept",
                        value: method.clone(),
                    });
                }
            }
        }
        if let Some(request) = &pp.auth_request {
            if !AUTH_REQUEST_METHODS.contains(&request.method.as_str()) {
                return Err(ValidationError::InvalidValue {
                    feature: FEATURE,
                    field: "auth_request",
                    value: request.method.clone(),
                });
            }
        }
        if let Some(AddressPool::Range { start, end }) = pp.remote_address_pool {
            if start > end {
                return Err(ValidationError::InvalidValue {
                    feature: FEATURE,
                    field: "remote_address_pool",
                    value: format!("{}-{}", start, end),
                });
            }
        }
        if let Some(auth) = &pp.auth_myname {
            single_token(FEATURE, "auth_myname.user", &auth.user)?;
            let password = auth.password.expose_secret();
            if password.is_empty() || password.chars().any(char::is_whitespace) {
                return Err(ValidationError::InvalidValue {
                    feature: FEATURE,
                    field: "auth_myname.password",
                    value: "<redacted>".into(),
                });
            }
        }
        if let Some(mtu) = pp.mtu {
            check_range(FEATURE, "mtu", mtu.into(), 64, 1500)?;
        }
        if let Some(mss) = pp.tcp_mss_limit {
            check_range(FEATURE, "tcp_mss_limit", mss.into(), 536, 1460)?;
        }
        if let Some(descriptor) = pp.nat_descriptor {
            check_range(FEATURE, "nat_descriptor", descriptor.into(), 1, 2_147_483_647)?;
        }
        if let Some(DisconnectTime::Seconds(n)) = pp.disconnect_time {
            check_range(FEATURE, "disconnect_time", n.into(), 1, 21_474_836)?;
        }
        for (_, binding) in pp.bindings() {
            let Some(binding) = binding else { continue };
            for &number in binding.filters.iter().chain(&binding.dynamic) {
                check_range(FEATURE, "secure filter", number.into(), 1, 2_147_483_647)?;
            }
        }
        Ok(())
    }

    fn encode(pp: &PpInterface, intent: Intent) -> Result<Vec<String>, ValidationError> {
        let select = format!("pp select {}", pp.selector);
        match intent {
            Intent::Set => {
                Self::validate(pp)?;
                let mut commands = vec![select];
                commands.extend(pp.body());
                if pp.enabled {
                    commands.push(format!("pp enable {}", pp.selector));
                }
                commands.push("pp select none".to_string());
                Ok(commands)
            }
            Intent::Delete => {
                let mut commands = vec![format!("pp disable {}", pp.selector), select];
                commands.extend(pp.teardown());
                commands.push("pp select none".to_string());
                Ok(commands)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{decode_text, round_trip};

    const CONFIG: &str = "\
pp select 1
 description pp PRV/PPPoE/0:provider
 pp always-on on
 pppoe use lan2
 pp auth accept pap chap
 pp auth myname user@example.jp hunter2
 ppp lcp mru on 1454
 ip pp mtu 1454
 ip pp nat descriptor 1000
 ip pp secure filter in 200020 200099
 ip pp secure filter out 200020 dynamic 200080
 pp enable 1
pp select anonymous
 description vpn clients
 pp bind tunnel1
 pp auth accept mschap-v2
 pp auth request mschap-v2 arrive-only
 ip pp remote address pool 192.168.1.200-192.168.1.210
pp select none
";

    #[test]
    fn test_decode() {
        let decoded = decode_text::<PpInterfaces>(CONFIG);
        assert!(decoded.is_clean());
        assert_eq!(decoded.records.len(), 2);

        let pp = &decoded.records[0];
        assert_eq!(pp.selector, PpSelector::Number(1));
        let description = pp.description.as_ref().unwrap();
        assert_eq!(description.text, "PRV/PPPoE/0:provider");
        assert!(description.pp_keyword);
        assert_eq!(pp.pppoe_use.as_deref(), Some("lan2"));
        assert_eq!(pp.auth_accept, Some(vec!["pap".to_string(), "chap".to_string()]));
        assert_eq!(pp.auth_request, None);
        assert_eq!(pp.remote_address_pool, None);
        assert_eq!(pp.auth_myname.as_ref().unwrap().user, "user@example.jp");
        assert_eq!(pp.always_on, Some(true));
        assert_eq!(pp.mtu, Some(1454));
        assert_eq!(pp.nat_descriptor, Some(1000));
        assert_eq!(pp.secure_filter_out.as_ref().unwrap().dynamic, vec![200080]);
        assert!(pp.enabled);

        let anonymous = &decoded.records[1];
        assert_eq!(anonymous.selector, PpSelector::Anonymous);
        assert!(!anonymous.description.as_ref().unwrap().pp_keyword);
        assert_eq!(anonymous.fallback_key(), Some("tunnel1".to_string()));
        assert_eq!(
            anonymous.auth_request,
            Some(AuthRequest {
                method: "mschap-v2".into(),
                arrive_only: true,
            })
        );
        assert_eq!(
            anonymous.remote_address_pool,
            Some(AddressPool::Range {
                start: Ipv4Addr::new(192, 168, 1, 200),
                end: Ipv4Addr::new(192, 168, 1, 210),
            })
        );
    }

    #[test]
    fn test_every_decoded_record_encodes() {
        let decoded = decode_text::<PpInterfaces>(CONFIG);
        assert_eq!(decoded.records.len(), 2);
        for pp in &decoded.records {
            assert!(PpInterfaces::encode(pp, Intent::Set).is_ok(), "{:?}", pp);
        }
    }

    #[test]
    fn test_unencodable_interface_is_rejected() {
        let decoded = decode_text::<PpInterfaces>(
            "pp select 1\n\
             \x20pp always-on on\n\
             \x20pp enable 1\n\
             pp select 2\n\
             \x20pppoe use lan2\n\
             \x20ip pp remote address pool 10.0.0.9-10.0.0.1\n\
             pp select anonymous\n\
             \x20pp bind tunnel1\n\
             \x20pp auth request mschap-v2\n\
             pp select none\n",
        );
        assert_eq!(decoded.errors.len(), 2);
        assert_eq!(decoded.errors[0].line_number, 2);
        assert!(decoded.errors[0].reason.contains("pppoe use or pp bind"));
        assert_eq!(decoded.errors[1].line_number, 6);
        assert!(decoded.errors[1].reason.contains("remote_address_pool"));
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].selector, PpSelector::Anonymous);
    }

    #[test]
    fn test_auth_request_and_pool_forms() {
        let decoded = decode_text::<PpInterfaces>(
            "pp select anonymous\n\
             \x20pp bind tunnel2\n\
             \x20pp auth request chap\n\
             \x20ip pp remote address pool dhcp\n\
             pp select 3\n\
             \x20pp bind tunnel3\n\
             \x20ip pp remote address pool 10.0.0.1\n\
             pp select none\n",
        );
        assert_eq!(decoded.errors.len(), 1);
        assert_eq!(decoded.errors[0].line_number, 7);
        assert!(decoded.errors[0].reason.contains("invalid address pool"));

        let pp = &decoded.records[0];
        assert_eq!(pp.auth_request, Some(AuthRequest::new("chap")));
        assert_eq!(pp.remote_address_pool, Some(AddressPool::Dhcp));
        assert_eq!(
            PpInterfaces::encode(pp, Intent::Set).unwrap(),
            vec![
                "pp select anonymous",
                "pp bind tunnel2",
                "pp auth request chap",
                "ip pp remote address pool dhcp",
                "pp select none",
            ]
        );
    }

    #[test]
    fn test_auth_accept_absent_differs_from_set() {
        let bare = PpInterface::new(PpSelector::Number(1)).with_pppoe("lan2");
        assert_eq!(bare.auth_accept, None);
        assert!(!PpInterfaces::encode(&bare, Intent::Set)
            .unwrap()
            .iter()
            .any(|c| c.starts_with("pp auth accept")));

        let chap = bare.clone().with_auth_accept(["chap"]);
        assert_ne!(chap, bare);
        assert!(PpInterfaces::encode(&chap, Intent::Set)
            .unwrap()
            .contains(&"pp auth accept chap".to_string()));

        let mut empty = bare.clone();
        empty.auth_accept = Some(Vec::new());
        assert!(matches!(
            PpInterfaces::validate(&empty),
            Err(ValidationError::InvalidValue { field: "auth_accept", .. })
        ));
    }

    #[test]
    fn test_password_hidden() {
        let decoded = decode_text::<PpInterfaces>(CONFIG);
        let pp = &decoded.records[0];
        assert!(!format!("{:?}", pp).contains("hunter2"));
        let json = serde_json::to_value(pp).unwrap();
        assert_eq!(json["auth_myname"]["user"], "user@example.jp");
        assert!(json["auth_myname"].get("password").is_none());
    }

    #[test]
    fn test_malformed_line_drops_interface() {
        let decoded = decode_text::<PpInterfaces>(
            "pp select 1\n\
             \x20pppoe use lan2\n\
             \x20ip pp mtu big\n\
             pp select 2\n\
             \x20pppoe use lan3\n\
             pp select none\n",
        );
        assert_eq!(decoded.errors.len(), 1);
        assert_eq!(decoded.errors[0].line_number, 3);
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].selector, PpSelector::Number(2));
    }

    #[test]
    fn test_encode_set() {
        let pp = PpInterface::new(PpSelector::Number(2))
            .with_pppoe("lan2")
            .with_auth_myname("user", "pw")
            .enabled(true);
        assert_eq!(
            PpInterfaces::encode(&pp, Intent::Set).unwrap(),
            vec![
                "pp select 2",
                "pppoe use lan2",
                "pp auth myname user pw",
                "pp enable 2",
                "pp select none",
            ]
        );
    }

    #[test]
    fn test_encode_delete() {
        let mut pp = PpInterface::new(PpSelector::Number(2))
            .with_pppoe("lan2")
            .with_auth_accept(["pap", "chap"]);
        pp.auth_request = Some(AuthRequest::new("chap"));
        pp.remote_address_pool = Some(AddressPool::Dhcp);
        pp.secure_filter_in = Some(FilterBinding::default());
        assert_eq!(
            PpInterfaces::encode(&pp, Intent::Delete).unwrap(),
            vec![
                "pp disable 2",
                "pp select 2",
                "no pppoe use",
                "no pp auth accept",
                "no pp auth request",
                "no ip pp remote address pool",
                "no ip pp secure filter in",
                "pp select none",
            ]
        );
    }

    #[test]
    fn test_validate() {
        let unbound = PpInterface::new(PpSelector::Number(1));
        assert!(matches!(
            PpInterfaces::validate(&unbound),
            Err(ValidationError::Requires { .. })
        ));

        let mut bad_auth = PpInterface::new(PpSelector::Anonymous);
        bad_auth.auth_accept = Some(vec!["telnet".into()]);
        assert!(PpInterfaces::validate(&bad_auth).is_err());

        let mut mtu = PpInterface::new(PpSelector::Number(1)).with_pppoe("lan2");
        mtu.mtu = Some(9000);
        assert!(matches!(
            PpInterfaces::encode(&mtu, Intent::Set),
            Err(ValidationError::OutOfRange { field: "mtu", .. })
        ));
    }

    #[test]
    fn test_round_trip() {
        let decoded = decode_text::<PpInterfaces>(CONFIG);
        for pp in &decoded.records {
            let again = round_trip::<PpInterfaces>(pp);
            assert!(again.is_clean());
            assert_eq!(again.records, vec![pp.clone()]);
        }
    }
}
