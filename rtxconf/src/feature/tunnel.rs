//! Tunnel interfaces.
//!
//! Everything about a tunnel is configured inside its selection context:
//!
//! ```text
//! tunnel select 1
//!  description branch-office
//!  tunnel encapsulation l2tpv3
//!  tunnel endpoint address 192.168.1.253 203.0.113.1
//!  ipsec tunnel 101
//!   ipsec sa policy 101 1 esp aes-cbc sha-hmac
//!   ipsec ike encryption 1 aes-cbc
//!   ipsec ike group 1 modp1024
//!   ipsec ike hash 1 sha
//!   ipsec ike keepalive use 1 on dpd 10 3
//!   ipsec ike local address 1 192.168.1.253
//!   ipsec ike pre-shared-key 1 text secret
//!   ipsec ike remote address 1 203.0.113.1
//!  l2tp local router-id 192.168.1.253
//!  l2tp remote router-id 203.0.113.1
//!  l2tp remote end-id branch
//!  ip tunnel secure filter in 200020 200099
//!  ip tunnel tcp mss limit auto
//!  tunnel enable 1
//! ```
//!
//! The IKE gateway id is separate from both the tunnel id and the IPsec
//! tunnel id, but one tunnel only ever talks to one gateway: two different
//! gateway ids in one context (across `ipsec ike` and `ipsec sa policy`
//! lines) reject the whole tunnel. Lines the decoder has no field for
//! (`ipsec ike nat-traversal`, `ipsec ike version`, ...) are skipped.
//!
//! A tunnel that parses but would not encode back (L2TP settings without an
//! L2TP encapsulation, IKE settings without `ipsec tunnel`) is rejected
//! against the line that introduced the offending setting.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use log::trace;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::binding::binding_command;
use super::{
    Decoded, Direction, Feature, FilterBinding, Intent, check_range, on_off, parse_number,
    parse_on_off, require, single_token,
};
use crate::dialect::rtx::TUNNEL;
use crate::error::ValidationError;
use crate::reconcile::Reconcilable;
use crate::text::{Line, Stanza};

const FEATURE: &str = "tunnel";

/// Tunnel encapsulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encapsulation {
    Ipsec,
    L2tp,
    L2tpv3,
    Ipip,
}

impl Encapsulation {
    /// Device keyword.
    pub fn as_str(self) -> &'static str {
        match self {
            Encapsulation::Ipsec => "ipsec",
            Encapsulation::L2tp => "l2tp",
            Encapsulation::L2tpv3 => "l2tpv3",
            Encapsulation::Ipip => "ipip",
        }
    }
}

impl FromStr for Encapsulation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ipsec" => Ok(Encapsulation::Ipsec),
            "l2tp" => Ok(Encapsulation::L2tp),
            "l2tpv3" => Ok(Encapsulation::L2tpv3),
            "ipip" => Ok(Encapsulation::Ipip),
            other => Err(format!("unknown encapsulation '{}'", other)),
        }
    }
}

impl fmt::Display for Encapsulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `tunnel endpoint address [LOCAL] REMOTE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Local address, when printed.
    #[serde(default)]
    pub local: Option<String>,

    /// Remote address.
    pub remote: String,
}

/// `ipsec sa policy P G PROTO ALGS..`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaPolicy {
    /// Policy id; usually, but not necessarily, the IPsec tunnel id.
    pub id: u32,

    /// IKE gateway id.
    pub gateway: u32,

    /// `esp` or `ah`.
    pub protocol: String,

    /// Algorithms in printed order.
    pub algorithms: Vec<String>,
}

/// IKE pre-shared key.
#[derive(Debug, Clone)]
pub enum PreSharedKey {
    /// `text SECRET`.
    Text(SecretString),

    /// `encrypted HEX`, as stored by the device.
    Encrypted(String),
}

impl PartialEq for PreSharedKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PreSharedKey::Text(a), PreSharedKey::Text(b)) => a.expose_secret() == b.expose_secret(),
            (PreSharedKey::Encrypted(a), PreSharedKey::Encrypted(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for PreSharedKey {}

/// IKE keepalive mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum IkeKeepalive {
    /// `on dpd INTERVAL [RETRY]`.
    Dpd { interval: u32, retry: Option<u32> },

    /// `on heartbeat INTERVAL RETRY`.
    Heartbeat { interval: u32, retry: u32 },

    /// `off`.
    Off,
}

/// Settings of the tunnel's IKE gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IkeGateway {
    /// Gateway id used by every `ipsec ike` line.
    pub id: u32,

    /// `ipsec ike local address`.
    #[serde(default)]
    pub local_address: Option<String>,

    /// `ipsec ike remote address`.
    #[serde(default)]
    pub remote_address: Option<String>,

    /// `ipsec ike pre-shared-key`; never serialized.
    #[serde(skip)]
    pub pre_shared_key: Option<PreSharedKey>,

    /// `ipsec ike keepalive use`.
    #[serde(default)]
    pub keepalive: Option<IkeKeepalive>,

    /// `ipsec ike encryption`, e.g. `aes-cbc`.
    #[serde(default)]
    pub encryption: Option<String>,

    /// `ipsec ike hash`, e.g. `sha256`.
    #[serde(default)]
    pub hash: Option<String>,

    /// `ipsec ike group`: one or two DH groups.
    #[serde(default)]
    pub group: Option<Vec<String>>,
}

impl IkeGateway {
    /// Create a gateway with no settings.
    pub fn new(id: u32) -> Self {
        Self {
            id,
            local_address: None,
            remote_address: None,
            pre_shared_key: None,
            keepalive: None,
            encryption: None,
            hash: None,
            group: None,
        }
    }

    /// Set the remote address.
    pub fn with_remote_address(mut self, address: impl Into<String>) -> Self {
        self.remote_address = Some(address.into());
        self
    }

    /// Set a plain-text pre-shared key.
    pub fn with_pre_shared_key(mut self, key: impl Into<String>) -> Self {
        self.pre_shared_key = Some(PreSharedKey::Text(SecretString::from(key.into())));
        self
    }
}

/// `l2tp tunnel auth on [PASSWORD]` or `off`.
#[derive(Debug, Clone)]
pub struct TunnelAuth {
    /// Authentication switch.
    pub enabled: bool,

    /// Shared password.
    pub password: Option<SecretString>,
}

impl PartialEq for TunnelAuth {
    fn eq(&self, other: &Self) -> bool {
        self.enabled == other.enabled
            && self.password.as_ref().map(|p| p.expose_secret())
                == other.password.as_ref().map(|p| p.expose_secret())
    }
}

impl Eq for TunnelAuth {}

/// `l2tp keepalive use on INTERVAL RETRY` or `off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum L2tpKeepalive {
    On { interval: u32, retry: u32 },
    Off,
}

/// L2TP settings of a tunnel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelL2tp {
    pub hostname: Option<String>,
    pub local_router_id: Option<Ipv4Addr>,
    pub remote_router_id: Option<Ipv4Addr>,
    pub remote_end_id: Option<String>,
    pub always_on: Option<bool>,

    /// Never serialized.
    #[serde(skip)]
    pub tunnel_auth: Option<TunnelAuth>,

    pub keepalive: Option<L2tpKeepalive>,
    pub syslog: Option<bool>,
}

impl TunnelL2tp {
    fn needs_l2tpv3(&self) -> Option<&'static str> {
        if self.local_router_id.is_some() {
            Some("l2tp.local_router_id")
        } else if self.remote_router_id.is_some() {
            Some("l2tp.remote_router_id")
        } else if self.remote_end_id.is_some() {
            Some("l2tp.remote_end_id")
        } else if self.tunnel_auth.is_some() {
            Some("l2tp.tunnel_auth")
        } else {
            None
        }
    }
}

/// `ip tunnel tcp mss limit auto|N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MssLimit {
    Auto,
    Value(u32),
}

impl fmt::Display for MssLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MssLimit::Auto => f.write_str("auto"),
            MssLimit::Value(n) => write!(f, "{}", n),
        }
    }
}

/// One `tunnel select N` context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tunnel {
    /// Tunnel id.
    pub id: u32,

    #[serde(default)]
    pub description: Option<String>,

    /// `None` when the line is absent (device default ipsec).
    #[serde(default)]
    pub encapsulation: Option<Encapsulation>,

    #[serde(default)]
    pub endpoint: Option<Endpoint>,

    /// `ipsec tunnel T`.
    #[serde(default)]
    pub ipsec_tunnel: Option<u32>,

    #[serde(default)]
    pub sa_policy: Option<SaPolicy>,

    #[serde(default)]
    pub ike: Option<IkeGateway>,

    #[serde(default)]
    pub l2tp: Option<TunnelL2tp>,

    #[serde(default)]
    pub secure_filter_in: Option<FilterBinding>,

    #[serde(default)]
    pub secure_filter_out: Option<FilterBinding>,

    #[serde(default)]
    pub tcp_mss_limit: Option<MssLimit>,

    /// Printed `tunnel enable N`.
    #[serde(default)]
    pub enabled: bool,
}

impl Tunnel {
    /// Create an empty tunnel.
    pub fn new(id: u32) -> Self {
        Self {
            id,
            description: None,
            encapsulation: None,
            endpoint: None,
            ipsec_tunnel: None,
            sa_policy: None,
            ike: None,
            l2tp: None,
            secure_filter_in: None,
            secure_filter_out: None,
            tcp_mss_limit: None,
            enabled: false,
        }
    }

    /// Set the encapsulation.
    pub fn with_encapsulation(mut self, encapsulation: Encapsulation) -> Self {
        self.encapsulation = Some(encapsulation);
        self
    }

    /// Set the IPsec tunnel id.
    pub fn with_ipsec_tunnel(mut self, id: u32) -> Self {
        self.ipsec_tunnel = Some(id);
        self
    }

    /// Set the IKE gateway.
    pub fn with_ike(mut self, ike: IkeGateway) -> Self {
        self.ike = Some(ike);
        self
    }

    /// Set the enabled flag.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The gateway id already in use by this tunnel, if any.
    fn gateway_id(&self) -> Option<u32> {
        self.ike
            .as_ref()
            .map(|ike| ike.id)
            .or_else(|| self.sa_policy.as_ref().map(|policy| policy.gateway))
    }

    fn check_gateway(&self, id: u32) -> Result<(), String> {
        match self.gateway_id() {
            Some(existing) if existing != id => Err(format!(
                "conflicting IKE gateway ids {} and {}",
                existing, id
            )),
            _ => Ok(()),
        }
    }

    fn ike_gateway(&mut self, id: u32) -> Result<&mut IkeGateway, String> {
        self.check_gateway(id)?;
        Ok(self.ike.get_or_insert_with(|| IkeGateway::new(id)))
    }

    fn apply(&mut self, text: &str) -> Result<(), String> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        match tokens.as_slice() {
            ["description", ..] => {
                let description = text["description".len()..].trim();
                self.description = Some(description.to_string());
            }
            ["tunnel", "encapsulation", encapsulation] => {
                self.encapsulation = Some(encapsulation.parse()?);
            }
            ["tunnel", "endpoint", "address", remote] => {
                self.endpoint = Some(Endpoint {
                    local: None,
                    remote: remote.to_string(),
                });
            }
            ["tunnel", "endpoint", "address", local, remote] => {
                self.endpoint = Some(Endpoint {
                    local: Some(local.to_string()),
                    remote: remote.to_string(),
                });
            }
            ["tunnel", switch @ ("enable" | "disable"), number] => {
                if parse_number(number, "tunnel number")? != self.id {
                    return Err(format!("{} for another tunnel", switch));
                }
                self.enabled = *switch == "enable";
            }
            ["ipsec", "tunnel", number] => {
                self.ipsec_tunnel = Some(parse_number(number, "ipsec tunnel")?);
            }
            ["ipsec", "sa", "policy", id, gateway, protocol, algorithms @ ..]
                if !algorithms.is_empty() =>
            {
                let gateway = parse_number(gateway, "sa policy gateway")?;
                if let Some(ike) = &self.ike {
                    if ike.id != gateway {
                        return Err(format!(
                            "conflicting IKE gateway ids {} and {}",
                            ike.id, gateway
                        ));
                    }
                }
                self.sa_policy = Some(SaPolicy {
                    id: parse_number(id, "sa policy id")?,
                    gateway,
                    protocol: protocol.to_string(),
                    algorithms: algorithms.iter().map(|a| a.to_string()).collect(),
                });
            }
            ["ipsec", "ike", rest @ ..] => self.apply_ike(rest)?,
            ["l2tp", rest @ ..] => self.apply_l2tp(rest)?,
            ["ip", "tunnel", "secure", "filter", direction, rest @ ..] => {
                let binding = FilterBinding::parse(&rest.join(" "))?;
                match Direction::parse(direction) {
                    Some(Direction::In) => self.secure_filter_in = Some(binding),
                    Some(Direction::Out) => self.secure_filter_out = Some(binding),
                    None => return Err(format!("invalid direction '{}'", direction)),
                }
            }
            ["ip", "tunnel", "tcp", "mss", "limit", value] => {
                self.tcp_mss_limit = Some(match *value {
                    "auto" => MssLimit::Auto,
                    n => MssLimit::Value(parse_number(n, "tcp mss limit")?),
                });
            }
            ["tunnel", "encapsulation" | "endpoint" | "enable" | "disable", ..]
            | ["ipsec", "tunnel" | "sa", ..]
            | ["ip", "tunnel", "secure" | "tcp", ..] => {
                return Err("malformed command".into());
            }
            _ => trace!("tunnel {}: skipping '{}'", self.id, text),
        }
        Ok(())
    }

    fn apply_ike(&mut self, tokens: &[&str]) -> Result<(), String> {
        match tokens {
            ["local", "address", gateway, address] => {
                self.ike_gateway(parse_number(gateway, "ike gateway")?)?
                    .local_address = Some(address.to_string());
            }
            ["remote", "address", gateway, address] => {
                self.ike_gateway(parse_number(gateway, "ike gateway")?)?
                    .remote_address = Some(address.to_string());
            }
            ["pre-shared-key", gateway, "text", secret @ ..] if !secret.is_empty() => {
                let key = PreSharedKey::Text(SecretString::from(secret.join(" ")));
                self.ike_gateway(parse_number(gateway, "ike gateway")?)?
                    .pre_shared_key = Some(key);
            }
            ["pre-shared-key", gateway, "encrypted", hex] => {
                let key = PreSharedKey::Encrypted(hex.to_string());
                self.ike_gateway(parse_number(gateway, "ike gateway")?)?
                    .pre_shared_key = Some(key);
            }
            ["keepalive", "use", gateway, mode @ ..] => {
                let keepalive = match mode {
                    ["off"] => IkeKeepalive::Off,
                    ["on", "dpd", interval] => IkeKeepalive::Dpd {
                        interval: parse_number(interval, "dpd interval")?,
                        retry: None,
                    },
                    ["on", "dpd", interval, retry] => IkeKeepalive::Dpd {
                        interval: parse_number(interval, "dpd interval")?,
                        retry: Some(parse_number(retry, "dpd retry")?),
                    },
                    ["on", "heartbeat", interval, retry] => IkeKeepalive::Heartbeat {
                        interval: parse_number(interval, "heartbeat interval")?,
                        retry: parse_number(retry, "heartbeat retry")?,
                    },
                    _ => return Err("invalid ike keepalive".into()),
                };
                self.ike_gateway(parse_number(gateway, "ike gateway")?)?
                    .keepalive = Some(keepalive);
            }
            ["encryption", gateway, algorithm] => {
                self.ike_gateway(parse_number(gateway, "ike gateway")?)?
                    .encryption = Some(algorithm.to_string());
            }
            ["hash", gateway, algorithm] => {
                self.ike_gateway(parse_number(gateway, "ike gateway")?)?
                    .hash = Some(algorithm.to_string());
            }
            ["group", gateway, groups @ ..] if (1..=2).contains(&groups.len()) => {
                let groups: Vec<String> = groups.iter().map(|g| g.to_string()).collect();
                self.ike_gateway(parse_number(gateway, "ike gateway")?)?
                    .group = Some(groups);
            }
            ["local" | "remote" | "pre-shared-key" | "keepalive", ..]
            | ["encryption" | "hash" | "group", ..] => {
                return Err("malformed ipsec ike command".into());
            }
            _ => trace!("tunnel {}: skipping ipsec ike {}", self.id, tokens.join(" ")),
        }
        Ok(())
    }

    /// Apply one `l2tp` line. The L2TP block only comes into existence
    /// once a line parses.
    fn apply_l2tp(&mut self, tokens: &[&str]) -> Result<(), String> {
        let mut l2tp = self.l2tp.clone().unwrap_or_default();
        match tokens {
            ["hostname", name] => l2tp.hostname = Some(name.to_string()),
            ["local", "router-id", id] => l2tp.local_router_id = Some(parse_router_id(id)?),
            ["remote", "router-id", id] => l2tp.remote_router_id = Some(parse_router_id(id)?),
            ["remote", "end-id", id] => l2tp.remote_end_id = Some(id.to_string()),
            ["always-on", value] => l2tp.always_on = Some(parse_on_off(value, "always-on")?),
            ["syslog", value] => l2tp.syslog = Some(parse_on_off(value, "syslog")?),
            ["tunnel", "auth", "off"] => {
                l2tp.tunnel_auth = Some(TunnelAuth {
                    enabled: false,
                    password: None,
                });
            }
            ["tunnel", "auth", "on", password @ ..] if password.len() <= 1 => {
                l2tp.tunnel_auth = Some(TunnelAuth {
                    enabled: true,
                    password: password.first().map(|p| SecretString::from(p.to_string())),
                });
            }
            ["keepalive", "use", "off"] => l2tp.keepalive = Some(L2tpKeepalive::Off),
            ["keepalive", "use", "on", interval, retry] => {
                l2tp.keepalive = Some(L2tpKeepalive::On {
                    interval: parse_number(interval, "l2tp keepalive interval")?,
                    retry: parse_number(retry, "l2tp keepalive retry")?,
                });
            }
            _ => return Err("malformed l2tp command".into()),
        }
        self.l2tp = Some(l2tp);
        Ok(())
    }

    fn body(&self) -> Vec<String> {
        let mut commands = Vec::new();
        if let Some(description) = &self.description {
            commands.push(format!("description {}", description));
        }
        if let Some(encapsulation) = self.encapsulation {
            commands.push(format!("tunnel encapsulation {}", encapsulation));
        }
        if let Some(endpoint) = &self.endpoint {
            match &endpoint.local {
                Some(local) => commands.push(format!(
                    "tunnel endpoint address {} {}",
                    local, endpoint.remote
                )),
                None => commands.push(format!("tunnel endpoint address {}", endpoint.remote)),
            }
        }
        if let Some(ipsec_tunnel) = self.ipsec_tunnel {
            commands.push(format!("ipsec tunnel {}", ipsec_tunnel));
        }
        if let Some(policy) = &self.sa_policy {
            commands.push(format!(
                "ipsec sa policy {} {} {} {}",
                policy.id,
                policy.gateway,
                policy.protocol,
                policy.algorithms.join(" ")
            ));
        }
        if let Some(ike) = &self.ike {
            commands.extend(ike_commands(ike));
        }
        if let Some(l2tp) = &self.l2tp {
            commands.extend(l2tp_commands(l2tp));
        }
        if let Some(binding) = &self.secure_filter_in {
            commands.push(binding_command("ip tunnel secure filter", Direction::In, binding));
        }
        if let Some(binding) = &self.secure_filter_out {
            commands.push(binding_command("ip tunnel secure filter", Direction::Out, binding));
        }
        if let Some(limit) = self.tcp_mss_limit {
            commands.push(format!("ip tunnel tcp mss limit {}", limit));
        }
        commands
    }
}

fn parse_router_id(value: &str) -> Result<Ipv4Addr, String> {
    value
        .parse()
        .map_err(|_| format!("invalid router-id '{}'", value))
}

fn ike_commands(ike: &IkeGateway) -> Vec<String> {
    let id = ike.id;
    let mut commands = Vec::new();
    if let Some(encryption) = &ike.encryption {
        commands.push(format!("ipsec ike encryption {} {}", id, encryption));
    }
    if let Some(groups) = &ike.group {
        commands.push(format!("ipsec ike group {} {}", id, groups.join(" ")));
    }
    if let Some(hash) = &ike.hash {
        commands.push(format!("ipsec ike hash {} {}", id, hash));
    }
    if let Some(keepalive) = ike.keepalive {
        commands.push(match keepalive {
            IkeKeepalive::Off => format!("ipsec ike keepalive use {} off", id),
            IkeKeepalive::Dpd { interval, retry: None } => {
                format!("ipsec ike keepalive use {} on dpd {}", id, interval)
            }
            IkeKeepalive::Dpd { interval, retry: Some(retry) } => {
                format!("ipsec ike keepalive use {} on dpd {} {}", id, interval, retry)
            }
            IkeKeepalive::Heartbeat { interval, retry } => {
                format!("ipsec ike keepalive use {} on heartbeat {} {}", id, interval, retry)
            }
        });
    }
    if let Some(address) = &ike.local_address {
        commands.push(format!("ipsec ike local address {} {}", id, address));
    }
    match &ike.pre_shared_key {
        Some(PreSharedKey::Text(secret)) => commands.push(format!(
            "ipsec ike pre-shared-key {} text {}",
            id,
            secret.expose_secret()
        )),
        Some(PreSharedKey::Encrypted(hex)) => {
            commands.push(format!("ipsec ike pre-shared-key {} encrypted {}", id, hex));
        }
        None => {}
    }
    if let Some(address) = &ike.remote_address {
        commands.push(format!("ipsec ike remote address {} {}", id, address));
    }
    commands
}

fn l2tp_commands(l2tp: &TunnelL2tp) -> Vec<String> {
    let mut commands = Vec::new();
    if let Some(hostname) = &l2tp.hostname {
        commands.push(format!("l2tp hostname {}", hostname));
    }
    if let Some(id) = l2tp.local_router_id {
        commands.push(format!("l2tp local router-id {}", id));
    }
    if let Some(id) = l2tp.remote_router_id {
        commands.push(format!("l2tp remote router-id {}", id));
    }
    if let Some(id) = &l2tp.remote_end_id {
        commands.push(format!("l2tp remote end-id {}", id));
    }
    if let Some(always_on) = l2tp.always_on {
        commands.push(format!("l2tp always-on {}", on_off(always_on)));
    }
    if let Some(auth) = &l2tp.tunnel_auth {
        commands.push(match (auth.enabled, &auth.password) {
            (false, _) => "l2tp tunnel auth off".to_string(),
            (true, None) => "l2tp tunnel auth on".to_string(),
            (true, Some(password)) => {
                format!("l2tp tunnel auth on {}", password.expose_secret())
            }
        });
    }
    match l2tp.keepalive {
        Some(L2tpKeepalive::On { interval, retry }) => {
            commands.push(format!("l2tp keepalive use on {} {}", interval, retry));
        }
        Some(L2tpKeepalive::Off) => commands.push("l2tp keepalive use off".to_string()),
        None => {}
    }
    if let Some(syslog) = l2tp.syslog {
        commands.push(format!("l2tp syslog {}", on_off(syslog)));
    }
    commands
}

impl Reconcilable for Tunnel {
    type Key = u32;
    type Fallback = (Encapsulation, String);

    fn identity(&self) -> u32 {
        self.id
    }

    /// Encapsulation plus the far end, taken from the IKE remote address
    /// or the endpoint.
    fn fallback_key(&self) -> Option<Self::Fallback> {
        let remote = self
            .ike
            .as_ref()
            .and_then(|ike| ike.remote_address.clone())
            .or_else(|| self.endpoint.as_ref().map(|e| e.remote.clone()))?;
        Some((self.encapsulation.unwrap_or(Encapsulation::Ipsec), remote))
    }
}

/// Tunnel feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tunnels;

impl Tunnels {
    /// Decode one tunnel context. Any malformed line drops the tunnel.
    pub fn decode_context(id: u32, lines: &[Line], decoded: &mut Decoded<Tunnel>) {
        let mut tunnel = Tunnel::new(id);
        let mut clean = true;
        for line in lines {
            if let Err(reason) = tunnel.apply(&line.text) {
                decoded.reject(FEATURE, line, format!("tunnel {}: {}", id, reason));
                clean = false;
            }
        }
        if clean {
            decoded.push_context::<Self>(TUNNEL, id, lines, tunnel, blame);
        }
    }
}

/// Command prefix of the line that sets a tunnel field.
fn blame(field: &str) -> &'static str {
    match field {
        "description" => "description",
        "ipsec_tunnel" => "ipsec tunnel",
        "tcp_mss_limit" => "ip tunnel tcp mss",
        "secure filter" => "ip tunnel secure filter",
        f if f.starts_with("sa_policy") => "ipsec sa policy",
        f if f.starts_with("ike") => "ipsec ike",
        f if f.starts_with("l2tp") => "l2tp ",
        _ => "",
    }
}

impl Feature for Tunnels {
    type Record = Tunnel;

    const NAME: &'static str = FEATURE;

    fn decode(stanza: &Stanza) -> Decoded<Tunnel> {
        let mut decoded = Decoded::new();
        for (key, lines) in stanza.contexts_of(TUNNEL) {
            match key.id.as_number() {
                Some(id) => Self::decode_context(id, lines, &mut decoded),
                None => trace!("skipping non-numeric context {}", key),
            }
        }
        decoded
    }

    fn validate(tunnel: &Tunnel) -> Result<(), ValidationError> {
        check_range(FEATURE, "id", tunnel.id.into(), 1, 6000)?;
        if let Some(description) = &tunnel.description {
            require(FEATURE, "description", description)?;
            if description.contains('\n') {
                return Err(ValidationError::InvalidValue {
                    feature: FEATURE,
                    field: "description",
                    value: description.clone(),
                });
            }
        }
        if let Some(ipsec_tunnel) = tunnel.ipsec_tunnel {
            check_range(FEATURE, "ipsec_tunnel", ipsec_tunnel.into(), 1, 65535)?;
        }

        let requires_ipsec = |field| ValidationError::Requires {
            feature: FEATURE,
            field,
            requirement: "ipsec tunnel".into(),
        };
        if let Some(policy) = &tunnel.sa_policy {
            if tunnel.ipsec_tunnel.is_none() {
                return Err(requires_ipsec("sa_policy"));
            }
            check_range(FEATURE, "sa_policy.id", policy.id.into(), 1, 65535)?;
            single_token(FEATURE, "sa_policy.protocol", &policy.protocol)?;
            if policy.algorithms.is_empty() {
                return Err(ValidationError::Missing {
                    feature: FEATURE,
                    field: "sa_policy.algorithms",
                });
            }
            if let Some(ike) = &tunnel.ike {
                if policy.gateway != ike.id {
                    return Err(ValidationError::Requires {
                        feature: FEATURE,
                        field: "sa_policy",
                        requirement: format!("ike gateway {}", ike.id),
                    });
                }
            }
        }
        if let Some(ike) = &tunnel.ike {
            if tunnel.ipsec_tunnel.is_none() {
                return Err(requires_ipsec("ike"));
            }
            if let Some(PreSharedKey::Text(secret)) = &ike.pre_shared_key {
                if secret.expose_secret().trim().is_empty() {
                    return Err(ValidationError::Missing {
                        feature: FEATURE,
                        field: "ike.pre_shared_key",
                    });
                }
            }
            for (field, value) in [("ike.encryption", &ike.encryption), ("ike.hash", &ike.hash)] {
                if let Some(value) = value {
                    single_token(FEATURE, field, value)?;
                }
            }
            if let Some(groups) = &ike.group {
                if !(1..=2).contains(&groups.len()) {
                    return Err(ValidationError::InvalidValue {
                        feature: FEATURE,
                        field: "ike.group",
                        value: groups.join(" "),
                    });
                }
                for group in groups {
                    single_token(FEATURE, "ike.group", group)?;
                }
            }
            match ike.keepalive {
                Some(IkeKeepalive::Dpd { interval, retry }) => {
                    check_range(FEATURE, "ike.keepalive.interval", interval.into(), 1, 600)?;
                    if let Some(retry) = retry {
                        check_range(FEATURE, "ike.keepalive.retry", retry.into(), 1, 50)?;
                    }
                }
                Some(IkeKeepalive::Heartbeat { interval, retry }) => {
                    check_range(FEATURE, "ike.keepalive.interval", interval.into(), 1, 600)?;
                    check_range(FEATURE, "ike.keepalive.retry", retry.into(), 1, 50)?;
                }
                Some(IkeKeepalive::Off) | None => {}
            }
        }

        if let Some(l2tp) = &tunnel.l2tp {
            match tunnel.encapsulation {
                Some(Encapsulation::L2tpv3) => {}
                Some(Encapsulation::L2tp) => {
                    if let Some(field) = l2tp.needs_l2tpv3() {
                        return Err(ValidationError::Requires {
                            feature: FEATURE,
                            field,
                            requirement: "encapsulation l2tpv3".into(),
                        });
                    }
                }
                _ => {
                    return Err(ValidationError::Requires {
                        feature: FEATURE,
                        field: "l2tp",
                        requirement: "encapsulation l2tp or l2tpv3".into(),
                    });
                }
            }
            if let Some(L2tpKeepalive::On { interval, retry }) = l2tp.keepalive {
                check_range(FEATURE, "l2tp.keepalive.interval", interval.into(), 1, 600)?;
                check_range(FEATURE, "l2tp.keepalive.retry", retry.into(), 1, 50)?;
            }
        }

        if let Some(MssLimit::Value(n)) = tunnel.tcp_mss_limit {
            check_range(FEATURE, "tcp_mss_limit", n.into(), 536, 1460)?;
        }
        for binding in [&tunnel.secure_filter_in, &tunnel.secure_filter_out]
            .into_iter()
            .flatten()
        {
            for &number in binding.filters.iter().chain(&binding.dynamic) {
                check_range(FEATURE, "secure filter", number.into(), 1, 2_147_483_647)?;
            }
        }
        Ok(())
    }

    fn encode(tunnel: &Tunnel, intent: Intent) -> Result<Vec<String>, ValidationError> {
        let select = format!("tunnel select {}", tunnel.id);
        match intent {
            Intent::Set => {
                Self::validate(tunnel)?;
                let mut commands = vec![select];
                commands.extend(tunnel.body());
                if tunnel.enabled {
                    commands.push(format!("tunnel enable {}", tunnel.id));
                }
                commands.push("tunnel select none".to_string());
                Ok(commands)
            }
            Intent::Delete => {
                let mut commands = vec![select];
                if let Some(ipsec_tunnel) = tunnel.ipsec_tunnel {
                    commands.push(format!("no ipsec tunnel {}", ipsec_tunnel));
                }
                commands.push("tunnel select none".to_string());
                commands.push(format!("no tunnel select {}", tunnel.id));
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
tunnel select 1
 description branch office
 tunnel encapsulation l2tpv3
 tunnel endpoint address 192.168.1.253 203.0.113.1
 ipsec tunnel 101
  ipsec sa policy 101 1 esp aes-cbc sha-hmac
  ipsec ike keepalive use 1 on dpd 10 3
  ipsec ike local address 1 192.168.1.253
  ipsec ike encryption 1 aes-cbc
  ipsec ike pre-shared-key 1 text s3cret
  ipsec ike remote address 1 203.0.113.1
 l2tp always-on on
 l2tp hostname rtx-main
 l2tp tunnel auth on pass123
 l2tp keepalive use on 60 3
 l2tp local router-id 192.168.1.253
 l2tp remote router-id 203.0.113.1
 l2tp remote end-id branch
 l2tp syslog on
 ip tunnel secure filter in 200020 200099
 ip tunnel secure filter out
 ip tunnel tcp mss limit auto
 tunnel enable 1
tunnel select 2
 tunnel encapsulation ipsec
 ipsec tunnel 102
 ipsec ike keepalive use 2 on heartbeat 10 6
 ipsec ike pre-shared-key 2 encrypted 0a1b2c
tunnel select none
";

    #[test]
    fn test_decode_full_tunnel() {
        let decoded = decode_text::<Tunnels>(CONFIG);
        assert!(decoded.is_clean());
        assert_eq!(decoded.records.len(), 2);

        let t = &decoded.records[0];
        assert_eq!(t.id, 1);
        assert_eq!(t.description.as_deref(), Some("branch office"));
        assert_eq!(t.encapsulation, Some(Encapsulation::L2tpv3));
        assert_eq!(t.endpoint.as_ref().unwrap().local.as_deref(), Some("192.168.1.253"));
        assert_eq!(t.ipsec_tunnel, Some(101));
        assert_eq!(t.sa_policy.as_ref().unwrap().algorithms, vec!["aes-cbc", "sha-hmac"]);

        let ike = t.ike.as_ref().unwrap();
        assert_eq!(ike.id, 1);
        assert_eq!(ike.remote_address.as_deref(), Some("203.0.113.1"));
        assert_eq!(ike.keepalive, Some(IkeKeepalive::Dpd { interval: 10, retry: Some(3) }));
        assert_eq!(ike.encryption.as_deref(), Some("aes-cbc"));
        assert_eq!(ike.hash, None);
        match &ike.pre_shared_key {
            Some(PreSharedKey::Text(secret)) => assert_eq!(secret.expose_secret(), "s3cret"),
            other => panic!("unexpected key {:?}", other),
        }

        let l2tp = t.l2tp.as_ref().unwrap();
        assert_eq!(l2tp.remote_router_id, Some(Ipv4Addr::new(203, 0, 113, 1)));
        assert_eq!(l2tp.keepalive, Some(L2tpKeepalive::On { interval: 60, retry: 3 }));
        assert!(l2tp.tunnel_auth.as_ref().unwrap().enabled);

        assert_eq!(t.secure_filter_in, Some(FilterBinding::new(vec![200020, 200099])));
        assert_eq!(t.secure_filter_out, Some(FilterBinding::default()));
        assert_eq!(t.tcp_mss_limit, Some(MssLimit::Auto));
        assert!(t.enabled);

        let t2 = &decoded.records[1];
        assert!(!t2.enabled);
        assert_eq!(
            t2.ike.as_ref().unwrap().pre_shared_key,
            Some(PreSharedKey::Encrypted("0a1b2c".into()))
        );
    }

    #[test]
    fn test_secrets_not_in_debug_or_json() {
        let decoded = decode_text::<Tunnels>(CONFIG);
        let t = &decoded.records[0];
        let debug = format!("{:?}", t);
        assert!(!debug.contains("s3cret"));
        assert!(!debug.contains("pass123"));
        let json = serde_json::to_string(t).unwrap();
        assert!(!json.contains("s3cret"));
        assert!(!json.contains("pass123"));
    }

    #[test]
    fn test_conflicting_ike_gateway_drops_tunnel() {
        let decoded = decode_text::<Tunnels>(
            "tunnel select 1\n\
             \x20ipsec tunnel 101\n\
             \x20ipsec ike local address 1 192.168.1.1\n\
             \x20ipsec ike remote address 2 203.0.113.1\n\
             tunnel select 2\n\
             \x20ipsec tunnel 102\n\
             tunnel select none\n",
        );
        assert_eq!(decoded.errors.len(), 1);
        assert_eq!(decoded.errors[0].line_number, 4);
        assert!(decoded.errors[0].reason.contains("conflicting IKE gateway"));
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].id, 2);
    }

    #[test]
    fn test_every_decoded_record_encodes() {
        let decoded = decode_text::<Tunnels>(CONFIG);
        assert_eq!(decoded.records.len(), 2);
        for tunnel in &decoded.records {
            assert!(Tunnels::encode(tunnel, Intent::Set).is_ok(), "{:?}", tunnel);
        }
    }

    #[test]
    fn test_l2tp_without_l2tp_encapsulation_is_rejected() {
        let decoded = decode_text::<Tunnels>(
            "tunnel select 1\n\
             \x20ipsec tunnel 101\n\
             \x20l2tp hostname rtx\n\
             \x20tunnel enable 1\n\
             tunnel select 2\n\
             \x20tunnel encapsulation l2tp\n\
             \x20l2tp hostname rtx\n\
             tunnel select none\n",
        );
        assert_eq!(decoded.errors.len(), 1);
        assert_eq!(decoded.errors[0].line_number, 3);
        assert_eq!(decoded.errors[0].line, "l2tp hostname rtx");
        assert!(decoded.errors[0].reason.contains("encapsulation l2tp or l2tpv3"));
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].id, 2);
    }

    #[test]
    fn test_out_of_range_empty_context_is_rejected() {
        let decoded = decode_text::<Tunnels>("tunnel select 7000\ntunnel select none\n");
        assert!(decoded.records.is_empty());
        assert_eq!(decoded.errors.len(), 1);
        assert_eq!(decoded.errors[0].line, "tunnel select 7000");
        assert_eq!(decoded.errors[0].line_number, 0);
    }

    #[test]
    fn test_sa_policy_id_may_differ_from_ipsec_tunnel() {
        let decoded = decode_text::<Tunnels>(
            "tunnel select 1\n\
             \x20tunnel encapsulation ipsec\n\
             \x20ipsec tunnel 101\n\
             \x20ipsec sa policy 102 1 esp aes-cbc sha-hmac\n\
             \x20ipsec ike remote address 1 203.0.113.1\n\
             tunnel select none\n",
        );
        assert!(decoded.is_clean());
        let tunnel = &decoded.records[0];
        assert_eq!(tunnel.sa_policy.as_ref().unwrap().id, 102);
        assert!(Tunnels::encode(tunnel, Intent::Set).is_ok());
        assert_eq!(round_trip::<Tunnels>(tunnel).records, vec![tunnel.clone()]);
    }

    #[test]
    fn test_sa_policy_gateway_must_match_ike() {
        let ike_first = decode_text::<Tunnels>(
            "tunnel select 1\n\
             \x20ipsec tunnel 101\n\
             \x20ipsec ike local address 1 192.168.1.1\n\
             \x20ipsec sa policy 101 2 esp aes-cbc\n\
             tunnel select none\n",
        );
        assert!(ike_first.records.is_empty());
        assert_eq!(ike_first.errors.len(), 1);
        assert_eq!(ike_first.errors[0].line_number, 4);
        assert!(ike_first.errors[0].reason.contains("conflicting IKE gateway ids 1 and 2"));

        let policy_first = decode_text::<Tunnels>(
            "tunnel select 1\n\
             \x20ipsec tunnel 101\n\
             \x20ipsec sa policy 101 2 esp aes-cbc\n\
             \x20ipsec ike local address 1 192.168.1.1\n\
             tunnel select none\n",
        );
        assert!(policy_first.records.is_empty());
        assert_eq!(policy_first.errors[0].line_number, 4);
        assert!(policy_first.errors[0].reason.contains("conflicting IKE gateway ids 2 and 1"));
    }

    #[test]
    fn test_ike_proposal() {
        let decoded = decode_text::<Tunnels>(
            "tunnel select 5\n\
             \x20ipsec tunnel 105\n\
             \x20ipsec ike encryption 5 aes-cbc-256\n\
             \x20ipsec ike group 5 modp2048 modp1024\n\
             \x20ipsec ike hash 5 sha256\n\
             tunnel select 6\n\
             \x20ipsec tunnel 106\n\
             \x20ipsec ike hash 6\n\
             tunnel select none\n",
        );
        assert_eq!(decoded.errors.len(), 1);
        assert_eq!(decoded.errors[0].line_number, 8);
        assert_eq!(decoded.records.len(), 1);

        let tunnel = &decoded.records[0];
        let ike = tunnel.ike.as_ref().unwrap();
        assert_eq!(ike.id, 5);
        assert_eq!(ike.encryption.as_deref(), Some("aes-cbc-256"));
        assert_eq!(ike.group, Some(vec!["modp2048".to_string(), "modp1024".to_string()]));
        assert_eq!(ike.hash.as_deref(), Some("sha256"));

        assert_eq!(
            Tunnels::encode(tunnel, Intent::Set).unwrap(),
            vec![
                "tunnel select 5",
                "ipsec tunnel 105",
                "ipsec ike encryption 5 aes-cbc-256",
                "ipsec ike group 5 modp2048 modp1024",
                "ipsec ike hash 5 sha256",
                "tunnel select none",
            ]
        );
        assert_eq!(round_trip::<Tunnels>(tunnel).records, vec![tunnel.clone()]);
    }

    #[test]
    fn test_malformed_l2tp_line_leaves_no_l2tp_block() {
        let mut tunnel = Tunnel::new(1);
        assert!(tunnel.apply("l2tp keepalive use maybe").is_err());
        assert!(tunnel.l2tp.is_none());

        tunnel.apply("l2tp hostname rtx").unwrap();
        assert!(tunnel.apply("l2tp syslog maybe").is_err());
        let l2tp = tunnel.l2tp.as_ref().unwrap();
        assert_eq!(l2tp.hostname.as_deref(), Some("rtx"));
        assert_eq!(l2tp.syslog, None);
    }

    #[test]
    fn test_malformed_lines() {
        let decoded = decode_text::<Tunnels>(
            "tunnel select 3\n\
             \x20tunnel encapsulation gre\n\
             \x20l2tp keepalive use maybe\n\
             tunnel select none\n",
        );
        assert_eq!(decoded.errors.len(), 2);
        assert!(decoded.records.is_empty());
    }

    #[test]
    fn test_encode_set_order() {
        let tunnel = Tunnel::new(2)
            .with_encapsulation(Encapsulation::Ipsec)
            .with_ipsec_tunnel(102)
            .with_ike(
                IkeGateway::new(2)
                    .with_remote_address("203.0.113.2")
                    .with_pre_shared_key("k3y"),
            )
            .enabled(true);
        assert_eq!(
            Tunnels::encode(&tunnel, Intent::Set).unwrap(),
            vec![
                "tunnel select 2",
                "tunnel encapsulation ipsec",
                "ipsec tunnel 102",
                "ipsec ike pre-shared-key 2 text k3y",
                "ipsec ike remote address 2 203.0.113.2",
                "tunnel enable 2",
                "tunnel select none",
            ]
        );
    }

    #[test]
    fn test_encode_delete() {
        let tunnel = Tunnel::new(2).with_ipsec_tunnel(102);
        assert_eq!(
            Tunnels::encode(&tunnel, Intent::Delete).unwrap(),
            vec![
                "tunnel select 2",
                "no ipsec tunnel 102",
                "tunnel select none",
                "no tunnel select 2",
            ]
        );
        assert_eq!(
            Tunnels::encode(&Tunnel::new(3), Intent::Delete).unwrap(),
            vec!["tunnel select 3", "tunnel select none", "no tunnel select 3"]
        );
    }

    #[test]
    fn test_validate() {
        let ike_without_ipsec = Tunnel::new(1).with_ike(IkeGateway::new(1));
        assert!(matches!(
            Tunnels::encode(&ike_without_ipsec, Intent::Set),
            Err(ValidationError::Requires { field: "ike", .. })
        ));

        let mut router_id = Tunnel::new(1).with_encapsulation(Encapsulation::L2tp);
        router_id.l2tp = Some(TunnelL2tp {
            local_router_id: Some(Ipv4Addr::new(10, 0, 0, 1)),
            ..TunnelL2tp::default()
        });
        assert!(matches!(
            Tunnels::validate(&router_id),
            Err(ValidationError::Requires { field: "l2tp.local_router_id", .. })
        ));

        let mut l2tp_on_ipsec = Tunnel::new(1).with_encapsulation(Encapsulation::Ipsec);
        l2tp_on_ipsec.l2tp = Some(TunnelL2tp::default());
        assert!(Tunnels::validate(&l2tp_on_ipsec).is_err());

        assert!(matches!(
            Tunnels::validate(&Tunnel::new(6001)),
            Err(ValidationError::OutOfRange { field: "id", .. })
        ));

        let mut group = Tunnel::new(1).with_ipsec_tunnel(101).with_ike(IkeGateway::new(1));
        if let Some(ike) = group.ike.as_mut() {
            ike.group = Some(vec!["modp1024".into(), "modp1536".into(), "modp2048".into()]);
        }
        assert!(matches!(
            Tunnels::validate(&group),
            Err(ValidationError::InvalidValue { field: "ike.group", .. })
        ));
    }

    #[test]
    fn test_round_trip() {
        let decoded = decode_text::<Tunnels>(CONFIG);
        for tunnel in &decoded.records {
            let again = round_trip::<Tunnels>(tunnel);
            assert!(again.is_clean());
            assert_eq!(again.records, vec![tunnel.clone()]);
        }
    }

    #[test]
    fn test_fallback_key() {
        let decoded = decode_text::<Tunnels>(CONFIG);
        assert_eq!(
            decoded.records[0].fallback_key(),
            Some((Encapsulation::L2tpv3, "203.0.113.1".to_string()))
        );
        assert_eq!(decoded.records[1].fallback_key(), None);
    }
}
