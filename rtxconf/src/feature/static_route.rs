//! Static IPv4 routes.
//!
//! ```text
//! ip route default gateway pp 1
//! ip route 10.0.0.0/8 gateway 192.168.1.254 weight 2 gateway 192.168.1.253 weight 1
//! ip route 172.16.0.0/255.255.0.0 gateway tunnel 1 hide gateway pp 1 filter 10 11
//! ```
//!
//! Several `gateway` clauses on one line form a multipath route. The device
//! may print the same network on several lines; their next hops are merged
//! in order into one record, and the encoder writes them back on one line.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{Decoded, Feature, Intent, check_range, join_numbers, parse_number, single_token};
use crate::error::ValidationError;
use crate::reconcile::Reconcilable;
use crate::text::{Line, Stanza};

const FEATURE: &str = "static_route";

/// Destination network of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Network {
    /// Network address.
    pub address: Ipv4Addr,

    /// Prefix length, 0..=32.
    pub prefix_len: u8,
}

impl Network {
    /// The default route, `0.0.0.0/0`.
    pub const DEFAULT: Network = Network {
        address: Ipv4Addr::UNSPECIFIED,
        prefix_len: 0,
    };

    /// Create a network.
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Self {
        Self {
            address,
            prefix_len,
        }
    }

    /// Check whether this is the default route.
    pub fn is_default(&self) -> bool {
        self.prefix_len == 0 && self.address.is_unspecified()
    }

    /// Dotted netmask for the prefix length.
    pub fn netmask(&self) -> Ipv4Addr {
        let bits = match self.prefix_len {
            0 => 0,
            n => u32::MAX << (32 - u32::from(n.min(32))),
        };
        Ipv4Addr::from(bits)
    }
}

fn mask_to_prefix(mask: Ipv4Addr) -> Option<u8> {
    let bits = u32::from(mask);
    let ones = bits.leading_ones();
    (bits.checked_shl(ones).unwrap_or(0) == 0).then_some(ones as u8)
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "default" {
            return Ok(Network::DEFAULT);
        }
        let (address, prefix) = match s.split_once('/') {
            Some((address, prefix)) => (address, Some(prefix)),
            None => (s, None),
        };
        let address: Ipv4Addr = address
            .parse()
            .map_err(|_| format!("invalid network address '{}'", s))?;
        let prefix_len = match prefix {
            None => 32,
            Some(p) if p.contains('.') => {
                let mask: Ipv4Addr = p.parse().map_err(|_| format!("invalid netmask '{}'", p))?;
                mask_to_prefix(mask).ok_or_else(|| format!("non-contiguous netmask '{}'", p))?
            }
            Some(p) => match p.parse::<u8>() {
                Ok(n) if n <= 32 => n,
                _ => return Err(format!("invalid prefix length '{}'", p)),
            },
        };
        Ok(Network::new(address, prefix_len))
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default() {
            f.write_str("default")
        } else if self.prefix_len == 32 {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{}/{}", self.address, self.prefix_len)
        }
    }
}

impl TryFrom<String> for Network {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Network> for String {
    fn from(network: Network) -> Self {
        network.to_string()
    }
}

/// Where a next hop sends traffic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Gateway {
    /// Next-hop router address.
    Address(Ipv4Addr),

    /// PP interface (`pp 1`).
    Pp(u32),

    /// Tunnel interface (`tunnel 1`).
    Tunnel(u32),

    /// Gateway learned by DHCP on an interface (`dhcp lan2`).
    Dhcp(String),

    /// Discard (`null`).
    Null,

    /// Local delivery (`loopback`).
    Loopback,

    /// Directly attached interface (`lan1`).
    Interface(String),
}

impl fmt::Display for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gateway::Address(addr) => write!(f, "{}", addr),
            Gateway::Pp(n) => write!(f, "pp {}", n),
            Gateway::Tunnel(n) => write!(f, "tunnel {}", n),
            Gateway::Dhcp(interface) => write!(f, "dhcp {}", interface),
            Gateway::Null => f.write_str("null"),
            Gateway::Loopback => f.write_str("loopback"),
            Gateway::Interface(name) => f.write_str(name),
        }
    }
}

/// One `gateway` clause with its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextHop {
    /// Gateway.
    pub gateway: Gateway,

    /// `weight N`.
    #[serde(default)]
    pub weight: Option<u32>,

    /// `filter N..`; empty when not printed.
    #[serde(default)]
    pub filters: Vec<u32>,

    /// `keepalive N`.
    #[serde(default)]
    pub keepalive: Option<u32>,

    /// `hide`: route is withdrawn while the interface is down.
    #[serde(default)]
    pub hide: bool,
}

impl NextHop {
    /// Create a next hop with no parameters.
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            weight: None,
            filters: Vec::new(),
            keepalive: None,
            hide: false,
        }
    }

    /// Set the weight.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Set the hide flag.
    pub fn with_hide(mut self) -> Self {
        self.hide = true;
        self
    }

    fn render(&self) -> String {
        let mut out = format!("gateway {}", self.gateway);
        if let Some(weight) = self.weight {
            out.push_str(&format!(" weight {}", weight));
        }
        if !self.filters.is_empty() {
            out.push_str(" filter ");
            out.push_str(&join_numbers(&self.filters));
        }
        if let Some(keepalive) = self.keepalive {
            out.push_str(&format!(" keepalive {}", keepalive));
        }
        if self.hide {
            out.push_str(" hide");
        }
        out
    }
}

/// All next hops of one destination network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRoute {
    /// Destination.
    pub network: Network,

    /// Next hops in printed order.
    pub next_hops: Vec<NextHop>,
}

impl StaticRoute {
    /// Create a route.
    pub fn new(network: Network, next_hops: Vec<NextHop>) -> Self {
        Self { network, next_hops }
    }
}

impl Reconcilable for StaticRoute {
    type Key = Network;
    type Fallback = ();

    fn identity(&self) -> Network {
        self.network
    }

    fn fallback_key(&self) -> Option<()> {
        None
    }
}

/// Static route feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticRoutes;

impl StaticRoutes {
    /// Decode routes from any bucket of lines.
    pub fn decode_lines(lines: &[Line]) -> Decoded<StaticRoute> {
        let mut decoded = Decoded::new();
        let mut routes: IndexMap<Network, (&Line, Vec<NextHop>)> = IndexMap::new();
        let mut failed: Vec<Network> = Vec::new();

        for line in lines {
            let Some(rest) = line.text.strip_prefix("ip route ") else {
                continue;
            };
            let mut tokens = rest.split_whitespace();
            let Some(destination) = tokens.next() else {
                decoded.reject(FEATURE, line, "missing destination");
                continue;
            };
            let network = match destination.parse::<Network>() {
                Ok(network) => network,
                Err(reason) => {
                    decoded.reject(FEATURE, line, reason);
                    continue;
                }
            };
            match parse_hops(&tokens.collect::<Vec<_>>()) {
                Ok(hops) => routes.entry(network).or_insert((line, Vec::new())).1.extend(hops),
                Err(reason) => {
                    decoded.reject(FEATURE, line, reason);
                    failed.push(network);
                }
            }
        }

        for (network, (line, next_hops)) in routes {
            if !failed.contains(&network) {
                decoded.push_checked::<Self>(line, StaticRoute::new(network, next_hops));
            }
        }
        decoded
    }
}

fn parse_hops(tokens: &[&str]) -> Result<Vec<NextHop>, String> {
    let mut hops: Vec<NextHop> = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        let token = tokens[i];
        if token == "gateway" {
            let (gateway, used) = parse_gateway(&tokens[i + 1..])?;
            hops.push(NextHop::new(gateway));
            i += 1 + used;
            continue;
        }

        let hop = hops
            .last_mut()
            .ok_or_else(|| format!("expected gateway, got '{}'", token))?;
        match token {
            "weight" => {
                let value = tokens.get(i + 1).ok_or("weight without value")?;
                hop.weight = Some(parse_number(value, "weight")?);
                i += 2;
            }
            "keepalive" => {
                let value = tokens.get(i + 1).ok_or("keepalive without value")?;
                hop.keepalive = Some(parse_number(value, "keepalive")?);
                i += 2;
            }
            "hide" => {
                hop.hide = true;
                i += 1;
            }
            "filter" => {
                i += 1;
                while let Some(value) = tokens.get(i).filter(|t| t.starts_with(|c: char| c.is_ascii_digit())) {
                    hop.filters.push(parse_number(value, "filter number")?);
                    i += 1;
                }
                if hop.filters.is_empty() {
                    return Err("filter keyword without filter numbers".into());
                }
            }
            other => return Err(format!("unexpected parameter '{}'", other)),
        }
    }

    if hops.is_empty() {
        return Err("missing gateway".into());
    }
    Ok(hops)
}

fn parse_gateway(tokens: &[&str]) -> Result<(Gateway, usize), String> {
    let first = *tokens.first().ok_or("gateway without value")?;
    let argument = || tokens.get(1).copied().ok_or(format!("gateway {} without argument", first));
    match first {
        "pp" => Ok((Gateway::Pp(parse_number(argument()?, "pp number")?), 2)),
        "tunnel" => Ok((Gateway::Tunnel(parse_number(argument()?, "tunnel number")?), 2)),
        "dhcp" => Ok((Gateway::Dhcp(argument()?.to_string()), 2)),
        "null" => Ok((Gateway::Null, 1)),
        "loopback" => Ok((Gateway::Loopback, 1)),
        _ => {
            if let Ok(address) = first.parse::<Ipv4Addr>() {
                Ok((Gateway::Address(address), 1))
            } else if first.starts_with(|c: char| c.is_ascii_alphabetic())
                && first.chars().all(|c| c.is_ascii_alphanumeric() || c == '.')
            {
                Ok((Gateway::Interface(first.to_string()), 1))
            } else {
                Err(format!("invalid gateway '{}'", first))
            }
        }
    }
}

impl Feature for StaticRoutes {
    type Record = StaticRoute;

    const NAME: &'static str = FEATURE;

    fn show_command() -> &'static str {
        "show config | grep \"ip route\""
    }

    fn decode(stanza: &Stanza) -> Decoded<StaticRoute> {
        Self::decode_lines(stanza.top_level())
    }

    fn validate(route: &StaticRoute) -> Result<(), ValidationError> {
        if route.next_hops.is_empty() {
            return Err(ValidationError::Missing {
                feature: FEATURE,
                field: "next_hops",
            });
        }
        for hop in &route.next_hops {
            match &hop.gateway {
                Gateway::Pp(n) | Gateway::Tunnel(n) => {
                    check_range(FEATURE, "gateway", (*n).into(), 1, 65535)?;
                }
                Gateway::Dhcp(name) | Gateway::Interface(name) => {
                    single_token(FEATURE, "gateway", name)?;
                }
                Gateway::Address(_) | Gateway::Null | Gateway::Loopback => {}
            }
            if hop.hide && !matches!(hop.gateway, Gateway::Pp(_) | Gateway::Tunnel(_)) {
                return Err(ValidationError::Requires {
                    feature: FEATURE,
                    field: "hide",
                    requirement: "a pp or tunnel gateway".into(),
                });
            }
            if let Some(weight) = hop.weight {
                check_range(FEATURE, "weight", weight.into(), 0, 2_147_483_647)?;
            }
            if let Some(keepalive) = hop.keepalive {
                check_range(FEATURE, "keepalive", keepalive.into(), 1, 65535)?;
            }
            for &filter in &hop.filters {
                check_range(FEATURE, "filter", filter.into(), 1, 2_147_483_647)?;
            }
        }
        Ok(())
    }

    fn encode(route: &StaticRoute, intent: Intent) -> Result<Vec<String>, ValidationError> {
        if intent == Intent::Delete {
            return Ok(vec![format!("no ip route {}", route.network)]);
        }
        Self::validate(route)?;
        let hops: Vec<String> = route.next_hops.iter().map(NextHop::render).collect();
        Ok(vec![format!("ip route {} {}", route.network, hops.join(" "))])
    }
}
