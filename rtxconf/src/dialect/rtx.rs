//! Yamaha RTX dialect.
//!
//! RTX routers print `show config` as flat commands, grouping interface
//! settings under `tunnel select` and `pp select` contexts. Lines inside a
//! context are indented by one space; commands re-entered at the console are
//! not, so membership also falls back to command prefixes.
//!
//! # Config Example
//!
//! ```text
//! # RTX1210 Rev.14.01.38 (Fri Jul 29 19:31:45 2022)
//! ip route default gateway pp 1
//! ip lan1 secure filter in 200020 200021 200022 200023 200024 200025 2000
//! 26 200027 200099
//! pp select 1
//!  pp always-on on
//!  pppoe use lan2
//!  pp enable 1
//! tunnel select 1
//!  tunnel encapsulation l2tpv3
//!  ipsec tunnel 101
//!   ipsec sa policy 101 1 esp aes-cbc sha-hmac
//!   ipsec ike local address 1 192.168.1.253
//!  tunnel enable 1
//! ```
//!
//! # Context Graph
//!
//! ```text
//! ┌────────────┐  tunnel select N     ┌────────────┐
//! │ top level  ├─────────────────────►│ tunnel N   │
//! │            │◄─────────────────────┤            │
//! └─────┬──────┘  tunnel select none  └────────────┘
//!       │         tunnel enable N
//!       │
//!       └─ pp select N|anonymous ──►  ┌────────────┐
//!          ◄── pp select none ────────┤ pp N       │
//!              pp enable N            └────────────┘
//! ```

use crate::dialect::{ContextDefinition, Dialect};

/// Dialect name for Yamaha RTX routers.
pub const DIALECT_NAME: &str = "yamaha_rtx";

/// Context kind for `tunnel select N`.
pub const TUNNEL: &str = "tunnel";

/// Context kind for `pp select N`.
pub const PP: &str = "pp";

/// Words that begin a top-level or context command.
const COMMAND_STARTS: &[&str] = &[
    "administrator",
    "bgp",
    "bridge",
    "console",
    "description",
    "dhcp",
    "dns",
    "ethernet",
    "httpd",
    "ip",
    "ipsec",
    "ipv6",
    "l2tp",
    "lan",
    "login",
    "nat",
    "no",
    "ntpdate",
    "ospf",
    "pp",
    "ppp",
    "pppoe",
    "provider",
    "schedule",
    "security",
    "snmp",
    "sshd",
    "statistics",
    "switch",
    "syslog",
    "system",
    "telnetd",
    "timezone",
    "tunnel",
    "upnp",
    "user",
    "vlan",
];

/// Create the Yamaha RTX dialect.
pub fn dialect() -> Dialect {
    let tunnel = ContextDefinition::new(TUNNEL, r"^tunnel select (\d+)$")
        .and_then(|c| c.with_leave(r"^tunnel select none$"))
        .and_then(|c| c.with_trailer(r"^tunnel (enable|disable) \d+$"))
        .expect("static tunnel context patterns")
        .with_member_prefix("tunnel ")
        .with_member_prefix("ipsec ")
        .with_member_prefix("l2tp ")
        .with_member_prefix("description ")
        .with_member_prefix("ip tunnel ")
        .with_member_prefix("ipv6 tunnel ");

    let pp = ContextDefinition::new(PP, r"^pp select (\d+|anonymous)$")
        .and_then(|c| c.with_leave(r"^pp select none$"))
        .and_then(|c| c.with_trailer(r"^pp (enable|disable) (\d+|anonymous)$"))
        .expect("static pp context patterns")
        .with_member_prefix("pp ")
        .with_member_prefix("pppoe ")
        .with_member_prefix("ppp ")
        .with_member_prefix("ip pp ")
        .with_member_prefix("ipv6 pp ")
        .with_member_prefix("description ");

    Dialect::new(DIALECT_NAME)
        .with_context(tunnel)
        .with_context(pp)
        .with_command_starts(COMMAND_STARTS.iter().copied())
        .with_failure_pattern("Error:")
        .with_failure_pattern("Command failed:")
        .with_failure_pattern("Invalid parameter")
        .with_failure_pattern("Permission denied")
        .with_failure_pattern("not found")
        .with_not_found_pattern("not found")
}
