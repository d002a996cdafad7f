//! One-call parsing of device output into a [`Stanza`].

use log::debug;

use crate::dialect::Dialect;
use crate::feature::{Decoded, Feature};
use crate::text::{Ambiguity, Reconstructor, Scanner, Stanza};

/// Reconstructor and scanner configured from one dialect.
#[derive(Debug, Clone)]
pub struct Parser {
    reconstructor: Reconstructor,
    scanner: Scanner,
}

impl Parser {
    /// Create a parser for a dialect.
    pub fn new(dialect: &Dialect) -> Self {
        Self {
            reconstructor: dialect.reconstructor(),
            scanner: dialect.scanner(),
        }
    }

    /// Reconstruct and scan raw device output.
    pub fn parse(&self, raw: &str) -> ParsedConfig {
        let reconstruction = self.reconstructor.reconstruct(raw);
        let stanza = self.scanner.scan(&reconstruction.lines);
        debug!(
            "parsed {} logical lines: {} top-level, {} contexts, {} ambiguous joins",
            reconstruction.lines.len(),
            stanza.top_level().len(),
            stanza.context_count(),
            reconstruction.ambiguities.len()
        );
        ParsedConfig {
            stanza,
            ambiguities: reconstruction.ambiguities,
            line_count: reconstruction.lines.len(),
        }
    }

    /// Parse encoded commands as if the device had printed them.
    pub fn parse_commands<S: AsRef<str>>(&self, commands: &[S]) -> ParsedConfig {
        let raw = commands
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join("\n");
        self.parse(&raw)
    }
}

/// Result of [`Parser::parse`].
#[derive(Debug, Clone, Default)]
pub struct ParsedConfig {
    /// Scanned lines.
    pub stanza: Stanza,

    /// Wrap points joined without a confident policy decision.
    pub ambiguities: Vec<Ambiguity>,

    /// Number of logical lines after reconstruction.
    pub line_count: usize,
}

impl ParsedConfig {
    /// Decode one feature from the scanned lines.
    pub fn decode<F: Feature>(&self) -> Decoded<F::Record> {
        F::decode(&self.stanza)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::rtx;
    use crate::feature::{IpFilters, PpInterfaces, StaticRoutes, Tunnels};
    use crate::text::{ContextId, ContextKey};

    const SHOW_CONFIG: &str = "\
# RTX1210 Rev.14.01.38 (Fri Jul 29 19:31:45 2022)
ip route default gateway pp 1
ip route 192.168.100.0/24 gateway tunnel 1
ip lan1 address 192.168.1.1/24
ip lan1 secure filter in 200020 200021 200022 200023 200024 200025 2000
26 200027 200099
ip filter 200020 reject 10.0.0.0/8 * * * *
ip filter 200099 pass * * * * *
tunnel select 1
 tunnel encapsulation l2tpv3
 ipsec tunnel 101
  ipsec sa policy 101 1 esp aes-cbc sha-hmac
  ipsec ike local address 1 192.168.1.253
 tunnel enable 1
tunnel select 2
 tunnel encapsulation ipsec
 tunnel enable 2
dns server select 1 192.168.1.1 edns
=on example.com
";

    #[test]
    fn test_parse_show_config() {
        let parser = Parser::new(&rtx::dialect());
        let parsed = parser.parse(SHOW_CONFIG);

        let top: Vec<&str> = parsed.stanza.top_level().iter().map(|l| l.text.as_str()).collect();
        assert!(top.contains(
            &"ip lan1 secure filter in 200020 200021 200022 200023 200024 200025 200026 200027 200099"
        ));
        assert!(top.contains(&"dns server select 1 192.168.1.1 edns=on example.com"));
        assert!(parsed.ambiguities.is_empty());

        let tunnel1 = ContextKey::new(rtx::TUNNEL, ContextId::Number(1));
        assert_eq!(parsed.stanza.context(&tunnel1).unwrap().len(), 5);

        let routes = parsed.decode::<StaticRoutes>();
        assert_eq!(routes.records.len(), 2);
        let tunnels = parsed.decode::<Tunnels>();
        assert_eq!(tunnels.records.len(), 2);
        assert!(tunnels.errors.is_empty());
    }

    #[test]
    fn test_malformed_line_in_bucket_is_isolated() {
        let parser = Parser::new(&rtx::dialect());
        let parsed = parser.parse(
            "ip filter 1 pass * * tcp\n\
             ip filter 2 reject * * udp\n\
             ip filter 3 frobnicate * *\n\
             ip filter 4 pass * * icmp\n\
             ip filter 5 pass * * * * *\n",
        );
        let decoded = parsed.decode::<IpFilters>();
        assert_eq!(decoded.records.len(), 4);
        assert_eq!(decoded.errors.len(), 1);
        assert_eq!(decoded.errors[0].line, "ip filter 3 frobnicate * *");
        assert_eq!(decoded.errors[0].line_number, 3);
    }

    #[test]
    fn test_malformed_line_in_context_drops_only_that_context() {
        let parser = Parser::new(&rtx::dialect());
        let parsed = parser.parse(
            "ip route default gateway pp 1\n\
             tunnel select 1\n\
             \x20description hq\n\
             \x20tunnel encapsulation ipsec\n\
             \x20ipsec ike keepalive use 1 on sometimes\n\
             \x20ipsec tunnel 101\n\
             \x20ipsec ike remote address 1 203.0.113.1\n\
             tunnel select 2\n\
             \x20tunnel encapsulation l2tpv3\n\
             \x20tunnel enable 2\n\
             pp select 1\n\
             \x20pppoe use lan2\n\
             \x20pp enable 1\n\
             ip route 10.0.0.0/8 gateway tunnel 2\n",
        );
        let tunnel1 = ContextKey::new(rtx::TUNNEL, ContextId::Number(1));
        assert_eq!(parsed.stanza.context(&tunnel1).unwrap().len(), 5);

        let tunnels = parsed.decode::<Tunnels>();
        assert_eq!(tunnels.errors.len(), 1);
        let error = &tunnels.errors[0];
        assert_eq!(error.line_number, 5);
        assert_eq!(error.line, "ipsec ike keepalive use 1 on sometimes");
        assert!(error.reason.contains("tunnel 1"));
        let ids: Vec<u32> = tunnels.records.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![2]);

        let pp = parsed.decode::<PpInterfaces>();
        assert!(pp.is_clean());
        assert_eq!(pp.records.len(), 1);

        let routes = parsed.decode::<StaticRoutes>();
        assert!(routes.is_clean());
        assert_eq!(routes.records.len(), 2);
    }

    #[test]
    fn test_parse_commands() {
        let parser = Parser::new(&rtx::dialect());
        let parsed = parser.parse_commands(&["tunnel select 7", "tunnel enable 7", "tunnel select none"]);
        let key = ContextKey::new(rtx::TUNNEL, ContextId::Number(7));
        assert_eq!(parsed.stanza.context(&key).unwrap().len(), 1);
        assert_eq!(parsed.line_count, 3);
    }
}
