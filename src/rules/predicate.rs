//! The five predicate grammars a rule's fields compile to, and the packet
//! view they match against.

use std::str::FromStr;

use ipnetwork::IpNetwork;
use macaddr::MacAddr6;

use crate::proto::{EtherType, IpProtocol};

/// Borrowed view of an enriched packet, independent of the aggregation
/// engine's owned representation — this is the only thing a predicate needs
/// to see to decide a match.
#[derive(Debug, Clone, Copy)]
pub struct MatchInput<'a> {
    pub src_ip: &'a str,
    pub dst_ip: &'a str,
    pub src_port: u16,
    pub dst_port: u16,
    pub src_mac: &'a str,
    pub dst_mac: &'a str,
    pub eth_type: EtherType,
    pub ip_proto: IpProtocol,
    pub country_code: &'a str,
    pub city: &'a str,
}

#[derive(Debug, Clone)]
pub enum IpPredicate {
    /// `GEOIP:CC` / `GEOIP:!CC`
    Geoip { code: String, not: bool },
    /// `CITY:name` / `CITY:!name`
    City { name: String, not: bool },
    /// `a.b.c.d/n` or `v6/n`
    Cidr(IpNetwork),
    /// bare address, equality against src or dst
    Exact(String),
}

impl IpPredicate {
    /// Parses one `ip[]` entry. Returns `None` for anything unparseable —
    /// the caller silently discards these per the rule-compiler contract.
    pub fn parse(raw: &str) -> Option<IpPredicate> {
        let trimmed = raw.trim().to_uppercase();
        if let Some(rest) = trimmed.strip_prefix("GEOIP:") {
            let (not, code) = match rest.strip_prefix('!') {
                Some(code) => (true, code),
                None => (false, rest),
            };
            return Some(IpPredicate::Geoip {
                code: code.to_string(),
                not,
            });
        }
        if let Some(rest) = trimmed.strip_prefix("CITY:") {
            // City names are compared case-sensitively against the
            // enriched value, so re-derive the original-case remainder
            // rather than using the upper-cased copy.
            let original = raw.trim();
            let original_rest = original
                .splitn(2, ':')
                .nth(1)
                .unwrap_or("");
            let (not, name) = match original_rest.strip_prefix('!') {
                Some(name) => (true, name),
                None => (false, original_rest),
            };
            return Some(IpPredicate::City {
                name: name.to_string(),
                not,
            });
        }
        if trimmed.contains('/') {
            return IpNetwork::from_str(raw.trim()).ok().map(IpPredicate::Cidr);
        }
        if raw.trim().parse::<std::net::IpAddr>().is_ok() {
            return Some(IpPredicate::Exact(raw.trim().to_string()));
        }
        None
    }

    pub fn is_match(&self, packet: MatchInput) -> bool {
        match self {
            IpPredicate::Exact(ip) => ip == packet.src_ip || ip == packet.dst_ip,
            IpPredicate::Cidr(net) => {
                if !packet.src_ip.is_empty() {
                    packet
                        .src_ip
                        .parse()
                        .map(|ip| net.contains(ip))
                        .unwrap_or(false)
                } else if !packet.dst_ip.is_empty() {
                    packet
                        .dst_ip
                        .parse()
                        .map(|ip| net.contains(ip))
                        .unwrap_or(false)
                } else {
                    false
                }
            }
            IpPredicate::Geoip { code, not } => {
                if packet.country_code.is_empty() {
                    return false;
                }
                let matched = code.as_str() == packet.country_code.to_uppercase();
                if *not {
                    !matched
                } else {
                    matched
                }
            }
            IpPredicate::City { name, not } => {
                if packet.city.is_empty() {
                    return false;
                }
                let matched = name == packet.city;
                if *not {
                    !matched
                } else {
                    matched
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum PortPredicate {
    Single(u16),
    Range(u16, u16),
    List(Vec<PortPredicate>),
}

impl PortPredicate {
    /// Parses one `port[]` entry: a single integer, a `start-end` range, or a
    /// comma-separated list whose tokens may themselves be ranges (an
    /// intentional broadening of the original grammar — see DESIGN.md).
    pub fn parse(raw: &str) -> Option<PortPredicate> {
        let raw = raw.trim();
        if raw.contains(',') {
            let items: Vec<PortPredicate> = raw
                .split(',')
                .filter_map(|tok| PortPredicate::parse_token(tok.trim()))
                .collect();
            if items.is_empty() {
                return None;
            }
            return Some(PortPredicate::List(items));
        }
        PortPredicate::parse_token(raw)
    }

    fn parse_token(tok: &str) -> Option<PortPredicate> {
        if let Some((start, end)) = tok.split_once('-') {
            let start: u32 = start.trim().parse().ok()?;
            let end: u32 = end.trim().parse().ok()?;
            if start > 0 && start <= 65535 && end > 0 && end <= 65535 && start <= end {
                return Some(PortPredicate::Range(start as u16, end as u16));
            }
            return None;
        }
        let port: u32 = tok.parse().ok()?;
        if port > 0 && port <= 65535 {
            return Some(PortPredicate::Single(port as u16));
        }
        None
    }

    pub fn is_match(&self, port: u16) -> bool {
        match self {
            PortPredicate::Single(p) => *p == port,
            PortPredicate::Range(start, end) => port >= *start && port <= *end,
            PortPredicate::List(items) => items.iter().any(|p| p.is_match(port)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MacPredicate {
    normalized: String,
}

impl MacPredicate {
    /// Parses any separator form a standard MAC parser accepts, normalizing
    /// to lowercase hex with separators stripped.
    pub fn parse(raw: &str) -> Option<MacPredicate> {
        MacAddr6::from_str(raw.trim()).ok().map(|mac| MacPredicate {
            normalized: mac.to_string().to_lowercase().replace([':', '-'], ""),
        })
    }

    pub fn is_match(&self, mac: &str) -> bool {
        let candidate = mac.to_lowercase().replace([':', '-'], "");
        self.normalized == candidate
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EthTypePredicate(pub EtherType);

impl EthTypePredicate {
    pub fn parse(raw: &str) -> Option<EthTypePredicate> {
        EtherType::from_name(raw.trim()).map(EthTypePredicate)
    }

    pub fn is_match(&self, eth_type: EtherType) -> bool {
        self.0 == eth_type
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IpProtoPredicate(pub IpProtocol);

impl IpProtoPredicate {
    pub fn parse(raw: &str) -> Option<IpProtoPredicate> {
        IpProtocol::from_name(raw.trim()).map(IpProtoPredicate)
    }

    pub fn is_match(&self, ip_proto: IpProtocol) -> bool {
        self.0 == ip_proto
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet<'a>() -> MatchInput<'a> {
        MatchInput {
            src_ip: "10.4.5.6",
            dst_ip: "8.8.8.8",
            src_port: 5000,
            dst_port: 53,
            src_mac: "aa:bb:cc:dd:ee:01",
            dst_mac: "11:22:33:44:55:66",
            eth_type: EtherType(0x0800),
            ip_proto: IpProtocol(17),
            country_code: "US",
            city: "Seattle",
        }
    }

    #[test]
    fn test_cidr_predicate_matches_src() {
        let p = IpPredicate::parse("10.0.0.0/8").unwrap();
        assert!(p.is_match(sample_packet()));
    }

    #[test]
    fn test_cidr_predicate_falls_through_to_dst_when_src_empty() {
        let p = IpPredicate::parse("8.0.0.0/8").unwrap();
        let mut packet = sample_packet();
        packet.src_ip = "";
        assert!(p.is_match(packet));
    }

    #[test]
    fn test_cidr_predicate_no_match_outside_range() {
        let p = IpPredicate::parse("11.0.0.0/8").unwrap();
        assert!(!p.is_match(sample_packet()));
    }

    #[test]
    fn test_geoip_negation() {
        let p = IpPredicate::parse("GEOIP:!CN").unwrap();
        assert!(p.is_match(sample_packet()));
        let p2 = IpPredicate::parse("GEOIP:!US").unwrap();
        assert!(!p2.is_match(sample_packet()));
    }

    #[test]
    fn test_city_predicate_case_sensitive() {
        let p = IpPredicate::parse("CITY:Seattle").unwrap();
        assert!(p.is_match(sample_packet()));
        let p2 = IpPredicate::parse("CITY:seattle").unwrap();
        assert!(!p2.is_match(sample_packet()));
    }

    #[test]
    fn test_unparseable_ip_predicate_is_none() {
        assert!(IpPredicate::parse("not an ip").is_none());
    }

    #[test]
    fn test_port_predicate_single() {
        let p = PortPredicate::parse("53").unwrap();
        assert!(p.is_match(53));
        assert!(!p.is_match(54));
    }

    #[test]
    fn test_port_predicate_range() {
        let p = PortPredicate::parse("8000-8100").unwrap();
        assert!(p.is_match(8050));
        assert!(!p.is_match(7999));
    }

    #[test]
    fn test_port_predicate_comma_list_with_nested_range() {
        let p = PortPredicate::parse("80,443,8000-8100").unwrap();
        assert!(p.is_match(80));
        assert!(p.is_match(8050));
        assert!(!p.is_match(8200));
    }

    #[test]
    fn test_port_predicate_rejects_out_of_range() {
        assert!(PortPredicate::parse("70000").is_none());
        assert!(PortPredicate::parse("0").is_none());
    }

    #[test]
    fn test_mac_predicate_ignores_format() {
        let p = MacPredicate::parse("AA:BB:CC:DD:EE:01").unwrap();
        assert!(p.is_match("aabbccddee01"));
        assert!(p.is_match("aa:bb:cc:dd:ee:01"));
    }

    #[test]
    fn test_eth_type_predicate() {
        let p = EthTypePredicate::parse("ipv4").unwrap();
        assert!(p.is_match(EtherType(0x0800)));
        assert!(!p.is_match(EtherType(0x86DD)));
    }

    #[test]
    fn test_ip_proto_predicate() {
        let p = IpProtoPredicate::parse("udp").unwrap();
        assert!(p.is_match(IpProtocol(17)));
        assert!(!p.is_match(IpProtocol(6)));
    }
}
