//! EtherType and IP-protocol name tables.
//!
//! Canonical mapping between the numeric wire values decoded off the kernel
//! ring and the human-readable names used throughout aggregation and rule
//! matching. Names are the same set and spelling the names tables commit to
//! on the wire: `summaryManager.go`/`enums.go` equivalent.

/// 16-bit EtherType, as carried on PacketInfo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EtherType(pub u16);

impl EtherType {
    pub const IPV4: EtherType = EtherType(0x0800);
    pub const IPV6: EtherType = EtherType(0x86DD);

    /// Canonical display name; unknown values fall back to `0xNNNN`.
    pub fn name(self) -> String {
        match self.0 {
            0x0000 => "LLC".into(),
            0x0800 => "IPv4".into(),
            0x0806 => "ARP".into(),
            0x8035 => "RARP".into(),
            0x86DD => "IPv6".into(),
            0x2000 => "Cisco Discovery".into(),
            0x01a2 => "Nortel Discovery".into(),
            0x6558 => "Transparent Ethernet Bridging".into(),
            0x8100 => "802.1Q".into(),
            0x880b => "PPP".into(),
            0x8863 => "PPPoE Discovery".into(),
            0x8864 => "PPPoE Session".into(),
            0x8847 => "MPLS Unicast".into(),
            0x8848 => "MPLS Multicast".into(),
            0x888e => "EAPOL".into(),
            0x88be => "ERSPAN".into(),
            0x88a8 => "QinQ".into(),
            0x88cc => "Link Layer Discovery".into(),
            0x9000 => "Ethernet CTP".into(),
            0x08FF => "BPQ".into(),
            0x0a00 => "IEEE PUP".into(),
            0x0a01 => "IEEE PUPAT".into(),
            0x6000 => "DEC".into(),
            0x6001 => "DNA DL".into(),
            0x6002 => "DNA RC".into(),
            0x6003 => "DNA RT".into(),
            0x6004 => "LAT".into(),
            0x6005 => "DIAG".into(),
            0x6006 => "CUST".into(),
            0x6007 => "SCA".into(),
            0x809B => "AppleTalk".into(),
            0x80F3 => "AARP".into(),
            0x8137 => "IPX".into(),
            0x8808 => "PAUSE".into(),
            0x8809 => "SLOW".into(),
            0x883E => "WCCP".into(),
            0x884c => "ATM MPOA".into(),
            0x8884 => "ATM FATE".into(),
            0x88A2 => "AoE".into(),
            0x88CA => "TIPC".into(),
            0x88F7 => "IEEE 1588".into(),
            0x8906 => "FCoE".into(),
            0x8914 => "FIP".into(),
            0xDADA => "EDSA".into(),
            other => format!("0x{other:04x}"),
        }
    }

    /// Parses a predicate token (case-insensitive) into an EtherType, returning
    /// `None` if the name is not in the table.
    pub fn from_name(name: &str) -> Option<EtherType> {
        let value = match name.to_lowercase().as_str() {
            "ip" | "ipv4" => 0x0800,
            "ipv6" => 0x86DD,
            "arp" => 0x0806,
            "cisco discovery" => 0x2000,
            "nortel discovery" => 0x01a2,
            "transparent ethernet bridging" => 0x6558,
            "802.1q" => 0x8100,
            "ppp" | "pppoe" => 0x880b,
            "pppoe discovery" => 0x8863,
            "pppoe session" => 0x8864,
            "mpls unicast" => 0x8847,
            "mpls multicast" => 0x8848,
            "eapol" => 0x888e,
            "erspan" => 0x88be,
            "qinq" => 0x88a8,
            "link layer discovery" => 0x88cc,
            "ethernet ctp" => 0x9000,
            "bpq" => 0x08FF,
            "ieee pup" => 0x0a00,
            "ieee pupat" => 0x0a01,
            "dec" => 0x6000,
            "dna dl" => 0x6001,
            "dna rc" => 0x6002,
            "dna rt" => 0x6003,
            "lat" => 0x6004,
            "diag" => 0x6005,
            "cust" => 0x6006,
            "sca" => 0x6007,
            "appletalk" => 0x809B,
            "aarp" => 0x80F3,
            "ipx" => 0x8137,
            "pause" => 0x8808,
            "slow" => 0x8809,
            "wccp" => 0x883E,
            "atm mpoa" => 0x884c,
            "atm fate" => 0x8884,
            "aoe" => 0x88A2,
            "tipc" => 0x88CA,
            "ieee 1588" => 0x88F7,
            "fcoe" => 0x8906,
            "fip" => 0x8914,
            "edsa" => 0xDADA,
            _ => return None,
        };
        Some(EtherType(value))
    }
}

/// 16-bit IP protocol number, as carried on PacketInfo (the wire field is a
/// u16 even though protocol numbers are conventionally 8-bit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IpProtocol(pub u16);

impl IpProtocol {
    pub const TCP: IpProtocol = IpProtocol(6);
    pub const UDP: IpProtocol = IpProtocol(17);

    /// Canonical display name; unknown values fall back to decimal.
    pub fn name(self) -> String {
        match self.0 {
            0 => "IP".into(),
            1 => "ICMPv4".into(),
            2 => "IGMP".into(),
            4 => "IPv4".into(),
            6 => "TCP".into(),
            17 => "UDP".into(),
            27 => "RUDP".into(),
            41 => "IPv6".into(),
            43 => "IPv6 Routing".into(),
            44 => "IPv6 Fragment".into(),
            47 => "GRE".into(),
            50 => "ESP".into(),
            51 => "AH".into(),
            58 => "ICMPv6".into(),
            59 => "No Next Header".into(),
            60 => "IPv6 Destination".into(),
            89 => "OSPF".into(),
            94 => "IPIP".into(),
            97 => "EtherIP".into(),
            112 => "VRRP".into(),
            132 => "SCTP".into(),
            136 => "UDPLite".into(),
            137 => "MPLS-in-IP".into(),
            other => format!("{other}"),
        }
    }

    /// Parses a predicate token (case-insensitive) into an IpProtocol.
    pub fn from_name(name: &str) -> Option<IpProtocol> {
        let value = match name.to_lowercase().as_str() {
            "icmp" | "icmpv4" => 1,
            "igmp" => 2,
            "udp" => 17,
            "tcp" => 6,
            "rudp" => 27,
            "ip" | "ipv4" => 4,
            "ipv6" => 41,
            "icmpv6" => 58,
            "ipv6 routing" => 43,
            "ipv6 fragment" => 44,
            "gre" => 47,
            "esp" => 50,
            "ah" => 51,
            "ospf" => 89,
            "ipip" => 94,
            "etherip" => 97,
            "vrrp" => 112,
            "sctp" => 132,
            "udplite" => 136,
            "mpls-in-ip" => 137,
            "no next header" => 59,
            "ipv6 destination" => 60,
            _ => return None,
        };
        Some(IpProtocol(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_ethertype_names() {
        assert_eq!(EtherType(0x0800).name(), "IPv4");
        assert_eq!(EtherType(0x86DD).name(), "IPv6");
        assert_eq!(EtherType(0x0806).name(), "ARP");
    }

    #[test]
    fn test_unknown_ethertype_formats_as_hex() {
        assert_eq!(EtherType(0xBEEF).name(), "0xbeef");
    }

    #[test]
    fn test_known_ipproto_names() {
        assert_eq!(IpProtocol(6).name(), "TCP");
        assert_eq!(IpProtocol(17).name(), "UDP");
        assert_eq!(IpProtocol(58).name(), "ICMPv6");
    }

    #[test]
    fn test_unknown_ipproto_formats_as_decimal() {
        assert_eq!(IpProtocol(250).name(), "250");
    }

    #[test]
    fn test_from_name_roundtrips_case_insensitively() {
        assert_eq!(EtherType::from_name("IPV4"), Some(EtherType(0x0800)));
        assert_eq!(IpProtocol::from_name("Tcp"), Some(IpProtocol(6)));
        assert_eq!(EtherType::from_name("nonsense"), None);
    }
}
