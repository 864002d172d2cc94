//! Blacklist validation and the mutation event carried from the config store
//! to the kernel-map synchronizer.

pub mod sync;

use std::net::IpAddr;
use std::str::FromStr;

use macaddr::MacAddr6;
use serde::{Deserialize, Serialize};

pub use sync::Synchronizer;

/// Which of the three disjoint sets a mutation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlacklistKind {
    Mac,
    Ipv4,
    Ipv6,
}

impl BlacklistKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BlacklistKind::Mac => "mac",
            BlacklistKind::Ipv4 => "ipv4",
            BlacklistKind::Ipv6 => "ipv6",
        }
    }
}

/// One validated add/remove, pushed from the config store to the
/// synchronizer task over a single-consumer channel.
#[derive(Debug, Clone)]
pub struct BlacklistEvent {
    pub inc: bool,
    pub kind: BlacklistKind,
    pub data: String,
}

/// `true` iff `mac` parses as a MAC address in any standard separator form.
pub fn is_valid_mac(mac: &str) -> bool {
    MacAddr6::from_str(mac).is_ok()
}

/// `true` iff `ip` parses as a dotted-quad IPv4 address.
pub fn is_valid_ipv4(ip: &str) -> bool {
    matches!(ip.parse::<IpAddr>(), Ok(IpAddr::V4(_)))
}

/// `true` iff `ip` parses as an IPv6 address.
pub fn is_valid_ipv6(ip: &str) -> bool {
    matches!(ip.parse::<IpAddr>(), Ok(IpAddr::V6(_)))
}

/// Validates `data` against `kind`'s address family.
pub fn validate(kind: BlacklistKind, data: &str) -> bool {
    match kind {
        BlacklistKind::Mac => is_valid_mac(data),
        BlacklistKind::Ipv4 => is_valid_ipv4(data),
        BlacklistKind::Ipv6 => is_valid_ipv6(data),
    }
}

/// Normalizes a MAC address to lowercase hex with separators stripped — the
/// canonical form used for both blacklist keys and rule-matcher comparisons.
pub fn normalize_mac(mac: &str) -> Option<String> {
    MacAddr6::from_str(mac)
        .ok()
        .map(|m| m.to_string().to_lowercase().replace(':', "").replace('-', ""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_mac_formats() {
        assert!(is_valid_mac("aa:bb:cc:dd:ee:ff"));
        assert!(is_valid_mac("AA-BB-CC-DD-EE-FF"));
        assert!(!is_valid_mac("not-a-mac"));
    }

    #[test]
    fn test_valid_ipv4_rejects_ipv6() {
        assert!(is_valid_ipv4("1.2.3.4"));
        assert!(!is_valid_ipv4("::1"));
    }

    #[test]
    fn test_valid_ipv6_rejects_ipv4() {
        assert!(is_valid_ipv6("::1"));
        assert!(!is_valid_ipv6("1.2.3.4"));
    }

    #[test]
    fn test_normalize_mac_strips_separators() {
        assert_eq!(
            normalize_mac("AA:BB:CC:DD:EE:FF").as_deref(),
            Some("aabbccddeeff")
        );
    }

    #[test]
    fn test_validate_dispatches_by_kind() {
        assert!(validate(BlacklistKind::Ipv4, "1.2.3.4"));
        assert!(!validate(BlacklistKind::Ipv4, "::1"));
        assert!(validate(BlacklistKind::Mac, "aa:bb:cc:dd:ee:ff"));
    }
}
