//! GeoIP enrichment: country/city lookup plus the reserved-range "LAN"
//! sentinel the original falls back to for addresses MaxMind can't place.
//!
//! The database is optional — an agent with no `geoip_path` configured, or
//! pointing at a file that fails to open, still runs; every lookup just
//! returns the unknown sentinel instead of an enriched name.

use std::net::IpAddr;
use std::path::Path;

use ipnetwork::IpNetwork;
use maxminddb::geoip2;

const UNKNOWN: &str = "-";
const LAN: &str = "LAN";

/// IPv4 ranges reserved by RFC 1918/5737/6598 and friends — traffic inside
/// these never resolves in a public GeoIP database, so it is labeled `LAN`
/// rather than `-` (unknown).
const RESERVED_RANGES: &[&str] = &[
    "0.0.0.0/8",
    "10.0.0.0/8",
    "100.64.0.0/10",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.0.0.0/24",
    "192.0.2.0/24",
    "192.88.99.0/24",
    "192.168.0.0/16",
    "198.18.0.0/15",
    "198.51.100.0/24",
    "203.0.113.0/24",
    "224.0.0.0/4",
    "233.252.0.0/24",
    "240.0.0.0/4",
    "255.255.255.255/32",
    "::1/128",
];

pub struct GeoDb {
    reader: Option<maxminddb::Reader<Vec<u8>>>,
    reserved: Vec<IpNetwork>,
}

pub struct GeoInfo {
    pub country: String,
    pub country_code: String,
    pub city: String,
}

impl GeoDb {
    /// Opens the database at `path`. An empty path or a failed open is not
    /// fatal — the agent runs with geo-enrichment disabled, matching the
    /// original's tolerance for a missing database.
    pub fn open(path: &str) -> GeoDb {
        let reserved = RESERVED_RANGES
            .iter()
            .filter_map(|cidr| cidr.parse().ok())
            .collect();
        if path.trim().is_empty() {
            return GeoDb { reader: None, reserved };
        }
        match maxminddb::Reader::open_readfile(Path::new(path)) {
            Ok(reader) => GeoDb {
                reader: Some(reader),
                reserved,
            },
            Err(e) => {
                tracing::warn!("failed to open GeoIP database at {path}: {e}, continuing without it");
                GeoDb { reader: None, reserved }
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.reader.is_some()
    }

    pub fn lookup(&self, ip: &str) -> GeoInfo {
        let Ok(addr) = ip.parse::<IpAddr>() else {
            return GeoInfo {
                country: UNKNOWN.into(),
                country_code: UNKNOWN.into(),
                city: UNKNOWN.into(),
            };
        };

        if self.reserved.iter().any(|net| net.contains(addr)) {
            return GeoInfo {
                country: LAN.into(),
                country_code: LAN.into(),
                city: LAN.into(),
            };
        }

        let Some(reader) = &self.reader else {
            return GeoInfo {
                country: UNKNOWN.into(),
                country_code: UNKNOWN.into(),
                city: UNKNOWN.into(),
            };
        };

        let city_record: Option<geoip2::City> = reader.lookup(addr).ok().flatten();
        match city_record {
            Some(record) => GeoInfo {
                country: record
                    .country
                    .as_ref()
                    .and_then(|c| c.names.as_ref())
                    .and_then(localized_name)
                    .unwrap_or_else(|| UNKNOWN.into()),
                country_code: record
                    .country
                    .as_ref()
                    .and_then(|c| c.iso_code)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| UNKNOWN.into()),
                city: record
                    .city
                    .as_ref()
                    .and_then(|c| c.names.as_ref())
                    .and_then(localized_name)
                    .unwrap_or_else(|| UNKNOWN.into()),
            },
            None => GeoInfo {
                country: UNKNOWN.into(),
                country_code: UNKNOWN.into(),
                city: UNKNOWN.into(),
            },
        }
    }
}

/// Picks the Chinese-locale name when MaxMind supplies one, else English.
fn localized_name(names: &std::collections::BTreeMap<&str, &str>) -> Option<String> {
    names
        .get("zh-CN")
        .or_else(|| names.get("en"))
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_database_path_disables_lookup_without_failing() {
        let db = GeoDb::open("");
        assert!(!db.is_loaded());
        let info = db.lookup("8.8.8.8");
        assert_eq!(info.country_code, UNKNOWN);
    }

    #[test]
    fn test_private_range_is_labeled_lan_even_without_database() {
        let db = GeoDb::open("");
        let info = db.lookup("192.168.1.5");
        assert_eq!(info.country_code, LAN);
        assert_eq!(info.city, LAN);
    }

    #[test]
    fn test_unparseable_address_is_unknown() {
        let db = GeoDb::open("");
        let info = db.lookup("not-an-ip");
        assert_eq!(info.country_code, UNKNOWN);
    }

    #[test]
    fn test_loopback_v6_is_lan() {
        let db = GeoDb::open("");
        let info = db.lookup("::1");
        assert_eq!(info.country_code, LAN);
    }
}
