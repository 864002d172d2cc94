//! Configuration: the `Config` struct, its JSON/YAML persistence, and the
//! shared `ConfigStore` that owns it for the lifetime of the process.
//!
//! All tunables live on `Config` rather than scattered module constants —
//! unlike a desktop app, this agent has exactly one mutable settings object
//! and it is loaded from a single file at startup.

mod store;

pub use store::{ChangeBlackPayload, ConfigStore};

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// One compiled-from-text rule as it appears in configuration and on the
/// `get_rules`/`set_rules` wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rule {
    pub rule_name: String,
    #[serde(default)]
    pub ip: Vec<String>,
    #[serde(default)]
    pub port: Vec<String>,
    #[serde(default)]
    pub mac: Vec<String>,
    #[serde(default)]
    pub eth_type: Vec<String>,
    #[serde(default)]
    pub ip_protocol: Vec<String>,
}

/// The three disjoint blacklist sets, persisted as part of configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlacklistConfig {
    #[serde(default)]
    pub mac: Vec<String>,
    #[serde(default)]
    pub ipv4: Vec<String>,
    #[serde(default)]
    pub ipv6: Vec<String>,
}

/// Top-level configuration, loaded from `.json`/`.yaml`/`.yml` at startup and
/// rewritten in place on every mutating RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// NIC name to attach the XDP program to; auto-detected if empty.
    #[serde(default)]
    pub interface: String,
    /// Aggregation tick period, in seconds.
    pub summary_time: u64,
    /// HTTP/WebSocket listen port.
    pub port: u16,
    #[serde(default)]
    pub enable: bool,
    #[serde(default, rename = "rule")]
    pub rules: Vec<Rule>,
    /// Bound on `|InputPackets|` and on each rule's matched-packet ring.
    pub max_packet_count: usize,
    /// Path to a MaxMind GeoIP2 city database; empty disables enrichment.
    #[serde(default)]
    pub geoip_path: String,
    #[serde(default)]
    pub black: BlacklistConfig,
}

impl Config {
    /// Loads configuration from `path`, selecting JSON or YAML by extension,
    /// and auto-detecting the interface if left blank.
    pub fn load(path: &Path) -> Result<Config, AppError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("error reading config file: {e}")))?;

        let mut config: Config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&data)?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&data)
                .map_err(|e| AppError::Config(format!("error parsing config file: {e}")))?,
            other => {
                return Err(AppError::Config(format!(
                    "unsupported config file format: {:?}",
                    other
                )))
            }
        };

        if config.interface.is_empty() {
            config.interface = default_interface().ok_or_else(|| {
                AppError::Config("no suitable network interface found".into())
            })?;
        }
        Ok(config)
    }

    /// Persists configuration back to `path` in its original format.
    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        let data = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("yaml") | Some("yml") => serde_yaml::to_string(self)?,
            other => {
                return Err(AppError::Config(format!(
                    "unsupported config file format: {:?}",
                    other
                )))
            }
        };
        std::fs::write(path, data).map_err(|e| AppError::Io(e.to_string()))
    }
}

/// Picks the first interface that is up, not loopback, and not point-to-point
/// unnumbered — the same "first usable NIC" heuristic as the original's
/// `GetDefaultInterface`, read from sysfs instead of iterating the platform's
/// socket-layer interface list.
fn default_interface() -> Option<String> {
    let entries = std::fs::read_dir("/sys/class/net").ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name == "lo" {
            continue;
        }
        let operstate = std::fs::read_to_string(entry.path().join("operstate"))
            .unwrap_or_default();
        if operstate.trim() == "up" {
            return Some(name);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(ext: &str, contents: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("netguard-test-config-{}.{}", std::process::id(), ext));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_json_config() {
        let path = write_temp("json", r#"{
            "interface": "eth0",
            "summary_time": 1,
            "port": 9000,
            "enable": true,
            "rule": [],
            "max_packet_count": 1000,
            "geoip_path": "",
            "black": {"mac": [], "ipv4": [], "ipv6": []}
        }"#);
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.interface, "eth0");
        assert_eq!(cfg.port, 9000);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_load_yaml_config() {
        let path = write_temp(
            "yaml",
            "interface: eth1\nsummary_time: 2\nport: 9001\nenable: true\nmax_packet_count: 500\n",
        );
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.interface, "eth1");
        assert_eq!(cfg.summary_time, 2);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_save_then_load_round_trips_json() {
        let path = write_temp("json", "{}");
        let cfg = Config {
            interface: "eth0".into(),
            summary_time: 1,
            port: 9000,
            enable: true,
            rules: vec![Rule {
                rule_name: "dns".into(),
                port: vec!["53".into()],
                ..Default::default()
            }],
            max_packet_count: 1000,
            geoip_path: String::new(),
            black: BlacklistConfig::default(),
        };
        cfg.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.port, cfg.port);
        assert_eq!(loaded.rules.len(), 1);
        assert_eq!(loaded.rules[0].rule_name, "dns");
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_unsupported_extension_errors() {
        let path = write_temp("toml", "x = 1");
        let err = Config::load(&path).unwrap_err();
        assert_eq!(err.kind(), "Config");
        std::fs::remove_file(path).ok();
    }
}
