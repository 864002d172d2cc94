use std::path::PathBuf;

use tokio::sync::{mpsc, RwLock};

use crate::blacklist::{self, BlacklistEvent, BlacklistKind};
use crate::config::{BlacklistConfig, Config, Rule};
use crate::error::AppError;

/// Payload of the `change_black` RPC.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ChangeBlackPayload {
    pub inc: bool,
    #[serde(rename = "type")]
    pub kind: BlacklistKind,
    pub data: String,
}

/// Owns the single mutable `Config` for the process lifetime. Mutating
/// methods validate, write-lock across validate→persist→emit (per the
/// concurrency model's "Config" row), and persist to disk before returning.
pub struct ConfigStore {
    path: PathBuf,
    inner: RwLock<Config>,
    black_tx: mpsc::Sender<BlacklistEvent>,
}

impl ConfigStore {
    /// Creates the store and returns the receiver half for the synchronizer
    /// task — there is exactly one consumer, so the channel is taken once.
    pub fn new(path: PathBuf, config: Config) -> (ConfigStore, mpsc::Receiver<BlacklistEvent>) {
        let (tx, rx) = mpsc::channel(1);
        (
            ConfigStore {
                path,
                inner: RwLock::new(config),
                black_tx: tx,
            },
            rx,
        )
    }

    pub async fn snapshot(&self) -> Config {
        self.inner.read().await.clone()
    }

    pub async fn rules(&self) -> Vec<Rule> {
        self.inner.read().await.rules.clone()
    }

    pub async fn black(&self) -> BlacklistConfig {
        self.inner.read().await.black.clone()
    }

    pub async fn max_packet_count(&self) -> usize {
        self.inner.read().await.max_packet_count
    }

    pub async fn summary_time_secs(&self) -> u64 {
        self.inner.read().await.summary_time
    }

    /// Replaces the stored rule list and persists. Callers are expected to
    /// have already confirmed the candidate set compiles to at least one
    /// rule (`RuleMatcher::compile` returning non-zero) before calling this.
    pub async fn set_rules(&self, rules: Vec<Rule>) -> Result<(), AppError> {
        let mut guard = self.inner.write().await;
        guard.rules = rules;
        guard.save(&self.path)
    }

    /// Validates, mutates the in-memory blacklist, persists, then emits the
    /// mutation to the synchronizer. Insert is idempotent: re-adding an
    /// already-present entry is a no-op on the set but still persists and
    /// still emits, so the kernel map converges even after a missed event.
    pub async fn change_black(&self, payload: ChangeBlackPayload) -> Result<(), AppError> {
        if !blacklist::validate(payload.kind, &payload.data) {
            return Err(AppError::RpcValidation(format!(
                "{} address validation failed",
                payload.kind.as_str()
            )));
        }

        {
            let mut guard = self.inner.write().await;
            let set = match payload.kind {
                BlacklistKind::Mac => &mut guard.black.mac,
                BlacklistKind::Ipv4 => &mut guard.black.ipv4,
                BlacklistKind::Ipv6 => &mut guard.black.ipv6,
            };
            if payload.inc {
                if !set.contains(&payload.data) {
                    set.push(payload.data.clone());
                }
            } else {
                set.retain(|d| d != &payload.data);
            }
            guard.save(&self.path)?;
        }

        let event = BlacklistEvent {
            inc: payload.inc,
            kind: payload.kind,
            data: payload.data,
        };
        let _ = self.black_tx.send(event).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_path() -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("netguard-test-store-{}.json", std::process::id()));
        path
    }

    fn sample_config() -> Config {
        Config {
            interface: "eth0".into(),
            summary_time: 1,
            port: 9000,
            enable: true,
            rules: vec![],
            max_packet_count: 1000,
            geoip_path: String::new(),
            black: BlacklistConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_change_black_rejects_invalid_address() {
        let path = temp_config_path();
        sample_config().save(&path).unwrap();
        let (store, _rx) = ConfigStore::new(path.clone(), sample_config());
        let err = store
            .change_black(ChangeBlackPayload {
                inc: true,
                kind: BlacklistKind::Ipv4,
                data: "not-an-ip".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "RpcValidation");
        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn test_change_black_insert_then_remove_is_idempotent() {
        let path = temp_config_path();
        sample_config().save(&path).unwrap();
        let (store, mut rx) = ConfigStore::new(path.clone(), sample_config());

        store
            .change_black(ChangeBlackPayload {
                inc: true,
                kind: BlacklistKind::Ipv4,
                data: "1.2.3.4".into(),
            })
            .await
            .unwrap();
        store
            .change_black(ChangeBlackPayload {
                inc: true,
                kind: BlacklistKind::Ipv4,
                data: "1.2.3.4".into(),
            })
            .await
            .unwrap();
        let black = store.black().await;
        assert_eq!(black.ipv4, vec!["1.2.3.4".to_string()]);

        store
            .change_black(ChangeBlackPayload {
                inc: false,
                kind: BlacklistKind::Ipv4,
                data: "1.2.3.4".into(),
            })
            .await
            .unwrap();
        assert!(store.black().await.ipv4.is_empty());

        for _ in 0..3 {
            rx.recv().await.unwrap();
        }
        std::fs::remove_file(path).ok();
    }
}
