//! Kernel-map synchronizer (T_black): the sole consumer of blacklist
//! mutation events, translating each into an insert/delete against the
//! three kernel maps.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::Arc;

use macaddr::MacAddr6;
use tokio::sync::mpsc;

use crate::blacklist::{BlacklistEvent, BlacklistKind};
use crate::kernel::KernelHandle;

/// Consumes blacklist mutation events until the channel closes (on shutdown),
/// applying each to the corresponding kernel map. Failures are logged and
/// never propagated — the config is already the source of truth, and the
/// next mutation will re-attempt convergence.
pub struct Synchronizer {
    kernel: Arc<KernelHandle>,
    rx: mpsc::Receiver<BlacklistEvent>,
}

impl Synchronizer {
    pub fn new(kernel: Arc<KernelHandle>, rx: mpsc::Receiver<BlacklistEvent>) -> Synchronizer {
        Synchronizer { kernel, rx }
    }

    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            if let Err(e) = self.apply(&event).await {
                tracing::warn!(
                    kind = event.kind.as_str(),
                    data = %event.data,
                    "blacklist kernel map sync failed: {e}"
                );
            }
        }
    }

    async fn apply(&self, event: &BlacklistEvent) -> anyhow::Result<()> {
        match event.kind {
            BlacklistKind::Mac => {
                let mac = MacAddr6::from_str(&event.data)?;
                let key = mac.into_array();
                if event.inc {
                    self.kernel.put_mac(key).await?;
                } else {
                    self.kernel.remove_mac(key).await?;
                }
            }
            BlacklistKind::Ipv4 => {
                let ip = Ipv4Addr::from_str(&event.data)?;
                let key = u32::from_be_bytes(ip.octets());
                if event.inc {
                    self.kernel.put_ipv4(key).await?;
                } else {
                    self.kernel.remove_ipv4(key).await?;
                }
            }
            BlacklistKind::Ipv6 => {
                let ip = Ipv6Addr::from_str(&event.data)?;
                let octets = ip.octets();
                let mut key = [0u32; 4];
                for i in 0..4 {
                    key[i] = u32::from_be_bytes(octets[i * 4..(i + 1) * 4].try_into().unwrap());
                }
                if event.inc {
                    self.kernel.put_ipv6(key).await?;
                } else {
                    self.kernel.remove_ipv6(key).await?;
                }
            }
        }
        Ok(())
    }
}
