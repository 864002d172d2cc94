//! Ring-buffer consumers (T_pkt / T_drop): poll the two kernel rings, decode
//! each record, and hand owned events to the aggregator over bounded
//! channels. Polls rather than blocks, sleeping briefly between empty reads —
//! the same idiom a small XDP ring consumer uses to avoid spinning a core.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch};

use crate::aggregate::types::{DropEvent, DropKind, PacketEvent};
use crate::error::AppError;
use crate::kernel::wire::{self, RawDrop, RawPacket};
use crate::kernel::KernelHandle;
use crate::proto::{EtherType, IpProtocol};

const POLL_IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Polls the packet-event ring until `shutdown` fires or the aggregator's
/// receiver is dropped. Returns `Err` only if the ring buffer map could not
/// be taken at startup — the one ring-unavailable condition this loop can
/// observe; see the supervisor's handling of that result and DESIGN.md for
/// why a closed ring mid-run cannot be detected here. A graceful shutdown or
/// closed downstream channel returns `Ok`.
pub async fn run_packet_ingest(
    kernel: Arc<KernelHandle>,
    tx: mpsc::Sender<PacketEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), AppError> {
    let mut ring = kernel.take_packet_ring().await?;
    let mut decode_errors: u64 = 0;

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }
        match ring.next() {
            Some(item) => match wire::decode_packet(&item) {
                Some(raw) => {
                    let event = to_packet_event(raw);
                    if tx.send(event).await.is_err() {
                        tracing::info!("aggregator packet channel closed, stopping ingest");
                        return Ok(());
                    }
                }
                None => {
                    decode_errors += 1;
                    tracing::warn!(decode_errors, "dropped malformed packet record");
                }
            },
            None => {
                tokio::select! {
                    _ = tokio::time::sleep(POLL_IDLE_SLEEP) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }
}

/// Polls the drop-event ring. A closed ring or taken-map failure here is
/// logged, not fatal — the firewall keeps dropping packets in-kernel even if
/// userspace can no longer observe it.
pub async fn run_drop_ingest(
    kernel: Arc<KernelHandle>,
    tx: mpsc::Sender<DropEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ring = match kernel.take_drop_ring().await {
        Ok(ring) => ring,
        Err(e) => {
            tracing::warn!("drop-event ring unavailable, drop telemetry disabled: {e}");
            return;
        }
    };

    loop {
        if *shutdown.borrow() {
            return;
        }
        match ring.next() {
            Some(item) => match wire::decode_drop(&item) {
                Some(raw) => {
                    let event = to_drop_event(raw);
                    if tx.send(event).await.is_err() {
                        tracing::info!("aggregator drop channel closed, stopping ingest");
                        return;
                    }
                }
                None => tracing::warn!("dropped malformed drop-event record"),
            },
            None => {
                tokio::select! {
                    _ = tokio::time::sleep(POLL_IDLE_SLEEP) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }
}

fn to_packet_event(raw: RawPacket) -> PacketEvent {
    let eth_type = EtherType(raw.eth_proto);
    let (src_ip, dst_ip) = if eth_type == EtherType::IPV6 {
        (
            Ipv6Addr::from(raw.src_ipv6).to_string(),
            Ipv6Addr::from(raw.dst_ipv6).to_string(),
        )
    } else {
        (
            Ipv4Addr::from(raw.src_ip).to_string(),
            Ipv4Addr::from(raw.dst_ip).to_string(),
        )
    };

    PacketEvent {
        src_ip,
        dst_ip,
        src_port: raw.src_port,
        dst_port: raw.dst_port,
        src_mac: format_mac(raw.src_mac),
        dst_mac: format_mac(raw.dst_mac),
        eth_type,
        ip_proto: IpProtocol(raw.ip_proto),
        pkt_size: raw.pkt_size,
        timestamp_ns: now_ns(),
    }
}

fn to_drop_event(raw: RawDrop) -> DropEvent {
    match raw.ip_version {
        1 => DropEvent {
            kind: DropKind::Ipv4,
            key: Ipv4Addr::new(raw.ip[0], raw.ip[1], raw.ip[2], raw.ip[3]).to_string(),
        },
        2 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&raw.ip);
            DropEvent {
                kind: DropKind::Ipv6,
                key: Ipv6Addr::from(octets).to_string(),
            }
        }
        _ => DropEvent {
            kind: DropKind::Mac,
            key: format_mac(raw.mac),
        },
    }
}

fn format_mac(bytes: [u8; 6]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mac_is_colon_separated_lowercase() {
        assert_eq!(
            format_mac([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]),
            "aa:bb:cc:dd:ee:01"
        );
    }

    #[test]
    fn test_to_packet_event_picks_ipv4_fields_for_ipv4_ethertype() {
        let raw = RawPacket {
            src_ip: [10, 0, 0, 5],
            dst_ip: [8, 8, 8, 8],
            src_ipv6: [0; 16],
            dst_ipv6: [0; 16],
            src_port: 1234,
            dst_port: 53,
            src_mac: [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01],
            dst_mac: [0x11, 0x22, 0x33, 0x44, 0x55, 0x66],
            eth_proto: 0x0800,
            ip_proto: 17,
            pkt_size: 64,
        };
        let event = to_packet_event(raw);
        assert_eq!(event.src_ip, "10.0.0.5");
        assert_eq!(event.dst_ip, "8.8.8.8");
        assert_eq!(event.eth_type, EtherType::IPV4);
    }

    #[test]
    fn test_to_packet_event_picks_ipv6_fields_for_ipv6_ethertype() {
        let mut src_ipv6 = [0u8; 16];
        src_ipv6[15] = 1;
        let raw = RawPacket {
            src_ip: [0; 4],
            dst_ip: [0; 4],
            src_ipv6,
            dst_ipv6: [0; 16],
            src_port: 1234,
            dst_port: 443,
            src_mac: [0; 6],
            dst_mac: [0; 6],
            eth_proto: 0x86DD,
            ip_proto: 6,
            pkt_size: 40,
        };
        let event = to_packet_event(raw);
        assert_eq!(event.src_ip, "::1");
    }

    #[test]
    fn test_to_drop_event_discriminates_by_ip_version() {
        let mac_drop = to_drop_event(RawDrop {
            mac: [1, 2, 3, 4, 5, 6],
            ip: [0; 16],
            ip_version: 0,
        });
        assert_eq!(mac_drop.kind, DropKind::Mac);
        assert_eq!(mac_drop.key, "01:02:03:04:05:06");

        let mut ipv4 = [0u8; 16];
        ipv4[0..4].copy_from_slice(&[192, 168, 1, 1]);
        let ipv4_drop = to_drop_event(RawDrop {
            mac: [0; 6],
            ip: ipv4,
            ip_version: 1,
        });
        assert_eq!(ipv4_drop.kind, DropKind::Ipv4);
        assert_eq!(ipv4_drop.key, "192.168.1.1");
    }
}
