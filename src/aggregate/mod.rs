//! The aggregation engine (T_agg): the single-threaded owner of all summary
//! state. One task, fed by two channels and a ticker; `get_summary` and
//! `get_match_list` read the same state through a shared mutex, which the
//! aggregator itself only holds across the per-event fold.

pub mod geoip;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::sync::{mpsc, Mutex};

use crate::aggregate::geoip::GeoDb;
use crate::aggregate::types::{
    BroadcastSnapshot, DropEvent, EnrichedPacket, InputPacket, MatchListQuery, MatchRecord,
    PacketEvent,
};
use crate::rules::RuleMatcher;

/// Everything the aggregator needs to push to connected clients without
/// depending on the broadcast server's own types — breaks the cyclic
/// dependency between the two: the broadcast server depends on the
/// aggregator for state, and the aggregator needs to push through it.
pub trait Broadcaster: Send + Sync {
    fn broadcast_summary(&self, snapshot: &BroadcastSnapshot);
    fn broadcast_drop(&self, data: &str);
}

/// No-op broadcaster for a server with no connected clients, and for tests.
pub struct NullBroadcaster;

impl Broadcaster for NullBroadcaster {
    fn broadcast_summary(&self, _snapshot: &BroadcastSnapshot) {}
    fn broadcast_drop(&self, _data: &str) {}
}

/// Everything read by `get_summary`/`get_match_list` and written by the
/// aggregator's per-event fold, behind one mutex so a reader never observes
/// the snapshot and the match ring at two different points in time. The
/// input-packet tree lives inside `snapshot` itself — it is one of the nine
/// axes `BroadcastSnapshot` carries, not a side table.
#[derive(Default)]
struct AggregateState {
    snapshot: BroadcastSnapshot,
    match_packets: HashMap<String, std::collections::VecDeque<MatchRecord>>,
}

/// Shared read handle for `get_summary`/`get_match_list`, cloned into the
/// broadcast server.
#[derive(Clone)]
pub struct AggregateView {
    state: Arc<Mutex<AggregateState>>,
}

impl AggregateView {
    pub async fn get_summary(&self) -> BroadcastSnapshot {
        self.state.lock().await.snapshot.clone()
    }

    pub async fn get_match_list(&self, query: &MatchListQuery) -> Vec<MatchRecord> {
        let state = self.state.lock().await;
        query
            .apply(state.match_packets.values().flatten())
            .into_iter()
            .cloned()
            .collect()
    }
}

/// Owns the event-handling logic; mutates `state` under its mutex only for
/// the duration of one event's fold, never across an `.await` on a channel.
pub struct Aggregator {
    geo: GeoDb,
    matcher: Arc<RuleMatcher>,
    max_packet_count: usize,
    broadcaster: Arc<dyn Broadcaster>,
    state: Arc<Mutex<AggregateState>>,
}

impl Aggregator {
    pub fn new(
        geo: GeoDb,
        matcher: Arc<RuleMatcher>,
        max_packet_count: usize,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> (Aggregator, AggregateView) {
        let state = Arc::new(Mutex::new(AggregateState::default()));
        (
            Aggregator {
                geo,
                matcher,
                max_packet_count,
                broadcaster,
                state: state.clone(),
            },
            AggregateView { state },
        )
    }

    /// Runs until the packet channel closes (process shutdown or a fatal
    /// ring failure upstream). `summary_interval` gates the periodic
    /// `broadcast-summary` push; it does not gate any other work. The drop
    /// channel closing is not fatal to this loop — drop telemetry is
    /// best-effort.
    pub async fn run(
        self,
        mut packet_rx: mpsc::Receiver<PacketEvent>,
        mut drop_rx: mpsc::Receiver<DropEvent>,
        summary_interval: Duration,
    ) {
        let mut ticker = tokio::time::interval(summary_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_packet = packet_rx.recv() => {
                    match maybe_packet {
                        Some(packet) => self.handle_packet(packet).await,
                        None => {
                            tracing::warn!("packet channel closed, aggregator stopping");
                            break;
                        }
                    }
                }
                maybe_drop = drop_rx.recv() => {
                    match maybe_drop {
                        Some(event) => self.handle_drop(event).await,
                        None => {
                            tracing::debug!("drop channel closed");
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.publish_summary().await;
                }
            }
        }
    }

    async fn handle_packet(&self, packet: PacketEvent) {
        let info = self.geo.lookup(&packet.src_ip);
        let enriched = EnrichedPacket::new(packet, info.country, info.country_code, info.city);
        let rule_name = self.matcher.match_packet(enriched.as_match_input()).await;

        let mut state = self.state.lock().await;
        fold_into_snapshot(&mut state.snapshot, &enriched);
        update_input_tree(
            &mut state.snapshot.input_packets,
            &enriched,
            self.max_packet_count,
        );
        if let Some(rule_name) = rule_name {
            state
                .snapshot
                .match_summary
                .entry(rule_name.clone())
                .or_default()
                .add(enriched.pkt_size);
            push_match(&mut state.match_packets, rule_name, enriched, self.max_packet_count);
        }
    }

    async fn handle_drop(&self, event: DropEvent) {
        {
            let mut state = self.state.lock().await;
            *state
                .snapshot
                .black_summary
                .entry(event.kind.as_str().to_string())
                .or_insert(0) += 1;
        }
        self.broadcaster.broadcast_drop(&event.key);
    }

    /// Publishes a `broadcast-summary` push, but only if at least one
    /// source has been observed — an idle tick with an empty input tree
    /// broadcasts nothing, per the aggregation tick's publish condition.
    async fn publish_summary(&self) {
        let state = self.state.lock().await;
        if state.snapshot.input_packets.is_empty() {
            return;
        }
        let snap = state.snapshot.clone();
        drop(state);
        self.broadcaster.broadcast_summary(&snap);
    }
}

fn fold_into_snapshot(snap: &mut BroadcastSnapshot, enriched: &EnrichedPacket) {
    snap.country_summary
        .entry(enriched.country.clone())
        .or_default()
        .add(enriched.pkt_size);
    snap.city_summary
        .entry(enriched.city.clone())
        .or_default()
        .add(enriched.pkt_size);
    snap.eth_type_summary
        .entry(enriched.eth_type.clone())
        .or_default()
        .add(enriched.pkt_size);
    snap.ip_proto_summary
        .entry(enriched.ip_proto.clone())
        .or_default()
        .add(enriched.pkt_size);
    if enriched.dst_port != 0 {
        snap.port_summary
            .entry(enriched.dst_port)
            .or_default()
            .add(enriched.pkt_size);
    }
    let day = day_bucket(enriched.timestamp_ns);
    snap.day_summary.entry(day).or_default().add(enriched.pkt_size);
}

fn update_input_tree(
    input_packets: &mut HashMap<String, InputPacket>,
    packet: &EnrichedPacket,
    max_packet_count: usize,
) {
    let now = packet.timestamp_ns / 1_000_000_000;
    let key = format!("{}-{}", packet.src_mac, packet.src_ip);
    match input_packets.get_mut(&key) {
        Some(existing) => existing.observe(packet, now),
        None => {
            let mut fresh = InputPacket::new(packet, now);
            fresh.observe(packet, now);
            input_packets.insert(key, fresh);
        }
    }
    evict_oldest_if_over_capacity(input_packets, max_packet_count);
}

/// Evicts the entry with the smallest `last_time` (the largest `now -
/// lastSeen` gap) once the tree exceeds `max_packet_count`. Ties are broken
/// by hash-map iteration order, which is not spelled out as deterministic.
fn evict_oldest_if_over_capacity(
    input_packets: &mut HashMap<String, InputPacket>,
    max_packet_count: usize,
) {
    if input_packets.len() <= max_packet_count {
        return;
    }
    if let Some(stale_key) = input_packets
        .iter()
        .min_by_key(|(_, v)| v.last_time)
        .map(|(k, _)| k.clone())
    {
        input_packets.remove(&stale_key);
    }
}

/// Appends to this rule's matched-packet ring, capped at
/// `max_packet_count - 1` so no single rule grows unbounded — a noisy rule
/// evicts only its own history, never another rule's.
fn push_match(
    match_packets: &mut HashMap<String, std::collections::VecDeque<MatchRecord>>,
    rule_name: String,
    packet: EnrichedPacket,
    max_packet_count: usize,
) {
    let cap = max_packet_count.saturating_sub(1).max(1);
    let ring = match_packets.entry(rule_name.clone()).or_default();
    ring.push_back(MatchRecord { rule_name, packet });
    while ring.len() > cap {
        ring.pop_front();
    }
}

/// UTC calendar date of a packet timestamp, formatted `YYYY-MM-DD`.
fn day_bucket(timestamp_ns: i64) -> String {
    let secs = timestamp_ns / 1_000_000_000;
    match Utc.timestamp_opt(secs, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d").to_string(),
        None => "1970-01-01".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Rule;
    use crate::proto::{EtherType, IpProtocol};

    fn sample_packet(n: i64) -> PacketEvent {
        PacketEvent {
            src_ip: "10.0.0.1".into(),
            dst_ip: "8.8.8.8".into(),
            src_port: 5000,
            dst_port: 443,
            src_mac: "aa:bb:cc:dd:ee:01".into(),
            dst_mac: "11:22:33:44:55:66".into(),
            eth_type: EtherType(0x0800),
            ip_proto: IpProtocol(6),
            pkt_size: 100,
            timestamp_ns: n,
        }
    }

    fn catch_all_matcher() -> Arc<RuleMatcher> {
        Arc::new(RuleMatcher::new(&[Rule {
            rule_name: "all-tcp".into(),
            ip_protocol: vec!["tcp".into()],
            ..Default::default()
        }]))
    }

    #[tokio::test]
    async fn test_handle_packet_updates_summaries_and_match_ring() {
        let (agg, view) = Aggregator::new(GeoDb::open(""), catch_all_matcher(), 100, Arc::new(NullBroadcaster));
        agg.handle_packet(sample_packet(1)).await;
        agg.handle_packet(sample_packet(2)).await;

        let summary = view.get_summary().await;
        assert_eq!(summary.ip_proto_summary.get("TCP").unwrap().count, 2);
        assert_eq!(summary.match_summary.get("all-tcp").unwrap().count, 2);
        assert_eq!(summary.port_summary.get(&443).unwrap().count, 2);

        let matches = view.get_match_list(&MatchListQuery::default()).await;
        assert_eq!(matches.len(), 2);
    }

    #[tokio::test]
    async fn test_get_summary_includes_input_packet_tree() {
        let (agg, view) = Aggregator::new(GeoDb::open(""), catch_all_matcher(), 100, Arc::new(NullBroadcaster));
        agg.handle_packet(sample_packet(1)).await;

        let summary = view.get_summary().await;
        assert_eq!(summary.input_packets.len(), 1);
        let entry = summary
            .input_packets
            .get("aa:bb:cc:dd:ee:01-10.0.0.1")
            .unwrap();
        assert_eq!(entry.target.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_dst_port_is_excluded_from_port_summary() {
        let (agg, view) = Aggregator::new(GeoDb::open(""), catch_all_matcher(), 100, Arc::new(NullBroadcaster));
        let mut packet = sample_packet(1);
        packet.dst_port = 0;
        agg.handle_packet(packet).await;

        let summary = view.get_summary().await;
        assert!(summary.port_summary.is_empty());
    }

    #[test]
    fn test_day_bucket_formats_iso_date() {
        // 2021-01-01T00:00:00Z
        assert_eq!(day_bucket(1_609_459_200_000_000_000), "2021-01-01");
    }

    #[tokio::test]
    async fn test_publish_summary_skips_broadcast_when_no_input_packets() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingBroadcaster(AtomicUsize);
        impl Broadcaster for CountingBroadcaster {
            fn broadcast_summary(&self, _snapshot: &BroadcastSnapshot) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
            fn broadcast_drop(&self, _data: &str) {}
        }

        let counter = Arc::new(CountingBroadcaster(AtomicUsize::new(0)));
        let (agg, _view) =
            Aggregator::new(GeoDb::open(""), catch_all_matcher(), 100, counter.clone());
        agg.publish_summary().await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);

        agg.handle_packet(sample_packet(1)).await;
        agg.publish_summary().await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_match_list_clamps_out_of_range_pagination() {
        let (agg, view) = Aggregator::new(GeoDb::open(""), catch_all_matcher(), 100, Arc::new(NullBroadcaster));
        agg.handle_packet(sample_packet(1)).await;

        let out_of_range = MatchListQuery {
            page: 50,
            page_size: 10,
            ..Default::default()
        };
        assert_eq!(view.get_match_list(&out_of_range).await.len(), 0);

        let whole_list = MatchListQuery {
            page: 1,
            page_size: 1000,
            ..Default::default()
        };
        assert_eq!(view.get_match_list(&whole_list).await.len(), 1);

        let wrong_rule = MatchListQuery {
            rule_name: "nonexistent".into(),
            ..Default::default()
        };
        assert_eq!(view.get_match_list(&wrong_rule).await.len(), 0);
    }

    #[tokio::test]
    async fn test_match_ring_capped_at_max_packet_count_minus_one() {
        let (agg, view) = Aggregator::new(GeoDb::open(""), catch_all_matcher(), 3, Arc::new(NullBroadcaster));
        for i in 0..5 {
            agg.handle_packet(sample_packet(i)).await;
        }
        assert_eq!(view.get_match_list(&MatchListQuery::default()).await.len(), 2);
    }

    #[tokio::test]
    async fn test_noisy_rule_ring_does_not_evict_quiet_rule_matches() {
        let matcher = Arc::new(RuleMatcher::new(&[
            Rule {
                rule_name: "noisy".into(),
                port: vec!["443".into()],
                ..Default::default()
            },
            Rule {
                rule_name: "quiet".into(),
                port: vec!["8080".into()],
                ..Default::default()
            },
        ]));
        let (agg, view) = Aggregator::new(GeoDb::open(""), matcher, 3, Arc::new(NullBroadcaster));

        let mut quiet = sample_packet(0);
        quiet.dst_port = 8080;
        agg.handle_packet(quiet).await;

        for i in 1..6 {
            agg.handle_packet(sample_packet(i)).await;
        }

        let quiet_hits = view
            .get_match_list(&MatchListQuery {
                rule_name: "quiet".into(),
                ..Default::default()
            })
            .await;
        assert_eq!(quiet_hits.len(), 1, "a noisy rule's ring must not evict another rule's matches");

        let noisy_hits = view
            .get_match_list(&MatchListQuery {
                rule_name: "noisy".into(),
                ..Default::default()
            })
            .await;
        assert_eq!(noisy_hits.len(), 2);
    }

    #[tokio::test]
    async fn test_input_tree_evicts_oldest_last_seen_over_capacity() {
        let (agg, view) = Aggregator::new(GeoDb::open(""), catch_all_matcher(), 1, Arc::new(NullBroadcaster));
        let mut first = sample_packet(1);
        first.src_mac = "aa:aa:aa:aa:aa:01".into();
        let mut second = sample_packet(2);
        second.src_mac = "bb:bb:bb:bb:bb:02".into();

        agg.handle_packet(first).await;
        agg.handle_packet(second).await;

        let state = agg.state.lock().await;
        assert_eq!(state.snapshot.input_packets.len(), 1);
        assert!(state.snapshot.input_packets.contains_key("bb:bb:bb:bb:bb:02-10.0.0.1"));
        let _ = view;
    }
}
