//! Owned record types the aggregation engine builds, stores, and serializes.
//!
//! These are deliberately separate from [`crate::rules::MatchInput`]: the
//! matcher only ever needs a borrowed view, while the aggregator needs to
//! own, store, index, and serialize these values long after the ring-buffer
//! item that produced them has been dropped.

use std::collections::HashMap;

use serde::Serialize;

use crate::proto::{EtherType, IpProtocol};
use crate::rules::MatchInput;

/// A single decoded packet, already resolved to string addresses (the
/// ingest loop picks `SrcIP`/`SrcIPv6` based on `eth_type` before this is
/// built) but not yet geo-enriched.
#[derive(Debug, Clone)]
pub struct PacketEvent {
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub src_mac: String,
    pub dst_mac: String,
    pub eth_type: EtherType,
    pub ip_proto: IpProtocol,
    pub pkt_size: u32,
    pub timestamp_ns: i64,
}

/// Which blacklist a dropped packet was matched against, and the key that
/// matched — this is all the kernel tells userspace about a drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropKind {
    Mac,
    Ipv4,
    Ipv6,
}

impl DropKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DropKind::Mac => "mac",
            DropKind::Ipv4 => "ipv4",
            DropKind::Ipv6 => "ipv6",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DropEvent {
    pub kind: DropKind,
    pub key: String,
}

/// A packet after GeoIP enrichment — this is the record stored in the
/// per-rule match ring and serialized back out over `get_match_list`.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedPacket {
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub src_mac: String,
    pub dst_mac: String,
    pub eth_type: String,
    pub eth_type_num: u16,
    pub ip_proto: String,
    pub ip_proto_num: u16,
    pub pkt_size: u32,
    pub timestamp_ns: i64,
    pub country: String,
    pub country_code: String,
    pub city: String,
}

impl EnrichedPacket {
    pub fn new(packet: PacketEvent, country: String, country_code: String, city: String) -> Self {
        EnrichedPacket {
            eth_type: packet.eth_type.name(),
            eth_type_num: packet.eth_type.0,
            ip_proto: packet.ip_proto.name(),
            ip_proto_num: packet.ip_proto.0,
            src_ip: packet.src_ip,
            dst_ip: packet.dst_ip,
            src_port: packet.src_port,
            dst_port: packet.dst_port,
            src_mac: packet.src_mac,
            dst_mac: packet.dst_mac,
            pkt_size: packet.pkt_size,
            timestamp_ns: packet.timestamp_ns,
            country,
            country_code,
            city,
        }
    }

    /// Borrowed view for the rule matcher — kept decoupled so `rules` never
    /// depends on the aggregator's owned representation.
    pub fn as_match_input(&self) -> MatchInput<'_> {
        MatchInput {
            src_ip: &self.src_ip,
            dst_ip: &self.dst_ip,
            src_port: self.src_port,
            dst_port: self.dst_port,
            src_mac: &self.src_mac,
            dst_mac: &self.dst_mac,
            eth_type: EtherType(self.eth_type_num),
            ip_proto: IpProtocol(self.ip_proto_num),
            country_code: &self.country_code,
            city: &self.city,
        }
    }
}

/// Running totals for one bucket (a country, a protocol, a day, ...).
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct Summary {
    pub count: u64,
    pub size: u64,
}

impl Summary {
    pub fn add(&mut self, bytes: u32) {
        self.count += 1;
        self.size += bytes as u64;
    }
}

/// Per-destination traffic seen from one source — the innermost node of the
/// `InputPacket` tree, keyed by `DstMAC-DstIP` in the parent map.
#[derive(Debug, Clone, Serialize)]
pub struct InputTarget {
    pub mac: String,
    pub ip: String,
    pub start_time: i64,
    pub last_time: i64,
    pub summary: Summary,
    pub port: HashMap<u16, Summary>,
    pub eth_type: HashMap<String, Summary>,
    pub ip_proto: HashMap<String, Summary>,
}

impl InputTarget {
    pub fn new(mac: String, ip: String, now: i64) -> Self {
        InputTarget {
            mac,
            ip,
            start_time: now,
            last_time: now,
            summary: Summary::default(),
            port: HashMap::new(),
            eth_type: HashMap::new(),
            ip_proto: HashMap::new(),
        }
    }

    pub fn observe(&mut self, packet: &EnrichedPacket, now: i64) {
        self.last_time = now;
        self.summary.add(packet.pkt_size);
        self.port.entry(packet.dst_port).or_default().add(packet.pkt_size);
        self.eth_type
            .entry(packet.eth_type.clone())
            .or_default()
            .add(packet.pkt_size);
        self.ip_proto
            .entry(packet.ip_proto.clone())
            .or_default()
            .add(packet.pkt_size);
    }
}

/// Traffic seen from one source `SrcMAC-SrcIP`, fanning out to every
/// destination it has talked to. Evicted by `lastTime` when the tree grows
/// past `MaxPacketCount`.
#[derive(Debug, Clone, Serialize)]
pub struct InputPacket {
    pub mac: String,
    pub ip: String,
    pub country: String,
    pub country_code: String,
    pub city: String,
    pub start_time: i64,
    pub last_time: i64,
    pub summary: Summary,
    pub target: HashMap<String, InputTarget>,
}

impl InputPacket {
    pub fn new(packet: &EnrichedPacket, now: i64) -> Self {
        InputPacket {
            mac: packet.src_mac.clone(),
            ip: packet.src_ip.clone(),
            country: packet.country.clone(),
            country_code: packet.country_code.clone(),
            city: packet.city.clone(),
            start_time: now,
            last_time: now,
            summary: Summary::default(),
            target: HashMap::new(),
        }
    }

    pub fn observe(&mut self, packet: &EnrichedPacket, now: i64) {
        self.last_time = now;
        if !packet.src_ip.is_empty() && packet.src_ip != self.ip {
            self.ip = packet.src_ip.clone();
        }
        if !packet.country.is_empty() && packet.country != self.country {
            self.country = packet.country.clone();
        }
        if !packet.country_code.is_empty() && packet.country_code != self.country_code {
            self.country_code = packet.country_code.clone();
        }
        if !packet.city.is_empty() && packet.city != self.city {
            self.city = packet.city.clone();
        }
        self.summary.add(packet.pkt_size);
        let key = format!("{}-{}", packet.dst_mac, packet.dst_ip);
        let target = self
            .target
            .entry(key)
            .or_insert_with(|| InputTarget::new(packet.dst_mac.clone(), packet.dst_ip.clone(), now));
        target.observe(packet, now);
    }
}

/// The full point-in-time state broadcast over `broadcast-summary` and
/// returned from `get_summary`: nine axes — by country, by city, by
/// EtherType name, by IP protocol name, by day, by matched rule name, by
/// dest port, the input-packet tree, and drop counts by blacklist key.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BroadcastSnapshot {
    pub country_summary: HashMap<String, Summary>,
    pub city_summary: HashMap<String, Summary>,
    pub eth_type_summary: HashMap<String, Summary>,
    pub ip_proto_summary: HashMap<String, Summary>,
    pub port_summary: HashMap<u16, Summary>,
    pub day_summary: HashMap<String, Summary>,
    pub match_summary: HashMap<String, Summary>,
    pub input_packets: HashMap<String, InputPacket>,
    pub black_summary: HashMap<String, u64>,
}

/// One entry in the global matched-packet ring: an enriched packet plus the
/// name of the rule it matched, so `get_match_list` can filter across every
/// rule's hits instead of one rule at a time.
#[derive(Debug, Clone, Serialize)]
pub struct MatchRecord {
    pub rule_name: String,
    #[serde(flatten)]
    pub packet: EnrichedPacket,
}

/// Query payload for `get_match_list`: every field is an optional filter,
/// `None`/empty/zero means "don't filter on this". `page`/`page_size` of
/// zero means "return the whole (already-filtered) list".
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchListQuery {
    #[serde(default)]
    pub rule_name: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub src_mac: String,
    #[serde(default)]
    pub src_ip: String,
    #[serde(default)]
    pub dst_mac: String,
    #[serde(default)]
    pub dst_ip: String,
    #[serde(default)]
    pub eth_type: u16,
    #[serde(default)]
    pub ip_proto: u16,
    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub end_time: i64,
    #[serde(default)]
    pub order: String,
    #[serde(default)]
    pub page: usize,
    #[serde(default)]
    pub page_size: usize,
}

impl MatchListQuery {
    fn matches(&self, record: &MatchRecord) -> bool {
        let packet = &record.packet;
        (self.rule_name.is_empty() || self.rule_name == record.rule_name)
            && (self.country.is_empty() || self.country == packet.country)
            && (self.city.is_empty() || self.city == packet.city)
            && (self.src_mac.is_empty() || self.src_mac == packet.src_mac)
            && (self.src_ip.is_empty() || self.src_ip == packet.src_ip)
            && (self.dst_mac.is_empty() || self.dst_mac == packet.dst_mac)
            && (self.dst_ip.is_empty() || self.dst_ip == packet.dst_ip)
            && (self.eth_type == 0 || self.eth_type == packet.eth_type_num)
            && (self.ip_proto == 0 || self.ip_proto == packet.ip_proto_num)
            && (self.start_time == 0 || packet.timestamp_ns >= self.start_time)
            && (self.end_time == 0 || packet.timestamp_ns <= self.end_time)
    }

    /// Filters `records`, sorts ascending by timestamp (descending if
    /// `order == "desc"`), then applies page/page_size — clamping rather
    /// than panicking on an out-of-range page.
    pub fn apply<'a>(&self, records: impl Iterator<Item = &'a MatchRecord>) -> Vec<&'a MatchRecord> {
        let mut filtered: Vec<&MatchRecord> = records.filter(|r| self.matches(r)).collect();
        if self.order == "desc" {
            filtered.sort_by(|a, b| b.packet.timestamp_ns.cmp(&a.packet.timestamp_ns));
        } else {
            filtered.sort_by(|a, b| a.packet.timestamp_ns.cmp(&b.packet.timestamp_ns));
        }

        if self.page == 0 || self.page_size == 0 {
            return filtered;
        }
        let len = filtered.len();
        let start = (self.page - 1).saturating_mul(self.page_size).min(len);
        let end = start.saturating_add(self.page_size).min(len);
        filtered[start..end].to_vec()
    }
}
