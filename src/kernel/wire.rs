//! Byte-for-byte decoding of the two kernel ring-buffer record layouts.
//!
//! Both layouts are little-endian on the wire, with the exception of the
//! port fields, which the XDP program writes in network (big-endian) byte
//! order — the same split the struct comments in the kernel ABI call out.

const PACKET_RECORD_LEN: usize = 64;
const DROP_RECORD_LEN: usize = 24;

/// Decoded `PacketInfo` record from the packet-event ring.
#[derive(Debug, Clone)]
pub struct RawPacket {
    pub src_ip: [u8; 4],
    pub dst_ip: [u8; 4],
    pub src_ipv6: [u8; 16],
    pub dst_ipv6: [u8; 16],
    pub src_port: u16,
    pub dst_port: u16,
    pub src_mac: [u8; 6],
    pub dst_mac: [u8; 6],
    pub eth_proto: u16,
    pub ip_proto: u16,
    pub pkt_size: u32,
}

/// Decoded `BlackEvent` (drop) record from the drop-event ring.
#[derive(Debug, Clone)]
pub struct RawDrop {
    pub mac: [u8; 6],
    pub ip: [u8; 16],
    pub ip_version: u16,
}

/// Decodes a raw ring-buffer item into a [`RawPacket`]. Returns `None` on a
/// short or malformed record — the caller counts and drops these, per the
/// ingest loop's error handling.
pub fn decode_packet(buf: &[u8]) -> Option<RawPacket> {
    if buf.len() < PACKET_RECORD_LEN {
        return None;
    }
    let mut src_ip = [0u8; 4];
    src_ip.copy_from_slice(&buf[0..4]);
    let mut dst_ip = [0u8; 4];
    dst_ip.copy_from_slice(&buf[4..8]);
    let mut src_ipv6 = [0u8; 16];
    src_ipv6.copy_from_slice(&buf[8..24]);
    let mut dst_ipv6 = [0u8; 16];
    dst_ipv6.copy_from_slice(&buf[24..40]);
    let src_port = u16::from_be_bytes([buf[40], buf[41]]);
    let dst_port = u16::from_be_bytes([buf[42], buf[43]]);
    let mut src_mac = [0u8; 6];
    src_mac.copy_from_slice(&buf[44..50]);
    let mut dst_mac = [0u8; 6];
    dst_mac.copy_from_slice(&buf[50..56]);
    let eth_proto = u16::from_le_bytes([buf[56], buf[57]]);
    let ip_proto = u16::from_le_bytes([buf[58], buf[59]]);
    let pkt_size = u32::from_le_bytes([buf[60], buf[61], buf[62], buf[63]]);

    Some(RawPacket {
        src_ip,
        dst_ip,
        src_ipv6,
        dst_ipv6,
        src_port,
        dst_port,
        src_mac,
        dst_mac,
        eth_proto,
        ip_proto,
        pkt_size,
    })
}

/// Decodes a raw ring-buffer item into a [`RawDrop`].
pub fn decode_drop(buf: &[u8]) -> Option<RawDrop> {
    if buf.len() < DROP_RECORD_LEN {
        return None;
    }
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&buf[0..6]);
    let mut ip = [0u8; 16];
    ip.copy_from_slice(&buf[6..22]);
    let ip_version = u16::from_le_bytes([buf[22], buf[23]]);
    Some(RawDrop { mac, ip, ip_version })
}
