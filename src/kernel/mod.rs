//! XDP attach lifecycle and kernel map access.
//!
//! The XDP program and map layout are an external collaborator (their ABI is
//! fixed; see `wire.rs`). This module owns the loaded `aya::Ebpf` instance,
//! attaches it with the offload → driver → generic fallback, and exposes the
//! three blacklist maps and two ring buffers to the rest of the agent.

pub mod wire;

use aya::maps::{HashMap as AyaHashMap, MapData, RingBuf};
use aya::programs::{Xdp, XdpFlags};
use aya::Ebpf;
use tokio::sync::Mutex;

use crate::error::AppError;

/// Which of the three attach modes succeeded; exposed verbatim via `get_link_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Offload,
    Driver,
    Generic,
}

impl LinkType {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkType::Offload => "offload",
            LinkType::Driver => "driver",
            LinkType::Generic => "generic",
        }
    }
}

const PROG_NAME: &str = "xdp_firewall";
const EVENTS_MAP: &str = "EVENTS";
const BLACK_EVENTS_MAP: &str = "BLACK_EVENTS";
const MAC_BLACKLIST_MAP: &str = "MacBlacklist";
const IPV4_BLACKLIST_MAP: &str = "Ipv4Blacklist";
const IPV6_BLACKLIST_MAP: &str = "Ipv6Blacklist";

/// Owns the loaded eBPF object set and the attached XDP link. Maps are taken
/// or borrowed from the inner `Ebpf` under a mutex since `aya`'s map handles
/// borrow it mutably.
pub struct KernelHandle {
    ebpf: Mutex<Ebpf>,
    interface: String,
    link_type: LinkType,
}

impl KernelHandle {
    /// Loads the compiled eBPF object bytes and attaches the XDP program to
    /// `interface`, trying offload mode, then driver mode, then generic mode.
    /// Mirrors the fallback order an XDP-capable firewall needs to run on
    /// both high-end NICs and plain virtual interfaces.
    pub fn attach(interface: &str, program_bytes: &[u8]) -> Result<KernelHandle, AppError> {
        let mut ebpf = Ebpf::load(program_bytes)
            .map_err(|e| AppError::KernelAttach(format!("failed to load eBPF object: {e}")))?;

        let program: &mut Xdp = ebpf
            .program_mut(PROG_NAME)
            .ok_or_else(|| AppError::KernelAttach(format!("program {PROG_NAME} not found")))?
            .try_into()
            .map_err(|e: aya::programs::ProgramError| AppError::KernelAttach(e.to_string()))?;
        program
            .load()
            .map_err(|e| AppError::KernelAttach(format!("failed to load XDP program: {e}")))?;

        let link_type = attach_with_fallback(program, interface)?;
        tracing::info!(interface, mode = link_type.as_str(), "XDP program attached");

        Ok(KernelHandle {
            ebpf: Mutex::new(ebpf),
            interface: interface.to_string(),
            link_type,
        })
    }

    pub fn link_type(&self) -> LinkType {
        self.link_type
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Takes ownership of the packet-event ring buffer. Can only be called once.
    pub async fn take_packet_ring(&self) -> Result<RingBuf<MapData>, AppError> {
        let mut ebpf = self.ebpf.lock().await;
        let map = ebpf
            .take_map(EVENTS_MAP)
            .ok_or_else(|| AppError::KernelAttach(format!("{EVENTS_MAP} map not found")))?;
        RingBuf::try_from(map).map_err(|e| AppError::KernelAttach(e.to_string()))
    }

    /// Takes ownership of the drop-event ring buffer. Can only be called once.
    pub async fn take_drop_ring(&self) -> Result<RingBuf<MapData>, AppError> {
        let mut ebpf = self.ebpf.lock().await;
        let map = ebpf
            .take_map(BLACK_EVENTS_MAP)
            .ok_or_else(|| AppError::KernelAttach(format!("{BLACK_EVENTS_MAP} map not found")))?;
        RingBuf::try_from(map).map_err(|e| AppError::KernelAttach(e.to_string()))
    }

    pub async fn put_mac(&self, key: [u8; 6]) -> Result<(), AppError> {
        self.with_map(MAC_BLACKLIST_MAP, |mut map: AyaHashMap<_, [u8; 6], u8>| {
            map.insert(key, 1u8, 0)
        })
        .await
    }

    pub async fn remove_mac(&self, key: [u8; 6]) -> Result<(), AppError> {
        self.with_map(MAC_BLACKLIST_MAP, |mut map: AyaHashMap<_, [u8; 6], u8>| {
            map.remove(&key)
        })
        .await
    }

    pub async fn put_ipv4(&self, key: u32) -> Result<(), AppError> {
        self.with_map(IPV4_BLACKLIST_MAP, |mut map: AyaHashMap<_, u32, u8>| {
            map.insert(key, 1u8, 0)
        })
        .await
    }

    pub async fn remove_ipv4(&self, key: u32) -> Result<(), AppError> {
        self.with_map(IPV4_BLACKLIST_MAP, |mut map: AyaHashMap<_, u32, u8>| {
            map.remove(&key)
        })
        .await
    }

    pub async fn put_ipv6(&self, key: [u32; 4]) -> Result<(), AppError> {
        self.with_map(IPV6_BLACKLIST_MAP, |mut map: AyaHashMap<_, [u32; 4], u8>| {
            map.insert(key, 1u8, 0)
        })
        .await
    }

    pub async fn remove_ipv6(&self, key: [u32; 4]) -> Result<(), AppError> {
        self.with_map(IPV6_BLACKLIST_MAP, |mut map: AyaHashMap<_, [u32; 4], u8>| {
            map.remove(&key)
        })
        .await
    }

    async fn with_map<K, V, F, E>(&self, name: &str, f: F) -> Result<(), AppError>
    where
        K: aya::Pod,
        V: aya::Pod,
        F: FnOnce(AyaHashMap<&mut MapData, K, V>) -> Result<(), E>,
        E: std::fmt::Display,
    {
        let mut ebpf = self.ebpf.lock().await;
        let map = ebpf
            .map_mut(name)
            .ok_or_else(|| AppError::Sync(format!("{name} map not found")))?;
        let map: AyaHashMap<_, K, V> =
            AyaHashMap::try_from(map).map_err(|e| AppError::Sync(e.to_string()))?;
        f(map).map_err(|e| AppError::Sync(e.to_string()))
    }
}

fn attach_with_fallback(program: &mut Xdp, interface: &str) -> Result<LinkType, AppError> {
    if program.attach(interface, XdpFlags::HW_MODE).is_ok() {
        return Ok(LinkType::Offload);
    }
    if program.attach(interface, XdpFlags::DRV_MODE).is_ok() {
        return Ok(LinkType::Driver);
    }
    match program.attach(interface, XdpFlags::SKB_MODE) {
        Ok(_) => Ok(LinkType::Generic),
        Err(e) => Err(AppError::KernelAttach(format!(
            "failed to attach XDP program on {interface}: {e}"
        ))),
    }
}
