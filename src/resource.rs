//! Host resource snapshot for `get_system_resource_usage` — a thin,
//! uncached pass-through over `sysinfo`, refreshed on every call.

use serde::Serialize;
use sysinfo::System;

#[derive(Debug, Clone, Serialize)]
pub struct CpuUsage {
    pub core: usize,
    pub usage_percent: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceSnapshot {
    pub hostname: String,
    pub uptime_secs: u64,
    pub total_memory_bytes: u64,
    pub used_memory_bytes: u64,
    pub cpus: Vec<CpuUsage>,
    pub load_average_one: f64,
}

/// Takes a fresh snapshot of host CPU/memory/uptime. No retention, no
/// history — every call re-reads the underlying counters.
pub fn snapshot() -> ResourceSnapshot {
    let mut system = System::new();
    system.refresh_cpu_usage();
    system.refresh_memory();

    let cpus = system
        .cpus()
        .iter()
        .enumerate()
        .map(|(i, cpu)| CpuUsage {
            core: i,
            usage_percent: cpu.cpu_usage(),
        })
        .collect();

    ResourceSnapshot {
        hostname: System::host_name().unwrap_or_else(|| "unknown".into()),
        uptime_secs: System::uptime(),
        total_memory_bytes: system.total_memory(),
        used_memory_bytes: system.used_memory(),
        cpus,
        load_average_one: System::load_average().one,
    }
}
