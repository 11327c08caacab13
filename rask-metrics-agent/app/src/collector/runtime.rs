//! Process runtime statistics.
//!
//! Heap figures come from the instrumented global allocator, resident and
//! virtual sizes from `sysinfo`. Fields that only make sense for a garbage
//! collected runtime are reported as `0` so the metric set stays stable.

use stats_alloc::{INSTRUMENTED_SYSTEM, StatsAlloc};
use std::alloc::System as SystemAlloc;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

#[global_allocator]
static GLOBAL: &StatsAlloc<SystemAlloc> = &INSTRUMENTED_SYSTEM;

/// Runtime gauge names, in the order they are reported.
pub const RUNTIME_GAUGES: [&str; 27] = [
    "Alloc",
    "BuckHashSys",
    "Frees",
    "GCCPUFraction",
    "GCSys",
    "HeapAlloc",
    "HeapIdle",
    "HeapInuse",
    "HeapObjects",
    "HeapReleased",
    "HeapSys",
    "LastGC",
    "Lookups",
    "MCacheInuse",
    "MCacheSys",
    "MSpanInuse",
    "MSpanSys",
    "Mallocs",
    "NextGC",
    "NumForcedGC",
    "NumGC",
    "OtherSys",
    "PauseTotalNs",
    "StackInuse",
    "StackSys",
    "Sys",
    "TotalAlloc",
];

pub struct RuntimeProbe {
    system: System,
    pid: Option<Pid>,
}

impl RuntimeProbe {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!(error = %e, "cannot resolve own pid, process memory gauges will read 0");
                None
            }
        };
        Self {
            system: System::new(),
            pid,
        }
    }

    /// Resident and virtual size of this process, in bytes.
    fn process_memory(&mut self) -> (u64, u64) {
        let Some(pid) = self.pid else {
            return (0, 0);
        };
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        self.system
            .process(pid)
            .map_or((0, 0), |p| (p.memory(), p.virtual_memory()))
    }

    /// Reads every runtime gauge. The result always carries all of [`RUNTIME_GAUGES`].
    pub fn read(&mut self) -> Vec<(&'static str, f64)> {
        let stats = GLOBAL.stats();
        let (resident, virtual_size) = self.process_memory();

        let live = (stats.bytes_allocated as i128 - stats.bytes_deallocated as i128
            + stats.bytes_reallocated as i128)
            .max(0) as u64;
        let objects = stats.allocations.saturating_sub(stats.deallocations) as u64;
        let heap_sys = resident.max(live);

        RUNTIME_GAUGES
            .iter()
            .map(|&name| {
                let value = match name {
                    "Alloc" | "HeapAlloc" | "HeapInuse" => live,
                    "TotalAlloc" => stats.bytes_allocated as u64,
                    "Mallocs" => stats.allocations as u64,
                    "Frees" => stats.deallocations as u64,
                    "HeapObjects" => objects,
                    "HeapSys" => heap_sys,
                    "HeapIdle" => heap_sys - live,
                    "Sys" => virtual_size,
                    _ => 0,
                };
                (name, value as f64)
            })
            .collect()
    }
}

impl Default for RuntimeProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_every_runtime_gauge() {
        let mut probe = RuntimeProbe::new();
        let values = probe.read();
        assert_eq!(values.len(), RUNTIME_GAUGES.len());
        assert!(values.iter().all(|(_, v)| v.is_finite() && *v >= 0.0));
    }

    #[test]
    fn test_allocations_are_observed() {
        let mut probe = RuntimeProbe::new();
        let before = probe.read();
        let buffer: Vec<u8> = vec![1; 1 << 16];
        std::hint::black_box(&buffer);
        let after = probe.read();
        drop(buffer);

        let total = |values: &[(&str, f64)]| {
            values
                .iter()
                .find(|(name, _)| *name == "TotalAlloc")
                .map(|(_, v)| *v)
                .unwrap()
        };
        assert!(total(&after) >= total(&before) + 65536.0);
    }

    #[test]
    fn test_collector_only_fields_are_zero() {
        let mut probe = RuntimeProbe::new();
        let values = probe.read();
        for name in ["NumGC", "PauseTotalNs", "GCCPUFraction", "LastGC"] {
            let value = values.iter().find(|(n, _)| *n == name).unwrap().1;
            assert_eq!(value, 0.0, "{name}");
        }
    }
}
