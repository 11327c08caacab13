use rask_metrics_core::Metric;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

/// Host-level gauges: `TotalMemory`, `FreeMemory` and one
/// `CPUutilization{n}` per logical CPU (numbered from 1).
///
/// A probe that yields nothing usable is left out of the result instead of
/// failing the whole poll.
pub struct SystemProbe {
    system: System,
}

impl SystemProbe {
    pub fn new() -> Self {
        let mut system = System::new_with_specifics(
            RefreshKind::nothing()
                .with_memory(MemoryRefreshKind::nothing().with_ram())
                .with_cpu(CpuRefreshKind::nothing().with_cpu_usage()),
        );
        // CPU usage is a delta between two refreshes; prime the first one.
        system.refresh_cpu_usage();
        Self { system }
    }

    pub fn poll(&mut self) -> Vec<Metric> {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();

        let mut metrics = Vec::with_capacity(2 + self.system.cpus().len());

        let total = self.system.total_memory();
        if total > 0 {
            metrics.push(Metric::gauge("TotalMemory", total as f64));
            metrics.push(Metric::gauge(
                "FreeMemory",
                self.system.free_memory() as f64,
            ));
        } else {
            tracing::debug!("memory probe returned no data, skipping memory gauges");
        }

        for (i, cpu) in self.system.cpus().iter().enumerate() {
            let usage = f64::from(cpu.cpu_usage());
            if usage.is_finite() {
                metrics.push(Metric::gauge(format!("CPUutilization{}", i + 1), usage));
            }
        }

        metrics
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}
