//! Metric snapshot source
//!
//! `MetricSource` is the seam between this subsystem and whatever produces
//! raw cpu/ram/disk readings. The production implementation reads the local
//! host via sysinfo; tests substitute scripted sources.

use async_trait::async_trait;
use chrono::Utc;
use sysinfo::{Disks, System};

use crate::MetricSnapshot;

/// Yields an instantaneous snapshot of system metrics.
///
/// Implementations must be `Send + Sync` as sources are shared across the
/// alert monitor and the history sampler. `snapshot` may block up to ~1s
/// while averaging a CPU sample.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn snapshot(&self) -> anyhow::Result<MetricSnapshot>;
}

/// Local-host source backed by sysinfo.
///
/// CPU usage needs two refreshes with a pause in between to produce a
/// meaningful average; the whole read runs on the blocking pool.
pub struct SysinfoSource;

#[async_trait]
impl MetricSource for SysinfoSource {
    async fn snapshot(&self) -> anyhow::Result<MetricSnapshot> {
        tokio::task::spawn_blocking(collect)
            .await
            .map_err(|e| anyhow::anyhow!("snapshot task panicked: {e}"))
    }
}

fn collect() -> MetricSnapshot {
    let mut sys = System::new_all();
    sys.refresh_all();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL.max(std::time::Duration::from_secs(1)));
    sys.refresh_all();

    let cpus = sys.cpus();
    let cpu_percent = if cpus.is_empty() {
        0.0
    } else {
        cpus.iter().map(|cpu| cpu.cpu_usage() as f64).sum::<f64>() / cpus.len() as f64
    };

    let ram_total = sys.total_memory();
    let ram_used = sys.used_memory();
    let ram_percent = if ram_total == 0 {
        0.0
    } else {
        ram_used as f64 / ram_total as f64 * 100.0
    };

    let disks = Disks::new_with_refreshed_list();
    let (disk_total, disk_available) = disks
        .iter()
        .fold((0u64, 0u64), |(total, available), disk| {
            (total + disk.total_space(), available + disk.available_space())
        });
    let disk_used = disk_total.saturating_sub(disk_available);
    let disk_percent = if disk_total == 0 {
        0.0
    } else {
        disk_used as f64 / disk_total as f64 * 100.0
    };

    MetricSnapshot {
        timestamp: Utc::now(),
        cpu_percent,
        ram_percent,
        ram_used,
        ram_total,
        disk_percent,
        disk_used,
        disk_total,
    }
}
