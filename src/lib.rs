pub mod actors;
pub mod backup;
pub mod config;
pub mod monitors;
pub mod notify;
pub mod rules;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rules::MetricKey;

/// A single point-in-time reading of system metrics.
///
/// Snapshots are produced by a [`monitors::system::MetricSource`] and consumed
/// by the alert monitor (one per evaluation cycle) and the history buffer
/// (one per sampling interval).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub ram_percent: f64,
    pub ram_used: u64,
    pub ram_total: u64,
    pub disk_percent: f64,
    pub disk_used: u64,
    pub disk_total: u64,
}

impl MetricSnapshot {
    /// Select the percentage value an alert rule watches.
    pub fn value_for(&self, metric: MetricKey) -> f64 {
        match metric {
            MetricKey::Cpu => self.cpu_percent,
            MetricKey::Ram => self.ram_percent,
            MetricKey::Disk => self.disk_percent,
        }
    }
}
