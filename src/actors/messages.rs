//! Message types for actor communication
//!
//! Commands are request/response messages sent to a specific actor via mpsc;
//! queries carry a `respond_to` oneshot sender for the answer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::MetricSnapshot;
use crate::config::{BackupConfig, ChannelConfig, ConfigError};
use crate::rules::{AlertRule, RuleUpdate};

/// Commands understood by the alert monitor actor.
#[derive(Debug)]
pub enum MonitorCommand {
    /// Add a rule to the set.
    AddRule { rule: AlertRule },

    /// Remove a rule by id (no-op if absent).
    RemoveRule { id: String },

    /// Apply a partial update to a rule. Answers false if no rule matches.
    UpdateRule {
        id: String,
        update: RuleUpdate,
        respond_to: oneshot::Sender<bool>,
    },

    /// Atomically replace the active delivery channel set.
    SetChannels { channels: Vec<ChannelConfig> },

    /// Snapshot of all rules, including their `last_triggered` stamps.
    GetRules {
        respond_to: oneshot::Sender<Vec<AlertRule>>,
    },

    /// Run one evaluation cycle immediately (bypasses the interval timer).
    ///
    /// Used for testing and manual refresh operations.
    EvaluateNow {
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },

    /// Gracefully shut down the monitor.
    Shutdown,
}

/// Commands understood by the metrics history actor.
#[derive(Debug)]
pub enum HistoryCommand {
    /// All samples within the trailing `hours` window, oldest first.
    GetMetrics {
        hours: i64,
        respond_to: oneshot::Sender<Vec<MetricSnapshot>>,
    },

    /// Aggregated statistics for the trailing `hours` window.
    GetAggregated {
        hours: i64,
        respond_to: oneshot::Sender<AggregatedMetrics>,
    },

    /// Take one sample immediately (bypasses the interval timer).
    SampleNow {
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },

    /// Gracefully shut down the sampler.
    Shutdown,
}

/// Aggregated statistics over a trailing time window.
///
/// All numeric fields are zero when `data_points == 0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    pub cpu_avg: f64,
    pub cpu_max: f64,
    pub ram_avg: f64,
    pub ram_max: f64,
    pub disk_avg: f64,
    pub data_points: usize,
    pub time_range_hours: i64,
}

/// Commands understood by the backup scheduler actor.
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Register (or replace) a recurring backup schedule.
    ///
    /// The cron expression must have exactly 5 whitespace-separated fields;
    /// anything else answers a [`ConfigError`] and registers nothing.
    AddSchedule {
        id: String,
        cron: String,
        config: BackupConfig,
        respond_to: oneshot::Sender<Result<(), ConfigError>>,
    },

    /// Remove a schedule. Answers false if no schedule matches.
    RemoveSchedule {
        id: String,
        respond_to: oneshot::Sender<bool>,
    },

    /// Stop a schedule from firing without removing it.
    PauseSchedule {
        id: String,
        respond_to: oneshot::Sender<bool>,
    },

    /// Re-enable a paused schedule.
    ResumeSchedule {
        id: String,
        respond_to: oneshot::Sender<bool>,
    },

    /// All schedule records with refreshed next-run times.
    GetSchedules {
        respond_to: oneshot::Sender<Vec<BackupSchedule>>,
    },

    /// Gracefully shut down the scheduler.
    Shutdown,
}

/// A backup schedule record as handed to the collaborator store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSchedule {
    pub id: String,
    pub cron: String,
    pub backup: BackupConfig,
    pub enabled: bool,
    pub next_run: Option<DateTime<Utc>>,
}
