//! HistoryActor - samples the metric source into a bounded ring buffer
//!
//! The buffer holds at most [`MAX_HISTORY`] snapshots; when full, the oldest
//! entry is evicted first. Queries answer over a trailing time window.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, instrument, trace, warn};

use crate::MetricSnapshot;
use crate::monitors::system::MetricSource;

use super::messages::{AggregatedMetrics, HistoryCommand};

/// Maximum snapshots kept in the ring buffer.
const MAX_HISTORY: usize = 1000;

/// Actor that collects and serves historical metrics.
pub struct HistoryActor {
    /// Ring buffer, oldest entries in front.
    buffer: VecDeque<MetricSnapshot>,

    /// Snapshot source shared with the alert monitor.
    source: Arc<dyn MetricSource>,

    /// Command receiver for control messages.
    command_rx: mpsc::Receiver<HistoryCommand>,

    /// Time between samples.
    interval_duration: Duration,
}

impl HistoryActor {
    pub fn new(
        source: Arc<dyn MetricSource>,
        command_rx: mpsc::Receiver<HistoryCommand>,
        interval_duration: Duration,
    ) -> Self {
        Self {
            buffer: VecDeque::with_capacity(MAX_HISTORY),
            source,
            command_rx,
            interval_duration,
        }
    }

    /// Run the actor's main loop until shutdown.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting metrics history actor");

        // First tick lands one full interval after spawn; an overrunning
        // cycle delays the next tick instead of bursting catch-up cycles.
        let mut ticker = interval_at(
            Instant::now() + self.interval_duration,
            self.interval_duration,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sample().await {
                        error!("metrics sampling failed: {:#}", e);
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        HistoryCommand::GetMetrics { hours, respond_to } => {
                            let _ = respond_to.send(self.window(hours));
                        }

                        HistoryCommand::GetAggregated { hours, respond_to } => {
                            let _ = respond_to.send(self.aggregate(hours));
                        }

                        HistoryCommand::SampleNow { respond_to } => {
                            debug!("received SampleNow command");
                            let result = self.sample().await;
                            let _ = respond_to.send(result);
                        }

                        HistoryCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("metrics history actor stopped");
    }

    /// Take one snapshot and append it, evicting the oldest entry when full.
    async fn sample(&mut self) -> Result<()> {
        let snapshot = self
            .source
            .snapshot()
            .await
            .context("failed to take metric snapshot")?;

        trace!("sampled metrics: cpu {:.1}%", snapshot.cpu_percent);

        self.buffer.push_back(snapshot);
        while self.buffer.len() > MAX_HISTORY {
            self.buffer.pop_front();
        }

        Ok(())
    }

    /// Samples within the trailing `hours` window, oldest first.
    fn window(&self, hours: i64) -> Vec<MetricSnapshot> {
        let cutoff = Utc::now() - chrono::Duration::hours(hours);
        self.buffer
            .iter()
            .filter(|m| m.timestamp > cutoff)
            .cloned()
            .collect()
    }

    /// Aggregated statistics over the trailing `hours` window.
    fn aggregate(&self, hours: i64) -> AggregatedMetrics {
        let window = self.window(hours);

        if window.is_empty() {
            return AggregatedMetrics {
                time_range_hours: hours,
                ..Default::default()
            };
        }

        let count = window.len() as f64;
        let mut cpu_sum = 0.0;
        let mut cpu_max = f64::MIN;
        let mut ram_sum = 0.0;
        let mut ram_max = f64::MIN;
        let mut disk_sum = 0.0;

        for snapshot in &window {
            cpu_sum += snapshot.cpu_percent;
            cpu_max = cpu_max.max(snapshot.cpu_percent);
            ram_sum += snapshot.ram_percent;
            ram_max = ram_max.max(snapshot.ram_percent);
            disk_sum += snapshot.disk_percent;
        }

        AggregatedMetrics {
            cpu_avg: cpu_sum / count,
            cpu_max,
            ram_avg: ram_sum / count,
            ram_max,
            disk_avg: disk_sum / count,
            data_points: window.len(),
            time_range_hours: hours,
        }
    }
}

/// Handle for controlling a [`HistoryActor`].
#[derive(Clone)]
pub struct HistoryHandle {
    sender: mpsc::Sender<HistoryCommand>,
}

impl HistoryHandle {
    /// Spawn a new history actor and return its handle.
    pub fn spawn(source: Arc<dyn MetricSource>, interval_duration: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = HistoryActor::new(source, cmd_rx, interval_duration);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Samples within the trailing `hours` window, oldest first.
    pub async fn get_metrics(&self, hours: i64) -> Result<Vec<MetricSnapshot>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HistoryCommand::GetMetrics {
                hours,
                respond_to: tx,
            })
            .await
            .context("failed to send GetMetrics command")?;

        rx.await.context("failed to receive response")
    }

    /// Aggregated statistics over the trailing `hours` window.
    pub async fn get_aggregated(&self, hours: i64) -> Result<AggregatedMetrics> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HistoryCommand::GetAggregated {
                hours,
                respond_to: tx,
            })
            .await
            .context("failed to send GetAggregated command")?;

        rx.await.context("failed to receive response")
    }

    /// Take one sample immediately.
    pub async fn sample_now(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HistoryCommand::SampleNow { respond_to: tx })
            .await
            .context("failed to send SampleNow command")?;

        rx.await.context("failed to receive response")?
    }

    /// Gracefully shut down the sampler.
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(HistoryCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration};
    use std::sync::Mutex;

    /// Source replaying snapshots from a prepared queue.
    struct QueueSource {
        snapshots: Mutex<VecDeque<MetricSnapshot>>,
    }

    impl QueueSource {
        fn new(snapshots: Vec<MetricSnapshot>) -> Self {
            Self {
                snapshots: Mutex::new(snapshots.into()),
            }
        }
    }

    #[async_trait]
    impl MetricSource for QueueSource {
        async fn snapshot(&self) -> anyhow::Result<MetricSnapshot> {
            self.snapshots
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("no snapshot scripted"))
        }
    }

    fn snapshot_at(timestamp: DateTime<Utc>, cpu: f64) -> MetricSnapshot {
        MetricSnapshot {
            timestamp,
            cpu_percent: cpu,
            ram_percent: 50.0,
            ram_used: 8 << 30,
            ram_total: 16 << 30,
            disk_percent: 60.0,
            disk_used: 600 << 30,
            disk_total: 1000 << 30,
        }
    }

    fn spawn_with(snapshots: Vec<MetricSnapshot>) -> HistoryHandle {
        HistoryHandle::spawn(
            Arc::new(QueueSource::new(snapshots)),
            // Long interval so only SampleNow drives sampling.
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn no_sample_is_taken_before_the_first_interval() {
        let handle = spawn_with(vec![snapshot_at(Utc::now(), 10.0)]);

        // The scripted snapshot must still be queued after spawn.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.get_metrics(24).await.unwrap().is_empty());

        handle.sample_now().await.unwrap();
        assert_eq!(handle.get_metrics(24).await.unwrap().len(), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn window_filters_to_trailing_hours() {
        let now = Utc::now();
        let handle = spawn_with(vec![
            snapshot_at(now - ChronoDuration::hours(3), 10.0),
            snapshot_at(now - ChronoDuration::minutes(30), 20.0),
            snapshot_at(now, 30.0),
        ]);

        for _ in 0..3 {
            handle.sample_now().await.unwrap();
        }

        let last_hour = handle.get_metrics(1).await.unwrap();
        assert_eq!(last_hour.len(), 2);
        assert_eq!(last_hour[0].cpu_percent, 20.0);
        assert_eq!(last_hour[1].cpu_percent, 30.0);

        let last_day = handle.get_metrics(24).await.unwrap();
        assert_eq!(last_day.len(), 3);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn aggregation_over_empty_window_is_all_zero() {
        let handle = spawn_with(vec![]);

        let agg = handle.get_aggregated(24).await.unwrap();
        assert_eq!(agg.data_points, 0);
        assert_eq!(agg.cpu_avg, 0.0);
        assert_eq!(agg.cpu_max, 0.0);
        assert_eq!(agg.ram_avg, 0.0);
        assert_eq!(agg.ram_max, 0.0);
        assert_eq!(agg.disk_avg, 0.0);
        assert_eq!(agg.time_range_hours, 24);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn aggregation_computes_averages_and_maxima() {
        let now = Utc::now();
        let mut first = snapshot_at(now - ChronoDuration::minutes(10), 10.0);
        first.ram_percent = 40.0;
        first.disk_percent = 70.0;
        let mut second = snapshot_at(now, 30.0);
        second.ram_percent = 60.0;
        second.disk_percent = 80.0;

        let handle = spawn_with(vec![first, second]);
        handle.sample_now().await.unwrap();
        handle.sample_now().await.unwrap();

        let agg = handle.get_aggregated(1).await.unwrap();
        assert_eq!(agg.data_points, 2);
        assert_eq!(agg.cpu_avg, 20.0);
        assert_eq!(agg.cpu_max, 30.0);
        assert_eq!(agg.ram_avg, 50.0);
        assert_eq!(agg.ram_max, 60.0);
        assert_eq!(agg.disk_avg, 75.0);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn buffer_never_exceeds_capacity() {
        let now = Utc::now();
        let snapshots: Vec<_> = (0..1010)
            .map(|i| snapshot_at(now, f64::from(i % 100)))
            .collect();

        let handle = spawn_with(snapshots);
        for _ in 0..1010 {
            handle.sample_now().await.unwrap();
        }

        let all = handle.get_metrics(24).await.unwrap();
        assert_eq!(all.len(), 1000);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn sampling_error_is_surfaced_but_not_fatal() {
        let now = Utc::now();
        // One scripted snapshot; the second sample has nothing left and fails.
        let handle = spawn_with(vec![snapshot_at(now, 10.0)]);

        handle.sample_now().await.unwrap();
        assert!(handle.sample_now().await.is_err());

        // The actor keeps serving queries afterwards.
        let all = handle.get_metrics(24).await.unwrap();
        assert_eq!(all.len(), 1);

        handle.shutdown().await.unwrap();
    }
}
