//! AlertMonitorActor - evaluates alert rules against fresh metric snapshots
//!
//! The actor exclusively owns the rule collection and the active channel
//! set. The surrounding API mutates both through commands, so a mutation can
//! never corrupt an in-flight evaluation pass.
//!
//! ## Evaluation Cycle
//!
//! ```text
//! Timer tick → snapshot() → should_trigger per rule → stamp last_triggered
//!                                                   → dispatch warning
//! ```
//!
//! A failed cycle is logged and the loop continues; only a Shutdown command
//! (or a closed command channel) stops it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, instrument, trace, warn};

use crate::config::ChannelConfig;
use crate::monitors::system::MetricSource;
use crate::notify::{NotificationDispatcher, NotificationKind};
use crate::rules::{AlertRule, RuleUpdate};

use super::messages::MonitorCommand;

/// Actor that periodically evaluates every rule against one fresh snapshot.
pub struct AlertMonitorActor {
    /// Rule collection (exclusively owned).
    rules: Vec<AlertRule>,

    /// Active delivery channels, replaced atomically via SetChannels.
    channels: Vec<ChannelConfig>,

    /// Snapshot source (may block ~1s per call for CPU averaging).
    source: Arc<dyn MetricSource>,

    /// Shared notification fan-out.
    dispatcher: Arc<NotificationDispatcher>,

    /// Command receiver for control messages.
    command_rx: mpsc::Receiver<MonitorCommand>,

    /// Time between evaluation cycles.
    interval_duration: Duration,
}

impl AlertMonitorActor {
    pub fn new(
        source: Arc<dyn MetricSource>,
        dispatcher: Arc<NotificationDispatcher>,
        command_rx: mpsc::Receiver<MonitorCommand>,
        interval_duration: Duration,
    ) -> Self {
        Self {
            rules: Vec::new(),
            channels: Vec::new(),
            source,
            dispatcher,
            command_rx,
            interval_duration,
        }
    }

    /// Run the actor's main loop until shutdown.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting alert monitor actor");

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
                    if let Err(e) = self.evaluate_cycle().await {
                        error!("alert evaluation cycle failed: {:#}", e);
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        MonitorCommand::AddRule { rule } => {
                            debug!("alert rule added: {}", rule.name);
                            self.rules.push(rule);
                        }

                        MonitorCommand::RemoveRule { id } => {
                            debug!("alert rule removed: {id}");
                            self.rules.retain(|r| r.id != id);
                        }

                        MonitorCommand::UpdateRule { id, update, respond_to } => {
                            let found = match self.rules.iter_mut().find(|r| r.id == id) {
                                Some(rule) => {
                                    update.apply(rule);
                                    debug!("alert rule updated: {id}");
                                    true
                                }
                                None => false,
                            };
                            let _ = respond_to.send(found);
                        }

                        MonitorCommand::SetChannels { channels } => {
                            debug!("notification channels replaced ({} active)", channels.len());
                            self.channels = channels;
                        }

                        MonitorCommand::GetRules { respond_to } => {
                            let _ = respond_to.send(self.rules.clone());
                        }

                        MonitorCommand::EvaluateNow { respond_to } => {
                            debug!("received EvaluateNow command");
                            let result = self.evaluate_cycle().await;
                            let _ = respond_to.send(result);
                        }

                        MonitorCommand::Shutdown => {
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

        debug!("alert monitor actor stopped");
    }

    /// Fetch one snapshot and evaluate every rule against it.
    async fn evaluate_cycle(&mut self) -> Result<()> {
        let snapshot = self
            .source
            .snapshot()
            .await
            .context("failed to take metric snapshot")?;

        let now = Utc::now();

        for rule in &mut self.rules {
            let value = snapshot.value_for(rule.metric);

            if !rule.should_trigger(value, now) {
                trace!("rule {} not triggering (value {value:.1})", rule.id);
                continue;
            }

            // Stamp before dispatch so a slow delivery cannot open a window
            // for a duplicate trigger.
            rule.last_triggered = Some(now);

            let title = format!("Alert: {}", rule.name);
            let message = format!(
                "{} is {value:.1}% (threshold: {:.1}%)",
                rule.metric.label(),
                rule.threshold
            );

            warn!("alert triggered: {} - {message}", rule.name);

            self.dispatcher
                .send(&title, &message, NotificationKind::Warning, &self.channels)
                .await;
        }

        Ok(())
    }
}

/// Handle for controlling an [`AlertMonitorActor`].
#[derive(Clone)]
pub struct MonitorHandle {
    sender: mpsc::Sender<MonitorCommand>,
}

impl MonitorHandle {
    /// Spawn a new monitor actor and return its handle.
    pub fn spawn(
        source: Arc<dyn MetricSource>,
        dispatcher: Arc<NotificationDispatcher>,
        interval_duration: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = AlertMonitorActor::new(source, dispatcher, cmd_rx, interval_duration);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    pub async fn add_rule(&self, rule: AlertRule) -> Result<()> {
        self.sender
            .send(MonitorCommand::AddRule { rule })
            .await
            .context("failed to send AddRule command")
    }

    pub async fn remove_rule(&self, id: impl Into<String>) -> Result<()> {
        self.sender
            .send(MonitorCommand::RemoveRule { id: id.into() })
            .await
            .context("failed to send RemoveRule command")
    }

    /// Apply a partial update. Returns false if no rule has the given id.
    pub async fn update_rule(&self, id: impl Into<String>, update: RuleUpdate) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::UpdateRule {
                id: id.into(),
                update,
                respond_to: tx,
            })
            .await
            .context("failed to send UpdateRule command")?;

        rx.await.context("failed to receive response")
    }

    /// Atomically replace the active channel set.
    pub async fn set_channels(&self, channels: Vec<ChannelConfig>) -> Result<()> {
        self.sender
            .send(MonitorCommand::SetChannels { channels })
            .await
            .context("failed to send SetChannels command")
    }

    pub async fn get_rules(&self) -> Result<Vec<AlertRule>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::GetRules { respond_to: tx })
            .await
            .context("failed to send GetRules command")?;

        rx.await.context("failed to receive response")
    }

    /// Run one evaluation cycle immediately.
    pub async fn evaluate_now(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::EvaluateNow { respond_to: tx })
            .await
            .context("failed to send EvaluateNow command")?;

        rx.await.context("failed to receive response")?
    }

    /// Gracefully shut down the monitor.
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(MonitorCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MetricSnapshot;
    use crate::rules::{Comparison, MetricKey};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Source that replays a fixed cpu reading, adjustable from the test.
    struct ScriptedSource {
        cpu: Mutex<f64>,
    }

    impl ScriptedSource {
        fn new(cpu: f64) -> Self {
            Self { cpu: Mutex::new(cpu) }
        }

        fn set_cpu(&self, cpu: f64) {
            *self.cpu.lock().unwrap() = cpu;
        }
    }

    #[async_trait]
    impl MetricSource for ScriptedSource {
        async fn snapshot(&self) -> anyhow::Result<MetricSnapshot> {
            let cpu = *self.cpu.lock().unwrap();
            Ok(MetricSnapshot {
                timestamp: Utc::now(),
                cpu_percent: cpu,
                ram_percent: 50.0,
                ram_used: 8 << 30,
                ram_total: 16 << 30,
                disk_percent: 60.0,
                disk_used: 600 << 30,
                disk_total: 1000 << 30,
            })
        }
    }

    fn cpu_rule(id: &str, threshold: f64) -> AlertRule {
        AlertRule {
            id: id.to_string(),
            name: format!("High CPU {id}"),
            metric: MetricKey::Cpu,
            threshold,
            comparison: Comparison::Gt,
            enabled: true,
            cooldown: chrono::Duration::minutes(15),
            last_triggered: None,
        }
    }

    fn spawn_monitor(source: Arc<ScriptedSource>) -> (MonitorHandle, Arc<NotificationDispatcher>) {
        let dispatcher = Arc::new(NotificationDispatcher::new());
        let handle = MonitorHandle::spawn(
            source,
            dispatcher.clone(),
            // Long interval so only EvaluateNow drives cycles.
            Duration::from_secs(3600),
        );
        (handle, dispatcher)
    }

    #[tokio::test]
    async fn no_evaluation_happens_before_the_first_interval() {
        let source = Arc::new(ScriptedSource::new(99.0));
        let (handle, dispatcher) = spawn_monitor(source);

        handle.add_rule(cpu_rule("r1", 80.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(dispatcher.get_notifications(10).await.is_empty());

        handle.evaluate_now().await.unwrap();
        assert_eq!(dispatcher.get_notifications(10).await.len(), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn trigger_records_warning_notification() {
        let source = Arc::new(ScriptedSource::new(85.0));
        let (handle, dispatcher) = spawn_monitor(source);

        handle.add_rule(cpu_rule("r1", 80.0)).await.unwrap();
        handle.evaluate_now().await.unwrap();

        let entries = dispatcher.get_notifications(10).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "Alert: High CPU r1");
        assert_eq!(entries[0].message, "CPU is 85.0% (threshold: 80.0%)");
        assert_eq!(entries[0].kind, NotificationKind::Warning);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn cooldown_suppresses_second_trigger() {
        let source = Arc::new(ScriptedSource::new(85.0));
        let (handle, dispatcher) = spawn_monitor(source.clone());

        handle.add_rule(cpu_rule("r1", 80.0)).await.unwrap();
        handle.evaluate_now().await.unwrap();

        // Still above threshold, but inside the cooldown window.
        source.set_cpu(90.0);
        handle.evaluate_now().await.unwrap();

        assert_eq!(dispatcher.get_notifications(10).await.len(), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn rule_fires_again_after_cooldown_elapses() {
        let source = Arc::new(ScriptedSource::new(85.0));
        let (handle, dispatcher) = spawn_monitor(source.clone());

        handle.add_rule(cpu_rule("r1", 80.0)).await.unwrap();
        handle.evaluate_now().await.unwrap();

        // Simulate the cooldown having elapsed by re-adding the rule with a
        // rewound last_triggered stamp.
        let stamped = handle.get_rules().await.unwrap()[0]
            .last_triggered
            .expect("rule should be stamped");
        let rewound = stamped - chrono::Duration::minutes(16);
        handle.remove_rule("r1").await.unwrap();
        let mut rule = cpu_rule("r1", 80.0);
        rule.last_triggered = Some(rewound);
        handle.add_rule(rule).await.unwrap();

        source.set_cpu(90.0);
        handle.evaluate_now().await.unwrap();

        let entries = dispatcher.get_notifications(10).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "CPU is 90.0% (threshold: 80.0%)");

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn rules_on_the_same_metric_cool_down_independently() {
        let source = Arc::new(ScriptedSource::new(85.0));
        let (handle, dispatcher) = spawn_monitor(source.clone());

        // Both above their thresholds at cpu=85.
        handle.add_rule(cpu_rule("low", 50.0)).await.unwrap();
        handle.add_rule(cpu_rule("high", 80.0)).await.unwrap();
        handle.evaluate_now().await.unwrap();

        assert_eq!(dispatcher.get_notifications(10).await.len(), 2);

        // Drop below the high threshold: neither fires ("high" is below
        // threshold, "low" is cooling down).
        source.set_cpu(60.0);
        handle.evaluate_now().await.unwrap();
        assert_eq!(dispatcher.get_notifications(10).await.len(), 2);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn disabled_rule_never_fires() {
        let source = Arc::new(ScriptedSource::new(99.0));
        let (handle, dispatcher) = spawn_monitor(source);

        let mut rule = cpu_rule("r1", 80.0);
        rule.enabled = false;
        handle.add_rule(rule).await.unwrap();
        handle.evaluate_now().await.unwrap();

        assert!(dispatcher.get_notifications(10).await.is_empty());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn update_rule_answers_false_for_unknown_id() {
        let source = Arc::new(ScriptedSource::new(10.0));
        let (handle, _dispatcher) = spawn_monitor(source);

        let updated = handle
            .update_rule("missing", RuleUpdate::default())
            .await
            .unwrap();
        assert!(!updated);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn update_rule_changes_threshold_for_next_cycle() {
        let source = Arc::new(ScriptedSource::new(70.0));
        let (handle, dispatcher) = spawn_monitor(source);

        handle.add_rule(cpu_rule("r1", 80.0)).await.unwrap();
        handle.evaluate_now().await.unwrap();
        assert!(dispatcher.get_notifications(10).await.is_empty());

        let updated = handle
            .update_rule(
                "r1",
                RuleUpdate {
                    threshold: Some(60.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated);

        handle.evaluate_now().await.unwrap();
        assert_eq!(dispatcher.get_notifications(10).await.len(), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_the_actor() {
        let source = Arc::new(ScriptedSource::new(10.0));
        let (handle, _dispatcher) = spawn_monitor(source);

        handle.shutdown().await.unwrap();

        // Commands after shutdown fail because the actor is gone.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.evaluate_now().await.is_err());
    }
}
