//! SchedulerActor - fires cron-driven backup runs
//!
//! The actor exclusively owns the schedule map. Each loop turn it computes
//! the earliest next-run time across enabled schedules and sleeps until it,
//! interleaved with command handling. A due schedule's backup run is spawned
//! as its own task so a slow external utility never blocks the timer; the
//! per-step timeouts in the orchestrator bound how long such a task can live.
//!
//! Automated-run outcomes are reported through the dispatcher with zero
//! external channels: they land in the in-memory log only (low-noise
//! default).

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument, warn};

use crate::backup::{BackupOrchestrator, BackupStatus};
use crate::config::{BackupConfig, ConfigError};
use crate::notify::{NotificationDispatcher, NotificationKind};

use super::messages::{BackupSchedule, SchedulerCommand};

/// One registered schedule with its parsed cron trigger.
struct ScheduleEntry {
    cron: String,
    schedule: Schedule,
    config: BackupConfig,
    enabled: bool,
    next_run: Option<DateTime<Utc>>,
}

/// Actor that owns the backup schedule map.
pub struct SchedulerActor {
    entries: HashMap<String, ScheduleEntry>,
    orchestrator: BackupOrchestrator,
    dispatcher: Arc<NotificationDispatcher>,
    command_rx: mpsc::Receiver<SchedulerCommand>,
}

impl SchedulerActor {
    pub fn new(
        orchestrator: BackupOrchestrator,
        dispatcher: Arc<NotificationDispatcher>,
        command_rx: mpsc::Receiver<SchedulerCommand>,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            orchestrator,
            dispatcher,
            command_rx,
        }
    }

    /// Run the actor's main loop until shutdown.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting backup scheduler actor");

        loop {
            let next_due = self.earliest_next_run();

            tokio::select! {
                _ = sleep_until_due(next_due) => {
                    self.fire_due(Utc::now());
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        SchedulerCommand::AddSchedule { id, cron, config, respond_to } => {
                            let _ = respond_to.send(self.add_schedule(id, cron, config));
                        }

                        SchedulerCommand::RemoveSchedule { id, respond_to } => {
                            let removed = self.entries.remove(&id).is_some();
                            if removed {
                                info!("backup schedule removed: {id}");
                            } else {
                                warn!("failed to remove backup schedule: unknown id {id}");
                            }
                            let _ = respond_to.send(removed);
                        }

                        SchedulerCommand::PauseSchedule { id, respond_to } => {
                            let paused = match self.entries.get_mut(&id) {
                                Some(entry) => {
                                    entry.enabled = false;
                                    entry.next_run = None;
                                    info!("backup schedule paused: {id}");
                                    true
                                }
                                None => {
                                    warn!("failed to pause backup schedule: unknown id {id}");
                                    false
                                }
                            };
                            let _ = respond_to.send(paused);
                        }

                        SchedulerCommand::ResumeSchedule { id, respond_to } => {
                            let resumed = match self.entries.get_mut(&id) {
                                Some(entry) => {
                                    entry.enabled = true;
                                    entry.next_run = entry.schedule.upcoming(Utc).next();
                                    info!("backup schedule resumed: {id}");
                                    true
                                }
                                None => {
                                    warn!("failed to resume backup schedule: unknown id {id}");
                                    false
                                }
                            };
                            let _ = respond_to.send(resumed);
                        }

                        SchedulerCommand::GetSchedules { respond_to } => {
                            let _ = respond_to.send(self.schedule_records());
                        }

                        SchedulerCommand::Shutdown => {
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

        debug!("backup scheduler actor stopped");
    }

    /// Validate and register (or replace) a schedule.
    fn add_schedule(
        &mut self,
        id: String,
        cron: String,
        config: BackupConfig,
    ) -> Result<(), ConfigError> {
        let schedule = parse_cron(&cron)?;
        let next_run = schedule.upcoming(Utc).next();

        info!("backup schedule added: {id} with cron: {cron}");

        // Replace-existing semantics: adding an existing id upserts.
        self.entries.insert(
            id,
            ScheduleEntry {
                cron,
                schedule,
                config,
                enabled: true,
                next_run,
            },
        );

        Ok(())
    }

    /// Earliest next-run time across enabled schedules.
    fn earliest_next_run(&self) -> Option<DateTime<Utc>> {
        self.entries
            .values()
            .filter(|e| e.enabled)
            .filter_map(|e| e.next_run)
            .min()
    }

    /// Spawn a backup run for every schedule due at `now` and advance it.
    fn fire_due(&mut self, now: DateTime<Utc>) {
        for (id, entry) in &mut self.entries {
            if !entry.enabled {
                continue;
            }
            let Some(next_run) = entry.next_run else {
                continue;
            };
            if next_run > now {
                continue;
            }

            info!("executing scheduled backup: {id}");

            let orchestrator = self.orchestrator;
            let dispatcher = self.dispatcher.clone();
            let config = entry.config.clone();
            let schedule_id = id.clone();

            tokio::spawn(async move {
                run_scheduled_backup(orchestrator, dispatcher, schedule_id, config).await;
            });

            entry.next_run = entry.schedule.after(&now).next();
        }
    }

    /// Schedule records with next-run times refreshed from the live trigger.
    fn schedule_records(&self) -> Vec<BackupSchedule> {
        self.entries
            .iter()
            .map(|(id, entry)| BackupSchedule {
                id: id.clone(),
                cron: entry.cron.clone(),
                backup: entry.config.clone(),
                enabled: entry.enabled,
                next_run: if entry.enabled {
                    entry.next_run.or_else(|| entry.schedule.upcoming(Utc).next())
                } else {
                    None
                },
            })
            .collect()
    }
}

/// Sleep until the deadline, or forever when nothing is scheduled.
async fn sleep_until_due(deadline: Option<DateTime<Utc>>) {
    match deadline {
        Some(at) => {
            let delta = (at - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(delta).await;
        }
        None => std::future::pending().await,
    }
}

/// Execute one scheduled run and record its outcome in the log only.
async fn run_scheduled_backup(
    orchestrator: BackupOrchestrator,
    dispatcher: Arc<NotificationDispatcher>,
    schedule_id: String,
    config: BackupConfig,
) {
    let record = orchestrator.create_backup(&config).await;

    match record.status {
        BackupStatus::Completed => {
            dispatcher
                .send(
                    "Scheduled Backup Completed",
                    &format!(
                        "Backup {} created successfully (Schedule: {schedule_id})",
                        record.id
                    ),
                    NotificationKind::Success,
                    &[],
                )
                .await;
        }
        BackupStatus::Failed => {
            error!("scheduled backup failed: {schedule_id}");
            dispatcher
                .send(
                    "Scheduled Backup Failed",
                    &format!(
                        "Backup failed: {}",
                        record.error.as_deref().unwrap_or("Unknown error")
                    ),
                    NotificationKind::Error,
                    &[],
                )
                .await;
        }
    }
}

/// Parse a 5-field cron expression (minute hour day month day_of_week).
///
/// The cron crate wants a seconds field, so a constant `0` is prepended
/// after the field count has been validated.
fn parse_cron(expression: &str) -> Result<Schedule, ConfigError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(ConfigError::InvalidCron(format!(
            "expected 5 fields (minute hour day month day_of_week), got {}",
            fields.len()
        )));
    }

    Schedule::from_str(&format!("0 {}", fields.join(" ")))
        .map_err(|e| ConfigError::InvalidCron(e.to_string()))
}

/// Handle for controlling a [`SchedulerActor`].
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Spawn a new scheduler actor and return its handle.
    pub fn spawn(
        orchestrator: BackupOrchestrator,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = SchedulerActor::new(orchestrator, dispatcher, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Register (or replace) a recurring backup schedule.
    pub async fn add_schedule(
        &self,
        id: impl Into<String>,
        cron: impl Into<String>,
        config: BackupConfig,
    ) -> Result<std::result::Result<(), ConfigError>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::AddSchedule {
                id: id.into(),
                cron: cron.into(),
                config,
                respond_to: tx,
            })
            .await
            .context("failed to send AddSchedule command")?;

        rx.await.context("failed to receive response")
    }

    /// Remove a schedule. Returns false for an unknown id.
    pub async fn remove_schedule(&self, id: impl Into<String>) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::RemoveSchedule {
                id: id.into(),
                respond_to: tx,
            })
            .await
            .context("failed to send RemoveSchedule command")?;

        rx.await.context("failed to receive response")
    }

    /// Pause a schedule. Returns false for an unknown id.
    pub async fn pause_schedule(&self, id: impl Into<String>) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::PauseSchedule {
                id: id.into(),
                respond_to: tx,
            })
            .await
            .context("failed to send PauseSchedule command")?;

        rx.await.context("failed to receive response")
    }

    /// Resume a paused schedule. Returns false for an unknown id.
    pub async fn resume_schedule(&self, id: impl Into<String>) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::ResumeSchedule {
                id: id.into(),
                respond_to: tx,
            })
            .await
            .context("failed to send ResumeSchedule command")?;

        rx.await.context("failed to receive response")
    }

    /// All schedule records with refreshed next-run times.
    pub async fn get_schedules(&self) -> Result<Vec<BackupSchedule>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::GetSchedules { respond_to: tx })
            .await
            .context("failed to send GetSchedules command")?;

        rx.await.context("failed to receive response")
    }

    /// Gracefully shut down the scheduler.
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SchedulerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::tempdir;

    fn backup_config() -> BackupConfig {
        BackupConfig {
            backup_path: PathBuf::from("/tmp/backups"),
            dump_datastore: false,
            volumes: vec![],
            containers: vec![],
        }
    }

    fn spawn_scheduler() -> SchedulerHandle {
        SchedulerHandle::spawn(
            BackupOrchestrator::new(),
            Arc::new(NotificationDispatcher::new()),
        )
    }

    #[test]
    fn parse_cron_accepts_five_fields() {
        assert!(parse_cron("0 3 * * *").is_ok());
        assert!(parse_cron("*/15 * * * 1-5").is_ok());
    }

    #[test]
    fn parse_cron_rejects_wrong_field_counts() {
        assert!(parse_cron("").is_err());
        assert!(parse_cron("0 3 * *").is_err());
        assert!(parse_cron("0 0 3 * * *").is_err());
        assert!(parse_cron("0 3 * * * * *").is_err());
    }

    #[test]
    fn parse_cron_rejects_garbage_fields() {
        assert!(parse_cron("a b c d e").is_err());
        assert!(parse_cron("61 25 * * *").is_err());
    }

    #[tokio::test]
    async fn add_schedule_computes_a_future_next_run() {
        let handle = spawn_scheduler();

        handle
            .add_schedule("nightly", "0 3 * * *", backup_config())
            .await
            .unwrap()
            .unwrap();

        let schedules = handle.get_schedules().await.unwrap();
        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].id, "nightly");
        assert!(schedules[0].enabled);
        assert!(schedules[0].next_run.expect("next_run set") > Utc::now());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_cron_registers_nothing() {
        let handle = spawn_scheduler();

        let result = handle
            .add_schedule("bad", "0 3 * *", backup_config())
            .await
            .unwrap();
        assert!(matches!(result, Err(ConfigError::InvalidCron(_))));

        assert!(handle.get_schedules().await.unwrap().is_empty());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn add_with_existing_id_upserts() {
        let handle = spawn_scheduler();

        handle
            .add_schedule("job", "0 3 * * *", backup_config())
            .await
            .unwrap()
            .unwrap();
        handle
            .add_schedule("job", "0 4 * * *", backup_config())
            .await
            .unwrap()
            .unwrap();

        let schedules = handle.get_schedules().await.unwrap();
        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].cron, "0 4 * * *");

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn pause_and_resume_toggle_the_schedule() {
        let handle = spawn_scheduler();

        handle
            .add_schedule("job", "0 3 * * *", backup_config())
            .await
            .unwrap()
            .unwrap();

        assert!(handle.pause_schedule("job").await.unwrap());
        let schedules = handle.get_schedules().await.unwrap();
        assert!(!schedules[0].enabled);
        assert!(schedules[0].next_run.is_none());

        assert!(handle.resume_schedule("job").await.unwrap());
        let schedules = handle.get_schedules().await.unwrap();
        assert!(schedules[0].enabled);
        assert!(schedules[0].next_run.is_some());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn operations_on_unknown_ids_answer_false() {
        let handle = spawn_scheduler();

        assert!(!handle.remove_schedule("ghost").await.unwrap());
        assert!(!handle.pause_schedule("ghost").await.unwrap());
        assert!(!handle.resume_schedule("ghost").await.unwrap());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn due_schedule_fires_a_backup_and_logs_the_outcome() {
        let dir = tempdir().unwrap();
        let dispatcher = Arc::new(NotificationDispatcher::new());
        let handle = SchedulerHandle::spawn(BackupOrchestrator::new(), dispatcher.clone());

        let config = BackupConfig {
            backup_path: dir.path().to_path_buf(),
            dump_datastore: false,
            volumes: vec![],
            containers: vec![],
        };
        handle
            .add_schedule("minutely", "* * * * *", config)
            .await
            .unwrap()
            .unwrap();

        // The next minute boundary is at most 60s away; poll the log until
        // the spawned run reports its outcome.
        let mut entry = None;
        for _ in 0..150 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            if let Some(n) = dispatcher.get_notifications(1).await.into_iter().next() {
                entry = Some(n);
                break;
            }
        }

        let entry = entry.expect("scheduled run should report within the poll window");
        assert_eq!(entry.title, "Scheduled Backup Completed");
        assert_eq!(entry.kind, NotificationKind::Success);
        assert!(entry.message.contains("(Schedule: minutely)"));

        // Exactly one archive was written for the fired run.
        let listed = BackupOrchestrator::new().list_backups(dir.path()).await;
        assert_eq!(listed.len(), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn remove_deletes_the_schedule() {
        let handle = spawn_scheduler();

        handle
            .add_schedule("job", "0 3 * * *", backup_config())
            .await
            .unwrap()
            .unwrap();
        assert!(handle.remove_schedule("job").await.unwrap());
        assert!(handle.get_schedules().await.unwrap().is_empty());

        handle.shutdown().await.unwrap();
    }
}
