//! Backup orchestration
//!
//! One backup run creates a working directory, executes the optional steps
//! the configuration asks for (datastore dump, volume archives, container
//! config capture), compresses the directory to a single archive and removes
//! the uncompressed copy. Optional steps are best-effort: their failures are
//! logged and skipped. Only directory setup and compression are mandatory;
//! their failure marks the job failed with the captured error text.
//!
//! Every external utility runs as a subprocess with captured output and an
//! explicit timeout; non-zero exit is that step's failure. There is no retry
//! anywhere in this path.

pub mod error;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{BackupConfig, ConfigError, ConfigResult};

use error::{ProcessError, ProcessResult};

/// Timeout for the datastore dump and restore steps.
const DUMP_TIMEOUT_SECS: u64 = 300;

/// Timeout for per-volume archival, compression and extraction.
const ARCHIVE_TIMEOUT_SECS: u64 = 600;

/// Timeout for container config capture.
const INSPECT_TIMEOUT_SECS: u64 = 60;

/// Outcome of one backup run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Completed,
    Failed,
}

/// Immutable record of one backup run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupJobRecord {
    /// Derived from the creation time at second resolution.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub status: BackupStatus,
    pub error: Option<String>,
}

/// An archive found on disk by [`BackupOrchestrator::list_backups`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupArchive {
    pub filename: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created: DateTime<Utc>,
}

/// Executes backup and restore jobs against external utilities.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackupOrchestrator;

impl BackupOrchestrator {
    pub fn new() -> Self {
        Self
    }

    /// Run one backup job described by `config`.
    ///
    /// Always returns a record; failures are carried in `status`/`error`
    /// rather than raised.
    #[instrument(skip(self, config))]
    pub async fn create_backup(&self, config: &BackupConfig) -> BackupJobRecord {
        let id = job_id(Utc::now());
        let work_dir = config.backup_path.join(format!("backup_{id}"));

        match self.run_job(&work_dir, config).await {
            Ok((archive_path, size_bytes)) => {
                info!("backup created: {id}");
                BackupJobRecord {
                    id,
                    timestamp: Utc::now(),
                    path: archive_path,
                    size_bytes,
                    status: BackupStatus::Completed,
                    error: None,
                }
            }
            Err(e) => {
                error!("backup failed: {:#}", e);
                // Never leave a half-written working directory or a partial
                // archive behind; both would otherwise surface in listings.
                remove_job_artifacts(&work_dir).await;
                BackupJobRecord {
                    id,
                    timestamp: Utc::now(),
                    path: work_dir,
                    size_bytes: 0,
                    status: BackupStatus::Failed,
                    error: Some(format!("{e:#}")),
                }
            }
        }
    }

    /// Mandatory setup + optional steps + mandatory compression.
    async fn run_job(
        &self,
        work_dir: &Path,
        config: &BackupConfig,
    ) -> anyhow::Result<(PathBuf, u64)> {
        tokio::fs::create_dir_all(work_dir).await.map_err(|e| {
            anyhow::anyhow!("failed to create working directory {}: {e}", work_dir.display())
        })?;

        if config.dump_datastore {
            let dump_dir = work_dir.join("mongodb");
            if let Err(e) = self.dump_datastore(&dump_dir).await {
                warn!("datastore dump not available, skipping: {e}");
            }
        }

        if !config.volumes.is_empty() {
            let volumes_dir = work_dir.join("volumes");
            self.archive_volumes(&config.volumes, &volumes_dir).await;
        }

        if !config.containers.is_empty() {
            let configs_dir = work_dir.join("configs");
            self.capture_container_configs(&config.containers, &configs_dir)
                .await;
        }

        let archive_path = compress(work_dir).await?;

        if let Err(e) = tokio::fs::remove_dir_all(work_dir).await {
            warn!("failed to remove uncompressed working directory: {e}");
        }

        let size_bytes = tokio::fs::metadata(&archive_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        Ok((archive_path, size_bytes))
    }

    /// Dump the primary datastore into `output_dir` (optional step).
    async fn dump_datastore(&self, output_dir: &Path) -> ProcessResult<()> {
        tokio::fs::create_dir_all(output_dir).await?;

        run_command(
            "mongodump",
            &[
                "--out".to_string(),
                output_dir.display().to_string(),
            ],
            DUMP_TIMEOUT_SECS,
        )
        .await?;

        info!("datastore dumped to {}", output_dir.display());
        Ok(())
    }

    /// Archive each named volume into `output_dir` (optional step, per-volume
    /// failure isolation).
    async fn archive_volumes(&self, volumes: &[String], output_dir: &Path) {
        if let Err(e) = tokio::fs::create_dir_all(output_dir).await {
            warn!("failed to create volumes directory, skipping step: {e}");
            return;
        }

        for volume in volumes {
            if let Err(e) = validate_name(volume) {
                warn!("skipping volume with invalid name: {e}");
                continue;
            }

            let result = run_command(
                "docker",
                &volume_archive_args(volume, output_dir),
                ARCHIVE_TIMEOUT_SECS,
            )
            .await;

            match result {
                Ok(_) => info!("volume {volume} backed up"),
                Err(e) => warn!("volume backup failed for {volume}: {e}"),
            }
        }
    }

    /// Capture each container's configuration as JSON (optional step,
    /// per-container failure isolation).
    async fn capture_container_configs(&self, containers: &[String], output_dir: &Path) {
        if let Err(e) = tokio::fs::create_dir_all(output_dir).await {
            warn!("failed to create configs directory, skipping step: {e}");
            return;
        }

        for container in containers {
            if let Err(e) = validate_name(container) {
                warn!("skipping container with invalid name: {e}");
                continue;
            }

            let result = run_command(
                "docker",
                &["inspect".to_string(), container.clone()],
                INSPECT_TIMEOUT_SECS,
            )
            .await;

            match result {
                Ok(stdout) => {
                    let config_file = output_dir.join(format!("{container}.json"));
                    match tokio::fs::write(&config_file, stdout).await {
                        Ok(()) => info!("container config backed up: {container}"),
                        Err(e) => warn!("failed to write config for {container}: {e}"),
                    }
                }
                Err(e) => warn!("failed to inspect container {container}: {e}"),
            }
        }
    }

    /// Restore from a backup archive.
    ///
    /// Extracts next to the archive and, if a datastore dump is present in
    /// the extracted tree, restores it. Failures are logged; callers inspect
    /// the boolean.
    #[instrument(skip(self))]
    pub async fn restore_backup(&self, archive_path: &Path) -> bool {
        match self.try_restore(archive_path).await {
            Ok(()) => {
                info!("backup restored from {}", archive_path.display());
                true
            }
            Err(e) => {
                error!("restore failed: {:#}", e);
                false
            }
        }
    }

    async fn try_restore(&self, archive_path: &Path) -> anyhow::Result<()> {
        let parent = archive_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("archive path has no parent directory"))?;

        run_command(
            "tar",
            &[
                "xzf".to_string(),
                archive_path.display().to_string(),
                "-C".to_string(),
                parent.display().to_string(),
            ],
            ARCHIVE_TIMEOUT_SECS,
        )
        .await?;

        let extract_path = extracted_dir(archive_path)?;
        let dump_dir = extract_path.join("mongodb");
        if tokio::fs::try_exists(&dump_dir).await.unwrap_or(false) {
            run_command(
                "mongorestore",
                &[dump_dir.display().to_string()],
                DUMP_TIMEOUT_SECS,
            )
            .await?;
            info!("datastore restored");
        }

        Ok(())
    }

    /// Enumerate backup archives in `dir`, newest first.
    pub async fn list_backups(&self, dir: &Path) -> Vec<BackupArchive> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut backups = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let filename = entry.file_name().to_string_lossy().into_owned();
            if !filename.starts_with("backup_") || !filename.ends_with(".tar.gz") {
                continue;
            }

            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }

            let created = metadata
                .created()
                .or_else(|_| metadata.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            backups.push(BackupArchive {
                filename,
                path: entry.path(),
                size_bytes: metadata.len(),
                created,
            });
        }

        backups.sort_by(|a, b| b.created.cmp(&a.created));
        backups
    }
}

/// Derive a job id from the creation time (second resolution).
fn job_id(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// Arguments for archiving one named volume into `output_dir` as
/// `<volume>.tar` via a throwaway container.
fn volume_archive_args(volume: &str, output_dir: &Path) -> Vec<String> {
    vec![
        "run".to_string(),
        "--rm".to_string(),
        "-v".to_string(),
        format!("{volume}:/volume"),
        "-v".to_string(),
        format!("{}:/backup", output_dir.display()),
        "busybox".to_string(),
        "tar".to_string(),
        "czf".to_string(),
        format!("/backup/{volume}.tar"),
        "-C".to_string(),
        "/volume".to_string(),
        ".".to_string(),
    ]
}

/// Remove everything a failed job may have left behind: the working
/// directory and a partially written archive. Both are best-effort.
async fn remove_job_artifacts(work_dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(work_dir).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("failed to clean up working directory: {e}");
    }

    let archive = PathBuf::from(format!("{}.tar.gz", work_dir.display()));
    if let Err(e) = tokio::fs::remove_file(&archive).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("failed to clean up partial archive: {e}");
    }
}

/// Compress a working directory into `<dir>.tar.gz` (mandatory step).
async fn compress(work_dir: &Path) -> anyhow::Result<PathBuf> {
    let parent = work_dir
        .parent()
        .ok_or_else(|| anyhow::anyhow!("working directory has no parent"))?;
    let dir_name = work_dir
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("working directory has no name"))?
        .to_string_lossy();

    let archive_path = parent.join(format!("{dir_name}.tar.gz"));

    run_command(
        "tar",
        &[
            "czf".to_string(),
            archive_path.display().to_string(),
            "-C".to_string(),
            parent.display().to_string(),
            dir_name.to_string(),
        ],
        ARCHIVE_TIMEOUT_SECS,
    )
    .await
    .map_err(|e| anyhow::anyhow!("compression failed: {e}"))?;

    debug!("backup compressed to {}", archive_path.display());
    Ok(archive_path)
}

/// Run an external utility with captured output and a hard timeout.
///
/// The child is killed when the timeout elapses. Returns captured stdout.
async fn run_command(program: &str, args: &[String], timeout_secs: u64) -> ProcessResult<Vec<u8>> {
    debug!("running {program} {:?}", args);

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = timeout(Duration::from_secs(timeout_secs), cmd.output())
        .await
        .map_err(|_| ProcessError::Timeout {
            program: program.to_string(),
            secs: timeout_secs,
        })??;

    if !output.status.success() {
        return Err(ProcessError::NonZeroExit {
            program: program.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(output.stdout)
}

/// Reject names that cannot safely appear in process arguments.
fn validate_name(name: &str) -> ConfigResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        && !name.starts_with('-');

    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidName(name.to_string()))
    }
}

/// Directory an archive extracts to (its path minus the `.tar.gz` suffix).
fn extracted_dir(archive_path: &Path) -> anyhow::Result<PathBuf> {
    let as_str = archive_path.to_string_lossy();
    let stripped = as_str
        .strip_suffix(".tar.gz")
        .ok_or_else(|| anyhow::anyhow!("archive does not end in .tar.gz"))?;
    Ok(PathBuf::from(stripped))
}
