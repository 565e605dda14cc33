use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::rules::AlertRule;

/// Result type alias for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised at a configuration call boundary.
///
/// These fail fast: nothing is registered or replaced when one is returned.
#[derive(Debug)]
pub enum ConfigError {
    /// A cron expression did not have exactly 5 whitespace-separated fields,
    /// or one of its fields failed to parse.
    InvalidCron(String),

    /// An enabled channel is missing a field it cannot work without.
    MissingField(&'static str),

    /// A volume or container name contains characters that are not allowed
    /// in external-process arguments.
    InvalidName(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidCron(msg) => write!(f, "invalid cron expression: {}", msg),
            ConfigError::MissingField(field) => {
                write!(f, "missing required configuration field: {}", field)
            }
            ConfigError::InvalidName(name) => write!(f, "invalid name: {:?}", name),
        }
    }
}

impl std::error::Error for ConfigError {}

/// The notification settings record as persisted by the collaborator store.
///
/// This is the flat shape the surrounding API loads and saves. It is converted
/// into validated [`ChannelConfig`] variants via [`NotificationConfig::channels`]
/// before any delivery happens; nothing re-checks optional fields at send time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub email_enabled: bool,
    pub email_from: Option<String>,
    pub email_to: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    #[serde(default)]
    pub smtp_use_tls: bool,
    pub webhook_url: Option<String>,
    pub discord_webhook_url: Option<String>,
    pub slack_webhook_url: Option<String>,
}

impl NotificationConfig {
    /// Build the set of configured delivery channels.
    ///
    /// Each variant carries exactly the fields it needs. An enabled email
    /// channel with missing SMTP fields is a [`ConfigError`]; absent webhook
    /// URLs simply produce no channel.
    pub fn channels(&self) -> ConfigResult<Vec<ChannelConfig>> {
        let mut channels = Vec::new();

        if self.email_enabled {
            channels.push(ChannelConfig::Email(EmailChannel {
                from: self
                    .email_from
                    .clone()
                    .ok_or(ConfigError::MissingField("email_from"))?,
                to: self
                    .email_to
                    .clone()
                    .ok_or(ConfigError::MissingField("email_to"))?,
                smtp_host: self
                    .smtp_host
                    .clone()
                    .ok_or(ConfigError::MissingField("smtp_host"))?,
                smtp_port: self.smtp_port.unwrap_or(25),
                credentials: match (&self.smtp_username, &self.smtp_password) {
                    (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
                    _ => None,
                },
                use_tls: self.smtp_use_tls,
            }));
        }

        if let Some(url) = &self.webhook_url {
            channels.push(ChannelConfig::Webhook { url: url.clone() });
        }

        if let Some(url) = &self.discord_webhook_url {
            channels.push(ChannelConfig::Discord { url: url.clone() });
        }

        if let Some(url) = &self.slack_webhook_url {
            channels.push(ChannelConfig::Slack { url: url.clone() });
        }

        Ok(channels)
    }
}

/// A validated delivery channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelConfig {
    /// Plain-text mail over SMTP.
    Email(EmailChannel),
    /// Generic JSON webhook.
    Webhook { url: String },
    /// Discord-style embed webhook.
    Discord { url: String },
    /// Slack-style attachment webhook.
    Slack { url: String },
}

impl ChannelConfig {
    /// Channel name used in delivery-failure logs.
    pub fn name(&self) -> &'static str {
        match self {
            ChannelConfig::Email(_) => "email",
            ChannelConfig::Webhook { .. } => "webhook",
            ChannelConfig::Discord { .. } => "discord",
            ChannelConfig::Slack { .. } => "slack",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailChannel {
    pub from: String,
    pub to: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub credentials: Option<(String, String)>,
    pub use_tls: bool,
}

/// What a single backup run should include.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory backup archives are written to.
    pub backup_path: PathBuf,

    /// Dump the primary datastore (mongodump).
    #[serde(default = "default_true")]
    pub dump_datastore: bool,

    /// Named volumes to archive.
    #[serde(default)]
    pub volumes: Vec<String>,

    /// Containers whose configuration should be captured.
    #[serde(default)]
    pub containers: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Top-level daemon configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Initial alert rules.
    #[serde(default)]
    pub rules: Vec<AlertRule>,

    /// Notification channel settings.
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Recurring backup schedules, keyed by id.
    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,

    /// Seconds between alert evaluation cycles.
    #[serde(default = "default_interval")]
    pub evaluation_interval: u64,

    /// Seconds between metric history samples.
    #[serde(default = "default_interval")]
    pub sampling_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    pub id: String,
    /// 5-field cron expression (minute hour day month day_of_week).
    pub cron: String,
    pub backup: BackupConfig,
}

fn default_interval() -> u64 {
    60
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config: &Config| trace!("loaded config: {config:?}"))
}
