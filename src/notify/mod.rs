//! Notification fan-out with a bounded in-memory log
//!
//! One logical event goes to the log first, then to every requested channel.
//! Channels are independent: a delivery failure is logged and never affects
//! the other channels or the already-recorded log entry. There are no
//! retries anywhere in this path.

pub mod channels;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, instrument, trace};

use crate::config::ChannelConfig;

/// Maximum notifications kept in the log; oldest entries are evicted.
const MAX_NOTIFICATIONS: usize = 100;

/// Timeout for every outbound channel HTTP call.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Warning,
    Error,
    Success,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Info => "info",
            NotificationKind::Warning => "warning",
            NotificationKind::Error => "error",
            NotificationKind::Success => "success",
        }
    }

    /// Severity color for embed-style payloads.
    pub fn color(&self) -> u32 {
        match self {
            NotificationKind::Info => 0x3498db,
            NotificationKind::Success => 0x10b981,
            NotificationKind::Warning => 0xf59e0b,
            NotificationKind::Error => 0xef4444,
        }
    }

    /// Severity color for attachment-style payloads.
    pub fn color_hex(&self) -> &'static str {
        match self {
            NotificationKind::Info => "#3498db",
            NotificationKind::Success => "#10b981",
            NotificationKind::Warning => "#f59e0b",
            NotificationKind::Error => "#ef4444",
        }
    }
}

/// A single entry in the notification log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

/// Fans one event out to the configured channels and owns the bounded log.
///
/// Shared by handle (`Arc`) between the monitor actor, the backup scheduler,
/// and ad hoc callers from request-handling context.
pub struct NotificationDispatcher {
    client: reqwest::Client,
    log: Mutex<VecDeque<Notification>>,
    next_id: AtomicU64,
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(DELIVERY_TIMEOUT)
                .build()
                .expect("Failed to build HTTP client"),
            log: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Record the event and attempt delivery to each requested channel.
    ///
    /// The log entry is written before any delivery is attempted, so the
    /// delivery outcome never affects whether the event is recorded. Each
    /// channel failure is logged and isolated from the others.
    #[instrument(skip(self, message, channels), fields(kind = kind.as_str()))]
    pub async fn send(
        &self,
        title: &str,
        message: &str,
        kind: NotificationKind,
        channels: &[ChannelConfig],
    ) -> Notification {
        let notification = Notification {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            title: title.to_string(),
            message: message.to_string(),
            kind,
            timestamp: Utc::now(),
            read: false,
        };

        {
            let mut log = self.log.lock().await;
            log.push_front(notification.clone());
            log.truncate(MAX_NOTIFICATIONS);
        }

        for channel in channels {
            if let Err(e) =
                channels::deliver(&self.client, channel, title, message, kind).await
            {
                error!("failed to send {} notification: {:#}", channel.name(), e);
            } else {
                trace!("delivered notification via {}", channel.name());
            }
        }

        notification
    }

    /// Newest `limit` entries, newest first.
    pub async fn get_notifications(&self, limit: usize) -> Vec<Notification> {
        let log = self.log.lock().await;
        log.iter().take(limit).cloned().collect()
    }

    /// Mark one entry as read. Returns false if no entry matches.
    pub async fn mark_as_read(&self, id: u64) -> bool {
        let mut log = self.log.lock().await;
        match log.iter_mut().find(|n| n.id == id) {
            Some(notification) => {
                notification.read = true;
                true
            }
            None => false,
        }
    }

    /// Mark every entry as read.
    pub async fn mark_all_as_read(&self) {
        let mut log = self.log.lock().await;
        for notification in log.iter_mut() {
            notification.read = true;
        }
    }
}
