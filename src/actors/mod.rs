//! Actor-based monitoring core
//!
//! Every long-running loop in this subsystem is an actor: an owned struct
//! with a `run` loop over `tokio::select!`, controlled through an mpsc
//! command channel and queried via oneshot responses. Handles spawn the
//! actor and expose a typed API; they can be cloned and shared freely.
//!
//! ## Actor Types
//!
//! - **AlertMonitorActor**: owns the rule set, polls the metric source every
//!   evaluation interval, fires notifications under cooldown control
//! - **HistoryActor**: samples the metric source into a bounded ring buffer
//!   and answers windowed/aggregated queries
//! - **SchedulerActor**: owns the backup schedule map and fires cron-driven
//!   backup runs
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: each actor has an mpsc command channel for control
//! 2. **Request/Response**: oneshot channels for synchronous queries
//! 3. **Shared collaborators**: the [`crate::notify::NotificationDispatcher`]
//!    and the [`crate::monitors::system::MetricSource`] are passed in by
//!    `Arc` handle at spawn time; actors never share mutable state
//!
//! Mutations of actor-owned state (rules, schedules) only happen on the
//! actor's own task, so an in-flight evaluation pass can never observe a
//! torn collection.

pub mod history;
pub mod messages;
pub mod monitor;
pub mod scheduler;
