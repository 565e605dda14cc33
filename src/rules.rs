//! Alert rule model and trigger evaluation
//!
//! The trigger predicate is a pure function over (rule, value, now) so it can
//! be tested exhaustively without spinning up the monitor actor that applies
//! it. The actor only ever mutates `last_triggered`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Which snapshot field a rule watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKey {
    Cpu,
    Ram,
    Disk,
}

impl MetricKey {
    /// Uppercase label used in alert messages ("CPU is 85.0% ...").
    pub fn label(&self) -> &'static str {
        match self {
            MetricKey::Cpu => "CPU",
            MetricKey::Ram => "RAM",
            MetricKey::Disk => "DISK",
        }
    }
}

/// Threshold comparison direction.
///
/// This is a closed enum: an unknown comparison string fails at
/// deserialization, before a rule ever reaches the evaluation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Gt,
    Lt,
}

/// A single alert rule.
///
/// Created/updated/deleted by the surrounding API through the monitor handle;
/// the evaluation loop only ever stamps `last_triggered`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub metric: MetricKey,
    pub threshold: f64,
    pub comparison: Comparison,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Minimum time between two triggers of this rule.
    #[serde(with = "cooldown_secs", default = "default_cooldown")]
    pub cooldown: Duration,
    #[serde(default)]
    pub last_triggered: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

fn default_cooldown() -> Duration {
    Duration::minutes(15)
}

/// Serialize the cooldown as whole seconds for the collaborator store.
mod cooldown_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(deserializer)?;
        Ok(Duration::seconds(secs))
    }
}

impl AlertRule {
    /// Decide whether this rule should fire for `value` at instant `now`.
    ///
    /// Returns false when the rule is disabled or still inside its cooldown
    /// window, regardless of the value. Otherwise applies the configured
    /// comparison against the threshold.
    pub fn should_trigger(&self, value: f64, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }

        if let Some(last) = self.last_triggered
            && now - last < self.cooldown
        {
            return false;
        }

        match self.comparison {
            Comparison::Gt => value > self.threshold,
            Comparison::Lt => value < self.threshold,
        }
    }
}

/// Typed partial update for a rule.
///
/// Every field is optional; `None` leaves the current value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleUpdate {
    pub name: Option<String>,
    pub metric: Option<MetricKey>,
    pub threshold: Option<f64>,
    pub comparison: Option<Comparison>,
    pub enabled: Option<bool>,
    /// New cooldown in seconds.
    pub cooldown_secs: Option<i64>,
}

impl RuleUpdate {
    /// Apply this update to a rule in place.
    pub fn apply(&self, rule: &mut AlertRule) {
        if let Some(name) = &self.name {
            rule.name = name.clone();
        }
        if let Some(metric) = self.metric {
            rule.metric = metric;
        }
        if let Some(threshold) = self.threshold {
            rule.threshold = threshold;
        }
        if let Some(comparison) = self.comparison {
            rule.comparison = comparison;
        }
        if let Some(enabled) = self.enabled {
            rule.enabled = enabled;
        }
        if let Some(secs) = self.cooldown_secs {
            rule.cooldown = Duration::seconds(secs);
        }
    }
}
