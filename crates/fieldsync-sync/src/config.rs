//! User-facing sync settings and engine tuning.

use std::time::Duration;

use fieldsync_core::{ConflictStrategy, RetryPolicy};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// How often automatic sync runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "IntervalRepr", into = "IntervalRepr")]
pub enum SyncInterval {
    Minutes5,
    Minutes15,
    Minutes30,
    Minutes60,
    /// No automatic sync; only explicit requests.
    Manual,
}

impl SyncInterval {
    /// Timer period, or `None` for [`SyncInterval::Manual`].
    pub fn period(self) -> Option<Duration> {
        let minutes = match self {
            Self::Minutes5 => 5,
            Self::Minutes15 => 15,
            Self::Minutes30 => 30,
            Self::Minutes60 => 60,
            Self::Manual => return None,
        };
        Some(Duration::from_secs(minutes * 60))
    }
}

impl Default for SyncInterval {
    fn default() -> Self {
        Self::Minutes15
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum IntervalRepr {
    Minutes(u64),
    Keyword(String),
}

impl TryFrom<IntervalRepr> for SyncInterval {
    type Error = String;

    fn try_from(repr: IntervalRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            IntervalRepr::Minutes(5) => Ok(Self::Minutes5),
            IntervalRepr::Minutes(15) => Ok(Self::Minutes15),
            IntervalRepr::Minutes(30) => Ok(Self::Minutes30),
            IntervalRepr::Minutes(60) => Ok(Self::Minutes60),
            IntervalRepr::Keyword(word) if word == "manual" => Ok(Self::Manual),
            IntervalRepr::Minutes(other) => Err(format!(
                "unsupported sync interval {other}; expected 5, 15, 30, 60 or \"manual\""
            )),
            IntervalRepr::Keyword(other) => Err(format!("unsupported sync interval {other:?}")),
        }
    }
}

impl From<SyncInterval> for IntervalRepr {
    fn from(interval: SyncInterval) -> Self {
        match interval.period() {
            Some(period) => Self::Minutes(period.as_secs() / 60),
            None => Self::Keyword("manual".to_string()),
        }
    }
}

/// Settings the user controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    pub auto_sync_enabled: bool,
    /// Suppress automatic sync on metered connections.
    pub wifi_only: bool,
    pub interval_minutes: SyncInterval,
    pub conflict_strategy: ConflictStrategy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            auto_sync_enabled: true,
            wifi_only: false,
            interval_minutes: SyncInterval::default(),
            conflict_strategy: ConflictStrategy::default(),
        }
    }
}

impl SyncSettings {
    /// Parse settings from their JSON form. Missing keys take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SyncError::InvalidConfig(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| SyncError::InvalidConfig(e.to_string()))
    }

    /// Timer period for automatic sync, if any.
    pub fn auto_sync_period(&self) -> Option<Duration> {
        if self.auto_sync_enabled {
            self.interval_minutes.period()
        } else {
            None
        }
    }
}

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum items per push call.
    pub batch_size: usize,
    /// Timeout applied to each push or pull call.
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    /// Quiet period before a connectivity change is accepted.
    pub connectivity_debounce: Duration,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Sessions loaded from history to seed statistics.
    pub history_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            connectivity_debounce: Duration::from_secs(3),
            event_capacity: 256,
            history_limit: 100,
        }
    }
}
