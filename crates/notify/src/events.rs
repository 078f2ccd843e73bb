//! Escalation event types emitted by the recovery watchdog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity levels for alerts and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational - normal operations
    Info,
    /// Warning - something needs attention
    Warning,
    /// Critical - immediate action required
    Critical,
}

impl Severity {
    /// Get the attachment color for this severity.
    #[must_use]
    pub const fn color(&self) -> &'static str {
        match self {
            Self::Info => "#3498db",     // Blue
            Self::Warning => "#f39c12",  // Orange
            Self::Critical => "#e74c3c", // Red
        }
    }

    /// Get display name for this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Critical => "Critical",
        }
    }
}

/// Events that can trigger notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifyEvent {
    /// A recovery action's effect failed, timed out or panicked
    ActionFailed {
        action_kind: String,
        error: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// A recovery action's effect completed successfully
    ActionRecovered {
        action_kind: String,
        duration_ms: u64,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// The distress gate tripped and at least one action was launched
    DistressDetected {
        summary: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// The controller itself hit an unexpected fault
    ControllerFault {
        message: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
}

impl NotifyEvent {
    /// Get a short title for this event type.
    #[must_use]
    pub fn title(&self) -> String {
        match self {
            Self::ActionFailed { action_kind, .. } => format!("Recovery Failed: {action_kind}"),
            Self::ActionRecovered { action_kind, .. } => {
                format!("Recovery Completed: {action_kind}")
            }
            Self::DistressDetected { .. } => "System Distress Detected".to_string(),
            Self::ControllerFault { .. } => "Watchdog Fault".to_string(),
        }
    }

    /// Get the severity for this event.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::ActionRecovered { .. } => Severity::Info,
            Self::DistressDetected { .. } => Severity::Warning,
            Self::ActionFailed { .. } | Self::ControllerFault { .. } => Severity::Critical,
        }
    }

    /// Get the timestamp for this event.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::ActionFailed { timestamp, .. }
            | Self::ActionRecovered { timestamp, .. }
            | Self::DistressDetected { timestamp, .. }
            | Self::ControllerFault { timestamp, .. } => *timestamp,
        }
    }

    /// Human-readable body text.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::ActionFailed { error, .. } => error.clone(),
            Self::ActionRecovered { duration_ms, .. } => {
                format!("Mitigation finished in {}", format_duration_ms(*duration_ms))
            }
            Self::DistressDetected { summary, .. } | Self::ControllerFault { message: summary, .. } => {
                summary.clone()
            }
        }
    }
}

/// Format milliseconds into a human-readable duration.
pub(crate) fn format_duration_ms(ms: u64) -> String {
    if ms < 1000 {
        return format!("{ms}ms");
    }
    let secs = ms / 1000;
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        let mins = secs / 60;
        let remaining_secs = secs % 60;
        if remaining_secs == 0 {
            format!("{mins}m")
        } else {
            format!("{mins}m {remaining_secs}s")
        }
    } else {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins == 0 {
            format!("{hours}h")
        } else {
            format!("{hours}h {mins}m")
        }
    }
}
