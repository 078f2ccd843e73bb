//! Metrics snapshots and the dimensions recovery policy can watch.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// One reading of system state, produced by an external collector per tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// CPU utilisation, percent (0-100)
    pub cpu_usage: f64,
    /// Memory utilisation, percent (0-100)
    pub memory_usage: f64,
    /// Disk utilisation, percent (0-100)
    pub disk_space: f64,
    /// Request latency in milliseconds
    #[serde(alias = "responseTime")]
    pub response_time_ms: f64,
    /// Currently active users
    #[serde(default)]
    pub active_users: u64,
    /// When the collector took the reading
    #[serde(default = "Utc::now")]
    pub captured_at: DateTime<Utc>,
}

impl MetricsSnapshot {
    /// Build a snapshot captured now with no active users recorded.
    #[must_use]
    pub fn new(cpu_usage: f64, memory_usage: f64, disk_space: f64, response_time_ms: f64) -> Self {
        Self {
            cpu_usage,
            memory_usage,
            disk_space,
            response_time_ms,
            active_users: 0,
            captured_at: Utc::now(),
        }
    }

    /// Override the capture time.
    #[must_use]
    pub fn captured_at(mut self, at: DateTime<Utc>) -> Self {
        self.captured_at = at;
        self
    }

    /// Check every field against its documented range.
    ///
    /// Out-of-range values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("cpuUsage", self.cpu_usage),
            ("memoryUsage", self.memory_usage),
            ("diskSpace", self.disk_space),
        ] {
            check_percentage(field, value)?;
        }

        if !self.response_time_ms.is_finite() {
            return Err(ValidationError {
                field: "responseTimeMs",
                value: self.response_time_ms,
                reason: "must be a finite number",
            });
        }
        if self.response_time_ms < 0.0 {
            return Err(ValidationError {
                field: "responseTimeMs",
                value: self.response_time_ms,
                reason: "must not be negative",
            });
        }
        Ok(())
    }

    /// Short one-line rendering used in logs and distress notifications.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "cpu={:.1}% memory={:.1}% disk={:.1}% responseTime={:.0}ms activeUsers={}",
            self.cpu_usage,
            self.memory_usage,
            self.disk_space,
            self.response_time_ms,
            self.active_users
        )
    }
}

fn check_percentage(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError {
            field,
            value,
            reason: "must be a finite number",
        });
    }
    if !(0.0..=100.0).contains(&value) {
        return Err(ValidationError {
            field,
            value,
            reason: "percentage must be within 0-100",
        });
    }
    Ok(())
}

/// A metric a recovery action can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Dimension {
    Cpu,
    Memory,
    Disk,
    ResponseTime,
    ActiveUsers,
}

impl Dimension {
    /// Read this dimension out of a snapshot.
    #[must_use]
    pub fn value(self, snapshot: &MetricsSnapshot) -> f64 {
        match self {
            Self::Cpu => snapshot.cpu_usage,
            Self::Memory => snapshot.memory_usage,
            Self::Disk => snapshot.disk_space,
            Self::ResponseTime => snapshot.response_time_ms,
            Self::ActiveUsers => snapshot.active_users as f64,
        }
    }

    /// Whether thresholds on this dimension are bounded to 0-100.
    #[must_use]
    pub fn is_percentage(self) -> bool {
        matches!(self, Self::Cpu | Self::Memory | Self::Disk)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Disk => "disk",
            Self::ResponseTime => "responseTime",
            Self::ActiveUsers => "activeUsers",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
