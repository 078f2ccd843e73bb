//! Coarse "is the system in distress at all" check that runs before any
//! per-action policy is consulted.

use serde::{Deserialize, Serialize};

use crate::error::GateError;
use crate::snapshot::MetricsSnapshot;

/// Cutoffs for the global distress predicate. Any single breach trips it.
///
/// Independent of per-action thresholds. With stock values the database
/// optimisation rule (3000ms) only runs on latency once the gate (5000ms)
/// is open, or when another metric has already tripped it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DistressGate {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub response_time_ms: f64,
}

impl Default for DistressGate {
    fn default() -> Self {
        Self {
            cpu_percent: 90.0,
            memory_percent: 90.0,
            disk_percent: 95.0,
            response_time_ms: 5000.0,
        }
    }
}

impl DistressGate {
    /// True when any metric is strictly above its cutoff.
    #[must_use]
    pub fn is_distressed(&self, snapshot: &MetricsSnapshot) -> bool {
        !self.breaches(snapshot).is_empty()
    }

    /// Names of the metrics currently above their cutoff.
    #[must_use]
    pub fn breaches(&self, snapshot: &MetricsSnapshot) -> Vec<&'static str> {
        [
            ("cpu", snapshot.cpu_usage, self.cpu_percent),
            ("memory", snapshot.memory_usage, self.memory_percent),
            ("disk", snapshot.disk_space, self.disk_percent),
            ("responseTime", snapshot.response_time_ms, self.response_time_ms),
        ]
        .into_iter()
        .filter(|(_, value, cutoff)| value > cutoff)
        .map(|(name, _, _)| name)
        .collect()
    }

    /// Reject cutoffs that could never be meaningful.
    pub fn validate(&self) -> Result<(), GateError> {
        for (field, value) in [
            ("cpuPercent", self.cpu_percent),
            ("memoryPercent", self.memory_percent),
            ("diskPercent", self.disk_percent),
        ] {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(GateError {
                    field,
                    value,
                    reason: "percentage must be within 0-100",
                });
            }
        }
        if !self.response_time_ms.is_finite() || self.response_time_ms < 0.0 {
            return Err(GateError {
                field: "responseTimeMs",
                value: self.response_time_ms,
                reason: "must be a non-negative number",
            });
        }
        Ok(())
    }
}
