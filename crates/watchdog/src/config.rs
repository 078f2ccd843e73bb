//! Policy configuration loaded from `watchdog-config.json`.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::action::{validate_rule, ActionKind, RecoveryAction, RecoveryEffect};
use crate::effects::{CommandEffect, LogEffect};
use crate::error::{ConfigError, RegistrationError};
use crate::gate::DistressGate;
use crate::snapshot::Dimension;

/// Default config file name, resolved relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "watchdog-config.json";

/// Top-level watchdog configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryConfig {
    #[serde(default)]
    pub distress_gate: DistressGate,
    /// Send an informational event when a mitigation succeeds
    #[serde(default)]
    pub notify_on_recovery: bool,
    #[serde(default = "default_actions")]
    pub actions: Vec<ActionConfig>,
}

/// One policy rule as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionConfig {
    pub kind: ActionKind,
    /// Defaults to the kind's stock dimension
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<Dimension>,
    /// Defaults to the kind's stock threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Program and arguments to run; without one the action only logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Pause between logged steps of a dry-run effect
    #[serde(default)]
    pub step_delay_ms: u64,
}

fn default_cooldown_secs() -> u64 {
    300
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_actions() -> Vec<ActionConfig> {
    ActionKind::ALL.into_iter().map(ActionConfig::stock).collect()
}

impl ActionConfig {
    /// Stock rule for a kind with no command.
    #[must_use]
    pub fn stock(kind: ActionKind) -> Self {
        Self {
            kind,
            dimension: None,
            threshold: None,
            cooldown_secs: default_cooldown_secs(),
            timeout_secs: default_timeout_secs(),
            command: None,
            step_delay_ms: 0,
        }
    }

    #[must_use]
    pub fn dimension(&self) -> Dimension {
        self.dimension.unwrap_or_else(|| self.kind.default_dimension())
    }

    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
            .unwrap_or_else(|| self.kind.default_threshold())
    }

    fn validate(&self) -> Result<(), RegistrationError> {
        validate_rule(
            self.kind,
            self.dimension(),
            self.threshold(),
            Duration::from_secs(self.timeout_secs),
        )
    }

    /// Turn this rule into a registrable action.
    ///
    /// `dry_run` forces the logging effect even when a command is configured.
    pub fn to_action(&self, dry_run: bool) -> anyhow::Result<RecoveryAction> {
        let effect: Arc<dyn RecoveryEffect> = match &self.command {
            Some(argv) if !dry_run => Arc::new(CommandEffect::new(self.kind, argv.clone())?),
            _ => Arc::new(
                LogEffect::new(self.kind)
                    .with_step_delay(Duration::from_millis(self.step_delay_ms)),
            ),
        };

        Ok(RecoveryAction::new(self.kind, effect)
            .with_dimension(self.dimension())
            .with_threshold(self.threshold())
            .with_cooldown(Duration::from_secs(self.cooldown_secs))
            .with_timeout(Duration::from_secs(self.timeout_secs)))
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            distress_gate: DistressGate::default(),
            notify_on_recovery: false,
            actions: default_actions(),
        }
    }
}

impl RecoveryConfig {
    /// Load and validate the config, falling back to defaults if the file is
    /// absent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        if !path.exists() {
            warn!(path = %path_str, "Config file not found, using stock policy");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path_str.clone(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path_str.clone(),
            source,
        })?;
        config.validate()?;

        info!(
            path = %path_str,
            actions = config.actions.len(),
            "Loaded watchdog config"
        );
        Ok(config)
    }

    /// Same checks the controller applies at registration, up front.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.distress_gate.validate()?;

        let mut seen = HashSet::new();
        for action in &self.actions {
            if !seen.insert(action.kind) {
                return Err(RegistrationError::DuplicateAction(action.kind).into());
            }
            action.validate()?;
        }
        Ok(())
    }

    /// Build the registrable policy table.
    pub fn to_actions(&self, dry_run: bool) -> anyhow::Result<Vec<RecoveryAction>> {
        self.actions.iter().map(|a| a.to_action(dry_run)).collect()
    }
}
