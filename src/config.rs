//! Engine configuration - loaded from YAML, every field optional

use crate::error::WorkflowError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default pause between two scheduler ticks
const DEFAULT_TICK_INTERVAL_MS: u64 = 2000;

/// Tunables for a workflow session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Milliseconds between recompute ticks
    pub tick_interval_ms: u64,
    /// Buffered layer events per subscriber before it lags
    pub event_capacity: usize,
    /// Metadata key holding a layer's validity flag
    pub validity_key: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            event_capacity: 256,
            validity_key: "valid".to_string(),
        }
    }
}

impl EngineConfig {
    /// Get the default config path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("layerflow")
            .join("config.yml")
    }

    /// Load config from default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load config from a YAML file, falling back to defaults if it is absent
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.tick_interval_ms == 0 {
            return Err(WorkflowError::Config(
                "tick_interval_ms must be positive".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(WorkflowError::Config(
                "event_capacity must be positive".to_string(),
            ));
        }
        if self.validity_key.is_empty() {
            return Err(WorkflowError::Config(
                "validity_key must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
