//! TOML configuration for the WineGuard daemon.
//!
//! Loading order: the file named by `WINEGUARD_CONFIG`, then
//! `/etc/wineguard/wineguard.toml`, then compiled-in defaults. Every section is
//! optional and falls back to its defaults.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detect::channel::DEFAULT_HISTORY_CAP;
use crate::detect::{
    ChannelConfig, Condition, DetectError, IncidentDetector, MissingPolicy, ThresholdPredicate,
};
use crate::ingest::IngestLimits;

pub const CONFIG_ENV: &str = "WINEGUARD_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/wineguard/wineguard.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WineguardConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub ingest: IngestLimits,
}

impl WineguardConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .detector
            .validate()
            .with_context(|| format!("invalid detector config in {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %format!("{:#}", e),
                        "WINEGUARD_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %format!("{:#}", e),
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Explicit path if given, otherwise the usual lookup.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::load_or_default()),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to render config as TOML")
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// SQLite database file.
    pub db_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            db_path: "data/wineguard.db".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level; `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Raw values retained per confirmed run.
    pub history_cap: usize,
    /// Evaluated in this order; it decides event order on a shared reading.
    pub channels: Vec<ChannelSpec>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            history_cap: DEFAULT_HISTORY_CAP,
            channels: vec![
                ChannelSpec {
                    label: "temperatura_alta".to_string(),
                    threshold: 3,
                    value_field: "temperatura".to_string(),
                    on_missing: MissingPolicy::Error,
                    conditions: vec![Condition::above("temperatura", 8.0)],
                },
                ChannelSpec {
                    label: "choque".to_string(),
                    threshold: 3,
                    value_field: "fuerza_g".to_string(),
                    on_missing: MissingPolicy::Error,
                    conditions: vec![
                        Condition::above("fuerza_g", 2.5),
                        Condition::above("inclinacion", 30.0),
                    ],
                },
            ],
        }
    }
}

impl DetectorConfig {
    pub fn channel_configs(&self) -> Result<Vec<ChannelConfig>, DetectError> {
        self.channels
            .iter()
            .map(|spec| spec.build(self.history_cap))
            .collect()
    }

    pub fn validate(&self) -> Result<(), DetectError> {
        // Constructing the detector runs every check.
        self.build().map(|_| ())
    }

    pub fn build(&self) -> Result<IncidentDetector, DetectError> {
        IncidentDetector::new(self.channel_configs()?)
    }
}

/// One `[[detector.channels]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub label: String,
    pub threshold: u32,
    /// Field whose value is recorded while the channel is anomalous.
    pub value_field: String,
    #[serde(default)]
    pub on_missing: MissingPolicy,
    pub conditions: Vec<Condition>,
}

impl ChannelSpec {
    pub fn build(&self, history_cap: usize) -> Result<ChannelConfig, DetectError> {
        if self.conditions.is_empty() {
            return Err(DetectError::InvalidConfig {
                label: self.label.clone(),
                reason: "at least one condition is required".into(),
            });
        }
        let predicate =
            ThresholdPredicate::new(self.conditions.clone(), &self.value_field, self.on_missing);
        let cfg = ChannelConfig::new(&self.label, self.threshold, predicate)
            .with_history_cap(history_cap);
        cfg.validate()?;
        Ok(cfg)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
