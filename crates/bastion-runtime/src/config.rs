//! Configuration vault – `bastion.toml` plus `BASTION_*` overrides.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration.
//!
//! ```toml
//! [dispatcher]
//! default_holder = "planner"
//! default_timeout_ms = 30000
//!
//! [perception]
//! detection_radius = 16.0
//! persistence_window_secs = 300
//!
//! [safety]
//! flee_distance = 16.0
//! poll_interval_ms = 250
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use bastion_perception::PerceptionConfig;
use bastion_types::BastionError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Lease holder used when a request names none.
    #[serde(default = "default_holder")]
    pub default_holder: String,
    /// Timeout handed to leaves when a request sets none.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
}

fn default_holder() -> String {
    "planner".to_string()
}
fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_holder: default_holder(),
            default_timeout_ms: default_timeout_ms(),
        }
    }
}

impl DispatcherConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Maximum distance to an attack target.
    #[serde(default = "default_attack_radius")]
    pub attack_radius: f64,
    /// How far a flee navigates away from the threats.
    #[serde(default = "default_flee_distance")]
    pub flee_distance: f64,
    /// `move_forward` distance when no flee target can be computed.
    #[serde(default = "default_fallback_forward_distance")]
    pub fallback_forward_distance: f64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_attack_radius() -> f64 {
    16.0
}
fn default_flee_distance() -> f64 {
    16.0
}
fn default_fallback_forward_distance() -> f64 {
    8.0
}
fn default_poll_interval_ms() -> u64 {
    250
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            attack_radius: default_attack_radius(),
            flee_distance: default_flee_distance(),
            fallback_forward_distance: default_fallback_forward_distance(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl SafetyConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BastionConfig {
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub perception: PerceptionConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
}

impl BastionConfig {
    /// Parse TOML text.  Environment overrides are not applied.
    pub fn from_toml_str(raw: &str) -> Result<Self, BastionError> {
        toml::from_str(raw)
            .map_err(|e| BastionError::Config(format!("Failed to parse config: {e}")))
    }

    pub fn to_toml_string(&self) -> Result<String, BastionError> {
        toml::to_string_pretty(self)
            .map_err(|e| BastionError::Config(format!("Failed to serialize config: {e}")))
    }
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<BastionConfig>, BastionError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        BastionError::Config(format!("Failed to read config at {}: {e}", path.display()))
    })?;
    let mut cfg = BastionConfig::from_toml_str(&raw)?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// [`load_from`], falling back to defaults (with overrides) when the file is
/// absent.
pub fn load_or_default(path: &Path) -> Result<BastionConfig, BastionError> {
    match load_from(path)? {
        Some(cfg) => Ok(cfg),
        None => {
            let mut cfg = BastionConfig::default();
            apply_env_overrides(&mut cfg);
            Ok(cfg)
        }
    }
}

/// Write the config to `path`, creating parent directories.
pub fn save_to(cfg: &BastionConfig, path: &Path) -> Result<(), BastionError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| BastionError::Config(format!("Failed to create config directory: {e}")))?;
    }
    let raw = cfg.to_toml_string()?;
    fs::write(path, raw).map_err(|e| {
        BastionError::Config(format!("Failed to write config at {}: {e}", path.display()))
    })
}

/// Apply `BASTION_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `BASTION_DEFAULT_HOLDER` | `dispatcher.default_holder` |
/// | `BASTION_DETECTION_RADIUS` | `perception.detection_radius` |
/// | `BASTION_PERSISTENCE_WINDOW_SECS` | `perception.persistence_window_secs` |
/// | `BASTION_FLEE_DISTANCE` | `safety.flee_distance` |
/// | `BASTION_SAFETY_POLL_MS` | `safety.poll_interval_ms` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut BastionConfig) {
    if let Ok(v) = std::env::var("BASTION_DEFAULT_HOLDER")
        && !v.is_empty()
    {
        cfg.dispatcher.default_holder = v;
    }
    if let Ok(v) = std::env::var("BASTION_DETECTION_RADIUS")
        && let Ok(radius) = v.parse::<f64>()
        && radius > 0.0
    {
        cfg.perception.detection_radius = radius;
    }
    if let Ok(v) = std::env::var("BASTION_PERSISTENCE_WINDOW_SECS")
        && let Ok(secs) = v.parse::<u64>()
    {
        cfg.perception.persistence_window_secs = secs;
    }
    if let Ok(v) = std::env::var("BASTION_FLEE_DISTANCE")
        && let Ok(distance) = v.parse::<f64>()
        && distance > 0.0
    {
        cfg.safety.flee_distance = distance;
    }
    if let Ok(v) = std::env::var("BASTION_SAFETY_POLL_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.safety.poll_interval_ms = ms;
    }
}
