use crate::publisher::WatchOptions;
use anyhow::{Context, Result};
use serde::Deserialize;

/// Complete fleetsync configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FleetConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub position: PositionConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub map: MapConfig,
}

/// Document store settings
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Collection scope holding the location records
    #[serde(default = "default_scope")]
    pub scope: String,
}

fn default_scope() -> String {
    "locations".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            scope: default_scope(),
        }
    }
}

/// Position source acquisition settings
#[derive(Debug, Clone, Deserialize)]
pub struct PositionConfig {
    #[serde(default = "default_high_accuracy")]
    pub high_accuracy: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_maximum_age_ms")]
    pub maximum_age_ms: u64,
}

fn default_high_accuracy() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_maximum_age_ms() -> u64 {
    0
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            high_accuracy: default_high_accuracy(),
            timeout_ms: default_timeout_ms(),
            maximum_age_ms: default_maximum_age_ms(),
        }
    }
}

impl PositionConfig {
    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            high_accuracy: self.high_accuracy,
            timeout_ms: self.timeout_ms,
            maximum_age_ms: self.maximum_age_ms,
        }
    }
}

/// Publisher settings
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PublisherConfig {
    /// Route written alongside each fix, if any
    #[serde(default)]
    pub route_label: Option<String>,
}

/// Map viewport settings
#[derive(Debug, Clone, Deserialize)]
pub struct MapConfig {
    /// Zoom level used by fly-to transitions
    #[serde(default = "default_fly_zoom")]
    pub fly_zoom: f64,
}

fn default_fly_zoom() -> f64 {
    16.0
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            fly_zoom: default_fly_zoom(),
        }
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &str) -> Result<FleetConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path))?;
    let config: FleetConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse '{}'", path))?;
    Ok(config)
}
