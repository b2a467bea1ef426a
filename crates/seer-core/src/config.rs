//! Server configuration, loadable from TOML.
//!
//! ```toml
//! [entity]
//! measurement_capacity = 5
//!
//! [merge]
//! enabled = true
//! stale_age = 5.0
//! overlap_threshold = 0.5
//!
//! [apply]
//! mode = "best_effort"   # or "atomic"
//!
//! [runtime]
//! shutdown_timeout_ms = 2000
//! id_seed = 42           # optional; omit for random ids
//!
//! [perception]
//! enabled = true
//! max_workers = 4
//! positive_threshold = 0.5
//!
//! [[perception.sizes]]
//! label = "chair"
//! min_height = 0.7
//! max_height = 1.1
//! min_width = 0.4
//! max_width = 0.9
//!
//! [[plugins]]
//! name = "percepts"
//! kind = "footprint"
//! frequency = 10.0
//!
//! [[plugins]]
//! name = "cleanup"
//! kind = "reaper"
//! frequency = 1.0
//! [plugins.parameters]
//! max_age = 30.0
//! ```
//!
//! Every section and field is optional; missing values take the defaults
//! shown above (perception is off by default and there are no plugins).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::entity::DEFAULT_MEASUREMENT_CAPACITY;
use crate::error::{Result, SeerError};
use crate::merge::{DEFAULT_OVERLAP_THRESHOLD, DEFAULT_STALE_AGE};
use crate::perception::{SizeModel, DEFAULT_POSITIVE_THRESHOLD};
use crate::store::ApplyMode;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Entity settings.
    pub entity: EntityConfig,
    /// Merge pass settings.
    pub merge: MergeConfig,
    /// Update-request application settings.
    pub apply: ApplyConfig,
    /// Runtime settings.
    pub runtime: RuntimeConfig,
    /// Perception stage settings.
    pub perception: PerceptionConfig,
    /// Plugin instances, in dispatch order.
    pub plugins: Vec<PluginConfig>,
}

impl ServerConfig {
    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`SeerError::Toml`] for malformed TOML and
    /// [`SeerError::Config`] for invalid values.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Checks value ranges and plugin name uniqueness.
    ///
    /// # Errors
    ///
    /// Returns [`SeerError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.entity.measurement_capacity == 0 {
            return Err(SeerError::Config("entity.measurement_capacity must be at least 1".to_string()));
        }
        if self.merge.stale_age.is_nan() || self.merge.stale_age < 0.0 {
            return Err(SeerError::Config("merge.stale_age must be non-negative".to_string()));
        }
        if !(0.0..=1.0).contains(&self.merge.overlap_threshold) {
            return Err(SeerError::Config("merge.overlap_threshold must be within [0, 1]".to_string()));
        }
        if self.perception.max_workers == 0 {
            return Err(SeerError::Config("perception.max_workers must be at least 1".to_string()));
        }
        for size in &self.perception.sizes {
            if size.min_height > size.max_height || size.min_width > size.max_width {
                return Err(SeerError::Config(format!("perception size '{}' has min above max", size.label)));
            }
        }

        let mut names = std::collections::BTreeSet::new();
        for plugin in &self.plugins {
            if plugin.name.is_empty() {
                return Err(SeerError::Config("plugin name must not be empty".to_string()));
            }
            if !names.insert(plugin.name.as_str()) {
                return Err(SeerError::Config(format!("duplicate plugin name '{}'", plugin.name)));
            }
            if plugin.frequency.is_nan() || plugin.frequency < 0.0 {
                return Err(SeerError::Config(format!("plugin '{}': frequency must be non-negative", plugin.name)));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Entity settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityConfig {
    /// Measurement history length per entity.
    pub measurement_capacity: usize,
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            measurement_capacity: DEFAULT_MEASUREMENT_CAPACITY,
        }
    }
}

/// Merge pass settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Whether the merge pass runs each cycle.
    pub enabled: bool,
    /// Seconds without measurements before an entity may be merged.
    pub stale_age: f64,
    /// Overlap fraction that must be exceeded to merge.
    pub overlap_threshold: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_age: DEFAULT_STALE_AGE,
            overlap_threshold: DEFAULT_OVERLAP_THRESHOLD,
        }
    }
}

/// Update-request application settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    /// How references to unknown entities are treated.
    pub mode: ApplyMode,
}

/// Runtime settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How long shutdown waits for each running execution.
    pub shutdown_timeout_ms: u64,
    /// Seed for entity id generation; random when absent.
    pub id_seed: Option<u64>,
}

impl RuntimeConfig {
    /// Shutdown timeout as a duration.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: 2000,
            id_seed: None,
        }
    }
}

/// Perception stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptionConfig {
    /// Whether the perception stage runs.
    pub enabled: bool,
    /// Maximum entities processed concurrently.
    pub max_workers: usize,
    /// Score a labelled result must exceed to count.
    pub positive_threshold: f64,
    /// Size models for the size matcher.
    pub sizes: Vec<SizeModel>,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_workers: 4,
            positive_threshold: DEFAULT_POSITIVE_THRESHOLD,
            sizes: Vec::new(),
        }
    }
}

/// One `[[plugins]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Unique instance name.
    pub name: String,
    /// Registered plugin kind.
    pub kind: String,
    /// Dispatch frequency in Hz; `0` means every cycle.
    #[serde(default)]
    pub frequency: f64,
    /// Kind-specific parameters handed to `Plugin::configure`.
    #[serde(default)]
    pub parameters: toml::Table,
}
