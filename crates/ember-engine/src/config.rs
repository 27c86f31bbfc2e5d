//! Engine configuration (ember.toml)
//!
//! Every section and field is optional; missing values fall back to the
//! constants in [`crate::defaults`].

use crate::defaults::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to render TOML
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Validation error
    #[error("Invalid config: {0}")]
    ValidationError(String),
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Uninstall coordinator settings
    #[serde(default)]
    pub uninstall: UninstallConfig,

    /// Collector settings
    #[serde(default)]
    pub gc: GcConfig,

    /// Diagnostic output settings
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

/// Uninstall coordinator settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UninstallConfig {
    /// Run the advisory reachability sweep on uninstall
    #[serde(default = "default_sweep")]
    pub sweep: bool,

    /// Skip the sweep when the heap holds more live objects than this (0 = unlimited)
    #[serde(default)]
    pub max_sweep_objects: usize,

    /// Collect right after the uninstall completes
    #[serde(default = "default_collect")]
    pub collect: bool,
}

fn default_sweep() -> bool {
    DEFAULT_SWEEP_ON_UNINSTALL
}

fn default_collect() -> bool {
    DEFAULT_COLLECT_ON_UNINSTALL
}

impl Default for UninstallConfig {
    fn default() -> Self {
        Self {
            sweep: default_sweep(),
            max_sweep_objects: DEFAULT_MAX_SWEEP_OBJECTS,
            collect: default_collect(),
        }
    }
}

/// Collector settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GcConfig {
    /// Allocations between automatic collections
    #[serde(default = "default_threshold_objects")]
    pub threshold_objects: usize,

    /// Live object limit (0 = unlimited)
    #[serde(default)]
    pub max_objects: usize,
}

fn default_threshold_objects() -> usize {
    DEFAULT_GC_THRESHOLD_OBJECTS
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            threshold_objects: default_threshold_objects(),
            max_objects: DEFAULT_MAX_OBJECTS,
        }
    }
}

/// Diagnostic output settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DiagnosticsConfig {
    /// Log every stale reference a collection finds
    #[serde(default)]
    pub verbose_stale_refs: bool,
}

impl EngineConfig {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn from_file_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gc.threshold_objects == 0 {
            return Err(ConfigError::ValidationError(
                "gc.threshold_objects must be greater than zero".to_string(),
            ));
        }

        if self.gc.max_objects != 0 && self.gc.max_objects < self.gc.threshold_objects {
            return Err(ConfigError::ValidationError(format!(
                "gc.max_objects ({}) must be 0 or at least gc.threshold_objects ({})",
                self.gc.max_objects, self.gc.threshold_objects
            )));
        }

        Ok(())
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
