//! Processing configuration.
//!
//! Groups the knobs that are not properties of a single array: worker pool
//! sizing for per-slice mapping, tolerances for coordinate comparisons, the
//! default rebinning policy and how masks are persisted. The configuration is
//! stored as versioned JSON.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::data::{Margin, MaskPolicy};

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,
    /// Errors and warnings (coordinate repairs are warnings)
    Warn,
    /// Progress of long operations
    #[default]
    Info,
    /// Per-operation details
    Debug,
    /// Everything
    Trace,
}

impl LogLevel {
    /// Convert to the `log` crate's filter.
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Current configuration file format version.
pub const CONFIG_VERSION: u32 = 1;

/// Settings shared by processing runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Version of the configuration file format
    pub version: u32,

    /// Log verbosity
    #[serde(default)]
    pub log_level: LogLevel,

    /// Explicit worker count for parallel mapping (overrides the CPU-based size)
    #[serde(default)]
    pub workers: Option<usize>,

    /// CPUs left free when the worker count is derived from the machine
    #[serde(default = "default_reserved_cpus")]
    pub reserved_cpus: usize,

    /// Absolute tolerance used when comparing coordinate descriptors
    #[serde(default = "default_coordinate_tolerance")]
    pub coordinate_tolerance: f64,

    /// Where excess pixels go when a rebin factor does not divide the axis
    #[serde(default)]
    pub rebin_margin: Margin,

    /// Add flux-conserving margin cells instead of truncating
    #[serde(default)]
    pub rebin_flux: bool,

    /// How masks are written to a backing store
    #[serde(default)]
    pub mask_policy: MaskPolicy,

    /// Log progress while mapping over slices
    #[serde(default)]
    pub progress: bool,
}

fn default_reserved_cpus() -> usize {
    1
}

fn default_coordinate_tolerance() -> f64 {
    crate::coords::DEFAULT_TOLERANCE
}

impl ProcessingConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self {
            version: CONFIG_VERSION,
            log_level: LogLevel::default(),
            workers: None,
            reserved_cpus: default_reserved_cpus(),
            coordinate_tolerance: default_coordinate_tolerance(),
            rebin_margin: Margin::default(),
            rebin_flux: false,
            mask_policy: MaskPolicy::default(),
            progress: false,
        }
    }

    /// Number of workers to use for parallel mapping.
    ///
    /// An explicit `workers` value wins when it is below the CPU count;
    /// otherwise the pool is sized to the available CPUs minus the reserve,
    /// never less than one.
    pub fn worker_count(&self) -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        match self.workers {
            Some(n) if n > 0 && n < cpus => n,
            _ => cpus.saturating_sub(self.reserved_cpus).max(1),
        }
    }

    /// Serialize the configuration to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;

        if config.version > CONFIG_VERSION {
            return Err(ConfigError::VersionTooNew {
                file_version: config.version,
                supported_version: CONFIG_VERSION,
            });
        }
        if !(config.coordinate_tolerance >= 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "coordinate_tolerance",
                message: format!("must be a non-negative number, got {}", config.coordinate_tolerance),
            });
        }

        Ok(config)
    }

    /// Get the default filename for the configuration.
    pub fn default_filename() -> &'static str {
        "ifucube.json"
    }

    /// Default configuration path (XDG config directory, then `~/.config`).
    pub fn default_path() -> Option<PathBuf> {
        if let Some(config_dir) = dirs::config_dir() {
            Some(config_dir.join("ifucube").join(Self::default_filename()))
        } else {
            dirs::home_dir().map(|home| {
                home.join(".config")
                    .join("ifucube")
                    .join(Self::default_filename())
            })
        }
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load from the default path, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            log::debug!("No config file found at {:?}", path);
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Failed to load config file {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Save the configuration, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = self.to_json()?;
        std::fs::write(path, json)?;
        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Configuration version is newer than supported
    #[error(
        "Configuration file version {file_version} is newer than supported version {supported_version}"
    )]
    VersionTooNew {
        file_version: u32,
        supported_version: u32,
    },

    /// A field holds a value outside its domain
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },

    /// I/O error when reading/writing config
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_round_trip() {
        let config = ProcessingConfig::new();
        let json = config.to_json().unwrap();
        let parsed = ProcessingConfig::from_json(&json).unwrap();
        assert_eq!(parsed.version, CONFIG_VERSION);
        assert_eq!(parsed.reserved_cpus, 1);
        assert_eq!(parsed.rebin_margin, Margin::Center);
        assert_eq!(parsed.mask_policy, MaskPolicy::Layer);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let parsed = ProcessingConfig::from_json(r#"{"version": 1}"#).unwrap();
        assert_eq!(parsed.log_level, LogLevel::Info);
        assert!(parsed.workers.is_none());
        assert!(!parsed.rebin_flux);
    }

    #[test]
    fn test_rejects_newer_version() {
        let err = ProcessingConfig::from_json(r#"{"version": 99}"#).unwrap_err();
        assert!(matches!(err, ConfigError::VersionTooNew { file_version: 99, .. }));
    }

    #[test]
    fn test_rejects_negative_tolerance() {
        let err = ProcessingConfig::from_json(r#"{"version": 1, "coordinate_tolerance": -1.0}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_worker_count_is_positive() {
        let mut config = ProcessingConfig::new();
        assert!(config.worker_count() >= 1);
        config.reserved_cpus = 10_000;
        assert_eq!(config.worker_count(), 1);
        config.workers = Some(1);
        assert_eq!(config.worker_count(), 1);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = ProcessingConfig::new();
        config.rebin_flux = true;
        config.mask_policy = MaskPolicy::Nan;
        config.save(&path).unwrap();

        let loaded = ProcessingConfig::load(&path).unwrap();
        assert!(loaded.rebin_flux);
        assert_eq!(loaded.mask_policy, MaskPolicy::Nan);
    }
}
