//! Application configuration management.
//!
//! Handles loading, saving, and validating quest configuration including:
//! - Backend base URL and request timeout
//! - The "within range" threshold and optional prompt re-arm timer
//! - Signal strength normalization bounds
//! - The radio device-name allow-list
//! - Location watch accuracy and minimum movement
//!
//! Sources are layered with the `config` crate: built-in defaults, then an
//! optional TOML file, then `QUEST__SECTION__KEY` environment variables.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Environment variable prefix for overrides (`QUEST__API__BASE_URL`, ...).
pub const ENV_PREFIX: &str = "QUEST";

/// Errors produced while loading, saving, or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The file exists but could not be read.
    #[error("failed to read {}: {source}", path.display())]
    ReadError {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file could not be written.
    #[error("failed to write {}: {source}", path.display())]
    WriteError {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Layered sources could not be merged or deserialized.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// The configuration could not be serialized to TOML.
    #[error("failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field holds an invalid value.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields hold invalid values.
    #[error("{} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        Self::ParseError(err.to_string())
    }
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestConfig {
    /// Backend connection settings.
    pub api: ApiConfig,
    /// Proximity decision settings.
    pub proximity: ProximityConfig,
    /// Signal strength normalization.
    pub signal: SignalConfig,
    /// Radio scan filtering.
    pub radio: RadioConfig,
    /// Location watch settings.
    pub location: LocationConfig,
}

/// Backend connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the REST API, including the `/api` path.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://localhost:8000/api/".to_string(),
            timeout_secs: 15,
        }
    }
}

impl ApiConfig {
    /// Parsed base URL, always with a trailing slash so endpoint joins append.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not an absolute URL.
    pub fn base_url(&self) -> std::result::Result<Url, url::ParseError> {
        let mut raw = self.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw)
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Proximity decision settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    /// Distance at or below which a beacon counts as "within range".
    pub within_range_metres: f64,
    /// Re-arm the near prompt after this long inside range. `None` re-arms
    /// only after leaving range.
    pub renotify_after_secs: Option<u64>,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            within_range_metres: 100.0,
            renotify_after_secs: None,
        }
    }
}

impl ProximityConfig {
    /// Re-arm timer as a [`Duration`].
    #[must_use]
    pub fn renotify_after(&self) -> Option<Duration> {
        self.renotify_after_secs.map(Duration::from_secs)
    }
}

/// Signal strength normalization bounds, in dBm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Reading mapped to 0%.
    pub floor_dbm: i16,
    /// Reading mapped to 100%.
    pub ceiling_dbm: i16,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            floor_dbm: -100,
            ceiling_dbm: -50,
        }
    }
}

/// Radio scan filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// A device qualifies if its advertised name contains any of these.
    pub name_tokens: Vec<String>,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            name_tokens: vec!["Beacon".to_string()],
        }
    }
}

/// Requested accuracy for location fixes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accuracy {
    /// GPS-grade fixes.
    #[default]
    High,
    /// Network-assisted fixes.
    Balanced,
    /// Coarse fixes.
    Low,
}

impl fmt::Display for Accuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => f.write_str("high"),
            Self::Balanced => f.write_str("balanced"),
            Self::Low => f.write_str("low"),
        }
    }
}

/// Location watch settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Requested fix accuracy.
    pub accuracy: Accuracy,
    /// Minimum movement between delivered fixes.
    pub min_distance_metres: f64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            accuracy: Accuracy::High,
            min_distance_metres: 10.0,
        }
    }
}

impl QuestConfig {
    /// Load configuration from defaults, an optional file, and the environment.
    ///
    /// A missing file is not an error unless `required` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result fails
    /// validation.
    pub fn load(path: Option<&Path>, required: bool) -> ConfigResult<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path(),
        };

        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            if required && !path.exists() {
                return Err(ConfigError::NotFound(path));
            }
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }

        let loaded: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("radio.name_tokens")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Parse configuration from a TOML string, filling gaps with defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or fails validation.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let parsed: Self =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Save configuration to disk as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check every field, reporting all problems at once.
    ///
    /// # Errors
    ///
    /// Returns the single error, or `MultipleValidationErrors` when several
    /// fields are invalid.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut invalid = |field: &str, message: String| {
            errors.push(ConfigError::ValidationError {
                field: field.to_string(),
                message,
            });
        };

        if let Err(e) = self.api.base_url() {
            invalid("api.base_url", e.to_string());
        }
        if self.api.timeout_secs == 0 {
            invalid("api.timeout_secs", "must be greater than zero".to_string());
        }
        if !(self.proximity.within_range_metres.is_finite()
            && self.proximity.within_range_metres > 0.0)
        {
            invalid(
                "proximity.within_range_metres",
                format!("must be positive (got {})", self.proximity.within_range_metres),
            );
        }
        if self.proximity.renotify_after_secs == Some(0) {
            invalid(
                "proximity.renotify_after_secs",
                "must be greater than zero when set".to_string(),
            );
        }
        if self.signal.floor_dbm >= self.signal.ceiling_dbm {
            invalid(
                "signal.floor_dbm",
                format!(
                    "must be below ceiling_dbm ({} >= {})",
                    self.signal.floor_dbm, self.signal.ceiling_dbm
                ),
            );
        }
        if self.radio.name_tokens.iter().all(|t| t.trim().is_empty()) {
            invalid(
                "radio.name_tokens",
                "at least one non-empty token is required".to_string(),
            );
        }
        if !(self.location.min_distance_metres.is_finite()
            && self.location.min_distance_metres >= 0.0)
        {
            invalid(
                "location.min_distance_metres",
                format!(
                    "must be zero or positive (got {})",
                    self.location.min_distance_metres
                ),
            );
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

/// Platform config file location (`~/.config/beacon-quest/config.toml` on Linux).
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "beacon-quest")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}
