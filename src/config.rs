//! # Configuration
//!
//! Engine settings loaded from a JSON file. Every field has a default, so an
//! empty object (or [`EngineConfig::default`]) is a valid configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::parsers::{BackendTier, ShortRowPolicy};

/// Main configuration structure
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub parser: ParserConfig,
    pub cache: CacheConfig,
    pub backend: BackendConfig,
    pub loader: LoaderConfig,
}

/// Data block parsing options
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ParserConfig {
    pub short_row_policy: ShortRowPolicy,
    pub delimiter: char,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            short_row_policy: ShortRowPolicy::Reject,
            delimiter: ',',
        }
    }
}

/// When cache artifacts are written after a parse
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheWriteMode {
    /// Write on a separate thread; the parsed table is returned immediately
    #[default]
    Background,
    /// Finish the write before returning
    Blocking,
}

/// Parse cache settings
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Defaults to the platform cache directory
    pub directory: Option<PathBuf>,
    pub write_mode: CacheWriteMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
            write_mode: CacheWriteMode::Background,
        }
    }
}

impl CacheConfig {
    /// Configured directory, or `<platform cache dir>/tracklog/parsed`
    pub fn resolved_directory(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.directory {
            return Some(dir.clone());
        }
        directories::ProjectDirs::from("", "", "tracklog").map(|dirs| dirs.cache_dir().join("parsed"))
    }
}

/// Backend probing settings
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Tiers to leave out when probing
    pub disabled_tiers: Vec<BackendTier>,
    /// Thread count for the parallel tier; defaults to the hardware threads
    pub parallel_threads: Option<usize>,
}

/// Background loader settings
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Size of the loader's worker pool; defaults to rayon's choice
    pub worker_threads: Option<usize>,
}

impl EngineConfig {
    /// Load configuration from a JSON file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - JSON parsing fails
    /// - Validation fails
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let delimiter = self.parser.delimiter;
        if delimiter.is_alphanumeric() || matches!(delimiter, ':' | '.' | '-' | '+' | '\n' | '\r') {
            return Err(ConfigError::Invalid(format!(
                "delimiter {:?} collides with timestamp or number syntax",
                delimiter
            )));
        }

        if self.backend.parallel_threads == Some(0) {
            return Err(ConfigError::Invalid(
                "backend.parallel_threads must be at least 1".to_string(),
            ));
        }

        if self.loader.worker_threads == Some(0) {
            return Err(ConfigError::Invalid(
                "loader.worker_threads must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
