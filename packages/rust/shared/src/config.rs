//! Application configuration for Geoenrich.
//!
//! User config lives at `~/.geoenrich/geoenrich.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GeoenrichError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "geoenrich.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".geoenrich";

/// Default number of records per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Cache collection holding every geocode entry.
pub const DEFAULT_CACHE_COLLECTION: &str = "geocodeio";

// ---------------------------------------------------------------------------
// Config structs (matching geoenrich.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Geocodio service settings.
    #[serde(default)]
    pub geocodio: GeocodioConfig,

    /// Pipeline defaults.
    #[serde(default)]
    pub pipeline: PipelineDefaults,

    /// Cache backend settings.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// `[geocodio]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodioConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Service base URL; `/geocode` is appended.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout for one batched geocode call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GeocodioConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_key_env() -> String {
    "GEOCODIO_API_KEY".into()
}
fn default_base_url() -> String {
    "https://api.geocod.io/v1.7".into()
}
fn default_timeout_secs() -> u64 {
    60
}

/// What to do when the cache write for a batch fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheWriteFailure {
    /// Abort the run with the cache error.
    #[default]
    Fail,
    /// Log the error and forward the already-enriched batch.
    Ignore,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefaults {
    /// Records per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Policy for failed cache writes.
    #[serde(default)]
    pub cache_write_failure: CacheWriteFailure,

    /// Capacity of the record channels feeding and draining the pipeline.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for PipelineDefaults {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            cache_write_failure: CacheWriteFailure::default(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_channel_capacity() -> usize {
    DEFAULT_BATCH_SIZE
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Path to the cache database. Empty means `~/.geoenrich/cache.db`.
    #[serde(default)]
    pub path: String,

    /// Collection (namespace) holding the geocode entries.
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            collection: default_collection(),
        }
    }
}

fn default_collection() -> String {
    DEFAULT_CACHE_COLLECTION.into()
}

impl CacheConfig {
    /// Resolve the database path, falling back to the config directory.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        if self.path.is_empty() {
            Ok(config_dir()?.join("cache.db"))
        } else {
            Ok(PathBuf::from(&self.path))
        }
    }
}

// ---------------------------------------------------------------------------
// Stage options and runtime pipeline config
// ---------------------------------------------------------------------------

/// Per-run stage options. `address` names the record field to geocode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOptions {
    pub address: String,
}

impl StageOptions {
    /// Reject options before any record is processed.
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(GeoenrichError::config(
                "stage option `address` is required and must be non-empty",
            ));
        }
        Ok(())
    }
}

/// Runtime pipeline configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Records per batch.
    pub batch_size: usize,
    /// Policy for failed cache writes.
    pub cache_write_failure: CacheWriteFailure,
    /// Capacity of the record channels.
    pub channel_capacity: usize,
    /// Upper bound on one geocode call; enforced by the geocoder stage,
    /// where an elapsed call counts as a failed service call.
    pub service_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            batch_size: config.pipeline.batch_size,
            cache_write_failure: config.pipeline.cache_write_failure,
            channel_capacity: config.pipeline.channel_capacity,
            service_timeout: Duration::from_secs(config.geocodio.timeout_secs),
        }
    }
}

impl PipelineConfig {
    /// Check numeric limits.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(GeoenrichError::config("batch_size must be greater than 0"));
        }
        if self.channel_capacity == 0 {
            return Err(GeoenrichError::config("channel_capacity must be greater than 0"));
        }
        if self.service_timeout.is_zero() {
            return Err(GeoenrichError::config("service timeout must be greater than 0"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.geoenrich/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| GeoenrichError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.geoenrich/geoenrich.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| GeoenrichError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        GeoenrichError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| GeoenrichError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| GeoenrichError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| GeoenrichError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the Geocodio API key from the configured env var.
pub fn resolve_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.geocodio.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(GeoenrichError::config(format!(
            "Geocodio API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://dash.geocod.io"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("batch_size"));
        assert!(toml_str.contains("GEOCODIO_API_KEY"));
        assert!(toml_str.contains("geocodeio"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.pipeline.batch_size, 1000);
        assert_eq!(parsed.pipeline.cache_write_failure, CacheWriteFailure::Fail);
        assert_eq!(parsed.geocodio.api_key_env, "GEOCODIO_API_KEY");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[pipeline]
batch_size = 250
cache_write_failure = "ignore"

[geocodio]
timeout_secs = 5
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        let runtime = PipelineConfig::from(&config);
        assert_eq!(runtime.batch_size, 250);
        assert_eq!(runtime.cache_write_failure, CacheWriteFailure::Ignore);
        assert_eq!(runtime.service_timeout, Duration::from_secs(5));
        assert_eq!(config.cache.collection, "geocodeio");
        assert_eq!(config.geocodio.base_url, "https://api.geocod.io/v1.7");
    }

    #[test]
    fn stage_options_require_address() {
        assert!(StageOptions { address: "addr".into() }.validate().is_ok());

        let err = StageOptions { address: "  ".into() }.validate().unwrap_err();
        assert!(err.to_string().contains("address"));
    }

    #[test]
    fn zero_batch_size_rejected() {
        let config = PipelineConfig {
            batch_size: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_service_timeout_rejected() {
        let config = PipelineConfig {
            service_timeout: Duration::ZERO,
            ..PipelineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn explicit_cache_path_wins() {
        let cache = CacheConfig {
            path: "/tmp/geo.db".into(),
            ..CacheConfig::default()
        };
        assert_eq!(cache.resolved_path().unwrap(), PathBuf::from("/tmp/geo.db"));
    }

    #[test]
    fn api_key_resolution() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.geocodio.api_key_env = "GE_TEST_NONEXISTENT_KEY_12345".into();
        let result = resolve_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
