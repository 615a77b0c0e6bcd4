//! Shared types, error model, and configuration for Geoenrich.
//!
//! This crate is the foundation depended on by all other Geoenrich crates.
//! It provides:
//! - [`GeoenrichError`]: the unified error type
//! - Domain types ([`Record`], [`Location`], [`CacheEntry`], [`AddressFields`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], [`StageOptions`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CacheConfig, CacheWriteFailure, DEFAULT_BATCH_SIZE, DEFAULT_CACHE_COLLECTION,
    GeocodioConfig, PipelineConfig, PipelineDefaults, StageOptions, config_dir, config_file_path,
    init_config, load_config, load_config_from, resolve_api_key,
};
pub use error::{GeoenrichError, Result};
pub use types::{
    AddressFields, CacheEntry, GEOCODED_FIELD, LOCATION_FIELD, Location, REQUIRES_GEOCODE_FIELD,
    Record,
};
