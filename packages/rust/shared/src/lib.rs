//! Shared types, error model, and configuration for assetweave.
//!
//! This crate is the foundation depended on by all other assetweave crates.
//! It provides:
//! - [`AssetweaveError`], the unified error type
//! - Domain types ([`VFile`], [`AssetGroup`], [`Extraction`], [`SearchPath`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CONFIG_FILE_NAME, DefaultsConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from,
};
pub use error::{AssetweaveError, Result};
pub use types::{
    AssetGroup, Contents, DEFAULT_TYPES, Extraction, GroupSpec, SearchPath, StreamBody, VFile,
};
