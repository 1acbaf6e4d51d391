//! Application configuration for assetweave.
//!
//! User config lives at `~/.assetweave/assetweave.toml`; a project-level
//! `assetweave.toml` in the working directory replaces it when present.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AssetweaveError, Result};
use crate::types::{DEFAULT_TYPES, SearchPath};

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "assetweave.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".assetweave";

// ---------------------------------------------------------------------------
// Config structs (matching assetweave.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Build defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Asset types to process.
    #[serde(default = "default_types")]
    pub types: Vec<String>,

    /// Default search root(s) for references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_path: Option<SearchPath>,

    /// Output directory that group outputs are relocated under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<PathBuf>,

    /// Emit each resolved file instead of concatenating groups.
    #[serde(default)]
    pub noconcat: bool,

    /// Emit only rewritten documents.
    #[serde(default)]
    pub no_assets: bool,

    /// Separator inserted between concatenated files.
    #[serde(default = "default_newline")]
    pub newline: String,

    /// Globs whose files are fed in as additional streams.
    #[serde(default)]
    pub additional: Vec<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            types: default_types(),
            search_path: None,
            base: None,
            noconcat: false,
            no_assets: false,
            newline: default_newline(),
            additional: Vec::new(),
        }
    }
}

fn default_types() -> Vec<String> {
    DEFAULT_TYPES.iter().map(|t| t.to_string()).collect()
}
fn default_newline() -> String {
    "\n".into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.assetweave/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| AssetweaveError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the user config file (`~/.assetweave/assetweave.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the config for a project rooted at `cwd`.
///
/// Looks for `<cwd>/assetweave.toml` first, then the user config.
/// Returns defaults if neither exists.
pub fn load_config(cwd: &Path) -> Result<AppConfig> {
    let project = cwd.join(CONFIG_FILE_NAME);
    if project.exists() {
        return load_config_from(&project);
    }

    let path = config_file_path()?;
    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| AssetweaveError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        AssetweaveError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate(&config)?;
    Ok(config)
}

/// Write a default config file into `dir`. Returns the path to the created file.
pub fn init_config(dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| AssetweaveError::io(dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| AssetweaveError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| AssetweaveError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

fn validate(config: &AppConfig) -> Result<()> {
    if config.defaults.types.iter().any(|t| t.trim().is_empty()) {
        return Err(AssetweaveError::config("asset types must not be empty strings"));
    }
    if let Some(SearchPath::Alternatives(dirs)) = &config.defaults.search_path {
        if dirs.is_empty() {
            return Err(AssetweaveError::config("search_path list must not be empty"));
        }
    }
    Ok(())
}
