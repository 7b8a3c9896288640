use std::path::{Path, PathBuf};

use crate::config::types::SandlotConfig;
use crate::error::{Result, SandlotError};

/// Get the default configuration file path
pub fn get_config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "sandlot", "sandlot") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        // Fallback to home directory
        dirs_fallback().join(".sandlot").join("config.toml")
    }
}

fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(config_path: Option<&Path>) -> Result<SandlotConfig> {
    let path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(get_config_path);

    if !path.exists() {
        // Return defaults if no config file exists
        return Ok(SandlotConfig::default());
    }

    let content = std::fs::read_to_string(&path)?;
    let config: SandlotConfig =
        toml::from_str(&content).map_err(|e| SandlotError::TomlParse(e.to_string()))?;

    Ok(config)
}

/// Get the cache directory for generated export forms
pub fn get_cache_dir() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "sandlot", "sandlot") {
        proj_dirs.cache_dir().to_path_buf()
    } else {
        dirs_fallback().join(".cache").join("sandlot")
    }
}

/// Get the data directory for local session workspaces
pub fn get_data_dir() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "sandlot", "sandlot") {
        proj_dirs.data_dir().to_path_buf()
    } else {
        dirs_fallback().join(".local").join("share").join("sandlot")
    }
}
