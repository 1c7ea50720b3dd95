use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stow_core::storage::{
    DEFAULT_ITERATIONS, DEFAULT_IV_SIZE, DEFAULT_NS_SIZE, DEFAULT_SALT_SIZE,
};
use stow_core::StorageArea;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StowConfig {
    pub storage: StorageSection,
    pub security: SecuritySection,
    pub mode: ModeSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub dir: Option<String>,
    pub area: Option<StorageArea>,
    pub namespace: Option<String>,
    pub all_copied: bool,
    pub copied_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    pub iterations: u32,
    pub salt_size: usize,
    pub iv_size: usize,
    pub ns_size: usize,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            salt_size: DEFAULT_SALT_SIZE,
            iv_size: DEFAULT_IV_SIZE,
            ns_size: DEFAULT_NS_SIZE,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeSection {
    pub web_app: bool,
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(xdg_config_dir()?.join("config.toml"))
}

pub fn default_data_dir() -> anyhow::Result<PathBuf> {
    xdg_data_dir()
}

/// Read the config, treating a missing file as all defaults.
pub fn load_config(path: &Path) -> anyhow::Result<StowConfig> {
    if !path.exists() {
        return Ok(StowConfig::default());
    }
    read_config(path)
}

pub fn read_config(path: &Path) -> anyhow::Result<StowConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
    toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), e))
}

pub fn xdg_config_dir() -> anyhow::Result<PathBuf> {
    if let Ok(value) = std::env::var("XDG_CONFIG_HOME") {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value).join("stow"));
        }
    }
    Ok(home_dir()?.join(".config").join("stow"))
}

pub fn xdg_data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(value) = std::env::var("XDG_DATA_HOME") {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value).join("stow"));
        }
    }
    Ok(home_dir()?.join(".local").join("share").join("stow"))
}

fn home_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| anyhow::anyhow!("HOME is not set; cannot resolve default paths"))?;
    Ok(PathBuf::from(home))
}
