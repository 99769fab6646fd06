use bb_client::{ApiConfig, ClientError};
use bb_core::DEFAULT_PLUGIN_ID;
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};

pub const DEFAULT_OCTOPRINT_URL: &str = "http://localhost:5000";

/// Contents of `config.toml`. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    pub octoprint_url: Option<String>,
    pub api_key: Option<String>,
    pub plugin_id: Option<String>,
    pub log_file: Option<PathBuf>,
}

/// Values from CLI flags or their environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub octoprint_url: Option<String>,
    pub api_key: Option<String>,
    pub plugin_id: Option<String>,
    pub log_file: Option<PathBuf>,
    pub debug: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub octoprint_url: String,
    pub api_key: Option<String>,
    pub plugin_id: String,
    pub log_file: Option<PathBuf>,
    pub debug: bool,
}

impl MonitorConfig {
    pub fn api_config(&self) -> Result<ApiConfig, ClientError> {
        Ok(ApiConfig::new(&self.octoprint_url)?
            .with_api_key(self.api_key.clone())
            .with_plugin_id(self.plugin_id.clone()))
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("bb-monitor").join("config.toml"))
}

pub fn load_file_config(path: &Path) -> io::Result<FileConfig> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(FileConfig::default()),
        Err(err) => return Err(err),
    };
    toml::from_str(&contents).map_err(|err| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{}: {err}", path.display()),
        )
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn resolve(overrides: Overrides, file: FileConfig) -> MonitorConfig {
    MonitorConfig {
        octoprint_url: non_empty(overrides.octoprint_url)
            .or_else(|| non_empty(file.octoprint_url))
            .unwrap_or_else(|| DEFAULT_OCTOPRINT_URL.to_string()),
        api_key: non_empty(overrides.api_key).or_else(|| non_empty(file.api_key)),
        plugin_id: non_empty(overrides.plugin_id)
            .or_else(|| non_empty(file.plugin_id))
            .unwrap_or_else(|| DEFAULT_PLUGIN_ID.to_string()),
        log_file: overrides.log_file.or(file.log_file),
        debug: overrides.debug,
    }
}
