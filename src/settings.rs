//! Settings persistence module
//!
//! Saves and loads client settings to/from disk

use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_FILE: &str = "settings.json";
const APP_NAME: &str = "EquityCompass";

/// Environment variable overriding the API base URL
pub const API_URL_ENV: &str = "EQUITYCOMPASS_API_URL";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Could not determine settings directory")]
    NoConfigDir,

    #[error("Failed to write settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Client settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSettings {
    /// Base URL of the REST API, e.g. "https://equitycompass.example/api"
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Requests slower than this are abandoned as unreachable
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Where the session file lives (None = local data dir)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Write logs to a file in the data dir instead of stderr
    #[serde(default)]
    pub log_to_file: bool,
}

fn default_api_base_url() -> String {
    "http://localhost:5000/api".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("EquityCompass-Client/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
            data_dir: None,
            log_to_file: false,
        }
    }
}

impl ClientSettings {
    /// Apply an API URL override; blank values are ignored
    pub fn with_api_url_override(mut self, url: Option<String>) -> Self {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            info!("API base URL overridden: {}", url);
            self.api_base_url = url.trim().to_string();
        }
        self
    }

    /// Data directory, falling back to `<local data dir>/EquityCompass`
    pub fn resolved_data_dir(&self) -> Option<PathBuf> {
        self.data_dir
            .clone()
            .or_else(|| dirs::data_local_dir().map(|d| d.join(APP_NAME)))
    }
}

/// Get the settings directory path
fn get_settings_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_NAME))
}

/// Load settings from disk, then apply the environment override
pub fn load_settings() -> ClientSettings {
    let settings = match get_settings_dir() {
        Some(dir) => load_settings_from(&dir),
        None => {
            debug!("Could not determine settings path, using defaults");
            ClientSettings::default()
        }
    };
    settings.with_api_url_override(std::env::var(API_URL_ENV).ok())
}

/// Load `settings.json` from `dir`; missing or unreadable files give defaults
pub fn load_settings_from(dir: &Path) -> ClientSettings {
    let path = dir.join(SETTINGS_FILE);
    if !path.exists() {
        debug!("Settings file does not exist, using defaults");
        return ClientSettings::default();
    }

    match fs::read_to_string(&path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(settings) => {
                info!("Loaded settings from {:?}", path);
                settings
            }
            Err(e) => {
                error!("Failed to parse settings file: {}", e);
                ClientSettings::default()
            }
        },
        Err(e) => {
            error!("Failed to read settings file: {}", e);
            ClientSettings::default()
        }
    }
}

/// Save settings to disk
pub fn save_settings(settings: &ClientSettings) -> Result<(), SettingsError> {
    let dir = get_settings_dir().ok_or(SettingsError::NoConfigDir)?;
    save_settings_to(&dir, settings)
}

pub fn save_settings_to(dir: &Path, settings: &ClientSettings) -> Result<(), SettingsError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(SETTINGS_FILE);
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(&path, json)?;
    info!("Saved settings to {:?}", path);
    Ok(())
}
