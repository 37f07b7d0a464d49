//! Configuration management

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default CLI port of the server.
pub const DEFAULT_CLI_PORT: u16 = 9090;

/// Default HTTP port, used for artwork URLs until the server reports its own.
pub const DEFAULT_HTTP_PORT: u16 = 9000;

const STATE_FILE: &str = "state.json";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// `host[:port]` of the CLI endpoint
    #[serde(default)]
    pub server: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_page_size")]
    pub page_size: usize,

    #[serde(default = "default_max_list_size")]
    pub max_list_size: usize,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,
}

fn default_page_size() -> usize {
    20
}

fn default_max_list_size() -> usize {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    1500
}

fn default_true() -> bool {
    true
}

fn default_discovery_timeout_ms() -> u64 {
    3000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: None,
            username: None,
            password: None,
            page_size: default_page_size(),
            max_list_size: default_max_list_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
            auto_reconnect: true,
            discovery_timeout_ms: default_discovery_timeout_ms(),
        }
    }
}

impl Config {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    /// Credentials, only when both halves are present.
    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) if !user.is_empty() => Some((user.clone(), pass.clone())),
            _ => None,
        }
    }
}

/// Get config directory (SQR_CONFIG_DIR or platform default)
pub fn get_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SQR_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library/Application Support/squeeze-remote");
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join("squeeze-remote");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".config/squeeze-remote");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("squeeze-remote");
        }
    }

    // Fallback to current directory
    PathBuf::from(".")
}

pub fn get_state_file_path() -> PathBuf {
    get_config_dir().join(STATE_FILE)
}

pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir();

    let mut builder = ::config::Config::builder()
        .set_default("page_size", default_page_size() as i64)?
        .set_default("max_list_size", default_max_list_size() as i64)?
        .set_default("connect_timeout_ms", default_connect_timeout_ms() as i64)?
        .set_default("auto_reconnect", true)?
        .set_default("discovery_timeout_ms", default_discovery_timeout_ms() as i64)?
        // Load from config file if it exists
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        // Override with environment variables (SQR_SERVER, SQR_PAGE_SIZE, etc.)
        .add_source(
            ::config::Environment::with_prefix("SQR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    // Legacy LMS_HOST/LMS_CLI_PORT, only when SQR_SERVER is not set
    if std::env::var("SQR_SERVER").is_err() {
        if let Ok(host) = std::env::var("LMS_HOST") {
            let server = match std::env::var("LMS_CLI_PORT") {
                Ok(port) if port.parse::<u16>().is_ok() => format!("{}:{}", host, port),
                _ => host,
            };
            builder = builder.set_override("server", server)?;
        }
    }

    let config: Config = builder.build()?.try_deserialize()?;

    if config.page_size == 0 {
        anyhow::bail!("page_size must be at least 1");
    }

    Ok(config)
}

/// State persisted between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedState {
    #[serde(default)]
    pub last_player_id: Option<String>,
}

impl SavedState {
    /// Read the state file. A missing or unreadable file yields the default.
    pub fn load_from(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&content) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("Ignoring corrupt state file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
