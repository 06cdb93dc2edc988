//! Configuration for dashctl.
//!
//! Sources, lowest to highest priority:
//!
//! 1. Defaults (from `#[serde(default)]` attributes)
//! 2. TOML config file (if it exists)
//! 3. Environment variables (prefix: `DASHCTL_`, nested with `__`)
//!
//! - `DASHCTL_API__URL` → `api.url`
//! - `DASHCTL_API__TIMEOUT_SECS` → `api.timeout_secs`
//! - `DASHCTL_STORAGE__TOKEN_DIR` → `storage.token_dir`

use anyhow::{Context, Result};
use dashboard_session::FileTokenStore;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_NAME: &str = "dashctl";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Dashboard API settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// Base URL the `/auth/*` routes are mounted under.
    #[serde(default = "default_api_url")]
    pub url: String,

    /// Request timeout. Unset means the HTTP client default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Accept self-signed certificates (development servers only).
    #[serde(default)]
    pub allow_invalid_tls: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: default_api_url(),
            timeout_secs: None,
            allow_invalid_tls: false,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

fn default_api_url() -> String {
    "http://localhost:8000/".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory holding the persisted access token. Logs go to `logs/` below it.
    #[serde(default = "default_token_dir")]
    pub token_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            token_dir: default_token_dir(),
        }
    }
}

impl StorageConfig {
    pub fn log_dir(&self) -> PathBuf {
        self.token_dir.join("logs")
    }
}

/// - macOS: `~/Library/Application Support/dashctl/`
/// - Linux: `~/.local/share/dashctl/`
fn default_token_dir() -> PathBuf {
    FileTokenStore::default_path(APP_NAME)
}

impl Config {
    /// Load from `path` (if present) with environment overrides applied.
    pub fn load(path: &Path) -> Result<Self> {
        let mut figment = Figment::new();

        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("DASHCTL_").split("__"));

        let mut config: Config = figment.extract().with_context(|| {
            format!(
                "Failed to load config from {} and environment",
                path.display()
            )
        })?;

        config.storage.token_dir = expand_tilde(&config.storage.token_dir);

        Ok(config)
    }

    /// Write this configuration as TOML, creating the parent directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;

        Ok(())
    }

    /// Get the default configuration file path.
    ///
    /// - macOS: `~/Library/Application Support/dashctl/config.toml`
    /// - Linux: `~/.config/dashctl/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_NAME)
            .join("config.toml")
    }
}

/// Expand ~ to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(path_str) = path.to_str()
        && let Some(rest) = path_str.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}
