//! Configuration management

use crate::error::{CbtsError, CbtsResult, ErrorContext};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Environment variable overriding `api.base_url`
pub const API_URL_ENV: &str = "CBTS_API_URL";

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// REST backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the REST API, e.g. `http://localhost:8000/api/`
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// User agent string
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/".to_string(),
            timeout_seconds: 30,
            user_agent: format!("cbts/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ApiConfig {
    /// Parsed base URL, always ending in `/` so relative endpoints join below it
    pub fn base_url(&self) -> CbtsResult<Url> {
        let mut raw = self.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).map_err(|e| CbtsError::Config {
            message: format!("Invalid API base URL '{}': {}", self.base_url, e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("parse_base_url")
                .with_suggestion("Set api.base_url to an absolute http(s) URL"),
        })
    }
}

/// Durable client storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the persisted session; `~` expands to the home directory
    pub session_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            session_dir: "~/.cbts/session".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn session_dir_path(&self) -> PathBuf {
        expand_home(&self.session_dir)
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

impl ClientConfig {
    /// Default config file location (`<config dir>/cbts/config.toml`)
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cbts")
            .join("config.toml")
    }

    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> CbtsResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CbtsError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("read_file")
                .with_suggestion("Check if the config file exists and is readable"),
        })?;

        let config: ClientConfig = toml::from_str(&content).map_err(|e| CbtsError::Config {
            message: format!("Failed to parse config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("parse_toml")
                .with_suggestion("Check TOML syntax in config file"),
        })?;

        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> CbtsResult<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> CbtsResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| CbtsError::Config {
            message: format!("Failed to serialize config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("serialize_toml"),
        })?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content).map_err(|e| CbtsError::Config {
            message: format!("Failed to write config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("write_file")
                .with_suggestion("Check if the directory exists and is writable"),
        })?;

        Ok(())
    }

    /// Apply `CBTS_API_URL` if set
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api.base_url = url;
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> CbtsResult<()> {
        let url = self.api.base_url()?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(crate::config_error!(
                format!("Unsupported URL scheme '{}'", url.scheme()),
                "config"
            ));
        }

        if self.api.timeout_seconds == 0 {
            return Err(CbtsError::Config {
                message: "api.timeout_seconds must be greater than 0".to_string(),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Set api.timeout_seconds to a positive value"),
            });
        }

        if self.storage.session_dir.trim().is_empty() {
            return Err(CbtsError::Config {
                message: "storage.session_dir must not be empty".to_string(),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Point storage.session_dir at a writable directory"),
            });
        }

        Ok(())
    }
}
