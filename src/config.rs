//! Runtime configuration.
//!
//! Values come from CLI flags / environment, an optional TOML file and
//! built-in defaults, in that order of precedence.
//!
//! File location:
//! - Linux: `~/.config/social-monitor/config.toml`
//! - macOS: `~/Library/Application Support/social-monitor/config.toml`
//! - Windows: `%APPDATA%\social-monitor\config.toml`

use crate::model::MonitorConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_NAME: &str = "social-monitor";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_STALE_AFTER_FAILURES: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,
    #[error("stale threshold must be at least one failed poll")]
    ZeroStaleThreshold,
}

/// Contents of `config.toml`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub base_url: Option<String>,
    pub auth_token: Option<String>,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
    pub stale_after_failures: Option<u32>,
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub auth_token: Option<String>,
    pub poll_interval: Option<Duration>,
    pub request_timeout: Option<Duration>,
    pub stale_after_failures: Option<u32>,
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME).join("config.toml"))
}

/// Where logs go while the dashboard owns the terminal.
pub fn log_file_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join(APP_NAME).join(format!("{APP_NAME}.log")))
}

/// Read the config file. An explicitly requested file must exist; the
/// default location is optional.
pub fn load_file(explicit: Option<&Path>) -> Result<FileConfig, ConfigError> {
    let (path, required) = match explicit {
        Some(p) => (p.to_path_buf(), true),
        None => match default_config_path() {
            Some(p) => (p, false),
            None => return Ok(FileConfig::default()),
        },
    };

    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("no config file at {}", path.display());
            return Ok(FileConfig::default());
        }
        Err(source) => return Err(ConfigError::Read { path, source }),
    };

    let file = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })?;
    log::info!("loaded config from {}", path.display());
    Ok(file)
}

/// Merge overrides over the file over the defaults.
pub fn resolve(overrides: Overrides, file: FileConfig) -> Result<MonitorConfig, ConfigError> {
    let poll_interval = overrides
        .poll_interval
        .or(file.poll_interval)
        .unwrap_or(DEFAULT_POLL_INTERVAL);
    if poll_interval.is_zero() {
        return Err(ConfigError::ZeroPollInterval);
    }

    let stale_after_failures = overrides
        .stale_after_failures
        .or(file.stale_after_failures)
        .unwrap_or(DEFAULT_STALE_AFTER_FAILURES);
    if stale_after_failures == 0 {
        return Err(ConfigError::ZeroStaleThreshold);
    }

    let base_url = overrides
        .base_url
        .or(file.base_url)
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    let auth_token = overrides
        .auth_token
        .or(file.auth_token)
        .filter(|t| !t.trim().is_empty());

    Ok(MonitorConfig {
        base_url,
        auth_token,
        poll_interval,
        request_timeout: overrides
            .request_timeout
            .or(file.request_timeout)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        stale_after_failures,
        user_agent: format!("{APP_NAME}/{}", env!("CARGO_PKG_VERSION")),
    })
}
