use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_CONFIG_FILE: &str = ".runlog/config.toml";
const DEFAULT_SYNC_TIMEOUT_MS: u64 = 30_000;

pub const CONFIG_PATH_ENV: &str = "RUNLOG_CONFIG";
pub const REMOTE_URL_ENV: &str = "TURSO_DATABASE_URL";
pub const REMOTE_TOKEN_ENV: &str = "TURSO_AUTH_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunlogConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory that receives the per-process replica files. Defaults to the
    /// system temp dir.
    #[serde(default)]
    pub replica_dir: Option<PathBuf>,
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
    #[serde(default)]
    pub default_provider: Option<String>,
}

impl Default for RunlogConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            replica_dir: None,
            sync_timeout_ms: DEFAULT_SYNC_TIMEOUT_MS,
            default_provider: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sync_timeout_ms() -> u64 {
    DEFAULT_SYNC_TIMEOUT_MS
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write config at {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("config has invalid value: {0}")]
    ValidationFailed(String),
}

impl RunlogConfig {
    pub fn resolve_path() -> PathBuf {
        if let Ok(path) = env::var(CONFIG_PATH_ENV) {
            return PathBuf::from(path);
        }

        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_CONFIG_FILE)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let raw = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::WriteFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, raw).map_err(|source| ConfigError::WriteFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// Loads the config file if present. A missing file yields defaults and is
    /// never created. The flag reports whether the file exists.
    pub fn load_or_default() -> Result<(Self, PathBuf, bool), ConfigError> {
        let path = Self::resolve_path();
        if path.exists() {
            let cfg = Self::load(&path)?;
            return Ok((cfg, path, true));
        }
        Ok((Self::default(), path, false))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "log_level cannot be empty".to_string(),
            ));
        }
        if self.sync_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "sync_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if let Some(dir) = &self.replica_dir
            && dir.as_os_str().is_empty()
        {
            return Err(ConfigError::ValidationFailed(
                "replica_dir cannot be empty if set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn replica_dir(&self) -> PathBuf {
        self.replica_dir.clone().unwrap_or_else(env::temp_dir)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }
}

/// Remote database coordinates. Both values are required; the auth token is
/// never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub url: String,
    pub auth_token: String,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("url", &self.url)
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

impl RemoteConfig {
    /// Reads the remote coordinates from the process environment. `None`
    /// means telemetry is disabled, which callers must not treat as an error.
    pub fn resolve() -> Option<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = non_blank(lookup(REMOTE_URL_ENV))?;
        let auth_token = non_blank(lookup(REMOTE_TOKEN_ENV))?;
        Some(Self { url, auth_token })
    }

    /// Host portion of the remote URL, for log lines.
    pub fn remote_host(&self) -> String {
        Url::parse(&self.url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| "<unparsed>".to_string())
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
