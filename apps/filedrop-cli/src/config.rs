//! CLI configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/filedrop/config.toml`
//! - Windows: `%APPDATA%/filedrop/config.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use filedrop_uploader::UploadConfig;
use serde::{Deserialize, Serialize};

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the storage service.
    #[serde(default = "default_server")]
    pub server: String,

    /// Bearer token sent with every request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Business category used when `--biz-type` is not given.
    #[serde(default = "default_biz_type")]
    pub biz_type: String,

    /// Chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Files at or below this size are sent in one request.
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: u64,

    /// Largest accepted file, in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Chunks in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Retries per chunk after the first attempt.
    #[serde(default = "default_max_chunk_retries")]
    pub max_chunk_retries: u8,

    /// Deadline for each remote call, in seconds.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_server() -> String {
    "http://127.0.0.1:8080".into()
}

fn default_biz_type() -> String {
    "default".into()
}

fn default_chunk_size() -> u64 {
    UploadConfig::default().chunk_size
}

fn default_chunk_threshold() -> u64 {
    UploadConfig::default().chunk_threshold
}

fn default_max_file_size() -> u64 {
    UploadConfig::default().max_file_size
}

fn default_concurrency() -> usize {
    UploadConfig::default().concurrency_limit
}

fn default_max_chunk_retries() -> u8 {
    UploadConfig::default().max_chunk_retries
}

fn default_call_timeout_secs() -> u64 {
    UploadConfig::default().call_timeout.as_secs()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: default_server(),
            token: None,
            biz_type: default_biz_type(),
            chunk_size: default_chunk_size(),
            chunk_threshold: default_chunk_threshold(),
            max_file_size: default_max_file_size(),
            concurrency: default_concurrency(),
            max_chunk_retries: default_max_chunk_retries(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl Config {
    /// Loads configuration from the default path, creating it if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    /// Loads configuration from `path`, creating a default file if not found.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Restrict permissions on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Upload configuration derived from these settings.
    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            chunk_size: self.chunk_size,
            chunk_threshold: self.chunk_threshold,
            max_file_size: self.max_file_size,
            concurrency_limit: self.concurrency,
            max_chunk_retries: self.max_chunk_retries,
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            ..UploadConfig::default()
        }
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("filedrop").join("config.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("filedrop")
            .join("config.toml")
    }
}
