//! Updater Settings
//!
//! `UpdaterConfig` is handed to `UpdateCoordinator::setup` and read-only
//! thereafter. It can be built in code or loaded from a file layered with
//! `UPDATER__*` environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::update::verify::TrustedKey;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid trusted public key: {0}")]
    InvalidKey(String),
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Self-update configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Manifest location
    pub feed_url: Url,

    /// Milliseconds between periodic checks
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,

    /// Run periodic checks in the background
    #[serde(default = "default_true")]
    pub automatic_checks_enabled: bool,

    /// Base64 Ed25519 public key packages must be signed with
    pub trusted_public_key: String,

    /// Install verified updates without waiting for confirmation
    #[serde(default)]
    pub automatic_install: bool,

    /// Offer pre-release versions
    #[serde(default)]
    pub allow_prereleases: bool,

    /// Manifest fetch timeout in milliseconds
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Package download timeout in milliseconds
    #[serde(default = "default_download_timeout_ms")]
    pub download_timeout_ms: u64,

    /// Manifest body size cap
    #[serde(default = "default_max_manifest_bytes")]
    pub max_manifest_bytes: u64,

    /// Where packages are downloaded (default: per-user data directory)
    #[serde(default)]
    pub download_dir: Option<PathBuf>,

    /// Permit plain `http://` URLs. Local testing only.
    #[serde(default)]
    pub allow_insecure_transport: bool,
}

/// Longest accepted check interval (one year)
pub const MAX_CHECK_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

fn default_check_interval_ms() -> u64 {
    24 * 60 * 60 * 1000
}

fn default_true() -> bool {
    true
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

fn default_download_timeout_ms() -> u64 {
    60_000
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn default_max_manifest_bytes() -> u64 {
    1024 * 1024
}

impl UpdaterConfig {
    /// Config with default policy for the given feed and key
    pub fn new(feed_url: Url, trusted_public_key: impl Into<String>) -> Self {
        Self {
            feed_url,
            check_interval_ms: default_check_interval_ms(),
            automatic_checks_enabled: true,
            trusted_public_key: trusted_public_key.into(),
            automatic_install: false,
            allow_prereleases: false,
            fetch_timeout_ms: default_fetch_timeout_ms(),
            download_timeout_ms: default_download_timeout_ms(),
            max_manifest_bytes: default_max_manifest_bytes(),
            download_dir: None,
            allow_insecure_transport: false,
        }
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval_ms = saturating_millis(interval);
        self
    }

    pub fn with_automatic_checks(mut self, enabled: bool) -> Self {
        self.automatic_checks_enabled = enabled;
        self
    }

    pub fn with_automatic_install(mut self, enabled: bool) -> Self {
        self.automatic_install = enabled;
        self
    }

    pub fn with_prereleases(mut self, allowed: bool) -> Self {
        self.allow_prereleases = allowed;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout_ms = saturating_millis(timeout);
        self
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout_ms = saturating_millis(timeout);
        self
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    pub fn with_insecure_transport(mut self, allowed: bool) -> Self {
        self.allow_insecure_transport = allowed;
        self
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout_ms)
    }

    /// Download directory, falling back to `<data_local_dir>/<app>/updates`
    pub fn resolve_download_dir(&self, app_name: &str) -> PathBuf {
        if let Some(ref dir) = self.download_dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("", "", app_name)
            .map(|dirs| dirs.data_local_dir().to_path_buf())
            .or_else(|| dirs::data_local_dir().map(|dir| dir.join(app_name)))
            .unwrap_or_else(|| std::env::temp_dir().join(app_name))
            .join("updates")
    }

    /// Check that the configuration can drive a cycle
    pub fn validate(&self) -> ConfigResult<()> {
        if self.check_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "check_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.check_interval() > MAX_CHECK_INTERVAL {
            return Err(ConfigError::Invalid(format!(
                "check_interval_ms must not exceed {}",
                MAX_CHECK_INTERVAL.as_millis()
            )));
        }
        if self.fetch_timeout_ms == 0 || self.download_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        if self.max_manifest_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_manifest_bytes must be greater than zero".to_string(),
            ));
        }
        match self.feed_url.scheme() {
            "https" => {}
            "http" if self.allow_insecure_transport => {}
            scheme => {
                return Err(ConfigError::Invalid(format!(
                    "feed_url must use https, got {}",
                    scheme
                )))
            }
        }
        self.trusted_key()?;
        Ok(())
    }

    /// Decode the trusted public key
    pub fn trusted_key(&self) -> ConfigResult<TrustedKey> {
        TrustedKey::from_base64(&self.trusted_public_key)
            .map_err(|e| ConfigError::InvalidKey(e.to_string()))
    }
}

/// Load configuration from `path`, with `UPDATER__<FIELD>` environment
/// variables taking precedence over file values.
pub fn load_config(path: &Path) -> ConfigResult<UpdaterConfig> {
    if !path.exists() {
        return Err(ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("configuration file not found: {}", path.display()),
        )));
    }

    let settings = ::config::Config::builder()
        .add_source(::config::File::from(path))
        .add_source(
            ::config::Environment::with_prefix("UPDATER")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config: UpdaterConfig = settings.try_deserialize()?;
    tracing::info!("Loaded updater configuration from {}", path.display());
    Ok(config)
}
