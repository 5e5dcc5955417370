//! Persisted update preferences
//!
//! Only two keys survive a restart: when the last check started and which
//! version the user declined.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::error::{Result, UpdateError};
use super::version::VersionId;

/// Persisted update keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePreferences {
    /// Start of the most recent cycle
    #[serde(default)]
    pub last_check: Option<DateTime<Utc>>,

    /// Version the user declined; suppressed from periodic prompts
    #[serde(default)]
    pub dismissed_version: Option<VersionId>,
}

/// Trait for preference persistence
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn load(&self) -> Result<UpdatePreferences>;

    async fn save(&self, preferences: &UpdatePreferences) -> Result<()>;
}

/// JSON file store with atomic writes
#[derive(Debug, Clone)]
pub struct JsonPreferenceStore {
    path: PathBuf,
}

impl JsonPreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config_dir>/<app_name>/update-preferences.json`
    pub fn default_location(app_name: &str) -> Self {
        let base = directories::ProjectDirs::from("", "", app_name)
            .map(|dirs| dirs.config_dir().to_path_buf())
            .or_else(|| dirs::config_dir().map(|dir| dir.join(app_name)))
            .unwrap_or_else(|| PathBuf::from(".").join(app_name));
        Self::new(base.join("update-preferences.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PreferenceStore for JsonPreferenceStore {
    async fn load(&self) -> Result<UpdatePreferences> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(UpdatePreferences::default())
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&content).map_err(|e| {
            UpdateError::Storage(format!("{}: {}", self.path.display(), e))
        })
    }

    async fn save(&self, preferences: &UpdatePreferences) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(preferences)
            .map_err(|e| UpdateError::Storage(e.to_string()))?;

        // Write to temp file first
        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &content).await?;

        // Atomic rename
        tokio::fs::rename(&temp_path, &self.path).await?;

        Ok(())
    }
}

/// In-memory store for hosts without persistent storage
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    preferences: RwLock<UpdatePreferences>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_preferences(preferences: UpdatePreferences) -> Self {
        Self {
            preferences: RwLock::new(preferences),
        }
    }

    /// Current stored value
    pub fn snapshot(&self) -> UpdatePreferences {
        self.preferences.read().clone()
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn load(&self) -> Result<UpdatePreferences> {
        Ok(self.snapshot())
    }

    async fn save(&self, preferences: &UpdatePreferences) -> Result<()> {
        *self.preferences.write() = preferences.clone();
        Ok(())
    }
}
