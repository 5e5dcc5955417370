//! Update module error types

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::verify::VerificationError;
use super::version::VersionParseError;
use crate::config::ConfigError;

/// Result type for update operations
pub type Result<T> = std::result::Result<T, UpdateError>;

/// Error types for update operations
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Malformed manifest: {0}")]
    Parse(String),

    #[error("Manifest schema error: {0}")]
    Schema(String),

    #[error("Invalid version: {0}")]
    InvalidVersion(#[from] VersionParseError),

    #[error("Package verification failed: {0}")]
    Verification(#[from] VerificationError),

    #[error("Installer failed: {0}")]
    Install(String),

    #[error("Update coordinator has not been set up")]
    NotInitialized,

    #[error("An update cycle is already in progress")]
    CycleInProgress,

    #[error("No verified update is waiting for a decision")]
    NoPendingUpdate,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl UpdateError {
    /// Classify the error for reporting as a cycle failure
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            UpdateError::Network(_) | UpdateError::Http(_) | UpdateError::Timeout { .. } => {
                FailureKind::Network
            }
            UpdateError::Parse(_) | UpdateError::InvalidVersion(_) => FailureKind::Parse,
            UpdateError::Schema(_) => FailureKind::Schema,
            UpdateError::Verification(_) => FailureKind::Verification,
            UpdateError::Install(_) => FailureKind::Install,
            UpdateError::Io(_) | UpdateError::Storage(_) => FailureKind::Storage,
            UpdateError::NotInitialized
            | UpdateError::CycleInProgress
            | UpdateError::NoPendingUpdate
            | UpdateError::Config(_) => FailureKind::Internal,
        }
    }

    /// Check if the next scheduled tick may succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        self.failure_kind() == FailureKind::Network
    }
}

/// Category of a failed cycle, as surfaced to the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connectivity, HTTP status or timeout
    Network,
    /// Malformed manifest document or field value
    Parse,
    /// Required manifest field missing or mistyped
    Schema,
    /// Checksum or signature mismatch
    Verification,
    /// Installer rejected the handoff
    Install,
    /// Local disk problem
    Storage,
    /// Programmer error surfaced inside a cycle
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Network => write!(f, "network"),
            FailureKind::Parse => write!(f, "parse"),
            FailureKind::Schema => write!(f, "schema"),
            FailureKind::Verification => write!(f, "verification"),
            FailureKind::Install => write!(f, "install"),
            FailureKind::Storage => write!(f, "storage"),
            FailureKind::Internal => write!(f, "internal"),
        }
    }
}
