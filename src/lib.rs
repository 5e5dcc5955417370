//! Update Coordinator - background self-update for desktop applications
//!
//! This crate provides:
//! - Release feed checks with version comparison and pre-release policy
//! - Streaming package download with SHA-256 and Ed25519 verification
//! - A check → download → verify → install state machine with cancellation
//! - Periodic background checks and persisted update preferences
//! - Structured logging setup for host applications

pub mod config;
pub mod logging;
pub mod update;

// Re-export commonly used items
pub use crate::config::{load_config, ConfigError, UpdaterConfig};
pub use crate::update::{
    HostInfo, UpdateCoordinator, UpdateCycleState, UpdateError, UpdatePresenter, VersionId,
};
