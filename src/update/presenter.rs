//! Presentation seam
//!
//! The coordinator reports through an `UpdatePresenter` and never renders
//! anything itself. Callbacks run on the cycle's task and must return
//! quickly; a presenter that wants to react (for example by calling
//! `confirm_install`) must do so from another task, since the cycle lock is
//! held while the callback runs.

use super::download::DownloadProgress;
use super::manifest::UpdateManifest;
use super::state::{CycleFailure, UpdateCycleState};
use super::version::VersionId;

/// Observer for update cycle events. Every method defaults to a no-op.
pub trait UpdatePresenter: Send + Sync {
    /// State machine moved to `state`
    fn state_changed(&self, _state: &UpdateCycleState) {}

    /// Package download advanced
    fn download_progress(&self, _progress: &DownloadProgress) {}

    /// A verified update awaits confirmation
    fn update_ready(&self, _manifest: &UpdateManifest) {}

    /// An interactive check found nothing newer than `installed`
    fn up_to_date(&self, _installed: &VersionId) {}

    /// A cycle failed. Called once per failure.
    fn cycle_failed(&self, _failure: &CycleFailure) {}
}

/// Presenter that writes every event to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPresenter;

impl UpdatePresenter for LogPresenter {
    fn state_changed(&self, state: &UpdateCycleState) {
        tracing::debug!("Update state: {}", state);
    }

    fn download_progress(&self, progress: &DownloadProgress) {
        match progress.percentage() {
            Some(pct) => tracing::debug!("Downloaded {}% ({} bytes)", pct, progress.downloaded),
            None => tracing::debug!("Downloaded {} bytes", progress.downloaded),
        }
    }

    fn update_ready(&self, manifest: &UpdateManifest) {
        match manifest.release_notes_url {
            Some(ref notes) => tracing::info!(
                "Update {} is ready to install (release notes: {})",
                manifest.latest_version,
                notes
            ),
            None => tracing::info!("Update {} is ready to install", manifest.latest_version),
        }
    }

    fn up_to_date(&self, installed: &VersionId) {
        tracing::info!("Version {} is up to date", installed);
    }

    fn cycle_failed(&self, failure: &CycleFailure) {
        tracing::warn!("Update check failed: {}", failure);
    }
}
