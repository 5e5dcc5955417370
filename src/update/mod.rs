//! Update module
//!
//! This module provides functionality for:
//! - Checking a release feed for newer versions
//! - Streaming and verifying update packages (SHA-256 + Ed25519)
//! - Driving the check → download → verify → install state machine
//! - Periodic background checks with cancellation

pub mod coordinator;
pub mod download;
pub mod error;
pub mod install;
pub mod machine;
pub mod manifest;
pub mod package;
pub mod presenter;
pub mod state;
pub mod store;
pub mod verify;
pub mod version;


pub use coordinator::{first_tick_delay, UpdateCoordinator, UpdateCoordinatorBuilder};
pub use download::{DownloadProgress, HttpDownloader, PackageDownloader, ProgressCallback};
pub use error::{FailureKind, Result, UpdateError};
pub use install::{InstallHandoff, Installer, SwapScriptInstaller};
pub use machine::{evaluate_offer, CycleSettings, HostInfo, OfferDecision};
pub use manifest::{FetchLimits, HttpManifestFetcher, ManifestFetcher, UpdateManifest};
pub use package::{UpdatePackage, VerifiedPackage};
pub use presenter::{LogPresenter, UpdatePresenter};
pub use state::{CycleFailure, UpdateCycleState};
pub use store::{JsonPreferenceStore, MemoryPreferenceStore, PreferenceStore, UpdatePreferences};
pub use verify::{Ed25519Verifier, PackageVerifier, Sha256Digest, TrustedKey, VerificationError};
pub use version::{compare, VersionId, VersionParseError};
