//! Update State Machine
//!
//! Drives one cycle: check → download → verify → ready → install. Every
//! suspended step races the cycle's cancellation token, and the network
//! steps are bounded by the configured timeouts. Whatever happens, the
//! machine comes back to `Idle` (or rests in `ReadyToInstall` holding the
//! verified package) before `run_cycle` returns.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

use super::download::{PackageDownloader, ProgressCallback};
use super::error::{FailureKind, Result, UpdateError};
use super::install::Installer;
use super::manifest::{FetchLimits, ManifestFetcher, UpdateManifest};
use super::package::{UpdatePackage, VerifiedPackage};
use super::presenter::UpdatePresenter;
use super::state::{CycleFailure, UpdateCycleState};
use super::verify::{verify_package, PackageVerifier, TrustedKey};
use super::version::VersionId;
use crate::config::{ConfigResult, UpdaterConfig};

/// What the coordinator knows about the running application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub app_name: String,
    pub installed_version: VersionId,
    /// Host OS version, if it could be determined
    pub os_version: Option<VersionId>,
}

impl HostInfo {
    pub fn new(app_name: impl Into<String>, installed_version: VersionId) -> Self {
        Self {
            app_name: app_name.into(),
            installed_version,
            os_version: None,
        }
    }

    pub fn with_os_version(mut self, os_version: Option<VersionId>) -> Self {
        self.os_version = os_version;
        self
    }

    /// Host info with the OS version read from the system
    pub fn detect(app_name: impl Into<String>, installed_version: &str) -> Result<Self> {
        let installed_version = VersionId::parse(installed_version)?;
        let os_version = sysinfo::System::os_version().and_then(|raw| {
            // "11 (22631)", "14.2.1", "22.04 LTS"
            let leading = raw.split_whitespace().next()?;
            VersionId::parse(leading).ok()
        });
        if os_version.is_none() {
            tracing::debug!("Host OS version unknown; minimum OS checks are skipped");
        }
        Ok(Self::new(app_name, installed_version).with_os_version(os_version))
    }
}

/// Configuration snapshot a cycle runs against
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub config: UpdaterConfig,
    pub trusted_key: TrustedKey,
    pub download_dir: PathBuf,
}

impl CycleSettings {
    /// Validate `config` and resolve everything a cycle needs from it
    pub fn new(config: UpdaterConfig, host: &HostInfo) -> ConfigResult<Self> {
        config.validate()?;
        let trusted_key = config.trusted_key()?;
        let download_dir = config.resolve_download_dir(&host.app_name);
        Ok(Self {
            config,
            trusted_key,
            download_dir,
        })
    }

    pub fn fetch_limits(&self) -> FetchLimits {
        FetchLimits {
            timeout: self.config.fetch_timeout(),
            max_body_bytes: self.config.max_manifest_bytes,
        }
    }
}

/// Inputs of a single cycle
#[derive(Debug, Clone)]
pub struct CycleRequest {
    pub settings: Arc<CycleSettings>,
    pub host: Arc<HostInfo>,
    pub dismissed: Option<VersionId>,
    /// Explicit user request rather than a timer tick
    pub interactive: bool,
    pub cancel: CancellationToken,
}

/// Whether a fetched manifest is offered to this host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferDecision {
    Offer,
    /// Nothing newer than the installed version
    UpToDate,
    /// Newer, but a pre-release this host does not take
    PrereleaseSkipped,
    /// Newer, but requires a newer OS
    UnsupportedOs,
    /// Newer, but the user declined it and this is a periodic check
    Dismissed,
}

/// Decide whether `manifest` should be downloaded
pub fn evaluate_offer(
    manifest: &UpdateManifest,
    host: &HostInfo,
    dismissed: Option<&VersionId>,
    interactive: bool,
    allow_prereleases: bool,
) -> OfferDecision {
    let latest = &manifest.latest_version;

    if !latest.is_newer_than(&host.installed_version) {
        return OfferDecision::UpToDate;
    }

    if latest.is_prerelease() && !allow_prereleases && !host.installed_version.is_prerelease() {
        return OfferDecision::PrereleaseSkipped;
    }

    if let (Some(minimum), Some(os)) = (&manifest.minimum_os_version, &host.os_version) {
        if minimum > os {
            return OfferDecision::UnsupportedOs;
        }
    }

    if !interactive && dismissed == Some(latest) {
        return OfferDecision::Dismissed;
    }

    OfferDecision::Offer
}

/// Why a guarded step stopped early
enum Interrupt {
    Cancelled,
    Failed(UpdateError),
}

impl From<UpdateError> for Interrupt {
    fn from(error: UpdateError) -> Self {
        Interrupt::Failed(error)
    }
}

/// Where a cycle stopped before the install decision
enum Outcome {
    NoUpdate,
    Ready(VerifiedPackage),
}

/// Race `operation` against cancellation
async fn guarded<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = Result<T>>,
) -> std::result::Result<T, Interrupt> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        result = operation => result.map_err(Interrupt::Failed),
    }
}

/// Bound `operation` by `after`
async fn with_timeout<T>(
    operation: &'static str,
    after: Duration,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(after, future)
        .await
        .map_err(|_| UpdateError::Timeout { operation, after })?
}

fn check_transport(url: &Url, allow_insecure: bool) -> Result<()> {
    match url.scheme() {
        "https" => Ok(()),
        "http" if allow_insecure => Ok(()),
        scheme => Err(UpdateError::Parse(format!(
            "package_url must use https, got {}",
            scheme
        ))),
    }
}

/// Pluggable collaborators of the machine
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn ManifestFetcher>,
    pub downloader: Arc<dyn PackageDownloader>,
    pub verifier: Arc<dyn PackageVerifier>,
    pub installer: Arc<dyn Installer>,
    pub presenter: Arc<dyn UpdatePresenter>,
}

/// The update state machine
pub struct UpdateStateMachine {
    state: watch::Sender<UpdateCycleState>,
    pending: Option<VerifiedPackage>,
    parts: Collaborators,
}

impl UpdateStateMachine {
    pub fn new(parts: Collaborators) -> Self {
        let (state, _) = watch::channel(UpdateCycleState::Idle);
        Self {
            state,
            pending: None,
            parts,
        }
    }

    /// Current state
    pub fn state(&self) -> UpdateCycleState {
        self.state.borrow().clone()
    }

    /// Watch channel of state changes
    pub fn subscribe(&self) -> watch::Receiver<UpdateCycleState> {
        self.state.subscribe()
    }

    /// Manifest of the verified package awaiting a decision
    pub fn pending_manifest(&self) -> Option<&UpdateManifest> {
        self.pending.as_ref().map(|p| p.manifest())
    }

    fn advance(&self, next: UpdateCycleState) {
        let current = self.state();
        if !current.can_transition_to(&next) {
            tracing::error!("Illegal update state transition {} -> {}", current, next);
        }
        tracing::debug!("Update state {} -> {}", current.name(), next.name());
        self.state.send_replace(next.clone());
        self.parts.presenter.state_changed(&next);
    }

    /// Run one full cycle and return the state it came to rest in:
    /// `Idle`, `ReadyToInstall`, `Failed` or `Cancelled`.
    ///
    /// For `Failed` and `Cancelled` the machine has already re-armed to
    /// `Idle` when this returns.
    pub async fn run_cycle(&mut self, request: CycleRequest) -> UpdateCycleState {
        let cycle_id = Uuid::now_v7();
        let span = tracing::info_span!(
            "update_cycle",
            %cycle_id,
            interactive = request.interactive
        );
        self.drive(request).instrument(span).await
    }

    async fn drive(&mut self, request: CycleRequest) -> UpdateCycleState {
        tracing::info!(
            "Checking for updates (installed {})",
            request.host.installed_version
        );
        self.advance(UpdateCycleState::Checking);

        match self.execute(&request).await {
            Ok(Outcome::NoUpdate) => UpdateCycleState::Idle,
            Ok(Outcome::Ready(verified)) => {
                if request.cancel.is_cancelled() {
                    if let Err(e) = verified.into_inner().discard().await {
                        tracing::warn!("Failed to delete cancelled package: {}", e);
                    }
                    return self.finish_cancelled();
                }
                if request.settings.config.automatic_install {
                    tracing::info!("Installing update automatically");
                    return self.install(verified).await;
                }
                self.parts.presenter.update_ready(verified.manifest());
                self.pending = Some(verified);
                UpdateCycleState::ReadyToInstall
            }
            Err(Interrupt::Cancelled) => self.finish_cancelled(),
            Err(Interrupt::Failed(error)) => self.finish_failed(error),
        }
    }

    async fn execute(&mut self, request: &CycleRequest) -> std::result::Result<Outcome, Interrupt> {
        let settings = request.settings.as_ref();
        let host = request.host.as_ref();

        let limits = settings.fetch_limits();
        let fetcher = self.parts.fetcher.clone();
        let manifest = guarded(
            &request.cancel,
            with_timeout(
                "manifest fetch",
                limits.timeout,
                fetcher.fetch(&settings.config.feed_url, &limits),
            ),
        )
        .await?;

        let decision = evaluate_offer(
            &manifest,
            host,
            request.dismissed.as_ref(),
            request.interactive,
            settings.config.allow_prereleases,
        );
        if decision != OfferDecision::Offer {
            self.advance(UpdateCycleState::Idle);
            match decision {
                OfferDecision::UpToDate | OfferDecision::PrereleaseSkipped => {
                    tracing::info!(
                        "No update available (latest {}, {:?})",
                        manifest.latest_version,
                        decision
                    );
                    if request.interactive {
                        self.parts.presenter.up_to_date(&host.installed_version);
                    }
                }
                OfferDecision::UnsupportedOs => tracing::info!(
                    "Update {} requires a newer OS, skipping",
                    manifest.latest_version
                ),
                OfferDecision::Dismissed => tracing::debug!(
                    "Update {} was dismissed, skipping",
                    manifest.latest_version
                ),
                OfferDecision::Offer => {}
            }
            return Ok(Outcome::NoUpdate);
        }

        tracing::info!("Update available: {}", manifest.latest_version);
        check_transport(
            &manifest.package_url,
            settings.config.allow_insecure_transport,
        )?;

        let manifest = Arc::new(manifest);
        self.advance(UpdateCycleState::Downloading);

        tokio::fs::create_dir_all(&settings.download_dir)
            .await
            .map_err(UpdateError::from)?;
        let package = UpdatePackage::reserve(
            settings
                .download_dir
                .join(manifest.package_file_name(&host.app_name)),
            manifest.clone(),
        );

        let presenter = self.parts.presenter.clone();
        let progress: ProgressCallback = Arc::new(move |p| presenter.download_progress(&p));
        let downloader = self.parts.downloader.clone();
        guarded(
            &request.cancel,
            with_timeout(
                "package download",
                settings.config.download_timeout(),
                downloader.download(&manifest.package_url, package.path(), progress),
            ),
        )
        .await?;

        self.advance(UpdateCycleState::Verifying);
        let verifier = self.parts.verifier.clone();
        let verified = guarded(&request.cancel, async {
            verify_package(verifier.as_ref(), package, &settings.trusted_key)
                .await
                .map_err(UpdateError::from)
        })
        .await?;

        tracing::info!("Update {} verified", manifest.latest_version);
        self.advance(UpdateCycleState::ReadyToInstall);
        Ok(Outcome::Ready(verified))
    }

    async fn install(&mut self, verified: VerifiedPackage) -> UpdateCycleState {
        self.advance(UpdateCycleState::Installing);
        let version = verified.manifest().latest_version.clone();

        let installer = self.parts.installer.clone();
        match installer.install(&verified).await {
            Ok(handoff) => {
                tracing::info!(
                    "Installer accepted update {} (restart required: {})",
                    version,
                    handoff.restart_required
                );
                if let Err(e) = verified.into_inner().discard().await {
                    tracing::warn!("Failed to delete installed package: {}", e);
                }
                self.advance(UpdateCycleState::Idle);
                UpdateCycleState::Idle
            }
            Err(error) => {
                let error = match error {
                    UpdateError::Install(_) => error,
                    other => UpdateError::Install(other.to_string()),
                };
                match verified.into_inner().preserve().await {
                    Ok(kept) => tracing::warn!("Kept failed package at {}", kept.display()),
                    Err(e) => tracing::warn!("Failed to keep failed package: {}", e),
                }
                self.finish_failed(error)
            }
        }
    }

    fn finish_failed(&mut self, error: UpdateError) -> UpdateCycleState {
        let failure = CycleFailure::from_error(&error);
        if failure.kind == FailureKind::Verification {
            tracing::error!("Update package rejected: {}", error);
        } else {
            tracing::warn!("Update cycle failed: {}", error);
        }

        let failed = UpdateCycleState::Failed(failure.clone());
        self.advance(failed.clone());
        self.parts.presenter.cycle_failed(&failure);
        self.advance(UpdateCycleState::Idle);
        failed
    }

    fn finish_cancelled(&mut self) -> UpdateCycleState {
        tracing::info!("Update cycle cancelled");
        self.advance(UpdateCycleState::Cancelled);
        self.advance(UpdateCycleState::Idle);
        UpdateCycleState::Cancelled
    }

    /// Install the pending package
    pub async fn confirm_install(&mut self) -> Result<UpdateCycleState> {
        let verified = self.pending.take().ok_or(UpdateError::NoPendingUpdate)?;
        Ok(self.install(verified).await)
    }

    /// Drop the pending package and return its version
    pub async fn decline(&mut self) -> Result<VersionId> {
        let verified = self.pending.take().ok_or(UpdateError::NoPendingUpdate)?;
        let version = verified.manifest().latest_version.clone();
        if let Err(e) = verified.into_inner().discard().await {
            tracing::warn!("Failed to delete declined package: {}", e);
        }
        tracing::info!("Update {} declined", version);
        self.advance(UpdateCycleState::Idle);
        Ok(version)
    }

    /// Cancel a cycle resting in `ReadyToInstall`. Returns whether there was
    /// one.
    pub async fn cancel_pending(&mut self) -> bool {
        let Some(verified) = self.pending.take() else {
            return false;
        };
        if let Err(e) = verified.into_inner().discard().await {
            tracing::warn!("Failed to delete cancelled package: {}", e);
        }
        self.finish_cancelled();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::manifest::tests::sample_manifest;

    fn host(installed: &str) -> HostInfo {
        HostInfo::new("demo", VersionId::parse(installed).unwrap())
            .with_os_version(Some(VersionId::parse("13.1").unwrap()))
    }

    #[test]
    fn test_offer_newer_version() {
        let manifest = sample_manifest("2.1.0");
        let decision = evaluate_offer(&manifest, &host("2.0.5"), None, false, false);
        assert_eq!(decision, OfferDecision::Offer);
    }

    #[test]
    fn test_offer_same_or_older_version() {
        for latest in ["2.0.5", "2.0.5.0", "1.9"] {
            let decision =
                evaluate_offer(&sample_manifest(latest), &host("2.0.5"), None, true, false);
            assert_eq!(decision, OfferDecision::UpToDate, "{}", latest);
        }
    }

    #[test]
    fn test_offer_dismissed_only_suppresses_periodic() {
        let manifest = sample_manifest("2.1.0");
        let dismissed = VersionId::parse("2.1").unwrap();
        assert_eq!(
            evaluate_offer(&manifest, &host("2.0.5"), Some(&dismissed), false, false),
            OfferDecision::Dismissed
        );
        assert_eq!(
            evaluate_offer(&manifest, &host("2.0.5"), Some(&dismissed), true, false),
            OfferDecision::Offer
        );

        let older_dismissal = VersionId::parse("2.0.9").unwrap();
        assert_eq!(
            evaluate_offer(&manifest, &host("2.0.5"), Some(&older_dismissal), false, false),
            OfferDecision::Offer
        );
    }

    #[test]
    fn test_offer_prerelease_policy() {
        let manifest = sample_manifest("2.1.0-beta.2");
        assert_eq!(
            evaluate_offer(&manifest, &host("2.0.5"), None, true, false),
            OfferDecision::PrereleaseSkipped
        );
        assert_eq!(
            evaluate_offer(&manifest, &host("2.0.5"), None, true, true),
            OfferDecision::Offer
        );
        assert_eq!(
            evaluate_offer(&manifest, &host("2.1.0-beta.1"), None, true, false),
            OfferDecision::Offer
        );
    }

    #[test]
    fn test_offer_minimum_os() {
        let mut manifest = sample_manifest("2.1.0");
        manifest.minimum_os_version = Some(VersionId::parse("14.0").unwrap());
        assert_eq!(
            evaluate_offer(&manifest, &host("2.0.5"), None, true, false),
            OfferDecision::UnsupportedOs
        );

        manifest.minimum_os_version = Some(VersionId::parse("13").unwrap());
        assert_eq!(
            evaluate_offer(&manifest, &host("2.0.5"), None, true, false),
            OfferDecision::Offer
        );

        let unknown_os = HostInfo::new("demo", VersionId::parse("2.0.5").unwrap());
        manifest.minimum_os_version = Some(VersionId::parse("99").unwrap());
        assert_eq!(
            evaluate_offer(&manifest, &unknown_os, None, true, false),
            OfferDecision::Offer
        );
    }

    #[test]
    fn test_check_transport() {
        let https = Url::parse("https://example.com/app.tar.gz").unwrap();
        let http = Url::parse("http://example.com/app.tar.gz").unwrap();
        let ftp = Url::parse("ftp://example.com/app.tar.gz").unwrap();

        assert!(check_transport(&https, false).is_ok());
        assert!(check_transport(&http, false).is_err());
        assert!(check_transport(&http, true).is_ok());
        assert!(check_transport(&ftp, true).is_err());
    }

    #[tokio::test]
    async fn test_with_timeout_maps_elapsed() {
        let result: Result<()> = with_timeout(
            "manifest fetch",
            Duration::from_millis(20),
            std::future::pending(),
        )
        .await;
        assert!(matches!(
            result,
            Err(UpdateError::Timeout {
                operation: "manifest fetch",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_guarded_prefers_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let result = guarded(&token, async { Ok::<_, UpdateError>(1) }).await;
        assert!(matches!(result, Err(Interrupt::Cancelled)));
    }
}
