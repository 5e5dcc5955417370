//! Update Coordinator
//!
//! The single entry point a host application talks to. It owns the state
//! machine behind an exclusive lock, keeps the configuration installed by
//! `setup`, persists the two preference keys and runs the periodic timer.
//!
//! The coordinator is a cheap `Clone` handle; construct it once per process
//! and pass clones around.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::download::{HttpDownloader, PackageDownloader};
use super::error::{Result, UpdateError};
use super::install::{Installer, SwapScriptInstaller};
use super::machine::{Collaborators, CycleRequest, CycleSettings, HostInfo, UpdateStateMachine};
use super::manifest::{HttpManifestFetcher, ManifestFetcher};
use super::presenter::{LogPresenter, UpdatePresenter};
use super::state::UpdateCycleState;
use super::store::{JsonPreferenceStore, PreferenceStore, UpdatePreferences};
use super::verify::{Ed25519Verifier, PackageVerifier};
use super::version::VersionId;
use crate::config::UpdaterConfig;

/// Extension of in-flight package downloads
const PACKAGE_EXTENSION: &str = "update";

/// Delay before the first periodic check.
///
/// Overdue (or never-run) checks fire immediately. A `last_check` in the
/// future, from a clock that moved backwards, waits one full interval.
pub fn first_tick_delay(
    last_check: Option<DateTime<Utc>>,
    interval: Duration,
    now: DateTime<Utc>,
) -> Duration {
    match last_check {
        None => Duration::ZERO,
        Some(last) => {
            let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
            interval.saturating_sub(elapsed)
        }
    }
}

struct Shared {
    host: Arc<HostInfo>,
    store: Arc<dyn PreferenceStore>,
    settings: RwLock<Option<Arc<CycleSettings>>>,
    preferences: RwLock<UpdatePreferences>,
    machine: tokio::sync::Mutex<UpdateStateMachine>,
    state: watch::Receiver<UpdateCycleState>,
    cancel: Mutex<CancellationToken>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(handle) = self.scheduler.get_mut().take() {
            handle.abort();
        }
    }
}

/// Builder for [`UpdateCoordinator`]
pub struct UpdateCoordinatorBuilder {
    host: HostInfo,
    fetcher: Option<Arc<dyn ManifestFetcher>>,
    downloader: Option<Arc<dyn PackageDownloader>>,
    verifier: Option<Arc<dyn PackageVerifier>>,
    installer: Option<Arc<dyn Installer>>,
    presenter: Option<Arc<dyn UpdatePresenter>>,
    store: Option<Arc<dyn PreferenceStore>>,
}

impl UpdateCoordinatorBuilder {
    pub fn with_fetcher(mut self, fetcher: Arc<dyn ManifestFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_downloader(mut self, downloader: Arc<dyn PackageDownloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn PackageVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_installer(mut self, installer: Arc<dyn Installer>) -> Self {
        self.installer = Some(installer);
        self
    }

    pub fn with_presenter(mut self, presenter: Arc<dyn UpdatePresenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    pub fn with_preference_store(mut self, store: Arc<dyn PreferenceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the coordinator, filling unset collaborators with the defaults
    pub fn build(self) -> Result<UpdateCoordinator> {
        let user_agent = format!("{}/{}", self.host.app_name, self.host.installed_version);

        let fetcher: Arc<dyn ManifestFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpManifestFetcher::new(&user_agent)?),
        };
        let downloader: Arc<dyn PackageDownloader> = match self.downloader {
            Some(downloader) => downloader,
            None => Arc::new(HttpDownloader::new(&user_agent)?),
        };
        let installer: Arc<dyn Installer> = match self.installer {
            Some(installer) => installer,
            None => Arc::new(SwapScriptInstaller::for_current_exe(default_staging_dir(
                &self.host.app_name,
            ))?),
        };
        let verifier = self.verifier.unwrap_or_else(|| Arc::new(Ed25519Verifier::new()));
        let presenter = self.presenter.unwrap_or_else(|| Arc::new(LogPresenter));
        let store = self.store.unwrap_or_else(|| {
            Arc::new(JsonPreferenceStore::default_location(&self.host.app_name))
        });

        let machine = UpdateStateMachine::new(Collaborators {
            fetcher,
            downloader,
            verifier,
            installer,
            presenter,
        });
        let state = machine.subscribe();

        Ok(UpdateCoordinator {
            shared: Arc::new(Shared {
                host: Arc::new(self.host),
                store,
                settings: RwLock::new(None),
                preferences: RwLock::new(UpdatePreferences::default()),
                machine: tokio::sync::Mutex::new(machine),
                state,
                cancel: Mutex::new(CancellationToken::new()),
                scheduler: Mutex::new(None),
            }),
        })
    }
}

fn default_staging_dir(app_name: &str) -> PathBuf {
    directories::ProjectDirs::from("", "", app_name)
        .map(|dirs| dirs.data_local_dir().to_path_buf())
        .or_else(|| dirs::data_local_dir().map(|dir| dir.join(app_name)))
        .unwrap_or_else(|| std::env::temp_dir().join(app_name))
        .join("staging")
}

/// Process-wide update coordinator handle
#[derive(Clone)]
pub struct UpdateCoordinator {
    shared: Arc<Shared>,
}

impl UpdateCoordinator {
    /// Start building a coordinator for `host`
    pub fn builder(host: HostInfo) -> UpdateCoordinatorBuilder {
        UpdateCoordinatorBuilder {
            host,
            fetcher: None,
            downloader: None,
            verifier: None,
            installer: None,
            presenter: None,
            store: None,
        }
    }

    /// Install `config` and (re)start periodic checks.
    ///
    /// Safe to call repeatedly. A cycle already in flight finishes with the
    /// configuration it started with.
    pub async fn setup(&self, config: UpdaterConfig) -> Result<()> {
        let settings = Arc::new(CycleSettings::new(config, &self.shared.host)?);

        let preferences = match self.shared.store.load().await {
            Ok(preferences) => preferences,
            Err(e) => {
                tracing::warn!("Failed to load update preferences, using defaults: {}", e);
                UpdatePreferences::default()
            }
        };
        *self.shared.preferences.write() = preferences.clone();

        // Packages left by an earlier process; never touch a live cycle's file
        if let Ok(machine) = self.shared.machine.try_lock() {
            if machine.state() == UpdateCycleState::Idle {
                sweep_stale_packages(&settings.download_dir).await;
            }
        }

        *self.shared.settings.write() = Some(settings.clone());
        self.restart_scheduler(&settings, preferences.last_check);

        tracing::info!(
            "Update coordinator configured: feed {}, automatic checks {}",
            settings.config.feed_url,
            if settings.config.automatic_checks_enabled { "on" } else { "off" }
        );
        Ok(())
    }

    fn restart_scheduler(&self, settings: &CycleSettings, last_check: Option<DateTime<Utc>>) {
        let mut slot = self.shared.scheduler.lock();
        if let Some(handle) = slot.take() {
            handle.abort();
        }

        if !settings.config.automatic_checks_enabled {
            tracing::info!("Automatic update checks disabled");
            return;
        }

        let interval = settings.config.check_interval();
        let delay = first_tick_delay(last_check, interval, Utc::now());
        tracing::debug!("Next update check in {:?}, then every {:?}", delay, interval);
        *slot = Some(tokio::spawn(run_scheduler(
            Arc::downgrade(&self.shared),
            delay,
            interval,
        )));
    }

    /// Run one cycle now and return the state it came to rest in.
    ///
    /// `interactive` marks an explicit user request: dismissed versions are
    /// offered again and "up to date" is reported.
    pub async fn check_now(&self, interactive: bool) -> Result<UpdateCycleState> {
        let settings = self
            .shared
            .settings
            .read()
            .clone()
            .ok_or(UpdateError::NotInitialized)?;

        // The token is swapped under the same lock `cancel()` takes, so a
        // cancel issued once the machine is ours always reaches this cycle
        let (mut machine, cancel) = {
            let mut slot = self.shared.cancel.lock();
            let machine = self
                .shared
                .machine
                .try_lock()
                .map_err(|_| UpdateError::CycleInProgress)?;
            if machine.state() != UpdateCycleState::Idle {
                return Err(UpdateError::CycleInProgress);
            }
            let cancel = CancellationToken::new();
            *slot = cancel.clone();
            (machine, cancel)
        };

        let preferences = {
            let mut preferences = self.shared.preferences.write();
            preferences.last_check = Some(Utc::now());
            preferences.clone()
        };
        self.persist(&preferences).await;

        let request = CycleRequest {
            settings,
            host: self.shared.host.clone(),
            dismissed: preferences.dismissed_version,
            interactive,
            cancel,
        };
        Ok(machine.run_cycle(request).await)
    }

    /// Cancel whatever is in progress and wait for the machine to settle.
    ///
    /// Safe in any state. An install handoff already under way is not
    /// interrupted.
    pub async fn cancel(&self) {
        self.shared.cancel.lock().cancel();
        let mut machine = self.shared.machine.lock().await;
        if machine.cancel_pending().await {
            tracing::info!("Pending update cancelled");
        }
    }

    /// Wait until a verified update is awaiting confirmation and the cycle
    /// that produced it has released the machine.
    ///
    /// Returns immediately if one is already pending. Hosts without a
    /// presenter that answers prompts use this to confirm or decline.
    pub async fn wait_until_ready(&self) {
        let mut rx = self.subscribe();
        loop {
            let ready = rx
                .wait_for(|state| *state == UpdateCycleState::ReadyToInstall)
                .await
                .is_ok();
            if !ready {
                return;
            }
            let machine = self.shared.machine.lock().await;
            if machine.state() == UpdateCycleState::ReadyToInstall {
                return;
            }
        }
    }

    /// Install the verified update awaiting confirmation
    pub async fn confirm_install(&self) -> Result<UpdateCycleState> {
        let mut machine = self
            .shared
            .machine
            .try_lock()
            .map_err(|_| UpdateError::CycleInProgress)?;
        machine.confirm_install().await
    }

    /// Decline the verified update awaiting confirmation. The version is
    /// remembered and not offered again by periodic checks.
    pub async fn decline_update(&self) -> Result<VersionId> {
        let version = {
            let mut machine = self
                .shared
                .machine
                .try_lock()
                .map_err(|_| UpdateError::CycleInProgress)?;
            machine.decline().await?
        };

        let preferences = {
            let mut preferences = self.shared.preferences.write();
            preferences.dismissed_version = Some(version.clone());
            preferences.clone()
        };
        self.persist(&preferences).await;
        Ok(version)
    }

    async fn persist(&self, preferences: &UpdatePreferences) {
        if let Err(e) = self.shared.store.save(preferences).await {
            tracing::warn!("Failed to persist update preferences: {}", e);
        }
    }

    /// Current state
    pub fn state(&self) -> UpdateCycleState {
        self.shared.state.borrow().clone()
    }

    /// Watch channel of state changes
    pub fn subscribe(&self) -> watch::Receiver<UpdateCycleState> {
        self.shared.state.clone()
    }

    /// Persisted preferences as last loaded or written
    pub fn preferences(&self) -> UpdatePreferences {
        self.shared.preferences.read().clone()
    }

    /// Configuration installed by the last `setup`
    pub fn config(&self) -> Option<UpdaterConfig> {
        self.shared
            .settings
            .read()
            .as_ref()
            .map(|settings| settings.config.clone())
    }

    /// Whether the periodic timer is running
    pub fn is_scheduled(&self) -> bool {
        self.shared
            .scheduler
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Stop periodic checks and cancel any cycle in progress
    pub async fn shutdown(&self) {
        if let Some(handle) = self.shared.scheduler.lock().take() {
            handle.abort();
        }
        self.cancel().await;
        tracing::info!("Update coordinator stopped");
    }
}

async fn run_scheduler(weak: Weak<Shared>, first_delay: Duration, period: Duration) {
    let Some(start) = Instant::now().checked_add(first_delay) else {
        tracing::warn!(
            "First update check delay {:?} is out of range; timer not started",
            first_delay
        );
        return;
    };
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let Some(shared) = weak.upgrade() else {
            break;
        };
        let coordinator = UpdateCoordinator { shared };

        // Detached so that re-running setup never aborts a cycle midway
        tokio::spawn(async move {
            match coordinator.check_now(false).await {
                Ok(state) => tracing::debug!("Periodic update check finished: {}", state),
                Err(UpdateError::CycleInProgress) => {
                    tracing::debug!("Update cycle in progress, skipping tick")
                }
                Err(e) => tracing::warn!("Periodic update check failed: {}", e),
            }
        });
    }
}

/// Delete `*.update` files left in `dir`. Failed-install packages are kept.
async fn sweep_stale_packages(dir: &Path) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            tracing::warn!("Cannot scan {} for stale packages: {}", dir.display(), e);
            return;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", dir.display(), e);
                break;
            }
        };
        let path = entry.path();
        let is_package = path
            .extension()
            .map_or(false, |ext| ext == PACKAGE_EXTENSION);
        if !is_package {
            continue;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::info!("Removed stale update package {}", path.display()),
            Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}
