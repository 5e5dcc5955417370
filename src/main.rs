//! update-agent: runs the update coordinator for the current executable.
//!
//! Usage: `update-agent [CONFIG_FILE]`. Without an argument the config is
//! read from `<config_dir>/update-agent/updater.toml`.
//!
//! The agent answers its own prompts: any verified update, from the startup
//! check or a periodic one, is installed and the agent exits.

use std::path::PathBuf;

use anyhow::Context;
use update_coordinator::logging::{LoggingConfig, LoggingSystem};
use update_coordinator::{
    load_config, HostInfo, UpdateCoordinator, UpdateCycleState, UpdateError,
};

async fn install_pending(coordinator: &UpdateCoordinator) -> anyhow::Result<()> {
    let state = coordinator.confirm_install().await?;
    if let UpdateCycleState::Failed(failure) = state {
        anyhow::bail!("update install failed: {}", failure);
    }
    tracing::info!("Update handed off; exiting so it can be applied");
    coordinator.shutdown().await;
    Ok(())
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(env!("CARGO_BIN_NAME"))
        .join("updater.toml")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let logging_config = if cfg!(debug_assertions) {
        LoggingConfig::development()
    } else {
        LoggingConfig::production().with_file_name("update-agent.log")
    };

    // Keep the logging system alive so the file writer is flushed on exit
    let _logging_system = match LoggingSystem::init(logging_config) {
        Ok(system) => Some(system),
        Err(e) => {
            eprintln!("Failed to initialize logging system: {}. Using basic logging.", e);
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                )
                .init();
            None
        }
    };

    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let automatic_checks = config.automatic_checks_enabled;

    let host = HostInfo::detect(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))?;
    tracing::info!(
        "Starting {} {} (OS {})",
        host.app_name,
        host.installed_version,
        host.os_version
            .as_ref()
            .map_or_else(|| "unknown".to_string(), |v| v.to_string())
    );

    let coordinator = UpdateCoordinator::builder(host).build()?;
    coordinator.setup(config).await?;

    match coordinator.check_now(true).await {
        Ok(UpdateCycleState::ReadyToInstall) => return install_pending(&coordinator).await,
        Ok(UpdateCycleState::Failed(failure)) => {
            tracing::warn!("Initial update check failed: {}", failure);
        }
        Ok(state) => tracing::info!("Initial update check finished: {}", state),
        // The first periodic tick got there first
        Err(UpdateError::CycleInProgress) => {
            tracing::info!("Update check already running in the background")
        }
        Err(e) => return Err(e.into()),
    }

    if automatic_checks {
        tracing::info!("Waiting for periodic update checks; press Ctrl-C to stop");
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("waiting for Ctrl-C")?;
            }
            _ = coordinator.wait_until_ready() => {
                return install_pending(&coordinator).await;
            }
        }
    }

    coordinator.shutdown().await;
    Ok(())
}
