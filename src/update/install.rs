//! Installer handoff
//!
//! The coordinator never replaces the running binary itself. It hands a
//! `VerifiedPackage` to an `Installer`, which stages whatever it needs and
//! reports whether the host should restart.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::{Result, UpdateError};
use super::package::VerifiedPackage;

/// Outcome of a successful handoff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallHandoff {
    /// Host must exit for the swap to complete
    pub restart_required: bool,
    /// Script launched to finish the swap, if any
    pub script: Option<PathBuf>,
}

/// Trait for installers
#[async_trait]
pub trait Installer: Send + Sync {
    /// Take over a verified package. The package file is deleted once this
    /// returns `Ok`, so anything needed later must be copied out.
    async fn install(&self, package: &VerifiedPackage) -> Result<InstallHandoff>;
}

/// Files staged for a swap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedSwap {
    pub staged_binary: PathBuf,
    pub backup: PathBuf,
    pub script: PathBuf,
}

/// Installer that replaces an executable via a detached platform script.
///
/// The script waits for the host process to exit, backs up the current
/// executable, moves the new one into place and relaunches it.
#[derive(Debug, Clone)]
pub struct SwapScriptInstaller {
    target: PathBuf,
    staging_dir: PathBuf,
}

impl SwapScriptInstaller {
    pub fn new(target: impl Into<PathBuf>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            staging_dir: staging_dir.into(),
        }
    }

    /// Installer for the running executable
    pub fn for_current_exe(staging_dir: impl Into<PathBuf>) -> Result<Self> {
        let target = std::env::current_exe()?;
        Ok(Self::new(target, staging_dir))
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Copy the package next to the staging script and write the script.
    ///
    /// Nothing is launched; `install` runs the returned script.
    pub async fn prepare(&self, package: &VerifiedPackage) -> Result<StagedSwap> {
        tokio::fs::create_dir_all(&self.staging_dir).await?;

        let file_name = self
            .target
            .file_name()
            .ok_or_else(|| {
                UpdateError::Install(format!(
                    "install target {} has no file name",
                    self.target.display()
                ))
            })?
            .to_string_lossy()
            .into_owned();

        let staged_binary = self.staging_dir.join(format!("{}.new", file_name));
        let backup = self.staging_dir.join(format!("{}.backup", file_name));

        tokio::fs::copy(package.path(), &staged_binary)
            .await
            .map_err(|e| UpdateError::Install(format!("failed to stage package: {}", e)))?;

        let script = self.write_script(&staged_binary, &backup, std::process::id())?;

        tracing::info!(
            "Staged update {} for {}",
            package.manifest().latest_version,
            self.target.display()
        );

        Ok(StagedSwap {
            staged_binary,
            backup,
            script,
        })
    }

    #[cfg(windows)]
    fn write_script(&self, new: &Path, backup: &Path, pid: u32) -> Result<PathBuf> {
        let script_path = self.staging_dir.join("swap-update.bat");

        let script = format!(
            r#"@echo off
:: Wait for process {pid} to exit
:wait
tasklist /FI "PID eq {pid}" 2>nul | find "{pid}" >nul
if not errorlevel 1 (
    timeout /t 1 /nobreak > nul
    goto wait
)

if exist "{current}" (
    move /Y "{current}" "{backup}"
    if errorlevel 1 (
        echo Failed to back up current version
        exit /b 1
    )
)

move /Y "{new}" "{current}"
if errorlevel 1 (
    echo Failed to install new version
    if exist "{backup}" (
        move /Y "{backup}" "{current}"
    )
    exit /b 1
)

start "" "{current}"

del "%~f0"
"#,
            pid = pid,
            current = self.target.display(),
            new = new.display(),
            backup = backup.display(),
        );

        std::fs::write(&script_path, script)
            .map_err(|e| UpdateError::Install(format!("failed to write swap script: {}", e)))?;

        Ok(script_path)
    }

    #[cfg(not(windows))]
    fn write_script(&self, new: &Path, backup: &Path, pid: u32) -> Result<PathBuf> {
        let script_path = self.staging_dir.join("swap-update.sh");

        let script = format!(
            r#"#!/bin/sh
# Wait for process {pid} to exit
while kill -0 {pid} 2>/dev/null; do
    sleep 1
done

if [ -f "{current}" ]; then
    mv "{current}" "{backup}" || {{
        echo "Failed to back up current version"
        exit 1
    }}
fi

mv "{new}" "{current}" || {{
    echo "Failed to install new version"
    if [ -f "{backup}" ]; then
        mv "{backup}" "{current}"
    fi
    exit 1
}}

chmod +x "{current}"

"{current}" &

rm "$0"
"#,
            pid = pid,
            current = self.target.display(),
            new = new.display(),
            backup = backup.display(),
        );

        std::fs::write(&script_path, &script)
            .map_err(|e| UpdateError::Install(format!("failed to write swap script: {}", e)))?;

        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&script_path)?.permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&script_path, perms)?;
        }

        Ok(script_path)
    }

    fn launch(script: &Path) -> Result<()> {
        #[cfg(windows)]
        let mut command = {
            let mut cmd = std::process::Command::new("cmd");
            cmd.arg("/C").arg(script);
            cmd
        };

        #[cfg(not(windows))]
        let mut command = {
            let mut cmd = std::process::Command::new("sh");
            cmd.arg(script);
            cmd
        };

        command
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| UpdateError::Install(format!("failed to launch swap script: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl Installer for SwapScriptInstaller {
    async fn install(&self, package: &VerifiedPackage) -> Result<InstallHandoff> {
        let staged = self.prepare(package).await?;
        Self::launch(&staged.script)?;

        tracing::info!(
            "Update script launched: {}. Exit the application to complete the update.",
            staged.script.display()
        );

        Ok(InstallHandoff {
            restart_required: true,
            script: Some(staged.script),
        })
    }
}
