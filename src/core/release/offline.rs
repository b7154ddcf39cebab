//! Offline releases: code and packages arrive from the controller's staging
//! area instead of the network.
//!
//! The host first clones its current release into a staging directory in the
//! login user's home, the controller pushes the new ref into that clone over
//! SSH, and the release is then cloned locally from the staging copy.

use serde::Serialize;
use std::path::{Path, PathBuf};

use super::dependencies::{self, PackageSource};
use super::git;
use super::paths::{ReleaseLayout, ReleasePathSet};
use crate::command::RemoteCommand;
use crate::config::Environment;
use crate::error::{Error, Result};
use crate::executor::{Host, RunOptions};
use crate::utils::{remote_path, shell};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineCodeOutcome {
    pub staging_dir: String,
    pub code_root: String,
    pub git_ref: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub submodules: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineProvisionOutcome {
    pub bundles: Vec<String>,
    pub copied: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloned_virtualenv_from: Option<String>,
    pub wheel_dir: String,
}

pub struct OfflineTransfer<'e> {
    env: &'e Environment,
    /// Controller-side directory holding the bundle archives.
    bundle_dir: PathBuf,
    /// Controller-side checkout the new ref is pushed from.
    local_checkout: PathBuf,
}

impl<'e> OfflineTransfer<'e> {
    pub fn new(env: &'e Environment) -> Result<Self> {
        let expanded = shellexpand::full(&env.offline.staging_dir).map_err(|e| {
            Error::config_invalid_value(
                "offline.stagingDir",
                Some(env.offline.staging_dir.clone()),
                e.to_string(),
            )
        })?;
        let bundle_dir = PathBuf::from(expanded.as_ref());
        let local_checkout = bundle_dir.join(&env.offline.checkout_dir);

        Ok(Self {
            env,
            bundle_dir,
            local_checkout,
        })
    }

    pub fn bundle_dir(&self) -> &Path {
        &self.bundle_dir
    }

    /// `<staging home>/<release id>` on the host.
    pub fn staging_dir(&self, host: &Host, paths: &ReleasePathSet) -> String {
        remote_path::join(
            &self.env.offline.staging_home_for(host.server()),
            paths.id.as_str(),
        )
    }

    pub fn create_staging_dir(&self, host: &Host, paths: &ReleasePathSet) -> Result<String> {
        let dir = self.staging_dir(host, paths);
        host.run(
            &RemoteCommand::new("mkdir").args(["-p", dir.as_str()]),
            &RunOptions::plain(),
        )?;
        Ok(dir)
    }

    /// Controller-side pushes that bring the staging clone up to `git_ref`.
    pub fn push_commands(&self, host: &Host, staging: &str, git_ref: &str) -> Vec<RemoteCommand> {
        let url = host.server().ssh_url(staging);
        let checkout = self.local_checkout.to_string_lossy().to_string();
        let remote = format!("{}/.git", url);

        vec![
            RemoteCommand::git(["push", remote.as_str(), git_ref]).current_dir(&checkout),
            RemoteCommand::git([
                "submodule".to_string(),
                "foreach".to_string(),
                format!("git push {}/$path/.git --all", shell::quote_arg(&url)),
            ])
            .current_dir(&checkout),
        ]
    }

    pub fn push_code(&self, host: &Host, staging: &str, git_ref: &str) -> Result<()> {
        if !self.local_checkout.is_dir() {
            return Err(Error::validation_invalid_argument(
                "offline.checkoutDir",
                format!(
                    "Staged checkout not found at {}",
                    self.local_checkout.display()
                ),
                None,
            ));
        }
        for command in self.push_commands(host, staging, git_ref) {
            host.run_local(&command)?;
        }
        log_status!("offline", "Pushed {} to {}:{}", git_ref, host.name(), staging);
        Ok(())
    }

    /// In-release commands after cloning from staging: no fetch, no network.
    pub fn reset_commands(&self, code_root: &str, git_ref: &str) -> Vec<RemoteCommand> {
        vec![
            RemoteCommand::git(["checkout", git_ref]).current_dir(code_root),
            RemoteCommand::git(["reset", "--hard", git_ref]).current_dir(code_root),
            RemoteCommand::git(["submodule", "update", "--init", "--recursive"])
                .current_dir(code_root),
            RemoteCommand::git(["clean", "-ffd"]).current_dir(code_root),
            RemoteCommand::git(["remote", "set-url", "origin", self.env.code_repo.as_str()])
                .current_dir(code_root),
        ]
    }

    /// Steps 1–5 of an offline release: stage, push, clone into the release, reset.
    pub fn update_code(
        &self,
        host: &Host,
        layout: &ReleaseLayout,
        paths: &ReleasePathSet,
        git_ref: &str,
    ) -> Result<OfflineCodeOutcome> {
        if !host.exists(&layout.current)? {
            return Err(Error::release_not_found(layout.current.clone())
                .with_hint("Offline releases are cloned from the current release"));
        }

        let staging = self.create_staging_dir(host, paths)?;
        git::clone_from_local_path(host, &layout.current, &staging, &RunOptions::plain())?;

        self.push_code(host, &staging, git_ref)?;

        let service = RunOptions::as_user(&self.env.sudo_user);
        let submodules = git::clone_from_local_path(host, &staging, &paths.code_root, &service)?;
        for command in self.reset_commands(&paths.code_root, git_ref) {
            host.run(&command, &service)?;
        }

        Ok(OfflineCodeOutcome {
            staging_dir: staging,
            code_root: paths.code_root.clone(),
            git_ref: git_ref.to_string(),
            submodules,
        })
    }

    fn archives(&self) -> [&str; 3] {
        [
            self.env.offline.wheels_archive.as_str(),
            self.env.offline.npm_archive.as_str(),
            self.env.offline.bower_archive.as_str(),
        ]
    }

    pub fn extract_command(&self, staging: &str, archive: &str) -> RemoteCommand {
        let archive_path = remote_path::join(staging, archive);
        RemoteCommand::new("tar")
            .args(["-xzf", archive_path.as_str(), "-C", staging])
            .args([
                "--strip-components".to_string(),
                self.env.offline.strip_components.to_string(),
            ])
    }

    /// Upload each bundle archive into the staging directory and unpack it there.
    pub fn upload_bundles(&self, host: &Host, staging: &str) -> Result<Vec<String>> {
        let mut uploaded = Vec::new();

        for archive in self.archives() {
            let local = self.bundle_dir.join(archive);
            host.upload(&local, &remote_path::join(staging, archive))?;
            host.run(&self.extract_command(staging, archive), &RunOptions::plain())?;
            log_status!("offline", "Unpacked {} on {}", archive, host.name());
            uploaded.push(archive.to_string());
        }

        Ok(uploaded)
    }

    /// Copy unpacked front-end dependency trees into the release.
    pub fn copy_bundled_modules(
        &self,
        host: &Host,
        staging: &str,
        paths: &ReleasePathSet,
    ) -> Result<Vec<String>> {
        let mut copied = Vec::new();
        for dir in ["node_modules", "bower_components"] {
            let source = remote_path::join(staging, dir);
            host.sudo(&RemoteCommand::new("cp").args([
                "-r",
                source.as_str(),
                paths.code_root.as_str(),
            ]))?;
            copied.push(dir.to_string());
        }
        Ok(copied)
    }

    pub fn pip_install(&self, host: &Host, staging: &str, paths: &ReleasePathSet) -> Result<String> {
        let wheel_dir = remote_path::join(staging, &self.env.offline.wheel_dir);
        dependencies::pip_install(
            host,
            self.env,
            paths,
            &PackageSource::Wheelhouse(wheel_dir.clone()),
        )?;
        Ok(wheel_dir)
    }

    /// Offline stand-in for dependency installation.
    pub fn provision(&self, host: &Host, paths: &ReleasePathSet) -> Result<OfflineProvisionOutcome> {
        let staging = self.create_staging_dir(host, paths)?;
        let bundles = self.upload_bundles(host, &staging)?;
        let copied = self.copy_bundled_modules(host, &staging, paths)?;
        let cloned_virtualenv_from = dependencies::clone_virtualenv(host, self.env, paths)?;
        let wheel_dir = self.pip_install(host, &staging, paths)?;

        Ok(OfflineProvisionOutcome {
            bundles,
            copied,
            cloned_virtualenv_from,
            wheel_dir,
        })
    }

    /// Empty the host's staging home once a deploy is done with it.
    pub fn clean_staging(&self, host: &Host) -> Result<String> {
        let home = self.env.offline.staging_home_for(host.server());
        if !host.exists(&home)? {
            return Ok(home);
        }
        host.run(
            &RemoteCommand::new("find")
                .args([home.as_str(), "-mindepth", "1", "-maxdepth", "1"])
                .args(["-exec", "rm", "-rf", "{}", "+"]),
            &RunOptions::plain(),
        )?;
        log_status!("offline", "Emptied {} on {}", home, host.name());
        Ok(home)
    }
}
