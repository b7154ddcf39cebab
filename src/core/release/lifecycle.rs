//! Release directory lifecycle on one host.
//!
//! A release moves `Absent → Cloned → CheckedOut → DependenciesInstalled →
//! ArtifactsCopied → Activated → Recorded`. Any failed step moves it to
//! `Failed`, and every operation refuses to run out of order.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::artifacts::{self, ArtifactReport};
use super::dependencies::{self, DependencyOutcome, PackageSource};
use super::git;
use super::keep_until;
use super::ledger::ReleaseRecord;
use super::offline::{OfflineCodeOutcome, OfflineProvisionOutcome, OfflineTransfer};
use super::paths::{ReleaseLayout, ReleasePathSet};
use super::ReleaseId;
use crate::command::RemoteCommand;
use crate::config::Environment;
use crate::error::{Error, Result};
use crate::executor::{Host, RunOptions};
use crate::utils::remote_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReleaseState {
    Absent,
    Cloned,
    CheckedOut,
    DependenciesInstalled,
    ArtifactsCopied,
    Activated,
    Recorded,
    Failed,
}

impl ReleaseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseState::Absent => "absent",
            ReleaseState::Cloned => "cloned",
            ReleaseState::CheckedOut => "checkedOut",
            ReleaseState::DependenciesInstalled => "dependenciesInstalled",
            ReleaseState::ArtifactsCopied => "artifactsCopied",
            ReleaseState::Activated => "activated",
            ReleaseState::Recorded => "recorded",
            ReleaseState::Failed => "failed",
        }
    }
}

/// Which working tree a checkout updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateTarget {
    /// The release being built.
    #[default]
    NewRelease,
    /// The live release, in place (hotfix).
    Current,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginOutcome {
    pub release_id: ReleaseId,
    pub code_root: String,
    /// Path or URL the code was cloned from.
    pub source: String,
    /// True when the clone came from the current release on the same host.
    pub local: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub submodules: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutOutcome {
    pub directory: String,
    pub git_ref: String,
    pub commit: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationOutcome {
    pub current: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
}

pub struct ReleaseLifecycle<'a> {
    host: Host<'a>,
    env: &'a Environment,
    layout: ReleaseLayout,
    paths: ReleasePathSet,
    state: ReleaseState,
    warnings: Vec<String>,
}

impl<'a> ReleaseLifecycle<'a> {
    pub fn new(host: Host<'a>, env: &'a Environment, id: &ReleaseId) -> Self {
        Self::resume(host, env, id, ReleaseState::Absent)
    }

    /// Pick up a release that earlier invocations already moved to `state`.
    pub fn resume(host: Host<'a>, env: &'a Environment, id: &ReleaseId, state: ReleaseState) -> Self {
        let layout = ReleaseLayout::new(env);
        let paths = layout.for_release(id);
        Self {
            host,
            env,
            layout,
            paths,
            state,
            warnings: Vec::new(),
        }
    }

    pub fn state(&self) -> ReleaseState {
        self.state
    }

    pub fn paths(&self) -> &ReleasePathSet {
        &self.paths
    }

    pub fn layout(&self) -> &ReleaseLayout {
        &self.layout
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    fn service(&self) -> RunOptions {
        RunOptions::as_user(&self.env.sudo_user)
    }

    /// Run one step: check the state is legal, then advance or fail.
    pub(crate) fn step<T>(
        &mut self,
        operation: &str,
        allowed: &[ReleaseState],
        next: ReleaseState,
        body: impl FnOnce(&Self) -> Result<T>,
    ) -> Result<T> {
        if !allowed.contains(&self.state) {
            return Err(Error::validation_invalid_state(
                operation,
                self.state.as_str(),
                allowed.iter().map(|s| s.as_str().to_string()).collect(),
            ));
        }

        match body(&*self) {
            Ok(value) => {
                self.state = next;
                Ok(value)
            }
            Err(err) => {
                self.state = ReleaseState::Failed;
                log_status!(
                    "release",
                    "{} failed on {}: {}",
                    operation,
                    self.host.name(),
                    err.message
                );
                Err(err)
            }
        }
    }

    /// Create the release directory and populate it with a clone.
    ///
    /// Clones from the current release when one exists so only new objects
    /// come over the network at checkout.
    pub fn begin_release(&mut self) -> Result<BeginOutcome> {
        self.step(
            "begin_release",
            &[ReleaseState::Absent],
            ReleaseState::Cloned,
            |this| {
                this.clone_code().map_err(|e| {
                    Error::release_clone_failed(this.host.name(), this.paths.id.as_str(), &e)
                })
            },
        )
    }

    fn clone_code(&self) -> Result<BeginOutcome> {
        let opts = self.service();
        let code_root = &self.paths.code_root;

        self.host.run(
            &RemoteCommand::new("mkdir").args(["-p", code_root.as_str()]),
            &opts,
        )?;

        let (source, local, submodules) = if self.host.exists(&self.layout.current)? {
            let submodules =
                git::clone_from_local_path(&self.host, &self.layout.current, code_root, &opts)?;
            git::set_origin(&self.host, code_root, &self.env.code_repo, &opts)?;
            (self.layout.current.clone(), true, submodules)
        } else {
            git::clone_remote(&self.host, &self.env.code_repo, code_root, &opts)?;
            (self.env.code_repo.clone(), false, Vec::new())
        };

        log_status!("release", "Cloned {} into {} on {}", source, code_root, self.host.name());

        Ok(BeginOutcome {
            release_id: self.paths.id.clone(),
            code_root: code_root.clone(),
            source,
            local,
            submodules,
        })
    }

    pub fn checkout(&mut self, git_ref: &str) -> Result<CheckoutOutcome> {
        self.step(
            "checkout",
            &[ReleaseState::Cloned],
            ReleaseState::CheckedOut,
            |this| {
                checkout_directory(&this.host, &this.paths.code_root, git_ref, &this.service())
                    .map_err(|e| Error::release_checkout_failed(this.host.name(), git_ref, &e))
            },
        )
    }

    /// Populate the release from staged bundles instead of the network.
    pub fn transfer_offline(
        &mut self,
        transfer: &OfflineTransfer,
        git_ref: &str,
    ) -> Result<OfflineCodeOutcome> {
        self.step(
            "transfer_offline",
            &[ReleaseState::Absent],
            ReleaseState::CheckedOut,
            |this| {
                transfer
                    .update_code(&this.host, &this.layout, &this.paths, git_ref)
                    .map_err(|e| {
                        Error::release_clone_failed(this.host.name(), this.paths.id.as_str(), &e)
                    })
            },
        )
    }

    pub fn install_dependencies(&mut self) -> Result<DependencyOutcome> {
        self.step(
            "install_dependencies",
            &[ReleaseState::CheckedOut],
            ReleaseState::DependenciesInstalled,
            |this| {
                dependencies::install(&this.host, this.env, &this.paths, &PackageSource::Index)
                    .map_err(|e| {
                        Error::release_dependency_failed(
                            this.host.name(),
                            this.paths.id.as_str(),
                            &e,
                        )
                    })
            },
        )
    }

    pub fn install_dependencies_offline(
        &mut self,
        transfer: &OfflineTransfer,
    ) -> Result<OfflineProvisionOutcome> {
        self.step(
            "install_dependencies_offline",
            &[ReleaseState::CheckedOut],
            ReleaseState::DependenciesInstalled,
            |this| {
                transfer
                    .provision(&this.host, &this.paths)
                    .map_err(|e| {
                        Error::release_dependency_failed(
                            this.host.name(),
                            this.paths.id.as_str(),
                            &e,
                        )
                    })
            },
        )
    }

    /// Copy configured artifacts from the current release. Missing sources
    /// never fail the step; they show up as placeholders or warnings.
    pub fn copy_forward_artifacts(&mut self) -> Result<ArtifactReport> {
        let report = self.step(
            "copy_forward_artifacts",
            &[ReleaseState::CheckedOut, ReleaseState::DependenciesInstalled],
            ReleaseState::ArtifactsCopied,
            |this| {
                let groups = this.env.groups_of(this.host.server());
                artifacts::copy_forward(
                    &this.host,
                    &this.env.artifacts,
                    &groups,
                    &this.layout.current,
                    &this.paths.code_root,
                )
            },
        )?;
        self.warnings.extend(report.warnings.iter().cloned());
        Ok(report)
    }

    /// Point the current link at this release.
    pub fn activate(&mut self) -> Result<ActivationOutcome> {
        self.step(
            "activate",
            &[ReleaseState::ArtifactsCopied],
            ReleaseState::Activated,
            |this| activate_target(&this.host, &this.layout, &this.paths.code_root),
        )
    }

    pub fn record_success(&mut self) -> Result<()> {
        self.step(
            "record_success",
            &[ReleaseState::Activated],
            ReleaseState::Recorded,
            |this| ReleaseRecord::new(this.host, &this.layout).append(&this.paths.id),
        )
    }

    /// Withdraw this release's ledger entry after a later problem.
    pub fn mark_unsuccessful(&mut self) -> Result<()> {
        self.step(
            "mark_unsuccessful",
            &[ReleaseState::Recorded],
            ReleaseState::Failed,
            |this| ReleaseRecord::new(this.host, &this.layout).pop_last(),
        )
    }

    /// Shield this release from retention for `days` days.
    pub fn mark_keep_until(&mut self, days: u32, now: DateTime<Utc>) -> Result<String> {
        mark_keep_until(&self.host, self.env, &self.paths.code_root, days, now)
    }
}

/// Resolve the current link. `None` before the first release.
pub fn current_target(host: &Host, layout: &ReleaseLayout) -> Result<Option<String>> {
    let target = host.query(
        &RemoteCommand::new("readlink").arg(&layout.current),
        &RunOptions::superuser(),
    )?;
    Ok(target.filter(|t| !t.is_empty()))
}

/// Commands that swap the current link in one rename.
pub fn activation_commands(layout: &ReleaseLayout, target: &str) -> Vec<RemoteCommand> {
    let staged = format!("{}.next", layout.current);
    vec![
        RemoteCommand::new("ln").args(["-sfn", target, staged.as_str()]),
        RemoteCommand::new("mv").args(["-Tf", staged.as_str(), layout.current.as_str()]),
    ]
}

/// Atomically repoint the current link at `target` and confirm it took.
///
/// Also the rollback primitive: `target` may be any existing release.
pub fn activate_target(host: &Host, layout: &ReleaseLayout, target: &str) -> Result<ActivationOutcome> {
    let target = target.trim_end_matches('/');
    if !host.exists(target)? {
        return Err(Error::release_activation_failed(
            host.name(),
            target,
            "target release does not exist",
        ));
    }

    let previous = current_target(host, layout)?;

    for command in activation_commands(layout, target) {
        host.sudo(&command)?;
    }

    let resolved = current_target(host, layout)?;
    if resolved.as_deref().map(|r| r.trim_end_matches('/')) != Some(target) {
        return Err(Error::release_activation_failed(
            host.name(),
            target,
            &format!(
                "current link resolves to {}",
                resolved.as_deref().unwrap_or("nothing")
            ),
        ));
    }

    log_status!("release", "{} now points at {} on {}", layout.current, target, host.name());

    Ok(ActivationOutcome {
        current: layout.current.clone(),
        target: target.to_string(),
        previous,
    })
}

/// Fetch and hard-reset a working tree. Shared by new releases and hotfixes.
pub fn checkout_directory(
    host: &Host,
    directory: &str,
    git_ref: &str,
    opts: &RunOptions,
) -> Result<CheckoutOutcome> {
    let commit = git::checkout(host, directory, git_ref, opts)?;
    log_status!("release", "Checked out {} ({}) on {}", git_ref, commit, host.name());
    Ok(CheckoutOutcome {
        directory: directory.to_string(),
        git_ref: git_ref.to_string(),
        commit,
    })
}

/// Hotfix: update the live release in place.
pub fn checkout_in_place(host: &Host, env: &Environment, git_ref: &str) -> Result<CheckoutOutcome> {
    let layout = ReleaseLayout::new(env);
    if !host.exists(&layout.current)? {
        return Err(Error::release_not_found(layout.current.clone())
            .with_hint("A hotfix needs an existing current release"));
    }
    checkout_directory(host, &layout.current, git_ref, &RunOptions::as_user(&env.sudo_user))
        .map_err(|e| Error::release_checkout_failed(host.name(), git_ref, &e))
}

/// Drop the most recent ledger entry without a lifecycle in hand.
pub fn mark_last_unsuccessful(host: &Host, env: &Environment) -> Result<()> {
    ReleaseRecord::new(*host, &ReleaseLayout::new(env)).pop_last()
}

/// Release recorded before the most recent one, as a full path.
pub fn previous_release(host: &Host, env: &Environment) -> Result<Option<String>> {
    let layout = ReleaseLayout::new(env);
    let previous = ReleaseRecord::new(*host, &layout).previous()?;
    Ok(previous.map(|id| remote_path::join(&layout.releases_dir, &id)))
}

pub fn release_count(host: &Host, env: &Environment) -> Result<usize> {
    ReleaseRecord::new(*host, &ReleaseLayout::new(env)).count()
}

pub fn release_exists(host: &Host, path: &str) -> Result<bool> {
    host.exists(path)
}

/// Touch a KeepUntil marker dated `now + days` inside `release_dir`.
pub fn mark_keep_until(
    host: &Host,
    env: &Environment,
    release_dir: &str,
    days: u32,
    now: DateTime<Utc>,
) -> Result<String> {
    if !host.exists(release_dir)? {
        return Err(Error::release_not_found(release_dir));
    }
    let until = now.naive_utc() + Duration::days(i64::from(days));
    let name = keep_until::marker_name(
        &env.retention.keep_until_prefix,
        &env.retention.keep_until_format,
        until,
    )?;
    let marker = remote_path::join(release_dir, &name);
    host.sudo(&RemoteCommand::new("touch").arg(&marker))?;
    log_status!("release", "Keeping {} until {}", release_dir, until.format("%Y-%m-%d"));
    Ok(marker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::executor::{CommandOutput, RemoteExecutor};
    use crate::server::Server;
    use std::path::Path;
    use std::sync::Mutex;

    fn env() -> Environment {
        config::from_json(
            r#"{
                "codeRepo": "git@example.com:app.git",
                "root": "/srv/app",
                "hosts": {"web": [{"host": "web1", "user": "deploy"}]}
            }"#,
            "test",
        )
        .unwrap()
    }

    /// Fails any command whose rendering contains `fail_on`; everything else succeeds.
    struct Scripted {
        fail_on: Option<&'static str>,
        exit_code: i32,
        stderr: &'static str,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(fail_on: Option<&'static str>) -> Self {
            Self {
                fail_on,
                exit_code: 2,
                stderr: "boom",
                calls: Mutex::new(Vec::new()),
            }
        }

        /// `test -e` answers "no such path" for anything matching `needle`.
        fn missing(needle: &'static str) -> Self {
            Self {
                exit_code: 1,
                stderr: "",
                ..Self::new(Some(needle))
            }
        }
    }

    impl RemoteExecutor for Scripted {
        fn run(&self, _: &Server, command: &RemoteCommand, _: &RunOptions) -> Result<CommandOutput> {
            let line = command.render();
            self.calls.lock().unwrap().push(line.clone());
            match self.fail_on {
                Some(needle) if line.contains(needle) => Ok(CommandOutput {
                    stdout: String::new(),
                    stderr: self.stderr.to_string(),
                    success: false,
                    exit_code: self.exit_code,
                }),
                _ => Ok(CommandOutput::ok("")),
            }
        }

        fn upload(&self, _: &Server, _: &Path, _: &str) -> Result<CommandOutput> {
            Ok(CommandOutput::ok(""))
        }

        fn run_local(&self, _: &RemoteCommand) -> Result<CommandOutput> {
            Ok(CommandOutput::ok(""))
        }
    }

    #[test]
    fn steps_out_of_order_are_rejected() {
        let env = env();
        let exec = Scripted::new(None);
        let server = Server::new("web1", "deploy");
        let id = ReleaseId::parse("r1").unwrap();
        let mut lifecycle = ReleaseLifecycle::new(Host::new(&exec, &server, true), &env, &id);

        let err = lifecycle.activate().unwrap_err();

        assert_eq!(err.code.as_str(), "validation.invalid_state");
        assert_eq!(lifecycle.state(), ReleaseState::Absent);
        assert!(exec.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn failed_step_moves_to_failed() {
        let env = env();
        let exec = Scripted::new(Some("git clone"));
        let server = Server::new("web1", "deploy");
        let id = ReleaseId::parse("r1").unwrap();
        let mut lifecycle = ReleaseLifecycle::new(Host::new(&exec, &server, true), &env, &id);

        let err = lifecycle.begin_release().unwrap_err();

        assert_eq!(err.code.as_str(), "release.clone_failed");
        assert_eq!(err.details["cause"]["code"], "remote.command_failed");
        assert_eq!(lifecycle.state(), ReleaseState::Failed);
        assert!(lifecycle.checkout("v1").is_err());
    }

    #[test]
    fn artifacts_may_follow_checkout_directly() {
        let env = config::from_json(
            r#"{
                "codeRepo": "git@example.com:app.git",
                "root": "/srv/app",
                "hosts": {"web": [{"host": "web1", "user": "deploy"}]},
                "artifacts": []
            }"#,
            "test",
        )
        .unwrap();
        let exec = Scripted::new(None);
        let server = Server::new("web1", "deploy");
        let id = ReleaseId::parse("r1").unwrap();
        let mut lifecycle =
            ReleaseLifecycle::resume(Host::new(&exec, &server, true), &env, &id, ReleaseState::CheckedOut);

        lifecycle.copy_forward_artifacts().unwrap();

        assert_eq!(lifecycle.state(), ReleaseState::ArtifactsCopied);
    }

    #[test]
    fn activation_stages_then_renames() {
        let layout = ReleaseLayout::new(&env());
        let rendered: Vec<String> = activation_commands(&layout, "/srv/app/releases/r2")
            .iter()
            .map(|c| c.render())
            .collect();

        assert_eq!(
            rendered,
            [
                "ln -sfn /srv/app/releases/r2 /srv/app/current.next",
                "mv -Tf /srv/app/current.next /srv/app/current",
            ]
        );
    }

    #[test]
    fn activation_refuses_missing_target() {
        let env = env();
        let exec = Scripted::missing("test -e");
        let server = Server::new("web1", "deploy");
        let host = Host::new(&exec, &server, true);

        let err = activate_target(&host, &ReleaseLayout::new(&env), "/srv/app/releases/nope").unwrap_err();

        assert_eq!(err.code.as_str(), "release.activation_failed");
        assert!(!exec.calls.lock().unwrap().iter().any(|c| c.starts_with("ln ")));
    }
}
