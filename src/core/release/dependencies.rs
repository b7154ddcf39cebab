//! Python dependency provisioning for a release.

use serde::Serialize;

use super::paths::ReleasePathSet;
use crate::command::RemoteCommand;
use crate::config::Environment;
use crate::error::Result;
use crate::executor::{Host, RunOptions};
use crate::utils::remote_path;

/// Where pip resolves packages from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSource {
    /// The package index, through the environment's proxy if one is set.
    Index,
    /// A pre-uploaded wheel directory; no network access.
    Wheelhouse(String),
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyOutcome {
    /// Virtualenv the new one was cloned from, when a current one existed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloned_from: Option<String>,
    pub uninstall_script_ran: bool,
    pub requirements: Vec<String>,
}

fn service_user(env: &Environment) -> RunOptions {
    RunOptions::as_user(&env.sudo_user)
}

fn venv_bin(paths: &ReleasePathSet) -> String {
    remote_path::join(&paths.virtualenv_root, "bin")
}

/// Seed the release's virtualenv from the current release's.
///
/// Returns the resolved source, or `None` on a first deploy.
pub fn clone_virtualenv(
    host: &Host,
    env: &Environment,
    paths: &ReleasePathSet,
) -> Result<Option<String>> {
    if !host.exists(&paths.virtualenv_current)? {
        return Ok(None);
    }

    // virtualenv-clone cannot follow the current symlink itself
    let source = host.run(
        &RemoteCommand::new("readlink").args(["-f", paths.virtualenv_current.as_str()]),
        &service_user(env),
    )?;
    host.run(
        &RemoteCommand::new("virtualenv-clone").args([source.as_str(), paths.virtualenv_root.as_str()]),
        &service_user(env),
    )?;

    log_status!("release", "Cloned virtualenv from {}", source);
    Ok(Some(source))
}

pub fn uninstall_command(env: &Environment, paths: &ReleasePathSet, script: &str) -> RemoteCommand {
    RemoteCommand::new("bash")
        .arg(script)
        .current_dir(&paths.code_root)
        .env("HOME", format!("/home/{}", env.sudo_user))
        .env("VIRTUAL_ENV", &paths.virtualenv_root)
        .path_prefix(venv_bin(paths))
}

/// Remove packages listed for uninstall. Returns false when no script is configured.
pub fn run_uninstall_script(host: &Host, env: &Environment, paths: &ReleasePathSet) -> Result<bool> {
    let Some(script) = env.dependencies.uninstall_script.as_deref() else {
        return Ok(false);
    };
    host.run(
        &uninstall_command(env, paths, script),
        &service_user(env).with_timeout(env.dependencies.step_timeout()),
    )?;
    Ok(true)
}

/// Requirement manifests as absolute paths inside the release.
pub fn requirement_files(env: &Environment, paths: &ReleasePathSet) -> Vec<String> {
    env.dependencies
        .requirements
        .iter()
        .map(|file| remote_path::join(&paths.code_root, file))
        .collect()
}

pub fn pip_install_command(
    env: &Environment,
    paths: &ReleasePathSet,
    source: &PackageSource,
) -> RemoteCommand {
    let mut cmd = RemoteCommand::new(remote_path::join(&venv_bin(paths), "pip"))
        .args(["install", "--quiet", "--timeout"])
        .arg(env.dependencies.pip_timeout_secs.to_string());

    match source {
        PackageSource::Index => {
            if let Some(proxy) = &env.http_proxy {
                cmd = cmd.args(["--proxy", proxy.as_str()]);
            }
        }
        PackageSource::Wheelhouse(dir) => {
            cmd = cmd.args(["--no-index", "--find-links", dir.as_str()]);
        }
    }

    for file in requirement_files(env, paths) {
        cmd = cmd.args(["-r", file.as_str()]);
    }

    cmd.current_dir(&paths.code_root)
        .env("HOME", format!("/home/{}", env.sudo_user))
        .env("VIRTUAL_ENV", &paths.virtualenv_root)
        .path_prefix(venv_bin(paths))
}

pub fn pip_install(
    host: &Host,
    env: &Environment,
    paths: &ReleasePathSet,
    source: &PackageSource,
) -> Result<Vec<String>> {
    host.run(
        &pip_install_command(env, paths, source),
        &service_user(env).with_timeout(env.dependencies.step_timeout()),
    )?;
    Ok(requirement_files(env, paths))
}

/// Clone, uninstall, install. Partial installs are left in place on failure.
pub fn install(
    host: &Host,
    env: &Environment,
    paths: &ReleasePathSet,
    source: &PackageSource,
) -> Result<DependencyOutcome> {
    let cloned_from = clone_virtualenv(host, env, paths)?;
    let uninstall_script_ran = run_uninstall_script(host, env, paths)?;
    let requirements = pip_install(host, env, paths, source)?;

    Ok(DependencyOutcome {
        cloned_from,
        uninstall_script_ran,
        requirements,
    })
}
