//! Git steps used to populate a release directory.

use regex::Regex;
use std::sync::OnceLock;

use crate::command::RemoteCommand;
use crate::error::Result;
use crate::executor::{Host, RunOptions};
use crate::utils::remote_path;

fn submodule_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[ +\-U]?[0-9a-f]{7,64}\s+(\S+)").expect("submodule status pattern is valid")
    })
}

/// Submodule paths from `git submodule status` output.
pub fn parse_submodules(status: &str) -> Vec<String> {
    status
        .lines()
        .filter_map(|line| submodule_line().captures(line))
        .map(|caps| caps[1].to_string())
        .collect()
}

/// `git config` key/value pointing a submodule at the source clone's object store.
pub fn local_submodule_url(source: &str, submodule: &str) -> (String, String) {
    (
        format!("submodule.{}.url", submodule),
        remote_path::join(source, &format!(".git/modules/{}", submodule)),
    )
}

pub fn list_submodules(host: &Host, repo_dir: &str, opts: &RunOptions) -> Result<Vec<String>> {
    let status = host.run(
        &RemoteCommand::git(["submodule", "status"]).current_dir(repo_dir),
        opts,
    )?;
    Ok(parse_submodules(&status))
}

/// Clone one working tree from another on the same host without touching the network.
///
/// Submodule URLs in the new clone are rewritten to the source's
/// `.git/modules/<name>` so the recursive update is also local.
pub fn clone_from_local_path(
    host: &Host,
    from: &str,
    to: &str,
    opts: &RunOptions,
) -> Result<Vec<String>> {
    let submodules = list_submodules(host, from, opts)?;

    let source = remote_path::join(from, ".git");
    host.run(&RemoteCommand::git(["clone", source.as_str(), to]), opts)?;

    for submodule in &submodules {
        let (key, value) = local_submodule_url(from, submodule);
        host.run(
            &RemoteCommand::git(["config", key.as_str(), value.as_str()]).current_dir(to),
            opts,
        )?;
    }

    host.run(
        &RemoteCommand::git(["submodule", "update", "--init", "--recursive"]).current_dir(to),
        opts,
    )?;

    Ok(submodules)
}

pub fn clone_remote(host: &Host, repo: &str, to: &str, opts: &RunOptions) -> Result<()> {
    host.run(&RemoteCommand::git(["clone", repo, to]), opts)?;
    Ok(())
}

pub fn set_origin(host: &Host, repo_dir: &str, url: &str, opts: &RunOptions) -> Result<()> {
    host.run(
        &RemoteCommand::git(["remote", "set-url", "origin", url]).current_dir(repo_dir),
        opts,
    )?;
    Ok(())
}

/// Resolve a ref to a commit hash, or fail if it does not exist.
pub fn resolve_ref(host: &Host, repo_dir: &str, git_ref: &str, opts: &RunOptions) -> Result<String> {
    host.run(
        &RemoteCommand::git(["rev-parse", "--verify", "--quiet"])
            .arg(format!("{}^{{commit}}", git_ref))
            .current_dir(repo_dir),
        opts,
    )
}

/// Commands that force a working tree to exactly `git_ref`, submodules included,
/// without fetching.
pub fn reset_commands(repo_dir: &str, git_ref: &str) -> Vec<RemoteCommand> {
    vec![
        RemoteCommand::git(["checkout", git_ref]).current_dir(repo_dir),
        RemoteCommand::git(["reset", "--hard", git_ref]).current_dir(repo_dir),
        RemoteCommand::git(["submodule", "sync"]).current_dir(repo_dir),
        RemoteCommand::git(["submodule", "update", "--init", "--recursive", "-q"])
            .current_dir(repo_dir),
        // -ff also removes untracked nested repositories
        RemoteCommand::git(["clean", "-ffd"]).current_dir(repo_dir),
        RemoteCommand::new("find").args([".", "-name", "*.pyc", "-delete"]).current_dir(repo_dir),
    ]
}

/// Fetch, verify, and hard-reset a working tree to `git_ref`. Returns the commit.
pub fn checkout(host: &Host, repo_dir: &str, git_ref: &str, opts: &RunOptions) -> Result<String> {
    host.run(
        &RemoteCommand::git(["remote", "prune", "origin"]).current_dir(repo_dir),
        opts,
    )?;
    host.run(
        &RemoteCommand::git(["fetch", "origin", "--tags", "-q"]).current_dir(repo_dir),
        opts,
    )?;

    let commit = resolve_ref(host, repo_dir, git_ref, opts)?;

    for command in reset_commands(repo_dir, git_ref) {
        host.run(&command, opts)?;
    }

    Ok(commit)
}

pub fn gc(host: &Host, repo_dir: &str, opts: &RunOptions) -> Result<()> {
    host.run(&RemoteCommand::git(["gc"]).current_dir(repo_dir), opts)?;
    Ok(())
}
