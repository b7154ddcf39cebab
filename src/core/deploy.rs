//! Deploy orchestration across a host group.
//!
//! Each phase runs on every selected host before the next phase starts, and a
//! phase with any failed host stops the deploy. No host activates a release
//! until every host has provisioned it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::{Environment, ALL_HOSTS};
use crate::error::{Error, Result};
use crate::executor::{Host, RemoteExecutor};
use crate::fanout::{self, Execution};
use crate::output::BulkResult;
use crate::release::lifecycle;
use crate::release::{
    CleanRequest, OfflineTransfer, ReleaseId, ReleaseLayout, ReleaseLifecycle, ReleaseState,
    RetentionManager,
};
use crate::server::Server;

/// Which hosts an operation runs on, and how.
#[derive(Debug, Clone)]
pub struct HostSelection {
    pub group: String,
    pub execution: Execution,
}

impl Default for HostSelection {
    fn default() -> Self {
        Self {
            group: ALL_HOSTS.to_string(),
            execution: Execution::Parallel,
        }
    }
}

impl HostSelection {
    pub fn new(group: impl Into<String>, execution: Execution) -> Self {
        Self {
            group: group.into(),
            execution,
        }
    }
}

/// Run `op` on every host of the selection, one result per host.
pub fn on_group<T, F>(
    executor: &dyn RemoteExecutor,
    env: &Environment,
    selection: &HostSelection,
    action: &str,
    op: F,
) -> Result<BulkResult<T>>
where
    T: Serialize + Send,
    F: Fn(Host) -> Result<T> + Sync,
{
    let servers = env.servers_for(&selection.group)?;
    Ok(run_on(executor, env, &servers, selection.execution, action, op))
}

fn run_on<T, F>(
    executor: &dyn RemoteExecutor,
    env: &Environment,
    servers: &[Server],
    execution: Execution,
    action: &str,
    op: F,
) -> BulkResult<T>
where
    T: Serialize + Send,
    F: Fn(Host) -> Result<T> + Sync,
{
    fanout::on_hosts(action, servers, execution, |server| {
        op(Host::new(executor, server, env.elevate))
    })
}

fn to_json<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::internal_json(e.to_string(), None))
}

#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub git_ref: String,
    pub selection: HostSelection,
    pub offline: bool,
    /// Releases to keep besides the current one; the environment's default when unset.
    pub keep: Option<usize>,
    /// Shield the new release from retention for this many days.
    pub keep_days: Option<u32>,
    /// Use this id instead of one generated from the clock.
    pub release_id: Option<ReleaseId>,
    pub now: DateTime<Utc>,
}

impl DeployConfig {
    pub fn new(git_ref: impl Into<String>) -> Self {
        Self {
            git_ref: git_ref.into(),
            selection: HostSelection::default(),
            offline: false,
            keep: None,
            keep_days: None,
            release_id: None,
            now: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DeployStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResult {
    pub release_id: ReleaseId,
    pub git_ref: String,
    pub status: DeployStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<String>,
    pub phases: Vec<BulkResult<Value>>,
}

struct Deployment<'a> {
    executor: &'a dyn RemoteExecutor,
    env: &'a Environment,
    servers: Vec<Server>,
    execution: Execution,
    phases: Vec<BulkResult<Value>>,
}

impl<'a> Deployment<'a> {
    /// Run one phase everywhere. Returns false if any host failed.
    fn phase<T, F>(&mut self, name: &str, op: F) -> bool
    where
        T: Serialize,
        F: Fn(Host) -> Result<T> + Sync,
    {
        log_status!("deploy", "{} on {} host(s)", name, self.servers.len());
        let result = run_on(
            self.executor,
            self.env,
            &self.servers,
            self.execution,
            name,
            |host| op(host).and_then(to_json),
        );
        let ok = result.all_succeeded();
        self.phases.push(result);
        ok
    }
}

/// Full release: fetch, provision, copy artifacts, activate, record, clean.
pub fn deploy(
    executor: &dyn RemoteExecutor,
    env: &Environment,
    config: &DeployConfig,
) -> Result<DeployResult> {
    let id = match &config.release_id {
        Some(id) => id.clone(),
        None => ReleaseId::generate(&env.retention.release_id_format, config.now)?,
    };
    let transfer = if config.offline {
        Some(OfflineTransfer::new(env)?)
    } else {
        None
    };

    let mut run = Deployment {
        executor,
        env,
        servers: env.servers_for(&config.selection.group)?,
        execution: config.selection.execution,
        phases: Vec::new(),
    };
    let git_ref = config.git_ref.as_str();

    let failed = 'phases: {
        match &transfer {
            Some(transfer) => {
                if !run.phase("release.transfer", |host| {
                    ReleaseLifecycle::resume(host, env, &id, ReleaseState::Absent)
                        .transfer_offline(transfer, git_ref)
                }) {
                    break 'phases Some("release.transfer");
                }
                if !run.phase("release.dependencies", |host| {
                    ReleaseLifecycle::resume(host, env, &id, ReleaseState::CheckedOut)
                        .install_dependencies_offline(transfer)
                }) {
                    break 'phases Some("release.dependencies");
                }
            }
            None => {
                if !run.phase("release.begin", |host| {
                    ReleaseLifecycle::resume(host, env, &id, ReleaseState::Absent)
                        .begin_release()
                }) {
                    break 'phases Some("release.begin");
                }
                if !run.phase("release.checkout", |host| {
                    ReleaseLifecycle::resume(host, env, &id, ReleaseState::Cloned)
                        .checkout(git_ref)
                }) {
                    break 'phases Some("release.checkout");
                }
                if !run.phase("release.dependencies", |host| {
                    ReleaseLifecycle::resume(host, env, &id, ReleaseState::CheckedOut)
                        .install_dependencies()
                }) {
                    break 'phases Some("release.dependencies");
                }
            }
        }

        if !run.phase("release.artifacts", |host| {
            ReleaseLifecycle::resume(host, env, &id, ReleaseState::DependenciesInstalled)
                .copy_forward_artifacts()
        }) {
            break 'phases Some("release.artifacts");
        }
        if !run.phase("release.activate", |host| {
            ReleaseLifecycle::resume(host, env, &id, ReleaseState::ArtifactsCopied)
                .activate()
        }) {
            break 'phases Some("release.activate");
        }
        if !run.phase("release.record", |host| {
            ReleaseLifecycle::resume(host, env, &id, ReleaseState::Activated)
                .record_success()
        }) {
            break 'phases Some("release.record");
        }

        if let Some(days) = config.keep_days {
            if !run.phase("release.keep_until", |host| {
                ReleaseLifecycle::resume(host, env, &id, ReleaseState::Recorded)
                    .mark_keep_until(days, config.now)
            }) {
                break 'phases Some("release.keep_until");
            }
        }

        let request = CleanRequest::new(config.keep.unwrap_or(env.retention.keep))
            .in_progress(Some(id.clone()))
            .at(config.now);
        if !run.phase("clean", |host| {
            RetentionManager::new(host, env).clean_releases(&request)
        }) {
            break 'phases Some("clean");
        }

        if let Some(transfer) = &transfer {
            if !run.phase("offline.clean", |host| transfer.clean_staging(&host)) {
                break 'phases Some("offline.clean");
            }
        }

        None
    };

    if let Some(phase) = failed {
        log_status!("deploy", "Stopped after {} failed; later phases skipped", phase);
    }

    Ok(DeployResult {
        release_id: id.clone(),
        git_ref: config.git_ref.clone(),
        status: if failed.is_some() {
            DeployStatus::Failed
        } else {
            DeployStatus::Succeeded
        },
        failed_phase: failed.map(str::to_string),
        phases: run.phases,
    })
}

/// Point every host back at its previous recorded release.
pub fn rollback(
    executor: &dyn RemoteExecutor,
    env: &Environment,
    selection: &HostSelection,
) -> Result<BulkResult<lifecycle::ActivationOutcome>> {
    on_group(executor, env, selection, "release.rollback", |host| {
        let previous = lifecycle::previous_release(&host, env)?.ok_or_else(|| {
            Error::validation_invalid_state(
                "rollback",
                "the only recorded release",
                vec!["two or more recorded releases".to_string()],
            )
        })?;
        lifecycle::activate_target(&host, &ReleaseLayout::new(env), &previous)
    })
}
