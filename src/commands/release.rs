use chrono::Utc;
use clap::{Args, Subcommand};
use serde::Serialize;

use rollout::deploy::{self, on_group};
use rollout::release::artifacts::ArtifactReport;
use rollout::release::dependencies::DependencyOutcome;
use rollout::release::lifecycle::{
    self, ActivationOutcome, BeginOutcome, CheckoutOutcome, UpdateTarget,
};
use rollout::release::{ReleaseId, ReleaseLayout, ReleaseLifecycle, ReleaseState};
use rollout::{BulkResult, Error};

use super::{bulk, CmdResult, GlobalArgs};

#[derive(Args)]
pub struct ReleaseArgs {
    #[command(subcommand)]
    command: ReleaseCommand,
}

#[derive(Subcommand)]
enum ReleaseCommand {
    /// Create a release directory and clone the code into it
    Begin {
        /// Release id (generated from the clock if omitted)
        #[arg(long = "release", value_name = "ID")]
        release_id: Option<String>,
    },
    /// Check out a ref in a cloned release, or in the live release with --current
    Checkout {
        /// Branch, tag, or commit
        git_ref: String,
        #[arg(long = "release", value_name = "ID", required_unless_present = "current")]
        release_id: Option<String>,
        /// Update the current release in place (hotfix)
        #[arg(long, conflicts_with = "release_id")]
        current: bool,
    },
    /// Install Python dependencies into the release's virtualenv
    Deps {
        #[arg(long = "release", value_name = "ID")]
        release_id: String,
    },
    /// Copy generated files forward from the current release
    Artifacts {
        #[arg(long = "release", value_name = "ID")]
        release_id: String,
    },
    /// Point the current link at a release
    Activate {
        #[arg(long = "release", value_name = "ID", required_unless_present = "target")]
        release_id: Option<String>,
        /// Activate an arbitrary release directory instead
        #[arg(long, value_name = "PATH", conflicts_with = "release_id")]
        target: Option<String>,
    },
    /// Append an activated release to the ledger
    Record {
        #[arg(long = "release", value_name = "ID")]
        release_id: String,
    },
    /// Remove the most recent ledger entry
    MarkUnsuccessful,
    /// Show the release recorded before the latest one
    Previous,
    /// Count recorded releases
    Count,
    /// Check whether a path exists on each host
    Exists {
        path: String,
    },
    /// Protect a release from cleanup for a number of days
    KeepUntil {
        #[arg(long = "release", value_name = "ID")]
        release_id: String,
        /// Days from now
        days: u32,
    },
    /// Activate the previous recorded release
    Rollback,
}

#[derive(Serialize)]
#[serde(tag = "command")]
pub enum ReleaseOutput {
    #[serde(rename = "release.begin")]
    Begin {
        release: ReleaseId,
        hosts: BulkResult<BeginOutcome>,
    },
    #[serde(rename = "release.checkout")]
    Checkout {
        #[serde(skip_serializing_if = "Option::is_none")]
        release: Option<ReleaseId>,
        hosts: BulkResult<CheckoutOutcome>,
    },
    #[serde(rename = "release.deps")]
    Deps {
        release: ReleaseId,
        hosts: BulkResult<DependencyOutcome>,
    },
    #[serde(rename = "release.artifacts")]
    Artifacts {
        release: ReleaseId,
        hosts: BulkResult<ArtifactReport>,
    },
    #[serde(rename = "release.activate")]
    Activate {
        hosts: BulkResult<ActivationOutcome>,
    },
    #[serde(rename = "release.record")]
    Record {
        release: ReleaseId,
        hosts: BulkResult<()>,
    },
    #[serde(rename = "release.mark_unsuccessful")]
    MarkUnsuccessful { hosts: BulkResult<()> },
    #[serde(rename = "release.previous")]
    Previous { hosts: BulkResult<Option<String>> },
    #[serde(rename = "release.count")]
    Count { hosts: BulkResult<usize> },
    #[serde(rename = "release.exists")]
    Exists {
        path: String,
        hosts: BulkResult<bool>,
    },
    #[serde(rename = "release.keep_until")]
    KeepUntil {
        release: ReleaseId,
        hosts: BulkResult<String>,
    },
    #[serde(rename = "release.rollback")]
    Rollback {
        hosts: BulkResult<ActivationOutcome>,
    },
}

pub fn run(args: ReleaseArgs, global: &GlobalArgs) -> CmdResult<ReleaseOutput> {
    let env = global.environment()?;
    let executor = global.executor();
    let selection = global.selection();
    let env = &env;

    macro_rules! on_hosts {
        ($action:expr, $op:expr) => {
            bulk(on_group(&executor, env, &selection, $action, $op)?)?
        };
    }

    let output = match args.command {
        ReleaseCommand::Begin { release_id } => {
            let release = match super::release_id(release_id.as_deref())? {
                Some(id) => id,
                None => ReleaseId::generate(&env.retention.release_id_format, Utc::now())?,
            };
            let (hosts, code) = on_hosts!("release.begin", |host| {
                ReleaseLifecycle::new(host, env, &release).begin_release()
            });
            (ReleaseOutput::Begin { release, hosts }, code)
        }

        ReleaseCommand::Checkout {
            git_ref,
            release_id,
            current,
        } => {
            let target = if current {
                UpdateTarget::Current
            } else {
                UpdateTarget::NewRelease
            };
            let release = super::release_id(release_id.as_deref())?;
            let (hosts, code) = match (target, &release) {
                (UpdateTarget::Current, _) => on_hosts!("release.checkout", |host| {
                    lifecycle::checkout_in_place(&host, env, &git_ref)
                }),
                (UpdateTarget::NewRelease, Some(id)) => on_hosts!("release.checkout", |host| {
                    ReleaseLifecycle::resume(host, env, id, ReleaseState::Cloned)
                        .checkout(&git_ref)
                }),
                (UpdateTarget::NewRelease, None) => {
                    return Err(Error::validation_invalid_argument(
                        "release",
                        "Checkout needs --release <ID> or --current",
                        None,
                    ));
                }
            };
            (ReleaseOutput::Checkout { release, hosts }, code)
        }

        ReleaseCommand::Deps { release_id } => {
            let release = ReleaseId::parse(&release_id)?;
            let (hosts, code) = on_hosts!("release.deps", |host| {
                ReleaseLifecycle::resume(host, env, &release, ReleaseState::CheckedOut)
                    .install_dependencies()
            });
            (ReleaseOutput::Deps { release, hosts }, code)
        }

        ReleaseCommand::Artifacts { release_id } => {
            let release = ReleaseId::parse(&release_id)?;
            let (hosts, code) = on_hosts!("release.artifacts", |host| {
                ReleaseLifecycle::resume(host, env, &release, ReleaseState::DependenciesInstalled)
                    .copy_forward_artifacts()
            });
            (ReleaseOutput::Artifacts { release, hosts }, code)
        }

        ReleaseCommand::Activate { release_id, target } => {
            let layout = ReleaseLayout::new(env);
            let target = match (target, super::release_id(release_id.as_deref())?) {
                (Some(target), _) => target,
                (None, Some(id)) => layout.release_dir(&id),
                (None, None) => {
                    return Err(Error::validation_invalid_argument(
                        "release",
                        "Activate needs --release <ID> or --target <PATH>",
                        None,
                    ));
                }
            };
            let (hosts, code) = on_hosts!("release.activate", |host| {
                lifecycle::activate_target(&host, &layout, &target)
            });
            (ReleaseOutput::Activate { hosts }, code)
        }

        ReleaseCommand::Record { release_id } => {
            let release = ReleaseId::parse(&release_id)?;
            let (hosts, code) = on_hosts!("release.record", |host| {
                ReleaseLifecycle::resume(host, env, &release, ReleaseState::Activated)
                    .record_success()
            });
            (ReleaseOutput::Record { release, hosts }, code)
        }

        ReleaseCommand::MarkUnsuccessful => {
            let (hosts, code) = on_hosts!("release.mark_unsuccessful", |host| {
                lifecycle::mark_last_unsuccessful(&host, env)
            });
            (ReleaseOutput::MarkUnsuccessful { hosts }, code)
        }

        ReleaseCommand::Previous => {
            let (hosts, code) = on_hosts!("release.previous", |host| {
                lifecycle::previous_release(&host, env)
            });
            (ReleaseOutput::Previous { hosts }, code)
        }

        ReleaseCommand::Count => {
            let (hosts, code) = on_hosts!("release.count", |host| {
                lifecycle::release_count(&host, env)
            });
            (ReleaseOutput::Count { hosts }, code)
        }

        ReleaseCommand::Exists { path } => {
            let (hosts, code) = on_hosts!("release.exists", |host| {
                lifecycle::release_exists(&host, &path)
            });
            (ReleaseOutput::Exists { path, hosts }, code)
        }

        ReleaseCommand::KeepUntil { release_id, days } => {
            let release = ReleaseId::parse(&release_id)?;
            let dir = ReleaseLayout::new(env).release_dir(&release);
            let now = Utc::now();
            let (hosts, code) = on_hosts!("release.keep_until", |host| {
                lifecycle::mark_keep_until(&host, env, &dir, days, now)
            });
            (ReleaseOutput::KeepUntil { release, hosts }, code)
        }

        ReleaseCommand::Rollback => {
            let (hosts, code) = bulk(deploy::rollback(&executor, env, &selection)?)?;
            (ReleaseOutput::Rollback { hosts }, code)
        }
    };

    Ok(output)
}
