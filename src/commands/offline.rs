use clap::{Args, Subcommand};
use serde::Serialize;

use rollout::deploy::on_group;
use rollout::release::offline::OfflineCodeOutcome;
use rollout::release::{OfflineTransfer, ReleaseId, ReleaseLifecycle, ReleasePathSet, ReleaseState};
use rollout::BulkResult;

use super::{bulk, CmdResult, GlobalArgs};

#[derive(Args)]
pub struct OfflineArgs {
    #[command(subcommand)]
    command: OfflineCommand,
}

#[derive(Subcommand)]
enum OfflineCommand {
    /// Push a ref through the host's staging clone into a new release
    Update {
        /// Branch, tag, or commit present in the staged checkout
        git_ref: String,
        #[arg(long = "release", value_name = "ID")]
        release_id: String,
    },
    /// Upload and unpack bundle archives, then copy front-end modules into the release
    Bundles {
        #[arg(long = "release", value_name = "ID")]
        release_id: String,
    },
    /// Install Python packages from the unpacked wheelhouse
    Pip {
        #[arg(long = "release", value_name = "ID")]
        release_id: String,
    },
    /// Empty each host's staging directory
    Clean,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleOutcome {
    pub staging_dir: String,
    pub bundles: Vec<String>,
    pub copied: Vec<String>,
}

#[derive(Serialize)]
#[serde(tag = "command")]
pub enum OfflineOutput {
    #[serde(rename = "offline.update")]
    Update {
        release: ReleaseId,
        hosts: BulkResult<OfflineCodeOutcome>,
    },
    #[serde(rename = "offline.bundles")]
    Bundles {
        release: ReleaseId,
        hosts: BulkResult<BundleOutcome>,
    },
    #[serde(rename = "offline.pip")]
    Pip {
        release: ReleaseId,
        hosts: BulkResult<String>,
    },
    #[serde(rename = "offline.clean")]
    Clean { hosts: BulkResult<String> },
}

pub fn run(args: OfflineArgs, global: &GlobalArgs) -> CmdResult<OfflineOutput> {
    let env = global.environment()?;
    let executor = global.executor();
    let selection = global.selection();
    let transfer = OfflineTransfer::new(&env)?;
    let env = &env;
    let transfer = &transfer;

    let output = match args.command {
        OfflineCommand::Update {
            git_ref,
            release_id,
        } => {
            let release = ReleaseId::parse(&release_id)?;
            let (hosts, code) = bulk(on_group(&executor, env, &selection, "offline.update", |host| {
                ReleaseLifecycle::resume(host, env, &release, ReleaseState::Absent)
                    .transfer_offline(transfer, &git_ref)
            })?)?;
            (OfflineOutput::Update { release, hosts }, code)
        }

        OfflineCommand::Bundles { release_id } => {
            let release = ReleaseId::parse(&release_id)?;
            let paths = ReleasePathSet::new(env, &release);
            let (hosts, code) = bulk(on_group(&executor, env, &selection, "offline.bundles", |host| {
                let staging_dir = transfer.create_staging_dir(&host, &paths)?;
                let bundles = transfer.upload_bundles(&host, &staging_dir)?;
                let copied = transfer.copy_bundled_modules(&host, &staging_dir, &paths)?;
                Ok(BundleOutcome {
                    staging_dir,
                    bundles,
                    copied,
                })
            })?)?;
            (OfflineOutput::Bundles { release, hosts }, code)
        }

        OfflineCommand::Pip { release_id } => {
            let release = ReleaseId::parse(&release_id)?;
            let paths = ReleasePathSet::new(env, &release);
            let (hosts, code) = bulk(on_group(&executor, env, &selection, "offline.pip", |host| {
                let staging_dir = transfer.staging_dir(&host, &paths);
                transfer.pip_install(&host, &staging_dir, &paths)
            })?)?;
            (OfflineOutput::Pip { release, hosts }, code)
        }

        OfflineCommand::Clean => {
            let (hosts, code) = bulk(on_group(&executor, env, &selection, "offline.clean", |host| {
                transfer.clean_staging(&host)
            })?)?;
            (OfflineOutput::Clean { hosts }, code)
        }
    };

    Ok(output)
}
