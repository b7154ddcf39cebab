use clap::Args;
use serde::Serialize;

use rollout::deploy::on_group;
use rollout::release::{CleanRequest, RetentionManager, RetentionReport};
use rollout::BulkResult;

use super::{bulk, CmdResult, GlobalArgs};

#[derive(Args)]
pub struct CleanArgs {
    /// Releases to keep besides the current one (environment default if unset)
    #[arg(long)]
    pub keep: Option<usize>,

    /// Release being built right now; never removed
    #[arg(long, value_name = "ID")]
    pub in_progress: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanOutput {
    pub command: String,
    pub keep: usize,
    pub hosts: BulkResult<RetentionReport>,
}

pub fn run(args: CleanArgs, global: &GlobalArgs) -> CmdResult<CleanOutput> {
    let env = global.environment()?;
    let executor = global.executor();

    let keep = args.keep.unwrap_or(env.retention.keep);
    let request =
        CleanRequest::new(keep).in_progress(super::release_id(args.in_progress.as_deref())?);

    let (hosts, exit_code) = bulk(on_group(
        &executor,
        &env,
        &global.selection(),
        "clean",
        |host| RetentionManager::new(host, &env).clean_releases(&request),
    )?)?;

    Ok((
        CleanOutput {
            command: "clean.releases".to_string(),
            keep,
            hosts,
        },
        exit_code,
    ))
}
