use clap::Args;
use serde::Serialize;

use rollout::deploy::{self, DeployConfig, DeployResult, DeployStatus};

use super::CmdResult;

#[derive(Args)]
pub struct DeployArgs {
    /// Branch, tag, or commit to release
    pub git_ref: String,

    /// Ship code and packages from the local staging directory instead of the network
    #[arg(long)]
    pub offline: bool,

    /// Releases to keep besides the current one (environment default if unset)
    #[arg(long)]
    pub keep: Option<usize>,

    /// Protect the new release from cleanup for this many days
    #[arg(long, value_name = "DAYS")]
    pub keep_days: Option<u32>,

    /// Release id to use instead of one generated from the clock
    #[arg(long = "release", value_name = "ID")]
    pub release_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployOutput {
    pub command: String,
    pub env: String,
    pub group: String,
    #[serde(flatten)]
    pub result: DeployResult,
}

pub fn run(args: DeployArgs, global: &crate::commands::GlobalArgs) -> CmdResult<DeployOutput> {
    let env = global.environment()?;
    let executor = global.executor();

    let mut config = DeployConfig::new(&args.git_ref);
    config.selection = global.selection();
    config.offline = args.offline;
    config.keep = args.keep;
    config.keep_days = args.keep_days;
    config.release_id = super::release_id(args.release_id.as_deref())?;

    let result = deploy::deploy(&executor, &env, &config)?;

    let exit_code = match result.status {
        DeployStatus::Succeeded => 0,
        DeployStatus::Failed => result
            .phases
            .last()
            .map(crate::output::exit_code_for_bulk)
            .filter(|code| *code != 0)
            .unwrap_or(1),
    };

    Ok((
        DeployOutput {
            command: "deploy.run".to_string(),
            env: env.name.clone(),
            group: config.selection.group.clone(),
            result,
        },
        exit_code,
    ))
}
