use clap::Args;
use std::path::PathBuf;

use rollout::config::{self, Environment, ALL_HOSTS};
use rollout::deploy::HostSelection;
use rollout::executor::SshExecutor;
use rollout::fanout::Execution;
use rollout::release::ReleaseId;
use rollout::{BulkResult, Error};
use serde::Serialize;

pub type CmdResult<T> = rollout::Result<(T, i32)>;

/// Options every command accepts: which environment, and which of its hosts.
#[derive(Args, Debug, Clone)]
pub(crate) struct GlobalArgs {
    /// Environment name (~/.config/rollout/environments/<name>.json)
    #[arg(long, short = 'e', global = true)]
    pub env: Option<String>,

    /// Explicit environment file, instead of a named environment
    #[arg(long, value_name = "PATH", global = true, conflicts_with = "env")]
    pub config: Option<PathBuf>,

    /// Host group to act on
    #[arg(long, short = 'g', global = true, default_value = ALL_HOSTS)]
    pub group: String,

    /// Run hosts one after another instead of in parallel
    #[arg(long, global = true)]
    pub sequential: bool,
}

impl GlobalArgs {
    pub fn environment(&self) -> rollout::Result<Environment> {
        if let Some(path) = &self.config {
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            return config::load_from_path(path, &name);
        }

        match &self.env {
            Some(name) => config::load(name),
            None => {
                let available = config::list_names();
                let mut err = Error::validation_invalid_argument(
                    "env",
                    "No environment selected; pass --env <name> or --config <path>",
                    None,
                );
                if !available.is_empty() {
                    err = err.with_hint(format!("Available: {}", available.join(", ")));
                }
                Err(err)
            }
        }
    }

    pub fn selection(&self) -> HostSelection {
        let execution = if self.sequential {
            Execution::Sequential
        } else {
            Execution::Parallel
        };
        HostSelection::new(self.group.clone(), execution)
    }

    pub fn executor(&self) -> SshExecutor {
        SshExecutor
    }
}

/// Parse an optional `--release` value.
pub(crate) fn release_id(raw: Option<&str>) -> rollout::Result<Option<ReleaseId>> {
    raw.map(ReleaseId::parse).transpose()
}

/// Wrap a fan-out as a command result, exiting non-zero if any host failed.
pub(crate) fn bulk<T: Serialize>(result: BulkResult<T>) -> CmdResult<BulkResult<T>> {
    let exit_code = crate::output::exit_code_for_bulk(&result);
    Ok((result, exit_code))
}

pub mod clean;
pub mod deploy;
pub mod offline;
pub mod release;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (rollout::Result<serde_json::Value>, i32) {
    match command {
        crate::Commands::Deploy(args) => dispatch!(args, global, deploy),
        crate::Commands::Release(args) => dispatch!(args, global, release),
        crate::Commands::Clean(args) => dispatch!(args, global, clean),
        crate::Commands::Offline(args) => dispatch!(args, global, offline),
    }
}
