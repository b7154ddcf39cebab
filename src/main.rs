use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{clean, deploy, offline, release, GlobalArgs};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "rollout")]
#[command(version = VERSION)]
#[command(about = "Release-directory deployments over SSH")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, activate, record, and clean up a new release on every host
    Deploy(deploy::DeployArgs),
    /// Run single release lifecycle steps
    Release(release::ReleaseArgs),
    /// Remove old releases according to the retention policy
    Clean(clean::CleanArgs),
    /// Offline release steps driven from a local staging directory
    Offline(offline::OfflineArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let (json_result, exit_code) = commands::run_json(cli.command, &cli.global);
    if let Err(err) = output::print_json_result(json_result) {
        eprintln!("{}", err);
        return std::process::ExitCode::from(1);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
