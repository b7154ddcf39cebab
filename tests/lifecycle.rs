mod common;

use common::*;
use rollout::config;
use rollout::deploy::{self, DeployConfig, DeployStatus};
use rollout::executor::{CommandOutput, Host};
use rollout::release::lifecycle;
use rollout::release::{CleanRequest, ReleaseId, ReleaseLifecycle, ReleaseState, RetentionManager};

const RELEASE: &str = "/srv/app/releases/2024-05-01_10.00";

fn env() -> config::Environment {
    config::from_json(
        r#"{
            "codeRepo": "git@example.com:app.git",
            "root": "/srv/app",
            "sudoUser": "cchq",
            "hosts": {
                "web": [{"host": "web1", "user": "ops"}, {"host": "web2", "user": "ops"}]
            }
        }"#,
        "production",
    )
    .unwrap()
}

fn scripted() -> RecordingExecutor {
    RecordingExecutor::new()
        .reply("rev-parse", CommandOutput::ok("0a1b2c3d4e5f\n"))
        .reply("readlink", CommandOutput::ok(format!("{}\n", RELEASE)))
}

fn position(lines: &[String], needle: &str) -> usize {
    lines
        .iter()
        .position(|l| l.contains(needle))
        .unwrap_or_else(|| panic!("no command containing {:?} in {:#?}", needle, lines))
}

#[test]
fn steps_run_in_lifecycle_order() {
    let env = env();
    let exec = scripted();
    let server = env.servers_for("web").unwrap().remove(0);
    let host = Host::new(&exec, &server, env.elevate);
    let id = ReleaseId::parse("2024-05-01_10.00").unwrap();

    let mut release = ReleaseLifecycle::new(host, &env, &id);
    let begun = release.begin_release().unwrap();
    assert!(begun.local);
    let checkout = release.checkout("v2").unwrap();
    assert_eq!(checkout.commit, "0a1b2c3d4e5f");
    release.install_dependencies().unwrap();
    release.copy_forward_artifacts().unwrap();
    let activation = release.activate().unwrap();
    assert_eq!(activation.target, RELEASE);
    release.record_success().unwrap();
    assert_eq!(release.state(), ReleaseState::Recorded);

    let lines = exec.lines();
    let order = [
        "mkdir -p /srv/app/releases/2024-05-01_10.00",
        "git clone /srv/app/current/.git",
        "git remote set-url origin",
        "git fetch origin --tags -q",
        "git reset --hard v2",
        "virtualenv-clone",
        "pip install",
        "ln -sfn",
        "mv -Tf",
        "RELEASES.txt",
    ];
    let positions: Vec<usize> = order.iter().map(|n| position(&lines, n)).collect();
    assert!(
        positions.windows(2).all(|w| w[0] < w[1]),
        "out of order: {:?}",
        positions
    );
}

#[test]
fn service_steps_run_as_the_sudo_user() {
    let env = env();
    let exec = scripted();
    let server = env.servers_for("web").unwrap().remove(0);
    let host = Host::new(&exec, &server, env.elevate);
    let id = ReleaseId::parse("2024-05-01_10.00").unwrap();

    let mut release = ReleaseLifecycle::resume(host, &env, &id, ReleaseState::Cloned);
    release.checkout("v2").unwrap();

    for line in exec.lines().iter().filter(|l| l.contains("git ")) {
        assert!(line.starts_with("sudo -n -H -u cchq "), "{}", line);
    }
}

#[test]
fn out_of_order_step_is_rejected_without_running_anything() {
    let env = env();
    let exec = scripted();
    let server = env.servers_for("web").unwrap().remove(0);
    let host = Host::new(&exec, &server, env.elevate);
    let id = ReleaseId::parse("2024-05-01_10.00").unwrap();

    let mut release = ReleaseLifecycle::new(host, &env, &id);
    let err = release.activate().unwrap_err();

    assert_eq!(err.code.as_str(), "validation.invalid_state");
    assert_eq!(release.state(), ReleaseState::Absent);
    assert!(exec.lines().is_empty());
}

#[test]
fn failed_step_moves_release_to_failed() {
    let env = env();
    let exec = RecordingExecutor::new().reply(
        "rev-parse",
        CommandOutput {
            stdout: String::new(),
            stderr: String::new(),
            success: false,
            exit_code: 1,
        },
    );
    let server = env.servers_for("web").unwrap().remove(0);
    let host = Host::new(&exec, &server, env.elevate);
    let id = ReleaseId::parse("2024-05-01_10.00").unwrap();

    let mut release = ReleaseLifecycle::resume(host, &env, &id, ReleaseState::Cloned);
    let err = release.checkout("no-such-branch").unwrap_err();

    assert_eq!(err.code.as_str(), "release.checkout_failed");
    assert_eq!(release.state(), ReleaseState::Failed);
    assert!(!exec.lines().iter().any(|l| l.contains("reset --hard")));
}

#[test]
fn deploy_provisions_every_host_before_any_activation() {
    let env = env();
    let exec = scripted();
    let mut config = DeployConfig::new("v2");
    config.release_id = Some(ReleaseId::parse("2024-05-01_10.00").unwrap());

    let result = deploy::deploy(&exec, &env, &config).unwrap();
    assert_eq!(result.status, DeployStatus::Succeeded, "{:?}", result.failed_phase);

    let lines = exec.lines();
    let last_install = lines
        .iter()
        .rposition(|l| l.contains("pip install"))
        .unwrap();
    let first_link = position(&lines, "ln -sfn");
    assert!(last_install < first_link);

    for host in ["web1", "web2"] {
        let host_lines = exec.lines_for(host);
        assert_eq!(
            host_lines.iter().filter(|l| l.contains("RELEASES.txt") && l.contains("printf")).count(),
            1,
            "{} should record exactly once",
            host
        );
    }
}

fn unreachable() -> CommandOutput {
    CommandOutput {
        stdout: String::new(),
        stderr: "ssh: connect to host web1 port 22: Connection refused".to_string(),
        success: false,
        exit_code: 255,
    }
}

#[test]
fn unreachable_host_does_not_pass_for_an_empty_ledger() {
    let env = env();
    let exec = RecordingExecutor::new().reply("test -e", unreachable());
    let server = env.servers_for("web").unwrap().remove(0);
    let host = Host::new(&exec, &server, env.elevate);

    let err = lifecycle::mark_last_unsuccessful(&host, &env).unwrap_err();

    assert_eq!(err.code.as_str(), "ssh.connect_failed");
    assert!(!exec.lines().iter().any(|l| l.contains("sed")));
}

#[test]
fn unreachable_host_does_not_pass_for_an_empty_releases_dir() {
    let env = env();
    let exec = RecordingExecutor::new().reply("test -e", unreachable());
    let server = env.servers_for("web").unwrap().remove(0);
    let host = Host::new(&exec, &server, env.elevate);

    let err = RetentionManager::new(host, &env)
        .clean_releases(&CleanRequest::new(3))
        .unwrap_err();

    assert_eq!(err.code.as_str(), "ssh.connect_failed");
    assert!(!exec.lines().iter().any(|l| l.contains("rm -rf")));
}
