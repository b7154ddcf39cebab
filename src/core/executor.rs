// Command execution boundary - everything the release core needs from a host

use std::path::Path;
use std::time::Duration;

use crate::command::RemoteCommand;
use crate::error::{Error, RemoteCommandFailedDetails, Result, TargetDetails};
use crate::server::Server;
use crate::ssh::{self, SshClient};
use crate::utils::shell;

/// Exit status `timeout(1)` reports when it had to kill the command.
const TIMEOUT_EXIT_CODE: i32 = 124;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
            exit_code: 0,
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
            exit_code: -1,
        }
    }

    pub fn from_process(out: std::process::Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            success: out.status.success(),
            exit_code: out.status.code().unwrap_or(-1),
        }
    }
}

/// Who a command runs as on the host.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Privilege {
    /// The SSH login user.
    #[default]
    Connecting,
    /// root via `sudo`.
    Superuser,
    /// A named service account via `sudo -u`.
    User(String),
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub privilege: Privilege,
    pub timeout: Option<Duration>,
}

impl RunOptions {
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn superuser() -> Self {
        Self {
            privilege: Privilege::Superuser,
            timeout: None,
        }
    }

    pub fn as_user(user: impl Into<String>) -> Self {
        Self {
            privilege: Privilege::User(user.into()),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Produce the exact command line sent to the host: timeout inside, sudo outside.
pub fn wrap_command(command: &RemoteCommand, opts: &RunOptions) -> String {
    let mut line = command.render();

    if let Some(timeout) = opts.timeout {
        line = format!(
            "timeout {} sh -c {}",
            timeout.as_secs().max(1),
            shell::escape_command_for_shell(&line)
        );
    }

    match &opts.privilege {
        Privilege::Connecting => line,
        Privilege::Superuser => format!("sudo -n sh -c {}", shell::escape_command_for_shell(&line)),
        Privilege::User(user) => format!(
            "sudo -n -H -u {} sh -c {}",
            shell::quote_arg(user),
            shell::escape_command_for_shell(&line)
        ),
    }
}

/// Transport capability consumed by the release core.
///
/// `run` returns `Err` only when the command could not be delivered; a command
/// that ran and exited non-zero comes back as an unsuccessful [`CommandOutput`].
pub trait RemoteExecutor: Send + Sync {
    fn run(&self, server: &Server, command: &RemoteCommand, opts: &RunOptions)
        -> Result<CommandOutput>;

    /// Exit 1 with nothing on stderr is "absent". Anything else that is not a
    /// clean zero (an unreachable host, a refused `sudo -n`) is an error.
    fn path_exists(&self, server: &Server, path: &str, opts: &RunOptions) -> Result<bool> {
        let command = RemoteCommand::new("test").args(["-e", path]);
        let output = self.run(server, &command, opts)?;
        match output.exit_code {
            0 if output.success => Ok(true),
            1 if output.stderr.trim().is_empty() => Ok(false),
            _ => Err(command_failure(server, &command, opts, output)),
        }
    }

    fn upload(&self, server: &Server, local_path: &Path, remote_path: &str) -> Result<CommandOutput>;

    /// Run a command on the controlling machine rather than on a host.
    fn run_local(&self, command: &RemoteCommand) -> Result<CommandOutput>;
}

/// Production executor: SSH for remote hosts, `sh -c` for localhost.
#[derive(Debug, Default, Clone, Copy)]
pub struct SshExecutor;

impl RemoteExecutor for SshExecutor {
    fn run(
        &self,
        server: &Server,
        command: &RemoteCommand,
        opts: &RunOptions,
    ) -> Result<CommandOutput> {
        let client = SshClient::from_server(server)?;
        Ok(client.execute(&wrap_command(command, opts)))
    }

    fn upload(&self, server: &Server, local_path: &Path, remote_path: &str) -> Result<CommandOutput> {
        if !local_path.is_file() {
            return Err(Error::validation_invalid_argument(
                "localPath",
                format!("Upload source is not a file: {}", local_path.display()),
                None,
            ));
        }
        let client = SshClient::from_server(server)?;
        Ok(client.upload_file(local_path, remote_path))
    }

    fn run_local(&self, command: &RemoteCommand) -> Result<CommandOutput> {
        Ok(ssh::execute_local_command(&command.render()))
    }
}

/// One host as seen by the release core: an executor bound to a server.
///
/// With `elevate` off, every privileged request runs as the connecting user,
/// which is how single-user installs and tests drive the same code paths.
#[derive(Clone, Copy)]
pub struct Host<'a> {
    executor: &'a dyn RemoteExecutor,
    server: &'a Server,
    elevate: bool,
}

impl<'a> Host<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor, server: &'a Server, elevate: bool) -> Self {
        Self {
            executor,
            server,
            elevate,
        }
    }

    pub fn name(&self) -> &str {
        &self.server.host
    }

    pub fn server(&self) -> &Server {
        self.server
    }

    fn effective(&self, opts: &RunOptions) -> RunOptions {
        if self.elevate {
            opts.clone()
        } else {
            RunOptions {
                privilege: Privilege::Connecting,
                timeout: opts.timeout,
            }
        }
    }

    /// Run and return the raw output without judging the exit status.
    pub fn probe(&self, command: &RemoteCommand, opts: &RunOptions) -> Result<CommandOutput> {
        self.executor.run(self.server, command, &self.effective(opts))
    }

    /// Run and fail unless the command exits zero. Returns trimmed stdout.
    pub fn run(&self, command: &RemoteCommand, opts: &RunOptions) -> Result<String> {
        let opts = self.effective(opts);
        let output = self.executor.run(self.server, command, &opts)?;
        self.check(command, &opts, output)
    }

    /// Like `run`, but exit status 1 means "nothing there" (`readlink`, `grep`)
    /// and comes back as `None`.
    pub fn query(&self, command: &RemoteCommand, opts: &RunOptions) -> Result<Option<String>> {
        let opts = self.effective(opts);
        let output = self.executor.run(self.server, command, &opts)?;
        if output.exit_code == 1 {
            return Ok(None);
        }
        self.check(command, &opts, output).map(Some)
    }

    pub fn sudo(&self, command: &RemoteCommand) -> Result<String> {
        self.run(command, &RunOptions::superuser())
    }

    pub fn exists(&self, path: &str) -> Result<bool> {
        self.executor
            .path_exists(self.server, path, &self.effective(&RunOptions::superuser()))
    }

    pub fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let output = self.executor.upload(self.server, local_path, remote_path)?;
        let command = RemoteCommand::new("upload").args([
            local_path.to_string_lossy().to_string(),
            remote_path.to_string(),
        ]);
        self.check(&command, &RunOptions::plain(), output).map(|_| ())
    }

    pub fn run_local(&self, command: &RemoteCommand) -> Result<String> {
        let output = self.executor.run_local(command)?;
        if output.success {
            return Ok(output.stdout.trim().to_string());
        }
        Err(Error::remote_command_failed(RemoteCommandFailedDetails {
            command: command.render(),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            target: TargetDetails {
                host: Some("localhost".to_string()),
                user: None,
            },
        }))
    }

    fn check(
        &self,
        command: &RemoteCommand,
        opts: &RunOptions,
        output: CommandOutput,
    ) -> Result<String> {
        if output.success {
            return Ok(output.stdout.trim().to_string());
        }
        Err(command_failure(self.server, command, opts, output))
    }
}

/// Classify a command that ran and exited non-zero.
fn command_failure(
    server: &Server,
    command: &RemoteCommand,
    opts: &RunOptions,
    output: CommandOutput,
) -> Error {
    let timed_out = opts.timeout.is_some() && output.exit_code == TIMEOUT_EXIT_CODE;
    let transient = !ssh::is_local_host(&server.host) && ssh::is_transient_ssh_error(&output);
    let details = RemoteCommandFailedDetails {
        command: wrap_command(command, opts),
        exit_code: output.exit_code,
        stdout: output.stdout,
        stderr: output.stderr,
        target: TargetDetails {
            host: Some(server.host.clone()),
            user: Some(server.user.clone()),
        },
    };

    if timed_out {
        Error::remote_command_timeout(details)
    } else if transient {
        Error::ssh_connect_failed(details)
    } else {
        Error::remote_command_failed(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_command_is_unwrapped() {
        let cmd = RemoteCommand::git(["gc"]).current_dir("/srv/app/current");
        assert_eq!(
            wrap_command(&cmd, &RunOptions::plain()),
            "cd '/srv/app/current' && git gc"
        );
    }

    #[test]
    fn superuser_wraps_in_sudo_shell() {
        let cmd = RemoteCommand::new("rm").args(["-rf", "/srv/app/releases/r1"]);
        assert_eq!(
            wrap_command(&cmd, &RunOptions::superuser()),
            "sudo -n sh -c 'rm -rf /srv/app/releases/r1'"
        );
    }

    #[test]
    fn timeout_sits_inside_sudo() {
        let cmd = RemoteCommand::new("pip").arg("install");
        let opts = RunOptions::as_user("cchq").with_timeout(Some(Duration::from_secs(600)));
        assert_eq!(
            wrap_command(&cmd, &opts),
            "sudo -n -H -u cchq sh -c 'timeout 600 sh -c '\\''pip install'\\'''"
        );
    }

    struct Canned(CommandOutput);

    impl RemoteExecutor for Canned {
        fn run(&self, _: &Server, _: &RemoteCommand, _: &RunOptions) -> Result<CommandOutput> {
            Ok(self.0.clone())
        }

        fn upload(&self, _: &Server, _: &Path, _: &str) -> Result<CommandOutput> {
            Ok(self.0.clone())
        }

        fn run_local(&self, _: &RemoteCommand) -> Result<CommandOutput> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn timeout_exit_maps_to_timeout_error() {
        let exec = Canned(CommandOutput {
            stdout: String::new(),
            stderr: String::new(),
            success: false,
            exit_code: 124,
        });
        let server = Server::new("web1", "deploy");
        let host = Host::new(&exec, &server, true);
        let opts = RunOptions::plain().with_timeout(Some(Duration::from_secs(5)));

        let err = host.run(&RemoteCommand::new("sleep").arg("10"), &opts).unwrap_err();

        assert_eq!(err.code.as_str(), "remote.command_timeout");
    }

    #[test]
    fn connection_failure_is_retryable() {
        let exec = Canned(CommandOutput {
            stdout: String::new(),
            stderr: "ssh: connect to host web1 port 22: Connection refused".to_string(),
            success: false,
            exit_code: 255,
        });
        let server = Server::new("web1", "deploy");
        let host = Host::new(&exec, &server, true);

        let err = host.sudo(&RemoteCommand::new("true")).unwrap_err();

        assert_eq!(err.code.as_str(), "ssh.connect_failed");
        assert_eq!(err.retryable, Some(true));
    }

    #[test]
    fn query_treats_status_one_as_absent() {
        let exec = Canned(CommandOutput {
            stdout: String::new(),
            stderr: String::new(),
            success: false,
            exit_code: 1,
        });
        let server = Server::new("web1", "deploy");
        let host = Host::new(&exec, &server, true);

        let out = host
            .query(&RemoteCommand::new("readlink").arg("/srv/app/current"), &RunOptions::superuser())
            .unwrap();

        assert_eq!(out, None);
    }

    #[test]
    fn missing_path_is_absent() {
        let exec = Canned(CommandOutput {
            stdout: String::new(),
            stderr: String::new(),
            success: false,
            exit_code: 1,
        });
        let server = Server::new("web1", "deploy");
        let host = Host::new(&exec, &server, true);

        assert!(!host.exists("/srv/app/RELEASES.txt").unwrap());
    }

    #[test]
    fn unreachable_host_is_not_an_absent_path() {
        let exec = Canned(CommandOutput {
            stdout: String::new(),
            stderr: "ssh: connect to host web1 port 22: Connection refused".to_string(),
            success: false,
            exit_code: 255,
        });
        let server = Server::new("web1", "deploy");
        let host = Host::new(&exec, &server, true);

        let err = host.exists("/srv/app/RELEASES.txt").unwrap_err();

        assert_eq!(err.code.as_str(), "ssh.connect_failed");
    }

    #[test]
    fn refused_sudo_is_not_an_absent_path() {
        let exec = Canned(CommandOutput {
            stdout: String::new(),
            stderr: "sudo: a password is required".to_string(),
            success: false,
            exit_code: 1,
        });
        let server = Server::new("web1", "deploy");
        let host = Host::new(&exec, &server, true);

        let err = host.exists("/srv/app/releases").unwrap_err();

        assert_eq!(err.code.as_str(), "remote.command_failed");
    }

    #[test]
    fn success_returns_trimmed_stdout() {
        let exec = Canned(CommandOutput::ok("/srv/app/releases/r1\n"));
        let server = Server::new("web1", "deploy");
        let host = Host::new(&exec, &server, false);

        let out = host.sudo(&RemoteCommand::new("readlink")).unwrap();

        assert_eq!(out, "/srv/app/releases/r1");
    }
}
