#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;

use rollout::command::RemoteCommand;
use rollout::config::{self, Environment};
use rollout::executor::{wrap_command, CommandOutput, RemoteExecutor, RunOptions};
use rollout::server::Server;
use rollout::{Error, Result};

/// Runs every command with `sh -c` on this machine. `git` is answered with
/// canned output so no repository or network is needed.
#[derive(Default)]
pub struct LocalExecutor {
    pub log: Mutex<Vec<String>>,
}

impl LocalExecutor {
    pub fn lines(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn shell(line: &str) -> Result<CommandOutput> {
        Command::new("sh")
            .arg("-c")
            .arg(line)
            .output()
            .map(CommandOutput::from_process)
            .map_err(|e| Error::internal_io(e.to_string(), Some(line.to_string())))
    }
}

impl RemoteExecutor for LocalExecutor {
    fn run(&self, _: &Server, command: &RemoteCommand, opts: &RunOptions) -> Result<CommandOutput> {
        let line = wrap_command(command, opts);
        self.log.lock().unwrap().push(line.clone());
        if command.program() == "git" {
            return Ok(CommandOutput::ok(""));
        }
        Self::shell(&line)
    }

    fn upload(&self, _: &Server, local_path: &Path, remote_path: &str) -> Result<CommandOutput> {
        fs::copy(local_path, remote_path)
            .map_err(|e| Error::internal_io(e.to_string(), Some(remote_path.to_string())))?;
        Ok(CommandOutput::ok(""))
    }

    fn run_local(&self, command: &RemoteCommand) -> Result<CommandOutput> {
        Self::shell(&command.render())
    }
}

/// Remembers every command and answers from a script of (substring, output)
/// pairs; unmatched commands succeed with empty output.
pub struct RecordingExecutor {
    pub calls: Mutex<Vec<(String, String)>>,
    replies: Vec<(&'static str, CommandOutput)>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            replies: Vec::new(),
        }
    }

    pub fn reply(mut self, needle: &'static str, output: CommandOutput) -> Self {
        self.replies.push((needle, output));
        self
    }

    pub fn lines(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, line)| line.clone())
            .collect()
    }

    pub fn lines_for(&self, host: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, line)| line.clone())
            .collect()
    }
}

impl RemoteExecutor for RecordingExecutor {
    fn run(&self, server: &Server, command: &RemoteCommand, opts: &RunOptions) -> Result<CommandOutput> {
        let line = wrap_command(command, opts);
        self.calls
            .lock()
            .unwrap()
            .push((server.host.clone(), line.clone()));
        Ok(self
            .replies
            .iter()
            .find(|(needle, _)| line.contains(needle))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| CommandOutput::ok("")))
    }

    fn upload(&self, server: &Server, local_path: &Path, remote_path: &str) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push((
            server.host.clone(),
            format!("upload {} {}", local_path.display(), remote_path),
        ));
        Ok(CommandOutput::ok(""))
    }

    fn run_local(&self, command: &RemoteCommand) -> Result<CommandOutput> {
        self.calls
            .lock()
            .unwrap()
            .push(("localhost".to_string(), command.render()));
        Ok(CommandOutput::ok(""))
    }
}

/// Single-host environment rooted at `root`, with privilege escalation off.
pub fn local_env(root: &Path) -> Environment {
    let raw = format!(
        r#"{{
            "codeRepo": "git@example.com:app.git",
            "root": "{}",
            "elevate": false,
            "hosts": {{"web": [{{"host": "localhost", "user": "deploy"}}]}}
        }}"#,
        root.display()
    );
    config::from_json(&raw, "local").unwrap()
}

pub fn local_server() -> Server {
    Server::new("localhost", "deploy")
}

/// Create `releases/<id>` for each id under `root`.
pub fn make_releases(root: &Path, ids: &[&str]) {
    for id in ids {
        fs::create_dir_all(root.join("releases").join(id)).unwrap();
    }
}

pub fn write_ledger(root: &Path, ids: &[&str]) {
    let mut body = String::new();
    for id in ids {
        body.push_str(id);
        body.push('\n');
    }
    fs::write(root.join("RELEASES.txt"), body).unwrap();
}

pub fn point_current(root: &Path, id: &str) {
    let link = root.join("current");
    let _ = fs::remove_file(&link);
    std::os::unix::fs::symlink(root.join("releases").join(id), link).unwrap();
}

pub fn release_names(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(root.join("releases"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}
