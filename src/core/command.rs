//! Typed builder for commands sent to a host.
//!
//! Every remote action is described as a program plus arguments, with an
//! optional working directory, environment, and stdout append target. Quoting
//! happens once, in [`RemoteCommand::render`], so callers never interpolate
//! values into shell strings.

use std::fmt;

use crate::utils::shell;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    program: String,
    args: Vec<String>,
    current_dir: Option<String>,
    env: Vec<(String, String)>,
    path_prefix: Option<String>,
    append_stdout_to: Option<String>,
}

impl RemoteCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env: Vec::new(),
            path_prefix: None,
            append_stdout_to: None,
        }
    }

    /// Shorthand for `git <args...>`.
    pub fn git<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new("git").args(args)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<String>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Put `dir` in front of the host's `PATH` for this command only.
    pub fn path_prefix(mut self, dir: impl Into<String>) -> Self {
        self.path_prefix = Some(dir.into());
        self
    }

    /// Append the command's stdout to `path` instead of capturing it.
    pub fn append_stdout_to(mut self, path: impl Into<String>) -> Self {
        self.append_stdout_to = Some(path.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_current_dir(&self) -> Option<&str> {
        self.current_dir.as_deref()
    }

    pub fn render(&self) -> String {
        let mut line = String::new();

        if let Some(dir) = &self.current_dir {
            line.push_str("cd ");
            line.push_str(&shell::quote_path(dir));
            line.push_str(" && ");
        }

        for (key, value) in &self.env {
            line.push_str(key);
            line.push('=');
            line.push_str(&shell::quote_arg(value));
            line.push(' ');
        }

        if let Some(dir) = &self.path_prefix {
            line.push_str("PATH=");
            line.push_str(&shell::quote_path(dir));
            line.push_str(":\"$PATH\" ");
        }

        line.push_str(&shell::quote_arg(&self.program));
        if !self.args.is_empty() {
            line.push(' ');
            line.push_str(&shell::quote_args(&self.args));
        }

        if let Some(target) = &self.append_stdout_to {
            line.push_str(" >> ");
            line.push_str(&shell::quote_path(target));
        }

        line
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_plain_program() {
        let cmd = RemoteCommand::git(["gc"]);
        assert_eq!(cmd.render(), "git gc");
    }

    #[test]
    fn renders_working_directory_first() {
        let cmd = RemoteCommand::git(["fetch", "origin", "--tags", "-q"]).current_dir("/srv/app/releases/r1");
        assert_eq!(
            cmd.render(),
            "cd '/srv/app/releases/r1' && git fetch origin --tags -q"
        );
    }

    #[test]
    fn quotes_untrusted_arguments() {
        let cmd = RemoteCommand::git(["checkout", "v1; rm -rf /"]);
        assert_eq!(cmd.render(), "git checkout 'v1; rm -rf /'");
    }

    #[test]
    fn renders_env_and_path_prefix() {
        let cmd = RemoteCommand::new("bash")
            .arg("scripts/uninstall-requirements.sh")
            .env("HOME", "/home/cchq")
            .path_prefix("/srv/app/releases/r1/python_env/bin");
        assert_eq!(
            cmd.render(),
            "HOME=/home/cchq PATH='/srv/app/releases/r1/python_env/bin':\"$PATH\" bash scripts/uninstall-requirements.sh"
        );
    }

    #[test]
    fn renders_append_redirect() {
        let cmd = RemoteCommand::new("printf")
            .args(["%s\\n", "r1"])
            .append_stdout_to("/srv/app/RELEASES.txt");
        assert_eq!(
            cmd.render(),
            "printf '%s\\n' r1 >> '/srv/app/RELEASES.txt'"
        );
    }
}
