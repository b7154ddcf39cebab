use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    pub host: String,
    pub user: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,
}

fn default_port() -> u16 {
    22
}

impl Server {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            port: default_port(),
            identity_file: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.host.is_empty() && !self.user.is_empty()
    }

    /// `ssh://user@host[:port]` prefix used when the host acts as a git remote.
    pub fn ssh_url(&self, remote_path: &str) -> String {
        if self.port == default_port() {
            format!("ssh://{}@{}{}", self.user, self.host, remote_path)
        } else {
            format!(
                "ssh://{}@{}:{}{}",
                self.user, self.host, self.port, remote_path
            )
        }
    }

    pub fn label(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}
