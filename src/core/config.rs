//! Environment configuration.
//!
//! An environment describes one fleet: where releases live on each host, which
//! hosts belong to which group, and the knobs of the release workflow. It is
//! loaded once and passed explicitly to every component.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::paths;
use crate::server::Server;

/// Pseudo group selecting every host in the environment.
pub const ALL_HOSTS: &str = "all";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    #[serde(skip_deserializing, default)]
    pub name: String,
    pub code_repo: String,
    /// Directory holding the releases container, the current link, and the ledger.
    pub root: String,
    #[serde(default = "default_sudo_user")]
    pub sudo_user: String,
    #[serde(default = "default_true")]
    pub elevate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_proxy: Option<String>,
    #[serde(default)]
    pub hosts: BTreeMap<String, Vec<Server>>,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub dependencies: DependencyConfig,
    #[serde(default = "default_artifacts")]
    pub artifacts: Vec<ArtifactSpec>,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub offline: OfflineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutConfig {
    #[serde(default = "default_releases_dir")]
    pub releases_dir: String,
    #[serde(default = "default_current_link")]
    pub current_link: String,
    #[serde(default = "default_ledger_file")]
    pub ledger_file: String,
    #[serde(default = "default_virtualenv_dir")]
    pub virtualenv_dir: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            releases_dir: default_releases_dir(),
            current_link: default_current_link(),
            ledger_file: default_ledger_file(),
            virtualenv_dir: default_virtualenv_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyConfig {
    /// Requirement manifests, relative to the release directory.
    #[serde(default = "default_requirements")]
    pub requirements: Vec<String>,
    #[serde(default = "default_uninstall_script")]
    pub uninstall_script: Option<String>,
    /// Per-request network timeout handed to pip.
    #[serde(default = "default_pip_timeout")]
    pub pip_timeout_secs: u64,
    /// Hard limit for the whole install step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_timeout_secs: Option<u64>,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            requirements: default_requirements(),
            uninstall_script: default_uninstall_script(),
            pip_timeout_secs: default_pip_timeout(),
            step_timeout_secs: None,
        }
    }
}

impl DependencyConfig {
    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingSource {
    /// Create an empty directory in the new release.
    Placeholder,
    /// Leave the path absent.
    Skip,
}

/// A generated file or directory carried from the current release into the new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSpec {
    /// Path relative to the release directory.
    pub path: String,
    pub kind: ArtifactKind,
    /// Host groups this artifact applies to; empty means every host.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_missing: Option<MissingSource>,
}

impl ArtifactSpec {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: ArtifactKind::File,
            groups: Vec::new(),
            on_missing: None,
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: ArtifactKind::Directory,
            groups: Vec::new(),
            on_missing: None,
        }
    }

    pub fn on_missing(&self) -> MissingSource {
        self.on_missing.unwrap_or(match self.kind {
            ArtifactKind::Directory => MissingSource::Placeholder,
            ArtifactKind::File => MissingSource::Skip,
        })
    }

    pub fn applies_to(&self, host_groups: &[String]) -> bool {
        self.groups.is_empty() || self.groups.iter().any(|g| host_groups.contains(g))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionConfig {
    #[serde(default = "default_keep")]
    pub keep: usize,
    #[serde(default = "default_keep_until_prefix")]
    pub keep_until_prefix: String,
    #[serde(default = "default_keep_until_format")]
    pub keep_until_format: String,
    #[serde(default = "default_release_id_format")]
    pub release_id_format: String,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            keep: default_keep(),
            keep_until_prefix: default_keep_until_prefix(),
            keep_until_format: default_keep_until_format(),
            release_id_format: default_release_id_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineConfig {
    /// Controller-side directory holding the staged checkout and bundles.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,
    /// Name of the staged checkout inside `staging_dir`.
    #[serde(default = "default_checkout_dir")]
    pub checkout_dir: String,
    /// Host-side directory for staging clones; defaults to `/home/<login user>/releases`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_home: Option<String>,
    #[serde(default = "default_wheels_archive")]
    pub wheels_archive: String,
    #[serde(default = "default_npm_archive")]
    pub npm_archive: String,
    #[serde(default = "default_bower_archive")]
    pub bower_archive: String,
    #[serde(default = "default_strip_components")]
    pub strip_components: u32,
    #[serde(default = "default_wheel_dir")]
    pub wheel_dir: String,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            checkout_dir: default_checkout_dir(),
            staging_home: None,
            wheels_archive: default_wheels_archive(),
            npm_archive: default_npm_archive(),
            bower_archive: default_bower_archive(),
            strip_components: default_strip_components(),
            wheel_dir: default_wheel_dir(),
        }
    }
}

impl OfflineConfig {
    pub fn staging_home_for(&self, server: &Server) -> String {
        self.staging_home
            .clone()
            .unwrap_or_else(|| format!("/home/{}/releases", server.user))
    }
}

// =============================================================================
// Defaults
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_sudo_user() -> String {
    "deploy".to_string()
}

fn default_releases_dir() -> String {
    "releases".to_string()
}

fn default_current_link() -> String {
    "current".to_string()
}

fn default_ledger_file() -> String {
    "RELEASES.txt".to_string()
}

fn default_virtualenv_dir() -> String {
    "python_env".to_string()
}

fn default_requirements() -> Vec<String> {
    vec![
        "requirements/prod-requirements.txt".to_string(),
        "requirements/requirements.txt".to_string(),
    ]
}

fn default_uninstall_script() -> Option<String> {
    Some("scripts/uninstall-requirements.sh".to_string())
}

fn default_pip_timeout() -> u64 {
    60
}

fn default_artifacts() -> Vec<ArtifactSpec> {
    vec![
        ArtifactSpec::file("localsettings.py"),
        ArtifactSpec::directory("bower_components"),
        ArtifactSpec::directory("node_modules"),
        ArtifactSpec {
            path: "submodules/touchforms-src/touchforms/backend/localsettings.py".to_string(),
            kind: ArtifactKind::File,
            groups: vec!["touchforms".to_string()],
            on_missing: None,
        },
        ArtifactSpec {
            path: "formplayer_build/application.properties".to_string(),
            kind: ArtifactKind::File,
            groups: vec!["formplayer".to_string()],
            on_missing: None,
        },
        ArtifactSpec {
            path: "staticfiles/CACHE/js".to_string(),
            kind: ArtifactKind::Directory,
            groups: vec!["static".to_string()],
            on_missing: Some(MissingSource::Skip),
        },
    ]
}

fn default_keep() -> usize {
    3
}

fn default_keep_until_prefix() -> String {
    "KEEP_UNTIL__".to_string()
}

fn default_keep_until_format() -> String {
    "%Y%m%d".to_string()
}

fn default_release_id_format() -> String {
    "%Y-%m-%d_%H.%M".to_string()
}

fn default_staging_dir() -> String {
    "~/offline-staging".to_string()
}

fn default_checkout_dir() -> String {
    "code".to_string()
}

fn default_wheels_archive() -> String {
    "wheelhouse.tar.gz".to_string()
}

fn default_npm_archive() -> String {
    "node_modules.tar.gz".to_string()
}

fn default_bower_archive() -> String {
    "bower_components.tar.gz".to_string()
}

fn default_strip_components() -> u32 {
    2
}

fn default_wheel_dir() -> String {
    "wheelhouse".to_string()
}

// =============================================================================
// Loading
// =============================================================================

/// Load a named environment from the config directory.
pub fn load(name: &str) -> Result<Environment> {
    let path = paths::environment(name)?;
    if !path.exists() {
        return Err(Error::environment_not_found(name, list_names()));
    }
    load_from_path(&path, name)
}

pub fn load_from_path(path: &Path, name: &str) -> Result<Environment> {
    let raw = fs::read_to_string(path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;
    let mut env: Environment = serde_json::from_str(&raw)
        .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))?;
    env.name = name.to_string();
    env.validate()?;
    Ok(env)
}

pub fn from_json(raw: &str, name: &str) -> Result<Environment> {
    let mut env: Environment =
        serde_json::from_str(raw).map_err(|e| Error::config_invalid_json(name, e))?;
    env.name = name.to_string();
    env.validate()?;
    Ok(env)
}

/// Names of all environments in the config directory.
pub fn list_names() -> Vec<String> {
    let Ok(dir) = paths::environments() else {
        return Vec::new();
    };
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                path.file_stem().map(|s| s.to_string_lossy().to_string())
            } else {
                None
            }
        })
        .collect();
    names.sort();
    names
}

impl Environment {
    pub fn validate(&self) -> Result<()> {
        if self.code_repo.trim().is_empty() {
            return Err(Error::config_missing_key("codeRepo", None));
        }
        if !self.root.starts_with('/') {
            return Err(Error::config_invalid_value(
                "root",
                Some(self.root.clone()),
                "must be an absolute path",
            ));
        }
        if self.hosts.is_empty() {
            return Err(Error::config_missing_key("hosts", None));
        }
        if self.hosts.contains_key(ALL_HOSTS) {
            return Err(Error::config_invalid_value(
                "hosts",
                Some(ALL_HOSTS.to_string()),
                "'all' is reserved for selecting every host",
            ));
        }
        for (group, servers) in &self.hosts {
            if let Some(bad) = servers.iter().find(|s| !s.is_valid()) {
                return Err(Error::config_invalid_value(
                    format!("hosts.{}", group),
                    Some(bad.label()),
                    "every server needs a host and a user",
                ));
            }
        }

        let layout = [
            ("layout.releasesDir", &self.layout.releases_dir),
            ("layout.currentLink", &self.layout.current_link),
            ("layout.ledgerFile", &self.layout.ledger_file),
            ("layout.virtualenvDir", &self.layout.virtualenv_dir),
        ];
        for (key, value) in layout {
            if value.is_empty() || value.contains('/') {
                return Err(Error::config_invalid_value(
                    key,
                    Some(value.clone()),
                    "must be a single path component",
                ));
            }
        }

        if self.retention.keep_until_prefix.is_empty() {
            return Err(Error::config_invalid_value(
                "retention.keepUntilPrefix",
                None,
                "must not be empty",
            ));
        }

        Ok(())
    }

    /// Servers selected by a group name or glob; `all` selects every host once.
    pub fn servers_for(&self, selector: &str) -> Result<Vec<Server>> {
        let mut selected: Vec<Server> = Vec::new();

        for (group, servers) in &self.hosts {
            if selector == ALL_HOSTS || glob_match::glob_match(selector, group) {
                for server in servers {
                    if !selected.iter().any(|s| s.host == server.host && s.user == server.user) {
                        selected.push(server.clone());
                    }
                }
            }
        }

        if selected.is_empty() {
            return Err(Error::host_group_not_found(
                selector,
                self.hosts.keys().cloned().collect(),
            ));
        }
        Ok(selected)
    }

    /// Groups the server belongs to.
    pub fn groups_of(&self, server: &Server) -> Vec<String> {
        self.hosts
            .iter()
            .filter(|(_, servers)| servers.iter().any(|s| s.host == server.host))
            .map(|(group, _)| group.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "codeRepo": "git@github.com:example/app.git",
        "root": "/srv/app",
        "hosts": {
            "web": [{"host": "web1", "user": "deploy"}, {"host": "web2", "user": "deploy"}],
            "static": [{"host": "web1", "user": "deploy"}],
            "celery": [{"host": "worker1", "user": "deploy"}]
        }
    }"#;

    #[test]
    fn minimal_environment_gets_defaults() {
        let env = from_json(MINIMAL, "staging").unwrap();

        assert_eq!(env.name, "staging");
        assert!(env.elevate);
        assert_eq!(env.layout.ledger_file, "RELEASES.txt");
        assert_eq!(env.retention.keep, 3);
        assert_eq!(env.retention.keep_until_prefix, "KEEP_UNTIL__");
        assert_eq!(env.offline.strip_components, 2);
        assert_eq!(env.artifacts.len(), 6);
    }

    #[test]
    fn all_selects_each_host_once() {
        let env = from_json(MINIMAL, "staging").unwrap();
        let hosts: Vec<_> = env
            .servers_for(ALL_HOSTS)
            .unwrap()
            .into_iter()
            .map(|s| s.host)
            .collect();

        assert_eq!(hosts, ["worker1", "web1", "web2"]);
    }

    #[test]
    fn group_selector_accepts_globs() {
        let env = from_json(MINIMAL, "staging").unwrap();
        assert_eq!(env.servers_for("cel*").unwrap().len(), 1);
    }

    #[test]
    fn unknown_group_lists_available() {
        let env = from_json(MINIMAL, "staging").unwrap();
        let err = env.servers_for("proxy").unwrap_err();

        assert_eq!(err.code.as_str(), "host_group.not_found");
        assert_eq!(err.details["available"][0], "celery");
    }

    #[test]
    fn groups_of_reports_membership() {
        let env = from_json(MINIMAL, "staging").unwrap();
        let web1 = Server::new("web1", "deploy");
        assert_eq!(env.groups_of(&web1), ["static", "web"]);
    }

    #[test]
    fn relative_root_is_rejected() {
        let raw = MINIMAL.replace("\"/srv/app\"", "\"srv/app\"");
        let err = from_json(&raw, "staging").unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_value");
    }

    #[test]
    fn missing_repo_is_reported() {
        let raw = MINIMAL.replace("git@github.com:example/app.git", "");
        let err = from_json(&raw, "staging").unwrap_err();
        assert_eq!(err.code.as_str(), "config.missing_key");
    }

    #[test]
    fn artifact_missing_source_defaults_by_kind() {
        assert_eq!(
            ArtifactSpec::directory("node_modules").on_missing(),
            MissingSource::Placeholder
        );
        assert_eq!(
            ArtifactSpec::file("localsettings.py").on_missing(),
            MissingSource::Skip
        );
    }

    #[test]
    fn artifact_group_filter() {
        let env = from_json(MINIMAL, "staging").unwrap();
        let cache = env
            .artifacts
            .iter()
            .find(|a| a.path == "staticfiles/CACHE/js")
            .unwrap();

        assert!(cache.applies_to(&["static".to_string(), "web".to_string()]));
        assert!(!cache.applies_to(&["celery".to_string()]));
    }

    #[test]
    fn subsystem_configs_follow_their_groups() {
        let env = from_json(MINIMAL, "staging").unwrap();
        let for_groups = |groups: &[&str]| -> Vec<String> {
            let groups: Vec<String> = groups.iter().map(|g| g.to_string()).collect();
            env.artifacts
                .iter()
                .filter(|a| a.applies_to(&groups))
                .map(|a| a.path.clone())
                .collect()
        };

        let formplayer = for_groups(&["formplayer"]);
        assert!(formplayer.contains(&"formplayer_build/application.properties".to_string()));
        assert!(!formplayer.iter().any(|p| p.starts_with("submodules/touchforms-src")));

        let touchforms = for_groups(&["touchforms"]);
        assert!(touchforms
            .contains(&"submodules/touchforms-src/touchforms/backend/localsettings.py".to_string()));

        let web = for_groups(&["web"]);
        assert!(!web.iter().any(|p| p.starts_with("formplayer_build")));
        assert!(!web.iter().any(|p| p.starts_with("submodules/")));
    }
}
