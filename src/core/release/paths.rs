use serde::Serialize;

use super::ReleaseId;
use crate::config::Environment;
use crate::utils::remote_path;

/// Per-environment paths shared by every release on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseLayout {
    pub root: String,
    pub releases_dir: String,
    pub current: String,
    pub ledger: String,
    virtualenv_dir: String,
}

impl ReleaseLayout {
    pub fn new(env: &Environment) -> Self {
        let root = env.root.trim_end_matches('/').to_string();
        Self {
            releases_dir: remote_path::join(&root, &env.layout.releases_dir),
            current: remote_path::join(&root, &env.layout.current_link),
            ledger: remote_path::join(&root, &env.layout.ledger_file),
            virtualenv_dir: env.layout.virtualenv_dir.clone(),
            root,
        }
    }

    pub fn release_dir(&self, id: &ReleaseId) -> String {
        remote_path::join(&self.releases_dir, id.as_str())
    }

    /// Virtualenv reached through the current link.
    pub fn virtualenv_current(&self) -> String {
        remote_path::join(&self.current, &self.virtualenv_dir)
    }

    pub fn for_release(&self, id: &ReleaseId) -> ReleasePathSet {
        let code_root = self.release_dir(id);
        ReleasePathSet {
            id: id.clone(),
            root: self.root.clone(),
            releases_dir: self.releases_dir.clone(),
            current: self.current.clone(),
            ledger: self.ledger.clone(),
            virtualenv_root: remote_path::join(&code_root, &self.virtualenv_dir),
            virtualenv_current: self.virtualenv_current(),
            code_root,
        }
    }
}

/// Canonical paths for one release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleasePathSet {
    pub id: ReleaseId,
    pub root: String,
    pub releases_dir: String,
    pub current: String,
    pub ledger: String,
    pub code_root: String,
    pub virtualenv_root: String,
    pub virtualenv_current: String,
}

impl ReleasePathSet {
    pub fn new(env: &Environment, id: &ReleaseId) -> Self {
        ReleaseLayout::new(env).for_release(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;

    fn env() -> Environment {
        config::from_json(
            r#"{
                "codeRepo": "git@example.com:app.git",
                "root": "/srv/app/",
                "hosts": {"web": [{"host": "web1", "user": "deploy"}]}
            }"#,
            "test",
        )
        .unwrap()
    }

    #[test]
    fn computes_canonical_paths() {
        let id = ReleaseId::parse("2024-03-01_14.05").unwrap();
        let paths = ReleasePathSet::new(&env(), &id);

        assert_eq!(paths.root, "/srv/app");
        assert_eq!(paths.releases_dir, "/srv/app/releases");
        assert_eq!(paths.current, "/srv/app/current");
        assert_eq!(paths.ledger, "/srv/app/RELEASES.txt");
        assert_eq!(paths.code_root, "/srv/app/releases/2024-03-01_14.05");
        assert_eq!(paths.virtualenv_root, "/srv/app/releases/2024-03-01_14.05/python_env");
        assert_eq!(paths.virtualenv_current, "/srv/app/current/python_env");
    }

    #[test]
    fn distinct_ids_never_share_a_release_dir() {
        let env = env();
        let ids = ["r1", "r10", "r1.0", "r1_", "2024-01-01_00.00", "2024-01-01_00.01"];
        let mut seen = std::collections::HashSet::new();

        for raw in ids {
            let id = ReleaseId::parse(raw).unwrap();
            let paths = ReleasePathSet::new(&env, &id);
            assert!(seen.insert(paths.code_root.clone()), "collision for {}", raw);
            assert_eq!(crate::utils::remote_path::basename(&paths.code_root), raw);
        }
    }

    #[test]
    fn same_id_is_deterministic() {
        let env = env();
        let id = ReleaseId::parse("r1").unwrap();
        assert_eq!(ReleasePathSet::new(&env, &id), ReleasePathSet::new(&env, &id));
    }
}
