mod common;

use std::fs;

use common::*;
use rollout::executor::Host;
use rollout::release::lifecycle;
use rollout::release::ReleaseLayout;

#[test]
fn activation_repoints_current_and_reports_previous() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    make_releases(root, &["r1", "r2"]);

    let env = local_env(root);
    let exec = LocalExecutor::default();
    let server = local_server();
    let host = Host::new(&exec, &server, env.elevate);
    let layout = ReleaseLayout::new(&env);
    let r1 = layout.releases_dir.clone() + "/r1";
    let r2 = layout.releases_dir.clone() + "/r2";

    let first = lifecycle::activate_target(&host, &layout, &r1).unwrap();
    assert_eq!(first.previous, None);
    assert_eq!(fs::read_link(root.join("current")).unwrap(), root.join("releases/r1"));

    let second = lifecycle::activate_target(&host, &layout, &r2).unwrap();
    assert_eq!(second.previous.as_deref(), Some(r1.as_str()));
    assert_eq!(fs::read_link(root.join("current")).unwrap(), root.join("releases/r2"));
    assert!(!root.join("current.next").exists());
}

#[test]
fn repeating_activation_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    make_releases(root, &["r1"]);

    let env = local_env(root);
    let exec = LocalExecutor::default();
    let server = local_server();
    let host = Host::new(&exec, &server, env.elevate);
    let layout = ReleaseLayout::new(&env);
    let r1 = layout.releases_dir.clone() + "/r1";

    lifecycle::activate_target(&host, &layout, &r1).unwrap();
    let again = lifecycle::activate_target(&host, &layout, &r1).unwrap();

    assert_eq!(again.previous.as_deref(), Some(r1.as_str()));
    assert_eq!(fs::read_link(root.join("current")).unwrap(), root.join("releases/r1"));
    // the link was replaced, not nested inside the target directory
    assert!(!root.join("releases/r1/current.next").exists());
    assert!(!root.join("releases/r1/r1").exists());
}

#[test]
fn missing_target_leaves_current_alone() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    make_releases(root, &["r1"]);
    point_current(root, "r1");

    let env = local_env(root);
    let exec = LocalExecutor::default();
    let server = local_server();
    let host = Host::new(&exec, &server, env.elevate);
    let layout = ReleaseLayout::new(&env);

    let err = lifecycle::activate_target(&host, &layout, &(layout.releases_dir.clone() + "/gone"))
        .unwrap_err();

    assert_eq!(err.code.as_str(), "release.activation_failed");
    assert_eq!(fs::read_link(root.join("current")).unwrap(), root.join("releases/r1"));
}

#[test]
fn stale_staging_link_from_an_interrupted_swap_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    make_releases(root, &["r1", "r2"]);
    point_current(root, "r1");
    std::os::unix::fs::symlink(root.join("releases/r1"), root.join("current.next")).unwrap();

    let env = local_env(root);
    let exec = LocalExecutor::default();
    let server = local_server();
    let host = Host::new(&exec, &server, env.elevate);
    let layout = ReleaseLayout::new(&env);
    let r2 = layout.releases_dir.clone() + "/r2";

    let outcome = lifecycle::activate_target(&host, &layout, &r2).unwrap();

    assert_eq!(outcome.target, r2);
    assert_eq!(fs::read_link(root.join("current")).unwrap(), root.join("releases/r2"));
    assert!(!root.join("current.next").exists());
    assert!(!root.join("releases/r1/r2").exists());
}
