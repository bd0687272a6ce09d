//! End-to-end deploy/rollback flows through the library API.

mod common;

use common::TestEnv;

use quay::deploy::DeployOptions;
use quay::models::Outcome;
use quay::rollback::RollbackTarget;
use quay::webhook::{sign_sha256, verify_signature, PushEvent};

#[test]
fn deploy_update_rollback_cycle() {
    let env = TestEnv::new();
    let orchestrator = env.orchestrator();

    env.mirror_commit(
        "main",
        "c1",
        &[("index.php", "v1"), ("themes/site/style.css", "a{}")],
    );
    let first = orchestrator
        .deploy(&DeployOptions::new("main").with_actor("dev"))
        .unwrap();
    assert!(first.is_success(), "{}", first.message);
    assert_eq!(env.read_site("index.php"), "v1");

    env.mirror_commit(
        "main",
        "c2",
        &[("index.php", "v2"), ("themes/site/style.css", "b{}")],
    );
    let second = orchestrator
        .deploy(&DeployOptions::new("main").with_actor("dev"))
        .unwrap();
    assert!(second.is_success());
    assert_eq!(env.read_site("index.php"), "v2");

    env.mirror_commit("main", "c3", &[("index.php", "v3")]);
    let third = orchestrator
        .deploy(&DeployOptions::new("main").with_actor("dev"))
        .unwrap();
    assert!(third.is_success());
    assert_eq!(env.read_site("index.php"), "v3");
    assert!(
        !env.site_path("themes/site/style.css").exists(),
        "delete_removed should drop files missing from the source tree"
    );

    // Roll back past the current deployment to the one before it.
    let rollback = orchestrator
        .rollback(&RollbackTarget::Previous, "dev")
        .unwrap();
    assert!(rollback.is_success(), "{}", rollback.message);
    assert_eq!(env.read_site("index.php"), "v1");

    let records = orchestrator.list_deployments(None).unwrap();
    assert_eq!(records.len(), 4);
    assert!(records[0].is_rollback);
    assert_eq!(records[0].outcome, Outcome::Success);
    assert!(records[1..].iter().all(|r| !r.is_rollback));
}

#[test]
fn rollback_by_recorded_commit_sha() {
    let env = TestEnv::new();
    let orchestrator = env.orchestrator();

    env.mirror_commit("main", "c1", &[("index.php", "v1")]);
    orchestrator.deploy(&DeployOptions::new("main")).unwrap();
    env.mirror_commit("main", "c2", &[("index.php", "v2")]);
    orchestrator.deploy(&DeployOptions::new("main")).unwrap();

    // c2's record carries the snapshot of the tree as it stood before c2.
    let outcome = orchestrator
        .rollback(&RollbackTarget::parse("c2"), "dev")
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(env.read_site("index.php"), "v1");
}

#[test]
fn webhook_signature_gates_the_deploy_trigger() {
    let env = TestEnv::new();
    let orchestrator = env.orchestrator();
    env.mirror_commit("main", "abc123", &[("index.php", "pushed")]);

    let secret = "shared-secret";
    let payload = br#"{"ref":"refs/heads/main","after":"abc123"}"#;

    // Tampered signature never reaches the orchestrator.
    assert!(verify_signature(payload, "sha256=deadbeef", secret).is_err());

    // A verified push to the deploy branch runs a normal deployment.
    let signature = sign_sha256(payload, secret);
    verify_signature(payload, &signature, secret).unwrap();
    let event = PushEvent::parse(payload).unwrap();
    assert!(event.matches_branch("main"));

    let outcome = orchestrator
        .deploy(&DeployOptions::new("main").with_actor("webhook"))
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(env.read_site("index.php"), "pushed");
    assert_eq!(
        orchestrator.list_deployments(None).unwrap()[0].actor,
        "webhook"
    );
}

#[test]
fn fast_compare_trusts_size_and_mtime() {
    let env = TestEnv::with_config_lines(&["compare = \"fast\""]);
    let orchestrator = env.orchestrator();

    env.mirror_commit("main", "c1", &[("page.php", "same-size-A")]);
    orchestrator.deploy(&DeployOptions::new("main")).unwrap();

    // Rewrite the mirrored file with identical length and pin both mtimes
    // to the same instant: the documented fast-mode blind spot.
    env.mirror_commit("main", "c2", &[("page.php", "same-size-B")]);
    let staged = env.config().mirror_root().join("main/page.php");
    let live = env.site_path("page.php");
    let mtime = filetime::FileTime::from_unix_time(1_700_000_000, 0);
    filetime::set_file_mtime(&staged, mtime).unwrap();
    filetime::set_file_mtime(&live, mtime).unwrap();

    let plan = orchestrator.plan("main").unwrap();
    assert!(
        plan.change_set.is_empty(),
        "fast mode must miss a same-size same-mtime rewrite"
    );

    // A size change is visible even to fast mode.
    env.mirror_commit("main", "c3", &[("page.php", "now much longer content")]);
    let plan = orchestrator.plan("main").unwrap();
    assert_eq!(plan.change_set.modifies(), 1);
}

#[test]
fn suspended_run_survives_process_boundaries() {
    // Progress and lock live in the file-backed store, so a second
    // orchestrator instance (a new invocation) can pick the run up.
    let env = TestEnv::with_config_lines(&["chunk_size = 1"]);
    env.mirror_commit("main", "c1", &[("a.txt", "a"), ("b.txt", "b")]);

    let first_invocation = env.orchestrator();
    let outcome = first_invocation
        .deploy(&DeployOptions::new("main"))
        .unwrap();
    assert!(outcome.is_suspended());
    drop(first_invocation);

    let second_invocation = env.orchestrator();
    let resumed = second_invocation.resume().unwrap().unwrap();
    assert!(resumed.is_success(), "{}", resumed.message);
    assert_eq!(env.read_site("a.txt"), "a");
    assert_eq!(env.read_site("b.txt"), "b");
}
