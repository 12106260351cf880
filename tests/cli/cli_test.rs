//! Tests for the `applock` binary surface.

use std::path::Path;

use assert_cmd::Command;

fn applock(config: &Path, db: &Path) -> Command {
    let mut cmd = Command::cargo_bin("applock").expect("binary should build");
    cmd.env("APPLOCK_CONFIG_PATH", config);
    cmd.env("APPLOCK_STATE_DB", db);
    cmd
}

fn stdout_of(assert: assert_cmd::assert::Assert) -> String {
    String::from_utf8_lossy(&assert.get_output().stdout).to_string()
}

#[test]
fn help_lists_the_subcommands() {
    let mut cmd = Command::cargo_bin("applock").expect("binary should build");
    let assert = cmd.arg("--help").assert().success();
    let out = stdout_of(assert);
    for sub in ["start", "lock", "unlock", "list", "status"] {
        assert!(out.contains(sub), "help should mention `{sub}`");
    }
}

#[test]
fn lock_then_list_round_trips_through_the_store() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let db = tmp.path().join("applock.db");
    let config = tmp.path().join("applock.toml");

    let assert = applock(&config, &db)
        .args(["lock", "com.example.mail"])
        .assert()
        .success();
    assert!(stdout_of(assert).contains("com.example.mail: locked"));

    let assert = applock(&config, &db).arg("list").assert().success();
    assert!(stdout_of(assert).contains("com.example.mail"));

    let assert = applock(&config, &db)
        .args(["unlock", "com.example.mail"])
        .assert()
        .success();
    assert!(stdout_of(assert).contains("com.example.mail: unlocked"));

    let assert = applock(&config, &db).arg("list").assert().success();
    assert!(!stdout_of(assert).contains("com.example.mail"));
}

#[test]
fn locking_twice_is_idempotent() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let db = tmp.path().join("applock.db");
    let config = tmp.path().join("applock.toml");

    applock(&config, &db)
        .args(["lock", "com.example.bank"])
        .assert()
        .success();
    let assert = applock(&config, &db)
        .args(["lock", "com.example.bank"])
        .assert()
        .success();
    assert!(stdout_of(assert).contains("already locked"));
}

#[test]
fn status_reports_never_unlocked_packages() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let db = tmp.path().join("applock.db");
    let config = tmp.path().join("applock.toml");

    applock(&config, &db)
        .args(["lock", "com.example.bank"])
        .assert()
        .success();

    let assert = applock(&config, &db).arg("status").assert().success();
    let out = stdout_of(assert);
    assert!(out.contains("locked packages: 1"));
    assert!(out.contains("never unlocked"));
}
