//! CLI smoke tests.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_lists_commands() {
    let mut cmd = Command::cargo_bin("partix").expect("binary");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("index"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("query"));
}

#[test]
fn test_status_on_empty_data_root() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cmd = Command::cargo_bin("partix").expect("binary");
    cmd.arg("--data-root")
        .arg(dir.path().join("data"))
        .arg("--out-root")
        .arg(dir.path().join("out"))
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("no partitions registered"));
}

#[test]
fn test_query_without_config_fails_cleanly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cmd = Command::cargo_bin("partix").expect("binary");
    cmd.arg("--data-root")
        .arg(dir.path().join("data"))
        .arg("--out-root")
        .arg(dir.path().join("out"))
        .arg("query")
        .arg("anything")
        .assert()
        .failure();
}
