//! Smoke tests -- verify the binary runs and key subcommands exist.

use assert_cmd::Command;

#[test]
fn test_cli_help() {
    Command::cargo_bin("sremedic")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("SRE incident responder"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("sremedic")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("sremedic"));
}

#[test]
fn test_serve_subcommand_exists() {
    Command::cargo_bin("sremedic")
        .unwrap()
        .args(["serve", "--help"])
        .assert()
        .success();
}

#[test]
fn test_inject_subcommand_exists() {
    Command::cargo_bin("sremedic")
        .unwrap()
        .args(["inject", "--help"])
        .assert()
        .success()
        .stdout(predicates::str::contains("--incident-type"));
}

#[test]
fn test_incidents_list_subcommand_exists() {
    Command::cargo_bin("sremedic")
        .unwrap()
        .args(["incidents", "list", "--help"])
        .assert()
        .success();
}

#[test]
fn test_incidents_list_on_fresh_database() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("sremedic.db");
    Command::cargo_bin("sremedic")
        .unwrap()
        .env("SREMEDIC_DB_PATH", db.to_str().unwrap())
        .args(["incidents", "list"])
        .assert()
        .success()
        .stdout(predicates::str::contains("No incidents recorded."));
}
