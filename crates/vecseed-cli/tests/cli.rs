#![allow(deprecated)]

/// Integration tests for the vecseed binary
///
/// None of these need a running service: they cover argument parsing,
/// configuration layering and the failure path of an unreachable service.
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

// Discard port; nothing listens there in a test environment
const UNREACHABLE_URI: &str = "http://127.0.0.1:9";

fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("vecseed").unwrap();
    cmd.env_remove("MILVUS_URI").env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_every_command() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("wait"))
        .stdout(predicate::str::contains("summary"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn config_prints_defaults_as_toml() {
    cmd()
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("[service]"))
        .stdout(predicate::str::contains("uri = \"http://localhost:19530\""))
        .stdout(predicate::str::contains("max_attempts = 30"));
}

#[test]
fn uri_flag_overrides_configuration() {
    cmd()
        .args(["config", "--uri", "http://milvus:19530"])
        .assert()
        .success()
        .stdout(predicate::str::contains("uri = \"http://milvus:19530\""));
}

#[test]
fn environment_overrides_configuration() {
    cmd()
        .arg("config")
        .env("VECSEED_LOAD__PHASES", "5")
        .env("VECSEED_SERVICE__DATABASE", "fixtures")
        .assert()
        .success()
        .stdout(predicate::str::contains("phases = 5"))
        .stdout(predicate::str::contains("database = \"fixtures\""));
}

#[test]
fn config_masks_the_token() {
    cmd()
        .arg("config")
        .env("VECSEED_SERVICE__TOKEN", "s3cret-token")
        .assert()
        .success()
        .stdout(predicate::str::contains("token = \"***\""))
        .stdout(predicate::str::contains("s3cret").not());
}

#[test]
fn config_file_is_layered_over_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("vecseed.toml");
    fs::write(&path, "[load]\nbatch_size = 50\n").unwrap();

    cmd()
        .args(["config", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("batch_size = 50"))
        .stdout(predicate::str::contains("phases = 3"));
}

#[test]
fn missing_config_file_fails() {
    cmd()
        .args(["config", "--config", "does-not-exist.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"));
}

#[test]
fn wait_fails_when_service_never_answers() {
    cmd()
        .args(["wait", "--uri", UNREACHABLE_URI])
        .env("VECSEED_READINESS__MAX_ATTEMPTS", "2")
        .env("VECSEED_READINESS__INTERVAL_MS", "0")
        .env("VECSEED_SERVICE__TIMEOUT_SECS", "2")
        .assert()
        .failure()
        .stderr(predicate::str::contains("service not ready after 2 attempts"));
}

#[test]
fn run_fails_fast_when_service_never_answers() {
    cmd()
        .args(["run", "--uri", UNREACHABLE_URI])
        .env("VECSEED_READINESS__MAX_ATTEMPTS", "1")
        .env("VECSEED_SERVICE__TIMEOUT_SECS", "2")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Seeding run failed"));
}

#[test]
fn unknown_command_is_rejected() {
    cmd().arg("seed-everything").assert().failure();
}
