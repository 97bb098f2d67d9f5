//! CLI integration tests for the menuflow command-line interface.
//!
//! These tests verify:
//! - Help text is displayed correctly
//! - Argument parsing works as expected
//! - Config inspection works against a temporary config directory
//! - Catalog fallbacks behave when the menu API is unreachable
//!
//! Note: These tests do not require a running menu API.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// An address nothing listens on.
const DEAD_UPSTREAM: &str = "http://127.0.0.1:9";

/// Get a command for the menuflow binary with an isolated config dir.
fn menuflow(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("menuflow").unwrap();
    cmd.env("MENUFLOW_CONFIG_DIR", config_dir.path())
        .env_remove("MENUFLOW_UPSTREAM_URL")
        .env_remove("RUST_LOG")
        .current_dir(config_dir.path());
    cmd
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_lists_subcommands() {
    let dir = TempDir::new().unwrap();
    menuflow(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("catalog"))
        .stdout(predicate::str::contains("render"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_version_displays() {
    let dir = TempDir::new().unwrap();
    menuflow(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("menuflow"));
}

#[test]
fn test_render_help_shows_flags() {
    let dir = TempDir::new().unwrap();
    menuflow(&dir)
        .args(["render", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--session"))
        .stdout(predicate::str::contains("--no-images"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Invalid Input Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_unknown_subcommand_fails() {
    let dir = TempDir::new().unwrap();
    menuflow(&dir)
        .arg("unknown-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_invalid_fallback_rejected() {
    let dir = TempDir::new().unwrap();
    menuflow(&dir)
        .args(["catalog", "--fallback", "sometimes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("sometimes"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Config Subcommand Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_config_show_defaults() {
    let dir = TempDir::new().unwrap();
    menuflow(&dir)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("No config files loaded"))
        .stdout(predicate::str::contains("base_url = \"http://127.0.0.1:8000\""))
        .stdout(predicate::str::contains("concurrency = 3"));
}

#[test]
fn test_config_show_reads_config_dir_and_flag() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        "[downloads]\nconcurrency = 7\n",
    )
    .unwrap();

    let output = menuflow(&dir)
        .args(["--json", "--base-url", "http://menu.test", "config", "show"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["downloads"]["concurrency"], 7);
    assert_eq!(value["upstream"]["base_url"], "http://menu.test");
}

#[test]
fn test_config_which_lists_sources() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("menuflow.toml"), "[idle]\ntimeout_secs = 30\n").unwrap();

    menuflow(&dir)
        .args(["config", "which"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"))
        .stdout(predicate::str::contains("menuflow.toml"))
        .stdout(predicate::str::contains("loaded"));
}

#[test]
fn test_config_init_local_refuses_overwrite() {
    let dir = TempDir::new().unwrap();
    menuflow(&dir)
        .args(["config", "init", "--local"])
        .assert()
        .success();
    assert!(dir.path().join("menuflow.toml").is_file());

    menuflow(&dir)
        .args(["config", "init", "--local"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Catalog Fallback Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_catalog_fail_fallback_reports_error() {
    let dir = TempDir::new().unwrap();
    menuflow(&dir)
        .args(["--base-url", DEAD_UPSTREAM, "catalog", "--fallback", "fail"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Upstream unavailable"));
}

#[test]
fn test_catalog_empty_fallback_succeeds() {
    let dir = TempDir::new().unwrap();
    let output = menuflow(&dir)
        .args(["--json", "--base-url", DEAD_UPSTREAM, "catalog", "--fallback", "empty"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["freshness"], "empty");
    assert_eq!(value["items"].as_array().map(Vec::len), Some(0));
}
