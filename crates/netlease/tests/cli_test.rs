//! Integration tests for the `netlease` CLI binary.
//!
//! These tests validate argument parsing, output formats, config handling
//! and scenario replay, all against temporary files.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `netlease` binary with env isolation.
///
/// Clears all `NETLEASE_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn netlease_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("netlease");
    cmd.env("HOME", "/tmp/netlease-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/netlease-cli-test-nonexistent")
        .env_remove("NETLEASE_CONFIG")
        .env_remove("NETLEASE_OUTPUT")
        .env_remove("RUST_LOG");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

fn json_stdout(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

fn write(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path.display().to_string()
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = netlease_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    netlease_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("evaluate")
            .and(predicate::str::contains("policy"))
            .and(predicate::str::contains("simulate")),
    );
}

#[test]
fn test_version_flag() {
    netlease_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("netlease"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    netlease_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_zsh() {
    netlease_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Evaluate ────────────────────────────────────────────────────────

#[test]
fn test_evaluate_download_on_wifi() {
    let output = netlease_cmd()
        .args([
            "-o",
            "json",
            "evaluate",
            "media-download",
            "-n",
            "wifi:id=wlan0,signal=-60",
        ])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let report = json_stdout(&output);
    assert_eq!(report["acceptable"], serde_json::json!(["wifi"]));
    assert_eq!(report["preferred_network"], "wlan0");
    assert_eq!(report["high_bandwidth"], true);
}

#[test]
fn test_evaluate_download_on_bluetooth_is_denied() {
    netlease_cmd()
        .args(["-o", "plain", "evaluate", "media-download", "-n", "bluetooth"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_evaluate_roaming_cellular_explains_refusal() {
    netlease_cmd()
        .args([
            "--color",
            "never",
            "evaluate",
            "media-playback",
            "-n",
            "cellular:roaming",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("refused by not-roaming"));
}

#[test]
fn test_evaluate_metered_needs_opt_in() {
    let denied = netlease_cmd()
        .args(["-o", "plain", "evaluate", "sync", "-n", "cellular:metered"])
        .output()
        .unwrap();
    assert!(String::from_utf8_lossy(&denied.stdout).trim().is_empty());

    netlease_cmd()
        .args([
            "-o",
            "plain",
            "evaluate",
            "sync",
            "-n",
            "cellular:metered",
            "--allow-metered",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("cellular"));
}

#[test]
fn test_evaluate_unknown_request_type() {
    netlease_cmd()
        .args(["evaluate", "telemetry"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("telemetry"));
}

#[test]
fn test_evaluate_bad_network_spec() {
    netlease_cmd()
        .args(["evaluate", "sync", "-n", "wifi:signal=loud"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("signal"));
}

#[test]
fn test_invalid_output_format() {
    let output = netlease_cmd()
        .args(["--output", "invalid", "evaluate", "sync"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let text = combined_output(&output);
    assert!(
        text.contains("invalid") || text.contains("possible values"),
        "Expected error about invalid output format:\n{text}"
    );
}

// ── Policy ──────────────────────────────────────────────────────────

#[test]
fn test_policy_show_lists_builtin_types() {
    netlease_cmd()
        .args(["-o", "plain", "policy", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("media-download")
                .and(predicate::str::contains("logs-upload")),
        );
}

#[test]
fn test_policy_show_uses_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = write(
        dir.path(),
        "config.toml",
        "[defaults]\nbuiltin_policy = false\n\n[policy.api]\nprefer = [\"bluetooth\"]\n",
    );

    let output = netlease_cmd()
        .args(["--config", &config, "-o", "json", "policy", "show"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let rows = json_stdout(&output);
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["request"], "api");
}

#[test]
fn test_policy_check_valid_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = write(
        dir.path(),
        "config.toml",
        "[policy.sync]\nprefer = [\"wifi\", { kind = \"cellular\", modifiers = [\"not-roaming\"] }]\n",
    );

    netlease_cmd()
        .args(["policy", "check", &config])
        .assert()
        .success()
        .stdout(predicate::str::contains("valid"));
}

#[test]
fn test_policy_check_reports_bad_key() {
    let dir = tempfile::tempdir().unwrap();
    let config = write(
        dir.path(),
        "config.toml",
        "[policy.sync]\nprefer = [{ kind = \"wifi\", modifiers = [\"turbo\"] }]\n",
    );

    netlease_cmd()
        .args(["policy", "check", &config])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("policy.sync.prefer[0].modifiers"));
}

#[test]
fn test_policy_check_missing_file() {
    netlease_cmd()
        .args(["policy", "check", "/tmp/netlease-cli-test-nonexistent/none.toml"])
        .assert()
        .code(4);
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_show_no_config() {
    // Without a file the defaults are shown.
    netlease_cmd()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("fail_fast_grace"));
}

#[test]
fn test_config_path_honors_flag() {
    netlease_cmd()
        .args(["--config", "/tmp/elsewhere/netlease.toml", "config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/tmp/elsewhere/netlease.toml"));
}

#[test]
fn test_config_init_refuses_to_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("netlease").join("config.toml");
    let path_arg = path.display().to_string();

    netlease_cmd()
        .args(["--config", &path_arg, "config", "init"])
        .assert()
        .success();
    assert!(path.exists());

    netlease_cmd()
        .args(["--config", &path_arg, "config", "init"])
        .assert()
        .code(6)
        .stderr(predicate::str::contains("--force"));

    netlease_cmd()
        .args(["--config", &path_arg, "config", "init", "--force"])
        .assert()
        .success();

    // The written file passes its own check.
    netlease_cmd()
        .args(["policy", "check", &path_arg])
        .assert()
        .success();
}

// ── Simulate ────────────────────────────────────────────────────────

const SHARED_LEASE_SCRIPT: &str = r#"
[platform]
wifi = "confirm-after:20ms"

[[steps]]
op = "add"
network = "wifi:id=wlan0"

[[steps]]
op = "request"
name = "download"
request = "media-download"
wait = "1s"
count = 2

[[steps]]
op = "record"
id = "wlan0"
request = "media-download"
bytes = "1 KiB"

[[steps]]
op = "close"
name = "download"
"#;

#[test]
fn test_simulate_shared_lease() {
    let dir = tempfile::tempdir().unwrap();
    let script = write(dir.path(), "scenario.toml", SHARED_LEASE_SCRIPT);

    let output = netlease_cmd()
        .args(["-o", "json", "simulate", &script])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let report = json_stdout(&output);
    assert_eq!(report["timeline"].as_array().unwrap().len(), 4);
    let wifi = &report["summary"]["platform"][0];
    assert_eq!(wifi["kind"], "wifi");
    assert_eq!(wifi["requests"], 1);
    assert_eq!(wifi["clears"], 1);
    assert_eq!(report["summary"]["usage"]["by_kind"]["wifi"], 1024);
}

#[test]
fn test_simulate_table_output() {
    let dir = tempfile::tempdir().unwrap();
    let script = write(dir.path(), "scenario.toml", SHARED_LEASE_SCRIPT);

    netlease_cmd()
        .args(["--color", "never", "simulate", &script])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("2 of 2 granted on wifi")
                .and(predicate::str::contains("Summary")),
        );
}

#[test]
fn test_simulate_rejects_unknown_op() {
    let dir = tempfile::tempdir().unwrap();
    let script = write(dir.path(), "bad.toml", "[[steps]]\nop = \"teleport\"\n");

    netlease_cmd()
        .args(["simulate", &script])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("scenario script"));
}
