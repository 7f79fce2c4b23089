//! Integration tests for the `tidewire` CLI binary.
//!
//! These tests validate argument parsing, help output, shell completions,
//! configuration handling and error exit codes without a live backend.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `tidewire` binary with env isolation.
///
/// Clears all `TIDEWIRE_*` env vars and points config directories at
/// `home` so tests never touch the user's real configuration.
fn tidewire_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("tidewire");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("TIDEWIRE_PROFILE")
        .env_remove("TIDEWIRE_SERVER")
        .env_remove("TIDEWIRE_API_URL")
        .env_remove("TIDEWIRE_IDENTITY")
        .env_remove("TIDEWIRE_TOKEN")
        .env_remove("TIDEWIRE_OUTPUT")
        .env_remove("TIDEWIRE_INSECURE")
        .env_remove("TIDEWIRE_TIMEOUT");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let home = tempfile::tempdir().unwrap();
    let output = tidewire_cmd(home.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    let home = tempfile::tempdir().unwrap();
    tidewire_cmd(home.path()).arg("--help").assert().success().stdout(
        predicate::str::contains("tail")
            .and(predicate::str::contains("send"))
            .and(predicate::str::contains("conversations"))
            .and(predicate::str::contains("cancel"))
            .and(predicate::str::contains("history"))
            .and(predicate::str::contains("delete")),
    );
}

#[test]
fn test_history_rejects_malformed_channel() {
    let home = tempfile::tempdir().unwrap();
    tidewire_cmd(home.path())
        .args(["history", "no-type-here"])
        .assert()
        .code(2);
}

#[test]
fn test_version_flag() {
    let home = tempfile::tempdir().unwrap();
    tidewire_cmd(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tidewire"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_zsh() {
    let home = tempfile::tempdir().unwrap();
    tidewire_cmd(home.path())
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

#[test]
fn test_completions_bash() {
    let home = tempfile::tempdir().unwrap();
    tidewire_cmd(home.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

// ── Argument errors ─────────────────────────────────────────────────

#[test]
fn test_invalid_subcommand() {
    let home = tempfile::tempdir().unwrap();
    let output = tidewire_cmd(home.path()).arg("foobar").output().unwrap();
    assert!(!output.status.success());
    let text = combined_output(&output);
    assert!(
        text.contains("unrecognized") || text.contains("foobar"),
        "Expected error mentioning invalid subcommand:\n{text}"
    );
}

#[test]
fn test_send_rejects_malformed_channel_key() {
    let home = tempfile::tempdir().unwrap();
    tidewire_cmd(home.path())
        .args(["send", "visitor-a", "hello"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("visitor-a"));
}

// ── Configuration errors ────────────────────────────────────────────

#[test]
fn test_missing_profile_is_usage_error() {
    let home = tempfile::tempdir().unwrap();
    tidewire_cmd(home.path())
        .args(["send", "visitor-a:251", "hello"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Profile 'default' not found"));
}

#[test]
fn test_http_server_url_is_rejected() {
    let home = tempfile::tempdir().unwrap();
    tidewire_cmd(home.path())
        .args([
            "connect",
            "--server",
            "https://im.example.com",
            "--identity",
            "staff-1",
            "--token",
            "t",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("ws://"));
}

#[test]
fn test_conversations_without_api_url() {
    let home = tempfile::tempdir().unwrap();
    tidewire_cmd(home.path())
        .args([
            "conversations",
            "--server",
            "wss://im.example.com/ws",
            "--identity",
            "staff-1",
            "--token",
            "t",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No REST API URL"));
}

#[test]
fn test_cancel_without_api_url() {
    let home = tempfile::tempdir().unwrap();
    tidewire_cmd(home.path())
        .args([
            "cancel",
            "c-1",
            "--server",
            "wss://im.example.com/ws",
            "--identity",
            "staff-1",
            "--token",
            "t",
        ])
        .assert()
        .code(2);
}

// ── Config commands ─────────────────────────────────────────────────

#[test]
fn test_config_set_then_list_profiles() {
    let home = tempfile::tempdir().unwrap();

    tidewire_cmd(home.path())
        .args(["config", "set", "server", "wss://im.example.com/ws", "-p", "work"])
        .assert()
        .success();
    tidewire_cmd(home.path())
        .args(["config", "set", "identity", "staff-1", "-p", "work"])
        .assert()
        .success();
    tidewire_cmd(home.path())
        .args(["config", "use", "work"])
        .assert()
        .success();

    tidewire_cmd(home.path())
        .args(["config", "profiles"])
        .assert()
        .success()
        .stdout(predicate::str::contains("work *"));
}

#[test]
fn test_config_set_unknown_key() {
    let home = tempfile::tempdir().unwrap();
    tidewire_cmd(home.path())
        .args(["config", "set", "colour", "red"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown config key"));
}

#[test]
fn test_config_use_unknown_profile() {
    let home = tempfile::tempdir().unwrap();
    tidewire_cmd(home.path())
        .args(["config", "use", "nowhere"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("nowhere"));
}
