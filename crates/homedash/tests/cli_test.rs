//! Integration tests for the `homedash` CLI binary.
//!
//! Argument parsing, help output, shell completions, and error handling,
//! plus a few end-to-end flows against a wiremock backend.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `homedash` binary with env isolation.
///
/// Clears all `HOMEDASH_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn homedash_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("homedash");
    cmd.env("HOME", "/tmp/homedash-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/homedash-cli-test-nonexistent")
        .env_remove("HOMEDASH_PROFILE")
        .env_remove("HOMEDASH_BACKEND")
        .env_remove("HOMEDASH_STORAGE")
        .env_remove("HOMEDASH_OUTPUT")
        .env_remove("HOMEDASH_INSECURE")
        .env_remove("HOMEDASH_TIMEOUT")
        .env_remove("HOMEDASH_USERNAME")
        .env_remove("HOMEDASH_PASSWORD")
        .env_remove("HOMEDASH_BROKER_PASSWORD")
        .env_remove("RUST_LOG");
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
    let output = homedash_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    homedash_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("login")
            .and(predicate::str::contains("whoami"))
            .and(predicate::str::contains("request"))
            .and(predicate::str::contains("mqtt")),
    );
}

#[test]
fn test_version_flag() {
    homedash_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("homedash"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    homedash_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_zsh() {
    homedash_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Error cases ─────────────────────────────────────────────────────

#[test]
fn test_invalid_subcommand() {
    let output = homedash_cmd().arg("foobar").output().unwrap();
    assert!(!output.status.success(), "Expected failure for invalid subcommand");
    let text = combined_output(&output);
    assert!(
        text.contains("unrecognized") || text.contains("foobar"),
        "Expected error mentioning invalid subcommand:\n{text}"
    );
}

#[test]
fn test_request_rejects_unknown_method() {
    homedash_cmd()
        .args(["request", "FETCH", "/api/x/"])
        .assert()
        .code(2);
}

#[test]
fn test_whoami_without_session_exits_with_auth_code() {
    homedash_cmd()
        .args(["whoami", "--storage", "session"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Not logged in"));
}

#[test]
fn test_unknown_explicit_profile_is_usage_error() {
    homedash_cmd()
        .args(["whoami", "--profile", "nowhere"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("nowhere"));
}

#[test]
fn test_config_path_prints_location() {
    homedash_cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

// ── Debug console ───────────────────────────────────────────────────

#[test]
fn test_mqtt_blank_address_reports_and_quits() {
    homedash_cmd()
        .args(["mqtt", "--url", " "])
        .write_stdin("status\nquit\n")
        .assert()
        .success()
        .stderr(
            predicate::str::contains("Enter a WebSocket address")
                .and(predicate::str::contains("status: idle")),
        );
}

#[test]
fn test_mqtt_requests_are_skipped_while_idle() {
    homedash_cmd()
        .args(["mqtt", "--url", " "])
        .write_stdin("sub home/#\npub t hello\n")
        .assert()
        .success()
        .stderr(predicate::str::contains("skipped: not connected"));
}

// ── Against a mock backend ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_login_prints_identity() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/token/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": "a1", "refresh": "r1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/auth/me/"))
        .and(header("authorization", "Bearer a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 3,
            "username": "alice",
            "email": "alice@example.com",
            "is_admin": true
        })))
        .mount(&server)
        .await;

    homedash_cmd()
        .args([
            "--backend",
            &server.uri(),
            "--storage",
            "session",
            "-o",
            "json-compact",
            "login",
            "--username",
            "alice",
            "--password-stdin",
        ])
        .write_stdin("pw\n")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""username":"alice""#));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rejected_login_exits_with_auth_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/token/"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "detail": "No active account found with the given credentials"
        })))
        .mount(&server)
        .await;

    homedash_cmd()
        .args([
            "--backend",
            &server.uri(),
            "login",
            "--username",
            "alice",
            "--password-stdin",
        ])
        .write_stdin("wrong\n")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("No active account"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_request_prints_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/scenes/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1, "name": "Evening"}])))
        .mount(&server)
        .await;

    homedash_cmd()
        .args(["--backend", &server.uri(), "-o", "json-compact", "request", "get", "api/scenes/"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"[{"id":1,"name":"Evening"}]"#));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unauthorized_request_without_session_exits_with_auth_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/devices/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    homedash_cmd()
        .args(["--backend", &server.uri(), "request", "GET", "/api/devices/"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Session expired"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_status_reports_backend_broker_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/mqtt/status/"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "connected": false,
            "error": "broker unreachable"
        })))
        .mount(&server)
        .await;

    homedash_cmd()
        .args(["--backend", &server.uri(), "--color", "never", "status"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("disconnected")
                .and(predicate::str::contains("broker unreachable")),
        );
}
