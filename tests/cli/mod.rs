//! Binary-level tests for the `config` and `unread` subcommands

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn run_cli(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_biblio-notify"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("BIBLIO_NOTIFY_TOKEN")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run CLI")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_config_show_defaults_without_file() {
    let dir = TempDir::new().unwrap();
    let output = run_cli(&dir.path().join("missing.toml"), &["config", "show"]);

    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("api_url = \"http://localhost:8080/api\""), "{}", text);
    assert!(text.contains("max_attempts = 5"), "{}", text);
}

#[test]
fn test_config_show_applies_overrides() {
    let dir = TempDir::new().unwrap();
    let output = run_cli(
        &dir.path().join("config.toml"),
        &["config", "show", "--api-url", "https://library.example/api", "-v"],
    );

    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("https://library.example/api"), "{}", text);
    assert!(text.contains("level = \"debug\""), "{}", text);
}

#[test]
fn test_config_init_refuses_to_overwrite() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let first = run_cli(&path, &["config", "init"]);
    assert!(first.status.success(), "{}", String::from_utf8_lossy(&first.stderr));
    assert!(path.exists());

    let second = run_cli(&path, &["config", "init"]);
    assert_eq!(second.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&second.stderr).contains("already exists"));

    let forced = run_cli(&path, &["config", "init", "--force"]);
    assert!(forced.status.success());
}

#[test]
fn test_config_file_is_read() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[server]\nchannel_url = \"wss://library.example/notifications\"\n\n[reconnect]\nmax_attempts = 2\n",
    )
    .unwrap();

    let text = stdout(&run_cli(&path, &["config", "show"]));
    assert!(text.contains("wss://library.example/notifications"), "{}", text);
    assert!(text.contains("max_attempts = 2"), "{}", text);
}

#[test]
fn test_invalid_config_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[server\napi_url = ").unwrap();

    let output = run_cli(&path, &["config", "show"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_unread_requires_token() {
    let dir = TempDir::new().unwrap();
    let output = run_cli(&dir.path().join("config.toml"), &["unread", "--user", "42"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--token"));
}

#[test]
fn test_unread_reports_unreachable_api() {
    let dir = TempDir::new().unwrap();
    let output = run_cli(
        &dir.path().join("config.toml"),
        &["unread", "--user", "42", "--token", "t", "--api-url", "http://127.0.0.1:9/api"],
    );

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error:"));
}
