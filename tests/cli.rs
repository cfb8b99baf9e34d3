use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("healthmate").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage: healthmate [OPTIONS] <COMMAND>"))
        .stdout(predicate::str::contains("Commands:"))
        .stdout(predicate::str::contains("start"))
        .stdout(predicate::str::contains("chat"))
        .stdout(predicate::str::contains("--backend <BACKEND>"))
        .stdout(predicate::str::contains("--api-key <API_KEY>"))
        .stdout(predicate::str::contains("--version"));
}

#[test]
fn test_cli_start_help() {
    let mut cmd = Command::cargo_bin("healthmate").unwrap();
    cmd.arg("start")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage: healthmate start"))
        .stdout(predicate::str::contains("--port <PORT>"))
        .stdout(predicate::str::contains("--templates <TEMPLATES>"))
        .stdout(predicate::str::contains("--static-dir <STATIC_DIR>"));
}

#[test]
fn test_cli_chat_help() {
    let mut cmd = Command::cargo_bin("healthmate").unwrap();
    cmd.arg("chat")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage: healthmate chat"));
}

#[test]
fn test_cli_api_key_value_is_hidden() {
    let mut cmd = Command::cargo_bin("healthmate").unwrap();
    cmd.env("GEMINI_API_KEY", "super-secret")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("super-secret").not());
}

#[test]
fn test_cli_no_command() {
    let mut cmd = Command::cargo_bin("healthmate").unwrap();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage: healthmate [OPTIONS] <COMMAND>"));
}

#[test]
fn test_chat_without_gemini_key_fails() {
    let mut cmd = Command::cargo_bin("healthmate").unwrap();
    cmd.env_remove("GEMINI_API_KEY")
        .env_remove("HEALTHMATE_BACKEND")
        .arg("chat")
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("GEMINI_API_KEY"));
}

#[test]
fn test_chat_with_ollama_exits_on_eof() {
    let mut cmd = Command::cargo_bin("healthmate").unwrap();
    cmd.args(["--backend", "ollama", "--base-url", "http://127.0.0.1:9", "chat"])
        .write_stdin("")
        .assert()
        .success()
        .stdout(predicate::str::contains("HealthMate: What's your name?"));
}
