use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn test_help_shows_all_commands() {
    cargo_bin_cmd!("mosaic")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("exec"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_exec_help_shows_options() {
    cargo_bin_cmd!("mosaic")
        .args(["exec", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--prompt"))
        .stdout(predicate::str::contains("--model"))
        .stdout(predicate::str::contains("--no-tools"))
        .stdout(predicate::str::contains("--json"));
}

#[test]
fn test_exec_rejects_tools_with_no_tools() {
    cargo_bin_cmd!("mosaic")
        .args(["exec", "-p", "hi", "--tools", "sql_query", "--no-tools"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_version_flag() {
    cargo_bin_cmd!("mosaic")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.3"));
}
