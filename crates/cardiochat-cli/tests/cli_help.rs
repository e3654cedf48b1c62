use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn test_help_lists_commands() {
    cargo_bin_cmd!("cardiochat")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("chat"))
        .stdout(predicate::str::contains("send"))
        .stdout(predicate::str::contains("threads"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_threads_help_lists_subcommands() {
    cargo_bin_cmd!("cardiochat")
        .args(["threads", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("show"))
        .stdout(predicate::str::contains("new"))
        .stdout(predicate::str::contains("select"))
        .stdout(predicate::str::contains("delete"));
}

#[test]
fn test_version_flag() {
    cargo_bin_cmd!("cardiochat")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("cardiochat"));
}

#[test]
fn test_non_numeric_id_is_rejected_by_parser() {
    cargo_bin_cmd!("cardiochat")
        .args(["threads", "show", "abc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}
