//! CLI Integration Tests
//!
//! Runs the `tally` binary with assert_cmd against the tables in test-data/.
//!
//! # Coverage Exclusion
//! Skipped during coverage runs, where the binary is not exercised.

#![cfg(not(coverage))]
#![allow(deprecated)] // Command::cargo_bin deprecation - no stable replacement yet

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn tally() -> Command {
    let mut cmd = Command::cargo_bin("tally").unwrap();
    cmd.env_remove("TALLY_CONFIG")
        .env_remove("TALLY_NULL")
        .env_remove("TALLY_WORKERS")
        .env_remove("RUST_LOG");
    cmd
}

// ═══════════════════════════════════════════════════════════════════════════
// HELP AND VERSION TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_cli_help() {
    tally()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("tally"))
        .stdout(predicate::str::contains("COMMANDS"));
}

#[test]
fn test_cli_version() {
    tally()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tally"));
}

#[test]
fn test_aggregate_help() {
    tally()
        .args(["aggregate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("q4 = p25 p50 p75"));
}

#[test]
fn test_derive_help() {
    tally()
        .args(["derive", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("_stdout"));
}

// ═══════════════════════════════════════════════════════════════════════════
// AGGREGATORS COMMAND TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_aggregators_lists_builtins() {
    tally()
        .arg("aggregators")
        .assert()
        .success()
        .stdout(predicate::str::contains("median"))
        .stdout(predicate::str::contains("q4 (p25 p50 p75)"))
        .stdout(predicate::str::contains("keymax"));
}

// ═══════════════════════════════════════════════════════════════════════════
// AGGREGATE COMMAND TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_aggregate_declared_aggregators_json() {
    tally()
        .args(["aggregate", "test-data/files.yaml", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""name": "size_sum""#))
        .stdout(predicate::str::contains(r#""value": "720""#))
        .stdout(predicate::str::contains(r#""name": "size_keymax""#))
        .stdout(predicate::str::contains(r#""value": "b.txt""#));
}

#[test]
fn test_aggregate_declared_aggregators_text() {
    tally()
        .args(["aggregate", "test-data/files.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Results"))
        .stdout(predicate::str::contains("size_max"))
        .stdout(predicate::str::contains("300"));
}

#[test]
fn test_aggregate_status_lines_logged_by_default() {
    tally()
        .args(["aggregate", "test-data/files.yaml", "--json"])
        .assert()
        .success()
        .stderr(predicate::str::contains("tally::status"))
        .stderr(predicate::str::contains("720"));
}

#[test]
fn test_aggregate_status_lines_follow_rust_log() {
    tally()
        .env("RUST_LOG", "warn")
        .args(["aggregate", "test-data/files.yaml", "--json"])
        .assert()
        .success()
        .stderr(predicate::str::contains("tally::status").not());
}

#[test]
fn test_aggregate_selected_column_with_family() {
    tally()
        .args([
            "aggregate",
            "test-data/files.yaml",
            "-c",
            "size",
            "-a",
            "median",
            "-a",
            "q4",
            "--json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""name": "size_median""#))
        .stdout(predicate::str::contains(r#""name": "size_p25""#))
        .stdout(predicate::str::contains(r#""name": "size_p75""#));
}

#[test]
fn test_aggregate_distinct_text_column() {
    tally()
        .args([
            "aggregate",
            "test-data/files.yaml",
            "-c",
            "owner",
            "-a",
            "distinct",
            "--json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""name": "owner_distinct""#))
        .stdout(predicate::str::contains(r#""value": "3""#));
}

#[test]
fn test_aggregate_unknown_aggregator_fails() {
    tally()
        .args(["aggregate", "test-data/files.yaml", "-a", "nosuch"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown aggregator: nosuch"));
}

#[test]
fn test_aggregate_unknown_column_fails() {
    tally()
        .args(["aggregate", "test-data/files.yaml", "-c", "colour", "-a", "sum"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown column: colour"));
}

#[test]
fn test_aggregate_missing_file_fails() {
    tally()
        .args(["aggregate", "test-data/nope.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("IO error"));
}

#[test]
fn test_aggregate_error_is_reported_not_fatal() {
    tally()
        .args(["aggregate", "test-data/mixed.yaml", "-a", "sum", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""error": "text is not numeric""#));
}

#[test]
fn test_null_flag_skips_marker() {
    tally()
        .args([
            "aggregate",
            "test-data/mixed.yaml",
            "-a",
            "sum",
            "--null",
            "n/a",
            "--json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""value": "7""#));
}

#[test]
fn test_aggregate_mapping_rows_from_tempfile() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("latency.yaml");
    fs::write(
        &path,
        r#"
columns:
  - name: ms
    type: float
    aggregators: mean p50
rows:
  - {ms: 10}
  - {ms: 20}
  - {ms: 40}
  - {ms: ""}
"#,
    )
    .unwrap();

    tally()
        .arg("aggregate")
        .arg(&path)
        .arg("--json")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""name": "ms_mean""#))
        .stdout(predicate::str::contains(r#""value": "23.333333""#))
        .stdout(predicate::str::contains(r#""value": "20""#));
}

// ═══════════════════════════════════════════════════════════════════════════
// CONFIG TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_config_file_null_text() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("tally.yaml");
    fs::write(&config, "null_text: n/a\nworkers: 2\n").unwrap();

    tally()
        .arg("--config")
        .arg(&config)
        .args(["aggregate", "test-data/mixed.yaml", "-a", "count", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""value": "3""#));
}

#[test]
fn test_config_zero_workers_rejected() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("tally.yaml");
    fs::write(&config, "workers: 0\n").unwrap();

    tally()
        .arg("--config")
        .arg(&config)
        .arg("aggregators")
        .assert()
        .failure()
        .stderr(predicate::str::contains("workers must be at least 1"));
}

#[test]
fn test_config_unknown_key_rejected() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("tally.yaml");
    fs::write(&config, "colour: blue\n").unwrap();

    tally()
        .arg("--config")
        .arg(&config)
        .arg("aggregators")
        .assert()
        .failure()
        .stderr(predicate::str::contains("YAML parsing error"));
}

// ═══════════════════════════════════════════════════════════════════════════
// DERIVE COMMAND TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(unix)]
#[test]
fn test_derive_echo_json() {
    tally()
        .args(["derive", "test-data/files.yaml", "echo $filename", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""row": "a.txt""#))
        .stdout(predicate::str::contains(r#""output": "d.txt""#));
}

#[cfg(unix)]
#[test]
fn test_derive_with_aggregator() {
    tally()
        .args([
            "derive",
            "test-data/files.yaml",
            "echo $owner",
            "-a",
            "distinct",
            "--json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""name": "echo $owner_distinct""#))
        .stdout(predicate::str::contains(r#""value": "3""#));
}

#[cfg(unix)]
#[test]
fn test_derive_custom_sigil() {
    tally()
        .args([
            "derive",
            "test-data/files.yaml",
            "echo %size",
            "--sigil",
            "%",
            "--json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""output": "120""#));
}

#[test]
fn test_derive_missing_program_is_per_row_error() {
    tally()
        .args([
            "derive",
            "test-data/files.yaml",
            "tally-no-such-program $filename",
            "--json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""error""#))
        .stdout(predicate::str::contains("tally-no-such-program"));
}

#[test]
fn test_derive_template_named_like_column_fails() {
    tally()
        .args(["derive", "test-data/files.yaml", "size"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Column 'size' already exists"));
}

#[test]
fn test_derive_unknown_reference_is_per_row_error() {
    tally()
        .args(["derive", "test-data/files.yaml", "echo $colour", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("colour"));
}
