//! CLI integration tests for dsdiff.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for various error conditions.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use std::path::Path;

/// Get a command for the dsdiff binary.
fn cmd() -> Command {
    Command::cargo_bin("dsdiff").unwrap()
}

/// Config with one SQLite data source per path.
fn sqlite_config(paths: &[&Path], extra: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "data_sources:").unwrap();
    for path in paths {
        writeln!(file, "  - type: sqlite").unwrap();
        writeln!(file, "    schema: {}", path.display()).unwrap();
    }
    write!(file, "{}", extra).unwrap();
    file
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("bdiff"))
        .stdout(predicate::str::contains("count"))
        .stdout(predicate::str::contains("diff"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_diff_subcommand_help() {
    cmd()
        .args(["diff", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("<TABLE>"))
        .stdout(predicate::str::contains("--base"))
        .stdout(predicate::str::contains("[default: 0]"));
}

#[test]
fn test_bdiff_subcommand_help() {
    cmd()
        .args(["bdiff", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--max-rows"))
        .stdout(predicate::str::contains("--batch-size"))
        .stdout(predicate::str::contains("--output-dir"));
}

#[test]
fn test_count_subcommand_help() {
    cmd()
        .args(["count", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--output"))
        .stdout(predicate::str::contains("[default: count.csv]"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("dsdiff"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_output_json_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"));
}

#[test]
fn test_log_format_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"));
}

#[test]
fn test_verbosity_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"));
}

// =============================================================================
// Exit Code Tests - Config Errors (Exit Code 1)
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_7() {
    // Missing file is an IO error (code 7), not config error (code 1)
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "health-check"])
        .assert()
        .code(7); // EXIT_IO_ERROR - file not found
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1); // EXIT_CONFIG_ERROR
}

#[test]
fn test_empty_config_exits_with_code_1() {
    let file = tempfile::NamedTempFile::new().unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1); // EXIT_CONFIG_ERROR
}

#[test]
fn test_missing_required_fields_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    // Valid YAML, but a mysql data source needs url and username
    writeln!(file, "data_sources:").unwrap();
    writeln!(file, "  - type: mysql").unwrap();
    writeln!(file, "    schema: shop").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1); // EXIT_CONFIG_ERROR
}

#[test]
fn test_bdiff_without_tables_exits_with_code_1() {
    let dir = tempfile::tempdir().unwrap();
    let config = sqlite_config(&[&dir.path().join("base.db")], "");

    cmd()
        .args(["--config", config.path().to_str().unwrap(), "bdiff"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("bdiff_tables"));
}

#[test]
fn test_count_without_tables_exits_with_code_1() {
    let dir = tempfile::tempdir().unwrap();
    let config = sqlite_config(&[&dir.path().join("base.db")], "");

    cmd()
        .args(["--config", config.path().to_str().unwrap(), "count"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("count_tables"));
}

#[test]
fn test_diff_base_out_of_range_exits_with_code_1() {
    let dir = tempfile::tempdir().unwrap();
    let config = sqlite_config(&[&dir.path().join("base.db")], "");

    cmd()
        .args([
            "--config",
            config.path().to_str().unwrap(),
            "diff",
            "users",
            "--base",
            "1",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--base 1 out of range"));
}

#[test]
fn test_diff_requires_table() {
    cmd().arg("diff").assert().failure().code(2);
}

// =============================================================================
// Exit Code Tests - Connection Errors (Exit Code 2)
// =============================================================================

#[test]
fn test_health_check_missing_database_exits_with_code_2() {
    let dir = tempfile::tempdir().unwrap();
    let config = sqlite_config(&[&dir.path().join("missing.db")], "");

    cmd()
        .args(["--config", config.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(2) // EXIT_CONNECT_ERROR
        .stdout(predicate::str::contains("FAILED"))
        .stdout(predicate::str::contains("UNHEALTHY"));
}

#[test]
fn test_health_check_json_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = sqlite_config(&[&dir.path().join("missing.db")], "");

    cmd()
        .args([
            "--config",
            config.path().to_str().unwrap(),
            "--output-json",
            "health-check",
        ])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("\"healthy\": false"))
        .stdout(predicate::str::contains("\"connected\": false"));
}

#[test]
fn test_bdiff_unreachable_source_exits_with_code_2() {
    let dir = tempfile::tempdir().unwrap();
    let config = sqlite_config(&[&dir.path().join("missing.db")], "");
    let out = dir.path().join("bdiff");

    cmd()
        .args([
            "--config",
            config.path().to_str().unwrap(),
            "bdiff",
            "--output-dir",
            out.to_str().unwrap(),
            "orders",
        ])
        .assert()
        .code(2);
    // Nothing is written before all data sources are connected
    assert!(!out.exists());
}

// =============================================================================
// Subcommand Existence Tests
// =============================================================================

#[test]
fn test_health_check_command_exists() {
    cmd()
        .args(["health-check", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Test data source connections"));
}

// =============================================================================
// Config Path Tests
// =============================================================================

#[test]
fn test_config_default_path() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

#[test]
fn test_short_config_flag() {
    // -c should work as short for --config
    cmd()
        .args(["-c", "some_config.yaml", "--help"])
        .assert()
        .success();
}

// =============================================================================
// No Subcommand Tests
// =============================================================================

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}
