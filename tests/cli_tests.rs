//! Integration tests for the rastro diagnostic binary
#![allow(deprecated)] // suppress assert_cmd::Command::cargo_bin deprecation in tests

use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

const ENV_VARS: [&str; 6] = [
    "RASTRO_LOG",
    "RASTRO_HANDLER_EXCEPTION_LIMIT",
    "RASTRO_REQUEST_STORAGE",
    "RASTRO_OPERATION_STORAGE",
    "RASTRO_ASYNC_STORAGE",
    "RASTRO_ISOLATION_BOUNDARY",
];

fn rastro() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("rastro");
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd
}

fn pattern_file(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file
}

// ============================================================================
// trie
// ============================================================================

#[test]
fn test_trie_text_output_nests_under_wildcards() {
    rastro()
        .args(["trie", "-p", "Orders.submit=slow", "-p", "Orders.*", "-p", "Billing.charge"])
        .assert()
        .success()
        .stdout(predicate::str::contains("*\n"))
        .stdout(predicate::str::contains("  Orders.*\n    Orders.submit=slow\n"))
        .stdout(predicate::str::contains("  Billing.charge\n"));
}

#[test]
fn test_trie_json_output_parses() {
    let output = rastro()
        .args(["trie", "--format", "json", "-p", "Orders.*", "-p", "Orders.submit"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed["data"]["key"], "");
    assert_eq!(parsed["data"]["wildcard"], true);
    let orders = &parsed["children"][0];
    assert_eq!(orders["data"]["key"], "Orders.");
    assert_eq!(orders["children"][0]["data"]["key"], "Orders.submit");
}

#[test]
fn test_trie_reads_pattern_file() {
    let file = pattern_file(&["# services", "Orders.*=web", "", "Orders.*=db"]);
    rastro()
        .args(["trie", "--file"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Orders.*=db,web"));
}

#[test]
fn test_invalid_pattern_fails() {
    rastro()
        .args(["trie", "-p", "Ord*ers"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid pattern"));
}

#[test]
fn test_missing_pattern_file_fails() {
    rastro()
        .args(["trie", "--file", "/nonexistent/patterns.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read pattern file"));
}

// ============================================================================
// match
// ============================================================================

#[test]
fn test_match_prints_most_specific() {
    rastro()
        .args(["match", "Orders.submit", "-p", "Orders.*=web", "-p", "Orders.sub*=slow"])
        .assert()
        .success()
        .stdout("Orders.sub*=slow\n");
}

#[test]
fn test_match_all_prints_chain() {
    rastro()
        .args(["match", "Orders.submit", "--all", "-p", "Orders.*", "-p", "Orders.submit"])
        .assert()
        .success()
        .stdout("Orders.*\nOrders.submit\n");
}

#[test]
fn test_match_without_cover_is_not_an_error() {
    rastro()
        .args(["match", "Billing.refund", "-p", "Orders.*"])
        .assert()
        .success()
        .stdout("no match\n");
}

// ============================================================================
// probe
// ============================================================================

#[test]
fn test_probe_outside_request() {
    rastro()
        .arg("probe")
        .assert()
        .success()
        .stdout(predicate::str::contains("selected: async_flow (priority 2, available now: yes)"))
        .stdout(predicate::str::contains("not providing: request, operation\n"))
        .stdout(predicate::str::contains("lookup order: request, operation, thread_local"))
        .stdout(predicate::str::contains("async: async_flow"))
        .stdout(predicate::str::contains("attach uses: thread_local"));
}

#[test]
fn test_probe_outside_any_flow() {
    rastro()
        .args(["probe", "--outside-flow"])
        .assert()
        .success()
        .stdout(predicate::str::contains("selected: thread_local (priority 0"))
        .stdout(predicate::str::contains("not providing: async_flow, request, operation"))
        .stdout(predicate::str::contains("attach uses: thread_local"));
}

#[test]
fn test_probe_inside_request() {
    rastro()
        .args(["probe", "--in-request"])
        .assert()
        .success()
        .stdout(predicate::str::contains("selected: request (priority 10, available now: yes)"))
        .stdout(predicate::str::contains("not providing: operation\n"))
        .stdout(predicate::str::contains("attach uses: request"));
}

#[test]
fn test_probe_inside_operation() {
    rastro()
        .args(["probe", "--in-operation"])
        .assert()
        .success()
        .stdout(predicate::str::contains("selected: operation (priority 5"))
        .stdout(predicate::str::contains("attach uses: operation"));
}

#[test]
fn test_probe_honours_config_file() {
    let mut config = NamedTempFile::new().unwrap();
    writeln!(
        config,
        "[storage]\nrequest_enabled = false\noperation_enabled = false\nisolation_boundary = true"
    )
    .unwrap();

    rastro()
        .arg("--config")
        .arg(config.path())
        .arg("probe")
        .assert()
        .success()
        .stdout(predicate::str::contains("selected: boundary_safe(async_flow)"))
        .stdout(predicate::str::contains("rejected:").count(2));
}

#[test]
fn test_probe_honours_env_override() {
    rastro()
        .env("RASTRO_REQUEST_STORAGE", "off")
        .args(["probe", "--in-request", "--in-operation"])
        .assert()
        .success()
        .stdout(predicate::str::contains("selected: operation"))
        .stdout(predicate::str::contains("rejected: ").count(1));
}

#[test]
fn test_bad_config_fails() {
    let mut config = NamedTempFile::new().unwrap();
    writeln!(config, "[dispatch]\nhandler_exception_limit = 0").unwrap();

    rastro()
        .arg("--config")
        .arg(config.path())
        .arg("probe")
        .assert()
        .failure();
}
