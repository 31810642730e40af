//! CLI integration tests for softkb
//!
//! Tests the softkb CLI commands end-to-end using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a command whose config lives in `home`
#[allow(deprecated)]
fn softkb_cmd(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("softkb").unwrap();
    cmd.env("SOFTKB_CONFIG_DIR", home.path().join("config"));
    cmd.env_remove("RUST_LOG");
    cmd
}

fn set(home: &TempDir, key: &str, value: &str) {
    softkb_cmd(home).args(["config", "set", key, value]).assert().success();
}

/// Point the database and dump directory into `home` and write a small Wikidata dump
fn prepare(home: &TempDir) {
    let dumps = home.path().join("dumps");
    fs::create_dir_all(dumps.join("wikidata")).unwrap();
    fs::write(
        dumps.join("wikidata").join("software.jsonl"),
        [
            r#"{"id": "Q42", "labels": "knitr", "claims": {"P348": [{"value": "1.33", "datatype": "string"}]}}"#,
            r#"{"id": "Q7", "labels": "ggplot2", "aliases": ["ggplot"]}"#,
        ]
        .join("\n"),
    )
    .unwrap();

    let db = home.path().join("softkb.db");
    set(home, "storage.database_path", db.to_str().unwrap());
    set(home, "resources.dump_dir", dumps.to_str().unwrap());
    set(home, "pipeline.sources", "wikidata");
}

#[test]
fn test_help_lists_pipeline_commands() {
    let home = TempDir::new().unwrap();
    softkb_cmd(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("populate"))
        .stdout(predicate::str::contains("merge"))
        .stdout(predicate::str::contains("doctor"));
}

#[test]
fn test_version() {
    let home = TempDir::new().unwrap();
    softkb_cmd(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("softkb"));
}

#[test]
fn test_config_set_then_get() {
    let home = TempDir::new().unwrap();
    set(&home, "pipeline.page_size", "50");

    softkb_cmd(&home)
        .args(["config", "get", "pipeline.page_size"])
        .assert()
        .success()
        .stdout(predicate::str::contains("50"));

    assert!(home.path().join("config").join("config.toml").exists());
}

#[test]
fn test_config_rejects_unknown_source() {
    let home = TempDir::new().unwrap();
    softkb_cmd(&home)
        .args(["config", "set", "pipeline.sources", "wikidata,pypi"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown source 'pypi'"));
}

#[test]
fn test_config_get_unknown_key() {
    let home = TempDir::new().unwrap();
    softkb_cmd(&home)
        .args(["config", "get", "storage.nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown configuration key"));
}

#[test]
fn test_doctor_reports_database() {
    let home = TempDir::new().unwrap();
    prepare(&home);

    softkb_cmd(&home)
        .arg("doctor")
        .assert()
        .success()
        .stdout(predicate::str::contains("[OK] Database: Connected"))
        .stdout(predicate::str::contains("[OK] Dump directory"));
}

#[test]
fn test_run_then_inspect() {
    let home = TempDir::new().unwrap();
    prepare(&home);

    softkb_cmd(&home)
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("Pipeline run complete"));

    softkb_cmd(&home)
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("wikidata/software: 2"));

    softkb_cmd(&home)
        .args(["show", "software/Q7"])
        .assert()
        .success()
        .stdout(predicate::str::contains("software/Q7: ggplot2"))
        .stdout(predicate::str::contains("Aliases: ggplot"));
}

#[test]
fn test_run_json_summary() {
    let home = TempDir::new().unwrap();
    prepare(&home);

    let output = softkb_cmd(&home).args(["run", "--format", "json"]).output().unwrap();
    assert!(output.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["load"]["records"], 2);
    assert_eq!(summary["build"]["entities"], 2);
}

#[test]
fn test_show_missing_vertex_fails() {
    let home = TempDir::new().unwrap();
    prepare(&home);

    softkb_cmd(&home)
        .args(["show", "software/Q999"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("softkb stats"));
}

#[test]
fn test_reset_clears_knowledge_base() {
    let home = TempDir::new().unwrap();
    prepare(&home);

    softkb_cmd(&home).arg("run").assert().success();
    softkb_cmd(&home).args(["reset", "--raw"]).assert().success();

    softkb_cmd(&home)
        .args(["show", "software/Q7"])
        .assert()
        .failure();
    softkb_cmd(&home)
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("(none)"));
}
