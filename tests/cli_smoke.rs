use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;

fn bin() -> String {
    // Cargo sets this for bin targets in integration tests
    env!("CARGO_BIN_EXE_codexcore").to_string()
}

/// Run with a private config so nothing touches the home directory.
fn codexcore(dir: &Path, args: &[&str]) -> Output {
    let cfg = dir.join("codexcore.toml");
    fs::write(
        &cfg,
        format!(
            "[influence]\nweights_path = {:?}\naudit_path = {:?}\n",
            dir.join("weights.json").display().to_string(),
            dir.join("audit.jsonl").display().to_string()
        ),
    )
    .unwrap();
    Command::new(bin())
        .arg("--config")
        .arg(&cfg)
        .args(args)
        .env_remove("AION_DECISION_INFLUENCE_ALLOW_LIVE_APPLY")
        .env_remove("DECISION_INFLUENCE_ALLOW_LIVE_APPLY")
        .output()
        .expect("run")
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "bad json ({e})\nstdout:\n{}\nstderr:\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

#[test]
fn exec_test_mode_prints_canonical_tree() {
    let dir = tempfile::tempdir().unwrap();
    let output = codexcore(dir.path(), &["exec", "⊗(A, B)", "--test-mode"]);
    assert!(output.status.success(), "stderr:\n{}", String::from_utf8_lossy(&output.stderr));
    let out = stdout_json(&output);
    assert_eq!(out["status"], "ok");
    assert_eq!(out["result"]["op"], "logic:⊗");
}

#[test]
fn exec_with_bindings_evaluates() {
    let dir = tempfile::tempdir().unwrap();
    let output = codexcore(dir.path(), &["exec", "A → B", "--bind", "A=true", "--bind", "B=false"]);
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["result"], false);
}

#[test]
fn parse_error_exits_nonzero_with_diagnostic() {
    let dir = tempfile::tempdir().unwrap();
    let output = codexcore(dir.path(), &["--pretty-errors", "parse", "A ⊕ (B"]);
    assert!(!output.status.success());
    let out = stdout_json(&output);
    assert!(out["error"].as_str().unwrap().starts_with("parse_error:"));
    let err = String::from_utf8_lossy(&output.stderr);
    assert!(err.contains("<input>:1:5"), "stderr:\n{err}");
}

#[test]
fn resolve_and_ops() {
    let dir = tempfile::tempdir().unwrap();
    let out = stdout_json(&codexcore(dir.path(), &["resolve", "⊕", "--context", "photon"]));
    assert_eq!(out["key"], "photon:⊕");
    assert_eq!(out["collision"], true);

    let out = stdout_json(&codexcore(dir.path(), &["ops", "--domain", "control"]));
    let keys: Vec<_> = out["domains"]["control"].as_array().unwrap().iter().map(|o| o["key"].clone()).collect();
    assert!(keys.contains(&Value::from("control:⟲")));
}

#[test]
fn influence_show_and_denied_live_update() {
    let dir = tempfile::tempdir().unwrap();
    let output = codexcore(dir.path(), &["influence", r#"{"action": "show"}"#]);
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["meta"]["weights_version"], 1);

    let payload = dir.path().join("update.json");
    fs::write(
        &payload,
        r#"{"action": "update", "dry_run": false, "patch": {"llm_trust_weights": {"claude": 1.0}}}"#,
    )
    .unwrap();
    let arg = format!("@{}", payload.display());
    let output = codexcore(dir.path(), &["influence", &arg]);
    assert!(!output.status.success());
    assert_eq!(stdout_json(&output)["error"]["type"], "PermissionError");
    assert_eq!(fs::read_to_string(dir.path().join("audit.jsonl")).unwrap().lines().count(), 2);
}

#[test]
fn deeply_nested_exec_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let src = format!("{}A", "¬".repeat(30_000));
    let output = codexcore(dir.path(), &["exec", &src, "--test-mode"]);
    assert_eq!(output.status.code(), Some(1), "stderr:\n{}", String::from_utf8_lossy(&output.stderr));
    let out = stdout_json(&output);
    assert_eq!(out["status"], "error");
    assert!(out["error"].as_str().unwrap().starts_with("parse_error: nesting too deep"));
}
