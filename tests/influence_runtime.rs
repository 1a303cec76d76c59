use std::fs;
use std::path::Path;

use codexcore::influence::{
    AuditFilter, DecisionInfluenceRuntime, ErrorType, InfluenceUpdate, RollbackRequest, Section,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn runtime(dir: &Path) -> DecisionInfluenceRuntime {
    DecisionInfluenceRuntime::new(dir.join("weights.json"), dir.join("audit.jsonl"))
}

fn update(updates: Value) -> InfluenceUpdate {
    InfluenceUpdate::new("session-1", "turn-1", "test", updates).with_reason("tuning").with_confidence(0.8)
}

fn audit_lines(dir: &Path) -> Vec<Value> {
    fs::read_to_string(dir.join("audit.jsonl"))
        .unwrap_or_default()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn valid_live_update_clamps_persists_and_audits() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(dir.path());
    let out = rt.apply_update(&update(json!({"llm_trust_weights": {"claude": 9.9, "gpt": -5.0}})), false);

    assert!(out.ok, "{:?}", out.error);
    assert!(out.meta.persisted);
    assert_eq!(rt.weights_version(), 2);

    let doc: Value = serde_json::from_str(&fs::read_to_string(dir.path().join("weights.json")).unwrap()).unwrap();
    assert_eq!(doc["schema_version"], "aion.trading.decision_influence_weights.v1");
    assert_eq!(doc["version"], 2);
    assert_eq!(doc["state"]["llm_trust_weights"], json!({"claude": 2.0, "gpt": 0.0}));

    let lines = audit_lines(dir.path());
    assert_eq!(lines.len(), 1);
    let entry = &lines[0];
    assert_eq!(entry["schema_version"], "aion.trading.decision_influence_audit.v1");
    assert_eq!(entry["applied_count"], 2);
    assert_eq!(entry["rejected_count"], 0);
    assert_eq!(entry["changed"], true);
    assert_eq!((entry["weights_version_before"].clone(), entry["weights_version_after"].clone()), (json!(1), json!(2)));
    assert_eq!(entry["session_id"], "session-1");
    assert_eq!(entry["post_snapshot"]["llm_trust_weights"]["claude"], 2.0);
    assert_eq!(entry["pre_snapshot"]["llm_trust_weights"], json!({}));
}

#[test]
fn forbidden_key_is_denied_and_journaled() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(dir.path());
    let before = rt.state();
    let out = rt.apply_update(&update(json!({"max_risk_per_trade": 0.5})), false);

    assert!(!out.ok);
    let err = out.error.unwrap();
    assert_eq!(err.kind, ErrorType::ValueError);
    assert!(err.message.contains("forbidden decision influence key"));
    assert_eq!(rt.state(), before);
    assert_eq!(rt.weights_version(), 1);
    assert!(!dir.path().join("weights.json").exists());

    let lines = audit_lines(dir.path());
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["status"], "denied");
    assert_eq!(lines[0]["ok"], false);
}

#[test]
fn dry_run_leaves_disk_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(dir.path());
    rt.apply_update(&update(json!({"pair_session_preferences": {"EURUSD": {"london": 1.1}}})), false);
    let bytes = fs::read(dir.path().join("weights.json")).unwrap();
    let state = rt.state();

    let out = rt.apply_update(&update(json!({"pair_session_preferences": {"EURUSD": {"london": 0.3}}})), true);
    assert!(out.ok);
    assert!(out.dry_run);
    assert!(!out.meta.persisted);
    assert_eq!(out.meta.weights_version_after, 2);
    assert_eq!(fs::read(dir.path().join("weights.json")).unwrap(), bytes);
    assert_eq!(rt.state(), state);
    assert_eq!(audit_lines(dir.path()).last().unwrap()["dry_run"], true);
}

#[test]
fn persist_failure_keeps_memory_and_reports() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    fs::write(&blocker, "x").unwrap();
    let rt = DecisionInfluenceRuntime::new(blocker.join("weights.json"), dir.path().join("audit.jsonl"));

    let out = rt.apply_update(&update(json!({"setup_confidence_weights": {"breakout": 1.4}})), false);
    assert!(!out.ok);
    assert_eq!(out.error.as_ref().unwrap().kind, ErrorType::IOError);
    assert!(!out.meta.persisted);
    assert!(out.meta.last_persist_error.is_some());
    assert!(rt.last_persist_error().is_some());
    // the in-memory commit stands
    assert_eq!(rt.state().get(Section::SetupConfidenceWeights, &["breakout"]), Some(1.4));
    assert_eq!(rt.weights_version(), 2);

    let entry = audit_lines(dir.path()).pop().unwrap();
    assert!(entry["persist_error"].is_string());
    assert_eq!(entry["status"], "error");
}

#[test]
fn partial_rejection_applies_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(dir.path());
    let out = rt.apply_update(
        &update(json!({"event_caution_multipliers": {"cpi": 2.0, "fomc": "very", "nfp": {"op": "delta", "value": 0.7}}})),
        false,
    );
    assert!(out.ok);
    assert_eq!(out.rejected.len(), 1);
    assert_eq!(out.rejected[0].path, vec!["fomc".to_string()]);
    let state = rt.state();
    assert_eq!(state.get(Section::EventCautionMultipliers, &["cpi"]), Some(2.0));
    // an absent leaf counts as zero
    assert_eq!(state.get(Section::EventCautionMultipliers, &["nfp"]), Some(0.7));
}

#[test]
fn rollback_replays_history_as_a_new_version() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(dir.path());
    rt.apply_update(&update(json!({"llm_trust_weights": {"claude": 1.2}})), false); // v2
    rt.apply_update(&update(json!({"llm_trust_weights": {"claude": 1.8, "gpt": 0.4}})), false); // v3
    rt.apply_update(&update(json!({"stand_down_sensitivity": {"news": 1.5}})), false); // v4

    let preview = rt.rollback_to_version(2, true);
    assert!(preview.ok);
    assert_eq!(rt.weights_version(), 4);

    let out = rt.rollback(&RollbackRequest::new(2).with_action("revert"), false);
    assert!(out.ok, "{:?}", out.error);
    assert_eq!(rt.weights_version(), 5);
    let state = rt.state();
    assert_eq!(state.get(Section::LlmTrustWeights, &["claude"]), Some(1.2));
    assert_eq!(state.get(Section::LlmTrustWeights, &["gpt"]), None);
    assert_eq!(state.get(Section::StandDownSensitivity, &["news"]), None);

    let entry = out.audit_entry.unwrap();
    assert_eq!(entry.action, "revert");
    assert_eq!(entry.rollback_target_version, Some(2));

    // the rollback itself is replayable
    rt.apply_update(&update(json!({"llm_trust_weights": {"claude": 0.1}})), false); // v6
    assert!(rt.rollback_to_version(5, false).ok);
    assert_eq!(rt.state().get(Section::LlmTrustWeights, &["claude"]), Some(1.2));

    // back to the empty initial state
    assert!(rt.rollback_to_version(1, false).ok);
    assert_eq!(rt.state().leaf_count(), 0);
}

#[test]
fn unreachable_rollback_target_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(dir.path());
    rt.apply_update(&update(json!({"llm_trust_weights": {"claude": 1.2}})), false);
    let state = rt.state();

    let out = rt.rollback_to_version(9, false);
    assert!(!out.ok);
    assert!(out.error.unwrap().message.contains("not reachable"));
    assert_eq!(rt.state(), state);
    assert_eq!(rt.weights_version(), 2);
}

#[test]
fn restart_continues_version_and_seq() {
    let dir = tempfile::tempdir().unwrap();
    {
        let rt = runtime(dir.path());
        rt.apply_update(&update(json!({"llm_trust_weights": {"claude": 1.2}})), false);
    }
    let rt = runtime(dir.path());
    assert_eq!(rt.weights_version(), 2);
    let out = rt.apply_update(&update(json!({"llm_trust_weights": {"claude": 1.3}})), false);
    assert_eq!(out.meta.weights_version_after, 3);
    assert_eq!(out.audit_entry.unwrap().seq, 2);
}

#[test]
fn review_reads_back_the_journal() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(dir.path());
    rt.apply_update(&update(json!({"llm_trust_weights": {"claude": 1.2}})), false);
    rt.apply_update(&update(json!({"llm_trust_weights": {"claude": 1.4}})), true);
    rt.apply_update(&update(json!({"position_sizing": 1.0})), false);

    let page = rt.review_audit_log(&AuditFilter { ok: Some(true), ..AuditFilter::default() });
    assert_eq!(page["ok"], true);
    assert_eq!(page["summary"]["total"], 3);
    assert_eq!(page["summary"]["matched"], 2);
    assert_eq!(page["summary"]["latest_version"], 2);
    assert_eq!(page["summary"]["source"], "file");

    let page = rt.review_audit_log(&AuditFilter { changed: Some(true), dry_run: Some(false), ..AuditFilter::default() });
    assert_eq!(page["summary"]["matched"], 1);
}

#[test]
fn show_state_meta() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(dir.path());
    let view = rt.show_state();
    assert!(view.ok);
    assert_eq!(view.meta.weights_version, 1);
    assert_eq!(view.meta.last_persist_error, None);
    let value = serde_json::to_value(&view).unwrap();
    assert_eq!(value["state"]["llm_trust_weights"], json!({}));
    assert!(value["meta"]["audit_jsonl_path"].as_str().unwrap().ends_with("audit.jsonl"));
}
