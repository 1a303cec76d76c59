//! The governed runtime: one validated mutation path over the weights,
//! persisted atomically and journaled.
//!
//! All mutations, and the audit rows they produce, happen under a single
//! write lock, so a reader never observes a version whose audit row is not
//! yet appended.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::audit::{now_iso, AuditEntry, AuditFilter, AuditIdentity, AuditJournal};
use super::contract::{ErrorType, GovernanceError, InfluenceUpdate, WEIGHTS_SCHEMA};
use super::state::{Applied, InfluenceState, Rejection};
use crate::config::InfluenceConfig;
use crate::io::atomic_write;

/// `meta` block of every mutation result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfluenceMeta {
    pub schema_version: String,
    pub dry_run: bool,
    pub changed: bool,
    pub persisted: bool,
    pub weights_version_before: u64,
    pub weights_version_after: u64,
    pub updated_at: Option<String>,
    pub weights_path: String,
    pub audit_jsonl_path: String,
    pub last_persist_error: Option<String>,
    pub state_hash: String,
}

/// Outcome of a governance action. Failures are reported here, never
/// returned as `Err` or raised.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfluenceResult {
    pub ok: bool,
    pub action: String,
    pub dry_run: bool,
    pub applied: Applied,
    pub rejected: Vec<Rejection>,
    pub audit_entry: Option<AuditEntry>,
    pub error: Option<GovernanceError>,
    pub meta: InfluenceMeta,
}

impl InfluenceResult {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// `meta` block of [`DecisionInfluenceRuntime::show_state`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateMeta {
    pub schema_version: String,
    pub weights_version: u64,
    pub updated_at: Option<String>,
    pub weights_path: String,
    pub audit_jsonl_path: String,
    pub last_persist_error: Option<String>,
    pub state_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateView {
    pub ok: bool,
    pub state: InfluenceState,
    pub meta: StateMeta,
}

/// Request to restore the state as of `target_version`.
#[derive(Debug, Clone, PartialEq)]
pub struct RollbackRequest {
    pub target_version: u64,
    /// Recorded as the audit action: `rollback` or `revert`.
    pub action: String,
    pub identity: AuditIdentity,
}

impl RollbackRequest {
    pub fn new(target_version: u64) -> Self {
        Self {
            target_version,
            action: "rollback".to_string(),
            identity: AuditIdentity { source: Some("rollback".into()), metadata: json!({}), ..Default::default() },
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    pub fn with_identity(mut self, identity: AuditIdentity) -> Self {
        self.identity = identity;
        self
    }
}

#[derive(Debug)]
struct Inner {
    state: InfluenceState,
    version: u64,
    updated_at: Option<String>,
    last_persist_error: Option<String>,
    journal: AuditJournal,
}

#[derive(Debug)]
pub struct DecisionInfluenceRuntime {
    weights_path: PathBuf,
    audit_path: PathBuf,
    inner: RwLock<Inner>,
}

struct LoadedDocument {
    state: InfluenceState,
    version: u64,
    updated_at: Option<String>,
    dropped: Vec<Rejection>,
}

/// `Ok(None)` when there is no document yet.
fn read_document(path: &Path) -> Result<Option<LoadedDocument>, String> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(format!("load_failed: {e}")),
    };
    let raw: Value = serde_json::from_str(&text).map_err(|e| format!("load_failed: {e}"))?;
    let Some(state) = raw.get("state").and_then(Value::as_object) else {
        return Err("weights file missing/invalid 'state' object".to_string());
    };
    let (state, dropped) = InfluenceState::sanitize(state);
    Ok(Some(LoadedDocument {
        state,
        version: raw.get("version").and_then(Value::as_u64).filter(|v| *v >= 1).unwrap_or(1),
        updated_at: raw.get("updated_at").and_then(Value::as_str).map(str::to_string),
        dropped,
    }))
}

/// Rebuild the state at `target` from journal entries in file order.
/// Version 1 is the empty state; `None` when no committed entry reached
/// `target`.
fn replay(entries: &[Value], target: u64) -> Option<InfluenceState> {
    let mut state = InfluenceState::empty();
    let mut reachable = target == 1;
    for entry in entries {
        let committed = entry.get("ok") == Some(&Value::Bool(true))
            && entry.get("dry_run") == Some(&Value::Bool(false))
            && entry.get("changed") == Some(&Value::Bool(true));
        if !committed {
            continue;
        }
        let Some(after) = entry.get("weights_version_after").and_then(Value::as_u64) else {
            continue;
        };
        if after > target {
            continue;
        }
        match entry.get("action").and_then(Value::as_str) {
            Some("update") => {
                let Some(applied) = entry.get("applied").and_then(Value::as_object) else {
                    continue;
                };
                state = state.preview(applied).next;
            }
            Some("rollback" | "revert") => {
                let Some(post) = entry.get("post_snapshot").and_then(Value::as_object) else {
                    continue;
                };
                state = InfluenceState::sanitize(post).0;
            }
            _ => continue,
        }
        if after == target {
            reachable = true;
        }
    }
    reachable.then_some(state)
}

impl DecisionInfluenceRuntime {
    /// Runtime over the given files, loading the weights document if present.
    pub fn new(weights_path: impl Into<PathBuf>, audit_path: impl Into<PathBuf>) -> Self {
        Self::with_options(weights_path, audit_path, true)
    }

    pub fn with_options(weights_path: impl Into<PathBuf>, audit_path: impl Into<PathBuf>, autoload: bool) -> Self {
        let weights_path = weights_path.into();
        let audit_path = audit_path.into();
        let mut inner = Inner {
            state: InfluenceState::empty(),
            version: 1,
            updated_at: None,
            last_persist_error: None,
            journal: AuditJournal::open(&audit_path),
        };
        if autoload {
            match read_document(&weights_path) {
                Ok(Some(doc)) => {
                    if !doc.dropped.is_empty() {
                        warn!(
                            target: "codexcore::influence",
                            dropped = doc.dropped.len(),
                            "invalid entries dropped from persisted weights"
                        );
                    }
                    inner.state = doc.state;
                    inner.version = doc.version;
                    inner.updated_at = doc.updated_at;
                }
                Ok(None) => debug!(target: "codexcore::influence", path = %weights_path.display(), "no weights file yet"),
                Err(e) => {
                    warn!(target: "codexcore::influence", path = %weights_path.display(), error = %e, "weights load failed");
                    inner.last_persist_error = Some(e);
                }
            }
        }
        Self { weights_path, audit_path, inner: RwLock::new(inner) }
    }

    pub fn from_config(config: &InfluenceConfig) -> Self {
        Self::with_options(&config.weights_path, &config.audit_path, config.autoload)
    }

    pub fn weights_path(&self) -> &Path {
        &self.weights_path
    }

    pub fn audit_path(&self) -> &Path {
        &self.audit_path
    }

    /// Copy of the current state.
    pub fn state(&self) -> InfluenceState {
        self.inner.read().state.clone()
    }

    pub fn weights_version(&self) -> u64 {
        self.inner.read().version
    }

    pub fn last_persist_error(&self) -> Option<String> {
        self.inner.read().last_persist_error.clone()
    }

    /// Entries appended by this process, oldest first.
    pub fn audit_mirror(&self) -> Vec<Value> {
        self.inner.read().journal.mirror().cloned().collect()
    }

    pub fn show_state(&self) -> StateView {
        let inner = self.inner.read();
        StateView {
            ok: true,
            state: inner.state.clone(),
            meta: StateMeta {
                schema_version: WEIGHTS_SCHEMA.to_string(),
                weights_version: inner.version,
                updated_at: inner.updated_at.clone(),
                weights_path: self.weights_path.display().to_string(),
                audit_jsonl_path: self.audit_path.display().to_string(),
                last_persist_error: inner.last_persist_error.clone(),
                state_hash: inner.state.snapshot_hash(),
            },
        }
    }

    /// Validate, clamp and (unless `dry_run`) commit `update`.
    pub fn apply_update(&self, update: &InfluenceUpdate, dry_run: bool) -> InfluenceResult {
        let mut inner = self.inner.write();
        let entry = AuditEntry::begin("update", dry_run, inner.version, AuditIdentity::from_update(update));
        if let Err(err) = update.validate() {
            return self.fail_locked(&mut inner, entry, err);
        }
        let Some(sections) = update.sections() else {
            return self.fail_locked(&mut inner, entry, GovernanceError::value("updates must be a mapping"));
        };
        let preview = inner.state.preview(sections);
        let count = preview.applied_count();
        self.commit_locked(&mut inner, entry, preview.next, preview.applied, preview.rejected, count)
    }

    /// Apply an untyped payload (`patch` or `updates` plus identity
    /// fields). `dry_run` defaults to true when absent.
    pub fn apply_raw(&self, payload: &Map<String, Value>) -> InfluenceResult {
        let dry_run = payload.get("dry_run").and_then(coerce_bool).unwrap_or(true);
        self.apply_update(&InfluenceUpdate::from_payload(payload, "runtime"), dry_run)
    }

    pub fn rollback_to_version(&self, target_version: u64, dry_run: bool) -> InfluenceResult {
        self.rollback(&RollbackRequest::new(target_version), dry_run)
    }

    /// Restore the state as of `req.target_version` by replaying the
    /// journal, and commit it as a new version when it differs.
    pub fn rollback(&self, req: &RollbackRequest, dry_run: bool) -> InfluenceResult {
        let mut inner = self.inner.write();
        let target = req.target_version;
        let mut entry = AuditEntry::begin(&req.action, dry_run, inner.version, req.identity.clone());
        entry.rollback_target_version = Some(target);
        if target == 0 {
            return self.fail_locked(&mut inner, entry, GovernanceError::value("rollback target version must be >= 1"));
        }
        let entries = match inner.journal.read() {
            Ok(read) => read.entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                let message = format!("audit journal unreadable: {e}");
                entry.runtime_error = Some(message.clone());
                return self.fail_locked(&mut inner, entry, GovernanceError::new(ErrorType::RuntimeError, message));
            }
        };
        let Some(target_state) = replay(&entries, target) else {
            return self.fail_locked(
                &mut inner,
                entry,
                GovernanceError::value(format!("rollback target version {target} is not reachable from audit history")),
            );
        };
        let applied = inner.state.changes_towards(&target_state);
        let count = inner.state.diff_count(&target_state);
        self.commit_locked(&mut inner, entry, target_state, applied, Vec::new(), count)
    }

    pub fn review_audit_log(&self, filter: &AuditFilter) -> Value {
        self.inner.read().journal.review(filter)
    }

    /// Append a `show` row and return it.
    pub fn record_show(&self, identity: AuditIdentity) -> AuditEntry {
        let mut inner = self.inner.write();
        let mut entry = AuditEntry::begin("show", true, inner.version, identity);
        inner.journal.append(&mut entry);
        entry
    }

    /// Refuse `action` without touching state; the refusal is journaled.
    pub fn deny(&self, action: &str, dry_run: bool, identity: AuditIdentity, err: GovernanceError) -> InfluenceResult {
        let mut inner = self.inner.write();
        let entry = AuditEntry::begin(action, dry_run, inner.version, identity);
        self.fail_locked(&mut inner, entry, err)
    }

    fn meta(&self, inner: &Inner, entry: &AuditEntry, persisted: bool) -> InfluenceMeta {
        InfluenceMeta {
            schema_version: WEIGHTS_SCHEMA.to_string(),
            dry_run: entry.dry_run,
            changed: entry.changed,
            persisted,
            weights_version_before: entry.weights_version_before,
            weights_version_after: entry.weights_version_after,
            updated_at: inner.updated_at.clone(),
            weights_path: self.weights_path.display().to_string(),
            audit_jsonl_path: self.audit_path.display().to_string(),
            last_persist_error: inner.last_persist_error.clone(),
            state_hash: inner.state.snapshot_hash(),
        }
    }

    fn result(&self, inner: &Inner, entry: AuditEntry, persisted: bool) -> InfluenceResult {
        InfluenceResult {
            ok: entry.ok,
            action: entry.action.clone(),
            dry_run: entry.dry_run,
            applied: entry.applied.clone(),
            rejected: entry.rejected.clone(),
            error: entry.error.clone(),
            meta: self.meta(inner, &entry, persisted),
            audit_entry: Some(entry),
        }
    }

    fn fail_locked(&self, inner: &mut Inner, mut entry: AuditEntry, err: GovernanceError) -> InfluenceResult {
        info!(target: "codexcore::influence", action = %entry.action, error = %err, "governance action refused");
        entry.fail(err);
        inner.journal.append(&mut entry);
        self.result(inner, entry, false)
    }

    fn commit_locked(
        &self,
        inner: &mut Inner,
        mut entry: AuditEntry,
        next: InfluenceState,
        applied: Applied,
        rejected: Vec<Rejection>,
        changed_count: usize,
    ) -> InfluenceResult {
        let changed = changed_count > 0;
        entry.applied_sections = applied.keys().cloned().collect();
        entry.applied_count = changed_count;
        entry.rejected_count = rejected.len();
        entry.rejected = rejected;
        entry.applied = applied;
        entry.changed = changed;
        entry.pre_snapshot = Some(inner.state.to_value());
        entry.post_snapshot = Some(next.to_value());

        if entry.dry_run {
            inner.journal.append(&mut entry);
            debug!(target: "codexcore::influence", action = %entry.action, changed, "dry run");
            return self.result(inner, entry, false);
        }

        inner.state = next;
        if changed {
            inner.version += 1;
            inner.updated_at = Some(now_iso());
        }
        entry.weights_version_after = inner.version;

        match self.persist(inner) {
            Ok(()) => {
                inner.last_persist_error = None;
                inner.journal.append(&mut entry);
                info!(
                    target: "codexcore::influence",
                    action = %entry.action,
                    version = inner.version,
                    applied = entry.applied_count,
                    rejected = entry.rejected_count,
                    "influence weights committed"
                );
                self.result(inner, entry, true)
            }
            Err(e) => {
                let message = e.to_string();
                warn!(target: "codexcore::influence", path = %self.weights_path.display(), error = %message, "persist failed");
                inner.last_persist_error = Some(message.clone());
                entry.persist_error = Some(message.clone());
                entry.fail(GovernanceError::new(ErrorType::IOError, message));
                inner.journal.append(&mut entry);
                self.result(inner, entry, false)
            }
        }
    }

    fn persist(&self, inner: &Inner) -> io::Result<()> {
        let doc = json!({
            "schema_version": WEIGHTS_SCHEMA,
            "version": inner.version,
            "updated_at": inner.updated_at,
            "state": inner.state,
        });
        let mut text = serde_json::to_string_pretty(&doc).map_err(io::Error::from)?;
        text.push('\n');
        atomic_write(&self.weights_path, text)
    }
}

/// Lenient boolean: JSON booleans, 0/1, and the usual strings.
pub fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::influence::contract::Section;
    use pretty_assertions::assert_eq;

    fn runtime(dir: &Path) -> DecisionInfluenceRuntime {
        DecisionInfluenceRuntime::new(dir.join("weights.json"), dir.join("audit.jsonl"))
    }

    fn update(updates: Value) -> InfluenceUpdate {
        InfluenceUpdate::new("s1", "t1", "unit", updates).with_confidence(0.9)
    }

    #[test]
    fn replay_reaches_only_committed_versions() {
        let entries = vec![
            json!({"ok": true, "dry_run": false, "changed": true, "action": "update",
                   "weights_version_after": 2, "applied": {"llm_trust_weights": {"a": 1.0}}}),
            json!({"ok": true, "dry_run": true, "changed": true, "action": "update",
                   "weights_version_after": 2, "applied": {"llm_trust_weights": {"a": 0.2}}}),
            json!({"ok": true, "dry_run": false, "changed": true, "action": "update",
                   "weights_version_after": 3, "applied": {"llm_trust_weights": {"b": 1.5}}}),
        ];
        let at2 = replay(&entries, 2).unwrap();
        assert_eq!(at2.get(Section::LlmTrustWeights, &["a"]), Some(1.0));
        assert_eq!(at2.get(Section::LlmTrustWeights, &["b"]), None);
        assert_eq!(replay(&entries, 1), Some(InfluenceState::empty()));
        assert_eq!(replay(&entries, 4), None);
    }

    #[test]
    fn dry_run_leaves_state_alone() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());
        let out = rt.apply_update(&update(json!({"llm_trust_weights": {"claude": 1.2}})), true);
        assert!(out.ok);
        assert!(!out.meta.persisted);
        assert_eq!(out.meta.weights_version_after, 1);
        assert_eq!(out.audit_entry.as_ref().unwrap().applied_count, 1);
        assert_eq!(rt.weights_version(), 1);
        assert_eq!(rt.state(), InfluenceState::empty());
        assert!(!dir.path().join("weights.json").exists());
    }

    #[test]
    fn live_apply_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());
        let out = rt.apply_update(&update(json!({"event_caution_multipliers": {"nfp": 4.0}})), false);
        assert!(out.ok, "{:?}", out.error);
        assert!(out.meta.persisted);
        assert_eq!((out.meta.weights_version_before, out.meta.weights_version_after), (1, 2));

        let reloaded = runtime(dir.path());
        assert_eq!(reloaded.weights_version(), 2);
        assert_eq!(reloaded.state().get(Section::EventCautionMultipliers, &["nfp"]), Some(3.0));
        assert_eq!(reloaded.show_state().meta.state_hash, rt.show_state().meta.state_hash);
    }

    #[test]
    fn unchanged_live_apply_keeps_version() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());
        let u = update(json!({"llm_trust_weights": {"claude": 1.0}}));
        rt.apply_update(&u, false);
        let again = rt.apply_update(&u, false);
        assert!(again.ok);
        assert!(!again.meta.changed);
        assert_eq!(rt.weights_version(), 2);
    }

    #[test]
    fn corrupt_document_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("weights.json"), "{not json").unwrap();
        let rt = runtime(dir.path());
        assert!(rt.last_persist_error().unwrap().starts_with("load_failed:"));
        assert_eq!(rt.weights_version(), 1);

        fs::write(dir.path().join("weights.json"), r#"{"version": 4, "state": []}"#).unwrap();
        let rt = runtime(dir.path());
        assert_eq!(rt.last_persist_error().as_deref(), Some("weights file missing/invalid 'state' object"));
    }

    #[test]
    fn coerce_bool_forms() {
        assert_eq!(coerce_bool(&json!("Yes")), Some(true));
        assert_eq!(coerce_bool(&json!(0)), Some(false));
        assert_eq!(coerce_bool(&json!("maybe")), None);
    }
}
