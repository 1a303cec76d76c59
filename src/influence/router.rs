//! Untyped entry point: `{action, ...}` payloads in, result objects out.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::debug;

use super::audit::{AuditFilter, AuditIdentity};
use super::contract::{GovernanceError, InfluenceUpdate, WEIGHTS_SCHEMA};
use super::runtime::{coerce_bool, DecisionInfluenceRuntime, RollbackRequest};

/// Env vars that authorize live (non-dry-run) updates and rollbacks.
pub const LIVE_APPLY_ENV: [&str; 2] = ["AION_DECISION_INFLUENCE_ALLOW_LIVE_APPLY", "DECISION_INFLUENCE_ALLOW_LIVE_APPLY"];

const ROUTER_SOURCE: &str = "router";

fn is_truthy(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// True when either env var is set to a truthy value.
pub fn live_apply_allowed_by_env() -> bool {
    LIVE_APPLY_ENV.iter().any(|name| std::env::var(name).map(|v| is_truthy(&v)).unwrap_or(false))
}

#[derive(Debug, Clone)]
pub struct InfluenceRouter {
    runtime: Arc<DecisionInfluenceRuntime>,
    live_apply: Option<bool>,
}

impl InfluenceRouter {
    pub fn new(runtime: Arc<DecisionInfluenceRuntime>) -> Self {
        Self { runtime, live_apply: None }
    }

    /// Decide live authorization here instead of from the environment.
    pub fn with_live_apply(mut self, allowed: bool) -> Self {
        self.live_apply = Some(allowed);
        self
    }

    pub fn runtime(&self) -> &Arc<DecisionInfluenceRuntime> {
        &self.runtime
    }

    fn live_allowed(&self) -> bool {
        self.live_apply.unwrap_or_else(live_apply_allowed_by_env)
    }

    pub fn handle(&self, payload: &Value) -> Value {
        self.run(payload)
    }

    pub fn execute(&self, payload: &Value) -> Value {
        self.run(payload)
    }

    pub fn run(&self, payload: &Value) -> Value {
        let Some(map) = payload.as_object() else {
            return self.invalid(None, GovernanceError::value("payload must be an object"));
        };
        let action = map.get("action").and_then(Value::as_str).map(|a| a.trim().to_ascii_lowercase());
        debug!(target: "codexcore::influence", action = ?action, "router payload");
        match action.as_deref() {
            Some("show") => self.show(map),
            Some("audit_review") => self.audit_review(map),
            Some("update") => self.update(map),
            Some(a @ ("revert" | "rollback")) => self.rollback(a, map),
            Some(other) => self.invalid(Some(other), GovernanceError::value(format!("unknown action: {other}"))),
            None => self.invalid(None, GovernanceError::value("missing action")),
        }
    }

    fn dry_run(map: &Map<String, Value>) -> bool {
        map.get("dry_run").and_then(coerce_bool).unwrap_or(true)
    }

    fn permission_denied(&self, action: &str, map: &Map<String, Value>) -> Value {
        let err = GovernanceError::permission(format!(
            "live decision influence {action} requires {}=1",
            LIVE_APPLY_ENV[0]
        ));
        self.runtime.deny(action, false, AuditIdentity::from_payload(map, ROUTER_SOURCE), err).to_value()
    }

    fn show(&self, map: &Map<String, Value>) -> Value {
        let view = self.runtime.show_state();
        let entry = self.runtime.record_show(AuditIdentity::from_payload(map, ROUTER_SOURCE));
        json!({
            "ok": true,
            "action": "show",
            "dry_run": true,
            "state": view.state,
            "applied": {},
            "rejected": [],
            "audit_entry": entry,
            "error": null,
            "meta": view.meta,
        })
    }

    fn audit_review(&self, map: &Map<String, Value>) -> Value {
        let raw = match map.get("filters") {
            Some(f @ Value::Object(_)) => f.clone(),
            _ => {
                let mut top = map.clone();
                top.remove("action");
                Value::Object(top)
            }
        };
        let filter = match serde_json::from_value::<AuditFilter>(raw) {
            Ok(f) => f,
            Err(e) => return self.invalid(Some("audit_review"), GovernanceError::value(format!("invalid filters: {e}"))),
        };
        let mut page = self.runtime.review_audit_log(&filter);
        if let Some(obj) = page.as_object_mut() {
            obj.insert("action".into(), json!("audit_review"));
        }
        page
    }

    fn update(&self, map: &Map<String, Value>) -> Value {
        let dry_run = Self::dry_run(map);
        if !dry_run && !self.live_allowed() {
            return self.permission_denied("update", map);
        }
        let update = InfluenceUpdate::from_payload(map, ROUTER_SOURCE);
        self.runtime.apply_update(&update, dry_run).to_value()
    }

    fn rollback(&self, action: &str, map: &Map<String, Value>) -> Value {
        let dry_run = Self::dry_run(map);
        if !dry_run && !self.live_allowed() {
            return self.permission_denied(action, map);
        }
        let identity = AuditIdentity::from_payload(map, ROUTER_SOURCE);
        let Some(target) = target_version(map) else {
            let err = GovernanceError::value("rollback requires target.version");
            return self.runtime.deny(action, dry_run, identity, err).to_value();
        };
        let req = RollbackRequest::new(target).with_action(action).with_identity(identity);
        self.runtime.rollback(&req, dry_run).to_value()
    }

    /// Malformed request that never reached the runtime; nothing is audited.
    fn invalid(&self, action: Option<&str>, err: GovernanceError) -> Value {
        let view = self.runtime.show_state();
        json!({
            "ok": false,
            "action": action,
            "dry_run": true,
            "applied": {},
            "rejected": [],
            "audit_entry": null,
            "error": err,
            "meta": {
                "schema_version": WEIGHTS_SCHEMA,
                "weights_version": view.meta.weights_version,
                "weights_path": view.meta.weights_path,
                "audit_jsonl_path": view.meta.audit_jsonl_path,
                "persisted": false,
            },
        })
    }
}

/// `target: {version}`, `target: N`, or `target_version: N`.
fn target_version(map: &Map<String, Value>) -> Option<u64> {
    let as_version = |v: &Value| match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    match map.get("target") {
        Some(Value::Object(t)) => t.get("version").and_then(as_version),
        Some(other) => as_version(other),
        None => map.get("target_version").and_then(as_version),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        for v in ["1", "true", "YES", " on "] {
            assert!(is_truthy(v), "{v}");
        }
        for v in ["", "0", "off", "enabled"] {
            assert!(!is_truthy(v), "{v}");
        }
    }

    #[test]
    fn target_forms() {
        let m = |v: Value| v.as_object().unwrap().clone();
        assert_eq!(target_version(&m(json!({"target": {"version": 3}}))), Some(3));
        assert_eq!(target_version(&m(json!({"target": 4}))), Some(4));
        assert_eq!(target_version(&m(json!({"target_version": "5"}))), Some(5));
        assert_eq!(target_version(&m(json!({"target": {"v": 1}}))), None);
    }

    #[test]
    fn non_object_payload() {
        let dir = tempfile::tempdir().unwrap();
        let rt = Arc::new(DecisionInfluenceRuntime::new(dir.path().join("w.json"), dir.path().join("a.jsonl")));
        let router = InfluenceRouter::new(rt.clone());
        let out = router.run(&json!([1, 2]));
        assert_eq!(out["ok"], false);
        assert_eq!(out["error"]["type"], "ValueError");
        let out = router.handle(&json!({"action": "explode"}));
        assert_eq!(out["error"]["message"], "unknown action: explode");
        assert!(rt.audit_mirror().is_empty());
    }
}
