//! Append-only JSONL audit journal with an in-memory mirror.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

use super::contract::{ErrorType, GovernanceError, InfluenceUpdate, AUDIT_SCHEMA};
use super::state::{Applied, Rejection};
use crate::io::append_line;

/// Entries kept in memory; the oldest are dropped first.
const MIRROR_CAP: usize = 4096;
const DEFAULT_REVIEW_LIMIT: usize = 50;
const MAX_REVIEW_LIMIT: usize = 1000;

pub(crate) fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Ok,
    Denied,
    Error,
}

impl AuditStatus {
    /// Contract and authorization failures are denials; anything else is
    /// an error.
    pub fn for_error(err: &GovernanceError) -> Self {
        match err.kind {
            ErrorType::ValueError | ErrorType::PermissionError => AuditStatus::Denied,
            ErrorType::IOError | ErrorType::RuntimeError => AuditStatus::Error,
        }
    }
}

/// Who asked for a governance action.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AuditIdentity {
    pub session_id: Option<String>,
    pub turn_id: Option<String>,
    pub source: Option<String>,
    pub reason: Option<String>,
    pub confidence: Option<f64>,
    pub metadata: Value,
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

impl AuditIdentity {
    pub fn from_update(update: &InfluenceUpdate) -> Self {
        Self {
            session_id: non_empty(&update.session_id),
            turn_id: non_empty(&update.turn_id),
            source: non_empty(&update.source),
            reason: non_empty(&update.reason),
            confidence: update.confidence.is_finite().then_some(update.confidence),
            metadata: if update.metadata.is_object() { update.metadata.clone() } else { json!({}) },
        }
    }

    /// Best-effort identity from an untyped payload.
    pub fn from_payload(payload: &Map<String, Value>, default_source: &str) -> Self {
        let text = |key: &str| match payload.get(key) {
            Some(Value::String(s)) => non_empty(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        Self {
            session_id: text("session_id"),
            turn_id: text("turn_id"),
            source: text("source").or_else(|| Some(default_source.to_string())),
            reason: text("reason"),
            confidence: payload.get("confidence").and_then(Value::as_f64),
            metadata: payload.get("metadata").filter(|m| m.is_object()).cloned().unwrap_or_else(|| json!({})),
        }
    }
}

/// One journal line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub schema_version: String,
    pub audit_id: String,
    pub seq: u64,
    pub ts_utc: String,
    pub action: String,
    pub status: AuditStatus,
    pub ok: bool,
    pub dry_run: bool,
    #[serde(flatten)]
    pub identity: AuditIdentity,
    pub applied_sections: Vec<String>,
    pub applied_count: usize,
    pub rejected_count: usize,
    pub rejected: Vec<Rejection>,
    pub applied: Applied,
    pub weights_version_before: u64,
    pub weights_version_after: u64,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_snapshot: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_snapshot: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_target_version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<GovernanceError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_write_error: Option<String>,
}

impl AuditEntry {
    /// A successful, unchanged entry at `version`; callers fill in the rest.
    pub fn begin(action: &str, dry_run: bool, version: u64, identity: AuditIdentity) -> Self {
        Self {
            schema_version: AUDIT_SCHEMA.to_string(),
            audit_id: uuid::Uuid::new_v4().to_string(),
            seq: 0,
            ts_utc: now_iso(),
            action: action.to_string(),
            status: AuditStatus::Ok,
            ok: true,
            dry_run,
            identity,
            applied_sections: Vec::new(),
            applied_count: 0,
            rejected_count: 0,
            rejected: Vec::new(),
            applied: Applied::new(),
            weights_version_before: version,
            weights_version_after: version,
            changed: false,
            pre_snapshot: None,
            post_snapshot: None,
            rollback_target_version: None,
            error: None,
            runtime_error: None,
            persist_error: None,
            audit_write_error: None,
        }
    }

    pub fn fail(&mut self, err: GovernanceError) {
        self.ok = false;
        self.status = AuditStatus::for_error(&err);
        self.error = Some(err);
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Entries read back from disk, in file order.
#[derive(Debug, Clone, Default)]
pub struct JournalRead {
    pub entries: Vec<Value>,
    pub malformed: usize,
}

#[derive(Debug)]
pub struct AuditJournal {
    path: PathBuf,
    mirror: VecDeque<Value>,
    next_seq: u64,
}

impl AuditJournal {
    /// Open the journal at `path`; sequence numbers continue after the
    /// highest one already on disk.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last_seq = read_journal(&path)
            .map(|r| r.entries.iter().filter_map(|e| e.get("seq").and_then(Value::as_u64)).max().unwrap_or(0))
            .unwrap_or(0);
        Self { path, mirror: VecDeque::new(), next_seq: last_seq + 1 }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mirror(&self) -> impl Iterator<Item = &Value> {
        self.mirror.iter()
    }

    /// Stamp `entry` with the next sequence number and append it. A failed
    /// write is recorded on the entry, never returned.
    pub fn append(&mut self, entry: &mut AuditEntry) {
        entry.seq = self.next_seq;
        self.next_seq += 1;
        let written = serde_json::to_string(&entry.to_value())
            .map_err(io::Error::from)
            .and_then(|line| append_line(&self.path, &line));
        if let Err(e) = written {
            warn!(target: "codexcore::influence", path = %self.path.display(), error = %e, "audit append failed");
            entry.audit_write_error = Some(e.to_string());
        }
        if self.mirror.len() == MIRROR_CAP {
            self.mirror.pop_front();
        }
        self.mirror.push_back(entry.to_value());
    }

    pub fn read(&self) -> io::Result<JournalRead> {
        read_journal(&self.path)
    }

    /// Filtered, newest-first page of the journal. Falls back to the
    /// in-memory mirror when the file cannot be read.
    pub fn review(&self, filter: &AuditFilter) -> Value {
        let (read, source) = match self.read() {
            Ok(read) => (read, "file"),
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(target: "codexcore::influence", error = %e, "audit journal unreadable, reviewing memory");
                }
                (JournalRead { entries: self.mirror.iter().cloned().collect(), malformed: 0 }, "memory")
            }
        };
        review_entries(read, filter, source)
    }
}

fn read_journal(path: &Path) -> io::Result<JournalRead> {
    let text = fs::read_to_string(path)?;
    let mut out = JournalRead::default();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<Value>(line) {
            Ok(v @ Value::Object(_)) => out.entries.push(v),
            _ => out.malformed += 1,
        }
    }
    Ok(out)
}

/// Review query. Unset fields do not filter; the version bounds apply to
/// `weights_version_after` and are inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AuditFilter {
    pub action: Option<String>,
    pub dry_run: Option<bool>,
    pub ok: Option<bool>,
    pub changed: Option<bool>,
    pub version_from: Option<u64>,
    pub version_to: Option<u64>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for AuditFilter {
    fn default() -> Self {
        Self {
            action: None,
            dry_run: None,
            ok: None,
            changed: None,
            version_from: None,
            version_to: None,
            limit: DEFAULT_REVIEW_LIMIT,
            offset: 0,
        }
    }
}

impl AuditFilter {
    pub fn matches(&self, entry: &Value) -> bool {
        let flag = |want: Option<bool>, key: &str| want.map_or(true, |w| entry.get(key).and_then(Value::as_bool) == Some(w));
        if let Some(action) = &self.action {
            if entry.get("action").and_then(Value::as_str) != Some(action.as_str()) {
                return false;
            }
        }
        if !(flag(self.dry_run, "dry_run") && flag(self.ok, "ok") && flag(self.changed, "changed")) {
            return false;
        }
        if self.version_from.is_some() || self.version_to.is_some() {
            let Some(after) = entry.get("weights_version_after").and_then(Value::as_u64) else {
                return false;
            };
            if self.version_from.is_some_and(|lo| after < lo) || self.version_to.is_some_and(|hi| after > hi) {
                return false;
            }
        }
        true
    }
}

fn review_entries(read: JournalRead, filter: &AuditFilter, source: &str) -> Value {
    let total = read.entries.len();
    let latest_version =
        read.entries.iter().filter_map(|e| e.get("weights_version_after").and_then(Value::as_u64)).max();
    let matched: Vec<Value> = read.entries.into_iter().rev().filter(|e| filter.matches(e)).collect();

    let mut by_action: BTreeMap<String, usize> = BTreeMap::new();
    for e in &matched {
        let action = e.get("action").and_then(Value::as_str).unwrap_or("unknown");
        *by_action.entry(action.to_string()).or_default() += 1;
    }

    let limit = filter.limit.min(MAX_REVIEW_LIMIT);
    let rows: Vec<Value> = matched.iter().skip(filter.offset).take(limit).cloned().collect();
    json!({
        "ok": true,
        "rows": rows,
        "summary": {
            "total": total,
            "matched": matched.len(),
            "returned": rows.len(),
            "offset": filter.offset,
            "limit": limit,
            "by_action": by_action,
            "malformed_lines": read.malformed,
            "latest_version": latest_version,
            "source": source,
        }
    })
}
