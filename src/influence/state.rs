//! Nested numeric weights, partitioned by section.
//!
//! Every mutation goes through [`InfluenceState::preview`], which never
//! touches `self`: it returns the would-be next state together with the
//! leaves that actually changed and the leaves it refused.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::contract::Section;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WeightNode {
    Leaf(f64),
    Branch(WeightTree),
}

pub type WeightTree = BTreeMap<String, WeightNode>;

/// Changed leaves keyed by section name, in the same nested shape as the
/// state itself.
pub type Applied = BTreeMap<String, WeightTree>;

/// A leaf that was refused, with its path below the section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub section: String,
    pub path: Vec<String>,
    pub reason: String,
    pub value: Value,
}

const REASON_NOT_NUMERIC: &str = "leaf value must be finite numeric";
const REASON_PERSISTED: &str = "persisted leaf value invalid";
const REASON_SECTION_SHAPE: &str = "section payload must be a dict";
const REASON_UNKNOWN_SECTION: &str = "unknown/forbidden section";
const REASON_OVER_LEAF: &str = "structural conflict: mapping over existing leaf";
const REASON_OVER_BRANCH: &str = "structural conflict: number over existing mapping";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Caller input: leaf ops allowed.
    Update,
    /// Document read back from disk: plain numbers only.
    Load,
}

impl Mode {
    fn invalid_reason(self) -> &'static str {
        match self {
            Mode::Update => REASON_NOT_NUMERIC,
            Mode::Load => REASON_PERSISTED,
        }
    }
}

enum Incoming<'a> {
    Branch(&'a Map<String, Value>),
    Set(f64),
    Delta(f64),
    Invalid(String),
}

fn finite(value: &Value) -> Option<f64> {
    value.as_f64().filter(|x| x.is_finite())
}

fn classify(value: &Value, mode: Mode) -> Incoming<'_> {
    match value {
        Value::Number(_) => match finite(value) {
            Some(x) => Incoming::Set(x),
            None => Incoming::Invalid(mode.invalid_reason().into()),
        },
        Value::Object(map) => match (mode, map.get("op")) {
            (Mode::Update, Some(Value::String(op))) => {
                let operand = map.get("value").and_then(finite);
                match (op.as_str(), operand) {
                    ("set", Some(x)) => Incoming::Set(x),
                    ("delta", Some(x)) => Incoming::Delta(x),
                    ("set" | "delta", None) => Incoming::Invalid(REASON_NOT_NUMERIC.into()),
                    (other, _) => Incoming::Invalid(format!("unsupported leaf op: {other}")),
                }
            }
            _ => Incoming::Branch(map),
        },
        _ => Incoming::Invalid(mode.invalid_reason().into()),
    }
}

struct Walker<'r> {
    section: Section,
    mode: Mode,
    path: Vec<String>,
    rejected: &'r mut Vec<Rejection>,
}

impl Walker<'_> {
    fn reject(&mut self, reason: impl Into<String>, value: &Value) {
        self.rejected.push(Rejection {
            section: self.section.name().to_string(),
            path: self.path.clone(),
            reason: reason.into(),
            value: value.clone(),
        });
    }

    fn walk(&mut self, src: &Map<String, Value>, dst: &mut WeightTree, applied: &mut WeightTree) {
        for (key, value) in src {
            self.path.push(key.clone());
            match classify(value, self.mode) {
                Incoming::Branch(inner) => {
                    let node = dst.entry(key.clone()).or_insert_with(|| WeightNode::Branch(WeightTree::new()));
                    match node {
                        WeightNode::Leaf(_) => self.reject(REASON_OVER_LEAF, value),
                        WeightNode::Branch(child) => {
                            let mut child_applied = WeightTree::new();
                            self.walk(inner, child, &mut child_applied);
                            if !child_applied.is_empty() {
                                applied.insert(key.clone(), WeightNode::Branch(child_applied));
                            }
                        }
                    }
                    if matches!(dst.get(key), Some(WeightNode::Branch(b)) if b.is_empty()) {
                        dst.remove(key);
                    }
                }
                Incoming::Set(x) => self.write_leaf(key, false, x, value, dst, applied),
                Incoming::Delta(x) => self.write_leaf(key, true, x, value, dst, applied),
                Incoming::Invalid(reason) => self.reject(reason, value),
            }
            self.path.pop();
        }
    }

    fn write_leaf(
        &mut self,
        key: &str,
        additive: bool,
        x: f64,
        raw: &Value,
        dst: &mut WeightTree,
        applied: &mut WeightTree,
    ) {
        let current = match dst.get(key) {
            Some(WeightNode::Branch(_)) => return self.reject(REASON_OVER_BRANCH, raw),
            Some(WeightNode::Leaf(v)) => Some(*v),
            None => None,
        };
        let target = if additive { current.unwrap_or(0.0) + x } else { x };
        if !target.is_finite() {
            return self.reject(REASON_NOT_NUMERIC, raw);
        }
        let clamped = self.section.clamp(target);
        if current != Some(clamped) {
            dst.insert(key.to_string(), WeightNode::Leaf(clamped));
            applied.insert(key.to_string(), WeightNode::Leaf(clamped));
        }
    }
}

/// Result of [`InfluenceState::preview`].
#[derive(Debug, Clone, PartialEq)]
pub struct Preview {
    pub next: InfluenceState,
    pub applied: Applied,
    pub rejected: Vec<Rejection>,
}

impl Preview {
    pub fn applied_count(&self) -> usize {
        self.applied.values().map(count_leaves).sum()
    }

    pub fn applied_sections(&self) -> Vec<String> {
        self.applied.keys().cloned().collect()
    }

    pub fn changed(&self) -> bool {
        self.applied_count() > 0
    }
}

pub fn count_leaves(tree: &WeightTree) -> usize {
    tree.values()
        .map(|n| match n {
            WeightNode::Leaf(_) => 1,
            WeightNode::Branch(b) => count_leaves(b),
        })
        .sum()
}

fn flatten(tree: &WeightTree, prefix: &mut Vec<String>, out: &mut BTreeMap<Vec<String>, f64>) {
    for (key, node) in tree {
        prefix.push(key.clone());
        match node {
            WeightNode::Leaf(v) => {
                out.insert(prefix.clone(), *v);
            }
            WeightNode::Branch(b) => flatten(b, prefix, out),
        }
        prefix.pop();
    }
}

/// All five sections, each a (possibly empty) tree of clamped leaves.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct InfluenceState {
    sections: BTreeMap<String, WeightTree>,
}

impl Default for InfluenceState {
    fn default() -> Self {
        Self::empty()
    }
}

impl InfluenceState {
    pub fn empty() -> Self {
        let sections = Section::ALL.iter().map(|s| (s.name().to_string(), WeightTree::new())).collect();
        Self { sections }
    }

    pub fn section(&self, section: Section) -> Option<&WeightTree> {
        self.sections.get(section.name())
    }

    /// Leaf at `path` below `section`.
    pub fn get(&self, section: Section, path: &[&str]) -> Option<f64> {
        let (last, parents) = path.split_last()?;
        let mut tree = self.section(section)?;
        for key in parents {
            match tree.get(*key)? {
                WeightNode::Branch(b) => tree = b,
                WeightNode::Leaf(_) => return None,
            }
        }
        match tree.get(*last)? {
            WeightNode::Leaf(v) => Some(*v),
            WeightNode::Branch(_) => None,
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.sections.values().map(count_leaves).sum()
    }

    /// Apply `updates` to a copy of `self`.
    pub fn preview(&self, updates: &Map<String, Value>) -> Preview {
        let mut next = self.clone();
        let mut applied = Applied::new();
        let mut rejected = Vec::new();
        for (name, payload) in updates {
            let Some(section) = Section::from_name(name) else {
                rejected.push(Rejection {
                    section: name.clone(),
                    path: Vec::new(),
                    reason: REASON_UNKNOWN_SECTION.into(),
                    value: payload.clone(),
                });
                continue;
            };
            let Value::Object(map) = payload else {
                rejected.push(Rejection {
                    section: name.clone(),
                    path: Vec::new(),
                    reason: REASON_SECTION_SHAPE.into(),
                    value: payload.clone(),
                });
                continue;
            };
            let bucket = next.sections.entry(name.clone()).or_default();
            let mut section_applied = WeightTree::new();
            Walker { section, mode: Mode::Update, path: Vec::new(), rejected: &mut rejected }.walk(
                map,
                bucket,
                &mut section_applied,
            );
            if !section_applied.is_empty() {
                applied.insert(name.clone(), section_applied);
            }
        }
        Preview { next, applied, rejected }
    }

    /// Rebuild a state from an untrusted JSON object (a persisted document
    /// or an audit snapshot). Unknown sections and invalid leaves are
    /// dropped and reported; values are re-clamped.
    pub fn sanitize(raw: &Map<String, Value>) -> (InfluenceState, Vec<Rejection>) {
        let mut state = InfluenceState::empty();
        let mut rejected = Vec::new();
        for (name, payload) in raw {
            let Some(section) = Section::from_name(name) else {
                rejected.push(Rejection {
                    section: name.clone(),
                    path: Vec::new(),
                    reason: REASON_UNKNOWN_SECTION.into(),
                    value: payload.clone(),
                });
                continue;
            };
            let Value::Object(map) = payload else {
                rejected.push(Rejection {
                    section: name.clone(),
                    path: Vec::new(),
                    reason: REASON_SECTION_SHAPE.into(),
                    value: payload.clone(),
                });
                continue;
            };
            let bucket = state.sections.entry(name.clone()).or_default();
            let mut ignored = WeightTree::new();
            Walker { section, mode: Mode::Load, path: Vec::new(), rejected: &mut rejected }.walk(
                map,
                bucket,
                &mut ignored,
            );
        }
        (state, rejected)
    }

    /// Leaves present in `target` whose value differs from `self`.
    pub fn changes_towards(&self, target: &InfluenceState) -> Applied {
        let mut applied = Applied::new();
        for (name, tree) in &target.sections {
            let mut ours = BTreeMap::new();
            let mut theirs = BTreeMap::new();
            if let Some(current) = self.sections.get(name) {
                flatten(current, &mut Vec::new(), &mut ours);
            }
            flatten(tree, &mut Vec::new(), &mut theirs);
            let mut section_applied = WeightTree::new();
            for (path, value) in theirs {
                if ours.get(&path) != Some(&value) {
                    insert_path(&mut section_applied, &path, value);
                }
            }
            if !section_applied.is_empty() {
                applied.insert(name.clone(), section_applied);
            }
        }
        applied
    }

    /// Number of leaves that differ between the two states, counting
    /// leaves present on only one side.
    pub fn diff_count(&self, other: &InfluenceState) -> usize {
        let mut ours = BTreeMap::new();
        let mut theirs = BTreeMap::new();
        for (name, tree) in &self.sections {
            flatten(tree, &mut vec![name.clone()], &mut ours);
        }
        for (name, tree) in &other.sections {
            flatten(tree, &mut vec![name.clone()], &mut theirs);
        }
        let changed = ours.iter().filter(|(k, v)| theirs.get(*k) != Some(*v)).count();
        let added = theirs.keys().filter(|k| !ours.contains_key(*k)).count();
        changed + added
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// `sha256:<hex>` over the compact, key-sorted JSON form.
    pub fn snapshot_hash(&self) -> String {
        snapshot_hash(&self.to_value())
    }
}

fn insert_path(tree: &mut WeightTree, path: &[String], value: f64) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut cursor = tree;
    for key in parents {
        let node = cursor.entry(key.clone()).or_insert_with(|| WeightNode::Branch(WeightTree::new()));
        cursor = match node {
            WeightNode::Branch(b) => b,
            WeightNode::Leaf(_) => return,
        };
    }
    cursor.insert(last.clone(), WeightNode::Leaf(value));
}

pub fn snapshot_hash(value: &Value) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("sha256:{hex}")
}
