//! Operator registry: canonical metadata, alias table, collision table and
//! the resolver that turns a raw glyph into a `domain:symbol` key.
//!
//! The three tables live in one immutable [`RegistryTables`] snapshot held
//! behind an [`ArcSwap`]. Readers take a snapshot and never see a half-applied
//! reload; a reload builds and validates a complete new snapshot before
//! swapping it in, so a failed reload leaves the previous one untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::ast::domain_of;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arity {
    Nullary,
    Unary,
    #[default]
    Binary,
    Variadic,
}

/// Metadata for one canonical operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorMeta {
    pub key: String,
    #[serde(default)]
    pub description: String,
    /// Raw glyphs that may stand for this operator in source.
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub arity: Arity,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl OperatorMeta {
    pub fn domain(&self) -> &str {
        domain_of(&self.key).unwrap_or_default()
    }

    pub fn symbol(&self) -> &str {
        self.key.split_once(':').map(|(_, s)| s).unwrap_or(&self.key)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("malformed operator key '{0}': expected domain:symbol")]
    MalformedKey(String),
    #[error("alias '{alias}' targets unknown operator '{target}'")]
    UnknownAliasTarget { alias: String, target: String },
    #[error("collision '{symbol}' lists unknown operator '{candidate}'")]
    UnknownCollisionCandidate { symbol: String, candidate: String },
    #[error("symbol '{symbol}' resolves to '{resolved}', which has no metadata")]
    Unresolvable { symbol: String, resolved: String },
    #[error("failed to read registry file {path}: {message}")]
    Io { path: String, message: String },
    #[error("failed to parse registry file: {0}")]
    Parse(String),
}

/// Serializable form of a registry, as found in an override TOML file.
///
/// ```toml
/// priority = ["quantum", "logic"]
///
/// [aliases]
/// "⊕_x" = "quantum:⊕"
///
/// [collisions]
/// "⊕" = ["logic:⊕", "quantum:⊕"]
///
/// [[operators]]
/// key = "quantum:⊘"
/// description = "decoherence"
/// symbols = ["⊘"]
/// arity = "unary"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Vec<String>>,
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub collisions: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub operators: Vec<OperatorMeta>,
}

pub const DEFAULT_PRIORITY: &[&str] =
    &["logic", "math", "physics", "quantum", "symatics", "photon", "control"];

#[rustfmt::skip]
const DEFAULT_OPERATORS: &[(&str, &str, &[&str], Arity)] = &[
    ("logic:∧", "conjunction", &["∧"], Arity::Binary),
    ("logic:∨", "disjunction", &["∨"], Arity::Binary),
    ("logic:¬", "negation", &["¬"], Arity::Unary),
    ("logic:→", "implication", &["→"], Arity::Binary),
    ("logic:↔", "biconditional", &["↔"], Arity::Binary),
    ("logic:⊕", "exclusive or", &["⊕"], Arity::Binary),
    ("logic:⊗", "conjunctive product", &["⊗"], Arity::Binary),
    ("logic:⊖", "symmetric difference", &["⊖"], Arity::Binary),
    ("logic:⊤", "verum", &["⊤"], Arity::Nullary),
    ("logic:⊥", "falsum", &["⊥"], Arity::Nullary),
    ("math:∇", "gradient", &["∇"], Arity::Unary),
    ("math:∫", "integral", &["∫"], Arity::Variadic),
    ("math:∑", "summation", &["∑"], Arity::Variadic),
    ("math:∂", "partial derivative", &["∂"], Arity::Binary),
    ("physics:∇", "field gradient", &["∇"], Arity::Unary),
    ("physics:⊗", "tensor product", &["⊗"], Arity::Binary),
    ("physics:×", "cross product", &["×"], Arity::Binary),
    ("physics:·", "dot product", &["·"], Arity::Binary),
    ("physics:Δ", "laplacian", &["Δ"], Arity::Unary),
    ("physics:ℏ", "reduced Planck constant", &["ℏ"], Arity::Nullary),
    ("quantum:⊕", "superposition", &["⊕"], Arity::Binary),
    ("quantum:↔", "entanglement", &["↔"], Arity::Binary),
    ("quantum:⊗", "tensor product of states", &["⊗"], Arity::Binary),
    ("quantum:ψ", "state vector", &["ψ"], Arity::Nullary),
    ("quantum:measure", "projective measurement", &["measure"], Arity::Unary),
    ("symatics:⊕", "wave superposition", &["⊕"], Arity::Binary),
    ("symatics:↔", "wave entanglement", &["↔"], Arity::Binary),
    ("symatics:⊗", "resonant fusion", &["⊗"], Arity::Binary),
    ("symatics:⟲", "resonance", &["⟲"], Arity::Unary),
    ("symatics:π", "projection", &["π"], Arity::Unary),
    ("symatics:μ", "measurement collapse", &["μ"], Arity::Unary),
    ("symatics:⋈", "interference", &["⋈"], Arity::Binary),
    ("photon:⊕", "photon superposition", &["⊕"], Arity::Binary),
    ("photon:≈", "wave equivalence", &["≈"], Arity::Binary),
    ("photon:⊙", "absorption", &["⊙"], Arity::Binary),
    ("control:⟲", "loop", &["⟲"], Arity::Unary),
    ("control:→", "trigger", &["→"], Arity::Binary),
    ("control:⧖", "delay", &["⧖"], Arity::Binary),
    ("glyph:log", "log emission", &["log"], Arity::Variadic),
];

#[rustfmt::skip]
const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("⊕_q", "quantum:⊕"),
    ("⊕_s", "symatics:⊕"),
    ("⊕_p", "photon:⊕"),
    ("⊗_p", "physics:⊗"),
    ("⊗_s", "symatics:⊗"),
    ("⊗_q", "quantum:⊗"),
    ("↔_q", "quantum:↔"),
    ("↔_s", "symatics:↔"),
    ("⟲_s", "symatics:⟲"),
    ("∇_p", "physics:∇"),
    ("->", "logic:→"),
    ("!", "logic:¬"),
    ("~", "photon:≈"),
];

#[rustfmt::skip]
const DEFAULT_COLLISIONS: &[(&str, &[&str])] = &[
    ("⊕", &["logic:⊕", "quantum:⊕", "symatics:⊕", "photon:⊕"]),
    ("⊗", &["logic:⊗", "physics:⊗", "quantum:⊗", "symatics:⊗"]),
    ("↔", &["logic:↔", "quantum:↔", "symatics:↔"]),
    ("⟲", &["control:⟲", "symatics:⟲"]),
    ("∇", &["math:∇", "physics:∇"]),
    ("→", &["logic:→", "control:→"]),
];

impl RegistryDocument {
    /// Built-in operator set.
    pub fn defaults() -> Self {
        let operators = DEFAULT_OPERATORS
            .iter()
            .map(|(key, description, symbols, arity)| OperatorMeta {
                key: key.to_string(),
                description: description.to_string(),
                symbols: symbols.iter().map(|s| s.to_string()).collect(),
                arity: *arity,
                tags: vec![domain_of(key).unwrap_or_default().to_string()],
            })
            .collect();
        Self {
            priority: Some(DEFAULT_PRIORITY.iter().map(|s| s.to_string()).collect()),
            aliases: DEFAULT_ALIASES.iter().map(|(a, t)| (a.to_string(), t.to_string())).collect(),
            collisions: DEFAULT_COLLISIONS
                .iter()
                .map(|(s, c)| (s.to_string(), c.iter().map(|k| k.to_string()).collect()))
                .collect(),
            operators,
        }
    }

    pub fn from_toml_str(src: &str) -> Result<Self, RegistryError> {
        toml::from_str(src).map_err(|e| RegistryError::Parse(e.to_string()))
    }

    pub fn from_path(path: &Path) -> Result<Self, RegistryError> {
        let src = std::fs::read_to_string(path).map_err(|e| RegistryError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&src)
    }

    /// Layer `other` on top of `self`: operators replace by key, aliases
    /// replace by alias, collision lists replace by symbol, and a priority
    /// list, when present, replaces the whole order.
    pub fn merge(mut self, other: RegistryDocument) -> Self {
        if other.priority.is_some() {
            self.priority = other.priority;
        }
        self.aliases.extend(other.aliases);
        self.collisions.extend(other.collisions);
        for op in other.operators {
            match self.operators.iter_mut().find(|o| o.key == op.key) {
                Some(slot) => *slot = op,
                None => self.operators.push(op),
            }
        }
        self
    }
}

/// One immutable registry snapshot.
#[derive(Debug, Clone)]
pub struct RegistryTables {
    metadata: BTreeMap<String, OperatorMeta>,
    aliases: BTreeMap<String, String>,
    collisions: BTreeMap<String, Vec<String>>,
    canonical: BTreeMap<String, String>,
    priority: Vec<String>,
}

impl RegistryTables {
    /// Build and validate a snapshot.
    ///
    /// Symbols shared by two or more operators become collision entries even
    /// when the document does not list them, so that every declared symbol
    /// resolves to a key with metadata.
    pub fn from_document(doc: RegistryDocument) -> Result<Self, RegistryError> {
        let mut metadata = BTreeMap::new();
        let mut order = Vec::new();
        for op in doc.operators {
            if domain_of(&op.key).is_none() {
                return Err(RegistryError::MalformedKey(op.key));
            }
            if !metadata.contains_key(&op.key) {
                order.push(op.key.clone());
            }
            metadata.insert(op.key.clone(), op);
        }

        for (alias, target) in &doc.aliases {
            if !metadata.contains_key(target) {
                return Err(RegistryError::UnknownAliasTarget {
                    alias: alias.clone(),
                    target: target.clone(),
                });
            }
        }

        let mut collisions = doc.collisions;
        for (symbol, candidates) in &collisions {
            for candidate in candidates {
                if !metadata.contains_key(candidate) {
                    return Err(RegistryError::UnknownCollisionCandidate {
                        symbol: symbol.clone(),
                        candidate: candidate.clone(),
                    });
                }
            }
        }

        // symbol -> keys, in declaration order
        let mut by_symbol: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for key in &order {
            for symbol in &metadata[key].symbols {
                let keys = by_symbol.entry(symbol.clone()).or_default();
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
        }

        let mut canonical = BTreeMap::new();
        for (symbol, keys) in by_symbol {
            if doc.aliases.contains_key(&symbol) {
                continue;
            }
            match collisions.get_mut(&symbol) {
                Some(declared) => {
                    for k in keys {
                        if !declared.contains(&k) {
                            declared.push(k);
                        }
                    }
                }
                None if keys.len() > 1 => {
                    debug!(target: "codexcore::registry", %symbol, ?keys, "derived collision");
                    collisions.insert(symbol, keys);
                }
                None => {
                    canonical.insert(symbol, keys[0].clone());
                }
            }
        }
        // single-candidate collision lists are plain mappings
        collisions.retain(|symbol, candidates| {
            if candidates.len() == 1 {
                canonical.insert(symbol.clone(), candidates[0].clone());
                false
            } else {
                !candidates.is_empty()
            }
        });

        let priority = doc
            .priority
            .unwrap_or_else(|| DEFAULT_PRIORITY.iter().map(|s| s.to_string()).collect());

        let tables = Self { metadata, aliases: doc.aliases, collisions, canonical, priority };
        tables.check_resolvable()?;
        Ok(tables)
    }

    pub fn defaults() -> Self {
        // The built-in document is validated by the registry tests.
        match Self::from_document(RegistryDocument::defaults()) {
            Ok(t) => t,
            Err(e) => {
                warn!(target: "codexcore::registry", error = %e, "built-in registry invalid; starting empty");
                Self::empty()
            }
        }
    }

    fn empty() -> Self {
        Self {
            metadata: BTreeMap::new(),
            aliases: BTreeMap::new(),
            collisions: BTreeMap::new(),
            canonical: BTreeMap::new(),
            priority: DEFAULT_PRIORITY.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn check_resolvable(&self) -> Result<(), RegistryError> {
        let symbols = self
            .metadata
            .values()
            .flat_map(|m| m.symbols.iter())
            .chain(self.aliases.keys())
            .chain(self.collisions.keys());
        for symbol in symbols {
            let resolved = self.resolve(symbol, None);
            if !self.metadata.contains_key(&resolved) {
                return Err(RegistryError::Unresolvable { symbol: symbol.clone(), resolved });
            }
        }
        Ok(())
    }

    /// Position of a domain in the priority order; unlisted domains rank last.
    pub fn priority_of(&self, domain: &str) -> usize {
        self.priority.iter().position(|d| d == domain).unwrap_or(self.priority.len())
    }

    pub fn priority(&self) -> &[String] {
        &self.priority
    }

    pub fn is_collision(&self, symbol: &str) -> bool {
        self.collisions.get(symbol).is_some_and(|c| c.len() > 1)
    }

    pub fn collision_candidates(&self, symbol: &str) -> Option<&[String]> {
        self.collisions.get(symbol).map(Vec::as_slice)
    }

    /// Resolve a raw symbol to a canonical key.
    ///
    /// Order: alias, collision (context domain first, then priority), flat
    /// canonical map, identity. Resolution never fails; an unknown symbol
    /// comes back unchanged.
    pub fn resolve(&self, symbol: &str, context: Option<&str>) -> String {
        if let Some(target) = self.aliases.get(symbol) {
            return target.clone();
        }
        if let Some(candidates) = self.collisions.get(symbol).filter(|c| c.len() > 1) {
            let context = context.map(|c| c.trim().to_lowercase()).filter(|c| !c.is_empty());
            if let Some(ctx) = context.as_deref() {
                if let Some(hit) = candidates.iter().find(|k| domain_of(k) == Some(ctx)) {
                    return hit.clone();
                }
            }
            // min_by_key keeps the first of equal elements
            if let Some(best) = candidates
                .iter()
                .min_by_key(|k| self.priority_of(domain_of(k).unwrap_or_default()))
            {
                return best.clone();
            }
        }
        if let Some(key) = self.canonical.get(symbol) {
            return key.clone();
        }
        symbol.to_string()
    }

    pub fn get_metadata(&self, key: &str) -> Option<&OperatorMeta> {
        self.metadata.get(key)
    }

    pub fn is_known_key(&self, key: &str) -> bool {
        self.metadata.contains_key(key)
    }

    /// Canonical keys of one domain, sorted.
    pub fn list_by_domain(&self, domain: &str) -> Vec<String> {
        self.metadata.values().filter(|m| m.domain() == domain).map(|m| m.key.clone()).collect()
    }

    /// Every domain with at least one operator, sorted.
    pub fn list_all_domains(&self) -> Vec<String> {
        self.metadata
            .values()
            .map(|m| m.domain().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Aliases that resolve to `key`.
    pub fn aliases_for(&self, key: &str) -> Vec<String> {
        self.aliases.iter().filter(|(_, t)| *t == key).map(|(a, _)| a.clone()).collect()
    }

    pub fn operators(&self) -> impl Iterator<Item = &OperatorMeta> {
        self.metadata.values()
    }

    pub fn collisions(&self) -> &BTreeMap<String, Vec<String>> {
        &self.collisions
    }

    pub fn aliases(&self) -> &BTreeMap<String, String> {
        &self.aliases
    }
}

/// Process-wide registry with atomically replaceable tables.
pub struct OperatorRegistry {
    snap: ArcSwap<RegistryTables>,
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::new(RegistryTables::defaults())
    }
}

impl OperatorRegistry {
    pub fn new(tables: RegistryTables) -> Self {
        Self { snap: ArcSwap::from_pointee(tables) }
    }

    /// Current tables. Hold the returned `Arc` for a consistent view across
    /// several lookups.
    #[inline]
    pub fn snapshot(&self) -> Arc<RegistryTables> {
        self.snap.load_full()
    }

    /// Replace the tables with `defaults + overrides`. On error the current
    /// snapshot is kept.
    pub fn reload(&self, overrides: RegistryDocument) -> Result<(), RegistryError> {
        let doc = RegistryDocument::defaults().merge(overrides);
        let tables = RegistryTables::from_document(doc)?;
        info!(
            target: "codexcore::registry",
            operators = tables.metadata.len(),
            aliases = tables.aliases.len(),
            collisions = tables.collisions.len(),
            "registry reloaded"
        );
        self.snap.store(Arc::new(tables));
        Ok(())
    }

    pub fn reload_from_path(&self, path: &Path) -> Result<(), RegistryError> {
        let doc = RegistryDocument::from_path(path)?;
        self.reload(doc).inspect_err(|e| {
            warn!(target: "codexcore::registry", path = %path.display(), error = %e, "registry reload rejected");
        })
    }

    /// Drop all overrides.
    pub fn reset(&self) {
        self.snap.store(Arc::new(RegistryTables::defaults()));
    }

    pub fn resolve(&self, symbol: &str, context: Option<&str>) -> String {
        self.snap.load().resolve(symbol, context)
    }

    pub fn is_collision(&self, symbol: &str) -> bool {
        self.snap.load().is_collision(symbol)
    }

    pub fn get_metadata(&self, key: &str) -> Option<OperatorMeta> {
        self.snap.load().get_metadata(key).cloned()
    }

    pub fn list_by_domain(&self, domain: &str) -> Vec<String> {
        self.snap.load().list_by_domain(domain)
    }

    pub fn list_all_domains(&self) -> Vec<String> {
        self.snap.load().list_all_domains()
    }

    pub fn aliases_for(&self, key: &str) -> Vec<String> {
        self.snap.load().aliases_for(key)
    }
}

static GLOBAL: Lazy<Arc<OperatorRegistry>> = Lazy::new(|| Arc::new(OperatorRegistry::default()));

/// Shared registry used by the CLI and by executors that are not given one.
pub fn global() -> Arc<OperatorRegistry> {
    GLOBAL.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        RegistryTables::from_document(RegistryDocument::defaults()).unwrap();
    }

    #[test]
    fn collision_resolution_uses_context_then_priority() {
        let t = RegistryTables::defaults();
        assert!(t.is_collision("⊕"));
        assert_eq!(t.resolve("⊕", None), "logic:⊕");
        assert_eq!(t.resolve("⊕", Some("quantum")), "quantum:⊕");
        assert_eq!(t.resolve("⊕", Some("Photon")), "photon:⊕");
        // no physics candidate for ⊕
        assert_eq!(t.resolve("⊕", Some("physics")), "logic:⊕");
        assert_eq!(t.resolve("∇", None), "math:∇");
        assert_eq!(t.resolve("⟲", None), "symatics:⟲");
    }

    #[test]
    fn alias_wins_over_context() {
        let t = RegistryTables::defaults();
        assert_eq!(t.resolve("⊕_q", Some("logic")), "quantum:⊕");
        assert_eq!(t.resolve("->", None), "logic:→");
        assert_eq!(t.resolve("!", None), "logic:¬");
    }

    #[test]
    fn unknown_symbols_resolve_to_themselves() {
        let t = RegistryTables::defaults();
        assert_eq!(t.resolve("☃", None), "☃");
        assert_eq!(t.resolve("logic:⊕", None), "logic:⊕");
    }

    #[test]
    fn every_symbol_resolves_to_known_metadata() {
        let t = RegistryTables::defaults();
        for meta in t.operators() {
            for s in &meta.symbols {
                assert!(t.is_known_key(&t.resolve(s, None)), "{s}");
            }
        }
    }

    #[test]
    fn queries() {
        let t = RegistryTables::defaults();
        assert!(t.list_by_domain("photon").contains(&"photon:≈".to_string()));
        let domains = t.list_all_domains();
        for d in ["logic", "math", "physics", "quantum", "symatics", "photon", "control", "glyph"] {
            assert!(domains.iter().any(|x| x == d), "{d}");
        }
        assert_eq!(t.aliases_for("photon:≈"), vec!["~".to_string()]);
        assert_eq!(t.get_metadata("logic:¬").map(|m| m.arity), Some(Arity::Unary));
    }

    #[test]
    fn bad_override_keeps_previous_snapshot() {
        let reg = OperatorRegistry::default();
        let mut doc = RegistryDocument::default();
        doc.aliases.insert("⊕_z".into(), "nowhere:⊕".into());
        let err = reg.reload(doc).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownAliasTarget { .. }));
        assert_eq!(reg.resolve("⊕_q", None), "quantum:⊕");
        assert_eq!(reg.resolve("⊕_z", None), "⊕_z");
    }

    #[test]
    fn override_priority_and_new_operator() {
        let reg = OperatorRegistry::default();
        let doc = RegistryDocument::from_toml_str(
            r#"
            priority = ["quantum", "logic"]

            [[operators]]
            key = "quantum:⊘"
            description = "decoherence"
            symbols = ["⊘"]
            arity = "unary"
            "#,
        )
        .unwrap();
        reg.reload(doc).unwrap();
        assert_eq!(reg.resolve("⊕", None), "quantum:⊕");
        assert_eq!(reg.resolve("⊘", None), "quantum:⊘");
        reg.reset();
        assert_eq!(reg.resolve("⊕", None), "logic:⊕");
    }
}
