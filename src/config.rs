use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::ast::MAX_DEPTH;

pub const CONFIG_ENV: &str = "CODEXCORE_CONFIG";
pub const DEFAULT_WEIGHTS_PATH: &str = ".runtime/codexcore/decision_influence_weights.json";
pub const DEFAULT_AUDIT_PATH: &str = ".runtime/codexcore/decision_influence_audit.jsonl";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config {path}: {message}")]
    Malformed { path: PathBuf, message: String },
}

/// Whole `codexcore.toml` document. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub registry: RegistryConfig,
    pub executor: ExecutorConfig,
    pub influence: InfluenceConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Operator override document merged onto the built-in tables.
    pub operators_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Return the rewritten tree instead of evaluating it.
    pub test_mode: bool,
    /// Run the rewriter before evaluation.
    pub canonicalize: bool,
    /// Send `logic:*` to the symatics dispatcher instead of the logic backend.
    pub logic_via_symatics: bool,
    /// Extra canonical keys the default symatics dispatcher claims.
    pub symatics_ops: Vec<String>,
    pub max_trace_steps: usize,
    /// Trees taller than this are rejected before rewriting.
    pub max_depth: usize,
    /// Per-engine cost weights; `default` covers engines not listed.
    pub costs: BTreeMap<String, f64>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            test_mode: false,
            canonicalize: true,
            logic_via_symatics: false,
            symatics_ops: Vec::new(),
            max_trace_steps: 1024,
            max_depth: MAX_DEPTH,
            costs: BTreeMap::from([
                ("default".to_string(), 0.01),
                ("symatics".to_string(), 0.1),
            ]),
        }
    }
}

impl ExecutorConfig {
    pub fn cost_of(&self, engine: &str) -> f64 {
        self.costs
            .get(engine)
            .or_else(|| self.costs.get("default"))
            .copied()
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluenceConfig {
    pub weights_path: PathBuf,
    pub audit_path: PathBuf,
    /// Load the weights file when the runtime is constructed.
    pub autoload: bool,
}

impl Default for InfluenceConfig {
    fn default() -> Self {
        Self {
            weights_path: PathBuf::from(DEFAULT_WEIGHTS_PATH),
            audit_path: PathBuf::from(DEFAULT_AUDIT_PATH),
            autoload: true,
        }
    }
}

impl Config {
    pub fn from_toml_str(src: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(src).map_err(|e| ConfigError::Malformed {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Read a config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(src) => Self::from_toml_str(&src, path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read { path: path.to_path_buf(), source }),
        }
    }

    /// Load from the resolved path, or defaults when there is none.
    pub fn load_resolved(cli_path: &Option<PathBuf>) -> Result<Self, ConfigError> {
        match resolve_config_path(cli_path) {
            Some(p) => Self::load(&p),
            None => Ok(Self::default()),
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    // ~/.codexcore/codexcore.toml
    dirs_next::home_dir().map(|h| h.join(".codexcore").join("codexcore.toml"))
}

/// `--config` wins, then `CODEXCORE_CONFIG`, then the home-directory default.
pub fn resolve_config_path(cli_path: &Option<PathBuf>) -> Option<PathBuf> {
    if let Some(p) = cli_path {
        return Some(p.clone());
    }
    if let Some(p) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(p));
    }
    default_config_path()
}
