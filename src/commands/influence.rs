use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;

use crate::influence::{DecisionInfluenceRuntime, InfluenceRouter};

/// `raw` is a JSON object, or `@path` naming a file holding one.
pub fn main(raw: &str, runtime: Arc<DecisionInfluenceRuntime>) -> anyhow::Result<Value> {
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading payload {path}"))?,
        None => raw.to_string(),
    };
    let payload: Value = serde_json::from_str(&text).context("payload is not valid JSON")?;
    Ok(InfluenceRouter::new(runtime).run(&payload))
}
