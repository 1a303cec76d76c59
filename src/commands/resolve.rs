use serde_json::{json, Value};

use crate::core::registry::OperatorRegistry;

pub fn main(symbol: &str, context: Option<&str>, registry: &OperatorRegistry) -> anyhow::Result<Value> {
    let tables = registry.snapshot();
    let key = tables.resolve(symbol, context);
    Ok(json!({
        "symbol": symbol,
        "context": context,
        "key": key,
        "collision": tables.is_collision(symbol),
        "candidates": tables.collision_candidates(symbol),
        "known": tables.is_known_key(&key),
        "meta": tables.get_metadata(&key),
    }))
}
