use serde_json::{json, Value};

use crate::core::registry::OperatorRegistry;

pub fn main(domain: Option<&str>, registry: &OperatorRegistry) -> anyhow::Result<Value> {
    let tables = registry.snapshot();
    let domains = match domain {
        Some(d) => vec![d.to_string()],
        None => tables.list_all_domains(),
    };
    let mut listing = serde_json::Map::new();
    for d in domains {
        let ops: Vec<Value> = tables
            .list_by_domain(&d)
            .iter()
            .filter_map(|key| tables.get_metadata(key))
            .map(|meta| {
                json!({
                    "key": meta.key,
                    "description": meta.description,
                    "arity": meta.arity,
                    "aliases": tables.aliases_for(&meta.key),
                })
            })
            .collect();
        listing.insert(d, Value::Array(ops));
    }
    Ok(json!({"priority": tables.priority(), "domains": listing}))
}
