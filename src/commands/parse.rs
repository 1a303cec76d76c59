use serde_json::{json, Value};

use crate::core::diagnostics::{print_error, Span};
use crate::core::lexer::Lexer;
use crate::core::parser::parse_document;
use crate::core::registry::OperatorRegistry;
use crate::core::rewriter::Rewriter;

pub fn main(source: &str, mode: Option<&str>, registry: &OperatorRegistry, pretty: bool) -> anyhow::Result<Value> {
    let doc = match parse_document(source, mode) {
        Ok(doc) => doc,
        Err(e) => {
            if pretty {
                let normalized = Lexer::new(source).source().to_string();
                print_error("<input>", &normalized, &e.to_string(), Span::of_parse_error(&normalized, &e));
            }
            return Ok(json!({"status": "error", "error": e.to_string()}));
        }
    };
    let mut out = json!({
        "status": "ok",
        "tree": doc.tree.to_value(),
        "codexlang": doc.tree.to_codexlang(),
        "mode": doc.mode,
    });
    if let Some(mode) = doc.mode.as_deref() {
        let rewritten = Rewriter::from_registry(registry, Some(mode)).rewrite(doc.tree);
        out["canonical"] = rewritten.to_value();
    }
    if let Some(template) = doc.template {
        out["template"] = serde_json::to_value(template)?;
    }
    Ok(out)
}
