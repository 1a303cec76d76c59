//! One module per subcommand. Each returns the JSON document to print.

pub mod exec;
pub mod influence;
pub mod ops;
pub mod parse;
pub mod resolve;

use serde_json::Value;

/// `false` for results that report failure through `ok` or `status`.
pub fn is_success(out: &Value) -> bool {
    match (out.get("ok"), out.get("status")) {
        (Some(Value::Bool(ok)), _) => *ok,
        (_, Some(Value::String(status))) => status != "error",
        _ => true,
    }
}
