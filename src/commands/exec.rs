use std::sync::Arc;

use serde_json::Value;

use crate::config::ExecutorConfig;
use crate::core::backends::ExecContext;
use crate::core::executor::Executor;
use crate::core::pipeline::run_with_context;
use crate::core::registry::OperatorRegistry;

pub fn main(
    source: &str,
    mode: Option<&str>,
    test_mode: bool,
    bindings: Vec<(String, bool)>,
    config: ExecutorConfig,
    registry: Arc<OperatorRegistry>,
) -> anyhow::Result<Value> {
    let executor = Executor::new(config).with_registry(registry);
    let mut ctx = ExecContext::new();
    if test_mode {
        ctx = ctx.with_test_mode(true);
    }
    for (name, value) in bindings {
        ctx = ctx.bind(name, value);
    }
    Ok(run_with_context(source, mode, &executor, ctx).to_value())
}
