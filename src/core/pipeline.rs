//! Source text to executor result in one call.

use tracing::debug;

use crate::core::backends::ExecContext;
use crate::core::executor::{ExecResult, Executor};
use crate::core::parser::parse_document_with_depth;

/// Parse `source` (plain program or template), then execute it. The
/// executor rewrites under `mode`, or under the template's type when no
/// mode is given.
pub fn run(source: &str, mode: Option<&str>, executor: &Executor) -> ExecResult {
    run_with_context(source, mode, executor, ExecContext::new())
}

/// Like [`run`], with caller-supplied bindings and overrides. A `mode` here
/// replaces any mode already set on `ctx`.
pub fn run_with_context(
    source: &str,
    mode: Option<&str>,
    executor: &Executor,
    mut ctx: ExecContext,
) -> ExecResult {
    let requested = mode.or(ctx.mode.as_deref()).map(str::to_string);
    let doc = match parse_document_with_depth(source, requested.as_deref(), executor.config().max_depth) {
        Ok(doc) => doc,
        Err(e) => {
            debug!(target: "codexcore::pipeline", error = %e, "parse failed");
            return ExecResult::error(None, e.to_string());
        }
    };
    ctx.mode = doc.mode;
    executor.execute(doc.tree, &ctx)
}
