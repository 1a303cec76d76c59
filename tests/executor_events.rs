use std::sync::Arc;

use codexcore::config::ExecutorConfig;
use codexcore::core::ast::Node;
use codexcore::core::backends::{Backend, BackendError, ExecContext};
use codexcore::core::executor::{ExecStatus, Executor};
use codexcore::core::pipeline::run;
use codexcore::core::registry::OperatorRegistry;
use codexcore::core::sinks::{ChannelSink, MemorySink};
use serde_json::{json, Value};

struct Interferometer;

impl Backend for Interferometer {
    fn name(&self) -> &str {
        "photon-lab"
    }

    fn evaluate(&self, node: &Node, args: &[Value], _ctx: &ExecContext) -> Result<Value, BackendError> {
        match node.op_symbol() {
            Some("photon:⊕") => Ok(json!({"superposed": args})),
            other => Err(BackendError::Unsupported(other.unwrap_or_default().to_string())),
        }
    }
}

fn executor() -> Executor {
    Executor::new(ExecutorConfig::default()).with_registry(Arc::new(OperatorRegistry::default()))
}

#[test]
fn node_and_completion_events_reach_sinks() {
    let memory = Arc::new(MemorySink::new());
    let (channel, rx) = ChannelSink::channel();
    let exec = executor().with_sink(memory.clone()).with_sink(Arc::new(channel));

    let out = run("A ∧ B", None, &exec);
    assert_eq!(out.status, ExecStatus::Success);

    let events = memory.drain();
    let channels: Vec<_> = events.iter().map(|e| e.channel.as_str()).collect();
    assert_eq!(channels, vec!["codex.node", "codex.executed"]);
    assert_eq!(events[0].payload["op"], "logic:∧");
    assert_eq!(rx.try_iter().count(), 2);
}

#[test]
fn dropped_receiver_does_not_fail_execution() {
    let (channel, rx) = ChannelSink::channel();
    drop(rx);
    let exec = executor().with_sink(Arc::new(channel));
    assert_eq!(run("A ∨ B", None, &exec).status, ExecStatus::Success);
}

#[test]
fn custom_backend_replaces_domain_engine() {
    let exec = executor().with_backend("photon", Arc::new(Interferometer));
    let out = run("A ⊕ B", Some("photon"), &exec);
    assert_eq!(out.engine.as_deref(), Some("photon-lab"));
    assert_eq!(out.result, Some(json!({"superposed": ["A", "B"]})));

    let out = run("≈(A, B)", Some("photon"), &exec);
    assert_eq!(out.status, ExecStatus::Error);
    assert_eq!(out.engine.as_deref(), Some("photon-lab"));
    assert!(out.error.unwrap().contains("photon:≈"));
}

#[test]
fn trace_records_every_node() {
    let ctx = ExecContext::new().bind("A", true);
    let out = codexcore::core::pipeline::run_with_context("¬(A ∧ ⊤)", None, &executor(), ctx);
    assert_eq!(out.result, Some(json!(false)));
    let ops: Vec<_> = out.trace.iter().map(|s| s.op.as_str()).collect();
    assert_eq!(ops, vec!["logic:¬", "logic:∧", "A", "⊤"]);
    assert_eq!(out.trace[0].args_kinds, vec!["op"]);
}
