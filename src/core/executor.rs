//! Instruction-tree executor: rewrite, route each canonical operator to its
//! backend, and collect a uniform result with trace and cost.
//!
//! Nothing here returns `Err` to the caller. Malformed trees, backend
//! failures and a paused executor all come back as an [`ExecResult`] with the
//! matching [`ExecStatus`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::ExecutorConfig;
use crate::core::ast::{domain_of, Node};
use crate::core::error::TreeError;
use crate::core::backends::{
    Backend, DefaultSymatics, EchoBackend, ExecContext, LogicBackend, SymaticsDispatcher, ECHO_DOMAINS,
};
use crate::core::registry::{self, OperatorRegistry};
use crate::core::rewriter::Rewriter;
use crate::core::sinks::{EventSink, ExecEvent};

pub const SYMATICS_ENGINE: &str = "symatics";
pub const TEST_MODE_ENGINE: &str = "codex";
const LITERAL_ENGINE: &str = "literal";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecStatus {
    Ok,
    Success,
    Error,
    Paused,
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceStep {
    pub op: String,
    pub args_kinds: Vec<&'static str>,
    pub engine: String,
    /// Seconds spent in this node, children included.
    pub elapsed: f64,
    pub result_shape: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Cost {
    pub total: f64,
    pub breakdown: BTreeMap<String, f64>,
}

impl Cost {
    fn charge(&mut self, engine: &str, amount: f64) {
        if amount == 0.0 {
            return;
        }
        self.total += amount;
        *self.breakdown.entry(engine.to_string()).or_default() += amount;
    }
}

/// Uniform executor result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecResult {
    pub status: ExecStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<TraceStep>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub trace_truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<Cost>,
}

impl ExecResult {
    fn bare(status: ExecStatus) -> Self {
        Self {
            status,
            engine: None,
            result: None,
            error: None,
            trace: Vec::new(),
            trace_truncated: false,
            cost: None,
        }
    }

    pub fn error(engine: Option<&str>, message: impl Into<String>) -> Self {
        Self { engine: engine.map(str::to_string), error: Some(message.into()), ..Self::bare(ExecStatus::Error) }
    }

    pub fn is_error(&self) -> bool {
        self.status == ExecStatus::Error
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| json!({"status": "error", "error": e.to_string()}))
    }
}

#[derive(Debug)]
struct EvalError {
    engine: Option<String>,
    message: String,
}

/// Mutable state for one evaluation.
struct Run<'a> {
    ctx: &'a ExecContext,
    trace: Vec<Option<TraceStep>>,
    truncated: bool,
    cost: Cost,
}

impl Run<'_> {
    fn reserve_step(&mut self, cap: usize) -> Option<usize> {
        if self.trace.len() < cap {
            self.trace.push(None);
            Some(self.trace.len() - 1)
        } else {
            self.truncated = true;
            None
        }
    }
}

enum Route {
    Symatics,
    Backend(Arc<dyn Backend>),
}

pub struct Executor {
    config: ExecutorConfig,
    registry: Arc<OperatorRegistry>,
    backends: BTreeMap<String, Arc<dyn Backend>>,
    symatics: Arc<dyn SymaticsDispatcher>,
    sinks: Vec<Arc<dyn EventSink>>,
    paused: AtomicBool,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl Executor {
    /// Executor over the shared registry with the built-in backends.
    pub fn new(config: ExecutorConfig) -> Self {
        let mut backends: BTreeMap<String, Arc<dyn Backend>> = BTreeMap::new();
        backends.insert("logic".into(), Arc::new(LogicBackend));
        for domain in ECHO_DOMAINS {
            backends.insert(domain.to_string(), Arc::new(EchoBackend::new(*domain)));
        }
        let symatics = Arc::new(DefaultSymatics::new(config.symatics_ops.iter().cloned()));
        Self {
            config,
            registry: registry::global(),
            backends,
            symatics,
            sinks: Vec::new(),
            paused: AtomicBool::new(false),
        }
    }

    pub fn with_registry(mut self, registry: Arc<OperatorRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Register (or replace) the backend for a domain.
    pub fn with_backend(mut self, domain: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        self.backends.insert(domain.into(), backend);
        self
    }

    pub fn with_symatics(mut self, dispatcher: Arc<dyn SymaticsDispatcher>) -> Self {
        self.symatics = dispatcher;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<OperatorRegistry> {
        &self.registry
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Execute an untyped JSON tree.
    pub fn execute_value(&self, tree: &Value, ctx: &ExecContext) -> ExecResult {
        match Node::from_value_with_depth(tree, self.config.max_depth) {
            Ok(node) => self.execute(node, ctx),
            Err(e) => {
                debug!(target: "codexcore::executor", error = %e, "rejected tree");
                ExecResult::error(None, e.to_string())
            }
        }
    }

    pub fn execute(&self, tree: Node, ctx: &ExecContext) -> ExecResult {
        if self.is_paused() {
            return ExecResult::bare(ExecStatus::Paused);
        }
        if tree.depth() > self.config.max_depth {
            let e = TreeError::new("root", format!("nesting too deep (limit {})", self.config.max_depth));
            debug!(target: "codexcore::executor", error = %e, "rejected tree");
            return ExecResult::error(None, e.to_string());
        }

        let tree = if self.config.canonicalize {
            Rewriter::from_registry(&self.registry, ctx.mode.as_deref()).rewrite(tree)
        } else {
            tree
        };

        // test mode has no side effects: no backends, no sink events
        if ctx.test_mode.unwrap_or(self.config.test_mode) {
            return ExecResult {
                engine: Some(TEST_MODE_ENGINE.to_string()),
                result: Some(tree.to_value()),
                ..ExecResult::bare(ExecStatus::Ok)
            };
        }

        if tree.is_empty_program() {
            return ExecResult { result: Some(json!([])), ..ExecResult::bare(ExecStatus::Ignored) };
        }

        let mut run = Run { ctx, trace: Vec::new(), truncated: false, cost: Cost::default() };
        let started = Instant::now();
        let mut out = match &tree {
            Node::Program { children } => self.execute_program(children, &mut run),
            node => match self.eval(node, &mut run) {
                Ok((engine, value)) => ExecResult {
                    engine: Some(engine),
                    result: Some(value),
                    ..ExecResult::bare(ExecStatus::Success)
                },
                Err(e) => ExecResult::error(e.engine.as_deref(), e.message),
            },
        };
        out.trace = run.trace.into_iter().flatten().collect();
        out.trace_truncated = run.truncated;
        out.cost = Some(run.cost);

        debug!(
            target: "codexcore::executor",
            status = ?out.status,
            steps = out.trace.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "execution finished"
        );
        self.publish(
            "codex.executed",
            json!({"status": out.status, "engine": out.engine, "error": out.error}),
        );
        out
    }

    /// Children run independently; the first failure decides the overall
    /// error message.
    fn execute_program(&self, children: &[Node], run: &mut Run<'_>) -> ExecResult {
        let mut rows = Vec::with_capacity(children.len());
        let mut first_error: Option<EvalError> = None;
        for child in children {
            match self.eval(child, run) {
                Ok((engine, value)) => {
                    rows.push(json!({"status": "success", "engine": engine, "result": value}))
                }
                Err(e) => {
                    rows.push(json!({"status": "error", "engine": e.engine, "error": e.message}));
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            None => ExecResult {
                engine: Some("program".into()),
                result: Some(Value::Array(rows)),
                ..ExecResult::bare(ExecStatus::Success)
            },
            Some(e) => ExecResult {
                result: Some(Value::Array(rows)),
                ..ExecResult::error(e.engine.as_deref(), e.message)
            },
        }
    }

    fn route(&self, op: &str) -> Result<Route, EvalError> {
        if self.symatics.is_symatics_operator(op) {
            return Ok(Route::Symatics);
        }
        let Some(domain) = domain_of(op) else {
            return Err(EvalError { engine: None, message: format!("unresolved operator '{}'", op) });
        };
        if domain == "logic" && self.config.logic_via_symatics {
            return Ok(Route::Symatics);
        }
        match self.backends.get(domain) {
            Some(b) => Ok(Route::Backend(b.clone())),
            None => Err(EvalError {
                engine: Some(domain.to_string()),
                message: format!("no backend registered for domain '{}'", domain),
            }),
        }
    }

    /// Depth-first evaluation. Returns the engine that produced the value.
    fn eval(&self, node: &Node, run: &mut Run<'_>) -> Result<(String, Value), EvalError> {
        let slot = run.reserve_step(self.config.max_trace_steps);
        let started = Instant::now();
        let (op, args_kinds, outcome) = match node {
            Node::Lit { value } => (
                value.clone(),
                Vec::new(),
                Ok((LITERAL_ENGINE.to_string(), Value::String(value.clone()))),
            ),
            Node::Program { children } => {
                let outcome = self
                    .eval_all(children, run)
                    .map(|values| ("program".to_string(), Value::Array(values)));
                ("program".to_string(), children.iter().map(Node::kind_name).collect(), outcome)
            }
            Node::Op { op, args } => {
                let kinds = args.iter().map(Node::kind_name).collect();
                (op.clone(), kinds, self.eval_op(node, op, args, run))
            }
        };

        let (engine, shape) = match &outcome {
            Ok((engine, value)) => (engine.clone(), shape_of(value)),
            Err(e) => (e.engine.clone().unwrap_or_default(), "error"),
        };
        if let Some(i) = slot {
            run.trace[i] = Some(TraceStep {
                op,
                args_kinds,
                engine,
                elapsed: started.elapsed().as_secs_f64(),
                result_shape: shape,
            });
        }
        outcome
    }

    fn eval_op(
        &self,
        node: &Node,
        op: &str,
        args: &[Node],
        run: &mut Run<'_>,
    ) -> Result<(String, Value), EvalError> {
        let values = self.eval_all(args, run)?;
        let route = self.route(op)?;
        let (engine, result) = match route {
            Route::Symatics => (SYMATICS_ENGINE.to_string(), self.symatics.evaluate(node, &values, run.ctx)),
            Route::Backend(b) => (b.name().to_string(), b.evaluate(node, &values, run.ctx)),
        };
        run.cost.charge(&engine, self.config.cost_of(&engine));

        match result {
            Ok(value) => {
                self.publish("codex.node", json!({"op": op, "engine": engine, "status": "success"}));
                Ok((engine, value))
            }
            Err(e) => {
                self.publish("codex.node", json!({"op": op, "engine": engine, "status": "error"}));
                Err(EvalError { engine: Some(engine), message: e.to_string() })
            }
        }
    }

    /// Evaluate every node, even after one fails; the first failure wins.
    fn eval_all(&self, nodes: &[Node], run: &mut Run<'_>) -> Result<Vec<Value>, EvalError> {
        let mut values = Vec::with_capacity(nodes.len());
        let mut first_error = None;
        for n in nodes {
            match self.eval(n, run) {
                Ok((_, v)) => values.push(v),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            None => Ok(values),
            Some(e) => Err(e),
        }
    }

    fn publish(&self, channel: &str, payload: Value) {
        if self.sinks.is_empty() {
            return;
        }
        let event = ExecEvent::new(channel, payload);
        for sink in &self.sinks {
            if let Err(e) = sink.emit(&event) {
                warn!(target: "codexcore::executor", channel, error = %e, "event sink failed");
            }
        }
    }
}

fn shape_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}
