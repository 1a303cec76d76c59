//! Evaluation backends the executor dispatches canonical operators to.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Value};
use thiserror::Error;

use crate::core::ast::{domain_of, Node};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("{op} expects {expected} argument(s), got {got}")]
    Arity { op: String, expected: String, got: usize },
    #[error("unsupported operator '{0}'")]
    Unsupported(String),
    #[error("{0}")]
    Failed(String),
}

/// Per-evaluation inputs visible to every backend.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    /// Resolver context for rewriting (`quantum`, `photon`, ...).
    pub mode: Option<String>,
    /// Truth values for identifiers seen by the logic backend.
    pub bindings: BTreeMap<String, bool>,
    /// Overrides the executor's configured test mode when set.
    pub test_mode: Option<bool>,
}

impl ExecContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn bind(mut self, name: impl Into<String>, value: bool) -> Self {
        self.bindings.insert(name.into(), value);
        self
    }

    pub fn with_test_mode(mut self, on: bool) -> Self {
        self.test_mode = Some(on);
        self
    }
}

/// A domain backend. `args` are the already-evaluated arguments of `node`.
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;
    fn evaluate(&self, node: &Node, args: &[Value], ctx: &ExecContext) -> Result<Value, BackendError>;
}

/// The symatics engine. It decides which operators it owns.
pub trait SymaticsDispatcher: Send + Sync {
    fn is_symatics_operator(&self, op: &str) -> bool;
    fn evaluate(&self, node: &Node, args: &[Value], ctx: &ExecContext) -> Result<Value, BackendError>;
}

fn op_of(node: &Node) -> &str {
    node.op_symbol().unwrap_or_default()
}

// ---- logic ----

/// Boolean evaluation of the canonical logic connectives.
///
/// Values `true`/`⊤` and `false`/`⊥` are booleans, as is any identifier
/// bound in [`ExecContext::bindings`]. If any argument is not a boolean the
/// application is returned symbolically.
pub struct LogicBackend;

fn truth(value: &Value, ctx: &ExecContext) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.as_str() {
            "true" | "⊤" => Some(true),
            "false" | "⊥" => Some(false),
            other => ctx.bindings.get(other).copied(),
        },
        _ => None,
    }
}

fn expect_args(op: &str, args: &[Value], expected: usize) -> Result<(), BackendError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(BackendError::Arity { op: op.to_string(), expected: expected.to_string(), got: args.len() })
    }
}

impl Backend for LogicBackend {
    fn name(&self) -> &str {
        "logic"
    }

    fn evaluate(&self, node: &Node, args: &[Value], ctx: &ExecContext) -> Result<Value, BackendError> {
        let op = op_of(node);
        match op {
            "logic:⊤" => return Ok(Value::Bool(true)),
            "logic:⊥" => return Ok(Value::Bool(false)),
            "logic:¬" => expect_args(op, args, 1)?,
            "logic:→" | "logic:↔" => expect_args(op, args, 2)?,
            "logic:∧" | "logic:∨" | "logic:⊕" => {
                if args.len() < 2 {
                    return Err(BackendError::Arity {
                        op: op.to_string(),
                        expected: "at least 2".into(),
                        got: args.len(),
                    });
                }
            }
            _ => return Ok(json!({"op": op, "args": args, "symbolic": true})),
        }

        let Some(values) = args.iter().map(|a| truth(a, ctx)).collect::<Option<Vec<bool>>>() else {
            return Ok(json!({"op": op, "args": args, "symbolic": true}));
        };
        let out = match op {
            "logic:¬" => !values[0],
            "logic:→" => !values[0] || values[1],
            "logic:↔" => values[0] == values[1],
            "logic:∧" => values.iter().all(|v| *v),
            "logic:∨" => values.iter().any(|v| *v),
            // parity for more than two operands
            "logic:⊕" => values.iter().filter(|v| **v).count() % 2 == 1,
            _ => return Err(BackendError::Unsupported(op.to_string())),
        };
        Ok(Value::Bool(out))
    }
}

// ---- echo ----

/// Returns its application unevaluated, tagged with the engine name.
pub struct EchoBackend {
    name: String,
}

impl EchoBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Backend for EchoBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, node: &Node, args: &[Value], _ctx: &ExecContext) -> Result<Value, BackendError> {
        Ok(json!({"engine": self.name, "op": op_of(node), "args": args}))
    }
}

/// Domains served by an [`EchoBackend`] out of the box.
pub const ECHO_DOMAINS: &[&str] = &["quantum", "photon", "physics", "math", "control", "glyph"];

// ---- symatics ----

/// Claims `symatics:*`, `interf:*` and a configured set of extra keys.
#[derive(Debug, Clone, Default)]
pub struct DefaultSymatics {
    extra: BTreeSet<String>,
}

impl DefaultSymatics {
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { extra: extra.into_iter().map(Into::into).collect() }
    }
}

impl SymaticsDispatcher for DefaultSymatics {
    fn is_symatics_operator(&self, op: &str) -> bool {
        matches!(domain_of(op), Some("symatics" | "interf")) || self.extra.contains(op)
    }

    fn evaluate(&self, node: &Node, args: &[Value], _ctx: &ExecContext) -> Result<Value, BackendError> {
        Ok(json!({"engine": "symatics", "op": op_of(node), "args": args}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(op: &str, args: &[Value], ctx: &ExecContext) -> Result<Value, BackendError> {
        LogicBackend.evaluate(&Node::op(op, vec![]), args, ctx)
    }

    #[test]
    fn truth_tables() {
        let ctx = ExecContext::new().bind("A", true).bind("B", false);
        let a = json!("A");
        let b = json!("B");
        assert_eq!(eval("logic:∧", &[a.clone(), b.clone()], &ctx), Ok(json!(false)));
        assert_eq!(eval("logic:∨", &[a.clone(), b.clone()], &ctx), Ok(json!(true)));
        assert_eq!(eval("logic:→", &[a.clone(), b.clone()], &ctx), Ok(json!(false)));
        assert_eq!(eval("logic:→", &[b.clone(), a.clone()], &ctx), Ok(json!(true)));
        assert_eq!(eval("logic:↔", &[a.clone(), a.clone()], &ctx), Ok(json!(true)));
        assert_eq!(eval("logic:⊕", &[a.clone(), b.clone()], &ctx), Ok(json!(true)));
        assert_eq!(eval("logic:¬", &[json!("⊤")], &ctx), Ok(json!(false)));
    }

    #[test]
    fn unbound_operand_stays_symbolic() {
        let out = eval("logic:∧", &[json!("A"), json!(true)], &ExecContext::new()).unwrap();
        assert_eq!(out["symbolic"], json!(true));
    }

    #[test]
    fn arity_is_checked() {
        let err = eval("logic:¬", &[json!(true), json!(false)], &ExecContext::new()).unwrap_err();
        assert!(matches!(err, BackendError::Arity { got: 2, .. }));
    }

    #[test]
    fn symatics_membership() {
        let d = DefaultSymatics::new(["logic:⊕"]);
        assert!(d.is_symatics_operator("symatics:⟲"));
        assert!(d.is_symatics_operator("interf:⋈"));
        assert!(d.is_symatics_operator("logic:⊕"));
        assert!(!d.is_symatics_operator("logic:∧"));
    }
}
