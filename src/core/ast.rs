// src/core/ast.rs
//! Instruction tree produced by the CodexLang parser and consumed by the
//! rewriter and executor.
//!
//! Trees are plain owned values: the rewriter mutates them in place and the
//! executor only reads them, so no subtree is ever shared between two
//! evaluations.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::core::error::TreeError;
use crate::core::lexer::is_bare_literal;

/// Default bound on tree height and on source nesting.
pub const MAX_DEPTH: usize = 256;

/// One node of an instruction tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Node {
    /// Leaf value, always carried as its source text.
    Lit { value: String },
    /// Operator application. `op` is a raw symbol until the rewriter has
    /// replaced it with a canonical `domain:symbol` key.
    Op { op: String, args: Vec<Node> },
    /// Top-level sequence (`a => b => c`).
    Program { children: Vec<Node> },
}

impl Node {
    // Utility constructors
    pub fn lit(value: impl Into<String>) -> Self {
        Node::Lit { value: value.into() }
    }
    pub fn op(op: impl Into<String>, args: Vec<Node>) -> Self {
        Node::Op { op: op.into(), args }
    }
    pub fn binary(op: impl Into<String>, left: Node, right: Node) -> Self {
        Node::Op { op: op.into(), args: vec![left, right] }
    }
    pub fn unary(op: impl Into<String>, arg: Node) -> Self {
        Node::Op { op: op.into(), args: vec![arg] }
    }
    pub fn program(children: Vec<Node>) -> Self {
        Node::Program { children }
    }

    /// `"lit"`, `"op"` or `"program"`.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Node::Lit { .. } => "lit",
            Node::Op { .. } => "op",
            Node::Program { .. } => "program",
        }
    }

    pub fn op_symbol(&self) -> Option<&str> {
        match self {
            Node::Op { op, .. } => Some(op),
            _ => None,
        }
    }

    /// Domain prefix of the node's operator when it is a canonical key.
    pub fn domain(&self) -> Option<&str> {
        self.op_symbol().and_then(domain_of)
    }

    pub fn is_empty_program(&self) -> bool {
        matches!(self, Node::Program { children } if children.is_empty())
    }

    /// Height of the tree: 1 for a literal or an empty application. Walks
    /// with an explicit stack so arbitrarily deep trees can be measured.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(self, 1usize)];
        while let Some((node, level)) = stack.pop() {
            deepest = deepest.max(level);
            let children = match node {
                Node::Lit { .. } => continue,
                Node::Op { args, .. } => args,
                Node::Program { children } => children,
            };
            stack.extend(children.iter().map(|c| (c, level + 1)));
        }
        deepest
    }

    /// Render the tree as CodexLang source that parses back to the same tree.
    ///
    /// Applications are always written in function form, so no precedence or
    /// associativity information is needed to read them back.
    pub fn to_codexlang(&self) -> String {
        match self {
            Node::Lit { value } => {
                if is_bare_literal(value) {
                    value.clone()
                } else {
                    quote(value)
                }
            }
            Node::Op { op, args } => {
                let inner: Vec<String> = args.iter().map(Node::to_codexlang).collect();
                format!("{}({})", op, inner.join(", "))
            }
            Node::Program { children } => children
                .iter()
                .map(Node::to_codexlang)
                .collect::<Vec<_>>()
                .join(" => "),
        }
    }

    /// Compact JSON shape: literals as strings, applications as
    /// `{op, args}`, programs as `{kind: "program", children}`.
    pub fn to_value(&self) -> Value {
        match self {
            Node::Lit { value } => Value::String(value.clone()),
            Node::Op { op, args } => json!({
                "op": op,
                "args": args.iter().map(Node::to_value).collect::<Vec<_>>(),
            }),
            Node::Program { children } => json!({
                "kind": "program",
                "children": children.iter().map(Node::to_value).collect::<Vec<_>>(),
            }),
        }
    }

    /// Build a tree from an untyped JSON value.
    ///
    /// Accepts the compact shape written by [`Node::to_value`], the tagged
    /// shape (`{kind: "lit" | "op" | "program", ...}`) and bare scalars as
    /// literals.
    pub fn from_value(value: &Value) -> Result<Node, TreeError> {
        Self::from_value_with_depth(value, MAX_DEPTH)
    }

    /// Like [`Node::from_value`], rejecting values nested deeper than
    /// `max_depth`.
    pub fn from_value_with_depth(value: &Value, max_depth: usize) -> Result<Node, TreeError> {
        Decoder { max_depth }.node(value, "root", 1)
    }
}

/// `"logic"` for `"logic:⊕"`; `None` when the symbol is not a canonical key.
pub fn domain_of(op: &str) -> Option<&str> {
    let (domain, symbol) = op.split_once(':')?;
    if domain.is_empty() || symbol.is_empty() {
        return None;
    }
    if !domain.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
        return None;
    }
    Some(domain)
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

struct Decoder {
    max_depth: usize,
}

impl Decoder {
    fn node(&self, value: &Value, path: &str, level: usize) -> Result<Node, TreeError> {
        if level > self.max_depth {
            return Err(TreeError::new(path, format!("nesting too deep (limit {})", self.max_depth)));
        }
        match value {
            Value::String(s) => Ok(Node::lit(s.clone())),
            Value::Number(n) => Ok(Node::lit(n.to_string())),
            Value::Bool(b) => Ok(Node::lit(b.to_string())),
            Value::Null => Err(TreeError::new(path, "expected dict, got null")),
            Value::Array(_) => Err(TreeError::new(path, "expected dict, got list")),
            Value::Object(obj) => match obj.get("kind") {
                Some(Value::String(kind)) => match kind.as_str() {
                    "lit" => match obj.get("value") {
                        Some(Value::String(s)) => Ok(Node::lit(s.clone())),
                        Some(v @ (Value::Number(_) | Value::Bool(_))) => self.node(v, path, level),
                        Some(other) => Err(TreeError::new(
                            path,
                            format!("literal value must be a string, got {}", describe(other)),
                        )),
                        None => Err(TreeError::new(path, "literal is missing 'value'")),
                    },
                    "op" => self.op(obj, path, level),
                    "program" => self.program(obj, path, level),
                    other => Err(TreeError::new(path, format!("unknown node kind '{}'", other))),
                },
                Some(other) => Err(TreeError::new(
                    path,
                    format!("'kind' must be a string, got {}", describe(other)),
                )),
                None if obj.contains_key("op") => self.op(obj, path, level),
                None if obj.contains_key("children") || obj.contains_key("program") => {
                    self.program(obj, path, level)
                }
                None => Err(TreeError::new(path, "missing 'op'")),
            },
        }
    }

    fn op(&self, obj: &Map<String, Value>, path: &str, level: usize) -> Result<Node, TreeError> {
        let op = match obj.get("op") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            Some(Value::String(_)) => return Err(TreeError::new(path, "'op' is empty")),
            Some(Value::Null) => return Err(TreeError::new(path, "'op' is None")),
            Some(other) => {
                return Err(TreeError::new(
                    path,
                    format!("'op' must be a string, got {}", describe(other)),
                ))
            }
            None => return Err(TreeError::new(path, "missing 'op'")),
        };
        let args = match obj.get("args") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, v)| self.node(v, &format!("{}.args[{}]", path, i), level + 1))
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => {
                return Err(TreeError::new(
                    path,
                    format!("'args' must be a list, got {}", describe(other)),
                ))
            }
        };
        Ok(Node::Op { op, args })
    }

    fn program(&self, obj: &Map<String, Value>, path: &str, level: usize) -> Result<Node, TreeError> {
        let items = match obj.get("children").or_else(|| obj.get("program")) {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(TreeError::new(
                    path,
                    format!("program children must be a list, got {}", describe(other)),
                ))
            }
            None => return Err(TreeError::new(path, "program is missing 'children'")),
        };
        let children = items
            .iter()
            .enumerate()
            .map(|(i, v)| self.node(v, &format!("{}.children[{}]", path, i), level + 1))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Node::Program { children })
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Node::from_value(&value).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_codexlang())
    }
}
