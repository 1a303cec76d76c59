//! Canonicalization and algebraic simplification of instruction trees.

use std::sync::Arc;

use tracing::trace;

use crate::core::ast::{domain_of, Node};
use crate::core::registry::{OperatorRegistry, RegistryTables};

const NOT: &str = "logic:¬";
const XOR: &str = "logic:⊕";
const OR: &str = "logic:∨";
const AND: &str = "logic:∧";

/// Literal produced by `x ⊕ x`.
pub const FALSE_LITERAL: &str = "false";

pub struct Rewriter {
    tables: Arc<RegistryTables>,
    context: Option<String>,
}

impl Rewriter {
    pub fn new(tables: Arc<RegistryTables>, context: Option<&str>) -> Self {
        Self { tables, context: context.map(str::to_string) }
    }

    pub fn from_registry(registry: &OperatorRegistry, context: Option<&str>) -> Self {
        Self::new(registry.snapshot(), context)
    }

    /// Canonicalize every operator, then simplify bottom-up until nothing
    /// changes.
    pub fn rewrite(&self, mut node: Node) -> Node {
        self.canonicalize(&mut node);
        let mut count = 0usize;
        self.simplify(&mut node, &mut count);
        trace!(target: "codexcore::rewriter", rewrites = count, "rewrite finished");
        node
    }

    /// Replace every raw operator symbol with its canonical key. Operators
    /// that already carry a domain prefix are left alone.
    pub fn canonicalize(&self, node: &mut Node) {
        let mut stack = vec![node];
        while let Some(node) = stack.pop() {
            match node {
                Node::Lit { .. } => {}
                Node::Op { op, args } => {
                    if domain_of(op).is_none() {
                        *op = self.tables.resolve(op, self.context.as_deref());
                    }
                    stack.extend(args.iter_mut());
                }
                Node::Program { children } => stack.extend(children.iter_mut()),
            }
        }
    }

    fn simplify(&self, node: &mut Node, count: &mut usize) {
        match node {
            Node::Lit { .. } => return,
            Node::Op { args, .. } => {
                for a in args.iter_mut() {
                    self.simplify(a, count);
                }
            }
            Node::Program { children } => {
                for c in children.iter_mut() {
                    self.simplify(c, count);
                }
                return;
            }
        }
        while let Some(next) = simplify_once(node) {
            *node = next;
            *count += 1;
        }
    }
}

fn simplify_once(node: &Node) -> Option<Node> {
    let Node::Op { op, args } = node else { return None };
    match (op.as_str(), args.as_slice()) {
        (NOT, [Node::Op { op: inner, args: inner_args }]) if inner == NOT && inner_args.len() == 1 => {
            Some(inner_args[0].clone())
        }
        (XOR, [a, b]) if a == b => Some(Node::lit(FALSE_LITERAL)),
        (OR | AND, [a, b]) if a == b => Some(a.clone()),
        _ => None,
    }
}

/// Rewrite with the shared registry.
pub fn rewrite(node: Node, context: Option<&str>) -> Node {
    Rewriter::from_registry(&crate::core::registry::global(), context).rewrite(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_source;

    fn rw(src: &str, ctx: Option<&str>) -> Node {
        Rewriter::new(Arc::new(RegistryTables::defaults()), ctx).rewrite(parse_source(src).unwrap())
    }

    #[test]
    fn double_negation_collapses() {
        assert_eq!(rw("¬¬A", None), Node::lit("A"));
        assert_eq!(rw("!¬A", None), Node::lit("A"));
        assert_eq!(rw("¬¬¬A", None), Node::unary(NOT, Node::lit("A")));
    }

    #[test]
    fn self_xor_is_false() {
        assert_eq!(rw("A ⊕ A", None), Node::lit(FALSE_LITERAL));
        // only after canonicalization: quantum ⊕ is not boolean xor
        assert_eq!(
            rw("A ⊕ A", Some("quantum")),
            Node::binary("quantum:⊕", Node::lit("A"), Node::lit("A"))
        );
    }

    #[test]
    fn idempotent_and_or() {
        assert_eq!(rw("(B ∧ C) ∨ (B ∧ C)", None), Node::binary(AND, Node::lit("B"), Node::lit("C")));
        assert_eq!(rw("¬¬X ∧ X", None), Node::lit("X"));
    }

    #[test]
    fn canonicalizes_inside_programs() {
        assert_eq!(
            rw("A ⊗ B => ⊕_q(C, D)", None),
            Node::program(vec![
                Node::binary("logic:⊗", Node::lit("A"), Node::lit("B")),
                Node::binary("quantum:⊕", Node::lit("C"), Node::lit("D")),
            ])
        );
    }

    #[test]
    fn rewrite_is_idempotent() {
        for src in ["¬¬(A ⊕ A) ∨ B", "⊗(x, y) => ∇(f)", "A -> B"] {
            let once = rw(src, None);
            let twice = Rewriter::new(Arc::new(RegistryTables::defaults()), None).rewrite(once.clone());
            assert_eq!(once, twice, "{src}");
        }
    }
}
