//! Expression normalization ahead of binding.
//!
//! Rewrites comparison idioms the wire protocol cannot express directly into
//! plain operators and records every rewrite so a materializer can map
//! generated nodes back to what the caller wrote.

use serde::Serialize;
use tracing::trace;

use crate::query::ast::{BinaryOp, Expr, UnaryOp};
use crate::query::value::Value;

/// Generated → original pairs in the order the rewrites happened.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct NormalizerRewrites {
    entries: Vec<(Expr, Expr)>,
}

impl NormalizerRewrites {
    /// Original expression a generated node replaced.
    pub fn get(&self, generated: &Expr) -> Option<&Expr> {
        self.entries
            .iter()
            .find(|(g, _)| g == generated)
            .map(|(_, original)| original)
    }

    /// Number of recorded rewrites.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was rewritten.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(generated, original)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = &(Expr, Expr)> {
        self.entries.iter()
    }

    fn record(&mut self, generated: &Expr, original: &Expr) {
        trace!(original = %original, generated = %generated, "normalized expression");
        self.entries.push((generated.clone(), original.clone()));
    }
}

/// Normalizes `expr`, appending each rewrite to `rewrites`.
pub fn normalize(expr: &Expr, rewrites: &mut NormalizerRewrites) -> Expr {
    let rebuilt = match expr.try_map_children::<std::convert::Infallible, _>(|child| {
        Ok(normalize(child, rewrites))
    }) {
        Ok(rebuilt) => rebuilt,
        Err(never) => match never {},
    };
    match rewrite(&rebuilt) {
        Some(generated) => {
            rewrites.record(&generated, expr);
            // A rewrite can expose another (`!(x == false)` → `!!x` → `x`).
            match rewrite(&generated) {
                Some(again) => {
                    rewrites.record(&again, &generated);
                    again
                }
                None => generated,
            }
        }
        None => rebuilt,
    }
}

fn rewrite(expr: &Expr) -> Option<Expr> {
    match expr {
        Expr::Unary {
            op: UnaryOp::Not,
            operand,
            ..
        } => match operand.as_ref() {
            Expr::Unary {
                op: UnaryOp::Not,
                operand: inner,
                ..
            } => Some(inner.as_ref().clone()),
            _ => None,
        },
        Expr::Binary { op, left, right } if op.is_comparison() => {
            compare_call(*op, left, right).or_else(|| bool_literal(*op, left, right))
        }
        _ => None,
    }
}

/// `Compare(a, b) op 0` or `a.CompareTo(b) op 0` → `a op b`.
fn compare_call(op: BinaryOp, left: &Expr, right: &Expr) -> Option<Expr> {
    if right.as_constant().and_then(Value::as_i64) != Some(0) {
        return None;
    }
    let (a, b) = match left {
        Expr::Call {
            object: None,
            method,
            args,
            ..
        } if method == "Compare" && args.len() == 2 => (&args[0], &args[1]),
        Expr::Call {
            object: Some(object),
            method,
            args,
            ..
        } if method == "CompareTo" && args.len() == 1 => (object.as_ref(), &args[0]),
        _ => return None,
    };
    Some(Expr::binary(op, a.clone(), b.clone()))
}

/// `x == true` → `x`, `x == false` → `!x` and the `!=` duals.
fn bool_literal(op: BinaryOp, left: &Expr, right: &Expr) -> Option<Expr> {
    if !matches!(op, BinaryOp::Equal | BinaryOp::NotEqual) {
        return None;
    }
    let (operand, literal) = match (left.as_constant(), right.as_constant()) {
        (_, Some(Value::Bool(b))) => (left, *b),
        (Some(Value::Bool(b)), _) => (right, *b),
        _ => return None,
    };
    if operand.as_constant().is_some() {
        return None;
    }
    let keep = (op == BinaryOp::Equal) == literal;
    Some(if keep {
        operand.clone()
    } else {
        operand.clone().logical_not()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::value::Ty;

    fn name() -> Expr {
        Expr::param("p", Ty::entity("Product")).member("Name", Ty::String)
    }

    fn flag() -> Expr {
        Expr::param("p", Ty::entity("Product")).member("Discontinued", Ty::Bool)
    }

    #[test]
    fn compare_call_becomes_operator() {
        let expr = Expr::call("Compare", vec![name(), Expr::constant("M")], Ty::Int32)
            .greater_than(Expr::constant(0));
        let mut rewrites = NormalizerRewrites::default();
        let normalized = normalize(&expr, &mut rewrites);
        let expected = name().greater_than(Expr::constant("M"));
        assert_eq!(normalized, expected);
        assert_eq!(rewrites.get(&expected), Some(&expr));
    }

    #[test]
    fn compare_to_becomes_operator() {
        let expr = name()
            .method("CompareTo", vec![Expr::constant("M")], Ty::Int32)
            .less_or_equal(Expr::constant(0));
        let mut rewrites = NormalizerRewrites::default();
        assert_eq!(
            normalize(&expr, &mut rewrites),
            name().less_or_equal(Expr::constant("M"))
        );
        assert_eq!(rewrites.len(), 1);
    }

    #[test]
    fn boolean_literal_comparisons_fold() {
        let mut rewrites = NormalizerRewrites::default();
        assert_eq!(
            normalize(&flag().equal(Expr::constant(true)), &mut rewrites),
            flag()
        );
        assert_eq!(
            normalize(&flag().equal(Expr::constant(false)), &mut rewrites),
            flag().logical_not()
        );
        assert_eq!(
            normalize(&Expr::constant(true).not_equal(flag()), &mut rewrites),
            flag().logical_not()
        );
    }

    #[test]
    fn exposed_double_negation_is_removed() {
        let expr = flag().equal(Expr::constant(false)).logical_not();
        let mut rewrites = NormalizerRewrites::default();
        assert_eq!(normalize(&expr, &mut rewrites), flag());
        assert_eq!(rewrites.len(), 2);
    }

    #[test]
    fn plain_trees_are_untouched() {
        let expr = name().equal(Expr::constant("x"));
        let mut rewrites = NormalizerRewrites::default();
        assert_eq!(normalize(&expr, &mut rewrites), expr);
        assert!(rewrites.is_empty());
    }
}
