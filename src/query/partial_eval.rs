//! Partial evaluation ("funcletization") of closed subtrees.
//!
//! Pass one nominates every node whose whole subtree is evaluable locally;
//! pass two walks top-down and replaces the first nominated node on each
//! path with the constant it computes. Lambda parameters, lambdas, resource
//! roots and input references are never nominated by the default predicate,
//! so they always reach the binder.

use tracing::trace;

use crate::query::ast::Expr;
use crate::query::eval::{evaluate, EvalResult};

/// Default nomination predicate.
pub fn is_evaluable(expr: &Expr) -> bool {
    !matches!(
        expr,
        Expr::Parameter(_) | Expr::Lambda(_) | Expr::Root(_) | Expr::Input(_)
    )
}

/// Reduces closed subtrees of `expr` with the default predicate.
pub fn partially_evaluate(expr: &Expr) -> EvalResult<Expr> {
    partially_evaluate_with(expr, &is_evaluable)
}

/// Reduces closed subtrees of `expr`; a node is closed when it and all of its
/// descendants satisfy `is_evaluable`.
pub fn partially_evaluate_with(expr: &Expr, is_evaluable: &dyn Fn(&Expr) -> bool) -> EvalResult<Expr> {
    let nominated = nominate(expr, is_evaluable);
    reduce(expr, &nominated)
}

/// Nomination result mirroring the shape of the expression tree.
struct Candidate {
    closed: bool,
    children: Vec<Candidate>,
}

fn nominate(expr: &Expr, is_evaluable: &dyn Fn(&Expr) -> bool) -> Candidate {
    let children: Vec<Candidate> = expr
        .children()
        .into_iter()
        .map(|child| nominate(child, is_evaluable))
        .collect();
    let closed = is_evaluable(expr) && children.iter().all(|child| child.closed);
    Candidate { closed, children }
}

fn reduce(expr: &Expr, candidate: &Candidate) -> EvalResult<Expr> {
    if candidate.closed {
        if matches!(expr, Expr::Constant { .. }) {
            return Ok(expr.clone());
        }
        let value = evaluate(expr)?;
        trace!(expr = %expr, value = %value, "reduced closed subtree");
        return Ok(Expr::Constant { value });
    }
    let mut nominated = candidate.children.iter();
    expr.try_map_children(|child| match nominated.next() {
        Some(candidate) => reduce(child, candidate),
        None => Ok(child.clone()),
    })
}
