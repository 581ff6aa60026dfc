//! Binding of lambda parameters to resources in the chain.
//!
//! Every reference to the bound parameter becomes an [`Expr::Input`] naming
//! the resource the parameter ranges over. When the resource carries a
//! transparent scope, member accesses through the scope record resolve to
//! the resource each member exposes.

use crate::query::ast::{Expr, InputRef, Lambda, Param, ResourceId};
use crate::query::errors::{CompileError, CompileResult};
use crate::query::resource::ResourceExpr;

/// Replaces references to `param` in `expr` with input references into the
/// chain ending at `current`.
///
/// Each distinct resource referenced, including through input references
/// already present, is appended to `referenced` in first-seen order.
pub fn bind(
    expr: &Expr,
    current: &ResourceExpr,
    param: &Param,
    referenced: &mut Vec<ResourceId>,
) -> Expr {
    InputBinder {
        current,
        param,
        referenced,
    }
    .bind(expr)
}

/// Binds the body of a single-parameter lambda against `current`.
pub fn bind_lambda(
    lambda: &Lambda,
    current: &ResourceExpr,
    referenced: &mut Vec<ResourceId>,
) -> CompileResult<Expr> {
    let param = lambda
        .single_param()
        .ok_or_else(|| CompileError::expression_not_supported(Expr::Lambda(lambda.clone())))?;
    Ok(bind(&lambda.body, current, param, referenced))
}

/// Points every input reference to `from` at `to` instead.
pub fn retarget(expr: &Expr, from: ResourceId, to: &InputRef) -> Expr {
    match expr {
        Expr::Input(input) if input.target == from => {
            let mut input = input.clone();
            input.override_target(to.target, &to.ty);
            Expr::Input(input)
        }
        other => match other.try_map_children::<std::convert::Infallible, _>(|child| {
            Ok(retarget(child, from, to))
        }) {
            Ok(rebuilt) => rebuilt,
            Err(never) => match never {},
        },
    }
}

struct InputBinder<'a> {
    current: &'a ResourceExpr,
    param: &'a Param,
    referenced: &'a mut Vec<ResourceId>,
}

impl InputBinder<'_> {
    fn bind(&mut self, expr: &Expr) -> Expr {
        if let Some(resource) = self.resolve_resource(expr) {
            let input = resource.input_ref();
            self.note(input.target);
            return Expr::Input(input);
        }
        match expr {
            Expr::Input(input) => {
                self.note(input.target);
                expr.clone()
            }
            Expr::Lambda(lambda) if lambda.params.iter().any(|p| p.name == self.param.name) => {
                expr.clone()
            }
            other => match other
                .try_map_children::<std::convert::Infallible, _>(|child| Ok(self.bind(child)))
            {
                Ok(rebuilt) => rebuilt,
                Err(never) => match never {},
            },
        }
    }

    fn note(&mut self, id: ResourceId) {
        if !self.referenced.contains(&id) {
            self.referenced.push(id);
        }
    }

    fn is_param(&self, expr: &Expr) -> bool {
        matches!(expr, Expr::Parameter(p) if p.name == self.param.name)
    }

    /// Resource whose transparent scope record `expr` evaluates to.
    fn scope_of(&self, expr: &Expr) -> Option<&ResourceExpr> {
        match expr {
            Expr::Parameter(p) if self.is_param(expr) => self
                .current
                .transparent_scope
                .as_ref()
                .filter(|scope| scope.matches(&p.ty))
                .map(|_| self.current),
            Expr::Member { expr, name, ty } => {
                let owner = self.scope_of(expr)?;
                let (outer, id) = owner.transparent_scope.as_ref()?.outer.as_ref()?;
                if outer != name {
                    return None;
                }
                let resource = self.current.find(*id)?;
                resource
                    .transparent_scope
                    .as_ref()
                    .filter(|scope| scope.matches(ty))
                    .map(|_| resource)
            }
            _ => None,
        }
    }

    /// Resource whose element `expr` evaluates to.
    fn resolve_resource(&self, expr: &Expr) -> Option<&ResourceExpr> {
        match expr {
            Expr::Parameter(p) if self.is_param(expr) => {
                (p.ty == self.current.element_type).then_some(self.current)
            }
            Expr::Member { expr, name, .. } => {
                let owner = self.scope_of(expr)?;
                let scope = owner.transparent_scope.as_ref()?;
                if &scope.inner == name {
                    return Some(owner);
                }
                let (outer, id) = scope.outer.as_ref()?;
                if outer != name {
                    return None;
                }
                let resource = self.current.find(*id)?;
                resource.transparent_scope.is_none().then_some(resource)
            }
            _ => None,
        }
    }
}
