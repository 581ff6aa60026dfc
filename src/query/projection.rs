//! Projection analysis: transparent-scope rewriting, `$select`/`$expand`
//! path collection, and composition of consecutive projections.

use crate::query::ast::{Expr, Lambda, Param};
use crate::query::errors::{CompileError, CompileResult};
use crate::query::metadata::MetadataProvider;
use crate::query::path::{self, PathSegmentToken};
use crate::query::resource::ResourceExpr;
use crate::query::value::Ty;

/// Retargets a projection written against a transparent scope record onto
/// the element type of `source`.
///
/// Applies only when the lambda has one non-entity parameter whose type
/// exposes a member of `source`'s element type; otherwise the lambda is
/// returned unchanged. When it applies, every use of the old parameter must
/// be that member, or the rewrite fails with
/// [`CompileError::LeafOnlyProjection`].
pub fn try_rewrite(lambda: &Lambda, source: &ResourceExpr) -> CompileResult<Lambda> {
    let Some(param) = lambda.single_param() else {
        return Ok(lambda.clone());
    };
    if param.ty.is_entity() {
        return Ok(lambda.clone());
    }
    let Some(record) = param.ty.as_record() else {
        return Ok(lambda.clone());
    };
    let preferred = source
        .transparent_scope
        .as_ref()
        .filter(|scope| scope.matches(&param.ty))
        .map(|scope| scope.inner.as_str());
    let accessor = record
        .fields
        .iter()
        .filter(|(_, ty)| *ty == source.element_type)
        .map(|(name, _)| name.as_str())
        .find(|name| preferred.map_or(true, |preferred| preferred == *name));
    let Some(accessor) = accessor else {
        return Ok(lambda.clone());
    };
    let replacement = Param::new(accessor, source.element_type.clone());
    let body = rewrite_accessor(&lambda.body, param, accessor, &replacement).ok_or_else(|| {
        CompileError::LeafOnlyProjection {
            expr: Expr::Lambda(lambda.clone()).to_string(),
        }
    })?;
    Ok(Lambda::new(vec![replacement], body))
}

fn rewrite_accessor(expr: &Expr, old: &Param, accessor: &str, new: &Param) -> Option<Expr> {
    match expr {
        Expr::Member { expr: inner, name, .. }
            if name == accessor
                && matches!(inner.as_ref(), Expr::Parameter(p) if p.name == old.name) =>
        {
            Some(new.to_expr())
        }
        Expr::Parameter(p) if p.name == old.name => None,
        Expr::Lambda(lambda) if lambda.params.iter().any(|p| p.name == old.name) => {
            Some(expr.clone())
        }
        other => other
            .try_map_children(|child| rewrite_accessor(child, old, accessor, new).ok_or(()))
            .ok(),
    }
}

/// Wire paths a projection needs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProjectionPaths {
    /// `$select` items; empty when the whole element is used.
    pub select: Vec<String>,
    /// `$expand` items.
    pub expand: Vec<String>,
}

/// Collects the properties `lambda` reads off its parameter.
pub fn collect_paths(
    lambda: &Lambda,
    element_type: &Ty,
    metadata: &dyn MetadataProvider,
) -> CompileResult<ProjectionPaths> {
    let param = lambda
        .single_param()
        .ok_or_else(|| CompileError::expression_not_supported(Expr::Lambda(lambda.clone())))?;
    let mut chains = Vec::new();
    let mut whole_element = false;
    collect_chains(&lambda.body, param, &mut chains, &mut whole_element);

    let mut paths = ProjectionPaths::default();
    for names in chains {
        let Some(chain) = classify(&names, element_type, metadata)? else {
            continue;
        };
        let structural_head = matches!(
            &chain,
            PathSegmentToken::NonSystem(token) if token.is_structural_property
        );
        if structural_head {
            let prefix: Vec<_> = structural_prefix(&chain);
            push_unique(&mut paths.select, prefix.join("/"));
        } else {
            push_unique(&mut paths.expand, path::select_expand_string(&chain)?);
        }
    }
    if whole_element {
        paths.select.clear();
    }
    Ok(paths)
}

fn push_unique(items: &mut Vec<String>, item: String) {
    if !items.contains(&item) {
        items.push(item);
    }
}

fn structural_prefix(chain: &PathSegmentToken) -> Vec<&str> {
    let mut out = Vec::new();
    let mut cursor = Some(chain);
    while let Some(PathSegmentToken::NonSystem(token)) = cursor {
        if !token.is_structural_property {
            break;
        }
        out.push(token.identifier.as_str());
        cursor = token.next.as_deref();
    }
    out
}

/// Maximal member chains rooted at `param`, root-first.
fn collect_chains(expr: &Expr, param: &Param, out: &mut Vec<Vec<String>>, whole: &mut bool) {
    if let Some((Expr::Parameter(root), names)) = expr.member_chain() {
        if root.name == param.name {
            if names.is_empty() {
                *whole = true;
            } else {
                out.push(names.into_iter().map(str::to_string).collect());
            }
            return;
        }
    }
    if let Expr::Lambda(lambda) = expr {
        if lambda.params.iter().any(|p| p.name == param.name) {
            return;
        }
    }
    for child in expr.children() {
        collect_chains(child, param, out, whole);
    }
}

/// Links member names into a token chain, stopping at the first member read
/// off a primitive value (`Name.Length`).
fn classify(
    names: &[String],
    element_type: &Ty,
    metadata: &dyn MetadataProvider,
) -> CompileResult<Option<PathSegmentToken>> {
    let mut owner = element_type.clone();
    let mut segments = Vec::new();
    for name in names {
        let structured = match owner.non_nullable() {
            Ty::Collection(inner) => inner.non_nullable().clone(),
            other => other.clone(),
        };
        if !matches!(structured, Ty::Entity(_) | Ty::Complex(_)) {
            break;
        }
        let property = metadata.member(&structured, name)?;
        segments.push((name.clone(), !property.navigation));
        owner = property.ty;
    }
    Ok(PathSegmentToken::from_segments(segments))
}

/// Composes `Select(first).Select(second)` into one projection over the
/// parameter of `first`.
pub fn compose(first: &Lambda, second: &Lambda) -> CompileResult<Lambda> {
    let inner = second
        .single_param()
        .ok_or_else(|| CompileError::expression_not_supported(Expr::Lambda(second.clone())))?;
    let body = substitute(&second.body, inner, &first.body);
    Ok(Lambda {
        params: first.params.clone(),
        body: Box::new(body),
    })
}

fn substitute(expr: &Expr, param: &Param, replacement: &Expr) -> Expr {
    match expr {
        Expr::Parameter(p) if p.name == param.name => replacement.clone(),
        Expr::Lambda(lambda) if lambda.params.iter().any(|p| p.name == param.name) => expr.clone(),
        Expr::Member { expr: inner, name, ty } => {
            let inner = substitute(inner, param, replacement);
            constructed_member(&inner, name).unwrap_or(Expr::Member {
                expr: Box::new(inner),
                name: name.clone(),
                ty: ty.clone(),
            })
        }
        other => match other.try_map_children::<std::convert::Infallible, _>(|child| {
            Ok(substitute(child, param, replacement))
        }) {
            Ok(rebuilt) => rebuilt,
            Err(never) => match never {},
        },
    }
}

fn constructed_member(expr: &Expr, name: &str) -> Option<Expr> {
    match expr {
        Expr::New { members, .. } => members
            .iter()
            .find(|(member, _)| member == name)
            .map(|(_, value)| value.clone()),
        Expr::MemberInit { bindings, .. } => bindings
            .iter()
            .find(|binding| binding.member == name)
            .map(|binding| binding.expr.clone()),
        _ => None,
    }
}
