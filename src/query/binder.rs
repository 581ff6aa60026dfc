//! Folds the front-end operator chain into a bound resource chain.
//!
//! The binder walks the call tree source-first: each recognized sequence
//! operator binds its source to a [`ResourceExpr`], binds its lambda against
//! that resource through the input binder, and merges the resulting clause
//! into the resource. Terminal operators (`Count`, `First`, aggregates) are
//! only recognized at the top of the tree.

use std::rc::Rc;

use tracing::debug;

use crate::query::ast::{BinaryOp, Expr, Lambda, Param, ResourceId, ResourceRoot, RootKind};
use crate::query::errors::{CompileError, CompileResult};
use crate::query::group_by;
use crate::query::input_binder;
use crate::query::metadata::{MetadataProvider, PropertyDef};
use crate::query::normalize::NormalizerRewrites;
use crate::query::options::{
    ApplyState, CountOption, FilterOption, OrderByOption, OrderSelector, ProjectionOption,
    QueryOption, SkipOption, TakeOption,
};
use crate::query::path::{self, PathSegmentToken, WILDCARD};
use crate::query::projection;
use crate::query::resource::{ResourceExpr, TransparentScope};
use crate::query::value::{Ty, Value};

/// Bound form of a whole query.
#[derive(Clone, Debug)]
pub struct BoundQuery {
    /// Leaf of the resource chain.
    pub resource: ResourceExpr,
    /// Client-side projector: the `Select` selector or the group result selector.
    pub projector: Option<Lambda>,
    /// `Some(true)` for terminal operators that yield one value.
    pub single_result: Option<bool>,
    /// Type of each returned element, or of the single returned value.
    pub element_type: Ty,
    /// Rewrites recorded while normalizing the tree.
    pub rewrites: NormalizerRewrites,
}

/// Resource binder for one compilation.
pub struct ResourceBinder<'a> {
    metadata: &'a dyn MetadataProvider,
    next_id: u32,
}

impl<'a> ResourceBinder<'a> {
    /// Creates a binder resolving types through `metadata`.
    pub fn new(metadata: &'a dyn MetadataProvider) -> Self {
        Self {
            metadata,
            next_id: 0,
        }
    }

    /// Binds a complete query, including a terminal operator at its top.
    pub fn bind_query(&mut self, expr: &Expr) -> CompileResult<BoundQuery> {
        if let Expr::Call {
            object: None,
            method,
            args,
            ty,
        } = expr
        {
            match method.as_str() {
                "Count" | "LongCount" => return self.bind_count(method, args, ty),
                "First" | "FirstOrDefault" | "Single" | "SingleOrDefault" => {
                    return self.bind_first(method, args)
                }
                "Sum" | "Average" | "Min" | "Max" | "CountDistinct" => {
                    return self.bind_aggregate(method, args, ty)
                }
                _ => {}
            }
        }
        let resource = self.bind(expr)?;
        Ok(finish(resource, None, None))
    }

    /// Binds a sequence-valued expression to its resource chain leaf.
    pub fn bind(&mut self, expr: &Expr) -> CompileResult<ResourceExpr> {
        match expr {
            Expr::Root(root) => self.bind_root(root),
            Expr::Call {
                object: None,
                method,
                args,
                ..
            } if !args.is_empty() => {
                let source = self.bind(&args[0])?;
                if source.is_action() {
                    return Err(CompileError::NotComposable {
                        name: source.name.clone(),
                        method: method.clone(),
                    });
                }
                let rest = &args[1..];
                let bound = match (method.as_str(), rest) {
                    ("Where", [predicate]) => self.bind_where(source, predicate)?,
                    ("OrderBy", [key]) => self.bind_order(source, method, key, false, false)?,
                    ("OrderByDescending", [key]) => {
                        self.bind_order(source, method, key, true, false)?
                    }
                    ("ThenBy", [key]) => self.bind_order(source, method, key, false, true)?,
                    ("ThenByDescending", [key]) => {
                        self.bind_order(source, method, key, true, true)?
                    }
                    ("Skip", [count]) => self.bind_skip(source, count)?,
                    ("Take", [count]) => self.bind_take(source, count)?,
                    ("Select", [selector]) => self.bind_select(source, selector)?,
                    ("SelectMany", [selector]) => self.bind_select_many(source, selector, None)?,
                    ("SelectMany", [selector, result]) => {
                        self.bind_select_many(source, selector, Some(result))?
                    }
                    ("GroupBy", selectors) if (1..=3).contains(&selectors.len()) => {
                        self.bind_group_by(source, selectors)?
                    }
                    ("Expand", [path]) => self.bind_expand(source, path)?,
                    ("AddQueryOption", [name, value]) => {
                        self.bind_custom_option(source, name, value)?
                    }
                    ("IncludeCount", []) => bind_include_count(source, None)?,
                    ("IncludeCount", [flag]) => bind_include_count(source, Some(flag))?,
                    _ => return Err(CompileError::method_not_supported(method.clone())),
                };
                debug!(method = %method, resource = %bound.name, "folded operator");
                Ok(bound)
            }
            Expr::Call { method, .. } => Err(CompileError::method_not_supported(method.clone())),
            other => Err(CompileError::NotAResource {
                expr: other.to_string(),
            }),
        }
    }

    fn fresh_id(&mut self) -> ResourceId {
        let id = ResourceId(self.next_id);
        self.next_id += 1;
        id
    }

    fn bind_root(&mut self, root: &ResourceRoot) -> CompileResult<ResourceExpr> {
        match &root.kind {
            RootKind::EntitySet => {
                self.metadata.entity_set_type(&root.name)?;
            }
            RootKind::Singleton => {
                self.metadata.singleton_type(&root.name)?;
            }
            RootKind::Function { .. } | RootKind::Action { .. } => {}
        }
        let id = self.fresh_id();
        debug!(root = %root.name, id = id.0, "bound resource root");
        Ok(ResourceExpr::root(
            id,
            root.name.clone(),
            root.kind.clone(),
            root.element_type.clone(),
        ))
    }

    /// Replaces `resource` by an updated copy with a new identity, pointing
    /// every bound option expression at the new resource.
    fn rebuild(
        &mut self,
        resource: ResourceExpr,
        update: impl FnOnce(ResourceExpr) -> ResourceExpr,
    ) -> ResourceExpr {
        let old = resource.id;
        let mut rebuilt = update(resource);
        rebuilt.id = self.fresh_id();
        let target = rebuilt.input_ref();
        let retarget = |expr: &Expr| input_binder::retarget(expr, old, &target);
        for option in &mut rebuilt.sequence_options {
            match option {
                QueryOption::Filter(filter) => {
                    filter.predicates = filter.predicates.iter().map(retarget).collect();
                }
                QueryOption::OrderBy(order) => {
                    for selector in &mut order.selectors {
                        selector.expr = retarget(&selector.expr);
                    }
                }
                _ => {}
            }
        }
        rebuilt.key_filter = rebuilt.key_filter.as_ref().map(retarget);
        if let Some(apply) = rebuilt.apply.as_mut() {
            apply.predicates = apply.predicates.iter().map(retarget).collect();
            apply.grouping_expressions = apply.grouping_expressions.iter().map(retarget).collect();
        }
        rebuilt
    }

    fn bind_where(&mut self, resource: ResourceExpr, predicate: &Expr) -> CompileResult<ResourceExpr> {
        let resource = resource.demote_key_predicate();
        let bound = filter_predicate(&resource, predicate)?;
        if let Some(keys) = self.key_predicate(&resource, &bound)? {
            debug!(resource = %resource.name, keys = keys.len(), "filter became key predicate");
            return Ok(self.rebuild(resource, |resource| resource.with_key_filter(keys, bound)));
        }
        Ok(with_filter(resource, bound))
    }

    /// `Where` whose predicate always stays a `$filter`.
    fn bind_filter(&mut self, resource: ResourceExpr, predicate: &Expr) -> CompileResult<ResourceExpr> {
        let resource = resource.demote_key_predicate();
        let bound = filter_predicate(&resource, predicate)?;
        Ok(with_filter(resource, bound))
    }

    /// Key values when `predicate` is an equality conjunction over exactly
    /// the entity keys of an otherwise unrestricted set.
    fn key_predicate(
        &self,
        resource: &ResourceExpr,
        predicate: &Expr,
    ) -> CompileResult<Option<Vec<(String, Value)>>> {
        let Ty::Entity(entity) = &resource.element_type else {
            return Ok(None);
        };
        if !resource.is_queryable_set()
            || !resource.sequence_options.is_empty()
            || resource.projection.is_some()
            || resource.apply.is_some()
        {
            return Ok(None);
        }
        let keys = self.metadata.key_properties(entity)?;
        let mut found: Vec<(String, Value)> = Vec::new();
        for conjunct in conjuncts(predicate) {
            let Some((name, value)) = key_comparison(conjunct, resource.id) else {
                return Ok(None);
            };
            if !keys.contains(&name) || found.iter().any(|(key, _)| *key == name) {
                return Ok(None);
            }
            found.push((name, value));
        }
        if found.len() != keys.len() {
            return Ok(None);
        }
        found.sort_by_key(|(name, _)| keys.iter().position(|key| key == name));
        Ok(Some(found))
    }

    fn bind_order(
        &mut self,
        resource: ResourceExpr,
        method: &str,
        key: &Expr,
        descending: bool,
        then_by: bool,
    ) -> CompileResult<ResourceExpr> {
        let resource = resource.demote_key_predicate();
        ensure_collection(&resource, method)?;
        ensure_not_after(&resource, method, &["Skip", "Take", "Select", "GroupBy"])?;
        let lambda = lambda_arg(key)?;
        let selector = OrderSelector {
            expr: bind_single_resource(lambda, &resource, "orderby")?,
            descending,
        };
        let order = match (then_by, resource.order_by()) {
            (true, Some(existing)) => existing.clone().then_by(selector),
            (true, None) => return Err(CompileError::method_not_supported(method)),
            (false, _) => OrderByOption {
                selectors: vec![selector],
            },
        };
        Ok(resource.with_sequence_option(QueryOption::OrderBy(order)))
    }

    fn bind_skip(&mut self, resource: ResourceExpr, count: &Expr) -> CompileResult<ResourceExpr> {
        let resource = resource.demote_key_predicate();
        ensure_collection(&resource, "Skip")?;
        ensure_not_after(&resource, "Skip", &["Take"])?;
        let count = count_arg("Skip", count)?;
        Ok(resource.with_sequence_option(QueryOption::Skip(SkipOption { count })))
    }

    fn bind_take(&mut self, resource: ResourceExpr, count: &Expr) -> CompileResult<ResourceExpr> {
        let resource = resource.demote_key_predicate();
        ensure_collection(&resource, "Take")?;
        let count = count_arg("Take", count)?;
        Ok(resource.with_sequence_option(QueryOption::Take(TakeOption { count })))
    }

    fn bind_select(&mut self, resource: ResourceExpr, selector: &Expr) -> CompileResult<ResourceExpr> {
        let lambda = lambda_arg(selector)?;
        if let Some(apply) = resource.apply.as_ref() {
            if apply.result_selector.is_some() {
                return Err(CompileError::unsupported_after("Select", "GroupBy"));
            }
            let group = lambda
                .single_param()
                .ok_or_else(|| CompileError::expression_not_supported(selector))?;
            let mut apply = apply.clone();
            group_by::analyze_result_selector(&resource, &mut apply, lambda, group)?;
            return Ok(resource.with_apply(apply));
        }
        if lambda.is_identity() {
            return Ok(resource);
        }
        if resource.is_single() && resource.projection.is_none() {
            if let Some(props) = self.navigation_properties(lambda, &resource)? {
                if props.iter().all(|prop| prop.ty.element_type().is_none()) {
                    return self.navigate(resource, &props, "Select");
                }
            }
        }
        let rewritten = projection::try_rewrite(lambda, &resource)?;
        let selector = match &resource.projection {
            Some(previous) => projection::compose(&previous.selector, &rewritten)?,
            None => rewritten,
        };
        let paths = projection::collect_paths(&selector, &resource.element_type, self.metadata)?;
        let mut resource = resource.with_projection(ProjectionOption {
            selector,
            paths: paths.select,
        });
        for expand in paths.expand {
            resource = resource.with_expand_path(expand);
        }
        Ok(resource)
    }

    fn bind_select_many(
        &mut self,
        resource: ResourceExpr,
        selector: &Expr,
        result: Option<&Expr>,
    ) -> CompileResult<ResourceExpr> {
        let lambda = lambda_arg(selector)?;
        let props = self
            .navigation_properties(lambda, &resource)?
            .filter(|props| is_collection_navigation(props))
            .ok_or_else(|| CompileError::expression_not_supported(selector))?;
        let outer_id = resource.id;
        let navigation = self.navigate(resource, &props, "SelectMany")?;
        let Some(result) = result else {
            return Ok(navigation);
        };
        let result_lambda = lambda_arg(result)?;
        if let [_, inner] = result_lambda.params.as_slice() {
            if matches!(result_lambda.body.as_ref(), Expr::Parameter(p) if p.name == inner.name) {
                return Ok(navigation);
            }
        }
        let scope = transparent_scope(result_lambda, outer_id)
            .ok_or_else(|| CompileError::expression_not_supported(result))?;
        debug!(inner = %scope.inner, "attached transparent scope");
        Ok(navigation.with_transparent_scope(scope))
    }

    fn bind_group_by(
        &mut self,
        resource: ResourceExpr,
        selectors: &[Expr],
    ) -> CompileResult<ResourceExpr> {
        let resource = resource.demote_key_predicate();
        ensure_collection(&resource, "GroupBy")?;
        ensure_not_after(
            &resource,
            "GroupBy",
            &["Skip", "Take", "OrderBy", "Select", "GroupBy"],
        )?;
        let lambdas = selectors
            .iter()
            .map(lambda_arg)
            .collect::<CompileResult<Vec<_>>>()?;
        let (key, element, result) = match lambdas.as_slice() {
            [key] => (*key, None, None),
            [key, other] if other.params.len() == 2 => (*key, None, Some(*other)),
            [key, element] => (*key, Some(*element), None),
            [key, element, result] => (*key, Some(*element), Some(*result)),
            _ => return Err(CompileError::method_not_supported("GroupBy")),
        };
        let (resource, filter) = resource.take_filter();
        let mut apply = ApplyState::default();
        if let Some(filter) = filter {
            apply.predicates = filter.predicates;
        }
        group_by::analyze_key_selector(&resource, &mut apply, key)?;
        if let Some(element) = element {
            group_by::analyze_selector(&resource, &mut apply, element)?;
        }
        if let Some(result) = result {
            let group = result
                .params
                .get(1)
                .ok_or_else(|| CompileError::expression_not_supported(Expr::Lambda(result.clone())))?;
            group_by::analyze_result_selector(&resource, &mut apply, result, group)?;
        }
        Ok(resource.with_apply(apply))
    }

    fn bind_expand(&mut self, resource: ResourceExpr, path: &Expr) -> CompileResult<ResourceExpr> {
        let chain = match path {
            Expr::Constant {
                value: Value::String(text),
            } => self.parse_expand_path(&resource.element_type, text)?,
            Expr::Lambda(lambda) => {
                let param = lambda
                    .single_param()
                    .ok_or_else(|| CompileError::expression_not_supported(path))?;
                self.expand_chain(&lambda.body, param, &resource.element_type)?
                    .0
            }
            other => {
                return Err(CompileError::NonConstantArgument {
                    method: "Expand".into(),
                    expr: other.to_string(),
                    expected: "path string or member lambda",
                })
            }
        };
        let rendered = match chain {
            None => WILDCARD.to_string(),
            Some(chain) if is_navigation_only(&chain) => path::expand_only_string(&chain)?,
            Some(chain) => path::select_expand_string(&chain)?,
        };
        debug!(expand = %rendered, "added expand path");
        Ok(resource.with_expand_path(rendered))
    }

    fn parse_expand_path(&self, element: &Ty, text: &str) -> CompileResult<Option<PathSegmentToken>> {
        let mut owner = element.clone();
        let metadata = self.metadata;
        let chain = PathSegmentToken::parse(text, |segment| {
            if segment == WILDCARD {
                return Ok(false);
            }
            let property = metadata.member(&owner, segment)?;
            owner = property.ty;
            Ok(!property.navigation)
        })?;
        match chain {
            Some(chain) => path::remove_wildcard(chain),
            None => Err(CompileError::NonConstantArgument {
                method: "Expand".into(),
                expr: format!("'{text}'"),
                expected: "non-empty path",
            }),
        }
    }

    /// Token chain for `o => o.A.B` or `o => o.Items.Select(i => i.Product)`,
    /// with the type the chain ends at.
    fn expand_chain(
        &self,
        body: &Expr,
        param: &Param,
        owner: &Ty,
    ) -> CompileResult<(Option<PathSegmentToken>, Ty)> {
        if let Expr::Call {
            object: None,
            method,
            args,
            ..
        } = body
        {
            if let ("Select", [source, Expr::Lambda(inner)]) = (method.as_str(), args.as_slice()) {
                let (mut head, end) = self.expand_chain(source, param, owner)?;
                let inner_param = inner
                    .single_param()
                    .ok_or_else(|| CompileError::expression_not_supported(body))?;
                let (tail, last) = self.expand_chain(&inner.body, inner_param, &end)?;
                return match head.take() {
                    Some(mut chain) => {
                        path::append_at_tail(&mut chain, tail)?;
                        Ok((Some(chain), last))
                    }
                    None => Ok((tail, last)),
                };
            }
        }
        let (root, names) = body
            .member_chain()
            .ok_or_else(|| CompileError::expression_not_supported(body))?;
        if !matches!(root, Expr::Parameter(p) if p.name == param.name) {
            return Err(CompileError::ParameterNotBound {
                name: root.to_string(),
            });
        }
        let mut ty = owner.clone();
        let mut segments = Vec::with_capacity(names.len());
        for name in names {
            let property = self.metadata.member(&ty, name)?;
            segments.push((name, !property.navigation));
            ty = property.ty;
        }
        Ok((PathSegmentToken::from_segments(segments), ty))
    }

    fn bind_custom_option(
        &mut self,
        resource: ResourceExpr,
        name: &Expr,
        value: &Expr,
    ) -> CompileResult<ResourceExpr> {
        let non_constant = |expr: &Expr, expected| CompileError::NonConstantArgument {
            method: "AddQueryOption".into(),
            expr: expr.to_string(),
            expected,
        };
        let Some(Value::String(name_text)) = name.as_constant() else {
            return Err(non_constant(name, "string"));
        };
        if name_text.starts_with('$') {
            return Err(CompileError::ReservedQueryOption {
                name: name_text.clone(),
            });
        }
        let value_text = match value.as_constant() {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => return Err(non_constant(value, "scalar")),
        };
        Ok(resource.with_custom_option(name_text.clone(), value_text))
    }

    /// Navigation properties named by a lambda of the form `x => x.A.B`, or
    /// `None` when any member is structural or the body is not such a chain.
    fn navigation_properties(
        &self,
        lambda: &Lambda,
        resource: &ResourceExpr,
    ) -> CompileResult<Option<Vec<PropertyDef>>> {
        let Some(param) = lambda.single_param() else {
            return Ok(None);
        };
        let Some((Expr::Parameter(root), names)) = lambda.body.member_chain() else {
            return Ok(None);
        };
        if root.name != param.name || names.is_empty() || param.ty != resource.element_type {
            return Ok(None);
        }
        let mut ty = resource.element_type.clone();
        let mut props = Vec::with_capacity(names.len());
        for name in names {
            let property = self.metadata.member(&ty, name)?;
            if !property.navigation {
                return Ok(None);
            }
            ty = property.ty.clone();
            props.push(property);
        }
        Ok(Some(props))
    }

    fn navigate(
        &mut self,
        source: ResourceExpr,
        props: &[PropertyDef],
        method: &str,
    ) -> CompileResult<ResourceExpr> {
        let first = props.first().map(|p| p.name.clone()).unwrap_or_default();
        if !source.is_single() {
            return Err(CompileError::NavigationRequiresSingleSource { member: first });
        }
        if let Some(after) = applied(&source).first() {
            return Err(CompileError::unsupported_after(method, *after));
        }
        let mut current = source;
        for prop in props {
            let (element, collection) = match prop.ty.element_type() {
                Some(element) => (element.non_nullable().clone(), true),
                None => (prop.ty.non_nullable().clone(), false),
            };
            let id = self.fresh_id();
            debug!(member = %prop.name, id = id.0, collection, "bound navigation");
            current = ResourceExpr::navigation(
                id,
                Rc::new(current),
                prop.name.clone(),
                element,
                collection,
            );
        }
        Ok(current)
    }

    fn bind_count(&mut self, method: &str, args: &[Expr], ty: &Ty) -> CompileResult<BoundQuery> {
        let resource = match args {
            [source] => self.bind(source)?.demote_key_predicate(),
            [source, predicate] => {
                let resource = self.bind(source)?;
                self.bind_filter(resource, predicate)?
            }
            _ => return Err(CompileError::method_not_supported(method)),
        };
        ensure_collection(&resource, method)?;
        ensure_not_after(&resource, method, &["Skip", "Take", "GroupBy"])?;
        debug!(method = %method, resource = %resource.name, "bound count segment");
        Ok(finish(resource.with_count_segment(), Some(ty.clone()), Some(true)))
    }

    fn bind_first(&mut self, method: &str, args: &[Expr]) -> CompileResult<BoundQuery> {
        let resource = match args {
            [source] => self.bind(source)?,
            [source, predicate] => {
                let resource = self.bind(source)?;
                self.bind_where(resource, predicate)?
            }
            _ => return Err(CompileError::method_not_supported(method)),
        };
        let resource = if resource.is_single() {
            resource
        } else {
            let count = if method.starts_with("Single") { 2 } else { 1 };
            resource.with_sequence_option(QueryOption::Take(TakeOption { count }))
        };
        debug!(method = %method, resource = %resource.name, "bound single-result operator");
        Ok(finish(resource, None, Some(true)))
    }

    fn bind_aggregate(&mut self, method: &str, args: &[Expr], ty: &Ty) -> CompileResult<BoundQuery> {
        let [source, selector] = args else {
            return Err(CompileError::method_not_supported(method));
        };
        let resource = self.bind(source)?.demote_key_predicate();
        ensure_collection(&resource, method)?;
        ensure_not_after(
            &resource,
            method,
            &["Skip", "Take", "OrderBy", "Select", "GroupBy"],
        )?;
        let lambda = lambda_arg(selector)?;
        let aggregation = group_by::terminal_aggregation(&resource, method, Some(lambda))?
            .ok_or_else(|| CompileError::CrossResourceReference {
                clause: "aggregate",
                expr: lambda.body.to_string(),
            })?;
        let (resource, filter) = resource.take_filter();
        let mut apply = ApplyState::default();
        if let Some(filter) = filter {
            apply.predicates = filter.predicates;
        }
        apply.aggregations.push(aggregation);
        debug!(method = %method, resource = %resource.name, "bound terminal aggregate");
        Ok(finish(resource.with_apply(apply), Some(ty.clone()), Some(true)))
    }
}

fn finish(resource: ResourceExpr, element_type: Option<Ty>, single_result: Option<bool>) -> BoundQuery {
    let projector = resource
        .apply
        .as_ref()
        .and_then(|apply| apply.result_selector.clone())
        .or_else(|| resource.projection.as_ref().map(|p| p.selector.clone()));
    let element_type = element_type.unwrap_or_else(|| resource.element_type.clone());
    BoundQuery {
        resource,
        projector,
        single_result,
        element_type,
        rewrites: NormalizerRewrites::default(),
    }
}

fn bind_include_count(resource: ResourceExpr, flag: Option<&Expr>) -> CompileResult<ResourceExpr> {
    let resource = resource.demote_key_predicate();
    ensure_collection(&resource, "IncludeCount")?;
    let include = match flag {
        None => true,
        Some(expr) => match expr.as_constant() {
            Some(Value::Bool(include)) => *include,
            _ => {
                return Err(CompileError::NonConstantArgument {
                    method: "IncludeCount".into(),
                    expr: expr.to_string(),
                    expected: "boolean",
                })
            }
        },
    };
    let count = if include {
        CountOption::True
    } else {
        CountOption::False
    };
    Ok(resource.with_count(count))
}

/// Binds a `Where` predicate against a collection resource.
fn filter_predicate(resource: &ResourceExpr, predicate: &Expr) -> CompileResult<Expr> {
    ensure_collection(resource, "Where")?;
    ensure_not_after(resource, "Where", &["Skip", "Take", "Select", "GroupBy"])?;
    let lambda = lambda_arg(predicate)?;
    bind_single_resource(lambda, resource, "filter")
}

fn with_filter(resource: ResourceExpr, predicate: Expr) -> ResourceExpr {
    resource.with_sequence_option(QueryOption::Filter(FilterOption {
        predicates: vec![predicate],
    }))
}

/// Binds a clause lambda that may only read its own resource.
fn bind_single_resource(
    lambda: &Lambda,
    resource: &ResourceExpr,
    clause: &'static str,
) -> CompileResult<Expr> {
    let mut referenced = Vec::new();
    let bound = input_binder::bind_lambda(lambda, resource, &mut referenced)?;
    if referenced.iter().any(|id| *id != resource.id) {
        return Err(CompileError::CrossResourceReference {
            clause,
            expr: lambda.body.to_string(),
        });
    }
    Ok(bound)
}

fn lambda_arg(arg: &Expr) -> CompileResult<&Lambda> {
    arg.as_lambda()
        .ok_or_else(|| CompileError::expression_not_supported(arg))
}

fn count_arg(method: &str, arg: &Expr) -> CompileResult<u64> {
    arg.as_constant()
        .and_then(Value::as_i64)
        .and_then(|count| u64::try_from(count).ok())
        .ok_or_else(|| CompileError::NonConstantArgument {
            method: method.into(),
            expr: arg.to_string(),
            expected: "non-negative integer",
        })
}

fn ensure_collection(resource: &ResourceExpr, method: &str) -> CompileResult<()> {
    if resource.is_single() {
        return Err(CompileError::method_not_supported(format!(
            "{method} over single resource {}",
            resource.name
        )));
    }
    Ok(())
}

/// Operators already folded into `resource`, in a stable order.
fn applied(resource: &ResourceExpr) -> Vec<&'static str> {
    let mut out: Vec<&'static str> = resource
        .sequence_options
        .iter()
        .map(QueryOption::method_name)
        .collect();
    if resource.projection.is_some() {
        out.push("Select");
    }
    if resource.apply.is_some() {
        out.push("GroupBy");
    }
    if !resource.expand_paths.is_empty() {
        out.push("Expand");
    }
    if resource.count != CountOption::None {
        out.push("IncludeCount");
    }
    if !resource.custom_options.is_empty() {
        out.push("AddQueryOption");
    }
    out
}

fn ensure_not_after(
    resource: &ResourceExpr,
    method: &str,
    blocked: &[&'static str],
) -> CompileResult<()> {
    let applied = applied(resource);
    match blocked.iter().find(|op| applied.contains(*op)) {
        Some(after) => Err(CompileError::unsupported_after(method, *after)),
        None => Ok(()),
    }
}

fn conjuncts(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::Binary {
            op: BinaryOp::AndAlso,
            left,
            right,
        } => {
            let mut out = conjuncts(left);
            out.extend(conjuncts(right));
            out
        }
        other => vec![other],
    }
}

/// `$it.Key == constant` in either operand order.
fn key_comparison(expr: &Expr, target: ResourceId) -> Option<(String, Value)> {
    let Expr::Binary {
        op: BinaryOp::Equal,
        left,
        right,
    } = expr
    else {
        return None;
    };
    let (member, constant) = match (left.as_constant(), right.as_constant()) {
        (None, Some(value)) => (left.as_ref(), value),
        (Some(value), None) => (right.as_ref(), value),
        _ => return None,
    };
    if *constant == Value::Null {
        return None;
    }
    match member.member_chain()? {
        (Expr::Input(input), names) if input.target == target => match names.as_slice() {
            [name] => Some((name.to_string(), constant.clone())),
            _ => None,
        },
        _ => None,
    }
}

fn is_collection_navigation(props: &[PropertyDef]) -> bool {
    match props.split_last() {
        Some((last, rest)) => {
            last.ty.element_type().is_some() && rest.iter().all(|p| p.ty.element_type().is_none())
        }
        None => false,
    }
}

fn is_navigation_only(chain: &PathSegmentToken) -> bool {
    let mut cursor = Some(chain);
    while let Some(token) = cursor {
        match token {
            PathSegmentToken::NonSystem(segment) if segment.is_structural_property => return false,
            _ => cursor = token.next(),
        }
    }
    true
}

/// Scope for `(outer, inner) => new { a = outer, b = inner }`.
fn transparent_scope(result: &Lambda, outer_id: ResourceId) -> Option<TransparentScope> {
    let [outer, inner] = result.params.as_slice() else {
        return None;
    };
    let Expr::New { ty, members } = result.body.as_ref() else {
        return None;
    };
    let record = ty.as_record()?.clone();
    let mut inner_name = None;
    let mut outer_name = None;
    for (name, expr) in members {
        match expr {
            Expr::Parameter(p) if p.name == inner.name => inner_name = Some(name.clone()),
            Expr::Parameter(p) if p.name == outer.name => outer_name = Some(name.clone()),
            _ => return None,
        }
    }
    Some(TransparentScope {
        record,
        inner: inner_name?,
        outer: outer_name.map(|name| (name, outer_id)),
    })
}
