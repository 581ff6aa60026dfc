//! Grouping and aggregation analysis for `GroupBy`.
//!
//! Three passes fill one [`ApplyState`]: the key selector contributes the
//! grouping keys, the optional element selector the members aggregations may
//! read, and the result selector the aggregations themselves. The binder
//! creates the state before calling any of them.

use tracing::debug;

use crate::query::ast::{Expr, Lambda, Param};
use crate::query::errors::{CompileError, CompileResult};
use crate::query::input_binder;
use crate::query::options::{Aggregation, AggregationMethod, ApplyState};
use crate::query::resource::ResourceExpr;

/// Records the grouping keys declared by `key_selector`.
pub fn analyze_key_selector(
    resource: &ResourceExpr,
    apply: &mut ApplyState,
    key_selector: &Lambda,
) -> CompileResult<()> {
    let param = unary_param(key_selector)?;
    for (name, expr) in constructed_members(&key_selector.body) {
        let bound = grouping_expression(expr, param, resource)?;
        apply.add_key(name, bound.clone());
        apply.add_grouping_expression(bound);
    }
    if !is_construction(&key_selector.body) {
        let bound = grouping_expression(&key_selector.body, param, resource)?;
        apply.add_grouping_expression(bound);
    }
    Ok(())
}

/// Records the members an element selector exposes to the result selector.
///
/// A bare member selector is recorded under the empty name.
pub fn analyze_selector(
    resource: &ResourceExpr,
    apply: &mut ApplyState,
    selector: &Lambda,
) -> CompileResult<()> {
    let param = unary_param(selector)?;
    let members: Vec<(String, &Expr)> = if is_construction(&selector.body) {
        constructed_members(&selector.body)
            .into_iter()
            .map(|(name, expr)| (name.to_string(), expr))
            .collect()
    } else {
        vec![(String::new(), selector.body.as_ref())]
    };
    for (name, expr) in members {
        match expr.member_chain() {
            Some((Expr::Parameter(root), _)) if root.name == param.name => {}
            _ => {
                return Err(CompileError::InvalidGroupingExpression {
                    expr: expr.to_string(),
                })
            }
        }
        let mut referenced = Vec::new();
        let bound = input_binder::bind(expr, resource, param, &mut referenced);
        if referenced != [resource.id] {
            return Err(CompileError::CrossResourceReference {
                clause: "grouping",
                expr: expr.to_string(),
            });
        }
        apply.grouping_expressions_map.push((name, bound));
    }
    Ok(())
}

/// Lifts the aggregations in `result_selector` into `apply`.
///
/// `group` names the parameter holding the grouped elements. Aggregation
/// calls with an unexpected argument count, or whose selector reaches beyond
/// the grouped resource, are left in place for the client projector. Reading
/// a member of a record key that the key selector did not declare fails.
pub fn analyze_result_selector(
    resource: &ResourceExpr,
    apply: &mut ApplyState,
    result_selector: &Lambda,
    group: &Param,
) -> CompileResult<()> {
    check_key_members(apply, result_selector, group)?;
    let aliases: Vec<(&Expr, &str)> = constructed_members(&result_selector.body)
        .into_iter()
        .map(|(name, expr)| (expr, name))
        .collect();
    let mut calls = Vec::new();
    collect_group_calls(&result_selector.body, group, &mut calls);
    for call in calls {
        let alias = aliases
            .iter()
            .find(|(expr, _)| *expr == call)
            .map(|(_, name)| name.to_string());
        if let Some(aggregation) = lift_aggregation(resource, apply, call, alias)? {
            debug!(
                method = aggregation.method.keyword(),
                alias = %aggregation.alias,
                "lifted aggregation"
            );
            apply.aggregations.push(aggregation);
        }
    }
    apply.result_selector = Some(result_selector.clone());
    Ok(())
}

/// Builds the aggregation for a terminal `Sum(source, selector)`-style call.
pub fn terminal_aggregation(
    resource: &ResourceExpr,
    method: &str,
    selector: Option<&Lambda>,
) -> CompileResult<Option<Aggregation>> {
    let method = AggregationMethod::from_method(method)
        .ok_or_else(|| CompileError::method_not_supported(method))?;
    let apply = ApplyState::default();
    match selector {
        None if !method.takes_selector() => Ok(Some(Aggregation {
            expr: None,
            method,
            alias: "Count".into(),
        })),
        Some(selector) if method.takes_selector() => {
            let alias = fallback_alias(method, Some(selector));
            selector_aggregation(resource, &apply, method, selector, alias)
        }
        _ => Ok(None),
    }
}

fn unary_param(lambda: &Lambda) -> CompileResult<&Param> {
    lambda
        .single_param()
        .ok_or_else(|| CompileError::expression_not_supported(Expr::Lambda(lambda.clone())))
}

fn is_construction(expr: &Expr) -> bool {
    matches!(expr, Expr::New { .. } | Expr::MemberInit { .. })
}

fn constructed_members(expr: &Expr) -> Vec<(&str, &Expr)> {
    match expr {
        Expr::New { members, .. } => members
            .iter()
            .map(|(name, expr)| (name.as_str(), expr))
            .collect(),
        Expr::MemberInit { bindings, .. } => bindings
            .iter()
            .map(|binding| (binding.member.as_str(), &binding.expr))
            .collect(),
        _ => Vec::new(),
    }
}

/// Validates and binds one grouping key.
fn grouping_expression(expr: &Expr, param: &Param, resource: &ResourceExpr) -> CompileResult<Expr> {
    let invalid = || CompileError::InvalidGroupingExpression {
        expr: expr.to_string(),
    };
    let (root, names) = expr.member_chain().ok_or_else(invalid)?;
    let rooted = matches!(root, Expr::Parameter(p) if p.name == param.name);
    let ty = expr.ty();
    if !rooted || names.is_empty() || ty.is_entity() || ty.element_type().is_some() {
        return Err(invalid());
    }
    let mut referenced = Vec::new();
    let bound = input_binder::bind(expr, resource, param, &mut referenced);
    if referenced != [resource.id] {
        return Err(CompileError::CrossResourceReference {
            clause: "grouping",
            expr: expr.to_string(),
        });
    }
    Ok(bound)
}

/// Rejects key member reads (`k.X` or `g.Key.X`) naming no declared key.
fn check_key_members(
    apply: &ApplyState,
    result_selector: &Lambda,
    group: &Param,
) -> CompileResult<()> {
    if apply.key_selector_map.is_empty() {
        return Ok(());
    }
    let key_param = match result_selector.params.as_slice() {
        [key, elements] if elements.name == group.name => Some(key.name.as_str()),
        _ => None,
    };
    check_key_access(&result_selector.body, key_param, group, apply)
}

fn check_key_access(
    expr: &Expr,
    key_param: Option<&str>,
    group: &Param,
    apply: &ApplyState,
) -> CompileResult<()> {
    match expr {
        Expr::Member { expr: inner, name, .. }
            if is_group_key(inner, key_param, group) && apply.key(name).is_none() =>
        {
            return Err(CompileError::UnknownMember {
                ty: "group key".into(),
                member: name.clone(),
            });
        }
        Expr::Lambda(lambda)
            if lambda
                .params
                .iter()
                .any(|p| p.name == group.name || Some(p.name.as_str()) == key_param) =>
        {
            return Ok(());
        }
        _ => {}
    }
    for child in expr.children() {
        check_key_access(child, key_param, group, apply)?;
    }
    Ok(())
}

fn is_group_key(expr: &Expr, key_param: Option<&str>, group: &Param) -> bool {
    match expr {
        Expr::Parameter(p) => key_param == Some(p.name.as_str()),
        Expr::Member { expr: inner, name, .. } => {
            name == "Key" && matches!(inner.as_ref(), Expr::Parameter(p) if p.name == group.name)
        }
        _ => false,
    }
}

/// Calls whose source argument is the group parameter, outermost first.
fn collect_group_calls<'e>(expr: &'e Expr, group: &Param, out: &mut Vec<&'e Expr>) {
    if let Expr::Call {
        object: None, args, ..
    } = expr
    {
        if matches!(args.first(), Some(Expr::Parameter(p)) if p.name == group.name) {
            out.push(expr);
            return;
        }
    }
    if let Expr::Lambda(lambda) = expr {
        if lambda.params.iter().any(|p| p.name == group.name) {
            return;
        }
    }
    for child in expr.children() {
        collect_group_calls(child, group, out);
    }
}

fn lift_aggregation(
    resource: &ResourceExpr,
    apply: &ApplyState,
    call: &Expr,
    alias: Option<String>,
) -> CompileResult<Option<Aggregation>> {
    let Expr::Call { method, args, .. } = call else {
        return Ok(None);
    };
    let method = AggregationMethod::from_method(method)
        .ok_or_else(|| CompileError::method_not_supported(method.clone()))?;
    if !method.takes_selector() {
        if args.len() != 1 {
            return Ok(None);
        }
        return Ok(Some(Aggregation {
            expr: None,
            method,
            alias: alias.unwrap_or_else(|| fallback_alias(method, None)),
        }));
    }
    let [_, selector] = args.as_slice() else {
        return Ok(None);
    };
    let Some(selector) = selector.as_lambda() else {
        return Ok(None);
    };
    let alias = alias.unwrap_or_else(|| fallback_alias(method, Some(selector)));
    selector_aggregation(resource, apply, method, selector, alias)
}

fn selector_aggregation(
    resource: &ResourceExpr,
    apply: &ApplyState,
    method: AggregationMethod,
    selector: &Lambda,
    alias: String,
) -> CompileResult<Option<Aggregation>> {
    let Some(param) = selector.single_param() else {
        return Ok(None);
    };
    if method.requires_numeric() && !selector.body.ty().is_numeric() {
        return Err(CompileError::method_not_supported(format!(
            "{}({})",
            method_label(method),
            Expr::Lambda(selector.clone())
        )));
    }
    let bound = if apply.grouping_expressions_map.is_empty() {
        let mut referenced = Vec::new();
        let bound = input_binder::bind(&selector.body, resource, param, &mut referenced);
        if referenced != [resource.id] || bound.has_free_parameter() {
            return Ok(None);
        }
        bound
    } else {
        match substitute_grouped(&selector.body, param, apply) {
            Some(bound) => bound,
            None => return Ok(None),
        }
    };
    Ok(Some(Aggregation {
        expr: Some(bound),
        method,
        alias,
    }))
}

/// Rewrites accesses to element-selector members into their bound sources.
fn substitute_grouped(expr: &Expr, param: &Param, apply: &ApplyState) -> Option<Expr> {
    match expr {
        Expr::Parameter(p) if p.name == param.name => apply.grouped_member("").cloned(),
        Expr::Member { expr: inner, name, .. }
            if matches!(inner.as_ref(), Expr::Parameter(p) if p.name == param.name) =>
        {
            apply.grouped_member(name).cloned()
        }
        Expr::Parameter(_) => None,
        other => other
            .try_map_children(|child| substitute_grouped(child, param, apply).ok_or(()))
            .ok(),
    }
}

fn method_label(method: AggregationMethod) -> &'static str {
    match method {
        AggregationMethod::Sum => "Sum",
        AggregationMethod::Average => "Average",
        AggregationMethod::Min => "Min",
        AggregationMethod::Max => "Max",
        AggregationMethod::CountDistinct => "CountDistinct",
        AggregationMethod::Count => "Count",
    }
}

/// Alias used when the aggregation is not directly a constructed member.
fn fallback_alias(method: AggregationMethod, selector: Option<&Lambda>) -> String {
    let property = selector
        .and_then(|lambda| lambda.body.member_chain())
        .and_then(|(_, names)| names.last().map(|name| name.to_string()));
    match property {
        Some(property) => format!("{}Of{property}", method_label(method)),
        None => method_label(method).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::{BinaryOp, ResourceId, RootKind};
    use crate::query::value::Ty;

    fn sales() -> Ty {
        Ty::entity("Sale")
    }

    fn resource() -> ResourceExpr {
        ResourceExpr::root(ResourceId(0), "Sales", RootKind::EntitySet, sales())
    }

    fn s() -> Expr {
        Expr::param("s", sales())
    }

    fn input(resource: &ResourceExpr) -> Expr {
        Expr::Input(resource.input_ref())
    }

    fn group_param() -> Param {
        Param::new(
            "g",
            Ty::Grouping {
                key: Box::new(Ty::String),
                element: Box::new(sales()),
            },
        )
    }

    fn sum_amount() -> Expr {
        Expr::call(
            "Sum",
            vec![
                group_param().to_expr(),
                Expr::lambda(
                    vec![Param::new("s", sales())],
                    s().member("Amount", Ty::Decimal),
                ),
            ],
            Ty::Decimal,
        )
    }

    #[test]
    fn record_key_and_sum_fill_apply_state() {
        let resource = resource();
        let mut apply = ApplyState::default();
        let key = Lambda::new(
            vec![Param::new("s", sales())],
            Expr::new_record([
                ("X", s().member("Region", Ty::String)),
                ("Y", s().member("Year", Ty::Int32)),
            ]),
        );
        analyze_key_selector(&resource, &mut apply, &key).unwrap();
        let result = Lambda::new(
            vec![Param::new("k", Ty::Object), group_param()],
            Expr::new_record([("Total", sum_amount())]),
        );
        analyze_result_selector(&resource, &mut apply, &result, &group_param()).unwrap();

        assert_eq!(
            apply.grouping_expressions,
            vec![
                input(&resource).member("Region", Ty::String),
                input(&resource).member("Year", Ty::Int32),
            ]
        );
        assert_eq!(apply.key("Y"), Some(&input(&resource).member("Year", Ty::Int32)));
        assert_eq!(
            apply.aggregations,
            vec![Aggregation {
                expr: Some(input(&resource).member("Amount", Ty::Decimal)),
                method: AggregationMethod::Sum,
                alias: "Total".into(),
            }]
        );
        assert!(apply.result_selector.is_some());
    }

    #[test]
    fn entity_valued_key_is_rejected() {
        let resource = resource();
        let mut apply = ApplyState::default();
        let key = Lambda::new(
            vec![Param::new("s", sales())],
            s().member("Store", Ty::entity("Store")),
        );
        assert!(matches!(
            analyze_key_selector(&resource, &mut apply, &key),
            Err(CompileError::InvalidGroupingExpression { .. })
        ));
    }

    #[test]
    fn computed_key_is_rejected() {
        let resource = resource();
        let mut apply = ApplyState::default();
        let key = Lambda::new(
            vec![Param::new("s", sales())],
            s().member("Region", Ty::String)
                .method("ToUpper", vec![], Ty::String),
        );
        assert!(matches!(
            analyze_key_selector(&resource, &mut apply, &key),
            Err(CompileError::InvalidGroupingExpression { .. })
        ));
    }

    #[test]
    fn unexpected_arity_is_left_alone() {
        let resource = resource();
        let mut apply = ApplyState::default();
        let predicate = Expr::lambda(
            vec![Param::new("s", sales())],
            s().member("Amount", Ty::Decimal)
                .greater_than(Expr::constant(rust_decimal::Decimal::ONE)),
        );
        let count_where = Expr::call(
            "Count",
            vec![group_param().to_expr(), predicate],
            Ty::Int32,
        );
        let result = Lambda::new(
            vec![Param::new("k", Ty::String), group_param()],
            Expr::new_record([("Big", count_where)]),
        );
        analyze_result_selector(&resource, &mut apply, &result, &group_param()).unwrap();
        assert!(apply.aggregations.is_empty());
    }

    #[test]
    fn selector_reading_an_outer_parameter_stays_in_the_projector() {
        let resource = resource();
        let mut apply = ApplyState::default();
        let key = Param::new("k", Ty::Decimal);
        let scaled = Expr::call(
            "Sum",
            vec![
                group_param().to_expr(),
                Expr::lambda(
                    vec![Param::new("s", sales())],
                    Expr::binary(
                        BinaryOp::Multiply,
                        s().member("Amount", Ty::Decimal),
                        key.to_expr(),
                    ),
                ),
            ],
            Ty::Decimal,
        );
        let result = Lambda::new(
            vec![key, group_param()],
            Expr::new_record([("Scaled", scaled)]),
        );
        analyze_result_selector(&resource, &mut apply, &result, &group_param()).unwrap();
        assert!(apply.aggregations.is_empty());
        assert_eq!(apply.result_selector, Some(result));
    }

    #[test]
    fn undeclared_key_member_fails() {
        let resource = resource();
        let mut apply = ApplyState::default();
        let key = Lambda::new(
            vec![Param::new("s", sales())],
            Expr::new_record([("Region", s().member("Region", Ty::String))]),
        );
        analyze_key_selector(&resource, &mut apply, &key).unwrap();
        let key_ty = key.body.ty();

        let declared = Lambda::new(
            vec![Param::new("k", key_ty.clone()), group_param()],
            Expr::new_record([(
                "R",
                Expr::param("k", key_ty.clone()).member("Region", Ty::String),
            )]),
        );
        analyze_result_selector(&resource, &mut apply.clone(), &declared, &group_param()).unwrap();

        let through_group = Lambda::new(
            vec![group_param()],
            group_param()
                .to_expr()
                .member("Key", key_ty.clone())
                .member("Year", Ty::Int32),
        );
        assert_eq!(
            analyze_result_selector(&resource, &mut apply.clone(), &through_group, &group_param()),
            Err(CompileError::UnknownMember {
                ty: "group key".into(),
                member: "Year".into(),
            })
        );
    }

    #[test]
    fn unknown_group_method_fails() {
        let resource = resource();
        let mut apply = ApplyState::default();
        let first = Expr::call("First", vec![group_param().to_expr()], sales());
        let result = Lambda::new(
            vec![Param::new("k", Ty::String), group_param()],
            Expr::new_record([("Top", first)]),
        );
        assert_eq!(
            analyze_result_selector(&resource, &mut apply, &result, &group_param()),
            Err(CompileError::method_not_supported("First"))
        );
    }

    #[test]
    fn element_selector_members_feed_aggregations() {
        let resource = resource();
        let mut apply = ApplyState::default();
        let selector = Lambda::new(
            vec![Param::new("s", sales())],
            Expr::new_record([("Value", s().member("Amount", Ty::Decimal))]),
        );
        analyze_selector(&resource, &mut apply, &selector).unwrap();
        let element = selector.body.ty();
        let avg = Expr::call(
            "Average",
            vec![
                group_param().to_expr(),
                Expr::lambda(
                    vec![Param::new("e", element.clone())],
                    Expr::param("e", element).member("Value", Ty::Decimal),
                ),
            ],
            Ty::Decimal,
        );
        let result = Lambda::new(vec![Param::new("k", Ty::String), group_param()], avg);
        analyze_result_selector(&resource, &mut apply, &result, &group_param()).unwrap();
        assert_eq!(apply.aggregations.len(), 1);
        assert_eq!(apply.aggregations[0].alias, "AverageOfValue");
        assert_eq!(
            apply.aggregations[0].expr,
            Some(input(&resource).member("Amount", Ty::Decimal))
        );
    }
}
