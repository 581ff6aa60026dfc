//! Fluent front end producing sequence-operator call trees.

use std::mem;

use crate::query::{
    ast::{Expr, Lambda, Param, ResourceRoot, RootKind},
    compiler::QueryCompiler,
    components::QueryComponents,
    errors::{CompileError, CompileResult},
    value::{RecordType, Ty, Value},
};

/// Fluent builder over one resource root.
///
/// Each operator wraps the tree built so far as the source of a new static
/// call. Lambda parameters are named automatically (`a`, `b`, ...); the
/// closures passed to the operators receive the parameter as an expression.
pub struct QueryBuilder {
    expr: Expr,
    element: Ty,
    next_var_idx: usize,
    error: Option<CompileError>,
}

impl QueryBuilder {
    /// Starts from an arbitrary root.
    pub fn root(root: ResourceRoot) -> Self {
        Self {
            element: root.element_type.clone(),
            expr: Expr::Root(root),
            next_var_idx: 0,
            error: None,
        }
    }

    /// Starts from an entity set of `entity` elements.
    pub fn entity_set(name: impl Into<String>, entity: impl Into<String>) -> Self {
        Self::root(ResourceRoot {
            name: name.into(),
            element_type: Ty::entity(entity),
            kind: RootKind::EntitySet,
        })
    }

    /// Starts from a singleton.
    pub fn singleton(name: impl Into<String>, entity: impl Into<String>) -> Self {
        Self::root(ResourceRoot {
            name: name.into(),
            element_type: Ty::entity(entity),
            kind: RootKind::Singleton,
        })
    }

    /// Starts from a composable function.
    pub fn function<I, S>(
        name: impl Into<String>,
        element_type: Ty,
        parameters: I,
        returns_collection: bool,
    ) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        Self::root(ResourceRoot {
            name: name.into(),
            element_type,
            kind: RootKind::Function {
                parameters: collect_parameters(parameters),
                returns_collection,
            },
        })
    }

    /// Starts from an action.
    pub fn action<I, S>(name: impl Into<String>, element_type: Ty, parameters: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        Self::root(ResourceRoot {
            name: name.into(),
            element_type,
            kind: RootKind::Action {
                parameters: collect_parameters(parameters),
            },
        })
    }

    /// Element type of the sequence built so far.
    pub fn element_type(&self) -> &Ty {
        &self.element
    }

    /// `Where`.
    pub fn filter<F>(mut self, build: F) -> Self
    where
        F: FnOnce(Expr) -> Expr,
    {
        let lambda = self.lambda(build);
        let element = self.element.clone();
        self.push_call("Where", vec![Expr::Lambda(lambda)], element)
    }

    /// `OrderBy`.
    pub fn order_by<F>(self, build: F) -> Self
    where
        F: FnOnce(Expr) -> Expr,
    {
        self.ordering("OrderBy", build)
    }

    /// `OrderByDescending`.
    pub fn order_by_descending<F>(self, build: F) -> Self
    where
        F: FnOnce(Expr) -> Expr,
    {
        self.ordering("OrderByDescending", build)
    }

    /// `ThenBy`.
    pub fn then_by<F>(self, build: F) -> Self
    where
        F: FnOnce(Expr) -> Expr,
    {
        self.ordering("ThenBy", build)
    }

    /// `ThenByDescending`.
    pub fn then_by_descending<F>(self, build: F) -> Self
    where
        F: FnOnce(Expr) -> Expr,
    {
        self.ordering("ThenByDescending", build)
    }

    /// `Skip`.
    pub fn skip(self, count: i32) -> Self {
        let element = self.element.clone();
        self.push_call("Skip", vec![Expr::constant(count)], element)
    }

    /// `Take`.
    pub fn take(self, count: i32) -> Self {
        let element = self.element.clone();
        self.push_call("Take", vec![Expr::constant(count)], element)
    }

    /// `Select`; the element type becomes the selector's result type.
    pub fn select<F>(mut self, build: F) -> Self
    where
        F: FnOnce(Expr) -> Expr,
    {
        let lambda = self.lambda(build);
        let element = lambda.body.ty();
        self.push_call("Select", vec![Expr::Lambda(lambda)], element)
    }

    /// `SelectMany` over a collection-valued selector.
    pub fn select_many<F>(mut self, build: F) -> Self
    where
        F: FnOnce(Expr) -> Expr,
    {
        let lambda = self.lambda(build);
        let Some(element) = self.collection_element(&lambda) else {
            return self;
        };
        self.push_call("SelectMany", vec![Expr::Lambda(lambda)], element)
    }

    /// `SelectMany` whose result pairs the source element (as `outer`) with
    /// each collection element (as `inner`) in an anonymous record.
    pub fn select_many_scoped<F>(mut self, build: F, outer: &str, inner: &str) -> Self
    where
        F: FnOnce(Expr) -> Expr,
    {
        let lambda = self.lambda(build);
        let Some(element) = self.collection_element(&lambda) else {
            return self;
        };
        let outer_param = Param::new(self.next_auto_var(), self.element.clone());
        let inner_param = Param::new(self.next_auto_var(), element.clone());
        let record = RecordType::new([(outer, self.element.clone()), (inner, element)]);
        let result = Lambda::new(
            vec![outer_param.clone(), inner_param.clone()],
            Expr::New {
                ty: Ty::Record(record.clone()),
                members: vec![
                    (outer.to_string(), outer_param.to_expr()),
                    (inner.to_string(), inner_param.to_expr()),
                ],
            },
        );
        self.push_call(
            "SelectMany",
            vec![Expr::Lambda(lambda), Expr::Lambda(result)],
            Ty::Record(record),
        )
    }

    /// `GroupBy(key)`; elements become groupings.
    pub fn group_by<F>(mut self, key: F) -> Self
    where
        F: FnOnce(Expr) -> Expr,
    {
        let key = self.lambda(key);
        let grouping = Ty::Grouping {
            key: Box::new(key.body.ty()),
            element: Box::new(self.element.clone()),
        };
        self.push_call("GroupBy", vec![Expr::Lambda(key)], grouping)
    }

    /// `GroupBy(key, (key, group) => result)`.
    pub fn group_by_with_result<K, R>(mut self, key: K, result: R) -> Self
    where
        K: FnOnce(Expr) -> Expr,
        R: FnOnce(Expr, Expr) -> Expr,
    {
        let key = self.lambda(key);
        let group_element = self.element.clone();
        let result = self.result_lambda(&key, group_element, result);
        let element = result.body.ty();
        self.push_call(
            "GroupBy",
            vec![Expr::Lambda(key), Expr::Lambda(result)],
            element,
        )
    }

    /// `GroupBy(key, element, (key, group) => result)`.
    pub fn group_by_with_selector<K, E, R>(mut self, key: K, element: E, result: R) -> Self
    where
        K: FnOnce(Expr) -> Expr,
        E: FnOnce(Expr) -> Expr,
        R: FnOnce(Expr, Expr) -> Expr,
    {
        let key = self.lambda(key);
        let selector = self.lambda(element);
        let result = self.result_lambda(&key, selector.body.ty(), result);
        let element = result.body.ty();
        self.push_call(
            "GroupBy",
            vec![
                Expr::Lambda(key),
                Expr::Lambda(selector),
                Expr::Lambda(result),
            ],
            element,
        )
    }

    /// `Expand("A/B")`.
    pub fn expand(self, path: &str) -> Self {
        let element = self.element.clone();
        self.push_call("Expand", vec![Expr::constant(path)], element)
    }

    /// `Expand(x => x.A.B)`.
    pub fn expand_with<F>(mut self, build: F) -> Self
    where
        F: FnOnce(Expr) -> Expr,
    {
        let lambda = self.lambda(build);
        let element = self.element.clone();
        self.push_call("Expand", vec![Expr::Lambda(lambda)], element)
    }

    /// `AddQueryOption(name, value)`.
    pub fn add_query_option(self, name: &str, value: impl Into<Value>) -> Self {
        let element = self.element.clone();
        self.push_call(
            "AddQueryOption",
            vec![Expr::constant(name), Expr::constant(value)],
            element,
        )
    }

    /// `IncludeCount()`.
    pub fn include_count(self) -> Self {
        let element = self.element.clone();
        self.push_call("IncludeCount", Vec::new(), element)
    }

    /// `Count()`.
    pub fn count(self) -> CompileResult<Expr> {
        self.terminal("Count", Vec::new(), Ty::Int32)
    }

    /// `Count(predicate)`.
    pub fn count_where<F>(mut self, build: F) -> CompileResult<Expr>
    where
        F: FnOnce(Expr) -> Expr,
    {
        let lambda = self.lambda(build);
        self.terminal("Count", vec![Expr::Lambda(lambda)], Ty::Int32)
    }

    /// `LongCount()`.
    pub fn long_count(self) -> CompileResult<Expr> {
        self.terminal("LongCount", Vec::new(), Ty::Int64)
    }

    /// `First()`.
    pub fn first(self) -> CompileResult<Expr> {
        let element = self.element.clone();
        self.terminal("First", Vec::new(), element)
    }

    /// `First(predicate)`.
    pub fn first_where<F>(mut self, build: F) -> CompileResult<Expr>
    where
        F: FnOnce(Expr) -> Expr,
    {
        let lambda = self.lambda(build);
        let element = self.element.clone();
        self.terminal("First", vec![Expr::Lambda(lambda)], element)
    }

    /// `FirstOrDefault()`.
    pub fn first_or_default(self) -> CompileResult<Expr> {
        let element = self.element.clone();
        self.terminal("FirstOrDefault", Vec::new(), element)
    }

    /// `Single()`.
    pub fn single(self) -> CompileResult<Expr> {
        let element = self.element.clone();
        self.terminal("Single", Vec::new(), element)
    }

    /// `SingleOrDefault()`.
    pub fn single_or_default(self) -> CompileResult<Expr> {
        let element = self.element.clone();
        self.terminal("SingleOrDefault", Vec::new(), element)
    }

    /// `Sum(selector)`.
    pub fn sum<F>(self, build: F) -> CompileResult<Expr>
    where
        F: FnOnce(Expr) -> Expr,
    {
        self.aggregate("Sum", build)
    }

    /// `Average(selector)`.
    pub fn average<F>(self, build: F) -> CompileResult<Expr>
    where
        F: FnOnce(Expr) -> Expr,
    {
        self.aggregate("Average", build)
    }

    /// `Min(selector)`.
    pub fn min<F>(self, build: F) -> CompileResult<Expr>
    where
        F: FnOnce(Expr) -> Expr,
    {
        self.aggregate("Min", build)
    }

    /// `Max(selector)`.
    pub fn max<F>(self, build: F) -> CompileResult<Expr>
    where
        F: FnOnce(Expr) -> Expr,
    {
        self.aggregate("Max", build)
    }

    /// `CountDistinct(selector)`.
    pub fn count_distinct<F>(self, build: F) -> CompileResult<Expr>
    where
        F: FnOnce(Expr) -> Expr,
    {
        self.aggregate("CountDistinct", build)
    }

    /// Returns the built tree.
    pub fn build(self) -> CompileResult<Expr> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(self.expr)
    }

    /// Compiles the built tree.
    pub fn compile(self, compiler: &QueryCompiler) -> CompileResult<QueryComponents> {
        let expr = self.build()?;
        compiler.compile(&expr)
    }

    fn ordering<F>(mut self, method: &str, build: F) -> Self
    where
        F: FnOnce(Expr) -> Expr,
    {
        let lambda = self.lambda(build);
        let element = self.element.clone();
        self.push_call(method, vec![Expr::Lambda(lambda)], element)
    }

    fn aggregate<F>(mut self, method: &str, build: F) -> CompileResult<Expr>
    where
        F: FnOnce(Expr) -> Expr,
    {
        let lambda = self.lambda(build);
        let ty = aggregate_type(method, &lambda.body.ty());
        self.terminal(method, vec![Expr::Lambda(lambda)], ty)
    }

    fn terminal(mut self, method: &str, args: Vec<Expr>, ty: Ty) -> CompileResult<Expr> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        let mut all = vec![self.expr];
        all.extend(args);
        Ok(Expr::call(method, all, ty))
    }

    fn lambda<F>(&mut self, build: F) -> Lambda
    where
        F: FnOnce(Expr) -> Expr,
    {
        let param = Param::new(self.next_auto_var(), self.element.clone());
        let body = build(param.to_expr());
        Lambda::new(vec![param], body)
    }

    fn result_lambda<R>(&mut self, key: &Lambda, group_element: Ty, result: R) -> Lambda
    where
        R: FnOnce(Expr, Expr) -> Expr,
    {
        let key_param = Param::new(self.next_auto_var(), key.body.ty());
        let group_param = Param::new(
            self.next_auto_var(),
            Ty::Grouping {
                key: Box::new(key.body.ty()),
                element: Box::new(group_element),
            },
        );
        let body = result(key_param.to_expr(), group_param.to_expr());
        Lambda::new(vec![key_param, group_param], body)
    }

    fn collection_element(&mut self, lambda: &Lambda) -> Option<Ty> {
        if self.error.is_some() {
            return None;
        }
        let element = lambda.body.ty().element_type().cloned();
        if element.is_none() {
            self.error = Some(CompileError::expression_not_supported(format!(
                "SelectMany({})",
                Expr::Lambda(lambda.clone())
            )));
        }
        element
    }

    fn push_call(mut self, method: &str, args: Vec<Expr>, element: Ty) -> Self {
        if self.error.is_some() {
            return self;
        }
        let source = mem::replace(&mut self.expr, Expr::constant(Value::Null));
        let mut all = vec![source];
        all.extend(args);
        self.expr = Expr::call(method, all, Ty::collection(element.clone()));
        self.element = element;
        self
    }

    fn next_auto_var(&mut self) -> String {
        let idx = self.next_var_idx;
        self.next_var_idx += 1;
        auto_var_name(idx)
    }
}

/// Aggregation over the group parameter of a result selector:
/// `Sum(group, e => ...)`, `Average(...)`, `Min`, `Max`, `CountDistinct`.
pub fn group_aggregate<F>(method: &str, group: Expr, build: F) -> Expr
where
    F: FnOnce(Expr) -> Expr,
{
    let element = match group.ty() {
        Ty::Grouping { element, .. } => *element,
        other => other.element_type().cloned().unwrap_or(Ty::Object),
    };
    let param = Param::new("e", element);
    let body = build(param.to_expr());
    let ty = aggregate_type(method, &body.ty());
    Expr::call(method, vec![group, Expr::lambda(vec![param], body)], ty)
}

/// `Count(group)` inside a result selector.
pub fn group_count(group: Expr) -> Expr {
    Expr::call("Count", vec![group], Ty::Int32)
}

/// Key of a grouping parameter.
pub fn group_key(group: Expr) -> Expr {
    let ty = match group.ty() {
        Ty::Grouping { key, .. } => *key,
        _ => Ty::Object,
    };
    group.member("Key", ty)
}

fn aggregate_type(method: &str, selector: &Ty) -> Ty {
    match method {
        "CountDistinct" => Ty::Int32,
        "Average" if selector.non_nullable() != &Ty::Decimal => Ty::Double,
        _ => selector.clone(),
    }
}

fn collect_parameters<I, S>(parameters: I) -> Vec<(String, Value)>
where
    I: IntoIterator<Item = (S, Value)>,
    S: Into<String>,
{
    parameters
        .into_iter()
        .map(|(name, value)| (name.into(), value))
        .collect()
}

fn auto_var_name(idx: usize) -> String {
    const FIRST: u8 = b'a';
    let letter = (FIRST + (idx % 26) as u8) as char;
    if idx < 26 {
        letter.to_string()
    } else {
        format!("{}{}", letter, idx / 26)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_nests_calls_source_first() {
        let expr = QueryBuilder::entity_set("Products", "Product")
            .filter(|p| p.member("Price", Ty::Double).greater_than(Expr::constant(5.0)))
            .order_by(|p| p.member("Name", Ty::String))
            .take(10)
            .build()
            .expect("builder should succeed");
        let Expr::Call { method, args, .. } = &expr else {
            panic!("expected call, got {expr}");
        };
        assert_eq!(method, "Take");
        assert!(matches!(&args[0], Expr::Call { method, .. } if method == "OrderBy"));
        assert_eq!(
            expr.to_string(),
            "Take(OrderBy(Where(Products, a => (a.Price > 5)), b => b.Name), 10)"
        );
    }

    #[test]
    fn select_many_requires_collection_selector() {
        let err = QueryBuilder::entity_set("Customers", "Customer")
            .select_many(|c| c.member("Name", Ty::String))
            .filter(|x| x.member("Length", Ty::Int32).greater_than(Expr::constant(1)))
            .build()
            .unwrap_err();
        assert!(matches!(err, CompileError::ExpressionNotSupported { .. }));
    }

    #[test]
    fn group_by_result_types_follow_the_selector() {
        let expr = QueryBuilder::entity_set("Sales", "Sale")
            .group_by_with_result(
                |s| s.member("Region", Ty::String),
                |key, group| {
                    Expr::new_record([
                        ("Region", key),
                        (
                            "Average",
                            group_aggregate("Average", group, |e| e.member("Units", Ty::Int32)),
                        ),
                    ])
                },
            )
            .build()
            .unwrap();
        let Ty::Collection(element) = expr.ty() else {
            panic!("expected a collection");
        };
        let record = element.as_record().expect("record result");
        assert_eq!(record.field("Average"), Some(&Ty::Double));
        assert_eq!(record.field("Region"), Some(&Ty::String));
    }

    #[test]
    fn auto_var_names_wrap_after_z() {
        assert_eq!(auto_var_name(0), "a");
        assert_eq!(auto_var_name(25), "z");
        assert_eq!(auto_var_name(26), "a1");
    }
}
