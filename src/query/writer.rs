//! Serialization of a bound resource chain into a request URI.
//!
//! [`UriWriter`] renders the resource path root-first and the leaf's query
//! options; [`ExpressionWriter`] renders bound expressions in the protocol's
//! expression syntax and tracks the protocol version they require.
//!
//! Protocol syntax is written as-is. Caller-supplied text (string literals
//! wherever they appear, custom option names and values) is percent-encoded
//! by [`encode_data`] when it is first written, and nowhere else.

use tracing::trace;

use crate::config::CompilerConfig;
use crate::query::ast::{BinaryOp, Expr, RootKind, UnaryOp};
use crate::query::errors::{CompileError, CompileResult};
use crate::query::options::{
    Aggregation, AggregationMethod, ApplyState, CountOption, ProtocolVersion, QueryOption,
};
use crate::query::resource::ResourceExpr;
use crate::query::value::{Ty, Value};

/// URI and version produced for a chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WrittenUri {
    /// Absolute (or service-relative) request URI.
    pub uri: String,
    /// Highest version any part of the request needs.
    pub version: ProtocolVersion,
}

/// Renders resource chains.
pub struct UriWriter<'a> {
    config: &'a CompilerConfig,
}

impl<'a> UriWriter<'a> {
    /// Creates a writer for `config`.
    pub fn new(config: &'a CompilerConfig) -> Self {
        Self { config }
    }

    /// Writes the chain ending at `leaf`.
    pub fn write(&self, leaf: &ResourceExpr) -> CompileResult<WrittenUri> {
        let mut expressions = ExpressionWriter::new();
        let mut path = String::new();
        for resource in leaf.chain() {
            self.write_segment(resource, &mut path)?;
        }
        if leaf.count_segment {
            path.push_str("/$count");
        }
        let options = self.write_options(leaf, &mut expressions)?;
        let root = self.config.service_root();
        let mut uri = if root.is_empty() {
            path
        } else {
            format!("{root}/{path}")
        };
        if !options.is_empty() {
            uri.push('?');
            uri.push_str(&options.join("&"));
        }
        let version = expressions.version();
        trace!(uri = %uri, version = %version, "wrote request uri");
        Ok(WrittenUri { uri, version })
    }

    fn write_segment(&self, resource: &ResourceExpr, path: &mut String) -> CompileResult<()> {
        if resource.source.is_some() {
            path.push('/');
        }
        path.push_str(&resource.name);
        if let Some(RootKind::Function { parameters, .. }) = &resource.root {
            let rendered = parameters
                .iter()
                .map(|(name, value)| Ok(format!("{name}={}", literal(value)?)))
                .collect::<CompileResult<Vec<_>>>()?;
            path.push('(');
            path.push_str(&rendered.join(","));
            path.push(')');
        }
        if let Some(keys) = resource.key_predicate() {
            match keys {
                [(_, value)] if self.config.key_as_segment => {
                    path.push('/');
                    path.push_str(&literal(value)?);
                }
                [(_, value)] => {
                    path.push('(');
                    path.push_str(&literal(value)?);
                    path.push(')');
                }
                composite => {
                    let rendered = composite
                        .iter()
                        .map(|(name, value)| Ok(format!("{name}={}", literal(value)?)))
                        .collect::<CompileResult<Vec<_>>>()?;
                    path.push('(');
                    path.push_str(&rendered.join(","));
                    path.push(')');
                }
            }
        }
        Ok(())
    }

    fn write_options(
        &self,
        leaf: &ResourceExpr,
        expressions: &mut ExpressionWriter,
    ) -> CompileResult<Vec<String>> {
        let mut options = Vec::new();
        if let Some(apply) = leaf.apply.as_ref().filter(|apply| !apply.is_empty()) {
            options.push(format!("$apply={}", write_apply(apply, expressions)?));
        }
        for option in &leaf.sequence_options {
            match option {
                QueryOption::Filter(filter) if !filter.predicates.is_empty() => {
                    options.push(format!(
                        "$filter={}",
                        expressions.conjunction(&filter.predicates)?
                    ));
                }
                QueryOption::OrderBy(order) if !order.selectors.is_empty() => {
                    let keys = order
                        .selectors
                        .iter()
                        .map(|selector| {
                            let key = expressions.write(&selector.expr)?;
                            Ok(if selector.descending {
                                format!("{key} desc")
                            } else {
                                key
                            })
                        })
                        .collect::<CompileResult<Vec<_>>>()?;
                    options.push(format!("$orderby={}", keys.join(",")));
                }
                QueryOption::Skip(skip) => options.push(format!("$skip={}", skip.count)),
                QueryOption::Take(take) => options.push(format!("$top={}", take.count)),
                _ => {}
            }
        }
        if !leaf.expand_paths.is_empty() {
            options.push(format!("$expand={}", leaf.expand_paths.join(",")));
        }
        if let Some(projection) = leaf.projection.as_ref().filter(|p| !p.paths.is_empty()) {
            options.push(format!("$select={}", projection.paths.join(",")));
        }
        match leaf.count {
            CountOption::True => options.push("$count=true".to_string()),
            CountOption::False => options.push("$count=false".to_string()),
            CountOption::None => {}
        }
        let mut custom: Vec<_> = leaf.custom_options.iter().collect();
        custom.sort();
        for (name, value) in custom {
            options.push(format!("{}={}", encode_data(name), encode_data(value)));
        }
        Ok(options)
    }
}

fn write_apply(apply: &ApplyState, expressions: &mut ExpressionWriter) -> CompileResult<String> {
    let mut steps = Vec::new();
    if !apply.predicates.is_empty() {
        steps.push(format!("filter({})", expressions.conjunction(&apply.predicates)?));
    }
    let aggregate = if apply.aggregations.is_empty() {
        None
    } else {
        let items = apply
            .aggregations
            .iter()
            .map(|aggregation| write_aggregation(aggregation, expressions))
            .collect::<CompileResult<Vec<_>>>()?;
        Some(format!("aggregate({})", items.join(",")))
    };
    if apply.grouping_expressions.is_empty() {
        steps.extend(aggregate);
    } else {
        let keys = apply
            .grouping_expressions
            .iter()
            .map(|key| expressions.write(key))
            .collect::<CompileResult<Vec<_>>>()?;
        match aggregate {
            Some(aggregate) => steps.push(format!("groupby(({}),{aggregate})", keys.join(","))),
            None => steps.push(format!("groupby(({}))", keys.join(","))),
        }
    }
    Ok(steps.join("/"))
}

fn write_aggregation(
    aggregation: &Aggregation,
    expressions: &mut ExpressionWriter,
) -> CompileResult<String> {
    match (&aggregation.expr, aggregation.method) {
        (_, AggregationMethod::Count) => Ok(format!("$count as {}", aggregation.alias)),
        (Some(expr), method) => Ok(format!(
            "{} with {} as {}",
            expressions.write(expr)?,
            method.keyword(),
            aggregation.alias
        )),
        (None, method) => Err(CompileError::method_not_supported(method.keyword())),
    }
}

/// Renders a literal value.
pub fn literal(value: &Value) -> CompileResult<String> {
    Ok(match value {
        Value::Null => "null".to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Int32(v) => v.to_string(),
        Value::Int64(v) => v.to_string(),
        Value::Single(v) => float_literal(f64::from(*v)),
        Value::Double(v) => float_literal(*v),
        Value::Decimal(v) => v.to_string(),
        Value::String(v) => format!("'{}'", encode_data(&v.replace('\'', "''"))),
        Value::Array { .. } | Value::Record(_) => {
            return Err(CompileError::expression_not_supported(value))
        }
    })
}

/// Percent-encodes caller-supplied text for the request URI.
pub fn encode_data(text: &str) -> String {
    urlencoding::encode(text).into_owned()
}

fn float_literal(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "INF" } else { "-INF" }.to_string()
    } else {
        v.to_string()
    }
}

const PREC_OR: u8 = 1;
const PREC_AND: u8 = 2;
const PREC_EQUALITY: u8 = 3;
const PREC_RELATIONAL: u8 = 4;
const PREC_ADDITIVE: u8 = 5;
const PREC_MULTIPLICATIVE: u8 = 6;
const PREC_UNARY: u8 = 7;
const PREC_PRIMARY: u8 = 8;

fn binary_operator(op: BinaryOp) -> (&'static str, u8) {
    match op {
        BinaryOp::OrElse => ("or", PREC_OR),
        BinaryOp::AndAlso => ("and", PREC_AND),
        BinaryOp::Equal => ("eq", PREC_EQUALITY),
        BinaryOp::NotEqual => ("ne", PREC_EQUALITY),
        BinaryOp::LessThan => ("lt", PREC_RELATIONAL),
        BinaryOp::LessThanOrEqual => ("le", PREC_RELATIONAL),
        BinaryOp::GreaterThan => ("gt", PREC_RELATIONAL),
        BinaryOp::GreaterThanOrEqual => ("ge", PREC_RELATIONAL),
        BinaryOp::Add => ("add", PREC_ADDITIVE),
        BinaryOp::Subtract => ("sub", PREC_ADDITIVE),
        BinaryOp::Multiply => ("mul", PREC_MULTIPLICATIVE),
        BinaryOp::Divide => ("div", PREC_MULTIPLICATIVE),
        BinaryOp::Modulo => ("mod", PREC_MULTIPLICATIVE),
    }
}

/// Renders bound expressions.
#[derive(Debug, Default)]
pub struct ExpressionWriter {
    lambda_variables: Vec<String>,
    version: ProtocolVersion,
}

impl ExpressionWriter {
    /// Creates a writer with no lambda variables in scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest version required by anything written so far.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Renders one expression.
    pub fn write(&mut self, expr: &Expr) -> CompileResult<String> {
        Ok(self.write_prec(expr)?.0)
    }

    /// Renders predicates joined with `and`.
    pub fn conjunction(&mut self, predicates: &[Expr]) -> CompileResult<String> {
        let parts = predicates
            .iter()
            .map(|predicate| self.operand(predicate, PREC_AND, false))
            .collect::<CompileResult<Vec<_>>>()?;
        Ok(parts.join(" and "))
    }

    fn operand(&mut self, expr: &Expr, parent: u8, right: bool) -> CompileResult<String> {
        let (text, prec) = self.write_prec(expr)?;
        let wrap = prec < parent || (right && prec == parent && parent > PREC_AND);
        Ok(if wrap { format!("({text})") } else { text })
    }

    fn write_prec(&mut self, expr: &Expr) -> CompileResult<(String, u8)> {
        match expr {
            Expr::Constant { value } => Ok((literal(value)?, PREC_PRIMARY)),
            Expr::Input(_) => Ok(("$it".to_string(), PREC_PRIMARY)),
            Expr::Parameter(param) => {
                if self.lambda_variables.contains(&param.name) {
                    Ok((param.name.clone(), PREC_PRIMARY))
                } else {
                    Err(CompileError::ParameterNotBound {
                        name: param.name.clone(),
                    })
                }
            }
            Expr::Member { expr: inner, name, .. } => self.member(inner, name),
            Expr::Unary { op, operand, .. } => match op {
                UnaryOp::Convert => self.write_prec(operand),
                UnaryOp::Not => Ok((
                    format!("not {}", self.operand(operand, PREC_UNARY, false)?),
                    PREC_UNARY,
                )),
                UnaryOp::Negate => Ok((
                    format!("-{}", self.operand(operand, PREC_UNARY, false)?),
                    PREC_UNARY,
                )),
            },
            Expr::Binary { op, left, right } => {
                if *op == BinaryOp::Add && (is_string(left) || is_string(right)) {
                    let l = self.write(left)?;
                    let r = self.write(right)?;
                    return Ok((format!("concat({l},{r})"), PREC_PRIMARY));
                }
                let (symbol, prec) = binary_operator(*op);
                let l = self.operand(left, prec, false)?;
                let r = self.operand(right, prec, true)?;
                Ok((format!("{l} {symbol} {r}"), prec))
            }
            Expr::Call {
                object,
                method,
                args,
                ..
            } => self.call(expr, object.as_deref(), method, args),
            _ => Err(CompileError::expression_not_supported(expr)),
        }
    }

    fn member(&mut self, inner: &Expr, name: &str) -> CompileResult<(String, u8)> {
        let owner = inner.ty();
        if name == "Length" && owner.non_nullable() == &Ty::String {
            return Ok((format!("length({})", self.write(inner)?), PREC_PRIMARY));
        }
        if name == "Count" && owner.element_type().is_some() {
            return Ok((format!("{}/$count", self.path_prefix(inner)?), PREC_PRIMARY));
        }
        match inner {
            Expr::Input(_) => Ok((name.to_string(), PREC_PRIMARY)),
            _ => Ok((format!("{}/{name}", self.path_prefix(inner)?), PREC_PRIMARY)),
        }
    }

    fn path_prefix(&mut self, expr: &Expr) -> CompileResult<String> {
        match expr {
            Expr::Member { .. } | Expr::Parameter(_) | Expr::Input(_) => self.write(expr),
            Expr::Unary {
                op: UnaryOp::Convert,
                operand,
                ..
            } => self.path_prefix(operand),
            other => Err(CompileError::expression_not_supported(other)),
        }
    }

    fn call(
        &mut self,
        expr: &Expr,
        object: Option<&Expr>,
        method: &str,
        args: &[Expr],
    ) -> CompileResult<(String, u8)> {
        if let Some(rendered) = self.membership(object, method, args)? {
            return Ok((rendered, PREC_RELATIONAL));
        }
        if let (None, "Any" | "All", [source, rest @ ..]) = (object, method, args) {
            return self.lambda_operator(expr, method, source, rest);
        }
        let function = match (object.is_some(), method, args.len()) {
            (true, "Contains", 1) => "contains",
            (true, "StartsWith", 1) => "startswith",
            (true, "EndsWith", 1) => "endswith",
            (true, "ToLower", 0) => "tolower",
            (true, "ToUpper", 0) => "toupper",
            (true, "Trim", 0) => "trim",
            (true, "IndexOf", 1) => "indexof",
            (true, "Substring", 1 | 2) => "substring",
            (false, "Concat", 2) => "concat",
            (false, "Round", 1) => "round",
            (false, "Floor", 1) => "floor",
            (false, "Ceiling", 1) => "ceiling",
            _ => return Err(CompileError::method_not_supported(method)),
        };
        let mut rendered = Vec::with_capacity(args.len() + 1);
        if let Some(object) = object {
            rendered.push(self.write(object)?);
        }
        for arg in args {
            rendered.push(self.write(arg)?);
        }
        Ok((format!("{function}({})", rendered.join(",")), PREC_PRIMARY))
    }

    /// `array.Contains(x)` / `Contains(array, x)` over a constant array → `x in (...)`.
    fn membership(
        &mut self,
        object: Option<&Expr>,
        method: &str,
        args: &[Expr],
    ) -> CompileResult<Option<String>> {
        if method != "Contains" {
            return Ok(None);
        }
        let (array, item) = match (object, args) {
            (Some(array), [item]) => (array, item),
            (None, [array, item]) => (array, item),
            _ => return Ok(None),
        };
        let Some(Value::Array { items, .. }) = array.as_constant() else {
            return Ok(None);
        };
        let values = items.iter().map(literal).collect::<CompileResult<Vec<_>>>()?;
        let item = self.operand(item, PREC_RELATIONAL, false)?;
        self.version = self.version.max(ProtocolVersion::V4_01);
        Ok(Some(format!("{item} in ({})", values.join(","))))
    }

    fn lambda_operator(
        &mut self,
        expr: &Expr,
        method: &str,
        source: &Expr,
        rest: &[Expr],
    ) -> CompileResult<(String, u8)> {
        let operator = method.to_ascii_lowercase();
        let source = self.path_prefix(source)?;
        match rest {
            [] if method == "Any" => Ok((format!("{source}/any()"), PREC_PRIMARY)),
            [Expr::Lambda(lambda)] => {
                let param = lambda
                    .single_param()
                    .ok_or_else(|| CompileError::expression_not_supported(expr))?;
                self.lambda_variables.push(param.name.clone());
                let body = self.write(&lambda.body);
                self.lambda_variables.pop();
                Ok((
                    format!("{source}/{operator}({}:{})", param.name, body?),
                    PREC_PRIMARY,
                ))
            }
            _ => Err(CompileError::expression_not_supported(expr)),
        }
    }
}

fn is_string(expr: &Expr) -> bool {
    expr.ty().non_nullable() == &Ty::String
}
