//! Expression tree handed to the compiler by the query-building front end.
//!
//! The front end owns every variant except [`Expr::Input`], which is the
//! single adapter node the compiler uses to splice references to its own
//! resource IR back into front-end expressions (filter predicates, ordering
//! selectors, grouping keys). Nodes are immutable; passes that rewrite a tree
//! build a new one through [`Expr::try_map_children`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::query::value::{RecordType, Ty, Value};

/// Identifier the binder assigns to each resource in a compiled chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub u32);

/// Lambda parameter; identity is the name within its lambda scope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Param {
    /// Parameter name.
    pub name: String,
    /// Declared type.
    pub ty: Ty,
}

impl Param {
    /// Creates a parameter.
    pub fn new(name: impl Into<String>, ty: Ty) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    /// Reference to this parameter as an expression.
    pub fn to_expr(&self) -> Expr {
        Expr::Parameter(self.clone())
    }
}

/// Lambda abstraction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
    /// Declared parameters.
    pub params: Vec<Param>,
    /// Body expression.
    pub body: Box<Expr>,
}

impl Lambda {
    /// Creates a lambda.
    pub fn new(params: Vec<Param>, body: Expr) -> Self {
        Self {
            params,
            body: Box::new(body),
        }
    }

    /// The single parameter of a unary lambda.
    pub fn single_param(&self) -> Option<&Param> {
        match self.params.as_slice() {
            [param] => Some(param),
            _ => None,
        }
    }

    /// Whether the body is the parameter itself (`x => x`).
    pub fn is_identity(&self) -> bool {
        match (self.single_param(), self.body.as_ref()) {
            (Some(param), Expr::Parameter(body)) => body.name == param.name,
            _ => false,
        }
    }
}

/// `Name = expr` entry of a member-initialization node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemberAssignment {
    /// Assigned member.
    pub member: String,
    /// Assigned value.
    pub expr: Expr,
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    /// Logical negation.
    Not,
    /// Arithmetic negation.
    Negate,
    /// Conversion to the node's type.
    Convert,
}

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// `%`
    Modulo,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
    /// `&&`
    AndAlso,
    /// `||`
    OrElse,
}

impl BinaryOp {
    /// Whether the operator yields a boolean from two operands of any type.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::LessThan
                | BinaryOp::LessThanOrEqual
                | BinaryOp::GreaterThan
                | BinaryOp::GreaterThanOrEqual
        )
    }

    /// Whether the operator is `&&` or `||`.
    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::AndAlso | BinaryOp::OrElse)
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::LessThan => "<",
            BinaryOp::LessThanOrEqual => "<=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterThanOrEqual => ">=",
            BinaryOp::AndAlso => "&&",
            BinaryOp::OrElse => "||",
        }
    }
}

/// What a resource root names on the service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RootKind {
    /// Entity set.
    EntitySet,
    /// Singleton.
    Singleton,
    /// Composable function invoked with URI parameters.
    Function {
        /// Parameters rendered inline in the path.
        parameters: Vec<(String, Value)>,
        /// Whether the function returns a collection.
        returns_collection: bool,
    },
    /// Action invoked with body parameters.
    Action {
        /// Parameters sent in the request body.
        parameters: Vec<(String, Value)>,
    },
}

/// Root of a query: an entity set, singleton, or service operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceRoot {
    /// Name on the service.
    pub name: String,
    /// Element type.
    pub element_type: Ty,
    /// Kind of root.
    pub kind: RootKind,
}

impl ResourceRoot {
    /// Whether the root yields a collection.
    pub fn is_collection(&self) -> bool {
        match &self.kind {
            RootKind::EntitySet => true,
            RootKind::Singleton | RootKind::Action { .. } => false,
            RootKind::Function {
                returns_collection, ..
            } => *returns_collection,
        }
    }
}

/// Reference from a front-end expression to a resource in the bound chain.
///
/// The reference records a relation only; the resource is owned by the
/// chain. When the chain is rebuilt the reference is retargeted with
/// [`InputRef::override_target`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputRef {
    /// Resource the bound variable ranges over.
    pub target: ResourceId,
    /// Element type of that resource.
    pub ty: Ty,
}

impl InputRef {
    /// Points the reference at another resource with the same element type.
    pub fn override_target(&mut self, target: ResourceId, ty: &Ty) {
        debug_assert_eq!(&self.ty, ty, "input reference retargeted across types");
        self.target = target;
    }
}

/// Expression node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Expr {
    /// Literal value.
    Constant {
        /// The value.
        value: Value,
    },
    /// Reference to a lambda parameter.
    Parameter(Param),
    /// Member access.
    Member {
        /// Instance the member is read from.
        expr: Box<Expr>,
        /// Member name.
        name: String,
        /// Member type.
        ty: Ty,
    },
    /// Method call; `object` is `None` for static calls, whose first argument
    /// is the source for sequence operators.
    Call {
        /// Receiver for instance calls.
        object: Option<Box<Expr>>,
        /// Method name.
        method: String,
        /// Arguments.
        args: Vec<Expr>,
        /// Result type.
        ty: Ty,
    },
    /// Lambda abstraction.
    Lambda(Lambda),
    /// Anonymous object construction `new { A = .., B = .. }`.
    New {
        /// Constructed type.
        ty: Ty,
        /// Named member values in order.
        members: Vec<(String, Expr)>,
    },
    /// Named-type member initialization `new T { A = .. }`.
    MemberInit {
        /// Constructed type.
        ty: Ty,
        /// Member assignments in order.
        bindings: Vec<MemberAssignment>,
    },
    /// Array construction.
    NewArray {
        /// Declared element type; `Ty::Object` when inferred.
        element: Ty,
        /// Items.
        items: Vec<Expr>,
    },
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expr>,
        /// Result type.
        ty: Ty,
    },
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `test ? if_true : if_false`.
    Conditional {
        /// Condition.
        test: Box<Expr>,
        /// Value when true.
        if_true: Box<Expr>,
        /// Value when false.
        if_false: Box<Expr>,
    },
    /// Resource root.
    Root(ResourceRoot),
    /// Reference into the compiler's resource chain.
    Input(InputRef),
}

impl Expr {
    /// Literal node.
    pub fn constant(value: impl Into<Value>) -> Self {
        Expr::Constant {
            value: value.into(),
        }
    }

    /// Parameter reference.
    pub fn param(name: impl Into<String>, ty: Ty) -> Self {
        Expr::Parameter(Param::new(name, ty))
    }

    /// Member access off `self`.
    pub fn member(self, name: impl Into<String>, ty: Ty) -> Self {
        Expr::Member {
            expr: Box::new(self),
            name: name.into(),
            ty,
        }
    }

    /// Instance method call on `self`.
    pub fn method(self, method: impl Into<String>, args: Vec<Expr>, ty: Ty) -> Self {
        Expr::Call {
            object: Some(Box::new(self)),
            method: method.into(),
            args,
            ty,
        }
    }

    /// Static call.
    pub fn call(method: impl Into<String>, args: Vec<Expr>, ty: Ty) -> Self {
        Expr::Call {
            object: None,
            method: method.into(),
            args,
            ty,
        }
    }

    /// Lambda node.
    pub fn lambda(params: Vec<Param>, body: Expr) -> Self {
        Expr::Lambda(Lambda::new(params, body))
    }

    /// Binary node.
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Unary node.
    pub fn unary(op: UnaryOp, operand: Expr, ty: Ty) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
            ty,
        }
    }

    /// Logical negation.
    pub fn logical_not(self) -> Self {
        Expr::unary(UnaryOp::Not, self, Ty::Bool)
    }

    /// `self == other`
    pub fn equal(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Equal, self, other)
    }

    /// `self != other`
    pub fn not_equal(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::NotEqual, self, other)
    }

    /// `self > other`
    pub fn greater_than(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::GreaterThan, self, other)
    }

    /// `self >= other`
    pub fn greater_or_equal(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::GreaterThanOrEqual, self, other)
    }

    /// `self < other`
    pub fn less_than(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::LessThan, self, other)
    }

    /// `self <= other`
    pub fn less_or_equal(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::LessThanOrEqual, self, other)
    }

    /// `self && other`
    pub fn and_also(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::AndAlso, self, other)
    }

    /// `self || other`
    pub fn or_else(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::OrElse, self, other)
    }

    /// Anonymous object construction.
    pub fn new_record<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = (S, Expr)>,
        S: Into<String>,
    {
        let members: Vec<(String, Expr)> = members
            .into_iter()
            .map(|(name, expr)| (name.into(), expr))
            .collect();
        let ty = Ty::Record(RecordType {
            fields: members
                .iter()
                .map(|(name, expr)| (name.clone(), expr.ty()))
                .collect(),
        });
        Expr::New { ty, members }
    }

    /// Static type of the node.
    pub fn ty(&self) -> Ty {
        match self {
            Expr::Constant { value } => value.ty(),
            Expr::Parameter(param) => param.ty.clone(),
            Expr::Member { ty, .. }
            | Expr::Call { ty, .. }
            | Expr::New { ty, .. }
            | Expr::MemberInit { ty, .. }
            | Expr::Unary { ty, .. } => ty.clone(),
            Expr::Lambda(_) => Ty::Object,
            Expr::NewArray { element, .. } => Ty::collection(element.clone()),
            Expr::Binary { op, left, .. } => {
                if op.is_comparison() || op.is_logical() {
                    Ty::Bool
                } else {
                    left.ty()
                }
            }
            Expr::Conditional { if_true, .. } => if_true.ty(),
            Expr::Root(root) => {
                if root.is_collection() {
                    Ty::collection(root.element_type.clone())
                } else {
                    root.element_type.clone()
                }
            }
            Expr::Input(input) => input.ty.clone(),
        }
    }

    /// Direct children, in the order [`Expr::try_map_children`] visits them.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Constant { .. } | Expr::Parameter(_) | Expr::Root(_) | Expr::Input(_) => {
                Vec::new()
            }
            Expr::Member { expr, .. } => vec![&**expr],
            Expr::Call { object, args, .. } => object.iter().map(|o| &**o).chain(args).collect(),
            Expr::Lambda(lambda) => vec![&*lambda.body],
            Expr::New { members, .. } => members.iter().map(|(_, expr)| expr).collect(),
            Expr::MemberInit { bindings, .. } => bindings.iter().map(|b| &b.expr).collect(),
            Expr::NewArray { items, .. } => items.iter().collect(),
            Expr::Unary { operand, .. } => vec![&**operand],
            Expr::Binary { left, right, .. } => vec![&**left, &**right],
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => vec![&**test, &**if_true, &**if_false],
        }
    }

    /// Rebuilds the node with every direct child replaced by `f(child)`.
    pub fn try_map_children<E, F>(&self, mut f: F) -> Result<Expr, E>
    where
        F: FnMut(&Expr) -> Result<Expr, E>,
    {
        Ok(match self {
            Expr::Constant { .. } | Expr::Parameter(_) | Expr::Root(_) | Expr::Input(_) => {
                self.clone()
            }
            Expr::Member { expr, name, ty } => Expr::Member {
                expr: Box::new(f(expr)?),
                name: name.clone(),
                ty: ty.clone(),
            },
            Expr::Call {
                object,
                method,
                args,
                ty,
            } => {
                let object = match object {
                    Some(object) => Some(Box::new(f(object)?)),
                    None => None,
                };
                let args = args.iter().map(&mut f).collect::<Result<Vec<_>, E>>()?;
                Expr::Call {
                    object,
                    method: method.clone(),
                    args,
                    ty: ty.clone(),
                }
            }
            Expr::Lambda(lambda) => Expr::Lambda(Lambda {
                params: lambda.params.clone(),
                body: Box::new(f(&lambda.body)?),
            }),
            Expr::New { ty, members } => Expr::New {
                ty: ty.clone(),
                members: members
                    .iter()
                    .map(|(name, expr)| Ok((name.clone(), f(expr)?)))
                    .collect::<Result<Vec<_>, E>>()?,
            },
            Expr::MemberInit { ty, bindings } => Expr::MemberInit {
                ty: ty.clone(),
                bindings: bindings
                    .iter()
                    .map(|binding| {
                        Ok(MemberAssignment {
                            member: binding.member.clone(),
                            expr: f(&binding.expr)?,
                        })
                    })
                    .collect::<Result<Vec<_>, E>>()?,
            },
            Expr::NewArray { element, items } => Expr::NewArray {
                element: element.clone(),
                items: items.iter().map(&mut f).collect::<Result<Vec<_>, E>>()?,
            },
            Expr::Unary { op, operand, ty } => Expr::Unary {
                op: *op,
                operand: Box::new(f(operand)?),
                ty: ty.clone(),
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op: *op,
                left: Box::new(f(left)?),
                right: Box::new(f(right)?),
            },
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => Expr::Conditional {
                test: Box::new(f(test)?),
                if_true: Box::new(f(if_true)?),
                if_false: Box::new(f(if_false)?),
            },
        })
    }

    /// Lambda payload, looking through nothing else.
    pub fn as_lambda(&self) -> Option<&Lambda> {
        match self {
            Expr::Lambda(lambda) => Some(lambda),
            _ => None,
        }
    }

    /// Constant payload.
    pub fn as_constant(&self) -> Option<&Value> {
        match self {
            Expr::Constant { value } => Some(value),
            _ => None,
        }
    }

    /// Splits a pure member chain `root.a.b.c` into its root and the member
    /// names in root-first order. Returns `None` for anything that is not a
    /// member chain over a parameter or input reference.
    pub fn member_chain(&self) -> Option<(&Expr, Vec<&str>)> {
        let mut names = Vec::new();
        let mut current = self;
        loop {
            match current {
                Expr::Member { expr, name, .. } => {
                    names.push(name.as_str());
                    current = expr;
                }
                Expr::Unary {
                    op: UnaryOp::Convert,
                    operand,
                    ..
                } => current = operand,
                Expr::Parameter(_) | Expr::Input(_) => {
                    names.reverse();
                    return Some((current, names));
                }
                _ => return None,
            }
        }
    }

    /// Whether any node in the tree satisfies `pred`.
    pub fn any(&self, pred: &mut dyn FnMut(&Expr) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        self.children()
            .into_iter()
            .any(|child| child.any(&mut *pred))
    }

    /// Whether the tree mentions a parameter named `name` (shadowing aware).
    pub fn references_parameter(&self, name: &str) -> bool {
        match self {
            Expr::Parameter(param) => param.name == name,
            Expr::Lambda(lambda) if lambda.params.iter().any(|p| p.name == name) => false,
            other => other
                .children()
                .into_iter()
                .any(|child| child.references_parameter(name)),
        }
    }

    /// Whether some parameter in the tree is not declared by a lambda inside it.
    pub fn has_free_parameter(&self) -> bool {
        fn walk<'e>(expr: &'e Expr, declared: &mut Vec<&'e str>) -> bool {
            match expr {
                Expr::Parameter(param) => !declared.contains(&param.name.as_str()),
                Expr::Lambda(lambda) => {
                    let depth = declared.len();
                    declared.extend(lambda.params.iter().map(|p| p.name.as_str()));
                    let free = walk(&lambda.body, declared);
                    declared.truncate(depth);
                    free
                }
                other => other
                    .children()
                    .into_iter()
                    .any(|child| walk(child, declared)),
            }
        }
        walk(self, &mut Vec::new())
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[&Expr]) -> fmt::Result {
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant { value } => write!(f, "{value}"),
            Expr::Parameter(param) => write!(f, "{}", param.name),
            Expr::Member { expr, name, .. } => write!(f, "{expr}.{name}"),
            Expr::Call {
                object,
                method,
                args,
                ..
            } => {
                if let Some(object) = object {
                    write!(f, "{object}.")?;
                }
                write!(f, "{method}(")?;
                write_list(f, &args.iter().collect::<Vec<_>>())?;
                write!(f, ")")
            }
            Expr::Lambda(lambda) => {
                match lambda.params.as_slice() {
                    [single] => write!(f, "{}", single.name)?,
                    params => {
                        write!(f, "(")?;
                        for (idx, p) in params.iter().enumerate() {
                            if idx > 0 {
                                write!(f, ", ")?;
                            }
                            write!(f, "{}", p.name)?;
                        }
                        write!(f, ")")?;
                    }
                }
                write!(f, " => {}", lambda.body)
            }
            Expr::New { members, .. } => {
                write!(f, "new {{ ")?;
                for (idx, (name, expr)) in members.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name} = {expr}")?;
                }
                write!(f, " }}")
            }
            Expr::MemberInit { ty, bindings } => {
                write!(f, "new {ty} {{ ")?;
                for (idx, binding) in bindings.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", binding.member, binding.expr)?;
                }
                write!(f, " }}")
            }
            Expr::NewArray { items, .. } => {
                write!(f, "new[] {{ ")?;
                write_list(f, &items.iter().collect::<Vec<_>>())?;
                write!(f, " }}")
            }
            Expr::Unary { op, operand, ty } => match op {
                UnaryOp::Not => write!(f, "!({operand})"),
                UnaryOp::Negate => write!(f, "-{operand}"),
                UnaryOp::Convert => write!(f, "({ty}){operand}"),
            },
            Expr::Binary { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => write!(f, "({test} ? {if_true} : {if_false})"),
            Expr::Root(root) => write!(f, "{}", root.name),
            Expr::Input(_) => write!(f, "$it"),
        }
    }
}
