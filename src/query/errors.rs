#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

use crate::query::eval::EvalError;
use crate::query::options::ProtocolVersion;

/// Convenience alias for compiler results.
pub type CompileResult<T> = std::result::Result<T, CompileError>;

/// Structured errors emitted while lowering a query tree.
///
/// Every variant is a synchronous, compile-time failure that names the
/// offending construct: a path token, a method name, or the expression text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// A reserved token (`$ref`, `$count`, ...) reached a select/expand path.
    #[error("system token '{token}' is not allowed in a select or expand path")]
    IllegalSystemToken { token: String },
    /// Grouping key is not a property chain rooted at the lambda parameter.
    #[error("'{expr}' is not a valid grouping expression")]
    InvalidGroupingExpression { expr: String },
    /// Projection over a transparent scope touched more than the bound leaf.
    #[error("projection '{expr}' may only reference members of the queried resource")]
    LeafOnlyProjection { expr: String },
    /// The call maps to no known resource or aggregation operator.
    #[error("method '{method}' is not supported")]
    MethodNotSupported { method: String },
    /// An operator followed one it cannot be composed after.
    #[error("method '{method}' is not supported after '{after}'")]
    UnsupportedAfter { method: String, after: String },
    /// A clause referenced a resource other than its input.
    #[error("{clause} expression '{expr}' references a resource other than its input")]
    CrossResourceReference { clause: &'static str, expr: String },
    /// The source of a sequence operator is not a resource.
    #[error("'{expr}' is not a queryable resource")]
    NotAResource { expr: String },
    /// Entity set, singleton, or entity type is absent from the metadata.
    #[error("unknown resource '{name}'")]
    UnknownResource { name: String },
    /// Member is not declared on the type.
    #[error("type '{ty}' has no member '{member}'")]
    UnknownMember { ty: String, member: String },
    /// Navigation requested off a resource that is not a single entity.
    #[error("navigation '{member}' requires a single source resource")]
    NavigationRequiresSingleSource { member: String },
    /// Operator argument did not reduce to a constant of the right shape.
    #[error("argument '{expr}' of '{method}' must be a {expected} constant")]
    NonConstantArgument {
        method: String,
        expr: String,
        expected: &'static str,
    },
    /// Action results cannot be composed with further operators.
    #[error("operation '{name}' cannot be composed with '{method}'")]
    NotComposable { name: String, method: String },
    /// Custom option would collide with a system query option.
    #[error("query option '{name}' is reserved")]
    ReservedQueryOption { name: String },
    /// Expression form has no wire-protocol translation.
    #[error("expression '{expr}' is not supported")]
    ExpressionNotSupported { expr: String },
    /// A lambda parameter survived binding without a resource to point at.
    #[error("parameter '{name}' is not bound to a resource")]
    ParameterNotBound { name: String },
    /// Operation parameters do not match the HTTP method.
    #[error("{kind} operation parameters are not allowed with {method}")]
    InvalidOperationParameters {
        kind: &'static str,
        method: &'static str,
    },
    /// The query needs a newer protocol than the configuration allows.
    #[error("query requires protocol version {required} but the maximum is {max}")]
    ProtocolVersionTooLow {
        required: ProtocolVersion,
        max: ProtocolVersion,
    },
    /// Evaluating a closed subexpression failed.
    #[error(transparent)]
    Evaluation(#[from] EvalError),
}

impl CompileError {
    /// Builds a [`CompileError::MethodNotSupported`].
    pub fn method_not_supported(method: impl Into<String>) -> Self {
        CompileError::MethodNotSupported {
            method: method.into(),
        }
    }

    /// Builds a [`CompileError::UnsupportedAfter`].
    pub fn unsupported_after(method: impl Into<String>, after: impl Into<String>) -> Self {
        CompileError::UnsupportedAfter {
            method: method.into(),
            after: after.into(),
        }
    }

    /// Builds a [`CompileError::ExpressionNotSupported`] from any displayable
    /// expression.
    pub fn expression_not_supported(expr: impl fmt::Display) -> Self {
        CompileError::ExpressionNotSupported {
            expr: expr.to_string(),
        }
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            CompileError::IllegalSystemToken { .. } => "IllegalSystemToken",
            CompileError::InvalidGroupingExpression { .. } => "InvalidGroupingExpression",
            CompileError::LeafOnlyProjection { .. } => "LeafOnlyProjection",
            CompileError::MethodNotSupported { .. } => "MethodNotSupported",
            CompileError::UnsupportedAfter { .. } => "MethodNotSupported",
            CompileError::CrossResourceReference { .. } => "CrossResourceReference",
            CompileError::NotAResource { .. } => "NotAResource",
            CompileError::UnknownResource { .. } => "UnknownResource",
            CompileError::UnknownMember { .. } => "UnknownMember",
            CompileError::NavigationRequiresSingleSource { .. } => "NavigationRequiresSingleSource",
            CompileError::NonConstantArgument { .. } => "NonConstantArgument",
            CompileError::NotComposable { .. } => "NotComposable",
            CompileError::ReservedQueryOption { .. } => "ReservedQueryOption",
            CompileError::ExpressionNotSupported { .. } => "ExpressionNotSupported",
            CompileError::ParameterNotBound { .. } => "ParameterNotBound",
            CompileError::InvalidOperationParameters { .. } => "InvalidOperationParameters",
            CompileError::ProtocolVersionTooLow { .. } => "ProtocolVersionTooLow",
            CompileError::Evaluation(_) => "Evaluation",
        }
    }
}

/// Convenience wrapper that formats compile errors with their codes.
pub struct CompileErrorWithCode<'a>(pub &'a CompileError);

impl fmt::Display for CompileErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}
