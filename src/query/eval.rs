//! Local interpreter for closed expression trees.
//!
//! The partial evaluator hands every subtree it nominated to [`evaluate`] and
//! splices the result back as a constant. Numeric operators follow the usual
//! promotion ladder (int → long → float → double, decimal only with integral
//! operands); integral and decimal arithmetic is checked.

use std::cmp::Ordering;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

use crate::query::ast::{BinaryOp, Expr, UnaryOp};
use crate::query::value::{Ty, Value};

/// Failure raised while computing a closed subexpression locally.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// Integral or decimal division by zero.
    #[error("division by zero in '{expr}'")]
    DivideByZero {
        /// Offending expression.
        expr: String,
    },
    /// Checked arithmetic overflowed.
    #[error("arithmetic overflow in '{expr}'")]
    Overflow {
        /// Offending expression.
        expr: String,
    },
    /// Operand types do not support the operator.
    #[error("operator in '{expr}' cannot be applied to {left} and {right}")]
    TypeMismatch {
        /// Offending expression.
        expr: String,
        /// Left operand type.
        left: String,
        /// Right operand type.
        right: String,
    },
    /// Member read from a value that does not expose it.
    #[error("member '{member}' cannot be read from '{expr}'")]
    MissingMember {
        /// Member name.
        member: String,
        /// Instance expression.
        expr: String,
    },
    /// Null instance dereferenced.
    #[error("null reference in '{expr}'")]
    NullReference {
        /// Offending expression.
        expr: String,
    },
    /// Call has no local implementation.
    #[error("call to '{method}' cannot be evaluated locally")]
    UnsupportedCall {
        /// Method name.
        method: String,
    },
    /// Conversion is not representable.
    #[error("cannot convert '{value}' to {ty}")]
    InvalidConversion {
        /// Source value.
        value: String,
        /// Target type.
        ty: String,
    },
    /// Argument outside the accepted range.
    #[error("argument out of range in '{expr}'")]
    OutOfRange {
        /// Offending expression.
        expr: String,
    },
    /// Node depends on a lambda parameter or a resource.
    #[error("'{expr}' cannot be evaluated locally")]
    NotEvaluable {
        /// Offending expression.
        expr: String,
    },
}

/// Convenience alias for evaluation results.
pub type EvalResult<T> = std::result::Result<T, EvalError>;

/// Computes the value of a closed expression.
pub fn evaluate(expr: &Expr) -> EvalResult<Value> {
    match expr {
        Expr::Constant { value } => Ok(value.clone()),
        Expr::Parameter(_) | Expr::Lambda(_) | Expr::Root(_) | Expr::Input(_) => {
            Err(EvalError::NotEvaluable {
                expr: expr.to_string(),
            })
        }
        Expr::Member { expr: inner, name, .. } => {
            let instance = evaluate(inner)?;
            read_member(&instance, name, inner)
        }
        Expr::Call {
            object,
            method,
            args,
            ..
        } => {
            let receiver = match object {
                Some(object) => Some(evaluate(object)?),
                None => None,
            };
            let args = args.iter().map(evaluate).collect::<EvalResult<Vec<_>>>()?;
            match receiver {
                Some(receiver) => call_instance(&receiver, method, &args, expr),
                None => call_static(method, &args, expr),
            }
        }
        Expr::New { members, .. } => Ok(Value::Record(
            members
                .iter()
                .map(|(name, member)| Ok((name.clone(), evaluate(member)?)))
                .collect::<EvalResult<Vec<_>>>()?,
        )),
        Expr::MemberInit { bindings, .. } => Ok(Value::Record(
            bindings
                .iter()
                .map(|binding| Ok((binding.member.clone(), evaluate(&binding.expr)?)))
                .collect::<EvalResult<Vec<_>>>()?,
        )),
        Expr::NewArray { element, items } => {
            let items = items.iter().map(evaluate).collect::<EvalResult<Vec<_>>>()?;
            Ok(Value::Array {
                element: runtime_element_type(element, &items),
                items,
            })
        }
        Expr::Unary { op, operand, ty } => {
            let value = evaluate(operand)?;
            unary(*op, value, ty, expr)
        }
        Expr::Binary { op, left, right } => binary(*op, left, right, expr),
        Expr::Conditional {
            test,
            if_true,
            if_false,
        } => match evaluate(test)? {
            Value::Bool(true) => evaluate(if_true),
            Value::Bool(false) => evaluate(if_false),
            other => Err(EvalError::TypeMismatch {
                expr: expr.to_string(),
                left: other.ty().to_string(),
                right: Ty::Bool.to_string(),
            }),
        },
    }
}

/// Element type an array actually carries at run time.
///
/// When the declared element type was inferred (`Ty::Object`) and every
/// non-null item shares one concrete type, that type wins.
pub fn runtime_element_type(declared: &Ty, items: &[Value]) -> Ty {
    if declared != &Ty::Object {
        return declared.clone();
    }
    let mut found: Option<Ty> = None;
    for item in items {
        if matches!(item, Value::Null) {
            continue;
        }
        let ty = item.ty();
        match &found {
            None => found = Some(ty),
            Some(existing) if *existing == ty => {}
            Some(_) => return Ty::Object,
        }
    }
    found.unwrap_or(Ty::Object)
}

fn read_member(instance: &Value, name: &str, inner: &Expr) -> EvalResult<Value> {
    match (instance, name) {
        (Value::Null, _) => Err(EvalError::NullReference {
            expr: inner.to_string(),
        }),
        (Value::Record(_), _) => instance.field(name).cloned().ok_or_else(|| {
            EvalError::MissingMember {
                member: name.to_string(),
                expr: inner.to_string(),
            }
        }),
        (Value::String(s), "Length") => Ok(Value::Int32(char_len(s, inner)?)),
        (Value::Array { items, .. }, "Length" | "Count") => {
            let len = i32::try_from(items.len()).map_err(|_| EvalError::Overflow {
                expr: inner.to_string(),
            })?;
            Ok(Value::Int32(len))
        }
        _ => Err(EvalError::MissingMember {
            member: name.to_string(),
            expr: inner.to_string(),
        }),
    }
}

fn char_len(s: &str, expr: &Expr) -> EvalResult<i32> {
    i32::try_from(s.chars().count()).map_err(|_| EvalError::Overflow {
        expr: expr.to_string(),
    })
}

fn expect_string<'v>(value: &'v Value, method: &str) -> EvalResult<&'v str> {
    match value {
        Value::String(s) => Ok(s),
        _ => Err(EvalError::UnsupportedCall {
            method: method.to_string(),
        }),
    }
}

fn expect_index(value: &Value, expr: &Expr) -> EvalResult<usize> {
    value
        .as_i64()
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| EvalError::OutOfRange {
            expr: expr.to_string(),
        })
}

fn call_instance(receiver: &Value, method: &str, args: &[Value], expr: &Expr) -> EvalResult<Value> {
    let s = match receiver {
        Value::Null => {
            return Err(EvalError::NullReference {
                expr: expr.to_string(),
            })
        }
        Value::String(s) => s.as_str(),
        Value::Array { items, .. } if method == "Contains" && args.len() == 1 => {
            return Ok(Value::Bool(items.iter().any(|item| values_equal(item, &args[0]))));
        }
        _ => {
            return Err(EvalError::UnsupportedCall {
                method: method.to_string(),
            })
        }
    };
    match (method, args) {
        ("ToUpper", []) => Ok(Value::String(s.to_uppercase())),
        ("ToLower", []) => Ok(Value::String(s.to_lowercase())),
        ("Trim", []) => Ok(Value::String(s.trim().to_string())),
        ("Contains", [needle]) => Ok(Value::Bool(s.contains(expect_string(needle, method)?))),
        ("StartsWith", [prefix]) => {
            Ok(Value::Bool(s.starts_with(expect_string(prefix, method)?)))
        }
        ("EndsWith", [suffix]) => Ok(Value::Bool(s.ends_with(expect_string(suffix, method)?))),
        ("IndexOf", [needle]) => {
            let needle = expect_string(needle, method)?;
            let idx = match s.find(needle) {
                Some(byte_idx) => char_len(&s[..byte_idx], expr)?,
                None => -1,
            };
            Ok(Value::Int32(idx))
        }
        ("Substring", [start]) => {
            let start = expect_index(start, expr)?;
            if start > s.chars().count() {
                return Err(EvalError::OutOfRange {
                    expr: expr.to_string(),
                });
            }
            Ok(Value::String(s.chars().skip(start).collect()))
        }
        ("Substring", [start, len]) => {
            let start = expect_index(start, expr)?;
            let len = expect_index(len, expr)?;
            if start + len > s.chars().count() {
                return Err(EvalError::OutOfRange {
                    expr: expr.to_string(),
                });
            }
            Ok(Value::String(s.chars().skip(start).take(len).collect()))
        }
        ("Replace", [from, to]) => Ok(Value::String(
            s.replace(expect_string(from, method)?, expect_string(to, method)?),
        )),
        ("CompareTo", [other]) => Ok(Value::Int32(ordering_to_int(
            s.cmp(expect_string(other, method)?),
        ))),
        _ => Err(EvalError::UnsupportedCall {
            method: method.to_string(),
        }),
    }
}

fn call_static(method: &str, args: &[Value], expr: &Expr) -> EvalResult<Value> {
    match (method, args) {
        ("Concat", parts) => Ok(Value::String(
            parts.iter().map(plain_string).collect::<Vec<_>>().concat(),
        )),
        ("Compare", [Value::String(a), Value::String(b)]) => {
            Ok(Value::Int32(ordering_to_int(a.cmp(b))))
        }
        ("Contains", [Value::Array { items, .. }, needle]) => {
            Ok(Value::Bool(items.iter().any(|item| values_equal(item, needle))))
        }
        ("Round" | "Floor" | "Ceiling", [value]) => round_like(method, value, expr),
        ("Abs", [value]) => match value {
            Value::Int32(v) => v.checked_abs().map(Value::Int32).ok_or_else(|| overflow(expr)),
            Value::Int64(v) => v.checked_abs().map(Value::Int64).ok_or_else(|| overflow(expr)),
            Value::Single(v) => Ok(Value::Single(v.abs())),
            Value::Double(v) => Ok(Value::Double(v.abs())),
            Value::Decimal(v) => Ok(Value::Decimal(v.abs())),
            _ => Err(EvalError::UnsupportedCall {
                method: method.to_string(),
            }),
        },
        _ => Err(EvalError::UnsupportedCall {
            method: method.to_string(),
        }),
    }
}

fn round_like(method: &str, value: &Value, expr: &Expr) -> EvalResult<Value> {
    match value {
        Value::Double(v) => Ok(Value::Double(match method {
            "Round" => round_half_even(*v),
            "Floor" => v.floor(),
            _ => v.ceil(),
        })),
        Value::Decimal(v) => Ok(Value::Decimal(match method {
            "Round" => v.round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven),
            "Floor" => v.floor(),
            _ => v.ceil(),
        })),
        _ => Err(EvalError::TypeMismatch {
            expr: expr.to_string(),
            left: value.ty().to_string(),
            right: Ty::Double.to_string(),
        }),
    }
}

fn round_half_even(v: f64) -> f64 {
    let rounded = v.round();
    if (v - v.trunc()).abs() == 0.5 && rounded % 2.0 != 0.0 {
        rounded - v.signum()
    } else {
        rounded
    }
}

fn ordering_to_int(ordering: Ordering) -> i32 {
    match ordering {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

fn plain_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Int64(v) => v.to_string(),
        Value::Single(v) => v.to_string(),
        Value::Decimal(v) => v.to_string(),
        other => other.to_string(),
    }
}

fn overflow(expr: &Expr) -> EvalError {
    EvalError::Overflow {
        expr: expr.to_string(),
    }
}

fn unary(op: UnaryOp, value: Value, ty: &Ty, expr: &Expr) -> EvalResult<Value> {
    match (op, value) {
        (_, Value::Null) => Ok(Value::Null),
        (UnaryOp::Not, Value::Bool(v)) => Ok(Value::Bool(!v)),
        (UnaryOp::Negate, Value::Int32(v)) => {
            v.checked_neg().map(Value::Int32).ok_or_else(|| overflow(expr))
        }
        (UnaryOp::Negate, Value::Int64(v)) => {
            v.checked_neg().map(Value::Int64).ok_or_else(|| overflow(expr))
        }
        (UnaryOp::Negate, Value::Single(v)) => Ok(Value::Single(-v)),
        (UnaryOp::Negate, Value::Double(v)) => Ok(Value::Double(-v)),
        (UnaryOp::Negate, Value::Decimal(v)) => Ok(Value::Decimal(-v)),
        (UnaryOp::Convert, value) => convert(value, ty),
        (_, value) => Err(EvalError::TypeMismatch {
            expr: expr.to_string(),
            left: value.ty().to_string(),
            right: ty.to_string(),
        }),
    }
}

fn convert(value: Value, ty: &Ty) -> EvalResult<Value> {
    let target = ty.non_nullable();
    let invalid = |value: &Value| EvalError::InvalidConversion {
        value: value.to_string(),
        ty: ty.to_string(),
    };
    if target == &Ty::Object || value.ty() == *target {
        return Ok(value);
    }
    let converted = match (&value, target) {
        (_, Ty::Int32) => value
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .or_else(|| float_of(&value).and_then(|f| f.trunc().to_i32()))
            .map(Value::Int32),
        (_, Ty::Int64) => value
            .as_i64()
            .or_else(|| float_of(&value).and_then(|f| f.trunc().to_i64()))
            .map(Value::Int64),
        (_, Ty::Single) => float_of(&value).map(|f| Value::Single(f as f32)),
        (_, Ty::Double) => float_of(&value).map(Value::Double),
        (Value::Decimal(_), Ty::Decimal) => Some(value.clone()),
        (_, Ty::Decimal) => decimal_of(&value).map(Value::Decimal),
        _ => None,
    };
    converted.ok_or_else(|| invalid(&value))
}

fn float_of(value: &Value) -> Option<f64> {
    match value {
        Value::Int32(v) => Some(f64::from(*v)),
        Value::Int64(v) => Some(*v as f64),
        Value::Single(v) => Some(f64::from(*v)),
        Value::Double(v) => Some(*v),
        Value::Decimal(v) => v.to_f64(),
        _ => None,
    }
}

fn decimal_of(value: &Value) -> Option<Decimal> {
    match value {
        Value::Int32(v) => Some(Decimal::from(*v)),
        Value::Int64(v) => Some(Decimal::from(*v)),
        Value::Single(v) => Decimal::from_f32_retain(*v),
        Value::Double(v) => Decimal::from_f64_retain(*v),
        Value::Decimal(v) => Some(*v),
        _ => None,
    }
}

/// Numeric operand promoted to a common representation.
#[derive(Clone, Copy, Debug)]
enum Num {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Dec(Decimal),
}

impl Num {
    fn of(value: &Value) -> Option<Self> {
        Some(match value {
            Value::Int32(v) => Num::I32(*v),
            Value::Int64(v) => Num::I64(*v),
            Value::Single(v) => Num::F32(*v),
            Value::Double(v) => Num::F64(*v),
            Value::Decimal(v) => Num::Dec(*v),
            _ => return None,
        })
    }

    fn rank(self) -> u8 {
        match self {
            Num::I32(_) => 0,
            Num::I64(_) => 1,
            Num::F32(_) => 2,
            Num::F64(_) => 3,
            Num::Dec(_) => 4,
        }
    }

    fn widen(self, rank: u8) -> Option<Num> {
        Some(match (self, rank) {
            (n, r) if n.rank() == r => n,
            (Num::I32(v), 1) => Num::I64(i64::from(v)),
            (Num::I32(v), 2) => Num::F32(v as f32),
            (Num::I64(v), 2) => Num::F32(v as f32),
            (Num::I32(v), 3) => Num::F64(f64::from(v)),
            (Num::I64(v), 3) => Num::F64(v as f64),
            (Num::F32(v), 3) => Num::F64(f64::from(v)),
            (Num::I32(v), 4) => Num::Dec(Decimal::from(v)),
            (Num::I64(v), 4) => Num::Dec(Decimal::from(v)),
            _ => return None,
        })
    }

    fn into_value(self) -> Value {
        match self {
            Num::I32(v) => Value::Int32(v),
            Num::I64(v) => Value::Int64(v),
            Num::F32(v) => Value::Single(v),
            Num::F64(v) => Value::Double(v),
            Num::Dec(v) => Value::Decimal(v),
        }
    }
}

fn promote(left: &Value, right: &Value) -> Option<(Num, Num)> {
    let (l, r) = (Num::of(left)?, Num::of(right)?);
    let rank = l.rank().max(r.rank());
    Some((l.widen(rank)?, r.widen(rank)?))
}

fn mismatch(expr: &Expr, left: &Value, right: &Value) -> EvalError {
    EvalError::TypeMismatch {
        expr: expr.to_string(),
        left: left.ty().to_string(),
        right: right.ty().to_string(),
    }
}

fn binary(op: BinaryOp, left: &Expr, right: &Expr, expr: &Expr) -> EvalResult<Value> {
    if op.is_logical() {
        let l = evaluate(left)?;
        return match (op, &l) {
            (BinaryOp::AndAlso, Value::Bool(false)) => Ok(Value::Bool(false)),
            (BinaryOp::OrElse, Value::Bool(true)) => Ok(Value::Bool(true)),
            (_, Value::Bool(_)) => match evaluate(right)? {
                Value::Bool(r) => Ok(Value::Bool(r)),
                other => Err(mismatch(expr, &l, &other)),
            },
            _ => Err(mismatch(expr, &l, &Value::Bool(false))),
        };
    }
    let l = evaluate(left)?;
    let r = evaluate(right)?;
    match op {
        BinaryOp::Equal => Ok(Value::Bool(values_equal(&l, &r))),
        BinaryOp::NotEqual => Ok(Value::Bool(!values_equal(&l, &r))),
        BinaryOp::LessThan
        | BinaryOp::LessThanOrEqual
        | BinaryOp::GreaterThan
        | BinaryOp::GreaterThanOrEqual => {
            if matches!(l, Value::Null) || matches!(r, Value::Null) {
                return Ok(Value::Bool(false));
            }
            let ordering = compare_values(&l, &r).ok_or_else(|| mismatch(expr, &l, &r))?;
            Ok(Value::Bool(match op {
                BinaryOp::LessThan => ordering == Ordering::Less,
                BinaryOp::LessThanOrEqual => ordering != Ordering::Greater,
                BinaryOp::GreaterThan => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        _ => arithmetic(op, &l, &r, expr),
    }
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value, expr: &Expr) -> EvalResult<Value> {
    if op == BinaryOp::Add && (matches!(l, Value::String(_)) || matches!(r, Value::String(_))) {
        return Ok(Value::String(plain_string(l) + &plain_string(r)));
    }
    if matches!(l, Value::Null) || matches!(r, Value::Null) {
        return Ok(Value::Null);
    }
    let (a, b) = promote(l, r).ok_or_else(|| mismatch(expr, l, r))?;
    let divide_by_zero = || EvalError::DivideByZero {
        expr: expr.to_string(),
    };
    let result = match (a, b) {
        (Num::I32(a), Num::I32(b)) => Num::I32(match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Subtract => a.checked_sub(b),
            BinaryOp::Multiply => a.checked_mul(b),
            BinaryOp::Divide if b == 0 => return Err(divide_by_zero()),
            BinaryOp::Divide => a.checked_div(b),
            BinaryOp::Modulo if b == 0 => return Err(divide_by_zero()),
            _ => a.checked_rem(b),
        }
        .ok_or_else(|| overflow(expr))?),
        (Num::I64(a), Num::I64(b)) => Num::I64(match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Subtract => a.checked_sub(b),
            BinaryOp::Multiply => a.checked_mul(b),
            BinaryOp::Divide if b == 0 => return Err(divide_by_zero()),
            BinaryOp::Divide => a.checked_div(b),
            BinaryOp::Modulo if b == 0 => return Err(divide_by_zero()),
            _ => a.checked_rem(b),
        }
        .ok_or_else(|| overflow(expr))?),
        (Num::F32(a), Num::F32(b)) => Num::F32(match op {
            BinaryOp::Add => a + b,
            BinaryOp::Subtract => a - b,
            BinaryOp::Multiply => a * b,
            BinaryOp::Divide => a / b,
            _ => a % b,
        }),
        (Num::F64(a), Num::F64(b)) => Num::F64(match op {
            BinaryOp::Add => a + b,
            BinaryOp::Subtract => a - b,
            BinaryOp::Multiply => a * b,
            BinaryOp::Divide => a / b,
            _ => a % b,
        }),
        (Num::Dec(a), Num::Dec(b)) => Num::Dec(match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Subtract => a.checked_sub(b),
            BinaryOp::Multiply => a.checked_mul(b),
            BinaryOp::Divide if b.is_zero() => return Err(divide_by_zero()),
            BinaryOp::Divide => a.checked_div(b),
            BinaryOp::Modulo if b.is_zero() => return Err(divide_by_zero()),
            _ => a.checked_rem(b),
        }
        .ok_or_else(|| overflow(expr))?),
        _ => return Err(mismatch(expr, l, r)),
    };
    Ok(result.into_value())
}

/// Value equality with numeric promotion; `null == null` holds.
pub fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        _ => match compare_values(l, r) {
            Some(ordering) => ordering == Ordering::Equal,
            None => l == r,
        },
    }
}

fn compare_values(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => match promote(l, r)? {
            (Num::I32(a), Num::I32(b)) => Some(a.cmp(&b)),
            (Num::I64(a), Num::I64(b)) => Some(a.cmp(&b)),
            (Num::F32(a), Num::F32(b)) => a.partial_cmp(&b),
            (Num::F64(a), Num::F64(b)) => a.partial_cmp(&b),
            (Num::Dec(a), Num::Dec(b)) => Some(a.cmp(&b)),
            _ => None,
        },
    }
}
