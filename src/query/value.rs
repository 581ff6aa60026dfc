//! Literal values and static types shared by the front-end expression tree,
//! the partial evaluator, and the URI writer.
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Static type attached to every expression node.
///
/// The front end is strongly typed, so the compiler never infers types on its
/// own; it only inspects the ones recorded on the nodes it receives.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "of", rename_all = "snake_case")]
pub enum Ty {
    /// Boolean.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 32-bit float.
    Single,
    /// 64-bit float.
    Double,
    /// 128-bit decimal.
    Decimal,
    /// UTF-8 string.
    String,
    /// Nullable wrapper around a value type.
    Nullable(Box<Ty>),
    /// Entity type declared in the service metadata.
    Entity(String),
    /// Complex (structured, keyless) type declared in the service metadata.
    Complex(String),
    /// Collection of elements.
    Collection(Box<Ty>),
    /// Anonymous record shape (projections and transparent scopes).
    Record(RecordType),
    /// Group produced by `GroupBy`: a key plus the grouped elements.
    Grouping {
        /// Key type.
        key: Box<Ty>,
        /// Element type of the grouped sequence.
        element: Box<Ty>,
    },
    /// Type the front end could not pin down (inferred element types).
    Object,
}

/// Ordered member list of an anonymous record type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct RecordType {
    /// Members in declaration order.
    pub fields: Vec<(String, Ty)>,
}

impl RecordType {
    /// Creates a record type from `(name, type)` pairs.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Ty)>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(|(n, t)| (n.into(), t)).collect(),
        }
    }

    /// Returns the type of the named member.
    pub fn field(&self, name: &str) -> Option<&Ty> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, ty)| ty)
    }
}

impl Ty {
    /// Shorthand for `Ty::Entity`.
    pub fn entity(name: impl Into<String>) -> Self {
        Ty::Entity(name.into())
    }

    /// Shorthand for `Ty::Collection`.
    pub fn collection(element: Ty) -> Self {
        Ty::Collection(Box::new(element))
    }

    /// Shorthand for `Ty::Nullable`.
    pub fn nullable(inner: Ty) -> Self {
        Ty::Nullable(Box::new(inner))
    }

    /// Strips a `Nullable` wrapper if present.
    pub fn non_nullable(&self) -> &Ty {
        match self {
            Ty::Nullable(inner) => inner,
            other => other,
        }
    }

    /// Whether the type (ignoring nullability) is one of the numeric types
    /// aggregations accept.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self.non_nullable(),
            Ty::Int32 | Ty::Int64 | Ty::Single | Ty::Double | Ty::Decimal
        )
    }

    /// Whether the type is an entity type.
    pub fn is_entity(&self) -> bool {
        matches!(self, Ty::Entity(_))
    }

    /// Element type of a collection or grouping.
    pub fn element_type(&self) -> Option<&Ty> {
        match self {
            Ty::Collection(inner) => Some(inner),
            Ty::Grouping { element, .. } => Some(element),
            _ => None,
        }
    }

    /// Record shape, when the type is an anonymous record.
    pub fn as_record(&self) -> Option<&RecordType> {
        match self {
            Ty::Record(record) => Some(record),
            _ => None,
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Bool => write!(f, "bool"),
            Ty::Int32 => write!(f, "int"),
            Ty::Int64 => write!(f, "long"),
            Ty::Single => write!(f, "float"),
            Ty::Double => write!(f, "double"),
            Ty::Decimal => write!(f, "decimal"),
            Ty::String => write!(f, "string"),
            Ty::Nullable(inner) => write!(f, "{inner}?"),
            Ty::Entity(name) | Ty::Complex(name) => write!(f, "{name}"),
            Ty::Collection(inner) => write!(f, "IEnumerable<{inner}>"),
            Ty::Record(record) => {
                write!(f, "{{ ")?;
                for (idx, (name, ty)) in record.fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {ty}")?;
                }
                write!(f, " }}")
            }
            Ty::Grouping { key, element } => write!(f, "IGrouping<{key}, {element}>"),
            Ty::Object => write!(f, "object"),
        }
    }
}

/// Constant value carried by `Constant` nodes and produced by evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    /// Null literal.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// 32-bit integer literal.
    Int32(i32),
    /// 64-bit integer literal.
    Int64(i64),
    /// 32-bit float literal.
    Single(f32),
    /// 64-bit float literal.
    Double(f64),
    /// Decimal literal.
    Decimal(Decimal),
    /// UTF-8 string literal.
    String(String),
    /// Array with its element type.
    Array {
        /// Element type; `Ty::Object` when the front end inferred it.
        element: Ty,
        /// Items in order.
        items: Vec<Value>,
    },
    /// Record of named values, e.g. captured closure state.
    Record(Vec<(String, Value)>),
}

impl Value {
    /// Static type of the value.
    pub fn ty(&self) -> Ty {
        match self {
            Value::Null => Ty::Object,
            Value::Bool(_) => Ty::Bool,
            Value::Int32(_) => Ty::Int32,
            Value::Int64(_) => Ty::Int64,
            Value::Single(_) => Ty::Single,
            Value::Double(_) => Ty::Double,
            Value::Decimal(_) => Ty::Decimal,
            Value::String(_) => Ty::String,
            Value::Array { element, .. } => Ty::collection(element.clone()),
            Value::Record(fields) => Ty::Record(RecordType {
                fields: fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.ty()))
                    .collect(),
            }),
        }
    }

    /// Integer payload widened to `i64`, if the value is integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Looks up a member of a record value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Record(fields) => fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, value)| value),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Self::Decimal(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}L"),
            Value::Single(v) => write!(f, "{v}f"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Decimal(v) => write!(f, "{v}m"),
            Value::String(v) => write!(f, "\"{v}\""),
            Value::Array { items, .. } => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Record(fields) => {
                write!(f, "{{ ")?;
                for (idx, (name, value)) in fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name} = {value}")?;
                }
                write!(f, " }}")
            }
        }
    }
}
