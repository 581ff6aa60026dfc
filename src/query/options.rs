//! Query option clauses attached to resources in the bound chain.
//!
//! Each clause knows how to merge with an earlier clause of the same kind
//! ([`QueryOption::compose_multiple_specification`]); the binder never stacks
//! two options of one kind on a resource. The projection and the apply block
//! live in their own resource fields: a later `Select` replaces the
//! projection, and the grouping analyzers fill one [`ApplyState`] in place.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::query::ast::{Expr, Lambda};

/// Wire-protocol version a compiled query requires.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ProtocolVersion {
    /// OData 4.0.
    #[default]
    #[serde(rename = "4.0")]
    V4_0,
    /// OData 4.01 (`in` operator, key-as-segment by default).
    #[serde(rename = "4.01")]
    V4_01,
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V4_0 => write!(f, "4.0"),
            ProtocolVersion::V4_01 => write!(f, "4.01"),
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "4.0" | "4" => Ok(ProtocolVersion::V4_0),
            "4.01" => Ok(ProtocolVersion::V4_01),
            other => Err(format!("unknown protocol version '{other}'")),
        }
    }
}

/// `$count` state of a resource.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountOption {
    /// No count requested.
    #[default]
    None,
    /// `$count=true`
    True,
    /// `$count=false`
    False,
}

/// `$filter`: conjuncts AND-combined at emission.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct FilterOption {
    /// Bound predicates in the order they were added.
    pub predicates: Vec<Expr>,
}

/// One `$orderby` key.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderSelector {
    /// Bound key expression.
    pub expr: Expr,
    /// Descending when true.
    pub descending: bool,
}

/// `$orderby`.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct OrderByOption {
    /// Keys, primary first.
    pub selectors: Vec<OrderSelector>,
}

impl OrderByOption {
    /// Appends a secondary key (`ThenBy`).
    pub fn then_by(mut self, selector: OrderSelector) -> Self {
        self.selectors.push(selector);
        self
    }
}

/// `$skip`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SkipOption {
    /// Number of rows skipped.
    pub count: u64,
}

/// `$top`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TakeOption {
    /// Maximum number of rows returned.
    pub count: u64,
}

/// `$select` projection.
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectionOption {
    /// Client-side projector over the resource element.
    pub selector: Lambda,
    /// Wire-format select/expand paths derived from the selector.
    pub paths: Vec<String>,
}

/// Aggregation method of an `$apply` aggregate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationMethod {
    /// `sum`
    Sum,
    /// `average`
    Average,
    /// `min`
    Min,
    /// `max`
    Max,
    /// `countdistinct`
    CountDistinct,
    /// `$count` (no selector)
    Count,
}

impl AggregationMethod {
    /// Maps a front-end method name to an aggregation method.
    pub fn from_method(name: &str) -> Option<Self> {
        Some(match name {
            "Sum" => AggregationMethod::Sum,
            "Average" => AggregationMethod::Average,
            "Min" => AggregationMethod::Min,
            "Max" => AggregationMethod::Max,
            "CountDistinct" => AggregationMethod::CountDistinct,
            "Count" | "LongCount" => AggregationMethod::Count,
            _ => return None,
        })
    }

    /// Whether the method takes a selector lambda.
    pub fn takes_selector(self) -> bool {
        self != AggregationMethod::Count
    }

    /// Whether the selector must be numeric.
    pub fn requires_numeric(self) -> bool {
        matches!(
            self,
            AggregationMethod::Sum
                | AggregationMethod::Average
                | AggregationMethod::Min
                | AggregationMethod::Max
        )
    }

    /// Keyword emitted after `with`.
    pub fn keyword(self) -> &'static str {
        match self {
            AggregationMethod::Sum => "sum",
            AggregationMethod::Average => "average",
            AggregationMethod::Min => "min",
            AggregationMethod::Max => "max",
            AggregationMethod::CountDistinct => "countdistinct",
            AggregationMethod::Count => "$count",
        }
    }
}

/// One `aggregate(...)` entry.
#[derive(Clone, Debug, PartialEq)]
pub struct Aggregation {
    /// Bound selector body; `None` for `$count`.
    pub expr: Option<Expr>,
    /// Method.
    pub method: AggregationMethod,
    /// Result member name.
    pub alias: String,
}

/// `$apply` accumulator for grouping and aggregation.
///
/// Created by the binder before any grouping analyzer runs and filled by
/// them in a single pass.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ApplyState {
    /// Filters that preceded the grouping, emitted as `filter(...)`.
    pub predicates: Vec<Expr>,
    /// Bound grouping keys in key-selector order.
    pub grouping_expressions: Vec<Expr>,
    /// Key member name → bound key expression.
    pub key_selector_map: Vec<(String, Expr)>,
    /// Element-selector member name → bound source expression.
    pub grouping_expressions_map: Vec<(String, Expr)>,
    /// Aggregations in result-selector order.
    pub aggregations: Vec<Aggregation>,
    /// Result selector kept as the client projector.
    pub result_selector: Option<Lambda>,
}

impl ApplyState {
    /// Records a named grouping key.
    pub fn add_key(&mut self, name: impl Into<String>, expr: Expr) {
        self.key_selector_map.push((name.into(), expr));
    }

    /// Looks up a named grouping key.
    pub fn key(&self, name: &str) -> Option<&Expr> {
        self.key_selector_map
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, expr)| expr)
    }

    /// Looks up an element-selector member.
    pub fn grouped_member(&self, name: &str) -> Option<&Expr> {
        self.grouping_expressions_map
            .iter()
            .find(|(member, _)| member == name)
            .map(|(_, expr)| expr)
    }

    /// Appends a grouping key unless an equal one is present.
    pub fn add_grouping_expression(&mut self, expr: Expr) {
        if !self.grouping_expressions.contains(&expr) {
            self.grouping_expressions.push(expr);
        }
    }

    /// Whether nothing has been accumulated yet.
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
            && self.grouping_expressions.is_empty()
            && self.aggregations.is_empty()
    }
}

/// A clause attached to a queryable resource.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryOption {
    /// `$filter`
    Filter(FilterOption),
    /// `$orderby`
    OrderBy(OrderByOption),
    /// `$skip`
    Skip(SkipOption),
    /// `$top`
    Take(TakeOption),
}

impl QueryOption {
    /// Name of the front-end operator that produced the option.
    pub fn method_name(&self) -> &'static str {
        match self {
            QueryOption::Filter(_) => "Where",
            QueryOption::OrderBy(_) => "OrderBy",
            QueryOption::Skip(_) => "Skip",
            QueryOption::Take(_) => "Take",
        }
    }

    /// Whether `other` is an option of the same kind.
    pub fn same_kind(&self, other: &QueryOption) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Merges `self` (the later clause) with an earlier clause of the same
    /// kind. Options of different kinds are returned unchanged.
    pub fn compose_multiple_specification(self, previous: &QueryOption) -> QueryOption {
        match (self, previous) {
            (QueryOption::Filter(next), QueryOption::Filter(prev)) => {
                let mut predicates = prev.predicates.clone();
                predicates.extend(next.predicates);
                QueryOption::Filter(FilterOption { predicates })
            }
            (QueryOption::Skip(next), QueryOption::Skip(prev)) => QueryOption::Skip(SkipOption {
                count: prev.count.saturating_add(next.count),
            }),
            (QueryOption::Take(next), QueryOption::Take(prev)) => QueryOption::Take(TakeOption {
                count: prev.count.min(next.count),
            }),
            // OrderBy: the later clause wins.
            (next, _) => next,
        }
    }
}
