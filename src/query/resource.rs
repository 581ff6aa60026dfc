//! Resource chain produced by the binder.
//!
//! A bound query is a chain of resources, root first: an entity set,
//! singleton, or operation, followed by navigations. Each resource carries
//! the options that apply to it. Resources are immutable once built; every
//! `with_*` method consumes the resource and returns the updated one, and a
//! child keeps its parent alive through an `Rc` link it never mutates.

use std::collections::HashMap;
use std::rc::Rc;

use crate::query::ast::{Expr, InputRef, ResourceId, RootKind};
use crate::query::options::{
    ApplyState, CountOption, FilterOption, OrderByOption, ProjectionOption,
    QueryOption, SkipOption, TakeOption,
};
use crate::query::value::{RecordType, Ty, Value};

/// Variant of a resource in the chain.
#[derive(Clone, Debug, PartialEq)]
pub enum ResourceKind {
    /// Collection-valued resource, optionally narrowed by a key predicate.
    QueryableSet {
        /// `(key, value)` pairs in key declaration order.
        key_predicate: Option<Vec<(String, Value)>>,
    },
    /// Root singleton or single-valued operation result.
    QueryableSingleton,
    /// To-one navigation off another resource.
    NavigationSingleton,
}

/// Record wrapper introduced by `SelectMany` with a result selector.
///
/// Members of the record expose the values bound by the correlated
/// lambdas: `inner` is this resource's element, `outer` the source's.
#[derive(Clone, Debug, PartialEq)]
pub struct TransparentScope {
    /// Record shape seen by later lambdas.
    pub record: RecordType,
    /// Member holding this resource's element.
    pub inner: String,
    /// Member holding the source resource's element, with that resource.
    pub outer: Option<(String, ResourceId)>,
}

impl TransparentScope {
    /// Whether `ty` is the record this scope introduced.
    pub fn matches(&self, ty: &Ty) -> bool {
        ty.as_record() == Some(&self.record)
    }
}

/// One resource in a bound chain.
#[derive(Clone, Debug)]
pub struct ResourceExpr {
    /// Identifier referenced by [`InputRef`]s.
    pub id: ResourceId,
    /// Variant.
    pub kind: ResourceKind,
    /// Parent resource; `None` for the root.
    pub source: Option<Rc<ResourceExpr>>,
    /// Set, singleton, operation, or navigation member name.
    pub name: String,
    /// Root description; `None` for navigations.
    pub root: Option<RootKind>,
    /// Element type.
    pub element_type: Ty,
    /// `$filter`, `$orderby`, `$skip`, `$top` in the order first added.
    pub sequence_options: Vec<QueryOption>,
    /// Wire-format `$expand` items.
    pub expand_paths: Vec<String>,
    /// `$count` state.
    pub count: CountOption,
    /// Custom query options.
    pub custom_options: HashMap<String, String>,
    /// `$select` projection.
    pub projection: Option<ProjectionOption>,
    /// `$apply` block.
    pub apply: Option<ApplyState>,
    /// Record wrapper later lambdas see, if any.
    pub transparent_scope: Option<TransparentScope>,
    /// Whether the request addresses `/$count` of the resource.
    pub count_segment: bool,
    /// Bound filter the key predicate was derived from.
    pub key_filter: Option<Expr>,
}

impl ResourceExpr {
    /// Root entity set, singleton, or operation.
    pub fn root(id: ResourceId, name: impl Into<String>, root: RootKind, element_type: Ty) -> Self {
        let kind = match &root {
            RootKind::EntitySet => ResourceKind::QueryableSet {
                key_predicate: None,
            },
            RootKind::Function {
                returns_collection: true,
                ..
            } => ResourceKind::QueryableSet {
                key_predicate: None,
            },
            _ => ResourceKind::QueryableSingleton,
        };
        Self::bare(id, kind, None, name.into(), Some(root), element_type)
    }

    /// Navigation off `source`.
    pub fn navigation(
        id: ResourceId,
        source: Rc<ResourceExpr>,
        name: impl Into<String>,
        element_type: Ty,
        collection: bool,
    ) -> Self {
        let kind = if collection {
            ResourceKind::QueryableSet {
                key_predicate: None,
            }
        } else {
            ResourceKind::NavigationSingleton
        };
        Self::bare(id, kind, Some(source), name.into(), None, element_type)
    }

    fn bare(
        id: ResourceId,
        kind: ResourceKind,
        source: Option<Rc<ResourceExpr>>,
        name: String,
        root: Option<RootKind>,
        element_type: Ty,
    ) -> Self {
        Self {
            id,
            kind,
            source,
            name,
            root,
            element_type,
            sequence_options: Vec::new(),
            expand_paths: Vec::new(),
            count: CountOption::None,
            custom_options: HashMap::new(),
            projection: None,
            apply: None,
            transparent_scope: None,
            count_segment: false,
            key_filter: None,
        }
    }

    /// Reference to this resource for splicing into expressions.
    pub fn input_ref(&self) -> InputRef {
        InputRef {
            target: self.id,
            ty: self.element_type.clone(),
        }
    }

    /// Whether the resource is a collection-valued set.
    pub fn is_queryable_set(&self) -> bool {
        matches!(self.kind, ResourceKind::QueryableSet { .. })
    }

    /// Whether the resource addresses a single entity.
    pub fn is_single(&self) -> bool {
        match &self.kind {
            ResourceKind::QueryableSet { key_predicate } => key_predicate.is_some(),
            ResourceKind::QueryableSingleton | ResourceKind::NavigationSingleton => true,
        }
    }

    /// Key predicate, if the set has been narrowed to one entity.
    pub fn key_predicate(&self) -> Option<&[(String, Value)]> {
        match &self.kind {
            ResourceKind::QueryableSet {
                key_predicate: Some(keys),
            } => Some(keys),
            _ => None,
        }
    }

    /// Whether an action root heads the chain.
    pub fn is_action(&self) -> bool {
        matches!(self.root, Some(RootKind::Action { .. }))
    }

    /// Resources from the root to `self`.
    pub fn chain(&self) -> Vec<&ResourceExpr> {
        let mut out = vec![self];
        let mut cursor = self.source.as_deref();
        while let Some(resource) = cursor {
            out.push(resource);
            cursor = resource.source.as_deref();
        }
        out.reverse();
        out
    }

    /// Finds a resource in the chain by id.
    pub fn find(&self, id: ResourceId) -> Option<&ResourceExpr> {
        self.chain().into_iter().find(|resource| resource.id == id)
    }

    /// Attached `$filter`.
    pub fn filter(&self) -> Option<&FilterOption> {
        self.sequence_options.iter().find_map(|option| match option {
            QueryOption::Filter(filter) => Some(filter),
            _ => None,
        })
    }

    /// Attached `$orderby`.
    pub fn order_by(&self) -> Option<&OrderByOption> {
        self.sequence_options.iter().find_map(|option| match option {
            QueryOption::OrderBy(order) => Some(order),
            _ => None,
        })
    }

    /// Attached `$skip`.
    pub fn skip(&self) -> Option<SkipOption> {
        self.sequence_options.iter().find_map(|option| match option {
            QueryOption::Skip(skip) => Some(*skip),
            _ => None,
        })
    }

    /// Attached `$top`.
    pub fn take(&self) -> Option<TakeOption> {
        self.sequence_options.iter().find_map(|option| match option {
            QueryOption::Take(take) => Some(*take),
            _ => None,
        })
    }

    /// Adds a sequence option, composing it with an existing one of the
    /// same kind in place.
    pub fn with_sequence_option(mut self, option: QueryOption) -> Self {
        match self
            .sequence_options
            .iter()
            .position(|existing| existing.same_kind(&option))
        {
            Some(idx) => {
                let composed = option.compose_multiple_specification(&self.sequence_options[idx]);
                self.sequence_options[idx] = composed;
            }
            None => self.sequence_options.push(option),
        }
        self
    }

    /// Removes and returns the `$filter`, if any.
    pub fn take_filter(mut self) -> (Self, Option<FilterOption>) {
        let idx = self
            .sequence_options
            .iter()
            .position(|option| matches!(option, QueryOption::Filter(_)));
        let filter = idx.and_then(|idx| match self.sequence_options.remove(idx) {
            QueryOption::Filter(filter) => Some(filter),
            _ => None,
        });
        (self, filter)
    }

    /// Narrows the set to a single entity.
    pub fn with_key_predicate(mut self, keys: Vec<(String, Value)>) -> Self {
        if let ResourceKind::QueryableSet { key_predicate } = &mut self.kind {
            *key_predicate = Some(keys);
        }
        self
    }

    /// Narrows the set to a single entity through an equality filter over
    /// its keys; [`ResourceExpr::demote_key_predicate`] undoes it.
    pub fn with_key_filter(self, keys: Vec<(String, Value)>, predicate: Expr) -> Self {
        let mut resource = self.with_key_predicate(keys);
        resource.key_filter = Some(predicate);
        resource
    }

    /// Turns a key predicate that came from a filter back into that filter,
    /// so the set accepts collection operators again.
    pub fn demote_key_predicate(mut self) -> Self {
        let Some(predicate) = self.key_filter.take() else {
            return self;
        };
        if let ResourceKind::QueryableSet { key_predicate } = &mut self.kind {
            *key_predicate = None;
        }
        self.with_sequence_option(QueryOption::Filter(FilterOption {
            predicates: vec![predicate],
        }))
    }

    /// Replaces the projection.
    pub fn with_projection(mut self, projection: ProjectionOption) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Replaces the apply block.
    pub fn with_apply(mut self, apply: ApplyState) -> Self {
        self.apply = Some(apply);
        self
    }

    /// Adds an `$expand` item unless already present.
    pub fn with_expand_path(mut self, path: String) -> Self {
        if !self.expand_paths.contains(&path) {
            self.expand_paths.push(path);
        }
        self
    }

    /// Sets the `$count` option.
    pub fn with_count(mut self, count: CountOption) -> Self {
        self.count = count;
        self
    }

    /// Adds a custom query option; a repeated name keeps the last value.
    pub fn with_custom_option(mut self, name: String, value: String) -> Self {
        self.custom_options.insert(name, value);
        self
    }

    /// Attaches a transparent scope.
    pub fn with_transparent_scope(mut self, scope: TransparentScope) -> Self {
        self.transparent_scope = Some(scope);
        self
    }

    /// Addresses `/$count` of the resource.
    pub fn with_count_segment(mut self) -> Self {
        self.count_segment = true;
        self
    }
}
