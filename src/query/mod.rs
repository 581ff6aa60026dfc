#![forbid(unsafe_code)]

//! Query compilation pipeline.
//!
//! A query arrives as an [`Expr`] call tree built over a resource root. The
//! compiler reduces closed subtrees to constants, normalizes comparison
//! idioms, folds the operator chain into a [`ResourceExpr`] chain, and
//! writes that chain as a request URI wrapped in [`QueryComponents`].

/// Expression tree and resource roots.
pub mod ast;

/// Folding of sequence operators into the resource chain.
pub mod binder;

/// Fluent construction of query trees.
pub mod builder;

/// Compilation entry point.
pub mod compiler;

/// Compiled request descriptor.
pub mod components;

/// Compilation errors.
pub mod errors;

/// Local evaluation of closed subtrees.
pub mod eval;

/// Grouping and aggregation analysis.
pub mod group_by;

/// Binding of lambda parameters to resources.
pub mod input_binder;

/// Service model lookups.
pub mod metadata;

/// Comparison idiom rewriting.
pub mod normalize;

/// Query option clauses.
pub mod options;

/// Constant folding ahead of binding.
pub mod partial_eval;

/// Select/expand path tokens.
pub mod path;

/// Projection analysis.
pub mod projection;

/// Bound resource chain.
pub mod resource;

/// Types and literal values.
pub mod value;

/// URI and expression serialization.
pub mod writer;

pub use ast::{Expr, Lambda, Param, ResourceRoot, RootKind};
pub use builder::{group_aggregate, group_count, group_key, QueryBuilder};
pub use compiler::QueryCompiler;
pub use components::{HttpMethod, OperationParameter, QueryComponents};
pub use errors::{CompileError, CompileErrorWithCode, CompileResult};
pub use metadata::{InMemoryMetadata, MetadataProvider};
pub use options::ProtocolVersion;
pub use resource::ResourceExpr;
pub use value::{RecordType, Ty, Value};
