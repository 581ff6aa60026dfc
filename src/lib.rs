//! Compiles LINQ-style query expression trees into OData request URIs.
//!
//! ```ignore
//! let compiler = QueryCompiler::new(CompilerConfig::default(), Arc::new(model));
//! let components = QueryBuilder::entity_set("Products", "Product")
//!     .filter(|p| p.member("Price", Ty::Double).greater_than(Expr::constant(5.0)))
//!     .take(10)
//!     .compile(&compiler)?;
//! assert_eq!(components.uri(), "Products?$filter=Price gt 5&$top=10");
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod query;

pub use config::CompilerConfig;
pub use query::{
    CompileError, CompileResult, Expr, InMemoryMetadata, MetadataProvider, QueryBuilder,
    QueryCompiler, QueryComponents, Ty, Value,
};
