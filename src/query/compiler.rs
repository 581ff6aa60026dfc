//! Compilation entry point: expression tree in, [`QueryComponents`] out.

use std::sync::Arc;

use tracing::debug;

use crate::config::CompilerConfig;
use crate::query::ast::{Expr, RootKind};
use crate::query::binder::{BoundQuery, ResourceBinder};
use crate::query::components::{ComponentParts, HttpMethod, OperationParameter, QueryComponents};
use crate::query::errors::{CompileError, CompileResult};
use crate::query::metadata::MetadataProvider;
use crate::query::normalize::{self, NormalizerRewrites};
use crate::query::partial_eval;
use crate::query::value::Value;
use crate::query::writer::UriWriter;

/// Lowers query trees against one service model.
pub struct QueryCompiler {
    metadata: Arc<dyn MetadataProvider>,
    config: CompilerConfig,
}

impl QueryCompiler {
    /// Creates a compiler with the given configuration and metadata provider.
    pub fn new(config: CompilerConfig, metadata: Arc<dyn MetadataProvider>) -> Self {
        Self { metadata, config }
    }

    /// Effective configuration.
    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Reduces, normalizes and binds `expr` without writing a URI.
    pub fn bind(&self, expr: &Expr) -> CompileResult<BoundQuery> {
        let reduced = if self.config.partial_evaluation {
            partial_eval::partially_evaluate(expr)?
        } else {
            expr.clone()
        };
        let mut rewrites = NormalizerRewrites::default();
        let normalized = normalize::normalize(&reduced, &mut rewrites);
        let mut bound = ResourceBinder::new(self.metadata.as_ref()).bind_query(&normalized)?;
        bound.rewrites = rewrites;
        Ok(bound)
    }

    /// Compiles `expr` into the request descriptor.
    pub fn compile(&self, expr: &Expr) -> CompileResult<QueryComponents> {
        debug!(query = %expr, "compiling query");
        let bound = self.bind(expr)?;
        let written = UriWriter::new(&self.config).write(&bound.resource)?;
        if written.version > self.config.max_protocol_version {
            return Err(CompileError::ProtocolVersionTooLow {
                required: written.version,
                max: self.config.max_protocol_version,
            });
        }

        let root = bound.resource.chain().first().and_then(|r| r.root.clone());
        let (http_method, body_parameters, uri_parameters) = match root {
            Some(RootKind::Action { parameters }) => (HttpMethod::Post, parameters, Vec::new()),
            Some(RootKind::Function { parameters, .. }) => (HttpMethod::Get, Vec::new(), parameters),
            _ => (HttpMethod::Get, Vec::new(), Vec::new()),
        };
        let to_parameters = |pairs: Vec<(String, Value)>| -> Vec<OperationParameter> {
            pairs
                .into_iter()
                .map(|(name, value)| OperationParameter { name, value })
                .collect()
        };

        let components = QueryComponents::new(ComponentParts {
            uri: written.uri,
            version: written.version,
            element_type: bound.element_type,
            projector: bound.projector,
            rewrites: bound.rewrites,
            http_method,
            single_result: bound.single_result,
            body_parameters: to_parameters(body_parameters),
            uri_parameters: to_parameters(uri_parameters),
        })?;
        debug!(
            uri = components.uri(),
            method = components.http_method().as_str(),
            version = %components.version(),
            "compiled query"
        );
        Ok(components)
    }
}
