#![allow(missing_docs)]

//! Final compilation artifact handed to the transport and materializer.

use serde::Serialize;

use crate::query::ast::Lambda;
use crate::query::errors::{CompileError, CompileResult};
use crate::query::normalize::NormalizerRewrites;
use crate::query::options::ProtocolVersion;
use crate::query::value::{Ty, Value};

/// HTTP method of the compiled request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// Operation parameter sent alongside the request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OperationParameter {
    pub name: String,
    pub value: Value,
}

/// Everything needed to issue a query and shape its results.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryComponents {
    uri: String,
    version: ProtocolVersion,
    element_type: Ty,
    projector: Option<Lambda>,
    rewrites: NormalizerRewrites,
    http_method: HttpMethod,
    single_result: Option<bool>,
    body_parameters: Vec<OperationParameter>,
    uri_parameters: Vec<OperationParameter>,
}

/// Field-by-field input to [`QueryComponents::new`].
#[derive(Clone, Debug)]
pub struct ComponentParts {
    pub uri: String,
    pub version: ProtocolVersion,
    pub element_type: Ty,
    pub projector: Option<Lambda>,
    pub rewrites: NormalizerRewrites,
    pub http_method: HttpMethod,
    pub single_result: Option<bool>,
    pub body_parameters: Vec<OperationParameter>,
    pub uri_parameters: Vec<OperationParameter>,
}

impl QueryComponents {
    /// Assembles the artifact.
    ///
    /// Body parameters are only valid on POST; URI parameters never are.
    pub fn new(parts: ComponentParts) -> CompileResult<Self> {
        let method = parts.http_method.as_str();
        if !parts.body_parameters.is_empty() && parts.http_method != HttpMethod::Post {
            return Err(CompileError::InvalidOperationParameters {
                kind: "body",
                method,
            });
        }
        if !parts.uri_parameters.is_empty() && parts.http_method == HttpMethod::Post {
            return Err(CompileError::InvalidOperationParameters {
                kind: "uri",
                method,
            });
        }
        Ok(Self {
            uri: parts.uri,
            version: parts.version,
            element_type: parts.element_type,
            projector: parts.projector,
            rewrites: parts.rewrites,
            http_method: parts.http_method,
            single_result: parts.single_result,
            body_parameters: parts.body_parameters,
            uri_parameters: parts.uri_parameters,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Element type of the last path segment.
    pub fn element_type(&self) -> &Ty {
        &self.element_type
    }

    /// Client-side projector applied to each returned element.
    pub fn projector(&self) -> Option<&Lambda> {
        self.projector.as_ref()
    }

    /// Generated → original expression pairs recorded by the normalizer.
    pub fn rewrites(&self) -> &NormalizerRewrites {
        &self.rewrites
    }

    pub fn http_method(&self) -> HttpMethod {
        self.http_method
    }

    /// `Some(true)` when the request yields one entity or value.
    pub fn single_result(&self) -> Option<bool> {
        self.single_result
    }

    pub fn body_parameters(&self) -> &[OperationParameter] {
        &self.body_parameters
    }

    pub fn uri_parameters(&self) -> &[OperationParameter] {
        &self.uri_parameters
    }

    /// Whether the URI carries a `$select` at any nesting level.
    pub fn has_select_query_option(&self) -> bool {
        ["?$select=", "&$select=", "($select=", ";$select="]
            .iter()
            .any(|marker| self.uri.contains(marker))
    }
}
