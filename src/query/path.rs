//! Select/expand path token chains and their serializers.
//!
//! A path such as `Orders/Items/Name` is held as a singly linked chain of
//! segments. Reserved segments (`$ref`, `$count`, ...) parse into
//! [`PathSegmentToken::System`] and are rejected by every serializer here.

use crate::query::errors::{CompileError, CompileResult};

/// Marker selecting every property at its level.
pub const WILDCARD: &str = "*";

/// One segment of a path chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathSegmentToken {
    /// Protocol-reserved segment.
    System(SystemToken),
    /// Property or navigation segment.
    NonSystem(NonSystemToken),
}

/// Protocol-reserved segment such as `$ref`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemToken {
    /// Segment text including the `$`.
    pub identifier: String,
    /// Following segment.
    pub next: Option<Box<PathSegmentToken>>,
}

/// Property or navigation segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NonSystemToken {
    /// Property name or [`WILDCARD`].
    pub identifier: String,
    /// `name=value` pairs written in parentheses after the identifier.
    pub named_values: Vec<(String, String)>,
    /// Whether the segment is a structural (non-navigation) property.
    pub is_structural_property: bool,
    /// Following segment.
    pub next: Option<Box<PathSegmentToken>>,
}

impl NonSystemToken {
    /// Creates a tail segment.
    pub fn new(identifier: impl Into<String>, is_structural_property: bool) -> Self {
        Self {
            identifier: identifier.into(),
            named_values: Vec::new(),
            is_structural_property,
            next: None,
        }
    }
}

impl PathSegmentToken {
    /// Creates a non-system tail segment.
    pub fn segment(identifier: impl Into<String>, is_structural_property: bool) -> Self {
        PathSegmentToken::NonSystem(NonSystemToken::new(identifier, is_structural_property))
    }

    /// Segment text.
    pub fn identifier(&self) -> &str {
        match self {
            PathSegmentToken::System(token) => &token.identifier,
            PathSegmentToken::NonSystem(token) => &token.identifier,
        }
    }

    /// Following segment.
    pub fn next(&self) -> Option<&PathSegmentToken> {
        match self {
            PathSegmentToken::System(token) => token.next.as_deref(),
            PathSegmentToken::NonSystem(token) => token.next.as_deref(),
        }
    }

    /// Links `(identifier, structural)` pairs into a chain, head first.
    pub fn from_segments<I, S>(segments: I) -> Option<PathSegmentToken>
    where
        I: IntoIterator<Item = (S, bool)>,
        I::IntoIter: DoubleEndedIterator,
        S: Into<String>,
    {
        let mut head: Option<PathSegmentToken> = None;
        for (identifier, structural) in segments.into_iter().rev() {
            let mut token = NonSystemToken::new(identifier, structural);
            token.next = head.map(Box::new);
            head = Some(PathSegmentToken::NonSystem(token));
        }
        head
    }

    /// Parses a `/`-separated path.
    ///
    /// `classify` is called once per non-system segment, in order, and
    /// reports whether the segment is a structural property. Segments starting
    /// with `$` become system tokens. Returns `None` for an empty path.
    pub fn parse<F>(path: &str, mut classify: F) -> CompileResult<Option<PathSegmentToken>>
    where
        F: FnMut(&str) -> CompileResult<bool>,
    {
        let mut tokens = Vec::new();
        for raw in path.split('/').map(str::trim).filter(|s| !s.is_empty()) {
            if raw.starts_with('$') {
                tokens.push(PathSegmentToken::System(SystemToken {
                    identifier: raw.to_string(),
                    next: None,
                }));
                continue;
            }
            let (identifier, named_values) = split_named_values(raw);
            let structural = classify(identifier)?;
            let mut token = NonSystemToken::new(identifier, structural);
            token.named_values = named_values;
            tokens.push(PathSegmentToken::NonSystem(token));
        }
        let mut head: Option<PathSegmentToken> = None;
        while let Some(mut token) = tokens.pop() {
            let next = head.take().map(Box::new);
            match &mut token {
                PathSegmentToken::System(t) => t.next = next,
                PathSegmentToken::NonSystem(t) => t.next = next,
            }
            head = Some(token);
        }
        Ok(head)
    }

    /// Identifiers from head to tail.
    pub fn identifiers(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut cursor = Some(self);
        while let Some(token) = cursor {
            out.push(token.identifier());
            cursor = token.next();
        }
        out
    }
}

fn split_named_values(raw: &str) -> (&str, Vec<(String, String)>) {
    let Some(open) = raw.find('(') else {
        return (raw, Vec::new());
    };
    let inner = raw[open + 1..].trim_end_matches(')');
    let values = inner
        .split(',')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) => (name.trim().to_string(), value.trim().to_string()),
            None => (String::new(), pair.trim().to_string()),
        })
        .collect();
    (&raw[..open], values)
}

fn illegal(token: &SystemToken) -> CompileError {
    CompileError::IllegalSystemToken {
        token: token.identifier.clone(),
    }
}

fn non_system(token: &PathSegmentToken) -> CompileResult<&NonSystemToken> {
    match token {
        PathSegmentToken::System(system) => Err(illegal(system)),
        PathSegmentToken::NonSystem(token) => Ok(token),
    }
}

/// Attaches `tail` after the last segment of `head`; no-op for `None`.
pub fn append_at_tail(
    head: &mut PathSegmentToken,
    tail: Option<PathSegmentToken>,
) -> CompileResult<()> {
    match head {
        PathSegmentToken::System(system) => Err(illegal(system)),
        PathSegmentToken::NonSystem(token) => {
            if let Some(next) = token.next.as_deref_mut() {
                return append_at_tail(next, tail);
            }
            if let Some(tail) = tail {
                token.next = Some(Box::new(tail));
            }
            Ok(())
        }
    }
}

/// Truncates the chain before the first wildcard segment.
///
/// Returns the new head, or `None` when the head itself is the wildcard.
pub fn remove_wildcard(head: PathSegmentToken) -> CompileResult<Option<PathSegmentToken>> {
    match head {
        PathSegmentToken::System(system) => Err(illegal(&system)),
        PathSegmentToken::NonSystem(token) if token.identifier == WILDCARD => Ok(None),
        PathSegmentToken::NonSystem(mut token) => {
            token.next = match token.next.take() {
                Some(next) => remove_wildcard(*next)?.map(Box::new),
                None => None,
            };
            Ok(Some(PathSegmentToken::NonSystem(token)))
        }
    }
}

/// Rebuilds an equal chain that shares nothing with `head`.
pub fn deep_clone(head: &PathSegmentToken) -> CompileResult<PathSegmentToken> {
    let token = non_system(head)?;
    let next = match token.next.as_deref() {
        Some(next) => Some(Box::new(deep_clone(next)?)),
        None => None,
    };
    Ok(PathSegmentToken::NonSystem(NonSystemToken {
        identifier: token.identifier.clone(),
        named_values: token.named_values.clone(),
        is_structural_property: token.is_structural_property,
        next,
    }))
}

/// Renders a chain where every segment is expanded, doubling the option
/// parentheses at each level: `A(($expand=B(($expand=C))))`.
pub fn expand_only_string(head: &PathSegmentToken) -> CompileResult<String> {
    let token = non_system(head)?;
    match token.next.as_deref() {
        None => Ok(token.identifier.clone()),
        Some(next) => Ok(format!(
            "{}(($expand={}))",
            token.identifier,
            expand_only_string(next)?
        )),
    }
}

/// Renders a chain as nested `$select`/`$expand` options.
///
/// A run of structural segments after a node becomes `$select=B,C`; a
/// navigation segment after the run continues as `;$expand=...`.
pub fn select_expand_string(head: &PathSegmentToken) -> CompileResult<String> {
    let token = non_system(head)?;
    let Some(next) = token.next.as_deref() else {
        return Ok(token.identifier.clone());
    };
    if !non_system(next)?.is_structural_property {
        return Ok(format!(
            "{}($expand={})",
            token.identifier,
            select_expand_string(next)?
        ));
    }
    let mut run = Vec::new();
    let mut cursor = Some(next);
    while let Some(segment) = cursor {
        let segment = non_system(segment)?;
        if !segment.is_structural_property {
            break;
        }
        run.push(segment.identifier.as_str());
        cursor = segment.next.as_deref();
    }
    let mut out = format!("{}($select={}", token.identifier, run.join(","));
    if let Some(navigation) = cursor {
        out.push_str(";$expand=");
        out.push_str(&select_expand_string(navigation)?);
    }
    out.push(')');
    Ok(out)
}
