//! Path pattern compilation and matching.
//!
//! A route template such as `/one/{id}/two/{b}/{c}/end` is compiled once, at
//! registration time, into an ordered list of [`Segment`]s. Matching a request
//! path is then a single pass over its `/`-delimited components with no
//! allocation: literal segments compare byte-for-byte (case-sensitive, no
//! decoding), parameter segments accept any non-empty component.
//!
//! Decoding only happens in [`PathPattern::extract_path_params`], which is
//! called once per request after the router has picked a winner.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use thiserror::Error;

/// Maximum number of path/query parameters before heap allocation.
/// Most REST APIs have ≤4 path params (e.g., /users/{id}/posts/{postId}).
pub const MAX_INLINE_PARAMS: usize = 8;

/// Stack-allocated parameter storage for the hot path.
///
/// Param names use `Arc<str>` because they come from the compiled pattern and
/// are shared by every request hitting the route; values are per-request.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// Errors raised while compiling a path template.
///
/// All of these are configuration errors and surface at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    /// Templates must be absolute.
    #[error("path template '{template}' must start with '/'")]
    NotAbsolute { template: String },
    /// `{}` with nothing between the braces.
    #[error("path template '{template}' contains an empty parameter name")]
    EmptyParamName { template: String },
    /// A segment mixes literal text and braces, or braces are unbalanced.
    #[error("path template '{template}' has a malformed segment '{segment}'")]
    MalformedSegment { template: String, segment: String },
    /// The same parameter name appears twice in one template.
    #[error("path template '{template}' declares parameter '{name}' more than once")]
    DuplicateParam { template: String, name: String },
    /// A matched path segment is not valid percent-encoded UTF-8.
    #[error("path segment '{segment}' is not valid percent-encoded UTF-8")]
    Undecodable { segment: String },
}

/// One `/`-delimited component of a compiled template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Matches exactly this text.
    Literal(Box<str>),
    /// Matches any non-empty component and captures it under this name.
    Param(Arc<str>),
}

impl Segment {
    #[inline]
    fn accepts(&self, component: &str) -> bool {
        match self {
            Segment::Literal(text) => text.as_ref() == component,
            Segment::Param(_) => !component.is_empty(),
        }
    }
}

/// A compiled route template.
///
/// Segment count is fixed once compiled; there are no wildcard-arity segments.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: Arc<str>,
    segments: SmallVec<[Segment; MAX_INLINE_PARAMS]>,
    param_names: SmallVec<[Arc<str>; MAX_INLINE_PARAMS]>,
    trailing_slash: bool,
    strict_trailing_slash: bool,
}

impl PathPattern {
    /// Compile a template with lenient trailing-slash handling.
    pub fn compile(template: &str) -> Result<Self, PatternError> {
        Self::with_options(template, false)
    }

    /// Compile a template.
    ///
    /// With `strict_trailing_slash` set, a template ending in `/` only matches
    /// request paths ending in `/` and vice versa. Otherwise a trailing slash
    /// on either side is ignored.
    pub fn with_options(template: &str, strict_trailing_slash: bool) -> Result<Self, PatternError> {
        if !template.starts_with('/') {
            return Err(PatternError::NotAbsolute {
                template: template.to_string(),
            });
        }

        let (body, trailing_slash) = trim_path(template);
        let mut segments = SmallVec::new();
        let mut param_names: SmallVec<[Arc<str>; MAX_INLINE_PARAMS]> = SmallVec::new();

        for piece in body.split('/').filter(|p| !p.is_empty()) {
            let segment = classify(template, piece)?;
            if let Segment::Param(name) = &segment {
                if param_names.iter().any(|n| n == name) {
                    return Err(PatternError::DuplicateParam {
                        template: template.to_string(),
                        name: name.to_string(),
                    });
                }
                param_names.push(Arc::clone(name));
            }
            segments.push(segment);
        }

        Ok(Self {
            raw: Arc::from(template),
            segments,
            param_names,
            trailing_slash,
            strict_trailing_slash,
        })
    }

    /// The template this pattern was compiled from.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of segments; `/` has zero.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Parameter names in template order.
    #[must_use]
    pub fn param_names(&self) -> &[Arc<str>] {
        &self.param_names
    }

    /// `true` when the pattern contains no parameters.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.param_names.is_empty()
    }

    /// Test a request path (no query string) against this pattern.
    ///
    /// Requires an equal segment count and an exact match of every literal
    /// segment. No decoding is applied.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        let (body, trailing) = trim_path(path);
        if self.strict_trailing_slash && trailing != self.trailing_slash {
            return false;
        }

        let mut components = components(body);
        for segment in &self.segments {
            match components.next() {
                Some(component) if segment.accepts(component) => {}
                _ => return false,
            }
        }
        components.next().is_none()
    }

    /// Extract URL-decoded parameter values from a path that [`matches`](Self::matches).
    ///
    /// Keys are exactly [`param_names`](Self::param_names), in template order.
    pub fn extract_path_params(&self, path: &str) -> Result<ParamVec, PatternError> {
        let (body, _) = trim_path(path);
        let mut params = ParamVec::new();
        for (segment, component) in self.segments.iter().zip(components(body)) {
            if let Segment::Param(name) = segment {
                let value = decode_component(component)?;
                params.push((Arc::clone(name), value.into_owned()));
            }
        }
        Ok(params)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Count the segments of a request path the same way patterns are counted.
///
/// `/` has zero segments; a single trailing slash is not a segment.
#[must_use]
pub fn count_segments(path: &str) -> usize {
    let (body, _) = trim_path(path);
    components(body).count()
}

/// Strip the leading slash and one trailing slash.
/// Returns the remaining body and whether a trailing slash was present.
fn trim_path(path: &str) -> (&str, bool) {
    let body = path.strip_prefix('/').unwrap_or(path);
    match body.strip_suffix('/') {
        Some(stripped) => (stripped, true),
        None => (body, false),
    }
}

fn components(body: &str) -> impl Iterator<Item = &str> {
    (!body.is_empty()).then(|| body.split('/')).into_iter().flatten()
}

fn classify(template: &str, piece: &str) -> Result<Segment, PatternError> {
    let opens = piece.contains('{');
    let closes = piece.contains('}');
    if !opens && !closes {
        return Ok(Segment::Literal(Box::from(piece)));
    }

    let malformed = || PatternError::MalformedSegment {
        template: template.to_string(),
        segment: piece.to_string(),
    };

    let name = piece
        .strip_prefix('{')
        .and_then(|p| p.strip_suffix('}'))
        .ok_or_else(malformed)?;
    if name.contains('{') || name.contains('}') {
        return Err(malformed());
    }
    if name.is_empty() {
        return Err(PatternError::EmptyParamName {
            template: template.to_string(),
        });
    }
    Ok(Segment::Param(Arc::from(name)))
}

fn decode_component(component: &str) -> Result<Cow<'_, str>, PatternError> {
    if !component.contains('%') {
        return Ok(Cow::Borrowed(component));
    }
    urlencoding::decode(component).map_err(|_| PatternError::Undecodable {
        segment: component.to_string(),
    })
}
