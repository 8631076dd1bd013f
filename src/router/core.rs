//! Router core module - hot path for request routing.
//!
//! The [`RouteTable`] is built once through a [`RouterBuilder`] and is then
//! immutable: no mutation API exists post-build, so concurrent lookups need
//! no locking. Share it behind an `Arc`.

#![deny(clippy::inefficient_to_string)]
#![deny(clippy::format_push_string)]
#![deny(clippy::unnecessary_to_owned)]

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::Method;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::index::RouteIndex;
use super::pattern::{ParamVec, PathPattern, PatternError};
use crate::config::RouterConfig;
use crate::context::{Context, Response};
use crate::dispatcher::{Handler, HandlerResult};
use crate::errors::DispatchError;
use crate::middleware::{AfterFilter, AfterHook, BeforeFilter, BeforeHook, FilterOutcome, Middleware};

/// HTTP methods a route can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RouteKind {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Trace,
    Options,
}

impl RouteKind {
    pub const ALL: [RouteKind; 8] = [
        RouteKind::Get,
        RouteKind::Post,
        RouteKind::Put,
        RouteKind::Patch,
        RouteKind::Delete,
        RouteKind::Head,
        RouteKind::Trace,
        RouteKind::Options,
    ];

    /// Map a request method onto a route kind; `None` for anything unsupported.
    #[must_use]
    pub fn from_method(method: &Method) -> Option<Self> {
        Some(match *method {
            Method::GET => RouteKind::Get,
            Method::POST => RouteKind::Post,
            Method::PUT => RouteKind::Put,
            Method::PATCH => RouteKind::Patch,
            Method::DELETE => RouteKind::Delete,
            Method::HEAD => RouteKind::Head,
            Method::TRACE => RouteKind::Trace,
            Method::OPTIONS => RouteKind::Options,
            _ => return None,
        })
    }

    #[must_use]
    pub fn method(self) -> Method {
        match self {
            RouteKind::Get => Method::GET,
            RouteKind::Post => Method::POST,
            RouteKind::Put => Method::PUT,
            RouteKind::Patch => Method::PATCH,
            RouteKind::Delete => Method::DELETE,
            RouteKind::Head => Method::HEAD,
            RouteKind::Trace => Method::TRACE,
            RouteKind::Options => Method::OPTIONS,
        }
    }

    #[inline]
    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method().as_str())
    }
}

/// Filter phase relative to the route handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPhase {
    Before,
    After,
}

/// An application-defined role attached to a route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Role(Arc<str>);

impl Role {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Role {
    fn from(name: &str) -> Self {
        Role::new(name)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type RoleSet = BTreeSet<Role>;

/// One registered route. Immutable once the table is built.
pub struct RouteEntry {
    pub kind: RouteKind,
    pub pattern: PathPattern,
    pub roles: RoleSet,
    pub handler: Arc<dyn Handler>,
}

impl RouteEntry {
    /// The template the route was registered with.
    #[must_use]
    pub fn raw_path(&self) -> &str {
        self.pattern.raw()
    }
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry")
            .field("kind", &self.kind)
            .field("pattern", &self.pattern.raw())
            .field("roles", &self.roles)
            .finish_non_exhaustive()
    }
}

/// A filter plus the path prefix it is scoped to.
///
/// `prefix == None` applies to every request.
pub struct FilterEntry<F: ?Sized> {
    pub phase: FilterPhase,
    pub prefix: Option<Box<str>>,
    pub filter: Arc<F>,
}

impl<F: ?Sized> FilterEntry<F> {
    /// Whether this filter runs for `path`.
    ///
    /// A prefix of `/two` (registered as `/two`, `/two/` or `/two/*`) matches
    /// `/two` and anything below `/two/`, but not `/twofold`.
    #[must_use]
    pub fn applies_to(&self, path: &str) -> bool {
        match self.prefix.as_deref() {
            None => true,
            Some(prefix) => match path.strip_prefix(prefix) {
                Some(rest) => rest.is_empty() || rest.starts_with('/'),
                None => false,
            },
        }
    }
}

impl<F: ?Sized> fmt::Debug for FilterEntry<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterEntry")
            .field("phase", &self.phase)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// Registration failures. Raised immediately by the builder.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid route {kind} {path}: {source}")]
    InvalidPattern {
        kind: RouteKind,
        path: String,
        #[source]
        source: PatternError,
    },
    #[error("invalid filter prefix '{0}': must start with '/'")]
    InvalidPrefix(String),
}

/// Result of a successful route lookup.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub entry: Arc<RouteEntry>,
}

impl RouteMatch {
    #[must_use]
    pub fn pattern(&self) -> &PathPattern {
        &self.entry.pattern
    }

    #[must_use]
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.entry.handler
    }

    /// Decode the parameters of `path` against the matched pattern.
    pub fn path_params(&self, path: &str) -> Result<ParamVec, PatternError> {
        self.entry.pattern.extract_path_params(path)
    }
}

/// Immutable routing table: one [`RouteIndex`] per method plus filter lists.
pub struct RouteTable {
    indexes: [RouteIndex; 8],
    before: Vec<FilterEntry<dyn BeforeFilter>>,
    after: Vec<FilterEntry<dyn AfterFilter>>,
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable")
            .field("routes", &self.len())
            .field("before_filters", &self.before.len())
            .field("after_filters", &self.after.len())
            .finish()
    }
}

impl RouteTable {
    #[must_use]
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Match a request to a route.
    ///
    /// Scans only the bucket for the request's segment count, in registration
    /// order; the first hit wins. `None` means 404.
    #[must_use]
    pub fn match_route(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        // R1: Route match attempt
        debug!(method = %method, path = %path, "Route match attempt");

        let kind = match RouteKind::from_method(method) {
            Some(kind) => kind,
            None => {
                debug!(method = %method, "Unsupported method");
                return None;
            }
        };

        let match_start = Instant::now();
        let result = self.indexes[kind.slot()].find(path);
        let match_duration = match_start.elapsed();

        match result {
            Some(entry) => {
                if match_duration > Duration::from_millis(1) {
                    warn!(
                        method = %method,
                        path = %path,
                        route_pattern = %entry.pattern,
                        duration_us = match_duration.as_micros(),
                        "Slow route matching detected"
                    );
                } else {
                    // R2: Route matched
                    debug!(
                        method = %method,
                        path = %path,
                        route_pattern = %entry.pattern,
                        duration_us = match_duration.as_micros(),
                        "Route matched"
                    );
                }
                Some(RouteMatch {
                    entry: Arc::clone(entry),
                })
            }
            None => {
                // R3: No route found
                debug!(
                    method = %method,
                    path = %path,
                    duration_us = match_duration.as_micros(),
                    "No route matched"
                );
                None
            }
        }
    }

    /// Before-filters that apply to `path`, in registration order.
    pub fn before_filters<'a>(
        &'a self,
        path: &'a str,
    ) -> impl Iterator<Item = &'a FilterEntry<dyn BeforeFilter>> + 'a {
        self.before.iter().filter(move |f| f.applies_to(path))
    }

    /// After-filters that apply to `path`, in registration order.
    pub fn after_filters<'a>(
        &'a self,
        path: &'a str,
    ) -> impl Iterator<Item = &'a FilterEntry<dyn AfterFilter>> + 'a {
        self.after.iter().filter(move |f| f.applies_to(path))
    }

    /// The index used for one method. Exposed for inspection and benchmarks.
    #[must_use]
    pub fn index(&self, kind: RouteKind) -> &RouteIndex {
        &self.indexes[kind.slot()]
    }

    /// Total number of routes across all methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indexes.iter().map(RouteIndex::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indexes.iter().all(RouteIndex::is_empty)
    }

    /// Every registered route template, deduplicated, for metrics pre-registration.
    #[must_use]
    pub fn path_patterns(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self
            .indexes
            .iter()
            .flat_map(RouteIndex::iter)
            .map(|e| e.pattern.raw())
            .collect();
        set.into_iter().map(str::to_owned).collect()
    }
}

/// Collects routes and filters, compiling each pattern at registration time.
pub struct RouterBuilder {
    strict_trailing_slash: bool,
    indexes: [RouteIndex; 8],
    before: Vec<FilterEntry<dyn BeforeFilter>>,
    after: Vec<FilterEntry<dyn AfterFilter>>,
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RouterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterBuilder")
            .field("strict_trailing_slash", &self.strict_trailing_slash)
            .field("routes", &self.indexes.iter().map(RouteIndex::len).sum::<usize>())
            .field("before_filters", &self.before.len())
            .field("after_filters", &self.after.len())
            .finish()
    }
}

impl RouterBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&RouterConfig::default())
    }

    /// Create a builder honouring trailing-slash strictness and bucket cap.
    #[must_use]
    pub fn with_config(config: &RouterConfig) -> Self {
        let cap = config.bucket_cap;
        Self {
            strict_trailing_slash: config.strict_trailing_slash,
            indexes: std::array::from_fn(|_| RouteIndex::new(cap)),
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    /// Register a handler object for `kind` at `path` with required `roles`.
    pub fn add_handler(
        &mut self,
        kind: RouteKind,
        path: &str,
        roles: RoleSet,
        handler: Arc<dyn Handler>,
    ) -> Result<&mut Self, RouteError> {
        let pattern = PathPattern::with_options(path, self.strict_trailing_slash).map_err(
            |source| RouteError::InvalidPattern {
                kind,
                path: path.to_string(),
                source,
            },
        )?;
        debug!(method = %kind, route_pattern = %pattern, segments = pattern.segment_count(), "Route registered");
        self.indexes[kind.slot()].add(Arc::new(RouteEntry {
            kind,
            pattern,
            roles,
            handler,
        }));
        Ok(self)
    }

    /// Register a closure handler.
    pub fn add<F>(&mut self, kind: RouteKind, path: &str, handler: F) -> Result<&mut Self, RouteError>
    where
        F: Fn(&mut Context<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.add_handler(kind, path, RoleSet::new(), Arc::new(handler))
    }

    /// Register a closure handler that requires `roles`.
    pub fn add_with_roles<F, R>(
        &mut self,
        kind: RouteKind,
        path: &str,
        roles: R,
        handler: F,
    ) -> Result<&mut Self, RouteError>
    where
        F: Fn(&mut Context<'_>) -> HandlerResult + Send + Sync + 'static,
        R: IntoIterator,
        R::Item: Into<Role>,
    {
        let roles = roles.into_iter().map(Into::into).collect();
        self.add_handler(kind, path, roles, Arc::new(handler))
    }

    pub fn get<F>(&mut self, path: &str, handler: F) -> Result<&mut Self, RouteError>
    where
        F: Fn(&mut Context<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(RouteKind::Get, path, handler)
    }

    pub fn post<F>(&mut self, path: &str, handler: F) -> Result<&mut Self, RouteError>
    where
        F: Fn(&mut Context<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(RouteKind::Post, path, handler)
    }

    pub fn put<F>(&mut self, path: &str, handler: F) -> Result<&mut Self, RouteError>
    where
        F: Fn(&mut Context<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(RouteKind::Put, path, handler)
    }

    pub fn patch<F>(&mut self, path: &str, handler: F) -> Result<&mut Self, RouteError>
    where
        F: Fn(&mut Context<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(RouteKind::Patch, path, handler)
    }

    pub fn delete<F>(&mut self, path: &str, handler: F) -> Result<&mut Self, RouteError>
    where
        F: Fn(&mut Context<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(RouteKind::Delete, path, handler)
    }

    pub fn head<F>(&mut self, path: &str, handler: F) -> Result<&mut Self, RouteError>
    where
        F: Fn(&mut Context<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(RouteKind::Head, path, handler)
    }

    pub fn trace<F>(&mut self, path: &str, handler: F) -> Result<&mut Self, RouteError>
    where
        F: Fn(&mut Context<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(RouteKind::Trace, path, handler)
    }

    pub fn options<F>(&mut self, path: &str, handler: F) -> Result<&mut Self, RouteError>
    where
        F: Fn(&mut Context<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(RouteKind::Options, path, handler)
    }

    /// Register a before-filter object. `prefix == None` applies to every request.
    pub fn add_before(
        &mut self,
        prefix: Option<&str>,
        filter: Arc<dyn BeforeFilter>,
    ) -> Result<&mut Self, RouteError> {
        let prefix = normalize_prefix(prefix)?;
        self.before.push(FilterEntry {
            phase: FilterPhase::Before,
            prefix,
            filter,
        });
        Ok(self)
    }

    /// Register an after-filter object. `prefix == None` applies to every request.
    pub fn add_after(
        &mut self,
        prefix: Option<&str>,
        filter: Arc<dyn AfterFilter>,
    ) -> Result<&mut Self, RouteError> {
        let prefix = normalize_prefix(prefix)?;
        self.after.push(FilterEntry {
            phase: FilterPhase::After,
            prefix,
            filter,
        });
        Ok(self)
    }

    /// Unscoped before-filter closure.
    pub fn before<F>(&mut self, filter: F) -> Result<&mut Self, RouteError>
    where
        F: Fn(&mut Context<'_>) -> Result<FilterOutcome, DispatchError> + Send + Sync + 'static,
    {
        self.add_before(None, Arc::new(filter))
    }

    /// Before-filter closure scoped to `prefix` (e.g. `/two/*`).
    pub fn before_path<F>(&mut self, prefix: &str, filter: F) -> Result<&mut Self, RouteError>
    where
        F: Fn(&mut Context<'_>) -> Result<FilterOutcome, DispatchError> + Send + Sync + 'static,
    {
        self.add_before(Some(prefix), Arc::new(filter))
    }

    /// Unscoped after-filter closure.
    pub fn after<F>(&mut self, filter: F) -> Result<&mut Self, RouteError>
    where
        F: Fn(&mut Context<'_>, &mut Response) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        self.add_after(None, Arc::new(filter))
    }

    /// After-filter closure scoped to `prefix`.
    pub fn after_path<F>(&mut self, prefix: &str, filter: F) -> Result<&mut Self, RouteError>
    where
        F: Fn(&mut Context<'_>, &mut Response) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        self.add_after(Some(prefix), Arc::new(filter))
    }

    /// Register a middleware in both phases for the same prefix.
    pub fn middleware<M>(&mut self, prefix: Option<&str>, mw: Arc<M>) -> Result<&mut Self, RouteError>
    where
        M: Middleware + 'static,
    {
        let before: Arc<dyn BeforeFilter> = Arc::new(BeforeHook(Arc::clone(&mw)));
        let after: Arc<dyn AfterFilter> = Arc::new(AfterHook(mw));
        self.add_before(prefix, before)?;
        self.add_after(prefix, after)
    }

    /// Freeze the table.
    #[must_use]
    pub fn build(self) -> RouteTable {
        let table = RouteTable {
            indexes: self.indexes,
            before: self.before,
            after: self.after,
        };

        // R5: Routing table loaded
        let routes_summary: Vec<String> = RouteKind::ALL
            .iter()
            .flat_map(|kind| {
                table.indexes[kind.slot()]
                    .iter()
                    .map(move |e| format!("{kind} {}", e.pattern))
            })
            .take(10)
            .collect();
        info!(
            routes_count = table.len(),
            before_filters = table.before.len(),
            after_filters = table.after.len(),
            routes_summary = ?routes_summary,
            routing_algorithm = "segment_buckets",
            "Routing table loaded"
        );
        table
    }
}

fn normalize_prefix(prefix: Option<&str>) -> Result<Option<Box<str>>, RouteError> {
    let Some(raw) = prefix else {
        return Ok(None);
    };
    let trimmed = raw.strip_suffix('*').unwrap_or(raw);
    let trimmed = trimmed.trim_end_matches('/');
    if trimmed.is_empty() {
        // "", "*", "/", "/*" all mean every request.
        return Ok(None);
    }
    if !trimmed.starts_with('/') {
        return Err(RouteError::InvalidPrefix(raw.to_string()));
    }
    Ok(Some(Box::from(trimmed)))
}

#[cfg(test)]
mod prefix_tests {
    use super::normalize_prefix;

    #[test]
    fn test_normalize_prefix_variants() {
        assert_eq!(normalize_prefix(None).unwrap(), None);
        assert_eq!(normalize_prefix(Some("/*")).unwrap(), None);
        assert_eq!(normalize_prefix(Some("*")).unwrap(), None);
        assert_eq!(normalize_prefix(Some("/two/*")).unwrap().as_deref(), Some("/two"));
        assert_eq!(normalize_prefix(Some("/two/")).unwrap().as_deref(), Some("/two"));
        assert!(normalize_prefix(Some("two")).is_err());
    }
}
