use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::{Category, DispatchError};
use crate::context::Context;
use crate::dispatcher::HandlerResult;

/// Converts an error into a response.
///
/// May itself fail; the dispatcher then falls back to the generic 500.
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, error: &DispatchError, ctx: &mut Context<'_>) -> HandlerResult;
}

impl<F> ErrorHandler for F
where
    F: Fn(&DispatchError, &mut Context<'_>) -> HandlerResult + Send + Sync,
{
    fn handle(&self, error: &DispatchError, ctx: &mut Context<'_>) -> HandlerResult {
        self(error, ctx)
    }
}

/// Category → handler table, populated during setup and read-only afterwards.
///
/// Lookup walks from the error's own category up to the root and returns the
/// first handler found, so the most specific registration wins. Registering
/// the same category twice replaces the earlier handler.
#[derive(Default, Clone)]
pub struct ExceptionRegistry {
    handlers: HashMap<Category, Arc<dyn ErrorHandler>>,
}

impl fmt::Debug for ExceptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut categories: Vec<&str> = self.handlers.keys().map(Category::as_str).collect();
        categories.sort_unstable();
        f.debug_struct("ExceptionRegistry")
            .field("categories", &categories)
            .finish()
    }
}

impl ExceptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure for `category` and everything beneath it.
    pub fn register<F>(&mut self, category: impl Into<Category>, handler: F) -> &mut Self
    where
        F: Fn(&DispatchError, &mut Context<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.register_handler(category.into(), Arc::new(handler))
    }

    /// Register a handler object. The root category catches everything.
    pub fn register_handler(&mut self, category: Category, handler: Arc<dyn ErrorHandler>) -> &mut Self {
        if self.handlers.insert(category.clone(), handler).is_some() {
            debug!(category = %category, "Exception handler replaced");
        } else {
            debug!(category = %category, "Exception handler registered");
        }
        self
    }

    /// Most specific handler for `error`, with the category it was registered under.
    #[must_use]
    pub fn find(&self, error: &DispatchError) -> Option<(Category, Arc<dyn ErrorHandler>)> {
        self.find_category(&error.category())
    }

    #[must_use]
    pub fn find_category(&self, category: &Category) -> Option<(Category, Arc<dyn ErrorHandler>)> {
        category
            .lineage()
            .find_map(|c| self.handlers.get(&c).map(|h| (c, Arc::clone(h))))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Response;

    fn noop(_: &DispatchError, _: &mut Context<'_>) -> HandlerResult {
        Ok(Response::ok())
    }

    #[test]
    fn test_walks_to_nearest_ancestor() {
        let mut reg = ExceptionRegistry::new();
        reg.register("http.client", noop);
        reg.register("db", noop);

        let (hit, _) = reg.find_category(&Category::new("http.client.404")).unwrap();
        assert_eq!(hit.as_str(), "http.client");
        let (hit, _) = reg.find_category(&Category::new("db.timeout.read")).unwrap();
        assert_eq!(hit.as_str(), "db");
        assert!(reg.find_category(&Category::new("http.server.500")).is_none());
    }

    #[test]
    fn test_root_catches_everything() {
        let mut reg = ExceptionRegistry::new();
        reg.register_handler(Category::ROOT, Arc::new(noop));
        let (hit, _) = reg.find_category(&Category::new("anything.at.all")).unwrap();
        assert!(hit.is_root());
    }

    #[test]
    fn test_re_registration_replaces() {
        let mut reg = ExceptionRegistry::new();
        reg.register("db", noop);
        reg.register("db", noop);
        assert_eq!(reg.len(), 1);
    }
}
