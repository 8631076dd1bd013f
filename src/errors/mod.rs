//! # Errors Module
//!
//! Failure types raised during dispatch, their hierarchical categories, and
//! the default mapping from an error to a client-facing [`Response`].
//!
//! ## Categories
//!
//! Every [`DispatchError`] has a [`Category`]: a dotted name such as
//! `http.client.404` or `db.timeout`. Categories form a tree by prefix, and
//! exception handlers registered in the [`ExceptionRegistry`] are looked up
//! from the most specific category to the root, so a handler for
//! `http.client` sees every 4xx not claimed by a more specific handler.
//!
//! | Error                        | Category                |
//! |------------------------------|-------------------------|
//! | `Http` with 4xx status       | `http.client.<code>`    |
//! | `Http` with 5xx status       | `http.server.<code>`    |
//! | `Http` with other status     | `http.other.<code>`     |
//! | `Application { category }`   | the supplied category   |
//! | `Io`                         | `io`                    |
//! | `Exchange`                   | `exchange`              |
//! | `Codec`                      | `codec`                 |
//! | `Panic`                      | `panic`                 |
//!
//! ## Default mapping
//!
//! Errors that carry a status (only [`HttpError`]) keep it, with the message
//! as title. Everything else becomes a 500 with a fixed, non-leaking message;
//! the real cause goes to the log. The body is JSON when the client accepts
//! `application/json`, plain text otherwise.

mod registry;

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::io;

use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use serde_json::json;
use thiserror::Error;

use crate::codec::CodecError;
use crate::context::Response;
use crate::exchange::ExchangeError;

pub use registry::{ErrorHandler, ExceptionRegistry};

/// Message used for every error that does not carry its own status.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Hierarchical error category. `""` is the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Category(Cow<'static, str>);

impl Category {
    pub const ROOT: Category = Category(Cow::Borrowed(""));
    pub const IO: Category = Category(Cow::Borrowed("io"));
    pub const EXCHANGE: Category = Category(Cow::Borrowed("exchange"));
    pub const CODEC: Category = Category(Cow::Borrowed("codec"));
    pub const PANIC: Category = Category(Cow::Borrowed("panic"));
    pub const HTTP: Category = Category(Cow::Borrowed("http"));
    pub const HTTP_CLIENT: Category = Category(Cow::Borrowed("http.client"));
    pub const HTTP_SERVER: Category = Category(Cow::Borrowed("http.server"));

    /// Build a category; surrounding dots are trimmed.
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        let name = name.into();
        if name.starts_with('.') || name.ends_with('.') {
            return Category(Cow::Owned(name.trim_matches('.').to_string()));
        }
        Category(name)
    }

    /// Category for an HTTP status.
    #[must_use]
    pub fn for_status(status: StatusCode) -> Self {
        let family = if status.is_client_error() {
            "client"
        } else if status.is_server_error() {
            "server"
        } else {
            "other"
        };
        Category(Cow::Owned(format!("http.{family}.{}", status.as_u16())))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Enclosing category: `a.b.c` → `a.b` → `a` → root → `None`.
    #[must_use]
    pub fn parent(&self) -> Option<Category> {
        if self.is_root() {
            return None;
        }
        Some(match self.0.rfind('.') {
            Some(idx) => Category(Cow::Owned(self.0[..idx].to_string())),
            None => Category::ROOT,
        })
    }

    /// This category, then each ancestor, ending with the root.
    pub fn lineage(&self) -> impl Iterator<Item = Category> {
        std::iter::successors(Some(self.clone()), Category::parent)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl From<&'static str> for Category {
    fn from(name: &'static str) -> Self {
        Category::new(name)
    }
}

impl From<String> for Category {
    fn from(name: String) -> Self {
        Category::new(name)
    }
}

/// An error that carries its own HTTP status and client-safe message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status}: {message}")]
pub struct HttpError {
    pub status: StatusCode,
    pub message: String,
    pub details: BTreeMap<String, String>,
}

impl HttpError {
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    #[must_use]
    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    #[must_use]
    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "Forbidden")
    }

    #[must_use]
    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "Not found")
    }

    #[must_use]
    pub fn category(&self) -> Category {
        Category::for_status(self.status)
    }
}

/// Any failure raised while dispatching a request.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Carries a status and a client-facing message.
    #[error(transparent)]
    Http(#[from] HttpError),
    /// Application failure with a caller-chosen category.
    #[error("{category}: {source}")]
    Application {
        category: Category,
        #[source]
        source: anyhow::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// A handler, filter or exception handler panicked.
    #[error("panic: {0}")]
    Panic(String),
}

impl DispatchError {
    /// Wrap an application error under `category`.
    pub fn application(category: impl Into<Category>, source: impl Into<anyhow::Error>) -> Self {
        DispatchError::Application {
            category: category.into(),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn category(&self) -> Category {
        match self {
            DispatchError::Http(e) => e.category(),
            DispatchError::Application { category, .. } => category.clone(),
            DispatchError::Io(_) => Category::IO,
            DispatchError::Exchange(_) => Category::EXCHANGE,
            DispatchError::Codec(_) => Category::CODEC,
            DispatchError::Panic(_) => Category::PANIC,
        }
    }

    /// Status carried by the error itself, if any.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DispatchError::Http(e) => Some(e.status),
            _ => None,
        }
    }

    /// Borrow the inner [`HttpError`], if that is what this is.
    #[must_use]
    pub fn as_http(&self) -> Option<&HttpError> {
        match self {
            DispatchError::Http(e) => Some(e),
            _ => None,
        }
    }
}

/// Render the default response for `error`.
#[must_use]
pub fn default_response(error: &DispatchError, wants_json: bool) -> Response {
    match error.as_http() {
        Some(http) => render(http.status, &http.message, &http.details, wants_json),
        None => internal_error_response(wants_json),
    }
}

/// The generic 500 response.
#[must_use]
pub fn internal_error_response(wants_json: bool) -> Response {
    render(
        StatusCode::INTERNAL_SERVER_ERROR,
        INTERNAL_ERROR_MESSAGE,
        &BTreeMap::new(),
        wants_json,
    )
}

fn render(
    status: StatusCode,
    title: &str,
    details: &BTreeMap<String, String>,
    wants_json: bool,
) -> Response {
    if wants_json {
        Response::json(json!({
            "title": title,
            "status": status.as_u16(),
            "details": details,
        }))
        .with_status(status)
        .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
    } else {
        Response::text(title.to_string())
            .with_status(status)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))
    }
}
