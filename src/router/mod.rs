//! # Router Module
//!
//! Path matching and route resolution for the dispatch core.
//!
//! ## Overview
//!
//! The router is responsible for:
//! - Compiling route templates such as `/users/{id}/posts/{post}` at registration time
//! - Matching incoming requests to the first-registered route for their method
//! - Extracting (lazily, on demand) URL-decoded path parameters from the winner
//! - Holding before/after filters scoped by path prefix
//!
//! ## Architecture
//!
//! Each HTTP method owns a [`RouteIndex`]: a small array of buckets keyed by
//! `min(segment_count, bucket_cap)`. A lookup counts the request path's
//! segments once, jumps to the matching bucket, and scans it in registration
//! order. Routes of other shapes are never inspected.
//!
//! ```text
//! GET index                       request: GET /users/42
//! ┌──────────┬──────────────────┐             │ 2 segments
//! │ bucket 0 │ /                │             ▼
//! │ bucket 1 │ /users  /health  │       ┌──────────┐
//! │ bucket 2 │ /users/{id}      │ ◄──── │ bucket 2 │  first match wins
//! │ ...      │                  │       └──────────┘
//! │ bucket 5 │ 5+ segments      │
//! └──────────┴──────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use brrtcore::context::Response;
//! use brrtcore::router::RouteTable;
//! use http::Method;
//!
//! let mut builder = RouteTable::builder();
//! builder
//!     .get("/users/{id}", |ctx| {
//!         let id = ctx.path_param("id")?.to_string();
//!         Ok(Response::text(id))
//!     })
//!     .unwrap();
//! let table = builder.build();
//!
//! let hit = table.match_route(&Method::GET, "/users/42").unwrap();
//! assert_eq!(hit.pattern().raw(), "/users/{id}");
//! assert!(table.match_route(&Method::POST, "/users/42").is_none());
//! ```

mod core;
mod index;
mod pattern;
#[cfg(test)]
mod tests;

pub use self::core::{
    FilterEntry, FilterPhase, Role, RoleSet, RouteEntry, RouteError, RouteKind, RouteMatch,
    RouteTable, RouterBuilder,
};
pub use index::{RouteIndex, DEFAULT_BUCKET_CAP};
pub use pattern::{count_segments, ParamVec, PathPattern, PatternError, Segment, MAX_INLINE_PARAMS};
