use std::sync::Arc;

use http::Method;

use super::*;
use crate::config::RouterConfig;
use crate::context::Response;

fn table(routes: &[(RouteKind, &'static str)]) -> RouteTable {
    let mut builder = RouterBuilder::new();
    for (kind, path) in routes {
        let label: &'static str = *path;
        builder
            .add(*kind, path, move |_ctx| Ok(Response::text(label)))
            .unwrap();
    }
    builder.build()
}

#[test]
fn test_method_isolation() {
    let t = table(&[(RouteKind::Get, "/items"), (RouteKind::Delete, "/items/{id}")]);
    assert!(t.match_route(&Method::GET, "/items").is_some());
    assert!(t.match_route(&Method::POST, "/items").is_none());
    assert!(t.match_route(&Method::DELETE, "/items/7").is_some());
    assert!(t.match_route(&Method::GET, "/items/7").is_none());
}

#[test]
fn test_unsupported_method_is_not_found() {
    let t = table(&[(RouteKind::Get, "/")]);
    let connect = Method::from_bytes(b"CONNECT").unwrap();
    assert!(t.match_route(&connect, "/").is_none());
}

#[test]
fn test_first_registered_wins() {
    let t = table(&[(RouteKind::Get, "/users/{id}"), (RouteKind::Get, "/users/me")]);
    let hit = t.match_route(&Method::GET, "/users/me").unwrap();
    assert_eq!(hit.pattern().raw(), "/users/{id}");
}

#[test]
fn test_literal_registered_first_shadows_param() {
    let t = table(&[(RouteKind::Get, "/users/me"), (RouteKind::Get, "/users/{id}")]);
    assert_eq!(
        t.match_route(&Method::GET, "/users/me").unwrap().pattern().raw(),
        "/users/me"
    );
    assert_eq!(
        t.match_route(&Method::GET, "/users/9").unwrap().pattern().raw(),
        "/users/{id}"
    );
}

#[test]
fn test_overflow_bucket_keeps_segment_counts_apart() {
    let t = table(&[
        (RouteKind::Get, "/a/b/c/d/e"),
        (RouteKind::Get, "/a/b/c/d/e/f"),
        (RouteKind::Get, "/a/{x}/c/d/e/f/g"),
    ]);
    let idx = t.index(RouteKind::Get);
    assert_eq!(idx.candidates("/a/b/c/d/e").len(), 3);
    assert_eq!(
        t.match_route(&Method::GET, "/a/b/c/d/e/f").unwrap().pattern().raw(),
        "/a/b/c/d/e/f"
    );
    assert_eq!(
        t.match_route(&Method::GET, "/a/q/c/d/e/f/g").unwrap().pattern().raw(),
        "/a/{x}/c/d/e/f/g"
    );
    assert!(t.match_route(&Method::GET, "/a/b/c/d/e/f/g/h").is_none());
}

#[test]
fn test_bucket_cap_is_configurable() {
    let cfg = RouterConfig {
        bucket_cap: 2,
        ..RouterConfig::default()
    };
    let mut builder = RouterBuilder::with_config(&cfg);
    builder.get("/a/b", |_| Ok(Response::ok())).unwrap();
    builder.get("/a/b/c", |_| Ok(Response::ok())).unwrap();
    let t = builder.build();
    assert_eq!(t.index(RouteKind::Get).candidates("/x/y/z/w").len(), 2);
    assert!(t.match_route(&Method::GET, "/a/b/c").is_some());
}

#[test]
fn test_params_keys_are_pattern_names() {
    let t = table(&[(RouteKind::Get, "/one/{id}/two/{b}/{c}/end")]);
    let hit = t.match_route(&Method::GET, "/one/1/two/x/y/end").unwrap();
    let params = hit.path_params("/one/1/two/x/y/end").unwrap();
    let keys: Vec<&str> = params.iter().map(|(k, _)| k.as_ref()).collect();
    assert_eq!(keys, ["id", "b", "c"]);
    let values: Vec<&str> = params.iter().map(|(_, v)| v.as_str()).collect();
    assert_eq!(values, ["1", "x", "y"]);
}

#[test]
fn test_invalid_template_rejected_at_registration() {
    let mut builder = RouterBuilder::new();
    let err = builder.get("/a/{", |_| Ok(Response::ok())).unwrap_err();
    assert!(matches!(err, RouteError::InvalidPattern { kind: RouteKind::Get, .. }));
    assert!(builder.before_path("nope", |_| Ok(crate::middleware::FilterOutcome::Continue)).is_err());
}

#[test]
fn test_filter_prefix_scoping() {
    let mut builder = RouterBuilder::new();
    builder
        .before(|_| Ok(crate::middleware::FilterOutcome::Continue))
        .unwrap()
        .before_path("/two/*", |_| Ok(crate::middleware::FilterOutcome::Continue))
        .unwrap();
    let t = builder.build();
    assert_eq!(t.before_filters("/one").count(), 1);
    assert_eq!(t.before_filters("/two").count(), 2);
    assert_eq!(t.before_filters("/two/x").count(), 2);
    assert_eq!(t.before_filters("/twofold").count(), 1);
}

#[test]
fn test_path_patterns_deduplicated() {
    let t = table(&[
        (RouteKind::Get, "/pets"),
        (RouteKind::Post, "/pets"),
        (RouteKind::Get, "/pets/{id}"),
    ]);
    assert_eq!(t.path_patterns(), vec!["/pets".to_string(), "/pets/{id}".to_string()]);
    assert_eq!(t.len(), 3);
}

#[test]
fn test_route_table_is_shareable() {
    let t = Arc::new(table(&[(RouteKind::Get, "/x/{id}")]));
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let t = Arc::clone(&t);
            std::thread::spawn(move || t.match_route(&Method::GET, &format!("/x/{i}")).is_some())
        })
        .collect();
    for h in handles {
        assert!(h.join().unwrap());
    }
}
