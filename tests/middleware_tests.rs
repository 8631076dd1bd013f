mod common;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use brrtcore::context::{Context, Response};
use brrtcore::dispatcher::HandlerResult;
use brrtcore::errors::{DispatchError, HttpError};
use brrtcore::middleware::{FilterOutcome, MetricsMiddleware, TracingMiddleware};
use brrtcore::router::RouterBuilder;
use common::dispatch::{dispatcher, get};
use http::StatusCode;
use parking_lot::Mutex;
use tracing_util::TestTracing;

type Trail = Arc<Mutex<Vec<&'static str>>>;

fn record_before(
    trail: &Trail,
    tag: &'static str,
) -> impl Fn(&mut Context<'_>) -> Result<FilterOutcome, DispatchError> + Send + Sync + 'static {
    let trail = Arc::clone(trail);
    move |_ctx: &mut Context<'_>| {
        trail.lock().push(tag);
        Ok(FilterOutcome::Continue)
    }
}

fn record_after(
    trail: &Trail,
    tag: &'static str,
) -> impl Fn(&mut Context<'_>, &mut Response) -> Result<(), DispatchError> + Send + Sync + 'static
{
    let trail = Arc::clone(trail);
    move |_ctx: &mut Context<'_>, _res: &mut Response| {
        trail.lock().push(tag);
        Ok(())
    }
}

fn ordered_routes(trail: &Trail, b: &mut RouterBuilder) {
    let handler_trail = Arc::clone(trail);
    b.before(record_before(trail, "before-all")).unwrap();
    b.before_path("/two/*", record_before(trail, "before-two")).unwrap();
    b.get("/two/{x}", move |_ctx| {
        handler_trail.lock().push("handler");
        Ok(Response::text("two"))
    })
    .unwrap();
    b.get("/one", |_ctx| Ok(Response::text("one"))).unwrap();
    b.after_path("/two", record_after(trail, "after-two")).unwrap();
    b.after(record_after(trail, "after-all")).unwrap();
}

#[test]
fn test_filters_run_in_registration_order() {
    let trail: Trail = Arc::default();
    let t = Arc::clone(&trail);
    let d = dispatcher(move |b| ordered_routes(&t, b));

    let (outcome, ex) = get(&d, "/two/x");
    assert_eq!(outcome.status, StatusCode::OK);
    assert_eq!(ex.response_text(), "two");
    assert_eq!(
        *trail.lock(),
        ["before-all", "before-two", "handler", "after-two", "after-all"]
    );
}

#[test]
fn test_prefix_filters_skip_other_paths() {
    let trail: Trail = Arc::default();
    let t = Arc::clone(&trail);
    let d = dispatcher(move |b| ordered_routes(&t, b));

    let (outcome, _) = get(&d, "/one");
    assert_eq!(outcome.status, StatusCode::OK);
    assert_eq!(*trail.lock(), ["before-all", "after-all"]);
}

#[test]
fn test_halt_skips_handler_but_runs_after_filters() {
    let trail: Trail = Arc::default();
    let t = Arc::clone(&trail);
    let d = dispatcher(move |b| {
        b.before(|ctx: &mut Context<'_>| {
            if ctx.header("authorization").is_none() {
                return Ok(FilterOutcome::Halt(
                    Response::text("login first").with_status(StatusCode::UNAUTHORIZED),
                ));
            }
            Ok(FilterOutcome::Continue)
        })
        .unwrap();
        b.before(record_before(&t, "second-before")).unwrap();
        let handler_trail = Arc::clone(&t);
        b.get("/private", move |_ctx| {
            handler_trail.lock().push("handler");
            Ok(Response::text("secret"))
        })
        .unwrap();
        b.after(record_after(&t, "after")).unwrap();
    });

    let (outcome, ex) = get(&d, "/private");
    assert_eq!(outcome.status, StatusCode::UNAUTHORIZED);
    assert_eq!(ex.response_text(), "login first");
    assert_eq!(*trail.lock(), ["after"]);
}

#[test]
fn test_before_filter_error_goes_through_error_mapping() {
    let trail: Trail = Arc::default();
    let t = Arc::clone(&trail);
    let d = dispatcher(move |b| {
        b.before_path("/admin", |_ctx: &mut Context<'_>| Err(HttpError::forbidden().into()))
            .unwrap();
        b.get("/admin/panel", |_ctx| Ok(Response::text("panel"))).unwrap();
        b.after(record_after(&t, "after")).unwrap();
    });

    let (outcome, ex) = get(&d, "/admin/panel");
    assert_eq!(outcome.status, StatusCode::FORBIDDEN);
    assert_eq!(ex.response_text(), "Forbidden");
    assert_eq!(*trail.lock(), ["after"]);
}

#[test]
fn test_after_filter_can_rewrite_response() {
    let d = dispatcher(|b| {
        b.get("/fail", |_ctx| Err(HttpError::bad_request("nope").into()))
            .unwrap();
        b.after(|_ctx: &mut Context<'_>, res: &mut Response| {
            res.set_header("x-after", "seen");
            Ok(())
        })
        .unwrap();
    });
    let (outcome, ex) = get(&d, "/fail");
    assert_eq!(outcome.status, StatusCode::BAD_REQUEST);
    assert_eq!(ex.sent_header("x-after"), Some("seen"));
}

#[test]
fn test_after_filter_error_replaces_response() {
    let d = dispatcher(|b| {
        b.get("/ok", |_ctx| Ok(Response::text("fine"))).unwrap();
        b.after(|_ctx: &mut Context<'_>, _res: &mut Response| {
            Err(HttpError::new(StatusCode::SERVICE_UNAVAILABLE, "draining").into())
        })
        .unwrap();
    });
    let (outcome, ex) = get(&d, "/ok");
    assert_eq!(outcome.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(ex.response_text(), "draining");
}

#[test]
fn test_panicking_filter_is_contained() {
    let d = dispatcher(|b| {
        b.before(|_ctx: &mut Context<'_>| -> Result<FilterOutcome, DispatchError> {
            panic!("filter exploded")
        })
        .unwrap();
        b.get("/x", |_ctx| Ok(Response::ok())).unwrap();
    });
    let (outcome, ex) = get(&d, "/x");
    assert_eq!(outcome.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!ex.response_text().contains("exploded"));
}

#[test]
fn test_metrics_middleware_counts_routes() {
    let metrics = Arc::new(MetricsMiddleware::new());
    let m = Arc::clone(&metrics);
    let d = dispatcher(move |b| {
        b.middleware(None, Arc::clone(&m)).unwrap();
        b.get("/pets/{id}", |ctx| {
            if ctx.path_param("id")? == "0" {
                return Err(HttpError::new(StatusCode::BAD_GATEWAY, "upstream").into());
            }
            Ok(Response::ok())
        })
        .unwrap();
        b.get("/metrics", m.handler()).unwrap();
    });

    get(&d, "/pets/1");
    get(&d, "/pets/2");
    get(&d, "/pets/0");
    // misses never reach filters
    get(&d, "/nothing");

    assert_eq!(metrics.request_count(), 3);
    assert_eq!(metrics.in_flight(), 0);
    assert_eq!(metrics.status_class_count(2), 2);
    assert_eq!(metrics.status_class_count(5), 1);
    assert_eq!(metrics.route_counts("/pets/{id}"), Some((3, 1)));

    let (_, ex) = get(&d, "/metrics");
    let text = ex.response_text();
    assert!(text.contains("brrtcore_route_requests_total{path=\"/pets/{id}\"} 3"));
    assert!(text.contains("brrtcore_route_errors_total{path=\"/pets/{id}\"} 1"));
    assert!(text.contains("brrtcore_responses_total{class=\"5xx\"} 1"));
}

/// `fmt::Write` sink that refuses to grow past `cap` bytes.
struct Capped {
    buf: String,
    cap: usize,
}

impl fmt::Write for Capped {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.buf.len() + s.len() > self.cap {
            return Err(fmt::Error);
        }
        self.buf.push_str(s);
        Ok(())
    }
}

#[test]
fn test_metrics_exposition_writer() {
    let metrics = MetricsMiddleware::new();
    metrics.preregister(["/a", "/b/{id}"]);

    let mut text = String::new();
    metrics.write_prometheus(&mut text).unwrap();
    assert_eq!(text, metrics.render_prometheus());
    assert!(text.contains("brrtcore_route_requests_total{path=\"/a\"} 0"));
    assert!(text.contains("brrtcore_route_requests_total{path=\"/b/{id}\"} 0"));

    let mut capped = Capped {
        buf: String::new(),
        cap: 64,
    };
    assert!(metrics.write_prometheus(&mut capped).is_err());
    assert!(capped.buf.len() <= 64);
    assert!(text.starts_with(&capped.buf));
}

#[test]
fn test_tracing_middleware_emits_start_and_finish() {
    let tracing = TestTracing::init();
    let d = dispatcher(|b| {
        b.middleware(Some("/api"), Arc::new(TracingMiddleware::new()))
            .unwrap();
        b.get("/api/items", |_ctx| Ok(Response::text("items"))).unwrap();
    });
    let (outcome, _) = get(&d, "/api/items");

    let started = tracing.logs.events("Request started");
    let finished = tracing.logs.events("Request finished");
    assert_eq!(started.len(), 1);
    assert_eq!(finished.len(), 1);
    let id = outcome.request_id.to_string();
    assert_eq!(started[0]["fields"]["request_id"], id.as_str());
    assert_eq!(finished[0]["fields"]["request_id"], id.as_str());
    assert_eq!(finished[0]["fields"]["route"], "/api/items");
    assert_eq!(finished[0]["fields"]["status"], 200);
}

#[test]
fn test_tracing_middleware_flags_slow_requests() {
    let tracing = TestTracing::init();
    let d = dispatcher(|b| {
        b.middleware(
            None,
            Arc::new(TracingMiddleware::new().with_slow_threshold(Duration::from_millis(1))),
        )
        .unwrap();
        b.get("/slow", |_ctx: &mut Context<'_>| -> HandlerResult {
            std::thread::sleep(Duration::from_millis(20));
            Ok(Response::ok())
        })
        .unwrap();
    });
    get(&d, "/slow");
    assert_eq!(tracing.logs.events("Slow request").len(), 1);
    assert!(tracing.logs.events("Request finished").is_empty());
}
