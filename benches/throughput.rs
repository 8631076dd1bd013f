use std::hint::black_box;

use brrtcore::context::{Context, Response};
use brrtcore::dispatcher::{Dispatcher, HandlerResult};
use brrtcore::exchange::MemoryExchange;
use brrtcore::router::{RouteKind, RouteTable, RouterBuilder};
use criterion::{criterion_group, criterion_main, Criterion};
use http::Method;

fn ok(_ctx: &mut Context<'_>) -> HandlerResult {
    Ok(Response::text("ok"))
}

/// The "verb zoo": every method, shallow and deep paths.
fn zoo() -> RouteTable {
    let routes: &[(RouteKind, &str)] = &[
        (RouteKind::Get, "/"),
        (RouteKind::Get, "/zoo/animals"),
        (RouteKind::Post, "/zoo/animals"),
        (RouteKind::Get, "/zoo/animals/{id}"),
        (RouteKind::Put, "/zoo/animals/{id}"),
        (RouteKind::Patch, "/zoo/animals/{id}"),
        (RouteKind::Delete, "/zoo/animals/{id}"),
        (RouteKind::Get, "/zoo/animals/{id}/toys/{toy_id}"),
        (
            RouteKind::Get,
            "/zoo/{category}/animals/{id}/habitats/{habitat_id}/sections/{section_id}",
        ),
        (
            RouteKind::Post,
            "/inventory/{warehouse_id}/feeds/{feed_id}/items/{item_id}/batches/{batch_id}",
        ),
        (RouteKind::Get, "/complex/{a}/{b}/{c}/{d}/{e}/{f}/{g}/{h}/{i}"),
        (RouteKind::Head, "/zoo/health"),
        (RouteKind::Options, "/zoo/health"),
        (RouteKind::Trace, "/zoo/health"),
    ];
    let mut builder = RouterBuilder::new();
    for (kind, path) in routes {
        builder.add(*kind, path, ok).expect("valid route");
    }
    builder.build()
}

fn bench_route_throughput(c: &mut Criterion) {
    let table = zoo();
    let test_paths = [
        (Method::GET, "/zoo/animals/123"),
        (Method::GET, "/zoo/animals/123/toys/456"),
        (Method::GET, "/zoo/cats/animals/123/habitats/88/sections/5"),
        (Method::POST, "/inventory/1/feeds/2/items/3/batches/4"),
        (Method::GET, "/complex/1/2/3/4/5/6/7/8/9"),
    ];
    c.bench_function("route_match", |b| {
        b.iter(|| {
            for (method, path) in &test_paths {
                black_box(table.match_route(method, path));
            }
        })
    });
}

/// Lookup cost should follow the size of the query's bucket, not the table.
fn bench_bucket_isolation(c: &mut Criterion) {
    let mut builder = RouterBuilder::new();
    builder.get("/one/{id}", ok).expect("valid route");
    for i in 0..2_000 {
        builder
            .get(&format!("/deep/{i}/a/b/c/d"), ok)
            .expect("valid route");
    }
    let table = builder.build();
    c.bench_function("route_match_isolated_bucket", |b| {
        b.iter(|| black_box(table.match_route(&Method::GET, "/one/42")))
    });
}

fn bench_dispatch(c: &mut Criterion) {
    let dispatcher = Dispatcher::new(zoo());
    c.bench_function("dispatch_memory_exchange", |b| {
        b.iter(|| {
            let mut exchange = MemoryExchange::get("/zoo/animals/123");
            black_box(dispatcher.dispatch(&mut exchange).status)
        })
    });
}

criterion_group!(
    benches,
    bench_route_throughput,
    bench_bucket_isolation,
    bench_dispatch
);
criterion_main!(benches);
