mod common;

use std::io::{Read, Write};

use brrtcore::config::{CompressionConfig, DispatchConfig};
use brrtcore::context::Response;
use brrtcore::dispatcher::Dispatcher;
use brrtcore::exchange::MemoryExchange;
use brrtcore::router::RouterBuilder;
use common::dispatch::run;
use flate2::read::{DeflateDecoder, GzDecoder};
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;

fn big_text() -> String {
    "the quick brown fox jumps over the lazy dog\n".repeat(100)
}

fn compression_dispatcher(config: DispatchConfig) -> Dispatcher {
    let mut b = RouterBuilder::new();
    b.get("/big", |_ctx| Ok(Response::text(big_text()))).unwrap();
    b.get("/small", |_ctx| Ok(Response::text("tiny"))).unwrap();
    b.get("/png", |_ctx| {
        Ok(Response::bytes(vec![0u8; 4096])
            .with_header(CONTENT_TYPE, HeaderValue::from_static("image/png")))
    })
    .unwrap();
    b.get("/svg", |_ctx| {
        Ok(Response::text(format!("<svg>{}</svg>", "<g/>".repeat(1000)))
            .with_header(CONTENT_TYPE, HeaderValue::from_static("image/svg+xml")))
    })
    .unwrap();
    b.get("/pre-encoded", |_ctx| {
        Ok(Response::bytes(vec![b'z'; 4096]).header("content-encoding", "br"))
    })
    .unwrap();
    b.get("/stream", |ctx| {
        ctx.set_header(CONTENT_TYPE, HeaderValue::from_static("text/csv"))?;
        let mut out = ctx.output_stream()?;
        for i in 0..500 {
            writeln!(out, "{i},row,{}", "x".repeat(20))?;
        }
        out.finish()?;
        Ok(Response::streamed())
    })
    .unwrap();
    Dispatcher::new(b.build()).with_config(config)
}

fn fetch(d: &Dispatcher, path: &str, accept_encoding: Option<&str>) -> MemoryExchange {
    let mut ex = MemoryExchange::get(path);
    if let Some(ae) = accept_encoding {
        ex = ex.with_header("accept-encoding", ae);
    }
    let (outcome, ex) = run(d, ex);
    assert_eq!(outcome.status, StatusCode::OK);
    ex
}

fn gunzip(bytes: &[u8]) -> String {
    let mut out = String::new();
    GzDecoder::new(bytes).read_to_string(&mut out).unwrap();
    out
}

#[test]
fn test_large_body_is_gzipped() {
    let d = compression_dispatcher(DispatchConfig::default());
    let ex = fetch(&d, "/big", Some("gzip, deflate"));
    assert_eq!(ex.sent_header("content-encoding"), Some("gzip"));
    assert_eq!(ex.sent_header("vary"), Some("Accept-Encoding"));
    let body = ex.response_body();
    assert_eq!(
        ex.sent_header("content-length"),
        Some(body.len().to_string().as_str())
    );
    assert!(body.len() < big_text().len());
    assert_eq!(gunzip(&body), big_text());
}

#[test]
fn test_deflate_when_listed_first() {
    let d = compression_dispatcher(DispatchConfig::default());
    let ex = fetch(&d, "/big", Some("deflate, gzip"));
    assert_eq!(ex.sent_header("content-encoding"), Some("deflate"));
    let mut out = String::new();
    DeflateDecoder::new(ex.response_body().as_slice())
        .read_to_string(&mut out)
        .unwrap();
    assert_eq!(out, big_text());
}

#[test]
fn test_small_body_passes_through_with_vary() {
    let d = compression_dispatcher(DispatchConfig::default());
    let ex = fetch(&d, "/small", Some("gzip"));
    assert_eq!(ex.sent_header("content-encoding"), None);
    assert_eq!(ex.sent_header("vary"), Some("Accept-Encoding"));
    assert_eq!(ex.response_text(), "tiny");
}

#[test]
fn test_no_accept_encoding_means_identity() {
    let d = compression_dispatcher(DispatchConfig::default());
    let ex = fetch(&d, "/big", None);
    assert_eq!(ex.sent_header("content-encoding"), None);
    assert_eq!(ex.sent_header("vary"), Some("Accept-Encoding"));
    assert_eq!(ex.response_text(), big_text());

    let ex = fetch(&d, "/big", Some("br, identity"));
    assert_eq!(ex.sent_header("content-encoding"), None);
}

#[test]
fn test_images_are_not_compressed() {
    let d = compression_dispatcher(DispatchConfig::default());
    let ex = fetch(&d, "/png", Some("gzip"));
    assert_eq!(ex.sent_header("content-encoding"), None);
    assert_eq!(ex.sent_header("vary"), None);
    assert_eq!(ex.response_body().len(), 4096);
}

#[test]
fn test_svg_is_compressed() {
    let d = compression_dispatcher(DispatchConfig::default());
    let ex = fetch(&d, "/svg", Some("gzip"));
    assert_eq!(ex.sent_header("content-encoding"), Some("gzip"));
    assert!(gunzip(&ex.response_body()).starts_with("<svg><g/>"));
}

#[test]
fn test_existing_content_encoding_is_respected() {
    let d = compression_dispatcher(DispatchConfig::default());
    let ex = fetch(&d, "/pre-encoded", Some("gzip"));
    assert_eq!(ex.sent_header("content-encoding"), Some("br"));
    assert_eq!(ex.response_body().len(), 4096);
}

#[test]
fn test_disabled_compression() {
    let config = DispatchConfig {
        compression: CompressionConfig {
            enabled: false,
            ..CompressionConfig::default()
        },
        ..DispatchConfig::default()
    };
    let d = compression_dispatcher(config);
    let ex = fetch(&d, "/big", Some("gzip"));
    assert_eq!(ex.sent_header("content-encoding"), None);
    assert_eq!(ex.sent_header("vary"), None);
}

#[test]
fn test_streamed_output_is_compressed_without_length() {
    let config = DispatchConfig {
        compression: CompressionConfig {
            min_size: 0,
            ..CompressionConfig::default()
        },
        ..DispatchConfig::default()
    };
    let d = compression_dispatcher(config);
    let ex = fetch(&d, "/stream", Some("gzip"));
    assert_eq!(ex.sent_header("content-encoding"), Some("gzip"));
    assert_eq!(ex.sent_header("content-length"), None);
    assert!(ex.sent_header("x-request-id").is_some());
    let text = gunzip(&ex.response_body());
    assert_eq!(text.lines().count(), 500);
    assert!(text.starts_with("0,row,"));
    assert!(text.trim_end().ends_with(&format!("499,row,{}", "x".repeat(20))));
}

#[test]
fn test_streamed_output_small_first_write_stays_plain() {
    let d = compression_dispatcher(DispatchConfig::default());
    let ex = fetch(&d, "/stream", Some("gzip"));
    // first write is one short row, below the threshold
    assert_eq!(ex.sent_header("content-encoding"), None);
    assert_eq!(ex.response_text().lines().count(), 500);
}
