mod common;

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use brrtcore::config::{DispatchConfig, RangeConfig};
use brrtcore::dispatcher::Dispatcher;
use brrtcore::exchange::{Exchange, MemoryExchange};
use brrtcore::router::RouterBuilder;
use common::dispatch::run;
use http::{Method, StatusCode};
use tempfile::NamedTempFile;

/// 100 bytes: "0123456789" ten times.
fn fixture() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all("0123456789".repeat(10).as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn file_dispatcher(path: PathBuf, chunk_size: usize) -> Dispatcher {
    let mut b = RouterBuilder::new();
    let serve = move |ctx: &mut brrtcore::Context<'_>| -> brrtcore::HandlerResult {
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        ctx.serve_range(file, len, "text/plain")
    };
    b.get("/file", serve.clone()).unwrap();
    b.head("/file", serve).unwrap();
    Dispatcher::new(b.build()).with_config(DispatchConfig {
        range: RangeConfig { chunk_size },
        ..DispatchConfig::default()
    })
}

fn request(d: &Dispatcher, range: Option<&str>) -> (brrtcore::DispatchOutcome, MemoryExchange) {
    let mut ex = MemoryExchange::get("/file");
    if let Some(range) = range {
        ex = ex.with_header("range", range);
    }
    run(d, ex)
}

#[test]
fn test_full_response_advertises_ranges() {
    let file = fixture();
    let d = file_dispatcher(file.path().to_path_buf(), 16);
    let (outcome, ex) = request(&d, None);
    assert_eq!(outcome.status, StatusCode::OK);
    assert_eq!(ex.sent_header("accept-ranges"), Some("bytes"));
    assert_eq!(ex.sent_header("content-length"), Some("100"));
    assert_eq!(ex.sent_header("content-range"), None);
    assert_eq!(ex.response_text(), "0123456789".repeat(10));
}

#[test]
fn test_open_ended_range() {
    let file = fixture();
    let d = file_dispatcher(file.path().to_path_buf(), 16);
    let (outcome, ex) = request(&d, Some("bytes=95-"));
    assert_eq!(outcome.status, StatusCode::PARTIAL_CONTENT);
    assert!(!outcome.truncated);
    assert_eq!(ex.sent_header("content-range"), Some("bytes 95-99/100"));
    assert_eq!(ex.sent_header("content-length"), Some("5"));
    assert_eq!(ex.response_text(), "56789");
}

#[test]
fn test_bounded_range_spanning_chunks() {
    let file = fixture();
    let d = file_dispatcher(file.path().to_path_buf(), 7);
    let (outcome, ex) = request(&d, Some("bytes=3-42"));
    assert_eq!(outcome.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(ex.sent_header("content-range"), Some("bytes 3-42/100"));
    let expected: String = "0123456789".repeat(10)[3..=42].to_string();
    assert_eq!(ex.response_text(), expected);
}

#[test]
fn test_suffix_range() {
    let file = fixture();
    let d = file_dispatcher(file.path().to_path_buf(), 16);
    let (outcome, ex) = request(&d, Some("bytes=-3"));
    assert_eq!(outcome.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(ex.sent_header("content-range"), Some("bytes 97-99/100"));
    assert_eq!(ex.response_text(), "789");
}

#[test]
fn test_end_past_source_is_clamped() {
    let file = fixture();
    let d = file_dispatcher(file.path().to_path_buf(), 16);
    let (_, ex) = request(&d, Some("bytes=90-5000"));
    assert_eq!(ex.sent_header("content-range"), Some("bytes 90-99/100"));
    assert_eq!(ex.response_text(), "0123456789");
}

#[test]
fn test_multi_range_serves_first() {
    let file = fixture();
    let d = file_dispatcher(file.path().to_path_buf(), 16);
    let (outcome, ex) = request(&d, Some("bytes=0-1, 50-60"));
    assert_eq!(outcome.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(ex.sent_header("content-range"), Some("bytes 0-1/100"));
    assert_eq!(ex.response_text(), "01");
}

#[test]
fn test_unsatisfiable_range() {
    let file = fixture();
    let d = file_dispatcher(file.path().to_path_buf(), 16);
    let (outcome, ex) = request(&d, Some("bytes=100-"));
    assert_eq!(outcome.status, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(ex.sent_header("content-range"), Some("bytes */100"));
    assert_eq!(ex.sent_header("content-length"), Some("0"));
}

#[test]
fn test_malformed_range_is_ignored() {
    let file = fixture();
    let d = file_dispatcher(file.path().to_path_buf(), 16);
    for header in ["items=0-5", "bytes=abc", "bytes=9-3"] {
        let (outcome, ex) = request(&d, Some(header));
        assert_eq!(outcome.status, StatusCode::OK, "{header}");
        assert_eq!(ex.response_body().len(), 100);
    }
}

#[test]
fn test_head_sends_headers_only() {
    let file = fixture();
    let d = file_dispatcher(file.path().to_path_buf(), 16);
    let (outcome, ex) = run(
        &d,
        MemoryExchange::new(Method::HEAD, "/file").with_header("range", "bytes=10-19"),
    );
    assert_eq!(outcome.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(ex.sent_header("content-length"), Some("10"));
    assert!(ex.response_body().is_empty());
}

#[test]
fn test_client_disconnect_truncates_and_closes() {
    let file = fixture();
    let d = file_dispatcher(file.path().to_path_buf(), 8);
    let (outcome, ex) = run(&d, MemoryExchange::get("/file").fail_writes_after(20));
    assert_eq!(outcome.status, StatusCode::OK);
    assert!(outcome.truncated);
    assert!(ex.is_closed());
    assert!(ex.response_body().len() <= 20);
}

#[test]
fn test_missing_file_is_500() {
    let d = file_dispatcher(PathBuf::from("/definitely/not/here.bin"), 16);
    let (outcome, ex) = request(&d, None);
    assert_eq!(outcome.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(ex.sent_header("accept-ranges"), None);
}
