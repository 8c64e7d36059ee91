#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use brrtrouter_host::host::SegmentData;
use brrtrouter_host::{
    Body, BodyMaterializer, ChainResult, Charset, ConnectionHandle, MemoryHost, NativeHost,
    Request, RequestFactory, RequestHandle, Response,
};
use common::{body_bytes, chain_head};
use std::io::{self, Cursor, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn setup(scratch: usize, charset: Charset) -> (Arc<MemoryHost>, BodyMaterializer, Request) {
    let host = common::host();
    let materializer = BodyMaterializer::new(Arc::clone(&host) as Arc<dyn NativeHost>)
        .with_scratch_size(scratch)
        .with_charset(charset);
    let request = host.make_request(RequestHandle(1), ConnectionHandle(1));
    (host, materializer, request)
}

/// Reader that yields `data` once, then `fail`s or panics, and records drop.
struct Tracked {
    data: Option<Vec<u8>>,
    panic_after: bool,
    closed: Arc<AtomicBool>,
}

impl Tracked {
    fn new(data: &[u8], panic_after: bool) -> (Self, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        let reader = Self {
            data: Some(data.to_vec()),
            panic_after,
            closed: Arc::clone(&closed),
        };
        (reader, closed)
    }
}

impl Read for Tracked {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(data) = self.data.take() {
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            return Ok(n);
        }
        if self.panic_after {
            panic!("reader exploded");
        }
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away"))
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[test]
fn test_nested_sequence_flattens_in_order() {
    let (host, materializer, request) = setup(64, Charset::Utf8);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"de").unwrap();

    let body = Body::Seq(vec![
        Some(Body::Text("a".to_string())),
        None,
        Some(Body::seq([
            Body::Text(String::new()),
            Body::stream(Cursor::new(b"bc".to_vec())),
            Body::file(file.path()),
        ])),
        Some(Body::Text("f".to_string())),
    ]);

    let result = materializer.build_output_chain(&request, Response::new(200).with_body(body));
    assert_eq!(body_bytes(&host, result), b"abcdef");

    let segments = host.chain(chain_head(result));
    assert_eq!(segments.len(), 4);
    assert_eq!(
        segments[2].data,
        SegmentData::File(file.path().to_path_buf())
    );
}

#[test]
fn test_empty_sequence_keeps_non_ok_status() {
    let (host, materializer, request) = setup(64, Charset::Utf8);
    let body = Body::seq([Body::Text(String::new()), Body::Seq(Vec::new())]);

    let result = materializer.build_output_chain(&request, Response::new(404).with_body(body));
    assert_eq!(result, ChainResult::Status(404));
    assert_eq!(host.segment_count(), 0);
}

#[test]
fn test_latin1_replaces_unmappable_characters() {
    let (host, materializer, request) = setup(64, Charset::Latin1);
    let result = materializer.build_output_chain(&request, Response::text(200, "café ☕"));
    assert_eq!(body_bytes(&host, result), b"caf\xe9 ?");
}

#[test]
fn test_long_text_is_split_at_scratch_size() {
    let (host, materializer, request) = setup(4, Charset::Utf8);
    let result = materializer.build_output_chain(&request, Response::text(200, "0123456789"));
    let head = chain_head(result);
    assert_eq!(host.chain_bytes(head).unwrap(), b"0123456789");

    let sizes: Vec<usize> = host
        .chain(head)
        .into_iter()
        .map(|s| match s.data {
            SegmentData::Temp(data) => data.len(),
            SegmentData::File(_) => 0,
        })
        .collect();
    assert_eq!(sizes, vec![4, 4, 2]);
}

#[test]
fn test_file_path_longer_than_scratch() {
    let (host, materializer, request) = setup(8, Charset::Utf8);
    let path = "/srv/static/assets/images/very-long-file-name.png";
    let result =
        materializer.build_output_chain(&request, Response::new(200).with_body(Body::file(path)));

    let segments = host.chain(chain_head(result));
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].data, SegmentData::File(path.into()));
}

#[test]
fn test_stream_read_error_is_500_and_closes_stream() {
    let (_host, materializer, request) = setup(4, Charset::Utf8);
    let (reader, closed) = Tracked::new(b"abcd", false);

    let result = materializer
        .build_output_chain(&request, Response::new(200).with_body(Body::stream(reader)));
    assert_eq!(result, ChainResult::INTERNAL_ERROR);
    assert!(closed.load(Ordering::SeqCst));
}

#[test]
fn test_panicking_stream_is_500_and_closes_stream() {
    let (_host, materializer, request) = setup(4, Charset::Utf8);
    let (reader, closed) = Tracked::new(b"abcd", true);

    let result = materializer
        .build_output_chain(&request, Response::new(200).with_body(Body::stream(reader)));
    assert_eq!(result, ChainResult::INTERNAL_ERROR);
    assert!(closed.load(Ordering::SeqCst));
}

#[test]
fn test_unsupported_body_is_500() {
    let (host, materializer, request) = setup(64, Charset::Utf8);
    let body = Body::seq([Body::Text("kept".to_string()), Body::Other(Box::new(42_u32))]);

    let result = materializer.build_output_chain(&request, Response::new(200).with_body(body));
    assert_eq!(result, ChainResult::INTERNAL_ERROR);
    // the first segment was built before the failure and stays with the host
    assert_eq!(host.segment_count(), 1);
}

#[test]
fn test_allocation_failure_mid_text_propagates() {
    let (host, materializer, request) = setup(4, Charset::Utf8);
    host.fail_chain_after(1, -507);

    let result = materializer.build_output_chain(&request, Response::text(200, "abcdefgh"));
    assert_eq!(result, ChainResult::Status(507));
    assert_eq!(host.segment_count(), 1);
}
