//! In-process host used for embedding, tests and benches.
//!
//! Chains are kept as an arena of segments linked by index; a chain handle is
//! the 1-based arena index of its first segment. Header writes are recorded
//! per request in the order they happen.

use super::NativeHost;
use crate::error::HostError;
use crate::handler::AsyncCompletion;
use crate::headers::KnownHeader;
use crate::native::NativeResponseWriter;
use crate::request::{
    ConnectionHandle, FieldSource, Request, RequestFactory, RequestHandle, RequestHeaders,
};
use crate::response::Response;
use crate::status::{ChainHandle, Phase};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentData {
    File(PathBuf),
    Temp(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct Segment {
    pub request: RequestHandle,
    pub data: SegmentData,
    next: Option<usize>,
}

/// One write into a request's outbound header structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderWrite {
    Status(u16),
    ContentType(Vec<u8>),
    ContentTypeLen(usize),
    Known(KnownHeader, Vec<u8>),
    Generic(Vec<u8>, Vec<u8>),
    DefaultContentType,
}

/// Recorded header structure of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadersOut {
    pub writes: Vec<HeaderWrite>,
}

impl HeadersOut {
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.writes.iter().rev().find_map(|w| match w {
            HeaderWrite::Status(s) => Some(*s),
            _ => None,
        })
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&[u8]> {
        self.writes.iter().rev().find_map(|w| match w {
            HeaderWrite::ContentType(v) => Some(v.as_slice()),
            _ => None,
        })
    }

    #[must_use]
    pub fn content_type_len(&self) -> Option<usize> {
        self.writes.iter().rev().find_map(|w| match w {
            HeaderWrite::ContentTypeLen(n) => Some(*n),
            _ => None,
        })
    }

    #[must_use]
    pub fn defaulted_content_type(&self) -> bool {
        self.writes.contains(&HeaderWrite::DefaultContentType)
    }

    /// Values written to a dedicated slot, in write order.
    #[must_use]
    pub fn known(&self, header: KnownHeader) -> Vec<&[u8]> {
        self.writes
            .iter()
            .filter_map(|w| match w {
                HeaderWrite::Known(h, v) if *h == header => Some(v.as_slice()),
                _ => None,
            })
            .collect()
    }

    /// Values appended to the generic table under `name` (case-insensitive).
    #[must_use]
    pub fn generic(&self, name: &str) -> Vec<&[u8]> {
        self.writes
            .iter()
            .filter_map(|w| match w {
                HeaderWrite::Generic(n, v) if n.eq_ignore_ascii_case(name.as_bytes()) => {
                    Some(v.as_slice())
                }
                _ => None,
            })
            .collect()
    }
}

/// A response pushed out through [`AsyncCompletion`].
#[derive(Debug)]
pub struct Completion {
    pub request: Arc<Request>,
    pub response: Response,
}

/// Request template served by [`MemoryHost`]'s [`RequestFactory`] impl.
#[derive(Debug, Clone)]
pub struct MemoryRequest {
    phase: Phase,
    method: String,
    uri: String,
    headers: RequestHeaders,
    released: bool,
    hijacked: bool,
}

impl MemoryRequest {
    #[must_use]
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            method: "GET".to_string(),
            uri: "/".to_string(),
            headers: RequestHeaders::new(),
            released: false,
            hijacked: false,
        }
    }

    #[must_use]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    #[must_use]
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn released(mut self) -> Self {
        self.released = true;
        self
    }

    #[must_use]
    pub fn hijacked(mut self) -> Self {
        self.hijacked = true;
        self
    }
}

impl Default for MemoryRequest {
    fn default() -> Self {
        Self::new(Phase::CONTENT_HANDLER)
    }
}

struct StaticFields {
    method: String,
    uri: String,
    headers: RequestHeaders,
}

impl FieldSource for StaticFields {
    fn method(&self) -> String {
        self.method.clone()
    }

    fn uri(&self) -> String {
        self.uri.clone()
    }

    fn headers(&self) -> RequestHeaders {
        self.headers.clone()
    }
}

#[derive(Default)]
struct State {
    segments: Vec<Segment>,
    headers_out: HashMap<RequestHandle, HeadersOut>,
    request_counts: HashMap<RequestHandle, usize>,
    requests: HashMap<RequestHandle, MemoryRequest>,
    /// Chain builds left before `chain_failure` is returned.
    chain_budget: Option<usize>,
    chain_failure: i64,
    reject_headers: bool,
}

/// In-process [`NativeHost`], [`RequestFactory`] and [`AsyncCompletion`].
#[derive(Default)]
pub struct MemoryHost {
    state: Mutex<State>,
    completions: Mutex<Vec<Completion>>,
    delivered: Condvar,
}

impl MemoryHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `request` for `handle` from now on.
    pub fn register(&self, handle: RequestHandle, request: MemoryRequest) {
        self.state.lock().requests.insert(handle, request);
    }

    /// After `successes` more chain builds, every build returns `raw`.
    pub fn fail_chain_after(&self, successes: usize, raw: i64) {
        let mut state = self.state.lock();
        state.chain_budget = Some(successes);
        state.chain_failure = raw;
    }

    /// Make every header table push fail with [`HostError::HeaderTableFull`].
    pub fn reject_headers(&self, reject: bool) {
        self.state.lock().reject_headers = reject;
    }

    /// Segments of the chain starting at `head`, in output order.
    #[must_use]
    pub fn chain(&self, head: ChainHandle) -> Vec<Segment> {
        let state = self.state.lock();
        let mut out = Vec::new();
        let mut cursor = index_of(head);
        while let Some(segment) = cursor.and_then(|i| state.segments.get(i)) {
            out.push(segment.clone());
            cursor = segment.next;
        }
        out
    }

    /// Concatenated bytes of the chain at `head`; file segments are read from disk.
    pub fn chain_bytes(&self, head: ChainHandle) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        for segment in self.chain(head) {
            match segment.data {
                SegmentData::Temp(data) => bytes.extend_from_slice(&data),
                SegmentData::File(path) => bytes.extend_from_slice(&std::fs::read(path)?),
            }
        }
        Ok(bytes)
    }

    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.state.lock().segments.len()
    }

    #[must_use]
    pub fn headers_out(&self, handle: RequestHandle) -> Option<HeadersOut> {
        self.state.lock().headers_out.get(&handle).cloned()
    }

    /// Times the in-flight counter was bumped for `handle`.
    #[must_use]
    pub fn request_count(&self, handle: RequestHandle) -> usize {
        self.state
            .lock()
            .request_counts
            .get(&handle)
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn total_request_count(&self) -> usize {
        self.state.lock().request_counts.values().sum()
    }

    #[must_use]
    pub fn completion_count(&self) -> usize {
        self.completions.lock().len()
    }

    /// Block until at least `count` completions arrived or `timeout` elapsed.
    pub fn wait_for_completions(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut completions = self.completions.lock();
        while completions.len() < count {
            if self.delivered.wait_until(&mut completions, deadline).timed_out() {
                return completions.len() >= count;
            }
        }
        true
    }

    /// Drain every completion received so far.
    pub fn take_completions(&self) -> Vec<Completion> {
        std::mem::take(&mut *self.completions.lock())
    }

    fn append(&self, request: &Request, prev: Option<ChainHandle>, data: SegmentData) -> i64 {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(budget) = state.chain_budget.as_mut() {
            if *budget == 0 {
                return state.chain_failure;
            }
            *budget -= 1;
        }

        state.segments.push(Segment {
            request: request.handle(),
            data,
            next: None,
        });
        let index = state.segments.len() - 1;
        if let Some(prev) = prev.and_then(index_of) {
            if let Some(segment) = state.segments.get_mut(prev) {
                segment.next = Some(index);
            }
        }
        i64::try_from(index + 1).unwrap_or(0)
    }

    fn record(&self, handle: RequestHandle, write: HeaderWrite) {
        self.state
            .lock()
            .headers_out
            .entry(handle)
            .or_default()
            .writes
            .push(write);
    }
}

fn index_of(handle: ChainHandle) -> Option<usize> {
    usize::try_from(handle.as_raw()).ok()?.checked_sub(1)
}

impl NativeHost for MemoryHost {
    fn build_file_chain(&self, request: &Request, prev: Option<ChainHandle>, path: &[u8]) -> i64 {
        let path = PathBuf::from(String::from_utf8_lossy(path).into_owned());
        self.append(request, prev, SegmentData::File(path))
    }

    fn build_temp_chain(&self, request: &Request, prev: Option<ChainHandle>, data: &[u8]) -> i64 {
        self.append(request, prev, SegmentData::Temp(data.to_vec()))
    }

    fn inc_request_count(&self, request: &Request) {
        *self
            .state
            .lock()
            .request_counts
            .entry(request.handle())
            .or_default() += 1;
    }

    fn response_writer<'a>(&'a self, request: &'a Request) -> Box<dyn NativeResponseWriter + 'a> {
        Box::new(MemoryWriter {
            host: self,
            handle: request.handle(),
        })
    }
}

impl RequestFactory for MemoryHost {
    fn make_request(&self, handle: RequestHandle, connection: ConnectionHandle) -> Request {
        let template = self
            .state
            .lock()
            .requests
            .get(&handle)
            .cloned()
            .unwrap_or_default();
        let request = Request::new(
            handle,
            connection,
            template.phase,
            Box::new(StaticFields {
                method: template.method,
                uri: template.uri,
                headers: template.headers,
            }),
        );
        if template.released {
            request.mark_released();
        }
        if template.hijacked {
            request.mark_hijacked();
        }
        request
    }
}

impl AsyncCompletion for MemoryHost {
    fn complete(&self, request: Arc<Request>, response: Response) {
        debug!(request_id = %request.id(), kind = ?response.kind(), "Completion received");
        self.completions.lock().push(Completion { request, response });
        self.delivered.notify_all();
    }
}

struct MemoryWriter<'a> {
    host: &'a MemoryHost,
    handle: RequestHandle,
}

impl MemoryWriter<'_> {
    fn check_table(&self) -> Result<(), HostError> {
        if self.host.state.lock().reject_headers {
            Err(HostError::HeaderTableFull)
        } else {
            Ok(())
        }
    }
}

impl NativeResponseWriter for MemoryWriter<'_> {
    fn write_status(&mut self, status: u16) {
        self.host.record(self.handle, HeaderWrite::Status(status));
    }

    fn write_content_type(&mut self, value: &[u8]) -> Result<usize, HostError> {
        self.host
            .record(self.handle, HeaderWrite::ContentType(value.to_vec()));
        Ok(value.len())
    }

    fn write_content_type_len(&mut self, len: usize) {
        self.host.record(self.handle, HeaderWrite::ContentTypeLen(len));
    }

    fn write_known(&mut self, header: KnownHeader, value: &[u8]) -> Result<(), HostError> {
        self.check_table()?;
        self.host
            .record(self.handle, HeaderWrite::Known(header, value.to_vec()));
        Ok(())
    }

    fn insert_header(&mut self, name: &[u8], value: &[u8]) -> Result<(), HostError> {
        self.check_table()?;
        self.host.record(
            self.handle,
            HeaderWrite::Generic(name.to_vec(), value.to_vec()),
        );
        Ok(())
    }

    fn set_default_content_type(&mut self) {
        self.host.record(self.handle, HeaderWrite::DefaultContentType);
    }
}
