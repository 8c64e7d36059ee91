//! # Body Materializer
//!
//! Converts a response [`Body`] into a host output chain.
//!
//! Every body variant is appended to one [`ChainBuilder`], which always
//! links new segments after the current tail, so the chain's byte order is
//! the body's traversal order no matter how deeply sequences nest.
//!
//! ## Result encoding
//!
//! [`BodyMaterializer::build_output_chain`] returns a [`ChainResult`]:
//!
//! | Outcome                     | Result                                  |
//! |-----------------------------|-----------------------------------------|
//! | segments appended           | `Chain(head)`                           |
//! | absent body, `""`, `[]`     | `Status(204)` for a 200, else `Status(status)` |
//! | read/encode failure, panic  | `Status(500)`                           |
//! | host primitive failure      | the host's status, `500` for `0`         |
//!
//! Segments already built before a failure stay in the host's pool; the
//! host discards them together with the request.

use crate::charset::{Charset, CoderResult};
use crate::fallback::panic_message;
use crate::host::NativeHost;
use crate::request::Request;
use crate::response::{Body, Response};
use crate::scratch::{with_scratch, DEFAULT_SCRATCH_SIZE};
use crate::status::{ChainHandle, ChainResult};
use http::StatusCode;
use std::io::{self, Read};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Materialized {
    Appended,
    NoContent,
}

/// Short-circuit status that aborts materialization.
type Abort = ChainResult;

/// Head/tail cursor over a chain under construction.
struct ChainBuilder<'a> {
    host: &'a dyn NativeHost,
    request: &'a Request,
    head: Option<ChainHandle>,
    tail: Option<ChainHandle>,
    segments: usize,
}

impl<'a> ChainBuilder<'a> {
    fn new(host: &'a dyn NativeHost, request: &'a Request) -> Self {
        Self {
            host,
            request,
            head: None,
            tail: None,
            segments: 0,
        }
    }

    fn push_file(&mut self, path: &[u8]) -> Result<(), Abort> {
        let raw = self.host.build_file_chain(self.request, self.tail, path);
        self.link(raw)
    }

    fn push_temp(&mut self, data: &[u8]) -> Result<(), Abort> {
        let raw = self.host.build_temp_chain(self.request, self.tail, data);
        self.link(raw)
    }

    fn link(&mut self, raw: i64) -> Result<(), Abort> {
        match ChainResult::from_raw(raw) {
            ChainResult::Chain(handle) => {
                self.head.get_or_insert(handle);
                self.tail = Some(handle);
                self.segments += 1;
                Ok(())
            }
            ChainResult::Absent => {
                error!(
                    request_id = %self.request.id(),
                    segments = self.segments,
                    "Chain primitive returned no chain"
                );
                Err(ChainResult::INTERNAL_ERROR)
            }
            status => {
                warn!(
                    request_id = %self.request.id(),
                    result = %status,
                    "Chain primitive failed"
                );
                Err(status)
            }
        }
    }
}

/// Read until `buf` is full or the reader is exhausted.
fn fill(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Builds output chains through a [`NativeHost`].
#[derive(Clone)]
pub struct BodyMaterializer {
    host: Arc<dyn NativeHost>,
    scratch_size: usize,
    charset: Charset,
}

impl BodyMaterializer {
    pub fn new(host: Arc<dyn NativeHost>) -> Self {
        Self {
            host,
            scratch_size: DEFAULT_SCRATCH_SIZE,
            charset: Charset::default(),
        }
    }

    /// Scratch buffer size; also the maximum size of a text or stream segment.
    #[must_use]
    pub fn with_scratch_size(mut self, size: usize) -> Self {
        self.scratch_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    #[must_use]
    pub fn charset(&self) -> Charset {
        self.charset
    }

    #[must_use]
    pub fn scratch_size(&self) -> usize {
        self.scratch_size
    }

    /// Materialize `response`'s body into a chain for `request`.
    pub fn build_output_chain(&self, request: &Request, mut response: Response) -> ChainResult {
        let status = response.fetch_status(StatusCode::OK.as_u16());
        let body = response.take_body();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut chain = ChainBuilder::new(self.host.as_ref(), request);
            let result = match body {
                None => Ok(Materialized::NoContent),
                Some(body) => self.materialize(&mut chain, body),
            };
            (result, chain.head, chain.segments)
        }));

        match outcome {
            Ok((Ok(Materialized::Appended), Some(head), segments)) => {
                debug!(
                    request_id = %request.id(),
                    status = status,
                    segments = segments,
                    "Output chain built"
                );
                ChainResult::Chain(head)
            }
            Ok((Ok(Materialized::Appended), None, _)) => ChainResult::INTERNAL_ERROR,
            Ok((Ok(Materialized::NoContent), _, _)) => {
                let status = if status == StatusCode::OK.as_u16() {
                    StatusCode::NO_CONTENT.as_u16()
                } else {
                    status
                };
                ChainResult::Status(status)
            }
            Ok((Err(abort), _, _)) => abort,
            Err(panic) => {
                error!(
                    request_id = %request.id(),
                    panic_message = %panic_message(panic.as_ref()),
                    "Body materialization panicked"
                );
                ChainResult::INTERNAL_ERROR
            }
        }
    }

    fn materialize(&self, chain: &mut ChainBuilder<'_>, body: Body) -> Result<Materialized, Abort> {
        match body {
            Body::Text(text) => self.text(chain, &text),
            Body::File(path) => self.file(chain, &path),
            Body::Stream(reader) => self.stream(chain, reader),
            Body::Seq(items) => {
                let mut appended = false;
                for item in items.into_iter().flatten() {
                    match self.materialize(chain, item) {
                        Ok(Materialized::Appended) => appended = true,
                        Ok(Materialized::NoContent) => {}
                        Err(abort) if abort.is_no_content() => {}
                        Err(abort) => return Err(abort),
                    }
                }
                Ok(if appended {
                    Materialized::Appended
                } else {
                    Materialized::NoContent
                })
            }
            other @ Body::Other(_) => {
                error!(
                    request_id = %chain.request.id(),
                    kind = other.kind_name(),
                    "Unsupported body type"
                );
                Err(ChainResult::INTERNAL_ERROR)
            }
        }
    }

    fn text(&self, chain: &mut ChainBuilder<'_>, text: &str) -> Result<Materialized, Abort> {
        if text.is_empty() {
            return Ok(Materialized::NoContent);
        }
        with_scratch(self.scratch_size, |buf| {
            let mut encoder = self.charset.encoder(text);
            loop {
                let (written, result) = encoder.encode(buf);
                match result {
                    CoderResult::Overflow => chain.push_temp(&buf[..written])?,
                    CoderResult::Underflow => {
                        if written > 0 {
                            chain.push_temp(&buf[..written])?;
                        }
                        return Ok(Materialized::Appended);
                    }
                    CoderResult::Error => {
                        error!(
                            request_id = %chain.request.id(),
                            charset = %self.charset,
                            scratch_size = buf.len(),
                            "Text encoding failed"
                        );
                        return Err(ChainResult::INTERNAL_ERROR);
                    }
                }
            }
        })
    }

    fn file(&self, chain: &mut ChainBuilder<'_>, path: &Path) -> Result<Materialized, Abort> {
        let text = path.to_string_lossy();
        with_scratch(self.scratch_size, |buf| {
            let (written, result) = self.charset.encoder(&text).encode(buf);
            if result == CoderResult::Underflow && written < buf.len() {
                buf[written] = 0;
                chain.push_file(&buf[..written])?;
            } else {
                // no room for the terminator in scratch
                let mut owned = self.charset.encode_to_vec(&text);
                let len = owned.len();
                owned.push(0);
                chain.push_file(&owned[..len])?;
            }
            Ok(Materialized::Appended)
        })
    }

    fn stream(
        &self,
        chain: &mut ChainBuilder<'_>,
        mut reader: Box<dyn Read + Send>,
    ) -> Result<Materialized, Abort> {
        let result = with_scratch(self.scratch_size, |buf| {
            let mut materialized = Materialized::NoContent;
            loop {
                let filled = fill(reader.as_mut(), buf).map_err(|e| {
                    error!(
                        request_id = %chain.request.id(),
                        error = %e,
                        "Body stream read failed"
                    );
                    ChainResult::INTERNAL_ERROR
                })?;
                if filled == 0 {
                    break;
                }
                chain.push_temp(&buf[..filled])?;
                materialized = Materialized::Appended;
                if filled < buf.len() {
                    break;
                }
            }
            Ok(materialized)
        });
        // closes the stream
        drop(reader);
        result
    }
}
