//! # Host Interface
//!
//! Everything the pipeline needs from the native host server, expressed as
//! one trait so the dispatcher can be driven by the real host through FFI or
//! by [`MemoryHost`] in process.
//!
//! Chain primitives return the raw tri-state value the host produces
//! (positive handle, `0`, or `-status`); callers decode it with
//! [`ChainResult::from_raw`](crate::status::ChainResult::from_raw).

mod memory;

pub use memory::{
    Completion, HeaderWrite, HeadersOut, MemoryHost, MemoryRequest, Segment, SegmentData,
};

use crate::native::NativeResponseWriter;
use crate::request::Request;
use crate::status::ChainHandle;

/// Native primitives of the host server.
///
/// All methods are called on the host thread except `inc_request_count`,
/// which the dispatcher also calls before handing a request to a worker.
pub trait NativeHost: Send + Sync {
    /// Append one file segment after `prev` (or start a chain).
    ///
    /// `path` excludes the terminator, but the byte directly after it in
    /// memory is always NUL.
    fn build_file_chain(&self, request: &Request, prev: Option<ChainHandle>, path: &[u8]) -> i64;

    /// Append one in-memory segment holding a copy of `data` after `prev`.
    fn build_temp_chain(&self, request: &Request, prev: Option<ChainHandle>, data: &[u8]) -> i64;

    /// Bump the host's in-flight counter so it keeps the request alive.
    fn inc_request_count(&self, request: &Request);

    /// Writer for the request's outbound header structure.
    fn response_writer<'a>(&'a self, request: &'a Request) -> Box<dyn NativeResponseWriter + 'a>;
}
