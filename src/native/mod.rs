//! # Native Response Structures
//!
//! Typed access to the host-owned response header structure. The header
//! marshaler only talks to [`NativeResponseWriter`]; how the bytes land in
//! host memory is up to the implementation:
//!
//! - [`RawResponseWriter`] writes straight into the host's `headers_out`
//!   struct through a validated [`HeadersOutLayout`] offset table.
//! - [`MemoryHost`](crate::host::MemoryHost) records the writes in process.

mod layout;
mod writer;

pub use layout::{HeadersOutLayout, HeadersOutOffsets, NgxStr};
pub use writer::{HeaderTableOps, NativePool, RawResponseWriter};

use crate::error::HostError;
use crate::headers::KnownHeader;

/// Writes status and headers into the host's response structure.
///
/// Values are already encoded with the transport charset.
pub trait NativeResponseWriter {
    /// Store the numeric status in the status slot.
    fn write_status(&mut self, status: u16);

    /// Store the content type string, returning the number of bytes written.
    fn write_content_type(&mut self, value: &[u8]) -> Result<usize, HostError>;

    /// Store the content type length slot.
    fn write_content_type_len(&mut self, len: usize);

    /// Write a header that owns a dedicated slot in the host structure.
    fn write_known(&mut self, header: KnownHeader, value: &[u8]) -> Result<(), HostError>;

    /// Append a generic `name: value` entry to the host header table.
    fn insert_header(&mut self, name: &[u8], value: &[u8]) -> Result<(), HostError>;

    /// Let the host pick the content type (from its MIME configuration).
    fn set_default_content_type(&mut self);
}
