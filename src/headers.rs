//! # Header Marshaler
//!
//! Writes a response's status and headers into the host's native response
//! structure through a [`NativeResponseWriter`].
//!
//! Every header name is resolved once against a static table to a
//! [`HeaderWriter`]: headers the host keeps in a dedicated slot
//! (`Location`, `Last-Modified`, ...) go through [`HeaderWriter::Known`];
//! everything else is appended to the generic header table. Content type is
//! handled separately because the host needs both the string and its length.
//!
//! ## Ordering
//!
//! Headers are written in response order, then the content type, then the
//! status. A malformed pair is skipped and logged; the remaining pairs are
//! still written.

use crate::charset::Charset;
use crate::native::NativeResponseWriter;
use crate::response::{HeaderValue, Headers};
use http::StatusCode;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Headers with a dedicated slot in the host's response structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownHeader {
    Server,
    Date,
    ContentLength,
    ContentEncoding,
    ContentType,
    Location,
    Refresh,
    LastModified,
    ContentRange,
    AcceptRanges,
    WwwAuthenticate,
    Expires,
    ETag,
    CacheControl,
    Link,
}

impl KnownHeader {
    pub const ALL: [KnownHeader; 15] = [
        KnownHeader::Server,
        KnownHeader::Date,
        KnownHeader::ContentLength,
        KnownHeader::ContentEncoding,
        KnownHeader::ContentType,
        KnownHeader::Location,
        KnownHeader::Refresh,
        KnownHeader::LastModified,
        KnownHeader::ContentRange,
        KnownHeader::AcceptRanges,
        KnownHeader::WwwAuthenticate,
        KnownHeader::Expires,
        KnownHeader::ETag,
        KnownHeader::CacheControl,
        KnownHeader::Link,
    ];

    /// Canonical wire name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            KnownHeader::Server => "Server",
            KnownHeader::Date => "Date",
            KnownHeader::ContentLength => "Content-Length",
            KnownHeader::ContentEncoding => "Content-Encoding",
            KnownHeader::ContentType => "Content-Type",
            KnownHeader::Location => "Location",
            KnownHeader::Refresh => "Refresh",
            KnownHeader::LastModified => "Last-Modified",
            KnownHeader::ContentRange => "Content-Range",
            KnownHeader::AcceptRanges => "Accept-Ranges",
            KnownHeader::WwwAuthenticate => "WWW-Authenticate",
            KnownHeader::Expires => "Expires",
            KnownHeader::ETag => "ETag",
            KnownHeader::CacheControl => "Cache-Control",
            KnownHeader::Link => "Link",
        }
    }
}

/// Lower-cased name → slot. Built on first use, read-only afterwards.
static KNOWN_HEADERS: Lazy<HashMap<String, KnownHeader>> = Lazy::new(|| {
    KnownHeader::ALL
        .iter()
        .map(|h| (h.name().to_ascii_lowercase(), *h))
        .collect()
});

/// Strategy for writing one header into the host structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderWriter {
    /// Dedicated slot.
    Known(KnownHeader),
    /// Generic named entry in the header table.
    Generic,
}

impl HeaderWriter {
    /// Resolve a header name (case-insensitive); unknown names are generic.
    pub fn resolve(name: &str) -> HeaderWriter {
        KNOWN_HEADERS
            .get(&name.to_ascii_lowercase())
            .map_or(HeaderWriter::Generic, |h| HeaderWriter::Known(*h))
    }

    fn write(
        self,
        writer: &mut dyn NativeResponseWriter,
        name: &str,
        values: &[Vec<u8>],
    ) -> Result<(), crate::error::HostError> {
        match self {
            // written once, after every pair has been seen
            HeaderWriter::Known(KnownHeader::ContentType) => Ok(()),
            HeaderWriter::Known(header) => {
                for value in values {
                    writer.write_known(header, value)?;
                }
                Ok(())
            }
            HeaderWriter::Generic => {
                for value in values {
                    writer.insert_header(name.as_bytes(), value)?;
                }
                Ok(())
            }
        }
    }
}

/// What [`prepare_headers`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSummary {
    /// Pairs written to the host.
    pub written: usize,
    /// Pairs skipped as null, malformed or rejected by the host.
    pub skipped: usize,
    /// The handler supplied a textual content type.
    pub explicit_content_type: bool,
}

/// Encode and validate every value of one header, or `None` if any is unusable.
fn encode_values(value: &HeaderValue, charset: Charset) -> Option<Vec<Vec<u8>>> {
    let values = value.values();
    if values.is_empty() {
        return None;
    }
    let mut encoded = Vec::with_capacity(values.len());
    for v in &values {
        let bytes = charset.encode_to_vec(v);
        http::HeaderValue::from_bytes(&bytes).ok()?;
        encoded.push(bytes);
    }
    Some(encoded)
}

/// Write `status` and `headers` into the host's response structure.
pub fn prepare_headers(
    writer: &mut dyn NativeResponseWriter,
    status: u16,
    headers: &Headers,
    charset: Charset,
) -> HeaderSummary {
    let mut summary = HeaderSummary::default();
    // encoded bytes of the last valid textual Content-Type
    let mut content_type: Option<Vec<u8>> = None;

    for entry in headers.iter() {
        let (Some(raw_name), Some(value)) = (entry.name.as_deref(), entry.value.as_ref()) else {
            summary.skipped += 1;
            continue;
        };

        let name = raw_name.trim();
        if name.is_empty() || http::HeaderName::from_bytes(name.as_bytes()).is_err() {
            warn!(header = %raw_name, "Skipping header with invalid name");
            summary.skipped += 1;
            continue;
        }

        let header_writer = HeaderWriter::resolve(name);
        let is_content_type = header_writer == HeaderWriter::Known(KnownHeader::ContentType);
        if is_content_type && value.as_text().is_none() {
            warn!(value = ?value, "Skipping non-text Content-Type");
            summary.skipped += 1;
            continue;
        }

        let Some(mut values) = encode_values(value, charset) else {
            warn!(header = %name, "Skipping header with malformed value");
            summary.skipped += 1;
            continue;
        };

        if is_content_type {
            content_type = values.pop();
            summary.written += 1;
            continue;
        }

        match header_writer.write(writer, name, &values) {
            Ok(()) => summary.written += 1,
            Err(e) => {
                warn!(header = %name, error = %e, "Host rejected header");
                summary.skipped += 1;
            }
        }
    }

    if content_type.is_none() && status != StatusCode::SWITCHING_PROTOCOLS.as_u16() {
        writer.set_default_content_type();
    } else {
        summary.explicit_content_type = content_type.is_some();
        let encoded = content_type.unwrap_or_default();
        // the length slot is written even when zero; gzip and friends read it
        let len = match writer.write_content_type(&encoded) {
            Ok(len) => len,
            Err(e) => {
                warn!(error = %e, "Failed to write content type");
                0
            }
        };
        writer.write_content_type_len(len);
    }

    writer.write_status(status);

    debug!(
        status = status,
        written = summary.written,
        skipped = summary.skipped,
        "Response headers prepared"
    );
    summary
}
