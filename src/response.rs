//! # Response Module
//!
//! [`Response`] is the abstract result a handler produces: a kind tag, an
//! optional status, ordered headers and a heterogeneous [`Body`]. It is built
//! once per pipeline execution and then only read by the marshalers.
//!
//! Handlers running in managed environments hand back loosely typed data, so
//! header names and values are nullable and bodies can nest. The marshalers
//! skip nulls rather than rejecting the response.

use crate::error::ResponseError;
use smallvec::SmallVec;
use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;

/// How the dispatcher must treat a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Ready to be marshaled and returned to the host.
    Synchronous,
    /// Placeholder: the real response arrives later through async completion.
    PendingAsync,
    /// Failure response that can still be delivered.
    Error,
    /// Failure for a request the host already released; log only.
    Fatal,
}

/// A header value as supplied by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Text(String),
    Number(i64),
    /// Multi-valued header such as `Set-Cookie`; each item becomes one entry.
    List(Vec<String>),
}

impl HeaderValue {
    /// The value when it is plain text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Every textual value this header expands to.
    #[must_use]
    pub fn values(&self) -> SmallVec<[Cow<'_, str>; 1]> {
        match self {
            HeaderValue::Text(s) => smallvec::smallvec![Cow::Borrowed(s.as_str())],
            HeaderValue::Number(n) => smallvec::smallvec![Cow::Owned(n.to_string())],
            HeaderValue::List(items) => items.iter().map(|s| Cow::Borrowed(s.as_str())).collect(),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Text(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Text(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Number(value)
    }
}

impl From<Vec<String>> for HeaderValue {
    fn from(value: Vec<String>) -> Self {
        HeaderValue::List(value)
    }
}

/// One header pair; either side may be missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderEntry {
    pub name: Option<String>,
    pub value: Option<HeaderValue>,
}

impl HeaderEntry {
    pub fn new(name: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        Self {
            name: Some(name.into()),
            value: Some(value.into()),
        }
    }
}

/// Ordered response headers (stack-allocated for ≤8 entries).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: SmallVec<[HeaderEntry; 8]>,
    read_only: bool,
}

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Headers that reject every mutation.
    pub fn read_only(entries: impl IntoIterator<Item = HeaderEntry>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
            read_only: true,
        }
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Append a pair, keeping any existing entries with the same name.
    pub fn push(
        &mut self,
        name: impl Into<String>,
        value: impl Into<HeaderValue>,
    ) -> Result<(), ResponseError> {
        self.push_entry(HeaderEntry::new(name, value))
    }

    /// Append a raw entry; used when the handler supplied null names or values.
    pub fn push_entry(&mut self, entry: HeaderEntry) -> Result<(), ResponseError> {
        if self.read_only {
            return Err(ResponseError::ReadOnlyHeaders);
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Replace every entry with this name (case-insensitive).
    pub fn set(
        &mut self,
        name: &str,
        value: impl Into<HeaderValue>,
    ) -> Result<(), ResponseError> {
        if self.read_only {
            return Err(ResponseError::ReadOnlyHeaders);
        }
        self.entries.retain(|e| {
            !e.name
                .as_deref()
                .is_some_and(|n| n.eq_ignore_ascii_case(name))
        });
        self.entries.push(HeaderEntry::new(name, value));
        Ok(())
    }

    /// First value for `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.entries
            .iter()
            .find(|e| e.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)))
            .and_then(|e| e.value.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Response body.
pub enum Body {
    Text(String),
    /// Served by the host straight from disk.
    File(PathBuf),
    /// Read to the end and copied into the chain; closed when dropped.
    Stream(Box<dyn Read + Send>),
    /// Concatenation of the non-null elements, in order.
    Seq(Vec<Option<Body>>),
    /// A value with no byte representation; materializes as a 500.
    Other(Box<dyn Any + Send>),
}

impl Body {
    pub fn stream(reader: impl Read + Send + 'static) -> Self {
        Body::Stream(Box::new(reader))
    }

    pub fn seq(items: impl IntoIterator<Item = Body>) -> Self {
        Body::Seq(items.into_iter().map(Some).collect())
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Body::File(path.into())
    }

    /// Short name of the variant, for logs.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Body::Text(_) => "text",
            Body::File(_) => "file",
            Body::Stream(_) => "stream",
            Body::Seq(_) => "seq",
            Body::Other(_) => "other",
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Text(s) => f.debug_tuple("Text").field(&s.len()).finish(),
            Body::File(p) => f.debug_tuple("File").field(p).finish(),
            Body::Stream(_) => f.write_str("Stream(..)"),
            Body::Seq(items) => f.debug_tuple("Seq").field(items).finish(),
            Body::Other(_) => f.write_str("Other(..)"),
        }
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Text(value)
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Body::Text(value.to_string())
    }
}

impl From<PathBuf> for Body {
    fn from(value: PathBuf) -> Self {
        Body::File(value)
    }
}

impl From<Vec<Body>> for Body {
    fn from(value: Vec<Body>) -> Self {
        Body::seq(value)
    }
}

/// Abstract response produced by a handler.
#[derive(Debug)]
pub struct Response {
    kind: ResponseKind,
    status: Option<u16>,
    headers: Headers,
    body: Option<Body>,
}

impl Response {
    /// Synchronous response with a status and nothing else.
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            kind: ResponseKind::Synchronous,
            status: Some(status),
            headers: Headers::new(),
            body: None,
        }
    }

    /// Synchronous response without a status; marshals with the caller's default.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            kind: ResponseKind::Synchronous,
            status: None,
            headers: Headers::new(),
            body: None,
        }
    }

    /// Marker telling the dispatcher the real response is delivered later.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            kind: ResponseKind::PendingAsync,
            ..Self::empty()
        }
    }

    /// `status` with a `text/plain` body.
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status)
            .with_header("Content-Type", "text/plain")
            .with_body(Body::Text(body.into()))
    }

    pub(crate) fn from_parts(
        kind: ResponseKind,
        status: Option<u16>,
        headers: Headers,
        body: Option<Body>,
    ) -> Self {
        Self {
            kind,
            status,
            headers,
            body,
        }
    }

    /// Builder-style header append. Read-only headers are left untouched.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        let _ignored: Result<(), ResponseError> = self.headers.push(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: ResponseKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn kind(&self) -> ResponseKind {
        self.kind
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.kind == ResponseKind::PendingAsync
    }

    /// The status, or `default` when the handler did not set one.
    #[must_use]
    pub fn fetch_status(&self, default: u16) -> u16 {
        self.status.unwrap_or(default)
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    #[must_use]
    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }
}
