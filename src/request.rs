//! # Request Module
//!
//! [`Request`] is this crate's view of one inbound host request. It never owns
//! the native request: it records the handles, the phase that invoked the
//! pipeline and the out-of-band flags the host flips (`released`,
//! `hijacked`), and caches request fields read through a [`FieldSource`].
//!
//! ## Field cache and threads
//!
//! Fields are loaded lazily on first access. Loading reads native memory, which
//! is only safe on the host thread, so before a request is handed to a worker
//! the dispatcher calls [`Request::prefetch_all`]; afterwards every accessor is
//! served from the snapshot.

use crate::ids::RequestId;
use crate::status::Phase;
use once_cell::sync::OnceCell;
use smallvec::SmallVec;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Opaque native request pointer. Zero is reserved for the worker-init call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct RequestHandle(pub usize);

impl RequestHandle {
    pub const NULL: RequestHandle = RequestHandle(0);

    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Opaque native connection pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct ConnectionHandle(pub usize);

/// Inline header storage for request snapshots (most requests carry ≤16).
pub type RequestHeaders = SmallVec<[(String, String); 16]>;

/// Reads request fields out of host memory.
///
/// Implementations may only be called on the host thread; the dispatcher
/// guarantees this by prefetching before any cross-thread hand-off.
pub trait FieldSource: Send + Sync {
    fn method(&self) -> String;
    fn uri(&self) -> String;
    fn headers(&self) -> RequestHeaders;
}

/// Field source of the worker-init request, which has no native request.
struct EmptyFields;

impl FieldSource for EmptyFields {
    fn method(&self) -> String {
        String::new()
    }

    fn uri(&self) -> String {
        String::new()
    }

    fn headers(&self) -> RequestHeaders {
        RequestHeaders::new()
    }
}

/// Builds [`Request`]s from raw host handles.
pub trait RequestFactory: Send + Sync {
    fn make_request(&self, request: RequestHandle, connection: ConnectionHandle) -> Request;
}

pub struct Request {
    id: RequestId,
    handle: RequestHandle,
    connection: ConnectionHandle,
    phase: Phase,
    released: AtomicBool,
    hijacked: AtomicBool,
    source: Box<dyn FieldSource>,
    method: OnceCell<String>,
    uri: OnceCell<String>,
    headers: OnceCell<RequestHeaders>,
}

impl Request {
    pub fn new(
        handle: RequestHandle,
        connection: ConnectionHandle,
        phase: Phase,
        source: Box<dyn FieldSource>,
    ) -> Self {
        Self {
            id: RequestId::new(),
            handle,
            connection,
            phase,
            released: AtomicBool::new(false),
            hijacked: AtomicBool::new(false),
            source,
            method: OnceCell::new(),
            uri: OnceCell::new(),
            headers: OnceCell::new(),
        }
    }

    /// The fake request passed to handlers by the worker-init call.
    #[must_use]
    pub fn init() -> Self {
        Self {
            id: RequestId::nil(),
            ..Self::new(
                RequestHandle::NULL,
                ConnectionHandle::default(),
                Phase::CONTENT_HANDLER,
                Box::new(EmptyFields),
            )
        }
    }

    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    #[must_use]
    pub fn handle(&self) -> RequestHandle {
        self.handle
    }

    #[must_use]
    pub fn connection(&self) -> ConnectionHandle {
        self.connection
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// True for the fake request of the worker-init call.
    #[must_use]
    pub fn is_init(&self) -> bool {
        self.handle.is_null()
    }

    /// The host has retired the native request; nothing can be delivered.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// The host handed the connection to someone else (e.g. an upgrade).
    #[must_use]
    pub fn is_hijacked(&self) -> bool {
        self.hijacked.load(Ordering::Acquire)
    }

    /// Called by the host when it retires the native request.
    pub fn mark_released(&self) {
        self.released.store(true, Ordering::Release);
    }

    /// Called by the host when the connection is taken over.
    pub fn mark_hijacked(&self) {
        self.hijacked.store(true, Ordering::Release);
    }

    pub fn method(&self) -> &str {
        self.method.get_or_init(|| self.source.method())
    }

    pub fn uri(&self) -> &str {
        self.uri.get_or_init(|| self.source.uri())
    }

    pub fn headers(&self) -> &RequestHeaders {
        self.headers.get_or_init(|| self.source.headers())
    }

    /// Case-insensitive request header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers()
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Snapshot every field so the request can be read from another thread.
    pub fn prefetch_all(&self) {
        self.method();
        self.uri();
        self.headers();
    }

    /// Whether every field is already cached.
    #[must_use]
    pub fn is_prefetched(&self) -> bool {
        self.method.get().is_some() && self.uri.get().is_some() && self.headers.get().is_some()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("phase", &self.phase)
            .field("released", &self.is_released())
            .field("hijacked", &self.is_hijacked())
            .finish_non_exhaustive()
    }
}
