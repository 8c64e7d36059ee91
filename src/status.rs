//! # Status Codes and Result Encoding
//!
//! Everything that crosses the boundary back into the host is a single signed
//! integer. This module names the values that integer can take and provides
//! [`ChainResult`], the typed view of the tri-state encoding used by every
//! chain-building operation:
//!
//! | raw value | meaning                                         |
//! |-----------|-------------------------------------------------|
//! | `> 0`     | a native chain handle (the head of the body)    |
//! | `0`       | nothing was produced                            |
//! | `< 0`     | `-status`: short-circuit with this status code  |
//!
//! The negated [`StatusCode::NO_CONTENT`] is special: it is the only negative
//! value that multi-part body builders absorb instead of propagating.

use http::StatusCode;
use std::fmt;
use std::num::NonZeroI64;

/// Host sentinel telling the event loop the real response arrives later
/// through the async completion path (`NGX_DONE`).
pub const DEFERRED: i64 = -4;

/// Handle to one link of a native output chain.
///
/// Always strictly positive; the host owns the memory it refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChainHandle(NonZeroI64);

impl ChainHandle {
    /// Wrap a raw handle; returns `None` for zero or negative values.
    #[must_use]
    pub fn from_raw(raw: i64) -> Option<Self> {
        if raw > 0 {
            NonZeroI64::new(raw).map(ChainHandle)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_raw(self) -> i64 {
        self.0.get()
    }
}

/// Typed view of the tri-state chain encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainResult {
    /// A chain was produced; for the top-level result this is the head.
    Chain(ChainHandle),
    /// Nothing was produced.
    Absent,
    /// Short-circuit with this status, no chain built.
    Status(u16),
}

impl ChainResult {
    /// Short-circuit meaning "nothing to send".
    pub const NO_CONTENT: ChainResult = ChainResult::Status(204);

    /// Hard failure short-circuit.
    pub const INTERNAL_ERROR: ChainResult = ChainResult::Status(500);

    /// Decode a raw value returned by a host primitive.
    ///
    /// Negative values outside the `u16` range collapse to
    /// [`ChainResult::INTERNAL_ERROR`].
    #[must_use]
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            0 => ChainResult::Absent,
            r if r > 0 => ChainHandle::from_raw(r).map_or(ChainResult::Absent, ChainResult::Chain),
            r => u16::try_from(r.unsigned_abs())
                .map(ChainResult::Status)
                .unwrap_or(ChainResult::INTERNAL_ERROR),
        }
    }

    /// Encode for the host.
    #[must_use]
    pub fn into_raw(self) -> i64 {
        match self {
            ChainResult::Chain(handle) => handle.as_raw(),
            ChainResult::Absent => 0,
            ChainResult::Status(status) => -i64::from(status),
        }
    }

    #[must_use]
    pub fn status(status: StatusCode) -> Self {
        ChainResult::Status(status.as_u16())
    }

    #[must_use]
    pub fn is_chain(&self) -> bool {
        matches!(self, ChainResult::Chain(_))
    }

    #[must_use]
    pub fn is_no_content(&self) -> bool {
        *self == ChainResult::NO_CONTENT
    }
}

impl fmt::Display for ChainResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainResult::Chain(handle) => write!(f, "chain#{}", handle.as_raw()),
            ChainResult::Absent => write!(f, "absent"),
            ChainResult::Status(status) => write!(f, "status {status}"),
        }
    }
}

/// Stage of host request processing that invoked the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Phase(pub i32);

impl Phase {
    /// Invoked directly by a content handler rather than a phase handler.
    pub const CONTENT_HANDLER: Phase = Phase(-1);
    pub const REWRITE: Phase = Phase(3);
    pub const ACCESS: Phase = Phase(6);
    pub const CONTENT: Phase = Phase(9);
    pub const LOG: Phase = Phase(10);
    /// Header filter, the only filter phase that can defer a response.
    pub const HEADER_FILTER: Phase = Phase(11);
    pub const BODY_FILTER: Phase = Phase(12);

    /// Whether a request entering from this phase holds an in-flight
    /// reference while its response is deferred.
    #[must_use]
    pub fn holds_request(self) -> bool {
        self == Phase::CONTENT_HANDLER || self == Phase::HEADER_FILTER
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Phase::CONTENT_HANDLER => write!(f, "content-handler"),
            Phase::HEADER_FILTER => write!(f, "header-filter"),
            Phase::BODY_FILTER => write!(f, "body-filter"),
            Phase(other) => write!(f, "phase-{other}"),
        }
    }
}
