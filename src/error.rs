//! Error types shared across the dispatch pipeline.
//!
//! Handler failures travel as [`anyhow::Error`]; the enums here cover the
//! failures this crate itself can produce when talking to the host.

use std::fmt;

/// Failure reported while writing into host-owned response structures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The host memory pool could not satisfy an allocation
    PoolExhausted {
        /// Number of bytes requested
        requested: usize,
    },
    /// The host header table rejected a new entry
    HeaderTableFull,
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostError::PoolExhausted { requested } => {
                write!(f, "host pool exhausted allocating {requested} bytes")
            }
            HostError::HeaderTableFull => write!(f, "host header table rejected a new entry"),
        }
    }
}

impl std::error::Error for HostError {}

/// Invalid native struct layout.
///
/// Returned by [`HeadersOutLayout::new`](crate::native::HeadersOutLayout::new)
/// when the offsets reported by the host cannot be trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    /// A field extends past the end of the struct
    OutOfBounds {
        field: &'static str,
        offset: usize,
        width: usize,
        size: usize,
    },
    /// A field offset does not satisfy the alignment of its type
    Misaligned {
        field: &'static str,
        offset: usize,
        align: usize,
    },
    /// Two fields share bytes
    Overlap {
        first: &'static str,
        second: &'static str,
    },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::OutOfBounds {
                field,
                offset,
                width,
                size,
            } => write!(
                f,
                "layout error: field '{field}' at offset {offset} (width {width}) \
                 overruns struct of {size} bytes"
            ),
            LayoutError::Misaligned {
                field,
                offset,
                align,
            } => write!(
                f,
                "layout error: field '{field}' at offset {offset} is not {align}-byte aligned"
            ),
            LayoutError::Overlap { first, second } => {
                write!(f, "layout error: fields '{first}' and '{second}' overlap")
            }
        }
    }
}

impl std::error::Error for LayoutError {}

/// Attempt to mutate a response in a way it does not allow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseError {
    /// Headers built by the error fallback cannot be changed
    ReadOnlyHeaders,
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseError::ReadOnlyHeaders => write!(f, "read only header entry can not be set"),
        }
    }
}

impl std::error::Error for ResponseError {}

/// Task submission rejected by a [`TaskSubmitter`](crate::worker_pool::TaskSubmitter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// The queue already holds `queue_bound` tasks
    QueueFull { queue_bound: usize },
    /// All workers have exited
    Disconnected,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::QueueFull { queue_bound } => {
                write!(f, "worker queue is full ({queue_bound} pending tasks)")
            }
            SubmitError::Disconnected => write!(f, "worker pool channel disconnected"),
        }
    }
}

impl std::error::Error for SubmitError {}
