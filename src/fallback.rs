//! # Error Fallback Builder
//!
//! Turns any failure escaping a handler into a response the dispatcher can
//! deliver (or, for released requests, log). This path must not fail itself:
//! if the diagnostic cannot be rendered the body degrades to a fixed message.

use crate::request::Request;
use crate::response::{Body, HeaderEntry, Headers, Response, ResponseKind};
use http::StatusCode;
use std::any::Any;
use std::fmt::Write;
use std::panic::{self, AssertUnwindSafe};
use tracing::error;

/// Body used when the failure itself cannot be formatted.
pub const FALLBACK_MESSAGE: &str = "500 Internal Server Error";

/// Build the 500 response for `failure` raised while handling `request`.
///
/// Classified [`ResponseKind::Fatal`] when the host already released the
/// request, [`ResponseKind::Error`] otherwise. Headers are read-only.
pub fn build_unhandled_exception_response(request: &Request, failure: &anyhow::Error) -> Response {
    let trace = render_trace(failure);
    let kind = if request.is_released() {
        error!(
            request_id = %request.id(),
            phase = %request.phase(),
            error = %trace,
            "Unhandled failure after request was released; response dropped"
        );
        ResponseKind::Fatal
    } else {
        error!(
            request_id = %request.id(),
            phase = %request.phase(),
            error = %trace,
            "Unhandled handler failure"
        );
        ResponseKind::Error
    };

    Response::from_parts(
        kind,
        Some(StatusCode::INTERNAL_SERVER_ERROR.as_u16()),
        Headers::read_only([HeaderEntry::new("Content-Type", "text/plain")]),
        Some(Body::Text(trace)),
    )
}

/// `{:?}` of the error: message, cause chain and backtrace if captured.
fn render_trace(failure: &anyhow::Error) -> String {
    let rendered = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut out = String::new();
        write!(out, "{failure:?}").map(|()| out)
    }));
    match rendered {
        Ok(Ok(trace)) if !trace.is_empty() => trace,
        _ => FALLBACK_MESSAGE.to_string(),
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Convert a caught panic into a handler error.
pub fn panic_to_error(payload: Box<dyn Any + Send>) -> anyhow::Error {
    anyhow::anyhow!("handler panicked: {}", panic_message(payload.as_ref()))
}
