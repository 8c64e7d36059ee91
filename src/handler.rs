//! Handler and completion contracts.
//!
//! A [`Handler`] turns a request into a future of a [`Response`]. Plain
//! async closures implement it:
//!
//! ```rust,ignore
//! let handler = |req: Arc<Request>| async move {
//!     Ok(Response::text(200, format!("hello {}", req.uri())))
//! };
//! ```
//!
//! Deferred responses leave through [`AsyncCompletion`], which the host
//! integration implements to wake its event loop.

use crate::request::Request;
use crate::response::Response;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Future returned by a handler invocation.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Response>>;

/// Externally supplied request handler.
pub trait Handler: Send + Sync + 'static {
    fn process(&self, request: Arc<Request>) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Arc<Request>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Response>> + Send + 'static,
{
    fn process(&self, request: Arc<Request>) -> HandlerFuture {
        Box::pin(self(request))
    }
}

/// Outbound channel for responses that finish after `execute` returned.
///
/// Called exactly once per deferred request, from whichever thread finished
/// it. Implementations hand the pair back to the host thread, which then
/// calls [`Dispatcher::handle_response`](crate::dispatcher::Dispatcher::handle_response).
pub trait AsyncCompletion: Send + Sync {
    fn complete(&self, request: Arc<Request>, response: Response);
}
