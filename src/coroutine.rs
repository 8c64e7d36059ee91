//! # Coroutine Runner
//!
//! Runs one handler invocation as a cooperative task bound to one request.
//!
//! The task is polled once on the calling thread. If it finishes, its
//! response is returned directly. If it suspends, the runner detaches: the
//! task moves to the [`CoroutineScheduler`] and the caller gets
//! [`Response::pending()`]. The response of a detached task leaves through
//! [`AsyncCompletion`].
//!
//! Both paths go through one continuation attached when the task is built.
//! It hands the response to a [`Delivery`] cell whose state changes with a
//! single compare-exchange, so exactly one of "caller returns it" and
//! "completion pushes it" happens, even if a scheduler resumes the task
//! concurrently with the caller detaching.

use crate::fallback::{build_unhandled_exception_response, panic_to_error};
use crate::handler::{AsyncCompletion, Handler};
use crate::request::Request;
use crate::response::Response;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, warn};

/// Resumes detached tasks until they finish.
pub trait CoroutineScheduler: Send + Sync {
    /// Take ownership of a suspended task.
    fn spawn(&self, task: BoxFuture<'static, ()>);

    /// Run the first poll inside the scheduler's context (timers, I/O drivers).
    fn enter(&self, first_poll: &mut dyn FnMut()) {
        first_poll();
    }
}

impl CoroutineScheduler for tokio::runtime::Handle {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        let _detached = tokio::runtime::Handle::spawn(self, task);
    }

    fn enter(&self, first_poll: &mut dyn FnMut()) {
        let _guard = tokio::runtime::Handle::enter(self);
        first_poll();
    }
}

const FIRST_POLL: u8 = 0;
const DETACHED: u8 = 1;
const DELIVERED: u8 = 2;

/// Hand-off point between a task's continuation and the caller.
pub struct Delivery {
    state: AtomicU8,
    slot: Mutex<Option<Response>>,
    request: Arc<Request>,
    completion: Arc<dyn AsyncCompletion>,
}

impl Delivery {
    fn new(request: Arc<Request>, completion: Arc<dyn AsyncCompletion>) -> Self {
        Self {
            state: AtomicU8::new(FIRST_POLL),
            slot: Mutex::new(None),
            request,
            completion,
        }
    }

    /// Continuation: runs once, when the task has its final response.
    fn deliver(&self, response: Response) {
        *self.slot.lock() = Some(response);
        if self
            .state
            .compare_exchange(FIRST_POLL, DELIVERED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            // the caller is still inside the first poll and will take it
            return;
        }
        if let Some(response) = self.slot.lock().take() {
            debug!(
                request_id = %self.request.id(),
                status = response.fetch_status(200),
                "Detached task delivering response"
            );
            self.completion.complete(Arc::clone(&self.request), response);
        }
    }

    /// Called by the caller after the first poll returned `Pending`.
    ///
    /// `None` means the caller detached and must not deliver; `Some` means the
    /// task finished first and the response belongs to the caller.
    fn detach(&self) -> Option<Response> {
        match self
            .state
            .compare_exchange(FIRST_POLL, DETACHED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => None,
            Err(_) => self.slot.lock().take(),
        }
    }

    fn take(&self) -> Option<Response> {
        self.slot.lock().take()
    }
}

/// Drive `future` to a response, converting errors and panics.
async fn settle(request: Arc<Request>, future: crate::handler::HandlerFuture) -> Response {
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(response)) => response,
        Ok(Err(failure)) => build_unhandled_exception_response(&request, &failure),
        Err(panic) => build_unhandled_exception_response(&request, &panic_to_error(panic)),
    }
}

/// Call the handler, catching a panic in its synchronous part.
fn start(handler: &dyn Handler, request: &Arc<Request>) -> crate::handler::HandlerFuture {
    match panic::catch_unwind(AssertUnwindSafe(|| handler.process(Arc::clone(request)))) {
        Ok(future) => future,
        Err(panic) => {
            let failure = panic_to_error(panic);
            Box::pin(async move { Err::<Response, _>(failure) })
        }
    }
}

/// Run the handler to completion on this thread, blocking on suspension.
pub fn run_inline(handler: &dyn Handler, request: Arc<Request>) -> Response {
    let future = start(handler, &request);
    futures::executor::block_on(settle(request, future))
}

/// Runs handlers as detachable tasks.
#[derive(Clone)]
pub struct CoroutineRunner {
    scheduler: Arc<dyn CoroutineScheduler>,
    completion: Arc<dyn AsyncCompletion>,
}

impl CoroutineRunner {
    pub fn new(
        scheduler: Arc<dyn CoroutineScheduler>,
        completion: Arc<dyn AsyncCompletion>,
    ) -> Self {
        Self {
            scheduler,
            completion,
        }
    }

    /// Run `handler` for `request`: its response if it finishes on the first
    /// poll, [`Response::pending()`] if it suspended.
    pub fn run(&self, handler: &dyn Handler, request: Arc<Request>) -> Response {
        let delivery = Arc::new(Delivery::new(
            Arc::clone(&request),
            Arc::clone(&self.completion),
        ));
        let future = start(handler, &request);
        let continuation = Arc::clone(&delivery);
        let mut task: BoxFuture<'static, ()> = Box::pin(async move {
            let response = settle(request, future).await;
            continuation.deliver(response);
        });

        let mut first = Poll::Pending;
        self.scheduler.enter(&mut || {
            let waker = futures::task::noop_waker();
            let mut cx = Context::from_waker(&waker);
            first = task.as_mut().poll(&mut cx);
        });

        match first {
            Poll::Ready(()) => delivery.take().unwrap_or_else(|| {
                warn!(
                    request_id = %delivery.request.id(),
                    "Task finished without a response"
                );
                build_unhandled_exception_response(
                    &delivery.request,
                    &anyhow::anyhow!("handler task finished without a response"),
                )
            }),
            Poll::Pending => match delivery.detach() {
                None => {
                    debug!(
                        request_id = %delivery.request.id(),
                        mode = "coroutine",
                        "Handler suspended; task detached"
                    );
                    self.scheduler.spawn(task);
                    Response::pending()
                }
                Some(response) => response,
            },
        }
    }
}
