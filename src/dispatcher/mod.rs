//! # Dispatcher Module
//!
//! The dispatcher is the entry point the host calls for every request. It
//! decides where the handler runs, keeps the host's in-flight counter
//! honest, and marshals the finished response.
//!
//! ## Execution modes
//!
//! Two independent axes:
//!
//! - **Pool axis**: without a [`TaskSubmitter`](crate::worker_pool::TaskSubmitter)
//!   the handler runs on the host thread and the response is marshaled
//!   before `execute` returns. With one, the request's fields are
//!   prefetched, the pipeline is queued and `execute` returns
//!   [`ExecuteResult::Deferred`] at once.
//! - **Coroutine axis**: without a
//!   [`CoroutineScheduler`](crate::coroutine::CoroutineScheduler) the
//!   handler future is driven to completion where it runs. With one, it
//!   goes through the [`CoroutineRunner`](crate::coroutine::CoroutineRunner)
//!   and may come back pending.
//!
//! ## In-flight counter
//!
//! Any request that outlives `execute` (queued, or pending after an inline
//! run) from the content-handler or header-filter phase gets exactly one
//! `inc_request_count`, unless the host already released or hijacked it.
//! Requests answered synchronously are never counted.
//!
//! ## Deferred responses
//!
//! Deferred responses come back through
//! [`AsyncCompletion`](crate::handler::AsyncCompletion). The host then calls
//! [`Dispatcher::handle_response`] on its own thread.
//!
//! ## Example
//!
//! ```rust,ignore
//! let host = Arc::new(MemoryHost::new());
//! let dispatcher = DispatcherBuilder::from_host(Arc::clone(&host))
//!     .handler(|_req: Arc<Request>| async { Ok(Response::text(200, "hi")) })
//!     .apply_config(&RuntimeConfig::from_env())
//!     .build()?;
//!
//! let raw = dispatcher.execute_raw(request_ptr, connection_ptr);
//! ```

mod core;

pub use core::{Dispatcher, DispatcherBuilder, ExecuteResult};
