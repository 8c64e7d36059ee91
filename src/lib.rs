//! # brrtrouter-host
//!
//! **brrtrouter-host** is the request bridge between a native, event-driven
//! web server worker and application handlers written in Rust. The host
//! calls [`Dispatcher::execute`] for each request it hands over; the
//! dispatcher runs the handler inline, on a worker pool, or as a detachable
//! coroutine, and translates the resulting [`Response`] into the host's
//! native header structure and output buffer chain.
//!
//! ## Architecture
//!
//! - **[`dispatcher`]** - Mode selection, in-flight counter bookkeeping and marshaling
//! - **[`coroutine`]** - Runs a handler future with a single continuation; detaches on suspension
//! - **[`worker_pool`]** - Bounded `may` coroutine pool behind the [`TaskSubmitter`] seam
//! - **[`headers`]** - Header marshaling into dedicated slots or the generic table
//! - **[`body`]** - Body materialization into the host's output chain
//! - **[`fallback`]** - 500 responses for handler failures
//! - **[`native`]** - Typed writer over the host's raw header structure
//! - **[`host`]** - The [`NativeHost`] seam and an in-process [`MemoryHost`]
//! - **[`runtime_config`]** / **[`logging`]** - Configuration and structured logging setup
//!
//! ### Request Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Host as Native host
//!     participant D as Dispatcher
//!     participant P as Worker pool
//!     participant H as Handler
//!     participant M as Marshaler
//!
//!     Host->>D: execute(request, connection)
//!     alt pooled
//!         D->>Host: inc_request_count
//!         D->>P: submit(task)
//!         D-->>Host: DEFERRED
//!         P->>H: process(request)
//!         H-->>P: Response
//!         P->>Host: complete(request, response)
//!         Host->>D: handle_response
//!     else inline
//!         D->>H: process(request)
//!         H-->>D: Response
//!     end
//!     D->>M: prepare_headers + build_output_chain
//!     M-->>Host: chain / status
//! ```
//!
//! ## Return values
//!
//! The host reads one signed integer per call: a positive value is a chain
//! handle, `0` means no chain was produced, a negative value is a negated
//! HTTP status, and [`DEFERRED`] means the response arrives later through
//! [`AsyncCompletion`]. [`ChainResult`] is the typed form. The worker-init
//! call (null request handle) instead returns the positive status 200 or 500.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use brrtrouter_host::{DispatcherBuilder, MemoryHost, Request, Response, RuntimeConfig};
//! use std::sync::Arc;
//!
//! let host = Arc::new(MemoryHost::new());
//! let dispatcher = DispatcherBuilder::from_host(Arc::clone(&host))
//!     .handler(|req: Arc<Request>| async move {
//!         Ok(Response::text(200, format!("hello from {}", req.uri())))
//!     })
//!     .apply_config(&RuntimeConfig::from_env())
//!     .build()?;
//! ```
//!
//! ## Runtime Considerations
//!
//! Pooled handlers run on `may` coroutines; stack size comes from
//! `BRRTR_STACK_SIZE`. Configure `may` before the first pool is created.
//! Coroutine mode drives handler futures and, when no scheduler is given,
//! resumes suspended ones on the ambient tokio runtime.

pub mod body;
pub mod charset;
pub mod coroutine;
pub mod dispatcher;
pub mod error;
pub mod fallback;
pub mod handler;
pub mod headers;
pub mod host;
pub mod ids;
pub mod logging;
pub mod native;
pub mod request;
pub mod response;
pub mod runtime_config;
pub mod scratch;
pub mod status;
pub mod worker_pool;

pub use body::BodyMaterializer;
pub use charset::Charset;
pub use coroutine::{CoroutineRunner, CoroutineScheduler};
pub use dispatcher::{Dispatcher, DispatcherBuilder, ExecuteResult};
pub use error::{HostError, LayoutError, ResponseError, SubmitError};
pub use handler::{AsyncCompletion, Handler, HandlerFuture};
pub use host::{MemoryHost, MemoryRequest, NativeHost};
pub use request::{ConnectionHandle, Request, RequestFactory, RequestHandle};
pub use response::{Body, HeaderEntry, HeaderValue, Headers, Response, ResponseKind};
pub use runtime_config::RuntimeConfig;
pub use status::{ChainHandle, ChainResult, Phase, DEFERRED};
pub use worker_pool::{TaskSubmitter, WorkerPool, WorkerPoolConfig};
