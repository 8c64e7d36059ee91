//! Dispatcher core: mode selection, in-flight bookkeeping and marshaling.

use crate::body::BodyMaterializer;
use crate::charset::Charset;
use crate::coroutine::{run_inline, CoroutineRunner, CoroutineScheduler};
use crate::fallback::panic_message;
use crate::handler::{AsyncCompletion, Handler};
use crate::headers::prepare_headers;
use crate::host::NativeHost;
use crate::request::{ConnectionHandle, Request, RequestFactory, RequestHandle};
use crate::response::{Response, ResponseKind};
use crate::runtime_config::RuntimeConfig;
use crate::scratch::DEFAULT_SCRATCH_SIZE;
use crate::status::{ChainResult, DEFERRED};
use crate::worker_pool::{Task, TaskSubmitter, WorkerPool, WorkerPoolConfig};
use http::StatusCode;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What [`Dispatcher::execute`] tells the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteResult {
    /// The response arrives later through [`AsyncCompletion`].
    Deferred,
    /// Marshaled result for the host's chain consumer.
    Completed(ChainResult),
    /// Outcome of the worker-init call: 200 on success, 500 otherwise.
    Init(u16),
}

impl ExecuteResult {
    /// Encode for the host: `DEFERRED`, the tri-state chain value, or for the
    /// init call the positive status itself (200 or 500).
    #[must_use]
    pub fn into_raw(self) -> i64 {
        match self {
            ExecuteResult::Deferred => DEFERRED,
            ExecuteResult::Completed(result) => result.into_raw(),
            ExecuteResult::Init(status) => i64::from(status),
        }
    }
}

/// Handler plus the way it is run; shared with pooled tasks.
struct Pipeline {
    handler: Arc<dyn Handler>,
    runner: Option<CoroutineRunner>,
}

impl Pipeline {
    fn run(&self, request: Arc<Request>) -> Response {
        match &self.runner {
            Some(runner) => runner.run(self.handler.as_ref(), request),
            None => run_inline(self.handler.as_ref(), request),
        }
    }
}

/// Entry point for every request the host hands over.
pub struct Dispatcher {
    host: Arc<dyn NativeHost>,
    factory: Arc<dyn RequestFactory>,
    completion: Arc<dyn AsyncCompletion>,
    submitter: Option<Arc<dyn TaskSubmitter>>,
    pipeline: Arc<Pipeline>,
    materializer: BodyMaterializer,
}

impl Dispatcher {
    pub fn builder(
        host: Arc<dyn NativeHost>,
        factory: Arc<dyn RequestFactory>,
        completion: Arc<dyn AsyncCompletion>,
    ) -> DispatcherBuilder {
        DispatcherBuilder::new(host, factory, completion)
    }

    #[must_use]
    pub fn uses_pool(&self) -> bool {
        self.submitter.is_some()
    }

    #[must_use]
    pub fn uses_coroutines(&self) -> bool {
        self.pipeline.runner.is_some()
    }

    pub fn materializer(&self) -> &BodyMaterializer {
        &self.materializer
    }

    /// Run the pipeline for one host request.
    ///
    /// A null `request` is the worker-init call. Otherwise the response is
    /// marshaled on this thread, or the call returns
    /// [`ExecuteResult::Deferred`] when the handler runs on a worker or
    /// suspended.
    pub fn execute(&self, request: RequestHandle, connection: ConnectionHandle) -> ExecuteResult {
        if request.is_null() {
            return self.init();
        }

        let request = Arc::new(self.factory.make_request(request, connection));

        // D1: Mode selection
        debug!(
            request_id = %request.id(),
            phase = %request.phase(),
            mode = if self.uses_pool() { "pool" } else { "inline" },
            coroutines = self.uses_coroutines(),
            "Dispatching request"
        );

        match &self.submitter {
            Some(submitter) => self.submit(submitter.as_ref(), request),
            None => self.run_here(request),
        }
    }

    /// FFI form of [`execute`](Self::execute); never unwinds into the host.
    pub fn execute_raw(&self, request: usize, connection: usize) -> i64 {
        match panic::catch_unwind(AssertUnwindSafe(|| {
            self.execute(RequestHandle(request), ConnectionHandle(connection))
        })) {
            Ok(result) => result.into_raw(),
            Err(panic) => {
                error!(
                    panic_message = %panic_message(&*panic),
                    "Dispatcher panicked - CRITICAL"
                );
                ChainResult::INTERNAL_ERROR.into_raw()
            }
        }
    }

    /// Marshal a finished response: headers first, then the body chain.
    ///
    /// Fatal responses and responses for released requests are logged and
    /// never touch host memory.
    pub fn handle_response(&self, request: &Request, response: Response) -> ChainResult {
        if response.kind() == ResponseKind::Fatal || request.is_released() {
            // D5: Undeliverable response
            warn!(
                request_id = %request.id(),
                kind = ?response.kind(),
                status = response.fetch_status(StatusCode::OK.as_u16()),
                "Request already released; response dropped"
            );
            return ChainResult::INTERNAL_ERROR;
        }
        if response.is_pending() {
            error!(
                request_id = %request.id(),
                "Pending marker reached marshaling"
            );
            return ChainResult::INTERNAL_ERROR;
        }

        let status = response.fetch_status(StatusCode::OK.as_u16());
        {
            let mut writer = self.host.response_writer(request);
            prepare_headers(
                writer.as_mut(),
                status,
                response.headers(),
                self.materializer.charset(),
            );
        }
        let result = self.materializer.build_output_chain(request, response);

        // D6: Response marshaled
        info!(
            request_id = %request.id(),
            status = status,
            result = %result,
            "Response marshaled"
        );
        result
    }

    fn init(&self) -> ExecuteResult {
        let request = Arc::new(Request::init());
        let response = self.pipeline.run(request);
        let status = response.fetch_status(StatusCode::OK.as_u16());
        let failed = matches!(response.kind(), ResponseKind::Error | ResponseKind::Fatal);

        if failed || status != StatusCode::OK.as_u16() {
            error!(
                kind = ?response.kind(),
                status = status,
                "Worker initialization failed"
            );
            ExecuteResult::Init(StatusCode::INTERNAL_SERVER_ERROR.as_u16())
        } else {
            info!(kind = ?response.kind(), "Worker initialization complete");
            ExecuteResult::Init(StatusCode::OK.as_u16())
        }
    }

    fn run_here(&self, request: Arc<Request>) -> ExecuteResult {
        let response = self.pipeline.run(Arc::clone(&request));
        if response.is_pending() {
            self.hold_request(&request);
            // D2: Suspended inline
            debug!(request_id = %request.id(), "Handler pending; deferring");
            return ExecuteResult::Deferred;
        }
        ExecuteResult::Completed(self.handle_response(&request, response))
    }

    fn submit(&self, submitter: &dyn TaskSubmitter, request: Arc<Request>) -> ExecuteResult {
        // the worker must never read host memory
        request.prefetch_all();
        self.hold_request(&request);

        let pipeline = Arc::clone(&self.pipeline);
        let completion = Arc::clone(&self.completion);
        let task_request = Arc::clone(&request);
        let task: Task = Box::new(move || {
            let response = pipeline.run(Arc::clone(&task_request));
            // a pending marker's task delivers on its own
            if !response.is_pending() {
                completion.complete(task_request, response);
            }
        });

        match submitter.submit(task) {
            Ok(()) => {
                // D3: Submitted to pool
                debug!(request_id = %request.id(), "Request submitted to worker pool");
            }
            Err(e) => {
                // D4: Pool rejected
                warn!(
                    request_id = %request.id(),
                    error = %e,
                    "Worker pool rejected request"
                );
                let response = Response::text(
                    StatusCode::SERVICE_UNAVAILABLE.as_u16(),
                    StatusCode::SERVICE_UNAVAILABLE.to_string(),
                )
                .with_kind(ResponseKind::Error);
                self.completion.complete(request, response);
            }
        }
        ExecuteResult::Deferred
    }

    /// Bump the host's in-flight counter for a request that outlives `execute`.
    ///
    /// The only place the counter is touched: once per deferred request
    /// from a holding phase that the host still owns.
    fn hold_request(&self, request: &Request) {
        if request.phase().holds_request() && !request.is_released() && !request.is_hijacked() {
            self.host.inc_request_count(request);
            debug!(
                request_id = %request.id(),
                phase = %request.phase(),
                "In-flight counter incremented"
            );
        }
    }
}

/// Assembles a [`Dispatcher`].
pub struct DispatcherBuilder {
    host: Arc<dyn NativeHost>,
    factory: Arc<dyn RequestFactory>,
    completion: Arc<dyn AsyncCompletion>,
    handler: Option<Arc<dyn Handler>>,
    submitter: Option<Arc<dyn TaskSubmitter>>,
    scheduler: Option<Arc<dyn CoroutineScheduler>>,
    scratch_size: usize,
    charset: Charset,
}

impl DispatcherBuilder {
    pub fn new(
        host: Arc<dyn NativeHost>,
        factory: Arc<dyn RequestFactory>,
        completion: Arc<dyn AsyncCompletion>,
    ) -> Self {
        Self {
            host,
            factory,
            completion,
            handler: None,
            submitter: None,
            scheduler: None,
            scratch_size: DEFAULT_SCRATCH_SIZE,
            charset: Charset::default(),
        }
    }

    /// Builder over one object that plays all three host roles.
    pub fn from_host<H>(host: Arc<H>) -> Self
    where
        H: NativeHost + RequestFactory + AsyncCompletion + 'static,
    {
        Self::new(
            Arc::clone(&host) as Arc<dyn NativeHost>,
            Arc::clone(&host) as Arc<dyn RequestFactory>,
            host as Arc<dyn AsyncCompletion>,
        )
    }

    #[must_use]
    pub fn handler(mut self, handler: impl Handler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Run handlers on `submitter` instead of the host thread.
    #[must_use]
    pub fn submitter(mut self, submitter: Arc<dyn TaskSubmitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    /// Run handlers as detachable coroutines resumed by `scheduler`.
    #[must_use]
    pub fn scheduler(mut self, scheduler: Arc<dyn CoroutineScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    #[must_use]
    pub fn scratch_size(mut self, size: usize) -> Self {
        self.scratch_size = size;
        self
    }

    #[must_use]
    pub fn charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    /// Apply runtime settings: buffer size, charset, worker pool and, when
    /// coroutines are enabled without an explicit scheduler, the ambient
    /// tokio runtime.
    #[must_use]
    pub fn apply_config(mut self, config: &RuntimeConfig) -> Self {
        self.scratch_size = config.scratch_buffer_size;
        self.charset = config.charset;

        if config.uses_pool() {
            let pool = WorkerPool::new(
                "handlers",
                WorkerPoolConfig::new(config.handler_workers, config.queue_bound, config.stack_size),
            );
            self.submitter = Some(Arc::new(pool));
        }

        if config.coroutines && self.scheduler.is_none() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => self.scheduler = Some(Arc::new(handle)),
                Err(e) => warn!(
                    error = %e,
                    "Coroutines enabled but no tokio runtime is running; handlers run inline"
                ),
            }
        }
        self
    }

    pub fn build(self) -> anyhow::Result<Dispatcher> {
        let Some(handler) = self.handler else {
            anyhow::bail!("dispatcher needs a handler");
        };

        let runner = self
            .scheduler
            .map(|scheduler| CoroutineRunner::new(scheduler, Arc::clone(&self.completion)));
        let materializer = BodyMaterializer::new(Arc::clone(&self.host))
            .with_scratch_size(self.scratch_size)
            .with_charset(self.charset);

        info!(
            pool = self.submitter.is_some(),
            coroutines = runner.is_some(),
            scratch_size = materializer.scratch_size(),
            charset = %materializer.charset(),
            "Dispatcher ready"
        );

        Ok(Dispatcher {
            host: self.host,
            factory: self.factory,
            completion: self.completion,
            submitter: self.submitter,
            pipeline: Arc::new(Pipeline { handler, runner }),
            materializer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::ChainHandle;

    #[test]
    fn test_execute_result_encoding() {
        assert_eq!(ExecuteResult::Deferred.into_raw(), -4);
        assert_eq!(ExecuteResult::Init(200).into_raw(), 200);
        assert_eq!(ExecuteResult::Init(500).into_raw(), 500);
        assert_eq!(
            ExecuteResult::Completed(ChainResult::NO_CONTENT).into_raw(),
            -204
        );
        let chain = ChainHandle::from_raw(42).unwrap();
        assert_eq!(
            ExecuteResult::Completed(ChainResult::Chain(chain)).into_raw(),
            42
        );
    }
}
