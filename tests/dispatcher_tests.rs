#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use brrtrouter_host::handler::HandlerFuture;
use brrtrouter_host::headers::KnownHeader;
use brrtrouter_host::{
    AsyncCompletion, ChainResult, ConnectionHandle, CoroutineScheduler, DispatcherBuilder,
    ExecuteResult, HeaderEntry, HeaderValue, MemoryRequest, NativeHost, Phase, Request, RequestFactory,
    RequestHandle, Response, ResponseKind, RuntimeConfig, SubmitError, TaskSubmitter, WorkerPool,
    WorkerPoolConfig,
};
use common::{body_bytes, builder, host, init_may, register, WAIT};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const CONN: ConnectionHandle = ConnectionHandle(9);

fn completed(result: ExecuteResult) -> ChainResult {
    match result {
        ExecuteResult::Completed(result) => result,
        other => panic!("expected a completed result, got {other:?}"),
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_time()
        .build()
        .unwrap()
}

fn scheduler(rt: &tokio::runtime::Runtime) -> Arc<dyn CoroutineScheduler> {
    Arc::new(rt.handle().clone())
}

async fn hello(req: Arc<Request>) -> anyhow::Result<Response> {
    Ok(Response::text(200, format!("hello {}", req.uri())))
}

async fn deferred(_req: Arc<Request>) -> anyhow::Result<Response> {
    Ok(Response::pending())
}

async fn late(_req: Arc<Request>) -> anyhow::Result<Response> {
    tokio::time::sleep(Duration::from_millis(20)).await;
    Ok(Response::text(200, "late"))
}

async fn failing(_req: Arc<Request>) -> anyhow::Result<Response> {
    anyhow::bail!("database unreachable")
}

async fn no_content(_req: Arc<Request>) -> anyhow::Result<Response> {
    Ok(Response::new(200))
}

async fn init_aware(req: Arc<Request>) -> anyhow::Result<Response> {
    if req.is_init() {
        return Ok(Response::empty());
    }
    Ok(Response::new(204))
}

async fn init_fails(req: Arc<Request>) -> anyhow::Result<Response> {
    if req.is_init() {
        anyhow::bail!("configuration missing");
    }
    Ok(Response::new(200))
}

#[test]
fn test_inline_synchronous_response() {
    let host = host();
    let handle = register(&host, 1, MemoryRequest::default().uri("/pets"));
    let dispatcher = builder(&host).handler(hello).build().unwrap();
    assert!(!dispatcher.uses_pool());
    assert!(!dispatcher.uses_coroutines());

    let result = completed(dispatcher.execute(handle, CONN));
    assert_eq!(body_bytes(&host, result), b"hello /pets");

    let out = host.headers_out(handle).unwrap();
    assert_eq!(out.status(), Some(200));
    assert_eq!(out.content_type(), Some(&b"text/plain"[..]));
    assert_eq!(out.content_type_len(), Some(10));
    assert_eq!(host.request_count(handle), 0);
    assert_eq!(host.completion_count(), 0);
}

#[test]
fn test_headers_reach_slots_and_generic_table() {
    let host = host();
    let handle = register(&host, 1, MemoryRequest::default());
    let dispatcher = builder(&host)
        .handler(|_req: Arc<Request>| async {
            anyhow::Ok(
                Response::new(200)
                    .with_header("Content-Type", "text/html")
                    .with_header("X-Foo", "bar")
                    .with_header("location", "/next")
                    .with_header(
                        "Set-Cookie",
                        HeaderValue::from(vec!["a=1".to_string(), "b=2".to_string()]),
                    )
                    .with_body("ok"),
            )
        })
        .build()
        .unwrap();

    let result = completed(dispatcher.execute(handle, CONN));
    assert_eq!(body_bytes(&host, result), b"ok");

    let out = host.headers_out(handle).unwrap();
    assert_eq!(out.status(), Some(200));
    assert_eq!(out.content_type(), Some(&b"text/html"[..]));
    assert_eq!(out.content_type_len(), Some(9));
    assert!(!out.defaulted_content_type());
    assert_eq!(out.generic("x-foo"), vec![&b"bar"[..]]);
    assert_eq!(out.known(KnownHeader::Location), vec![&b"/next"[..]]);
    assert_eq!(out.generic("Set-Cookie"), vec![&b"a=1"[..], &b"b=2"[..]]);
}

#[test]
fn test_switching_protocols_writes_empty_content_type() {
    let host = host();
    let handle = register(&host, 1, MemoryRequest::default());
    let dispatcher = builder(&host)
        .handler(|_req: Arc<Request>| async { anyhow::Ok(Response::new(101)) })
        .build()
        .unwrap();

    let result = completed(dispatcher.execute(handle, CONN));
    assert_eq!(result, ChainResult::Status(101));

    let out = host.headers_out(handle).unwrap();
    assert_eq!(out.status(), Some(101));
    assert_eq!(out.content_type(), Some(&b""[..]));
    assert_eq!(out.content_type_len(), Some(0));
    assert!(!out.defaulted_content_type());
}

#[test]
fn test_ok_without_body_becomes_no_content() {
    let host = host();
    let handle = register(&host, 1, MemoryRequest::default());
    let dispatcher = builder(&host).handler(no_content).build().unwrap();

    let raw = dispatcher.execute_raw(handle.0, CONN.0);
    assert_eq!(raw, -204);

    let out = host.headers_out(handle).unwrap();
    assert!(out.defaulted_content_type());
    // the status slot keeps what the handler set; the host reads the return value
    assert_eq!(out.status(), Some(200));
    assert_eq!(host.segment_count(), 0);
}

async fn untidy_headers(_req: Arc<Request>) -> anyhow::Result<Response> {
    let mut response = Response::new(200)
        .with_header("X-Good", "yes")
        .with_header("Content-Type", "text/html\r\nX-Evil: 1")
        .with_header("X-Split", "a\r\nb")
        .with_header("Location", "/ok")
        .with_body("ok");
    let headers = response.headers_mut();
    headers.push_entry(HeaderEntry {
        name: None,
        value: Some(HeaderValue::from("orphan")),
    })?;
    headers.push_entry(HeaderEntry {
        name: Some("X-Empty".to_string()),
        value: None,
    })?;
    headers.push("X-Last", "kept")?;
    Ok(response)
}

#[test]
fn test_malformed_header_pairs_are_skipped() {
    let host = host();
    let handle = register(&host, 1, MemoryRequest::default());
    let dispatcher = builder(&host).handler(untidy_headers).build().unwrap();

    let result = completed(dispatcher.execute(handle, CONN));
    assert_eq!(body_bytes(&host, result), b"ok");

    let out = host.headers_out(handle).unwrap();
    assert_eq!(out.status(), Some(200));
    assert_eq!(out.generic("X-Good"), vec![&b"yes"[..]]);
    assert_eq!(out.generic("X-Last"), vec![&b"kept"[..]]);
    assert_eq!(out.known(KnownHeader::Location), vec![&b"/ok"[..]]);
    assert!(out.generic("X-Split").is_empty());
    assert!(out.generic("X-Empty").is_empty());
    assert!(out.generic("X-Evil").is_empty());

    // the rejected Content-Type never reaches its slot; the default applies
    assert!(out.defaulted_content_type());
    assert_eq!(out.content_type(), None);
    assert_eq!(out.content_type_len(), None);
}

#[test]
fn test_host_rejected_headers_do_not_abort_marshaling() {
    let host = host();
    host.reject_headers(true);
    let handle = register(&host, 1, MemoryRequest::default());
    let dispatcher = builder(&host)
        .handler(|_req: Arc<Request>| async {
            anyhow::Ok(
                Response::new(201)
                    .with_header("X-Foo", "bar")
                    .with_header("Location", "/pets/1")
                    .with_header("Content-Type", "application/json")
                    .with_body("{}"),
            )
        })
        .build()
        .unwrap();

    let result = completed(dispatcher.execute(handle, CONN));
    assert_eq!(body_bytes(&host, result), b"{}");

    let out = host.headers_out(handle).unwrap();
    assert!(out.generic("X-Foo").is_empty());
    assert!(out.known(KnownHeader::Location).is_empty());
    assert_eq!(out.content_type(), Some(&b"application/json"[..]));
    assert_eq!(out.content_type_len(), Some(16));
    assert!(!out.defaulted_content_type());
    assert_eq!(out.status(), Some(201));
}

#[test]
fn test_handler_error_becomes_500() {
    let host = host();
    let handle = register(&host, 1, MemoryRequest::default());
    let dispatcher = builder(&host).handler(failing).build().unwrap();

    let result = completed(dispatcher.execute(handle, CONN));
    let body = String::from_utf8(body_bytes(&host, result)).unwrap();
    assert!(body.contains("database unreachable"), "body was {body}");

    let out = host.headers_out(handle).unwrap();
    assert_eq!(out.status(), Some(500));
    assert_eq!(out.content_type(), Some(&b"text/plain"[..]));
}

#[test]
fn test_synchronous_panic_in_handler_becomes_500() {
    let host = host();
    let handle = register(&host, 1, MemoryRequest::default());
    let dispatcher = builder(&host)
        .handler(|_req: Arc<Request>| -> HandlerFuture { panic!("handler exploded") })
        .build()
        .unwrap();

    let result = completed(dispatcher.execute(handle, CONN));
    let body = String::from_utf8(body_bytes(&host, result)).unwrap();
    assert!(body.contains("handler exploded"), "body was {body}");
    assert_eq!(host.headers_out(handle).unwrap().status(), Some(500));
}

#[test]
fn test_released_request_is_never_marshaled() {
    let host = host();
    let handle = register(&host, 1, MemoryRequest::default().released());
    let dispatcher = builder(&host).handler(failing).build().unwrap();

    let result = completed(dispatcher.execute(handle, CONN));
    assert_eq!(result, ChainResult::INTERNAL_ERROR);
    assert!(host.headers_out(handle).is_none());
    assert_eq!(host.segment_count(), 0);
}

#[test]
fn test_inline_pending_counts_once() {
    let host = host();
    let content = register(&host, 1, MemoryRequest::new(Phase::CONTENT_HANDLER));
    let filter = register(&host, 2, MemoryRequest::new(Phase::HEADER_FILTER));
    let access = register(&host, 3, MemoryRequest::new(Phase::ACCESS));
    let released = register(&host, 4, MemoryRequest::default().released());
    let hijacked = register(&host, 5, MemoryRequest::default().hijacked());
    let dispatcher = builder(&host).handler(deferred).build().unwrap();

    for handle in [content, filter, access, released, hijacked] {
        assert_eq!(
            dispatcher.execute(handle, CONN),
            ExecuteResult::Deferred,
            "handle {handle:?}"
        );
    }

    assert_eq!(host.request_count(content), 1);
    assert_eq!(host.request_count(filter), 1);
    assert_eq!(host.request_count(access), 0);
    assert_eq!(host.request_count(released), 0);
    assert_eq!(host.request_count(hijacked), 0);
    assert!(host.headers_out(content).is_none());
}

#[test]
fn test_init_call() {
    let host = host();
    let dispatcher = builder(&host).handler(init_aware).build().unwrap();
    assert_eq!(
        dispatcher.execute(RequestHandle::NULL, ConnectionHandle(0)),
        ExecuteResult::Init(200)
    );
    assert_eq!(dispatcher.execute_raw(0, 0), 200);
    assert_eq!(host.total_request_count(), 0);
}

#[test]
fn test_init_call_failure() {
    let host = host();
    let dispatcher = builder(&host).handler(init_fails).build().unwrap();
    assert_eq!(
        dispatcher.execute(RequestHandle::NULL, ConnectionHandle(0)),
        ExecuteResult::Init(500)
    );
    assert_eq!(dispatcher.execute_raw(0, 0), 500);
}

struct ExplodingFactory;

impl RequestFactory for ExplodingFactory {
    fn make_request(&self, _request: RequestHandle, _connection: ConnectionHandle) -> Request {
        panic!("request factory exploded")
    }
}

#[test]
fn test_execute_raw_never_unwinds() {
    let host = host();
    let dispatcher = DispatcherBuilder::new(
        Arc::clone(&host) as Arc<dyn NativeHost>,
        Arc::new(ExplodingFactory),
        Arc::clone(&host) as Arc<dyn AsyncCompletion>,
    )
    .handler(hello)
    .build()
    .unwrap();

    assert_eq!(dispatcher.execute_raw(1, 1), -500);
}

#[test]
fn test_build_requires_handler() {
    let host = host();
    assert!(builder(&host).build().is_err());
}

// ---------------------------------------------------------------------------
// Worker pool
// ---------------------------------------------------------------------------

struct Refusing;

impl TaskSubmitter for Refusing {
    fn submit(&self, _task: brrtrouter_host::worker_pool::Task) -> Result<(), SubmitError> {
        Err(SubmitError::QueueFull { queue_bound: 0 })
    }
}

fn pool(workers: usize) -> Arc<dyn TaskSubmitter> {
    init_may();
    Arc::new(WorkerPool::new(
        "test",
        WorkerPoolConfig::new(workers, 64, 0x10000),
    ))
}

#[test]
fn test_pooled_counter_follows_inline_rules() {
    let host = host();
    let content = register(&host, 1, MemoryRequest::new(Phase::CONTENT_HANDLER));
    let access = register(&host, 2, MemoryRequest::new(Phase::ACCESS));
    let released = register(&host, 3, MemoryRequest::default().released());
    let hijacked = register(&host, 4, MemoryRequest::default().hijacked());
    let dispatcher = builder(&host)
        .handler(hello)
        .submitter(pool(2))
        .build()
        .unwrap();

    for handle in [content, access, released, hijacked] {
        assert_eq!(dispatcher.execute(handle, CONN), ExecuteResult::Deferred);
    }
    assert!(host.wait_for_completions(4, WAIT));

    assert_eq!(host.request_count(content), 1);
    assert_eq!(host.request_count(access), 0);
    assert_eq!(host.request_count(released), 0);
    assert_eq!(host.request_count(hijacked), 0);
}

#[test]
fn test_pooled_request_is_deferred_and_completed() {
    let host = host();
    let handle = register(&host, 1, MemoryRequest::default().uri("/pooled"));
    let dispatcher = builder(&host)
        .handler(hello)
        .submitter(pool(2))
        .build()
        .unwrap();
    assert!(dispatcher.uses_pool());

    assert_eq!(dispatcher.execute(handle, CONN), ExecuteResult::Deferred);
    assert_eq!(host.request_count(handle), 1);
    assert!(host.wait_for_completions(1, WAIT));

    let completion = host.take_completions().pop().unwrap();
    assert!(completion.request.is_prefetched());
    assert_eq!(completion.request.handle(), handle);

    let result = dispatcher.handle_response(&completion.request, completion.response);
    assert_eq!(body_bytes(&host, result), b"hello /pooled");
    assert_eq!(host.headers_out(handle).unwrap().status(), Some(200));
    assert_eq!(host.request_count(handle), 1);
}

#[test]
fn test_pool_returns_before_slow_handler_finishes() {
    let host = host();
    let handle = register(&host, 1, MemoryRequest::default());
    let (gate_tx, gate_rx) = may::sync::mpsc::channel::<()>();
    let gate = Arc::new(Mutex::new(gate_rx));

    let dispatcher = builder(&host)
        .handler(move |_req: Arc<Request>| {
            let gate = Arc::clone(&gate);
            async move {
                let _opened = gate.lock().unwrap().recv();
                anyhow::Ok(Response::text(200, "slow"))
            }
        })
        .submitter(pool(1))
        .build()
        .unwrap();

    assert_eq!(dispatcher.execute(handle, CONN), ExecuteResult::Deferred);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(host.completion_count(), 0);

    gate_tx.send(()).unwrap();
    assert!(host.wait_for_completions(1, WAIT));
    let completion = host.take_completions().pop().unwrap();
    assert_eq!(completion.response.fetch_status(0), 200);
}

#[test]
fn test_rejected_submission_delivers_503() {
    let host = host();
    let handle = register(&host, 1, MemoryRequest::default());
    let dispatcher = builder(&host)
        .handler(hello)
        .submitter(Arc::new(Refusing))
        .build()
        .unwrap();

    assert_eq!(dispatcher.execute(handle, CONN), ExecuteResult::Deferred);
    assert_eq!(host.request_count(handle), 1);

    let completion = host.take_completions().pop().unwrap();
    assert_eq!(completion.response.kind(), ResponseKind::Error);
    assert_eq!(completion.response.fetch_status(0), 503);

    let result = dispatcher.handle_response(&completion.request, completion.response);
    assert_eq!(body_bytes(&host, result), b"503 Service Unavailable");
    assert_eq!(host.headers_out(handle).unwrap().status(), Some(503));
}

// ---------------------------------------------------------------------------
// Coroutines
// ---------------------------------------------------------------------------

#[test]
fn test_coroutine_completing_immediately_is_synchronous() {
    let rt = runtime();
    let host = host();
    let handle = register(&host, 1, MemoryRequest::default().uri("/now"));
    let dispatcher = builder(&host)
        .handler(hello)
        .scheduler(scheduler(&rt))
        .build()
        .unwrap();
    assert!(dispatcher.uses_coroutines());

    let result = completed(dispatcher.execute(handle, CONN));
    assert_eq!(body_bytes(&host, result), b"hello /now");
    assert_eq!(host.request_count(handle), 0);
    assert_eq!(host.completion_count(), 0);
}

#[test]
fn test_suspended_coroutine_counts_once_and_delivers_once() {
    let rt = runtime();
    let host = host();
    let handle = register(&host, 1, MemoryRequest::default());
    let dispatcher = builder(&host)
        .handler(late)
        .scheduler(scheduler(&rt))
        .build()
        .unwrap();

    assert_eq!(dispatcher.execute(handle, CONN), ExecuteResult::Deferred);
    assert_eq!(host.request_count(handle), 1);
    assert!(host.wait_for_completions(1, WAIT));
    std::thread::sleep(Duration::from_millis(50));

    let mut completions = host.take_completions();
    assert_eq!(completions.len(), 1);
    let completion = completions.remove(0);
    let result = dispatcher.handle_response(&completion.request, completion.response);
    assert_eq!(body_bytes(&host, result), b"late");
    assert_eq!(host.request_count(handle), 1);
}

#[test]
fn test_pooled_coroutine_counts_once() {
    let rt = runtime();
    let host = host();
    let handle = register(&host, 1, MemoryRequest::new(Phase::HEADER_FILTER));
    let dispatcher = builder(&host)
        .handler(late)
        .submitter(pool(2))
        .scheduler(scheduler(&rt))
        .build()
        .unwrap();

    assert_eq!(dispatcher.execute(handle, CONN), ExecuteResult::Deferred);
    assert!(host.wait_for_completions(1, WAIT));
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(host.completion_count(), 1);
    assert_eq!(host.request_count(handle), 1);
    let completion = host.take_completions().pop().unwrap();
    assert_eq!(completion.response.fetch_status(0), 200);
}

#[test]
fn test_apply_config_uses_ambient_runtime() {
    let rt = runtime();
    let host = host();
    let config = RuntimeConfig {
        coroutines: true,
        ..RuntimeConfig::default()
    };

    let without = builder(&host)
        .handler(hello)
        .apply_config(&config)
        .build()
        .unwrap();
    assert!(!without.uses_coroutines());
    assert!(!without.uses_pool());

    let _entered = rt.enter();
    let with = builder(&host)
        .handler(hello)
        .apply_config(&config)
        .build()
        .unwrap();
    assert!(with.uses_coroutines());
}
