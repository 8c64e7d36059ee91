#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use brrtrouter_host::{
    ChainHandle, ChainResult, DispatcherBuilder, MemoryHost, MemoryRequest, RequestHandle,
};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

/// Serializes tests that read or write process-wide environment variables.
pub static ENV_MUTEX: Mutex<()> = Mutex::new(());

static MAY_INIT: Once = Once::new();

/// Configure the `may` runtime once per test binary.
pub fn init_may() {
    MAY_INIT.call_once(|| {
        may::config().set_workers(2).set_stack_size(0x10000);
    });
}

pub const WAIT: Duration = Duration::from_secs(5);

pub fn host() -> Arc<MemoryHost> {
    Arc::new(MemoryHost::new())
}

pub fn builder(host: &Arc<MemoryHost>) -> DispatcherBuilder {
    DispatcherBuilder::from_host(Arc::clone(host))
}

/// Register a request template under `handle` and return the handle.
pub fn register(host: &MemoryHost, handle: usize, request: MemoryRequest) -> RequestHandle {
    let handle = RequestHandle(handle);
    host.register(handle, request);
    handle
}

pub fn chain_head(result: ChainResult) -> ChainHandle {
    match result {
        ChainResult::Chain(head) => head,
        other => panic!("expected a chain, got {other}"),
    }
}

/// Bytes of a chain result, or panic when no chain was produced.
pub fn body_bytes(host: &MemoryHost, result: ChainResult) -> Vec<u8> {
    host.chain_bytes(chain_head(result)).unwrap()
}

pub mod env {
    /// Remove every `BRRTR_*` variable the runtime config reads.
    pub fn clear_runtime_vars() {
        for var in [
            "BRRTR_STACK_SIZE",
            "BRRTR_HANDLER_WORKERS",
            "BRRTR_HANDLER_QUEUE_BOUND",
            "BRRTR_COROUTINES",
            "BRRTR_SCRATCH_BUFFER_SIZE",
            "BRRTR_CHARSET",
        ] {
            std::env::remove_var(var);
        }
    }
}
