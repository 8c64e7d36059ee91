//! # Worker Pool Module
//!
//! A fixed set of `may` worker coroutines sharing one task queue. The
//! dispatcher hands pooled requests to it through [`TaskSubmitter`], so the
//! host thread never waits for a handler.
//!
//! ## Features
//!
//! - **Shared queue**: all workers pull from one `may::sync::mpsc` channel and
//!   load balance automatically
//! - **Bounded**: at most `queue_bound` tasks are queued or running; further
//!   submissions are rejected with [`SubmitError::QueueFull`] instead of
//!   blocking the caller
//! - **Panic isolation**: a panicking task is logged and the worker continues
//! - **Metrics**: dispatched, completed, rejected and panicked counters plus
//!   the current depth
//!
//! ## Configuration
//!
//! - `BRRTR_HANDLER_WORKERS`: number of worker coroutines (default: 4)
//! - `BRRTR_HANDLER_QUEUE_BOUND`: maximum queued + running tasks, `0` for
//!   unbounded (default: 1024)
//! - `BRRTR_STACK_SIZE`: worker coroutine stack size, hex or decimal
//!   (default: `0x10000`)

use crate::error::SubmitError;
use crate::fallback::panic_message;
use crate::runtime_config::parse_size;
use may::sync::mpsc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Unit of work run on a worker.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Accepts work for execution off the host thread.
pub trait TaskSubmitter: Send + Sync {
    /// Queue `task`; must not block the caller.
    fn submit(&self, task: Task) -> Result<(), SubmitError>;
}

/// Configuration for a worker pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of worker coroutines
    pub num_workers: usize,
    /// Maximum queued + running tasks (0 = unbounded)
    pub queue_bound: usize,
    /// Stack size for worker coroutines
    pub stack_size: usize,
}

impl WorkerPoolConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let num_workers = std::env::var("BRRTR_HANDLER_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.num_workers);

        let queue_bound = std::env::var("BRRTR_HANDLER_QUEUE_BOUND")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.queue_bound);

        let stack_size = std::env::var("BRRTR_STACK_SIZE")
            .ok()
            .and_then(|s| parse_size(&s))
            .unwrap_or(defaults.stack_size);

        Self {
            num_workers,
            queue_bound,
            stack_size,
        }
    }

    pub fn new(num_workers: usize, queue_bound: usize, stack_size: usize) -> Self {
        Self {
            num_workers,
            queue_bound,
            stack_size,
        }
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            queue_bound: 1024,
            stack_size: 0x10000, // 64KB
        }
    }
}

/// Metrics for a worker pool
#[derive(Debug, Default)]
pub struct WorkerPoolMetrics {
    /// Tasks queued or running
    queue_depth: AtomicUsize,
    dispatched_count: AtomicU64,
    completed_count: AtomicU64,
    /// Submissions refused (queue full or workers gone)
    rejected_count: AtomicU64,
    panicked_count: AtomicU64,
}

impl WorkerPoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a queue slot; fails when `bound` slots are taken.
    fn try_reserve(&self, bound: usize) -> bool {
        let reserved = self
            .queue_depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| {
                (bound == 0 || depth < bound).then_some(depth + 1)
            })
            .is_ok();
        if reserved {
            self.dispatched_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected_count.fetch_add(1, Ordering::Relaxed);
        }
        reserved
    }

    /// Undo a reservation whose task never reached a worker.
    fn release_unsent(&self) {
        self.queue_depth.fetch_sub(1, Ordering::AcqRel);
        self.dispatched_count.fetch_sub(1, Ordering::Relaxed);
        self.rejected_count.fetch_add(1, Ordering::Relaxed);
    }

    fn record_completion(&self, panicked: bool) {
        if panicked {
            self.panicked_count.fetch_add(1, Ordering::Relaxed);
        }
        self.completed_count.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn get_queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Acquire)
    }

    pub fn get_dispatched_count(&self) -> u64 {
        self.dispatched_count.load(Ordering::Relaxed)
    }

    pub fn get_completed_count(&self) -> u64 {
        self.completed_count.load(Ordering::Relaxed)
    }

    pub fn get_rejected_count(&self) -> u64 {
        self.rejected_count.load(Ordering::Relaxed)
    }

    pub fn get_panicked_count(&self) -> u64 {
        self.panicked_count.load(Ordering::Relaxed)
    }
}

/// Fixed pool of `may` worker coroutines.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    sender: mpsc::Sender<Task>,
    metrics: Arc<WorkerPoolMetrics>,
    name: String,
}

impl WorkerPool {
    /// Spawn `config.num_workers` workers. Requires the `may` runtime to be
    /// configured (`may::config()`) before the first pool is created.
    pub fn new(name: impl Into<String>, config: WorkerPoolConfig) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<Task>();
        let rx = Arc::new(rx);
        let metrics = Arc::new(WorkerPoolMetrics::new());

        info!(
            pool = %name,
            num_workers = config.num_workers,
            queue_bound = config.queue_bound,
            stack_size = config.stack_size,
            "Creating worker pool"
        );

        for worker_id in 0..config.num_workers {
            let rx = Arc::clone(&rx);
            let metrics = Arc::clone(&metrics);
            let pool = name.clone();

            // SAFETY: tasks only borrow thread-local state (the scratch
            // buffer) for the duration of one non-yielding call, so a
            // coroutine migrating between threads never observes a borrow
            // made on another thread.
            let spawn_result = unsafe {
                may::coroutine::Builder::new()
                    .name(format!("{name}-{worker_id}"))
                    .stack_size(config.stack_size)
                    .spawn(move || {
                        debug!(pool = %pool, worker_id = worker_id, "Worker coroutine started");
                        while let Ok(task) = rx.recv() {
                            let outcome =
                                std::panic::catch_unwind(std::panic::AssertUnwindSafe(task));
                            if let Err(panic) = &outcome {
                                error!(
                                    pool = %pool,
                                    worker_id = worker_id,
                                    panic_message = %panic_message(&**panic),
                                    "Task panicked"
                                );
                            }
                            metrics.record_completion(outcome.is_err());
                        }
                        debug!(pool = %pool, worker_id = worker_id, "Worker coroutine exiting");
                    })
            };

            if let Err(e) = spawn_result {
                error!(
                    pool = %name,
                    worker_id = worker_id,
                    error = %e,
                    "Failed to spawn worker coroutine"
                );
            }
        }

        Self {
            config,
            sender: tx,
            metrics,
            name,
        }
    }

    pub fn metrics(&self) -> &Arc<WorkerPoolMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl TaskSubmitter for WorkerPool {
    fn submit(&self, task: Task) -> Result<(), SubmitError> {
        if !self.metrics.try_reserve(self.config.queue_bound) {
            warn!(
                pool = %self.name,
                queue_bound = self.config.queue_bound,
                "Worker pool queue full; rejecting task"
            );
            return Err(SubmitError::QueueFull {
                queue_bound: self.config.queue_bound,
            });
        }

        if let Err(e) = self.sender.send(task) {
            self.metrics.release_unsent();
            error!(
                pool = %self.name,
                error = %e,
                "Worker pool channel disconnected"
            );
            return Err(SubmitError::Disconnected);
        }
        Ok(())
    }
}
