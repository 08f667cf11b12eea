//! Bounded worker pool.
//!
//! A fixed set of OS threads drains one bounded FIFO queue. Submission never
//! blocks: a full queue is reported as [`PoolError::QueueFull`]. Tasks are
//! fire-and-forget; failures are logged and counted, never returned to the
//! submitter.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::breaker::CircuitBreaker;
use crate::config::{duration_ms, PoolBuilder, PoolConfig, ShutdownPolicy};
use crate::context::{CancelHandle, Context};
use crate::error::{PoolError, TaskError};
use crate::metrics::{MetricSink, PoolCounters, PoolMetrics, TaskOutcome};

/// A deferred unit of work. It receives the pool-wide context and should
/// return early once that context is cancelled.
pub type Task = Box<dyn FnOnce(&Context) -> Result<(), TaskError> + Send + 'static>;

/// Lifecycle of a worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Workers are running and submissions are accepted.
    Running = 0,
    /// Shutdown has been requested and workers are being waited on.
    ShuttingDown = 1,
    /// Every worker exited, or the shutdown timeout elapsed.
    Terminated = 2,
}

impl From<u8> for PoolState {
    fn from(value: u8) -> Self {
        match value {
            0 => PoolState::Running,
            1 => PoolState::ShuttingDown,
            _ => PoolState::Terminated,
        }
    }
}

/// State shared between the pool handle and its worker threads.
struct Shared {
    counters: PoolCounters,
    metric_sink: Arc<dyn MetricSink>,
}

impl Shared {
    fn record(&self, outcome: TaskOutcome) {
        self.counters.increment(outcome);
        self.metric_sink.record_task(outcome);
    }

    fn run(&self, worker_id: usize, task: Task, ctx: &Context) {
        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(ctx)));
        let duration_ms = duration_ms(start.elapsed());

        match outcome {
            Ok(Ok(())) => {
                self.record(TaskOutcome::Completed);
                debug!(worker_id, duration_ms, "Worker task completed");
            }
            Ok(Err(err)) => {
                self.record(TaskOutcome::Failed);
                error!(worker_id, error = %err, duration_ms, "Worker task failed");
            }
            Err(payload) => {
                self.record(TaskOutcome::Failed);
                error!(
                    worker_id,
                    panic = panic_message(payload.as_ref()),
                    duration_ms,
                    "Worker task panicked"
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

/// A fixed set of worker threads draining a bounded task queue.
pub struct WorkerPool {
    config: PoolConfig,
    // `None` once the pool stops accepting; dropping it closes the queue.
    queue: RwLock<Option<Sender<Task>>>,
    // Keeps the queue open with zero workers and lets shutdown discard leftovers.
    backlog: Receiver<Task>,
    ctx: Context,
    cancel: CancelHandle,
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    // Threads actually started; may fall short of `config.workers`.
    spawned: usize,
    // Disconnects once every worker thread has exited.
    exited: Receiver<()>,
    state: AtomicU8,
}

impl WorkerPool {
    /// Starts `workers` threads sharing a queue of `queue_capacity`, with the
    /// default shutdown timeout and policy.
    ///
    /// A zero worker count is not rejected: such a pool accepts tasks until
    /// the queue fills but never runs them.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        PoolBuilder::new(workers, queue_capacity).build()
    }

    /// Creates a builder for a customized pool.
    pub fn builder(workers: usize, queue_capacity: usize) -> PoolBuilder {
        PoolBuilder::new(workers, queue_capacity)
    }

    pub(crate) fn with_parts(config: PoolConfig, metric_sink: Arc<dyn MetricSink>) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded::<Task>(config.queue_capacity);
        let (ctx, cancel) = Context::with_cancel();
        let (exit_guard, exited) = crossbeam_channel::bounded::<()>(0);
        let shared = Arc::new(Shared {
            counters: PoolCounters::default(),
            metric_sink,
        });

        let mut handles = Vec::with_capacity(config.workers);
        for worker_id in 0..config.workers {
            let tasks = receiver.clone();
            let ctx = ctx.clone();
            let shared = Arc::clone(&shared);
            let exit_guard = exit_guard.clone();
            let policy = config.shutdown_policy;

            let spawned = thread::Builder::new()
                .name(format!("pool-worker-{worker_id}"))
                .spawn(move || run_worker(worker_id, tasks, ctx, shared, policy, exit_guard));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => error!(worker_id, error = %err, "Failed to spawn worker thread"),
            }
        }
        drop(exit_guard);

        info!(
            workers = handles.len(),
            queue_capacity = config.queue_capacity,
            "Started worker pool"
        );

        Self {
            spawned: handles.len(),
            config,
            queue: RwLock::new(Some(sender)),
            backlog: receiver,
            ctx,
            cancel,
            shared,
            handles: Mutex::new(handles),
            exited,
            state: AtomicU8::new(PoolState::Running as u8),
        }
    }

    /// Queues a task without blocking.
    ///
    /// The `submitted` counter is incremented for every call, accepted or
    /// not; refusals also increment `rejected`.
    pub fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: FnOnce(&Context) -> Result<(), TaskError> + Send + 'static,
    {
        self.shared.record(TaskOutcome::Submitted);

        let result = self.enqueue(Box::new(task));
        if result.is_err() {
            self.shared.record(TaskOutcome::Rejected);
        }
        result
    }

    /// Queues a task whose body runs through `breaker`.
    ///
    /// Breaker rejections surface as task failures in the pool metrics.
    pub fn submit_guarded<F>(&self, breaker: &CircuitBreaker, task: F) -> Result<(), PoolError>
    where
        F: FnOnce(&Context) -> Result<(), TaskError> + Send + 'static,
    {
        let breaker = breaker.clone();
        self.submit(move |ctx| {
            breaker
                .execute(ctx, task)
                .map_err(|err| match err.into_rejection() {
                    Ok(rejection) => Box::new(rejection) as TaskError,
                    Err(failure) => failure,
                })
        })
    }

    fn enqueue(&self, task: Task) -> Result<(), PoolError> {
        // Cancellation wins over free queue space.
        if self.ctx.is_cancelled() {
            return Err(PoolError::Cancelled);
        }

        let queue = self.queue.read();
        let sender = queue.as_ref().ok_or(PoolError::Cancelled)?;
        sender.try_send(task).map_err(|err| match err {
            TrySendError::Full(_) => PoolError::QueueFull,
            TrySendError::Disconnected(_) => PoolError::Cancelled,
        })
    }

    /// Stops the pool, waiting at most the configured shutdown timeout.
    ///
    /// With [`ShutdownPolicy::Race`] the cancellation signal fires first and
    /// queued tasks run only if a worker happens to dequeue them before
    /// observing it. With [`ShutdownPolicy::Drain`] the queue is closed first
    /// and cancellation fires after workers have emptied it or the timeout
    /// elapsed. Either way, tasks still queued afterwards are dropped, and
    /// tasks still running past the timeout are abandoned.
    ///
    /// Returns how many queued tasks were discarded without running. Calling
    /// this more than once has no further effect and returns zero.
    pub fn shutdown(&self) -> usize {
        let started = self
            .state
            .compare_exchange(
                PoolState::Running as u8,
                PoolState::ShuttingDown as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if !started {
            return 0;
        }

        info!(policy = ?self.config.shutdown_policy, "Shutting down worker pool...");
        match self.config.shutdown_policy {
            ShutdownPolicy::Race => self.cancel.cancel(),
            ShutdownPolicy::Drain => self.close_queue(),
        }

        let stopped = self.wait_for_workers(self.config.shutdown_timeout);
        self.cancel.cancel();
        self.close_queue();

        if stopped {
            for handle in self.handles.lock().drain(..) {
                let _ = handle.join();
            }
            info!("All workers stopped gracefully");
        } else {
            // Detach whatever is still running.
            self.handles.lock().clear();
            warn!(
                timeout_ms = duration_ms(self.config.shutdown_timeout),
                "Worker pool shutdown timeout, some tasks may not have completed"
            );
        }

        let dropped = self.backlog.try_iter().count();
        if dropped > 0 {
            warn!(dropped, "Discarded queued tasks at shutdown");
        }

        self.state
            .store(PoolState::Terminated as u8, Ordering::Release);
        self.log_metrics();
        dropped
    }

    fn close_queue(&self) {
        self.queue.write().take();
    }

    fn wait_for_workers(&self, timeout: Duration) -> bool {
        matches!(
            self.exited.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    fn log_metrics(&self) {
        let metrics = self.metrics();
        info!(
            submitted = metrics.submitted,
            completed = metrics.completed,
            failed = metrics.failed,
            rejected = metrics.rejected,
            "Worker pool final metrics"
        );
    }

    /// Returns a snapshot of the pool counters.
    pub fn metrics(&self) -> PoolMetrics {
        self.shared.counters.snapshot()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PoolState {
        PoolState::from(self.state.load(Ordering::Acquire))
    }

    /// Tasks waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.backlog.len()
    }

    /// Number of worker threads started at construction.
    ///
    /// This is below `config().workers` only if spawning a thread failed.
    pub fn worker_count(&self) -> usize {
        self.spawned
    }

    /// Queue capacity the pool was configured with.
    pub fn capacity(&self) -> usize {
        self.config.queue_capacity
    }

    /// The configuration this pool was started with.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Stop the workers without waiting on them.
        if self.state() == PoolState::Running {
            self.cancel.cancel();
            self.close_queue();
        }
    }
}

fn run_worker(
    worker_id: usize,
    tasks: Receiver<Task>,
    ctx: Context,
    shared: Arc<Shared>,
    policy: ShutdownPolicy,
    _exit_guard: Sender<()>,
) {
    loop {
        let next = match policy {
            // No priority between the two arms when both are ready.
            ShutdownPolicy::Race => select! {
                recv(ctx.done()) -> _ => None,
                recv(tasks) -> task => task.ok(),
            },
            ShutdownPolicy::Drain => tasks.recv().ok().filter(|_| !ctx.is_cancelled()),
        };

        let Some(task) = next else { break };
        shared.run(worker_id, task, &ctx);
    }

    info!(worker_id, "Worker shutting down");
}
