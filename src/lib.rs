//! # resilience-kit
//!
//! Two resilience primitives for isolating calls to unreliable external
//! dependencies such as SMS gateways, object storage, push services or a
//! message bus:
//!
//! - [`WorkerPool`]: a fixed set of worker threads draining a bounded queue.
//!   Submission never blocks; a full queue is an immediate error.
//! - [`CircuitBreaker`]: a three-state gate that stops calling a failing
//!   dependency until it appears to have recovered.
//!
//! ## What is a Circuit Breaker?
//!
//! - **Closed**: Normal operation. Calls pass through; consecutive failures
//!   are counted within a rolling window.
//! - **Open**: Calls are immediately rejected without invoking the operation.
//! - **Half-Open**: After a cooldown period, a limited number of trial calls
//!   are permitted to check if the dependency has recovered.
//!
//! Time-driven transitions are evaluated lazily against the clock whenever
//! the breaker is used or inspected; no background timer runs.
//!
//! ## Basic Usage
//!
//! ```rust
//! use resilience_kit::{BreakerError, CircuitBreaker, Context, WorkerPool};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::builder("sms-gateway")
//!     .max_requests(5)
//!     .interval(Duration::from_secs(60))
//!     .timeout(Duration::from_secs(30))
//!     .failure_threshold(5)
//!     .success_threshold(2)
//!     .build()
//!     .expect("valid breaker configuration");
//!
//! match breaker.execute(&Context::background(), |_ctx| Ok::<_, std::io::Error>("sent")) {
//!     Ok(receipt) => println!("Call succeeded: {}", receipt),
//!     Err(BreakerError::Open) => println!("Circuit is open, call was prevented"),
//!     Err(err) => println!("Call failed: {}", err),
//! }
//!
//! let pool = WorkerPool::new(4, 100);
//! pool.submit_guarded(&breaker, |_ctx| {
//!     // deliver a message
//!     Ok(())
//! })
//! .expect("queue has room");
//! pool.shutdown();
//! ```
//!
//! ## Features
//!
//! - `std` - Standard library support (default)
//! - `async` - [`CircuitBreaker::execute_async`] for futures
//! - `prometheus` - Prometheus metrics integration
//!
//! ## Examples
//!
//! Runnable examples live under `demos/` rather than `examples/` and are
//! registered as `[[example]]` targets, so they still run with
//! `cargo run --example basic` and `cargo run --example worker_pool`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod breaker;
mod config;
mod context;
mod error;
#[cfg(feature = "prometheus")]
mod exporter;
mod hook;
mod metrics;
mod pool;
pub mod prelude;
mod registry;
mod state;

// Re-exports
pub use breaker::CircuitBreaker;
pub use config::{
    BreakerBuilder, BreakerConfig, PoolBuilder, PoolConfig, ShutdownPolicy,
    DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use context::{CancelHandle, Cancelled, Context};
pub use error::{BreakerError, BreakerResult, ConfigError, PoolError, TaskError};
#[cfg(feature = "prometheus")]
pub use exporter::PrometheusSink;
pub use hook::HookRegistry;
pub use metrics::{MetricSink, NullMetricSink, PoolMetrics, TaskOutcome};
pub use pool::{PoolState, Task, WorkerPool};
pub use registry::{BreakerRegistry, BreakerSnapshot};
pub use state::{Counts, State, Transition};
