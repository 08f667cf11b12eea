//! Re-exports common types for convenient usage.
//!
//! # Example
//! ```rust,no_run
//! use resilience_kit::prelude::*;
//!
//! let pool = WorkerPool::new(2, 16);
//! let _ = pool.submit(|ctx: &Context| ctx.sleep(std::time::Duration::from_millis(10)).map_err(Into::into));
//! ```

pub use crate::{
    BreakerError, CircuitBreaker, Context, Counts, PoolError, State, TaskError, WorkerPool,
};
