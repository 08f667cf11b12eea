//! Error types for the worker pool and the circuit breaker.

use std::convert::Infallible;

use thiserror::Error;

/// Failure value returned by a task body.
pub type TaskError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for circuit breaker operations.
pub type BreakerResult<T, E> = Result<T, BreakerError<E>>;

/// Errors returned synchronously by [`WorkerPool::submit`](crate::WorkerPool::submit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The queue was at capacity when the task was submitted.
    #[error("task queue is full")]
    QueueFull,

    /// The pool's cancellation signal had already fired.
    #[error("worker pool has been shut down")]
    Cancelled,
}

/// Error type for circuit breaker operations.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit is open, calls are not permitted.
    #[error("circuit breaker is open")]
    Open,

    /// The half-open trial admission cap is exhausted.
    #[error("too many requests")]
    TooManyRequests,

    /// The underlying operation failed.
    #[error("operation error: {0}")]
    Operation(#[source] E),
}

impl<E> BreakerError<E> {
    /// Returns true if the breaker refused to run the operation.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, BreakerError::Operation(_))
    }

    /// Splits a breaker rejection from an operation failure.
    ///
    /// Rejections come back as `Ok` with an error type that carries no
    /// payload, so they can be boxed independently of `E`.
    pub fn into_rejection(self) -> Result<BreakerError<Infallible>, E> {
        match self {
            BreakerError::Open => Ok(BreakerError::Open),
            BreakerError::TooManyRequests => Ok(BreakerError::TooManyRequests),
            BreakerError::Operation(e) => Err(e),
        }
    }
}

impl BreakerError<Infallible> {
    /// Converts a bare rejection into a breaker error over any operation error type.
    pub fn widen<E>(self) -> BreakerError<E> {
        match self {
            BreakerError::Open => BreakerError::Open,
            BreakerError::TooManyRequests => BreakerError::TooManyRequests,
            BreakerError::Operation(never) => match never {},
        }
    }
}

/// Invalid circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required setting was never supplied to the builder.
    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    /// `failure_threshold` must be at least one.
    #[error("failure_threshold must be greater than zero")]
    ZeroFailureThreshold,

    /// `success_threshold` must be at least one.
    #[error("success_threshold must be greater than zero")]
    ZeroSuccessThreshold,

    /// The half-open breaker could never admit enough trials to close.
    #[error("max_requests ({max_requests}) is below success_threshold ({success_threshold})")]
    MaxRequestsBelowSuccessThreshold {
        /// Configured half-open admission cap.
        max_requests: u32,
        /// Configured consecutive successes needed to close.
        success_threshold: u32,
    },
}
