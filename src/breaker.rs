//! Core circuit breaker implementation.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{duration_ms, BreakerBuilder, BreakerConfig};
use crate::context::Context;
use crate::error::{BreakerError, BreakerResult, ConfigError};
use crate::hook::HookRegistry;
use crate::metrics::{MetricSink, NullMetricSink};
use crate::state::{Counts, State, StateMachine, Transition, Transitions};

/// Inner state of the circuit breaker, shared between clones.
struct BreakerInner {
    config: BreakerConfig,
    // Held only for bookkeeping, never while a protected call runs.
    machine: Mutex<StateMachine>,
    metric_sink: Arc<dyn MetricSink>,
    hooks: Arc<HookRegistry>,
}

/// A circuit breaker that can wrap function calls to prevent cascading failures.
///
/// State changes driven by elapsed time are applied lazily whenever the
/// breaker is used or inspected.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a circuit breaker from a complete configuration.
    pub fn new(config: BreakerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_parts(
            config,
            Arc::new(NullMetricSink),
            Arc::new(HookRegistry::new()),
        ))
    }

    /// Creates a new builder for the named breaker.
    pub fn builder(name: impl Into<String>) -> BreakerBuilder {
        BreakerBuilder::new(name)
    }

    pub(crate) fn with_parts(
        config: BreakerConfig,
        metric_sink: Arc<dyn MetricSink>,
        hooks: Arc<HookRegistry>,
    ) -> Self {
        debug!(
            circuit_breaker = %config.name,
            max_requests = config.max_requests,
            interval_ms = duration_ms(config.interval),
            timeout_ms = duration_ms(config.timeout),
            failure_threshold = config.failure_threshold,
            success_threshold = config.success_threshold,
            "Circuit breaker initialized"
        );
        metric_sink.record_state(&config.name, State::Closed);

        let machine = StateMachine::new(config.settings(), Instant::now());
        Self {
            inner: Arc::new(BreakerInner {
                config,
                machine: Mutex::new(machine),
                metric_sink,
                hooks,
            }),
        }
    }

    /// The name this breaker reports in logs and metrics.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// The configuration this breaker was built with.
    pub fn config(&self) -> &BreakerConfig {
        &self.inner.config
    }

    /// Gets the current state, applying any transition that is due.
    pub fn state(&self) -> State {
        let mut transitions = Transitions::new();
        let state = self
            .inner
            .machine
            .lock()
            .current(Instant::now(), &mut transitions);
        self.announce(&transitions);
        state
    }

    /// Gets a copy of the current counts, applying any rollover that is due.
    pub fn counts(&self) -> Counts {
        let mut transitions = Transitions::new();
        let counts = {
            let mut machine = self.inner.machine.lock();
            machine.current(Instant::now(), &mut transitions);
            machine.counts()
        };
        self.announce(&transitions);
        counts
    }

    /// Executes `f` if the breaker admits it, passing `ctx` through.
    ///
    /// If `f` panics, the call is recorded as a failure before the panic
    /// continues to unwind.
    pub fn execute<F, T, E>(&self, ctx: &Context, f: F) -> BreakerResult<T, E>
    where
        F: FnOnce(&Context) -> Result<T, E>,
    {
        if let Err(rejection) = self.before_call() {
            return Err(rejection.widen());
        }

        let pending = PendingCall::new(self);
        let result = f(ctx);
        pending.settle(result.is_ok());

        result.map_err(BreakerError::Operation)
    }

    /// Executes `f` with a background context.
    pub fn call<F, T, E>(&self, f: F) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.execute(&Context::background(), |_| f())
    }

    /// Forces the closed state and clears counts, whatever the current state.
    pub fn reset(&self) {
        let mut transitions = Transitions::new();
        self.inner
            .machine
            .lock()
            .reset(Instant::now(), &mut transitions);
        info!(circuit_breaker = %self.name(), "Circuit breaker reset");
        self.announce(&transitions);
    }

    /// Forces the open state. An already open breaker keeps its cool-down.
    pub fn force_open(&self) {
        let mut transitions = Transitions::new();
        self.inner
            .machine
            .lock()
            .force_open(Instant::now(), &mut transitions);
        self.announce(&transitions);
    }

    /// Checks admission and counts the request if allowed.
    fn before_call(&self) -> Result<(), BreakerError<Infallible>> {
        let mut transitions = Transitions::new();
        let admitted = self
            .inner
            .machine
            .lock()
            .before_request(Instant::now(), &mut transitions);
        self.announce(&transitions);

        if let Err(rejection) = &admitted {
            let state = match rejection {
                BreakerError::TooManyRequests => State::HalfOpen,
                _ => State::Open,
            };
            self.inner.metric_sink.record_rejection(self.name(), state);
            self.inner.hooks.execute_rejected_hook(self.name(), state);
        }

        admitted.map(|_| ())
    }

    /// Records the outcome of an admitted call.
    fn after_call(&self, success: bool, duration: Duration) {
        let mut transitions = Transitions::new();
        self.inner
            .machine
            .lock()
            .on_result(success, Instant::now(), &mut transitions);

        self.inner
            .metric_sink
            .record_call(self.name(), success, duration);
        self.inner.hooks.execute_outcome_hook(self.name(), success);
        self.announce(&transitions);
    }

    /// Logs, records and dispatches hooks for transitions, outside the lock.
    fn announce(&self, transitions: &[Transition]) {
        let name = self.name();
        for &Transition { from, to } in transitions {
            match (from, to) {
                (State::HalfOpen, State::Open) => {
                    warn!(circuit_breaker = %name, "Circuit breaker reopened")
                }
                (_, State::Open) => warn!(circuit_breaker = %name, "Circuit breaker opened"),
                (_, State::HalfOpen) => info!(circuit_breaker = %name, "Circuit breaker half-open"),
                (_, State::Closed) => info!(circuit_breaker = %name, "Circuit breaker closed"),
            }
            self.inner.metric_sink.record_state(name, to);
            self.inner.hooks.execute_state_change_hook(name, from, to);
        }
    }
}

/// An admitted call whose outcome has not been recorded yet.
///
/// Dropping it unsettled, through a panic or a cancelled future, records a
/// failure so the admission is never leaked.
struct PendingCall<'a> {
    breaker: &'a CircuitBreaker,
    start: Instant,
    settled: bool,
}

impl<'a> PendingCall<'a> {
    fn new(breaker: &'a CircuitBreaker) -> Self {
        Self {
            breaker,
            start: Instant::now(),
            settled: false,
        }
    }

    fn settle(mut self, success: bool) {
        self.settled = true;
        self.breaker.after_call(success, self.start.elapsed());
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!(
            circuit_breaker = %self.breaker.name(),
            "Admitted call abandoned before completing, recording a failure"
        );
        self.breaker.after_call(false, self.start.elapsed());
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.inner.config.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(feature = "async")]
impl CircuitBreaker {
    /// Executes an async function wrapped by the circuit breaker.
    ///
    /// The internal lock is never held across an await point. Dropping the
    /// returned future after the call was admitted counts as a failure.
    pub async fn execute_async<F, Fut, T, E>(&self, ctx: &Context, f: F) -> BreakerResult<T, E>
    where
        F: FnOnce(Context) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if let Err(rejection) = self.before_call() {
            return Err(rejection.widen());
        }

        let pending = PendingCall::new(self);
        let result = f(ctx.clone()).await;
        pending.settle(result.is_ok());

        result.map_err(BreakerError::Operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker(name: &str) -> CircuitBreaker {
        CircuitBreaker::builder(name)
            .max_requests(2)
            .interval(Duration::from_secs(60))
            .timeout(Duration::from_secs(60))
            .failure_threshold(2)
            .success_threshold(1)
            .build()
            .unwrap()
    }

    #[test]
    fn test_operation_error_is_wrapped() {
        let cb = breaker("storage");
        let result: BreakerResult<(), &str> = cb.call(|| Err("bucket unavailable"));
        assert!(matches!(result, Err(BreakerError::Operation("bucket unavailable"))));
        assert_eq!(cb.counts().consecutive_failures, 1);
    }

    #[test]
    fn test_context_is_passed_through() {
        let cb = breaker("bus");
        let (ctx, handle) = Context::with_cancel();
        handle.cancel();

        let seen = cb.execute(&ctx, |ctx| Ok::<_, ()>(ctx.is_cancelled()));
        assert!(matches!(seen, Ok(true)));
    }

    #[test]
    fn test_panicking_operation_records_failure() {
        let cb = breaker("object-store");
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            cb.call(|| -> Result<(), ()> { panic!("connection reset") })
        }));
        assert!(outcome.is_err());

        let counts = cb.counts();
        assert_eq!(counts.requests, 1);
        assert_eq!(counts.total_failures, 1);
        assert_eq!(counts.consecutive_failures, 1);
    }

    #[test]
    fn test_panicking_trial_reopens_half_open_breaker() {
        let cb = CircuitBreaker::builder("push")
            .max_requests(1)
            .interval(Duration::from_secs(60))
            .timeout(Duration::from_millis(20))
            .failure_threshold(1)
            .success_threshold(1)
            .build()
            .unwrap();
        let _ = cb.call(|| Err::<(), _>("unreachable"));
        std::thread::sleep(Duration::from_millis(40));

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            cb.call(|| -> Result<(), ()> { panic!("trial exploded") })
        }));
        assert!(outcome.is_err());
        assert_eq!(cb.state(), State::Open);
    }

    #[test]
    fn test_force_open_and_reset() {
        let cb = breaker("push");
        cb.force_open();
        assert_eq!(cb.state(), State::Open);
        assert!(matches!(cb.call(|| Ok::<_, ()>(())), Err(BreakerError::Open)));

        cb.reset();
        assert_eq!(cb.state(), State::Closed);
        assert!(cb.counts().is_zero());
    }

    #[test]
    fn test_hooks_fire_outside_lock() {
        let hooks = HookRegistry::new();
        let rejections = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&rejections);
        hooks.set_on_rejected(move |_, state| {
            assert_eq!(state, State::Open);
            r.fetch_add(1, Ordering::Relaxed);
        });

        let cb = CircuitBreaker::builder("sms")
            .max_requests(1)
            .interval(Duration::from_secs(60))
            .timeout(Duration::from_secs(60))
            .failure_threshold(1)
            .success_threshold(1)
            .hooks(hooks)
            .build()
            .unwrap();

        // A hook that re-enters the breaker would deadlock if run under the lock.
        let probe = cb.clone();
        cb.inner.hooks.set_on_state_change(move |_, _, to| {
            assert_eq!(probe.state(), to);
        });

        let _ = cb.call(|| Err::<(), _>("timeout"));
        let _ = cb.call(|| Ok::<_, &str>(()));
        assert_eq!(rejections.load(Ordering::Relaxed), 1);
    }
}
