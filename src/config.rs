//! Configuration for circuit breakers and worker pools.

use std::sync::Arc;
use std::time::Duration;

use crate::breaker::CircuitBreaker;
use crate::error::ConfigError;
use crate::hook::HookRegistry;
use crate::metrics::{MetricSink, NullMetricSink};
use crate::pool::WorkerPool;
use crate::state::Settings;

/// Hard ceiling on how long [`WorkerPool::shutdown`] waits for workers.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Whole milliseconds in `d` for log fields, saturating at `u64::MAX`.
pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Settings for one circuit breaker. Every value is supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Name used to label logs and metrics.
    pub name: String,
    /// Maximum trial calls admitted while half-open.
    pub max_requests: u32,
    /// Length of the closed-state counting window. Zero disables rollover.
    pub interval: Duration,
    /// Cool-down spent open before trial calls are admitted.
    pub timeout: Duration,
    /// Consecutive failures that trip a closed breaker.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the breaker.
    pub success_threshold: u32,
}

impl BreakerConfig {
    /// Checks that the thresholds describe a breaker that can always recover.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::ZeroSuccessThreshold);
        }
        // A half-open breaker that admits fewer trials than it needs
        // successes would stall on TooManyRequests forever.
        if self.max_requests < self.success_threshold {
            return Err(ConfigError::MaxRequestsBelowSuccessThreshold {
                max_requests: self.max_requests,
                success_threshold: self.success_threshold,
            });
        }
        Ok(())
    }

    pub(crate) fn settings(&self) -> Settings {
        Settings {
            max_requests: self.max_requests,
            interval: self.interval,
            timeout: self.timeout,
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
        }
    }
}

/// Builder for creating circuit breakers with custom configurations.
pub struct BreakerBuilder {
    name: String,
    max_requests: Option<u32>,
    interval: Option<Duration>,
    timeout: Option<Duration>,
    failure_threshold: Option<u32>,
    success_threshold: Option<u32>,
    metric_sink: Arc<dyn MetricSink>,
    hook_registry: Arc<HookRegistry>,
}

impl BreakerBuilder {
    /// Creates a new builder for the named breaker with nothing configured.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_requests: None,
            interval: None,
            timeout: None,
            failure_threshold: None,
            success_threshold: None,
            metric_sink: Arc::new(NullMetricSink),
            hook_registry: Arc::new(HookRegistry::new()),
        }
    }

    /// Starts from an existing configuration.
    pub fn from_config(config: BreakerConfig) -> Self {
        Self::new(config.name)
            .max_requests(config.max_requests)
            .interval(config.interval)
            .timeout(config.timeout)
            .failure_threshold(config.failure_threshold)
            .success_threshold(config.success_threshold)
    }

    /// Sets the number of trial calls admitted while half-open.
    pub fn max_requests(mut self, max_requests: u32) -> Self {
        self.max_requests = Some(max_requests);
        self
    }

    /// Sets the closed-state window after which counts are discarded.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Sets the cool-down before the circuit transitions from open to half-open.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the number of consecutive failures required to trip the circuit.
    pub fn failure_threshold(mut self, count: u32) -> Self {
        self.failure_threshold = Some(count);
        self
    }

    /// Sets the number of consecutive successes required to close the circuit.
    pub fn success_threshold(mut self, count: u32) -> Self {
        self.success_threshold = Some(count);
        self
    }

    /// Sets a metric sink for the circuit breaker.
    pub fn metric_sink<M: MetricSink>(self, sink: M) -> Self {
        self.shared_metric_sink(Arc::new(sink))
    }

    /// Sets a metric sink that is shared with other breakers or pools.
    pub fn shared_metric_sink(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.metric_sink = sink;
        self
    }

    /// Sets a hook registry for the circuit breaker.
    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.hook_registry = Arc::new(hooks);
        self
    }

    /// Resolves and validates the configuration without building a breaker.
    pub fn config(&self) -> Result<BreakerConfig, ConfigError> {
        let config = BreakerConfig {
            name: self.name.clone(),
            max_requests: self.max_requests.ok_or(ConfigError::Missing("max_requests"))?,
            interval: self.interval.ok_or(ConfigError::Missing("interval"))?,
            timeout: self.timeout.ok_or(ConfigError::Missing("timeout"))?,
            failure_threshold: self
                .failure_threshold
                .ok_or(ConfigError::Missing("failure_threshold"))?,
            success_threshold: self
                .success_threshold
                .ok_or(ConfigError::Missing("success_threshold"))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Builds a new circuit breaker with the configured settings.
    pub fn build(self) -> Result<CircuitBreaker, ConfigError> {
        let config = self.config()?;
        Ok(CircuitBreaker::with_parts(
            config,
            self.metric_sink,
            self.hook_registry,
        ))
    }
}

/// What [`WorkerPool::shutdown`] does with tasks still waiting in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownPolicy {
    /// Cancel immediately. Each idle worker races the cancellation signal
    /// against the next queued task, so queued work may or may not run.
    #[default]
    Race,

    /// Stop accepting, let workers empty the queue within the shutdown
    /// timeout, then cancel.
    Drain,
}

/// Settings for a worker pool. Sizes are fixed for the pool's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads. Zero yields a pool that queues but never runs.
    pub workers: usize,
    /// Bounded queue capacity.
    pub queue_capacity: usize,
    /// Upper bound on the shutdown wait.
    pub shutdown_timeout: Duration,
    /// Treatment of queued tasks at shutdown.
    pub shutdown_policy: ShutdownPolicy,
}

impl PoolConfig {
    /// Creates a configuration with the default shutdown behavior.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        Self {
            workers,
            queue_capacity,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            shutdown_policy: ShutdownPolicy::default(),
        }
    }
}

/// Builder for worker pools.
pub struct PoolBuilder {
    config: PoolConfig,
    metric_sink: Arc<dyn MetricSink>,
}

impl PoolBuilder {
    /// Creates a builder for `workers` threads sharing a queue of `queue_capacity`.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        Self {
            config: PoolConfig::new(workers, queue_capacity),
            metric_sink: Arc::new(NullMetricSink),
        }
    }

    /// Sets the upper bound on the shutdown wait.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Sets how queued tasks are treated at shutdown.
    pub fn shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.config.shutdown_policy = policy;
        self
    }

    /// Sets a metric sink for the pool.
    pub fn metric_sink<M: MetricSink>(self, sink: M) -> Self {
        self.shared_metric_sink(Arc::new(sink))
    }

    /// Sets a metric sink that is shared with breakers or other pools.
    pub fn shared_metric_sink(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.metric_sink = sink;
        self
    }

    /// Starts the pool. Workers begin polling the queue immediately.
    pub fn build(self) -> WorkerPool {
        WorkerPool::with_parts(self.config, self.metric_sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sms_config() -> BreakerConfig {
        BreakerConfig {
            name: "sms-gateway".to_string(),
            max_requests: 5,
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
            failure_threshold: 5,
            success_threshold: 2,
        }
    }

    #[test]
    fn test_valid_config() {
        assert_eq!(sms_config().validate(), Ok(()));
        let built = BreakerBuilder::from_config(sms_config()).config();
        assert_eq!(built, Ok(sms_config()));
    }

    #[test]
    fn test_missing_setting() {
        let result = BreakerBuilder::new("storage")
            .max_requests(1)
            .interval(Duration::from_secs(1))
            .failure_threshold(1)
            .success_threshold(1)
            .config();
        assert_eq!(result, Err(ConfigError::Missing("timeout")));
    }

    #[test]
    fn test_rejects_unreachable_half_open_close() {
        let config = BreakerConfig {
            max_requests: 1,
            success_threshold: 2,
            ..sms_config()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::MaxRequestsBelowSuccessThreshold {
                max_requests: 1,
                success_threshold: 2
            })
        );
    }

    #[test]
    fn test_rejects_zero_thresholds() {
        let config = BreakerConfig {
            failure_threshold: 0,
            ..sms_config()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroFailureThreshold));

        let config = BreakerConfig {
            success_threshold: 0,
            ..sms_config()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroSuccessThreshold));
    }

    #[test]
    fn test_duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_micros(2_500)), 2);
        assert_eq!(duration_ms(Duration::from_secs(30)), 30_000);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::new(4, 100);
        assert_eq!(config.shutdown_timeout, DEFAULT_SHUTDOWN_TIMEOUT);
        assert_eq!(config.shutdown_policy, ShutdownPolicy::Race);
    }
}
