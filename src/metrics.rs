//! Metric sinks and worker pool counters.

use parking_lot::Mutex;
use std::time::Duration;

use crate::state::State;

/// Lifecycle event of a task handed to a worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskOutcome {
    /// `submit` was called, whether or not the task was accepted.
    Submitted,
    /// The task body returned success.
    Completed,
    /// The task body returned an error or panicked.
    Failed,
    /// The task never entered the queue.
    Rejected,
}

impl TaskOutcome {
    /// Label used for the `status` dimension of task metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskOutcome::Submitted => "submitted",
            TaskOutcome::Completed => "completed",
            TaskOutcome::Failed => "failed",
            TaskOutcome::Rejected => "rejected",
        }
    }
}

/// Trait for metrics sinks that can receive breaker and pool events.
pub trait MetricSink: Send + Sync + 'static {
    /// Records the state a breaker has just entered.
    fn record_state(&self, breaker: &str, state: State);

    /// Records the outcome of a call a breaker admitted.
    fn record_call(&self, breaker: &str, success: bool, duration: Duration);

    /// Records a call a breaker refused while in `state`.
    fn record_rejection(&self, breaker: &str, state: State);

    /// Records a worker pool task event.
    fn record_task(&self, outcome: TaskOutcome);
}

/// A null metrics sink that discards all events.
pub struct NullMetricSink;

impl MetricSink for NullMetricSink {
    fn record_state(&self, _breaker: &str, _state: State) {}
    fn record_call(&self, _breaker: &str, _success: bool, _duration: Duration) {}
    fn record_rejection(&self, _breaker: &str, _state: State) {}
    fn record_task(&self, _outcome: TaskOutcome) {}
}

/// Snapshot of worker pool counters. All four only ever increase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Every `submit` call, including rejected ones.
    pub submitted: u64,
    /// Tasks that ran and returned success.
    pub completed: u64,
    /// Tasks that ran and returned an error or panicked.
    pub failed: u64,
    /// Submissions refused because the queue was full or the pool was cancelled.
    pub rejected: u64,
}

impl PoolMetrics {
    /// Tasks accepted into the queue.
    pub fn accepted(&self) -> u64 {
        self.submitted.saturating_sub(self.rejected)
    }

    /// Accepted tasks that have not finished, queued or running.
    pub fn in_flight(&self) -> u64 {
        self.accepted()
            .saturating_sub(self.completed)
            .saturating_sub(self.failed)
    }
}

/// Lock-protected pool counters; snapshots are copied out under the lock.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    inner: Mutex<PoolMetrics>,
}

impl PoolCounters {
    pub fn increment(&self, outcome: TaskOutcome) {
        let mut metrics = self.inner.lock();
        match outcome {
            TaskOutcome::Submitted => metrics.submitted += 1,
            TaskOutcome::Completed => metrics.completed += 1,
            TaskOutcome::Failed => metrics.failed += 1,
            TaskOutcome::Rejected => metrics.rejected += 1,
        }
    }

    pub fn snapshot(&self) -> PoolMetrics {
        *self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let counters = PoolCounters::default();
        for _ in 0..10 {
            counters.increment(TaskOutcome::Submitted);
        }
        for _ in 0..5 {
            counters.increment(TaskOutcome::Completed);
        }
        counters.increment(TaskOutcome::Failed);
        counters.increment(TaskOutcome::Rejected);

        let metrics = counters.snapshot();
        assert_eq!(
            metrics,
            PoolMetrics {
                submitted: 10,
                completed: 5,
                failed: 1,
                rejected: 1,
            }
        );
        assert_eq!(metrics.accepted(), 9);
        assert_eq!(metrics.in_flight(), 3);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let counters = PoolCounters::default();
        let before = counters.snapshot();
        counters.increment(TaskOutcome::Submitted);
        assert_eq!(before.submitted, 0);
        assert_eq!(counters.snapshot().submitted, 1);
    }

    #[test]
    fn test_outcome_labels() {
        let labels: Vec<_> = [
            TaskOutcome::Submitted,
            TaskOutcome::Completed,
            TaskOutcome::Failed,
            TaskOutcome::Rejected,
        ]
        .iter()
        .map(|o| o.as_str())
        .collect();
        assert_eq!(labels, ["submitted", "completed", "failed", "rejected"]);
    }
}
