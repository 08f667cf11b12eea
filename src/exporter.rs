//! Prometheus metric sink.

use std::time::Duration;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

use crate::metrics::{MetricSink, TaskOutcome};
use crate::state::State;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct TaskLabels {
    status: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BreakerLabels {
    name: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct CallLabels {
    service: String,
    status: String,
}

/// A [`MetricSink`] that feeds `prometheus-client` metric families.
///
/// Registers `worker_pool_tasks_total{status}`,
/// `circuit_breaker_state{name}` (0 closed, 1 open, 2 half-open) and
/// `external_api_calls_total{service,status}`.
#[derive(Clone, Default)]
pub struct PrometheusSink {
    tasks: Family<TaskLabels, Counter>,
    breaker_state: Family<BreakerLabels, Gauge>,
    calls: Family<CallLabels, Counter>,
}

impl PrometheusSink {
    /// Creates the metric families and registers them with `registry`.
    pub fn register(registry: &mut Registry) -> Self {
        let sink = Self::default();
        registry.register(
            "worker_pool_tasks",
            "Total number of worker pool tasks",
            sink.tasks.clone(),
        );
        registry.register(
            "circuit_breaker_state",
            "Circuit breaker state (0=closed, 1=open, 2=half-open)",
            sink.breaker_state.clone(),
        );
        registry.register(
            "external_api_calls",
            "Total number of external API calls",
            sink.calls.clone(),
        );
        sink
    }

    fn count_call(&self, breaker: &str, status: &str) {
        self.calls
            .get_or_create(&CallLabels {
                service: breaker.to_string(),
                status: status.to_string(),
            })
            .inc();
    }
}

impl MetricSink for PrometheusSink {
    fn record_state(&self, breaker: &str, state: State) {
        self.breaker_state
            .get_or_create(&BreakerLabels {
                name: breaker.to_string(),
            })
            .set(state.as_gauge());
    }

    fn record_call(&self, breaker: &str, success: bool, _duration: Duration) {
        self.count_call(breaker, if success { "success" } else { "failure" });
    }

    fn record_rejection(&self, breaker: &str, _state: State) {
        self.count_call(breaker, "rejected");
    }

    fn record_task(&self, outcome: TaskOutcome) {
        self.tasks
            .get_or_create(&TaskLabels {
                status: outcome.as_str().to_string(),
            })
            .inc();
    }
}
