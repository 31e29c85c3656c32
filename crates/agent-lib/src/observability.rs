//! Prometheus metrics for the eviction engine.

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge_vec,
    Histogram, IntCounter, IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;

use crate::types::{NodeCondition, Signal};

/// Buckets for the age of the statistics an eviction acted on (seconds).
const STATS_AGE_BUCKETS: &[f64] = &[0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

static GLOBAL_METRICS: OnceLock<EvictionMetricsInner> = OnceLock::new();

struct EvictionMetricsInner {
    evictions_total: IntCounterVec,
    eviction_stats_age_seconds: Histogram,
    node_condition: IntGaugeVec,
    reclaim_errors_total: IntCounter,
    notifier_errors_total: IntCounter,
}

impl EvictionMetricsInner {
    fn new() -> Self {
        Self {
            evictions_total: register_int_counter_vec!(
                "eviction_agent_evictions_total",
                "Workload evictions by the signal that triggered them",
                &["signal"]
            )
            .expect("Failed to register evictions_total"),

            eviction_stats_age_seconds: register_histogram!(
                "eviction_agent_stats_age_seconds",
                "Age of the statistics used when an eviction decision was made",
                STATS_AGE_BUCKETS.to_vec()
            )
            .expect("Failed to register stats_age_seconds"),

            node_condition: register_int_gauge_vec!(
                "eviction_agent_node_condition",
                "Whether a node pressure condition is currently advertised",
                &["condition"]
            )
            .expect("Failed to register node_condition"),

            reclaim_errors_total: register_int_counter!(
                "eviction_agent_reclaim_errors_total",
                "Failed node-level reclaim actions"
            )
            .expect("Failed to register reclaim_errors_total"),

            notifier_errors_total: register_int_counter!(
                "eviction_agent_notifier_errors_total",
                "Failed kernel threshold notifier updates"
            )
            .expect("Failed to register notifier_errors_total"),
        }
    }
}

/// Lightweight handle to the process-global eviction metrics.
#[derive(Clone, Default)]
pub struct EvictionMetrics {
    _private: (),
}

impl EvictionMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EvictionMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EvictionMetricsInner {
        GLOBAL_METRICS.get_or_init(EvictionMetricsInner::new)
    }

    pub fn inc_eviction(&self, signal: Signal) {
        self.inner()
            .evictions_total
            .with_label_values(&[signal.as_str()])
            .inc();
    }

    pub fn observe_stats_age(&self, age_secs: f64) {
        self.inner().eviction_stats_age_seconds.observe(age_secs);
    }

    pub fn set_condition(&self, condition: NodeCondition, active: bool) {
        self.inner()
            .node_condition
            .with_label_values(&[condition.as_str()])
            .set(i64::from(active));
    }

    pub fn inc_reclaim_error(&self) {
        self.inner().reclaim_errors_total.inc();
    }

    pub fn inc_notifier_error(&self) {
        self.inner().notifier_errors_total.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handle() {
        let metrics = EvictionMetrics::new();
        metrics.inc_eviction(Signal::MemoryAvailable);
        metrics.observe_stats_age(1.5);
        metrics.set_condition(NodeCondition::MemoryPressure, true);
        metrics.set_condition(NodeCondition::MemoryPressure, false);
        metrics.inc_reclaim_error();
        metrics.inc_notifier_error();
    }
}
