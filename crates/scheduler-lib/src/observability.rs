//! Observability infrastructure for the scheduler
//!
//! Provides:
//! - Prometheus metrics (clusters scanned, resources discovered/excluded,
//!   patch outcomes, discovery latency)
//! - Structured logging of scheduling events with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::models::{PatchStatus, ReconcileAction, ReconcileOutcome};

/// Histogram buckets for discovery passes (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<SchedulerMetricsInner> = OnceLock::new();

struct SchedulerMetricsInner {
    discovery_latency_seconds: Histogram,
    clusters_scanned: IntCounter,
    clusters_skipped: IntCounter,
    discovery_failures: IntCounter,
    resources_discovered: IntCounter,
    resources_excluded: IntCounter,
    patches: IntCounterVec,
}

impl SchedulerMetricsInner {
    fn new() -> Self {
        Self {
            discovery_latency_seconds: register_histogram!(
                "eks_scheduler_discovery_latency_seconds",
                "Time spent on a full discovery pass",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register discovery_latency_seconds"),

            clusters_scanned: register_int_counter!(
                "eks_scheduler_clusters_scanned_total",
                "Clusters that passed the schedule tag gate and were scanned"
            )
            .expect("Failed to register clusters_scanned"),

            clusters_skipped: register_int_counter!(
                "eks_scheduler_clusters_skipped_total",
                "Clusters skipped because they are not tagged for scheduling"
            )
            .expect("Failed to register clusters_skipped"),

            discovery_failures: register_int_counter!(
                "eks_scheduler_discovery_failures_total",
                "Cluster or workload listing failures during discovery"
            )
            .expect("Failed to register discovery_failures"),

            resources_discovered: register_int_counter!(
                "eks_scheduler_resources_discovered_total",
                "Workloads that satisfied the annotation contract"
            )
            .expect("Failed to register resources_discovered"),

            resources_excluded: register_int_counter!(
                "eks_scheduler_resources_excluded_total",
                "Workloads excluded because the annotation contract was not met"
            )
            .expect("Failed to register resources_excluded"),

            patches: register_int_counter_vec!(
                "eks_scheduler_patches_total",
                "Reconciliation patches by action and outcome",
                &["action", "status"]
            )
            .expect("Failed to register patches"),
        }
    }
}

/// Scheduler metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct SchedulerMetrics {
    _private: (),
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SchedulerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SchedulerMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_discovery_latency(&self, duration_secs: f64) {
        self.inner().discovery_latency_seconds.observe(duration_secs);
    }

    pub fn inc_clusters_scanned(&self) {
        self.inner().clusters_scanned.inc();
    }

    pub fn inc_clusters_skipped(&self) {
        self.inner().clusters_skipped.inc();
    }

    pub fn inc_discovery_failures(&self) {
        self.inner().discovery_failures.inc();
    }

    pub fn add_resources_discovered(&self, count: u64) {
        self.inner().resources_discovered.inc_by(count);
    }

    pub fn inc_resources_excluded(&self) {
        self.inner().resources_excluded.inc();
    }

    /// Count a reconciliation outcome
    pub fn record_outcome(&self, outcome: &ReconcileOutcome) {
        let action = match outcome.action {
            ReconcileAction::Stop => "stop",
            ReconcileAction::Start => "start",
        };
        let status = match outcome.status {
            PatchStatus::Succeeded => "succeeded",
            PatchStatus::Unchanged => "unchanged",
            PatchStatus::Failed(_) => "failed",
        };
        self.inner()
            .patches
            .with_label_values(&[action, status])
            .inc();
    }

    /// Render every registered metric in the text exposition format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// Structured logger for scheduling events
#[derive(Clone)]
pub struct StructuredLogger {
    account: String,
    region: String,
}

impl StructuredLogger {
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
        }
    }

    /// Log the start of a discovery pass
    pub fn log_discovery_started(&self, schedule_tag: &str) {
        info!(
            event = "discovery_started",
            account = %self.account,
            region = %self.region,
            schedule_tag = %schedule_tag,
            "Fetching eks deployments and rollouts"
        );
    }

    /// Log a finished discovery pass
    pub fn log_discovery_completed(
        &self,
        clusters_scanned: usize,
        resources: usize,
        failures: usize,
        elapsed_ms: u128,
    ) {
        info!(
            event = "discovery_completed",
            account = %self.account,
            region = %self.region,
            clusters_scanned = clusters_scanned,
            resources = resources,
            failures = failures,
            elapsed_ms = elapsed_ms,
            "Discovery pass complete"
        );
    }

    /// Log the outcome of a stop/start patch
    pub fn log_outcome(&self, outcome: &ReconcileOutcome) {
        let event = match outcome.action {
            ReconcileAction::Stop => "resource_stopped",
            ReconcileAction::Start => "resource_started",
        };
        match &outcome.status {
            PatchStatus::Failed(reason) => {
                warn!(
                    event = event,
                    account = %self.account,
                    region = %self.region,
                    resource = %outcome.key,
                    reason = %reason,
                    "Failed to reconcile resource"
                );
            }
            status => {
                info!(
                    event = event,
                    account = %self.account,
                    region = %self.region,
                    resource = %outcome.key,
                    state = %outcome.state,
                    unchanged = (*status == PatchStatus::Unchanged),
                    "Reconciled resource"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceState;

    #[test]
    fn test_scheduler_metrics_creation() {
        // Metrics live in the global registry; every handle shares them
        let metrics = SchedulerMetrics::new();
        metrics.observe_discovery_latency(0.5);
        metrics.inc_clusters_scanned();
        metrics.inc_clusters_skipped();
        metrics.inc_discovery_failures();
        metrics.add_resources_discovered(3);
        metrics.inc_resources_excluded();

        let rendered = metrics.render();
        assert!(rendered.contains("eks_scheduler_clusters_scanned_total"));
    }

    #[test]
    fn test_record_outcome_labels() {
        let metrics = SchedulerMetrics::new();
        metrics.record_outcome(&ReconcileOutcome {
            id: "d1".into(),
            key: "c1/ns/deployment/d1".into(),
            action: ReconcileAction::Stop,
            state: ResourceState::Stopped,
            status: PatchStatus::Failed("denied".into()),
        });

        let rendered = metrics.render();
        assert!(rendered.contains("action=\"stop\""));
        assert!(rendered.contains("status=\"failed\""));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("123456789012", "us-east-1");
        assert_eq!(logger.account, "123456789012");
        assert_eq!(logger.region, "us-east-1");
    }
}
