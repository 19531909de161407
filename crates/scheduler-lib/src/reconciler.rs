//! Stop/start reconciliation
//!
//! Stopping a workload scales it to zero and records the replica count it
//! had in the `replicas` annotation; starting restores that count. The saved
//! annotation is the only durable record of the original scale, so a stop is
//! never sent for a workload that is already at zero.
//!
//! Both operations return lazy streams: each resource is patched only when
//! the consumer polls for its outcome, strictly one after another.

use crate::auth::TOKEN_EXPIRY;
use crate::cache::ConnectionCache;
use crate::error::{with_timeout, Result, SchedulerError};
use crate::models::{
    BatchReport, PatchStatus, ReconcileAction, ReconcileOutcome, SchedulableResource,
    SAVED_REPLICAS_ANNOTATION,
};
use crate::observability::SchedulerMetrics;
use crate::platform::{ClusterSession, SessionFactory};
use futures::stream::{self, Stream, StreamExt};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Merge patch scaling a workload to zero while saving `current_replicas`
pub fn stop_patch(current_replicas: i32) -> Value {
    let mut annotations = Map::new();
    annotations.insert(
        SAVED_REPLICAS_ANNOTATION.to_string(),
        Value::String(current_replicas.to_string()),
    );
    json!({
        "spec": { "replicas": 0 },
        "metadata": { "annotations": annotations }
    })
}

/// Merge patch restoring the saved replica count
pub fn start_patch(saved_replicas: i32) -> Value {
    json!({ "spec": { "replicas": saved_replicas } })
}

/// The patch an action would send for a resource, or `None` when nothing
/// must be sent
pub fn plan(action: ReconcileAction, resource: &SchedulableResource) -> Option<Value> {
    match action {
        // Re-stopping would overwrite the saved count with zero
        ReconcileAction::Stop if resource.current_replicas == 0 => None,
        ReconcileAction::Stop => Some(stop_patch(resource.current_replicas)),
        ReconcileAction::Start => Some(start_patch(resource.saved_replicas)),
    }
}

/// Drain an outcome stream into a batch report
pub async fn collect_report<S>(outcomes: S) -> BatchReport
where
    S: Stream<Item = ReconcileOutcome>,
{
    let outcomes: Vec<ReconcileOutcome> = outcomes.collect().await;
    BatchReport { outcomes }
}

/// Sessions opened during one batch, with the time each was opened
type OpenSessions = HashMap<String, (Arc<dyn ClusterSession>, Instant)>;

/// Applies stop/start patches through cached cluster connections
#[derive(Clone)]
pub struct Reconciler {
    sessions: Arc<dyn SessionFactory>,
    cache: Arc<ConnectionCache>,
    timeout: Duration,
    /// Sessions carry a bearer token, so they are reopened once this old
    session_max_age: Duration,
    metrics: SchedulerMetrics,
}

impl Reconciler {
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        cache: Arc<ConnectionCache>,
        timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            cache,
            timeout,
            session_max_age: TOKEN_EXPIRY,
            metrics: SchedulerMetrics::new(),
        }
    }

    /// Same reconciler reopening cluster sessions after `max_age`
    pub fn with_session_max_age(mut self, max_age: Duration) -> Self {
        self.session_max_age = max_age;
        self
    }

    /// Scale each resource to zero, saving its current replica count
    pub fn stop(
        &self,
        resources: Vec<SchedulableResource>,
    ) -> impl Stream<Item = ReconcileOutcome> {
        self.run(ReconcileAction::Stop, resources)
    }

    /// Restore each resource to its saved replica count
    pub fn start(
        &self,
        resources: Vec<SchedulableResource>,
    ) -> impl Stream<Item = ReconcileOutcome> {
        self.run(ReconcileAction::Start, resources)
    }

    fn run(
        &self,
        action: ReconcileAction,
        resources: Vec<SchedulableResource>,
    ) -> impl Stream<Item = ReconcileOutcome> {
        let sessions = OpenSessions::new();

        stream::unfold(
            (self.clone(), resources.into_iter(), sessions),
            move |(reconciler, mut pending, mut sessions)| async move {
                let resource = pending.next()?;
                let outcome = reconciler.reconcile(action, &resource, &mut sessions).await;
                Some((outcome, (reconciler, pending, sessions)))
            },
        )
    }

    async fn reconcile(
        &self,
        action: ReconcileAction,
        resource: &SchedulableResource,
        sessions: &mut OpenSessions,
    ) -> ReconcileOutcome {
        let status = match plan(action, resource) {
            None => {
                debug!(resource = %resource.key(), "Already stopped, keeping saved replicas");
                PatchStatus::Unchanged
            }
            Some(body) => match self.apply(resource, &body, sessions).await {
                Ok(()) => PatchStatus::Succeeded,
                Err(e) => {
                    error!(
                        resource = %resource.key(),
                        action = ?action,
                        error = %e,
                        "Failed to patch {}",
                        resource.kind
                    );
                    PatchStatus::Failed(e.to_string())
                }
            },
        };

        let outcome = ReconcileOutcome {
            id: resource.id.clone(),
            key: resource.key(),
            action,
            state: action.target_state(),
            status,
        };
        self.metrics.record_outcome(&outcome);
        outcome
    }

    async fn apply(
        &self,
        resource: &SchedulableResource,
        body: &Value,
        sessions: &mut OpenSessions,
    ) -> Result<()> {
        let session = match sessions.get(&resource.cluster) {
            Some((session, opened)) if opened.elapsed() < self.session_max_age => session.clone(),
            _ => {
                let connection = self.cache.get(&resource.cluster).ok_or_else(|| {
                    warn!(cluster = %resource.cluster, "Cluster connection missing from cache");
                    SchedulerError::MissingConnection(resource.cluster.clone())
                })?;
                let session = with_timeout(
                    format!("connect to cluster {}", resource.cluster),
                    self.timeout,
                    self.sessions.connect(&connection),
                )
                .await?;
                sessions.insert(resource.cluster.clone(), (session.clone(), Instant::now()));
                session
            }
        };

        let workloads = session.workloads(resource.kind);
        with_timeout(
            format!("patch {}", resource.key()),
            self.timeout,
            workloads.patch(&resource.name, &resource.namespace, body),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::determiner::normalize;
    use crate::models::{ClusterConnection, ResourceState, WorkloadKind};
    use crate::platform::fake::{workload, FakePlatform};

    fn setup(platform: &FakePlatform, clusters: &[&str]) -> Reconciler {
        let cache = Arc::new(ConnectionCache::new());
        for cluster in clusters {
            cache.put(
                *cluster,
                ClusterConnection {
                    cluster: cluster.to_string(),
                    endpoint: format!("https://{}.eks.example.com", cluster),
                    certificate_authority: format!("{}-ca", cluster),
                },
            );
        }
        Reconciler::new(Arc::new(platform.clone()), cache, Duration::from_secs(5))
    }

    /// Re-read a resource from the fake platform, as a new discovery pass would
    fn rediscover(platform: &FakePlatform, kind: WorkloadKind, name: &str) -> SchedulableResource {
        let record = platform.record("c1", kind, name).unwrap();
        normalize(kind, &record, "c1", "Schedule").unwrap()
    }

    #[test]
    fn test_patch_bodies() {
        assert_eq!(
            stop_patch(3),
            json!({"spec": {"replicas": 0}, "metadata": {"annotations": {"replicas": "3"}}})
        );
        assert_eq!(start_patch(5), json!({"spec": {"replicas": 5}}));
    }

    #[tokio::test]
    async fn test_stop_start_round_trip() {
        let platform = FakePlatform::new();
        platform.add_cluster("c1", &[("Schedule", "on")]);
        platform.add_workload(
            "c1",
            WorkloadKind::Deployment,
            workload("d1", "ns", 7, &[("Schedule", "office"), ("replicas", "2")]),
        );
        let reconciler = setup(&platform, &["c1"]);

        let running = rediscover(&platform, WorkloadKind::Deployment, "d1");
        let report = collect_report(reconciler.stop(vec![running])).await;
        assert_eq!(report.succeeded(), 1);
        assert_eq!(platform.replicas("c1", WorkloadKind::Deployment, "d1"), Some(0));
        assert_eq!(
            platform.saved_annotation("c1", WorkloadKind::Deployment, "d1").as_deref(),
            Some("7")
        );

        let stopped = rediscover(&platform, WorkloadKind::Deployment, "d1");
        assert_eq!(stopped.state, ResourceState::Stopped);
        let report = collect_report(reconciler.start(vec![stopped])).await;
        assert_eq!(report.succeeded(), 1);
        assert_eq!(platform.replicas("c1", WorkloadKind::Deployment, "d1"), Some(7));
    }

    #[tokio::test]
    async fn test_repeated_stop_keeps_first_saved_value() {
        let platform = FakePlatform::new();
        platform.add_cluster("c1", &[("Schedule", "on")]);
        platform.add_workload(
            "c1",
            WorkloadKind::Rollout,
            workload("r1", "ns", 4, &[("Schedule", "office"), ("replicas", "4")]),
        );
        let reconciler = setup(&platform, &["c1"]);

        let first = rediscover(&platform, WorkloadKind::Rollout, "r1");
        collect_report(reconciler.stop(vec![first])).await;

        let second = rediscover(&platform, WorkloadKind::Rollout, "r1");
        let report = collect_report(reconciler.stop(vec![second])).await;

        assert_eq!(report.unchanged(), 1);
        assert_eq!(platform.patches().len(), 1);
        assert_eq!(
            platform.saved_annotation("c1", WorkloadKind::Rollout, "r1").as_deref(),
            Some("4")
        );
    }

    #[tokio::test]
    async fn test_kind_dispatch() {
        let platform = FakePlatform::new();
        platform.add_cluster("c1", &[("Schedule", "on")]);
        platform.add_workload(
            "c1",
            WorkloadKind::Rollout,
            workload("shared", "ns", 2, &[("Schedule", "office"), ("replicas", "2")]),
        );
        platform.add_workload(
            "c1",
            WorkloadKind::Deployment,
            workload("shared", "ns", 3, &[("Schedule", "office"), ("replicas", "3")]),
        );
        let reconciler = setup(&platform, &["c1"]);

        let rollout = rediscover(&platform, WorkloadKind::Rollout, "shared");
        collect_report(reconciler.stop(vec![rollout])).await;

        assert_eq!(platform.replicas("c1", WorkloadKind::Rollout, "shared"), Some(0));
        assert_eq!(platform.replicas("c1", WorkloadKind::Deployment, "shared"), Some(3));
        assert_eq!(platform.patches()[0].1, WorkloadKind::Rollout);
    }

    #[tokio::test]
    async fn test_patch_failure_is_reported_and_batch_continues() {
        let platform = FakePlatform::new();
        platform.add_cluster("c1", &[("Schedule", "on")]);
        for name in ["a", "b"] {
            platform.add_workload(
                "c1",
                WorkloadKind::Deployment,
                workload(name, "ns", 1, &[("Schedule", "office"), ("replicas", "1")]),
            );
        }
        platform.fail_patch("c1", "a");
        let reconciler = setup(&platform, &["c1"]);

        let resources = vec![
            rediscover(&platform, WorkloadKind::Deployment, "a"),
            rediscover(&platform, WorkloadKind::Deployment, "b"),
        ];
        let report = collect_report(reconciler.stop(resources)).await;

        assert_eq!(report.outcomes.len(), 2);
        assert!(report.outcomes[0].status.is_failure());
        assert_eq!(report.outcomes[0].state, ResourceState::Stopped);
        assert_eq!(report.outcomes[1].status, PatchStatus::Succeeded);
        assert_eq!(platform.replicas("c1", WorkloadKind::Deployment, "b"), Some(0));
    }

    #[tokio::test]
    async fn test_missing_connection_fails_resource() {
        let platform = FakePlatform::new();
        platform.add_cluster("c1", &[("Schedule", "on")]);
        platform.add_workload(
            "c1",
            WorkloadKind::Deployment,
            workload("d1", "ns", 2, &[("Schedule", "office"), ("replicas", "2")]),
        );
        let reconciler = setup(&platform, &[]);

        let resource = rediscover(&platform, WorkloadKind::Deployment, "d1");
        let report = collect_report(reconciler.stop(vec![resource])).await;

        assert!(matches!(
            &report.outcomes[0].status,
            PatchStatus::Failed(reason) if reason.contains("c1")
        ));
        assert!(platform.patches().is_empty());
    }

    #[tokio::test]
    async fn test_stream_is_lazy() {
        let platform = FakePlatform::new();
        platform.add_cluster("c1", &[("Schedule", "on")]);
        for name in ["a", "b", "c"] {
            platform.add_workload(
                "c1",
                WorkloadKind::Deployment,
                workload(name, "ns", 2, &[("Schedule", "office"), ("replicas", "2")]),
            );
        }
        let reconciler = setup(&platform, &["c1"]);
        let resources: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|n| rediscover(&platform, WorkloadKind::Deployment, n))
            .collect();

        let outcomes = reconciler.stop(resources);
        assert!(platform.patches().is_empty());

        let first: Vec<_> = outcomes.take(1).collect().await;
        assert_eq!(first.len(), 1);
        assert_eq!(platform.patches().len(), 1);
        assert_eq!(platform.replicas("c1", WorkloadKind::Deployment, "b"), Some(2));
    }

    #[tokio::test]
    async fn test_session_reused_within_batch() {
        let platform = FakePlatform::new();
        platform.add_cluster("c1", &[("Schedule", "on")]);
        for name in ["a", "b"] {
            platform.add_workload(
                "c1",
                WorkloadKind::Deployment,
                workload(name, "ns", 0, &[("Schedule", "office"), ("replicas", "3")]),
            );
        }
        let reconciler = setup(&platform, &["c1"]);
        let resources = vec![
            rediscover(&platform, WorkloadKind::Deployment, "a"),
            rediscover(&platform, WorkloadKind::Deployment, "b"),
        ];

        let report = collect_report(reconciler.start(resources)).await;

        assert_eq!(report.succeeded(), 2);
        assert_eq!(platform.connections().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_session_is_reopened() {
        let platform = FakePlatform::new();
        platform.add_cluster("c1", &[("Schedule", "on")]);
        for name in ["a", "b"] {
            platform.add_workload(
                "c1",
                WorkloadKind::Deployment,
                workload(name, "ns", 0, &[("Schedule", "office"), ("replicas", "3")]),
            );
        }
        let reconciler = setup(&platform, &["c1"]).with_session_max_age(Duration::ZERO);
        let resources = vec![
            rediscover(&platform, WorkloadKind::Deployment, "a"),
            rediscover(&platform, WorkloadKind::Deployment, "b"),
        ];

        let report = collect_report(reconciler.start(resources)).await;

        assert_eq!(report.succeeded(), 2);
        assert_eq!(platform.connections().len(), 2);
    }
}
