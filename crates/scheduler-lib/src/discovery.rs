//! Schedulable workload discovery
//!
//! Walks every cluster in the account/region, skips the ones not tagged for
//! scheduling, resolves connection details through the [`ConnectionCache`]
//! and lists deployments and rollouts carrying the schedule annotation.
//! Failures are isolated to the cluster (or cluster/kind pair) they concern.

use crate::cache::ConnectionCache;
use crate::error::{with_timeout, Result};
use crate::models::{
    ClusterConnection, RawWorkload, ScheduleTagFilter, WorkloadKind, DEFAULT_SCHEDULE_TAG,
};
use crate::observability::SchedulerMetrics;
use crate::platform::{ClusterDescription, ComputeApi, SessionFactory};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Parameters of a discovery pass
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Cluster tag gate
    pub filter: ScheduleTagFilter,
    /// Annotation key naming the schedule of a workload
    pub schedule_tag: String,
    /// Number of clusters scanned at once
    pub cluster_concurrency: usize,
    /// Deadline for each API call
    pub request_timeout: Duration,
    /// Restrict the pass to a single cluster
    pub cluster: Option<String>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            filter: ScheduleTagFilter::default(),
            schedule_tag: DEFAULT_SCHEDULE_TAG.to_string(),
            cluster_concurrency: 1,
            request_timeout: Duration::from_secs(30),
            cluster: None,
        }
    }
}

/// A cluster, or a workload kind within it, that could not be scanned
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryFailure {
    pub cluster: String,
    pub kind: Option<WorkloadKind>,
    pub error: String,
}

/// Everything a discovery pass found
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub workloads: Vec<RawWorkload>,
    pub clusters_scanned: Vec<String>,
    pub clusters_skipped: Vec<String>,
    pub failures: Vec<DiscoveryFailure>,
}

impl DiscoveryReport {
    fn merge(&mut self, scan: ClusterScan) {
        match scan.outcome {
            ScanOutcome::Scanned => self.clusters_scanned.push(scan.cluster),
            ScanOutcome::Skipped => self.clusters_skipped.push(scan.cluster),
            ScanOutcome::Failed => {}
        }
        self.workloads.extend(scan.workloads);
        self.failures.extend(scan.failures);
    }
}

enum ScanOutcome {
    Scanned,
    Skipped,
    Failed,
}

struct ClusterScan {
    cluster: String,
    outcome: ScanOutcome,
    workloads: Vec<RawWorkload>,
    failures: Vec<DiscoveryFailure>,
}

impl ClusterScan {
    fn new(cluster: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
            outcome: ScanOutcome::Scanned,
            workloads: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn skipped(mut self) -> Self {
        self.outcome = ScanOutcome::Skipped;
        self
    }

    fn failed(mut self, error: impl ToString) -> Self {
        self.failures.push(DiscoveryFailure {
            cluster: self.cluster.clone(),
            kind: None,
            error: error.to_string(),
        });
        self.outcome = ScanOutcome::Failed;
        self
    }
}

/// Returns true when the record's annotations contain `schedule_tag`
pub fn has_schedule_annotation(record: &serde_json::Value, schedule_tag: &str) -> bool {
    record
        .pointer("/metadata/annotations")
        .and_then(|a| a.as_object())
        .map(|a| a.contains_key(schedule_tag))
        .unwrap_or(false)
}

/// Discovers schedulable workloads across all tagged clusters
pub struct Discoverer {
    compute: Arc<dyn ComputeApi>,
    sessions: Arc<dyn SessionFactory>,
    cache: Arc<ConnectionCache>,
    metrics: SchedulerMetrics,
}

impl Discoverer {
    pub fn new(
        compute: Arc<dyn ComputeApi>,
        sessions: Arc<dyn SessionFactory>,
        cache: Arc<ConnectionCache>,
    ) -> Self {
        Self {
            compute,
            sessions,
            cache,
            metrics: SchedulerMetrics::new(),
        }
    }

    /// Connection cache shared with the reconciler
    pub fn cache(&self) -> Arc<ConnectionCache> {
        self.cache.clone()
    }

    /// Run a discovery pass. Only a failure to list clusters is fatal.
    pub async fn discover(&self, options: &DiscoveryOptions) -> Result<DiscoveryReport> {
        let start = Instant::now();

        let mut clusters = with_timeout(
            "list clusters",
            options.request_timeout,
            self.compute.list_clusters(),
        )
        .await?;
        if let Some(only) = &options.cluster {
            clusters.retain(|c| c == only);
        }
        debug!(count = clusters.len(), "Clusters to inspect");

        let scans: Vec<ClusterScan> = stream::iter(clusters)
            .map(|cluster| self.scan_cluster(cluster, options))
            .buffered(options.cluster_concurrency.max(1))
            .collect()
            .await;

        let mut report = DiscoveryReport::default();
        for scan in scans {
            report.merge(scan);
        }

        self.metrics
            .observe_discovery_latency(start.elapsed().as_secs_f64());
        info!(
            scanned = report.clusters_scanned.len(),
            skipped = report.clusters_skipped.len(),
            workloads = report.workloads.len(),
            failures = report.failures.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Discovery pass complete"
        );
        Ok(report)
    }

    async fn scan_cluster(&self, cluster: String, options: &DiscoveryOptions) -> ClusterScan {
        let scan = ClusterScan::new(&cluster);

        let description = match with_timeout(
            format!("describe cluster {}", cluster),
            options.request_timeout,
            self.compute.describe_cluster(&cluster),
        )
        .await
        {
            Ok(description) => description,
            Err(e) => {
                warn!(cluster = %cluster, error = %e, "Could not describe cluster");
                self.metrics.inc_discovery_failures();
                return scan.failed(e);
            }
        };

        if !options.filter.matches(&description.tags) {
            debug!(
                cluster = %cluster,
                tag = %options.filter.key,
                "Cluster not tagged for scheduling"
            );
            self.metrics.inc_clusters_skipped();
            return scan.skipped();
        }

        let connection = match self.resolve_connection(&cluster, &description) {
            Some(connection) => connection,
            None => {
                warn!(cluster = %cluster, "No usable connection for cluster");
                self.metrics.inc_discovery_failures();
                return scan.failed(
                    "cluster has no endpoint/certificate authority or the connection cache is full",
                );
            }
        };

        let session = match with_timeout(
            format!("connect to cluster {}", cluster),
            options.request_timeout,
            self.sessions.connect(&connection),
        )
        .await
        {
            Ok(session) => session,
            Err(e) => {
                warn!(cluster = %cluster, error = %e, "Could not open cluster session");
                self.metrics.inc_discovery_failures();
                return scan.failed(e);
            }
        };

        self.metrics.inc_clusters_scanned();
        let mut scan = scan;

        for kind in WorkloadKind::ALL {
            let listed = with_timeout(
                format!("list {}s in {}", kind, cluster),
                options.request_timeout,
                session.workloads(kind).list(),
            )
            .await;

            match listed {
                Ok(records) => {
                    let before = scan.workloads.len();
                    scan.workloads.extend(
                        records
                            .into_iter()
                            .filter(|r| has_schedule_annotation(r, &options.schedule_tag))
                            .map(|record| RawWorkload {
                                kind,
                                cluster: cluster.clone(),
                                record,
                            }),
                    );
                    debug!(
                        cluster = %cluster,
                        kind = %kind,
                        count = scan.workloads.len() - before,
                        "Listed scheduled workloads"
                    );
                }
                Err(e) => {
                    warn!(
                        cluster = %cluster,
                        kind = %kind,
                        error = %e,
                        "Could not load {} info",
                        kind
                    );
                    self.metrics.inc_discovery_failures();
                    scan.failures.push(DiscoveryFailure {
                        cluster: cluster.clone(),
                        kind: Some(kind),
                        error: e.to_string(),
                    });
                }
            }
        }

        scan
    }

    /// Cache hit reuses the stored connection; a miss reads and stores it
    fn resolve_connection(
        &self,
        cluster: &str,
        description: &ClusterDescription,
    ) -> Option<ClusterConnection> {
        if let Some(connection) = self.cache.get(cluster) {
            return Some(connection);
        }

        let connection = description.connection()?;
        if !self.cache.put(cluster, connection.clone()) {
            return None;
        }
        Some(connection)
    }
}
