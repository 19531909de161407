//! Core data models for the workload scheduler

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::SchedulerError;

/// Annotation holding the replica count recorded before a stop
pub const SAVED_REPLICAS_ANNOTATION: &str = "replicas";

/// Default annotation key naming the schedule a workload follows
pub const DEFAULT_SCHEDULE_TAG: &str = "Schedule";

/// Default cluster tag gating which clusters are visited
pub const DEFAULT_CLUSTER_TAG_KEY: &str = "Schedule";
pub const DEFAULT_CLUSTER_TAG_VALUE: &str = "on";

/// Argo Rollouts custom resource coordinates
pub const ROLLOUT_GROUP: &str = "argoproj.io";
pub const ROLLOUT_VERSION: &str = "v1alpha1";
pub const ROLLOUT_KIND: &str = "Rollout";
pub const ROLLOUT_PLURAL: &str = "rollouts";

/// Connection details for a single cluster API server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConnection {
    pub cluster: String,
    pub endpoint: String,
    /// Base64 encoded PEM bundle of the cluster certificate authority
    pub certificate_authority: String,
}

/// Tag pair a cluster must carry to be scheduled at all
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleTagFilter {
    pub key: String,
    pub value: String,
}

impl Default for ScheduleTagFilter {
    fn default() -> Self {
        Self {
            key: DEFAULT_CLUSTER_TAG_KEY.to_string(),
            value: DEFAULT_CLUSTER_TAG_VALUE.to_string(),
        }
    }
}

impl ScheduleTagFilter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Returns true when the tag map carries exactly this key/value pair
    pub fn matches(&self, tags: &BTreeMap<String, String>) -> bool {
        tags.get(&self.key).map(|v| v == &self.value).unwrap_or(false)
    }
}

/// Workload kinds the scheduler knows how to scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    Deployment,
    Rollout,
}

impl WorkloadKind {
    pub const ALL: [WorkloadKind; 2] = [WorkloadKind::Deployment, WorkloadKind::Rollout];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "deployment",
            WorkloadKind::Rollout => "rollout",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deployment" => Ok(WorkloadKind::Deployment),
            "rollout" => Ok(WorkloadKind::Rollout),
            other => Err(SchedulerError::InvalidKind(other.to_string())),
        }
    }
}

/// Derived run state of a workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    Running,
    Stopped,
}

impl ResourceState {
    pub fn from_replicas(replicas: i32) -> Self {
        if replicas == 0 {
            ResourceState::Stopped
        } else {
            ResourceState::Running
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceState::Running => "running",
            ResourceState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A workload that satisfies the annotation contract and can be scheduled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulableResource {
    /// Identifier reported back to the scheduling engine (the workload name)
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub cluster: String,
    pub kind: WorkloadKind,
    /// Live `spec.replicas`
    pub current_replicas: i32,
    /// Count recorded in the `replicas` annotation
    pub saved_replicas: i32,
    /// Value of the schedule annotation
    pub schedule: String,
    pub state: ResourceState,
    pub is_running: bool,
    /// All annotations, passed through unchanged
    pub tags: BTreeMap<String, String>,
}

impl SchedulableResource {
    /// Fully qualified key, unique across clusters and namespaces
    pub fn key(&self) -> String {
        format!("{}/{}/{}/{}", self.cluster, self.namespace, self.kind, self.name)
    }
}

/// Raw workload record as returned by a cluster listing
#[derive(Debug, Clone)]
pub struct RawWorkload {
    pub kind: WorkloadKind,
    pub cluster: String,
    pub record: serde_json::Value,
}

/// State a reconciliation drives a resource towards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileAction {
    Stop,
    Start,
}

impl ReconcileAction {
    pub fn target_state(&self) -> ResourceState {
        match self {
            ReconcileAction::Stop => ResourceState::Stopped,
            ReconcileAction::Start => ResourceState::Running,
        }
    }
}

/// Result of a single patch attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum PatchStatus {
    /// The patch was accepted by the API server
    Succeeded,
    /// The resource was already in the target state; nothing was sent
    Unchanged,
    /// The patch could not be applied
    Failed(String),
}

impl PatchStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, PatchStatus::Failed(_))
    }
}

/// Per-resource outcome yielded by the reconciler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub id: String,
    pub key: String,
    pub action: ReconcileAction,
    /// State the resource was driven towards
    pub state: ResourceState,
    pub status: PatchStatus,
}

/// Aggregated outcomes of a reconciliation batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub outcomes: Vec<ReconcileOutcome>,
}

impl BatchReport {
    pub fn push(&mut self, outcome: ReconcileOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == PatchStatus::Succeeded)
            .count()
    }

    pub fn unchanged(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == PatchStatus::Unchanged)
            .count()
    }

    pub fn failed(&self) -> Vec<&ReconcileOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status.is_failure())
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failed().is_empty()
    }
}
