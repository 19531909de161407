//! Workload state determination
//!
//! Decodes raw workload records into [`SchedulableResource`]s, enforcing the
//! annotation contract: a workload is only schedulable once it carries both
//! the schedule annotation and a saved replica count. Records that fail the
//! contract are excluded one at a time and never abort the batch.

use crate::models::{
    RawWorkload, ResourceState, SchedulableResource, WorkloadKind, SAVED_REPLICAS_ANNOTATION,
};
use crate::observability::SchedulerMetrics;
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct WorkloadRecord {
    metadata: RecordMetadata,
    spec: RecordSpec,
}

#[derive(Debug, Deserialize)]
struct RecordMetadata {
    name: String,
    namespace: String,
    #[serde(default)]
    annotations: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct RecordSpec {
    replicas: i32,
}

/// Why a workload record was left out of the schedulable set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Exclusion {
    #[error("record could not be decoded: {0}")]
    Malformed(String),

    #[error("{name} is scaled to zero but has no saved replicas annotation")]
    StoppedWithoutSavedReplicas { name: String },

    #[error("{name} needs a replicas annotation to be scheduled")]
    Unmanaged { name: String },

    #[error("{name} has an invalid saved replicas annotation {value:?}")]
    InvalidSavedReplicas { name: String, value: String },

    #[error("{name} has no {tag} annotation")]
    MissingSchedule { name: String, tag: String },
}

/// Normalize one raw record, or explain why it is excluded
pub fn normalize(
    kind: WorkloadKind,
    record: &serde_json::Value,
    cluster: &str,
    schedule_tag: &str,
) -> Result<SchedulableResource, Exclusion> {
    let record: WorkloadRecord = serde_json::from_value(record.clone())
        .map_err(|e| Exclusion::Malformed(e.to_string()))?;

    let name = record.metadata.name;
    let replicas = record.spec.replicas;
    let annotations = record.metadata.annotations.unwrap_or_default();

    let saved = match annotations.get(SAVED_REPLICAS_ANNOTATION) {
        Some(value) => value,
        None if replicas == 0 => return Err(Exclusion::StoppedWithoutSavedReplicas { name }),
        None => return Err(Exclusion::Unmanaged { name }),
    };

    let saved_replicas = match saved.trim().parse::<i32>() {
        Ok(n) if n >= 0 => n,
        _ => {
            return Err(Exclusion::InvalidSavedReplicas {
                name,
                value: saved.clone(),
            })
        }
    };

    let schedule = annotations
        .get(schedule_tag)
        .cloned()
        .ok_or_else(|| Exclusion::MissingSchedule {
            name: name.clone(),
            tag: schedule_tag.to_string(),
        })?;

    let state = ResourceState::from_replicas(replicas);

    Ok(SchedulableResource {
        id: name.clone(),
        name,
        namespace: record.metadata.namespace,
        cluster: cluster.to_string(),
        kind,
        current_replicas: replicas,
        saved_replicas,
        schedule,
        state,
        is_running: state == ResourceState::Running,
        tags: annotations,
    })
}

/// Normalize a batch, logging and counting every exclusion
pub fn normalize_all(
    raws: &[RawWorkload],
    schedule_tag: &str,
    metrics: &SchedulerMetrics,
) -> Vec<SchedulableResource> {
    let mut resources = Vec::with_capacity(raws.len());

    for raw in raws {
        match normalize(raw.kind, &raw.record, &raw.cluster, schedule_tag) {
            Ok(resource) => resources.push(resource),
            Err(exclusion) => {
                metrics.inc_resources_excluded();
                warn!(
                    event = "resource_excluded",
                    cluster = %raw.cluster,
                    kind = %raw.kind,
                    workload = %record_name(&raw.record),
                    reason = %exclusion,
                    "Excluding workload from scheduling"
                );
            }
        }
    }

    metrics.add_resources_discovered(resources.len() as u64);
    resources
}

fn record_name(record: &serde_json::Value) -> &str {
    record["metadata"]["name"].as_str().unwrap_or("<unknown>")
}
