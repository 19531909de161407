//! In-memory platform used by the library tests
//!
//! Holds clusters and their workload records as JSON, applies merge patches
//! the way the API server would, and records every call for assertions.

use super::{
    ClusterDescription, ClusterSession, ComputeApi, Patchable, Platform, PlatformFactory,
    SessionFactory, WorkloadApi,
};
use crate::auth::CredentialSource;
use crate::error::{Result, SchedulerError};
use crate::models::{ClusterConnection, WorkloadKind};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct FakeCluster {
    description: ClusterDescription,
    workloads: BTreeMap<WorkloadKind, Vec<Value>>,
    failing_lists: HashSet<WorkloadKind>,
    failing_patches: HashSet<String>,
}

#[derive(Default)]
struct State {
    clusters: BTreeMap<String, FakeCluster>,
    fail_list_clusters: bool,
    failing_describes: HashSet<String>,
    describe_calls: Vec<String>,
    connections: Vec<ClusterConnection>,
    patches: Vec<(String, WorkloadKind, String, String, Value)>,
}

/// Shared fake of the compute API and every cluster API server
#[derive(Clone, Default)]
pub(crate) struct FakePlatform {
    state: Arc<Mutex<State>>,
}

/// Build a workload record the way the API server would return it
pub(crate) fn workload(
    name: &str,
    namespace: &str,
    replicas: i32,
    annotations: &[(&str, &str)],
) -> Value {
    let annotations: BTreeMap<&str, &str> = annotations.iter().cloned().collect();
    json!({
        "metadata": {
            "name": name,
            "namespace": namespace,
            "annotations": annotations,
        },
        "spec": { "replicas": replicas }
    })
}

/// JSON merge patch (RFC 7386)
fn merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(patch_map) => {
            if !target.is_object() {
                *target = json!({});
            }
            if let Value::Object(target_map) = target {
                for (key, value) in patch_map {
                    if value.is_null() {
                        target_map.remove(key);
                    } else {
                        merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
                    }
                }
            }
        }
        other => *target = other.clone(),
    }
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a cluster with the given tags
    pub fn add_cluster(&self, name: &str, tags: &[(&str, &str)]) {
        let description = ClusterDescription {
            name: name.to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            endpoint: Some(format!("https://{}.eks.example.com", name)),
            certificate_authority: Some(format!("{}-ca", name)),
        };
        self.state.lock().unwrap().clusters.insert(
            name.to_string(),
            FakeCluster {
                description,
                ..Default::default()
            },
        );
    }

    pub fn set_endpoint(&self, cluster: &str, endpoint: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state.clusters.get_mut(cluster) {
            c.description.endpoint = Some(endpoint.to_string());
        }
    }

    pub fn add_workload(&self, cluster: &str, kind: WorkloadKind, record: Value) {
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state.clusters.get_mut(cluster) {
            c.workloads.entry(kind).or_default().push(record);
        }
    }

    pub fn fail_list_clusters(&self) {
        self.state.lock().unwrap().fail_list_clusters = true;
    }

    pub fn fail_describe(&self, cluster: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_describes
            .insert(cluster.to_string());
    }

    pub fn fail_list(&self, cluster: &str, kind: WorkloadKind) {
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state.clusters.get_mut(cluster) {
            c.failing_lists.insert(kind);
        }
    }

    pub fn fail_patch(&self, cluster: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state.clusters.get_mut(cluster) {
            c.failing_patches.insert(name.to_string());
        }
    }

    /// Current stored record of a workload
    pub fn record(&self, cluster: &str, kind: WorkloadKind, name: &str) -> Option<Value> {
        let state = self.state.lock().unwrap();
        state
            .clusters
            .get(cluster)?
            .workloads
            .get(&kind)?
            .iter()
            .find(|r| r["metadata"]["name"] == name)
            .cloned()
    }

    pub fn replicas(&self, cluster: &str, kind: WorkloadKind, name: &str) -> Option<i64> {
        self.record(cluster, kind, name)?["spec"]["replicas"].as_i64()
    }

    pub fn saved_annotation(
        &self,
        cluster: &str,
        kind: WorkloadKind,
        name: &str,
    ) -> Option<String> {
        self.record(cluster, kind, name)?["metadata"]["annotations"]["replicas"]
            .as_str()
            .map(String::from)
    }

    pub fn describe_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().describe_calls.clone()
    }

    pub fn connections(&self) -> Vec<ClusterConnection> {
        self.state.lock().unwrap().connections.clone()
    }

    /// Every patch sent: (cluster, kind, namespace, name, body)
    pub fn patches(&self) -> Vec<(String, WorkloadKind, String, String, Value)> {
        self.state.lock().unwrap().patches.clone()
    }
}

#[async_trait]
impl ComputeApi for FakePlatform {
    async fn list_clusters(&self) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        if state.fail_list_clusters {
            return Err(SchedulerError::ComputeApi("AccessDenied".into()));
        }
        Ok(state.clusters.keys().cloned().collect())
    }

    async fn describe_cluster(&self, name: &str) -> Result<ClusterDescription> {
        let mut state = self.state.lock().unwrap();
        state.describe_calls.push(name.to_string());
        if state.failing_describes.contains(name) {
            return Err(SchedulerError::ComputeApi(format!("ResourceNotFound: {}", name)));
        }
        state
            .clusters
            .get(name)
            .map(|c| c.description.clone())
            .ok_or_else(|| SchedulerError::ComputeApi(format!("ResourceNotFound: {}", name)))
    }
}

#[async_trait]
impl SessionFactory for FakePlatform {
    async fn connect(&self, connection: &ClusterConnection) -> Result<Arc<dyn ClusterSession>> {
        self.state
            .lock()
            .unwrap()
            .connections
            .push(connection.clone());
        Ok(Arc::new(FakeSession {
            platform: self.clone(),
            cluster: connection.cluster.clone(),
        }))
    }
}

struct FakeSession {
    platform: FakePlatform,
    cluster: String,
}

impl ClusterSession for FakeSession {
    fn workloads(&self, kind: WorkloadKind) -> Arc<dyn WorkloadApi> {
        Arc::new(FakeWorkloads {
            platform: self.platform.clone(),
            cluster: self.cluster.clone(),
            kind,
        })
    }
}

struct FakeWorkloads {
    platform: FakePlatform,
    cluster: String,
    kind: WorkloadKind,
}

#[async_trait]
impl Patchable for FakeWorkloads {
    async fn patch(&self, name: &str, namespace: &str, body: &Value) -> Result<()> {
        let mut state = self.platform.state.lock().unwrap();
        state.patches.push((
            self.cluster.clone(),
            self.kind,
            namespace.to_string(),
            name.to_string(),
            body.clone(),
        ));

        let cluster = state
            .clusters
            .get_mut(&self.cluster)
            .ok_or_else(|| SchedulerError::ComputeApi(format!("no cluster {}", self.cluster)))?;
        if cluster.failing_patches.contains(name) {
            return Err(SchedulerError::ComputeApi(format!("patch {} rejected", name)));
        }

        let record = cluster
            .workloads
            .get_mut(&self.kind)
            .and_then(|records| {
                records.iter_mut().find(|r| {
                    r["metadata"]["name"] == name && r["metadata"]["namespace"] == namespace
                })
            })
            .ok_or_else(|| {
                SchedulerError::ComputeApi(format!("{}/{} not found", namespace, name))
            })?;
        merge_patch(record, body);
        Ok(())
    }
}

#[async_trait]
impl WorkloadApi for FakeWorkloads {
    async fn list(&self) -> Result<Vec<Value>> {
        let state = self.platform.state.lock().unwrap();
        let cluster = state
            .clusters
            .get(&self.cluster)
            .ok_or_else(|| SchedulerError::ComputeApi(format!("no cluster {}", self.cluster)))?;
        if cluster.failing_lists.contains(&self.kind) {
            return Err(SchedulerError::ComputeApi(format!(
                "the server could not find the requested resource ({})",
                self.kind
            )));
        }
        Ok(cluster.workloads.get(&self.kind).cloned().unwrap_or_default())
    }
}

/// One fake platform per region, recording every platform opened
#[derive(Clone, Default)]
pub(crate) struct FakeRegions {
    regions: BTreeMap<String, FakePlatform>,
    opened: Arc<Mutex<Vec<(String, String)>>>,
}

impl FakeRegions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_region(mut self, region: &str, platform: FakePlatform) -> Self {
        self.regions.insert(region.to_string(), platform);
        self
    }

    /// Every open call: (region, debug rendering of the credentials)
    pub fn opened(&self) -> Vec<(String, String)> {
        self.opened.lock().unwrap().clone()
    }
}

impl PlatformFactory for FakeRegions {
    fn open(
        &self,
        region: &str,
        credentials: Arc<dyn CredentialSource>,
        _timeout: Duration,
    ) -> Result<Platform> {
        self.opened
            .lock()
            .unwrap()
            .push((region.to_string(), format!("{:?}", credentials)));

        let platform = self
            .regions
            .get(region)
            .cloned()
            .ok_or_else(|| SchedulerError::ComputeApi(format!("unknown region {}", region)))?;
        Ok(Platform {
            compute: Arc::new(platform.clone()),
            sessions: Arc::new(platform),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_patch_semantics() {
        let mut target = workload("d1", "ns", 3, &[("Schedule", "office")]);
        merge_patch(
            &mut target,
            &json!({"spec": {"replicas": 0}, "metadata": {"annotations": {"replicas": "3"}}}),
        );

        assert_eq!(target["spec"]["replicas"], 0);
        assert_eq!(target["metadata"]["annotations"]["replicas"], "3");
        assert_eq!(target["metadata"]["annotations"]["Schedule"], "office");
    }
}
