//! Capability interfaces for the platforms the scheduler talks to
//!
//! The compute-control API enumerates and describes clusters; a cluster
//! session lists and patches workloads. A [`PlatformFactory`] opens both for
//! the region and credentials of a call. Production implementations live in
//! [`eks`] and [`kubernetes`]; tests use the in-memory [`fake`] platform.

pub mod eks;
pub mod kubernetes;

#[cfg(test)]
pub(crate) mod fake;

use crate::auth::{CredentialSource, StsTokenProvider};
use crate::error::Result;
use crate::models::{ClusterConnection, WorkloadKind};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub use eks::EksClient;
pub use kubernetes::KubeSessionFactory;

/// Cluster metadata as returned by the compute-control API
#[derive(Debug, Clone, Default)]
pub struct ClusterDescription {
    pub name: String,
    pub tags: BTreeMap<String, String>,
    pub endpoint: Option<String>,
    pub certificate_authority: Option<String>,
}

impl ClusterDescription {
    /// Build a connection from the description, if both parts are present
    pub fn connection(&self) -> Option<ClusterConnection> {
        Some(ClusterConnection {
            cluster: self.name.clone(),
            endpoint: self.endpoint.clone()?,
            certificate_authority: self.certificate_authority.clone()?,
        })
    }
}

/// Account/region wide cluster enumeration
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// List the names of all clusters
    async fn list_clusters(&self) -> Result<Vec<String>>;

    /// Fetch tags and connection details of a cluster
    async fn describe_cluster(&self, name: &str) -> Result<ClusterDescription>;
}

/// Something that accepts a JSON merge patch for a named, namespaced object
#[async_trait]
pub trait Patchable: Send + Sync {
    async fn patch(&self, name: &str, namespace: &str, body: &serde_json::Value) -> Result<()>;
}

/// A workload API of one kind within one cluster
#[async_trait]
pub trait WorkloadApi: Patchable {
    /// List every object of this kind across all namespaces
    async fn list(&self) -> Result<Vec<serde_json::Value>>;
}

/// An authenticated connection to one cluster
pub trait ClusterSession: Send + Sync {
    fn workloads(&self, kind: WorkloadKind) -> Arc<dyn WorkloadApi>;
}

/// Opens authenticated sessions from cached connection details
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(&self, connection: &ClusterConnection) -> Result<Arc<dyn ClusterSession>>;
}

/// Compute API and session factory scoped to one region and identity
#[derive(Clone)]
pub struct Platform {
    pub compute: Arc<dyn ComputeApi>,
    pub sessions: Arc<dyn SessionFactory>,
}

/// Opens platform clients for the region and credentials of a call
pub trait PlatformFactory: Send + Sync {
    fn open(
        &self,
        region: &str,
        credentials: Arc<dyn CredentialSource>,
        timeout: Duration,
    ) -> Result<Platform>;
}

/// EKS control plane plus kube-rs sessions authenticated with STS tokens
#[derive(Debug, Clone, Copy, Default)]
pub struct AwsPlatform;

impl PlatformFactory for AwsPlatform {
    fn open(
        &self,
        region: &str,
        credentials: Arc<dyn CredentialSource>,
        timeout: Duration,
    ) -> Result<Platform> {
        debug!(region = %region, "Opening EKS platform clients");
        let compute = EksClient::new(region, credentials.clone(), timeout)?;
        let tokens = StsTokenProvider::new(credentials, region);

        Ok(Platform {
            compute: Arc::new(compute),
            sessions: Arc::new(KubeSessionFactory::new(Arc::new(tokens), timeout)),
        })
    }
}
