//! Kubernetes API sessions backed by kube-rs
//!
//! Each session is built from a cached [`ClusterConnection`] plus a freshly
//! minted bearer token, mirroring a single-user kubeconfig.

use super::{ClusterSession, Patchable, SessionFactory, WorkloadApi};
use crate::auth::CredentialProvider;
use crate::error::{Result, SchedulerError};
use crate::models::{
    ClusterConnection, WorkloadKind, ROLLOUT_GROUP, ROLLOUT_KIND, ROLLOUT_PLURAL, ROLLOUT_VERSION,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, ApiResource, DynamicObject, ListParams, Patch, PatchParams};
use kube::config::AuthInfo;
use kube::{Client, Config};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// API resource descriptor for Argo Rollouts
pub fn rollout_resource() -> ApiResource {
    ApiResource {
        group: ROLLOUT_GROUP.to_string(),
        version: ROLLOUT_VERSION.to_string(),
        api_version: format!("{}/{}", ROLLOUT_GROUP, ROLLOUT_VERSION),
        kind: ROLLOUT_KIND.to_string(),
        plural: ROLLOUT_PLURAL.to_string(),
    }
}

/// Decode base64 encoded PEM certificate authority data into DER certificates
pub fn decode_certificate_authority(data: &str) -> Result<Vec<Vec<u8>>> {
    let pem = STANDARD.decode(data.trim()).map_err(|e| {
        SchedulerError::KubeConfig(format!("certificate authority is not base64: {}", e))
    })?;

    let certs = rustls_pemfile::certs(&mut pem.as_slice()).map_err(|e| {
        SchedulerError::KubeConfig(format!("invalid certificate authority PEM: {}", e))
    })?;

    if certs.is_empty() {
        return Err(SchedulerError::KubeConfig(
            "certificate authority contains no certificates".to_string(),
        ));
    }
    Ok(certs)
}

/// Build a kube client configuration for a cluster connection and token
pub fn client_config(
    connection: &ClusterConnection,
    token: String,
    timeout: Duration,
) -> Result<Config> {
    let cluster_url = connection.endpoint.parse::<http::Uri>().map_err(|e| {
        SchedulerError::KubeConfig(format!("invalid endpoint {}: {}", connection.endpoint, e))
    })?;

    let mut config = Config::new(cluster_url);
    config.root_cert = Some(decode_certificate_authority(&connection.certificate_authority)?);
    config.auth_info = AuthInfo {
        token: Some(SecretString::new(token)),
        ..Default::default()
    };
    config.connect_timeout = Some(timeout);
    config.read_timeout = Some(timeout);
    Ok(config)
}

/// Opens kube-rs sessions authenticated through a [`CredentialProvider`]
pub struct KubeSessionFactory {
    credentials: Arc<dyn CredentialProvider>,
    timeout: Duration,
}

impl KubeSessionFactory {
    pub fn new(credentials: Arc<dyn CredentialProvider>, timeout: Duration) -> Self {
        Self {
            credentials,
            timeout,
        }
    }
}

#[async_trait]
impl SessionFactory for KubeSessionFactory {
    async fn connect(&self, connection: &ClusterConnection) -> Result<Arc<dyn ClusterSession>> {
        let token = self.credentials.bearer_token(&connection.cluster).await?;
        let config = client_config(connection, token, self.timeout)?;
        let client = Client::try_from(config)?;

        debug!(
            cluster = %connection.cluster,
            endpoint = %connection.endpoint,
            "Opened cluster session"
        );
        Ok(Arc::new(KubeSession { client }))
    }
}

/// Authenticated kube-rs client for one cluster
pub struct KubeSession {
    client: Client,
}

impl ClusterSession for KubeSession {
    fn workloads(&self, kind: WorkloadKind) -> Arc<dyn WorkloadApi> {
        match kind {
            WorkloadKind::Deployment => Arc::new(DeploymentApi {
                client: self.client.clone(),
            }),
            WorkloadKind::Rollout => Arc::new(RolloutApi {
                client: self.client.clone(),
                resource: rollout_resource(),
            }),
        }
    }
}

struct DeploymentApi {
    client: Client,
}

#[async_trait]
impl Patchable for DeploymentApi {
    async fn patch(&self, name: &str, namespace: &str, body: &serde_json::Value) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &PatchParams::default(), &Patch::Merge(body))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl WorkloadApi for DeploymentApi {
    async fn list(&self) -> Result<Vec<serde_json::Value>> {
        let api: Api<Deployment> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        list.items
            .into_iter()
            .map(|d| serde_json::to_value(d).map_err(SchedulerError::from))
            .collect()
    }
}

struct RolloutApi {
    client: Client,
    resource: ApiResource,
}

#[async_trait]
impl Patchable for RolloutApi {
    async fn patch(&self, name: &str, namespace: &str, body: &serde_json::Value) -> Result<()> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &self.resource);
        api.patch(name, &PatchParams::default(), &Patch::Merge(body))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl WorkloadApi for RolloutApi {
    async fn list(&self) -> Result<Vec<serde_json::Value>> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &self.resource);
        let list = api.list(&ListParams::default()).await?;
        list.items
            .into_iter()
            .map(|r| serde_json::to_value(r).map_err(SchedulerError::from))
            .collect()
    }
}
