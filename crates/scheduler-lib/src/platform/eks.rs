//! EKS control plane client
//!
//! Talks to the EKS REST API directly with SigV4 signed requests. Only the
//! two read calls needed for discovery are implemented.

use super::{ClusterDescription, ComputeApi};
use crate::auth::sigv4::{sign_headers, SignableRequest, SigningParams};
use crate::auth::CredentialSource;
use crate::error::{Result, SchedulerError};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

const SERVICE: &str = "eks";
const PAGE_SIZE: &str = "100";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListClustersResponse {
    #[serde(default)]
    clusters: Vec<String>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DescribeClusterResponse {
    cluster: ClusterPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterPayload {
    name: String,
    endpoint: Option<String>,
    certificate_authority: Option<CertificateAuthority>,
    #[serde(default)]
    tags: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct CertificateAuthority {
    data: Option<String>,
}

impl From<ClusterPayload> for ClusterDescription {
    fn from(payload: ClusterPayload) -> Self {
        ClusterDescription {
            name: payload.name,
            tags: payload.tags.unwrap_or_default(),
            endpoint: payload.endpoint,
            certificate_authority: payload.certificate_authority.and_then(|ca| ca.data),
        }
    }
}

/// SigV4 signed client for `ListClusters` / `DescribeCluster`
pub struct EksClient {
    client: Client,
    base_url: Url,
    region: String,
    credentials: Arc<dyn CredentialSource>,
}

impl EksClient {
    /// Client for the public regional endpoint
    pub fn new(
        region: &str,
        credentials: Arc<dyn CredentialSource>,
        timeout: Duration,
    ) -> Result<Self> {
        let endpoint = format!("https://eks.{}.amazonaws.com", region);
        Self::with_endpoint(&endpoint, region, credentials, timeout)
    }

    /// Client for a custom endpoint (VPC endpoints, local testing)
    pub fn with_endpoint(
        endpoint: &str,
        region: &str,
        credentials: Arc<dyn CredentialSource>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = Url::parse(endpoint).map_err(|e| {
            SchedulerError::Config(format!("invalid EKS endpoint {}: {}", endpoint, e))
        })?;

        Ok(Self {
            client,
            base_url,
            region: region.to_string(),
            credentials,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let host = match (self.base_url.host_str(), self.base_url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(SchedulerError::Config(format!(
                    "EKS endpoint {} has no host",
                    self.base_url
                )))
            }
        };

        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| SchedulerError::ComputeApi(format!("invalid path {}: {}", path, e)))?;
        let mut signable = SignableRequest::get(host, url.path().to_string());
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
                signable = signable.query(*key, *value);
            }
        }
        if query.is_empty() {
            url.set_query(None);
        }

        let credentials = self.credentials.credentials().await?;
        let params = SigningParams::new(&credentials, &self.region, SERVICE);
        let mut request = self.client.get(url);
        for (name, value) in sign_headers(&params, signable) {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SchedulerError::ComputeApi(format!(
                "GET {} failed ({}): {}",
                path, status, body
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl ComputeApi for EksClient {
    async fn list_clusters(&self) -> Result<Vec<String>> {
        let mut clusters = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut query = vec![("maxResults", PAGE_SIZE)];
            if let Some(token) = next_token.as_deref() {
                query.push(("nextToken", token));
            }

            let page: ListClustersResponse = self.get("/clusters", &query).await?;
            clusters.extend(page.clusters);

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        debug!(count = clusters.len(), region = %self.region, "Listed EKS clusters");
        Ok(clusters)
    }

    async fn describe_cluster(&self, name: &str) -> Result<ClusterDescription> {
        let path = format!("/clusters/{}", name);
        let response: DescribeClusterResponse = self.get(&path, &[]).await?;
        Ok(response.cluster.into())
    }
}
