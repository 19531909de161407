//! Bearer tokens for EKS cluster API servers
//!
//! A token is a presigned STS `GetCallerIdentity` URL that carries the
//! cluster name in a signed `x-k8s-aws-id` header. The API server's
//! authenticator replays the request to learn the caller's IAM identity.

use super::sigv4::{presign_url, SignableRequest, SigningParams};
use super::{AwsCredentials, CredentialSource};
use crate::error::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Prefix identifying an AWS IAM authenticator token
pub const TOKEN_PREFIX: &str = "k8s-aws-v1.";

/// Validity window of the presigned request
pub const TOKEN_EXPIRY: Duration = Duration::from_secs(10 * 60);

const CLUSTER_ID_HEADER: &str = "x-k8s-aws-id";

/// Produces short-lived bearer tokens for a named cluster
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn bearer_token(&self, cluster: &str) -> Result<String>;
}

/// Mints tokens by presigning an STS request in the session's region
#[derive(Debug, Clone)]
pub struct StsTokenProvider {
    credentials: Arc<dyn CredentialSource>,
    region: String,
}

impl StsTokenProvider {
    pub fn new(credentials: Arc<dyn CredentialSource>, region: impl Into<String>) -> Self {
        Self {
            credentials,
            region: region.into(),
        }
    }

    /// Build a token for `cluster` signed with `credentials` at `time`
    pub fn token_at(
        &self,
        credentials: &AwsCredentials,
        cluster: &str,
        time: chrono::DateTime<chrono::Utc>,
    ) -> String {
        let params = SigningParams::new(credentials, &self.region, "sts").at(time);
        let request = SignableRequest::get(format!("sts.{}.amazonaws.com", self.region), "/")
            .query("Action", "GetCallerIdentity")
            .query("Version", "2011-06-15")
            .header(CLUSTER_ID_HEADER, cluster);

        let url = presign_url(&params, request, TOKEN_EXPIRY);
        format!("{}{}", TOKEN_PREFIX, URL_SAFE_NO_PAD.encode(url.as_bytes()))
    }
}

#[async_trait]
impl CredentialProvider for StsTokenProvider {
    async fn bearer_token(&self, cluster: &str) -> Result<String> {
        let credentials = self.credentials.credentials().await?;
        debug!(cluster = %cluster, region = %self.region, "Minting cluster bearer token");
        Ok(self.token_at(&credentials, cluster, chrono::Utc::now()))
    }
}
