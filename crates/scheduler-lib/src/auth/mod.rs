//! Authentication for the EKS control plane and cluster API servers

mod chain;
pub mod sigv4;
mod token;

pub use chain::DefaultCredentialChain;
pub use token::{CredentialProvider, StsTokenProvider, TOKEN_EXPIRY, TOKEN_PREFIX};

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;

/// Resolves the AWS credentials used to sign a request
///
/// Called once per signed request, so implementations backed by temporary
/// credentials can hand out refreshed keys.
#[async_trait]
pub trait CredentialSource: Send + Sync + fmt::Debug {
    async fn credentials(&self) -> Result<AwsCredentials>;
}

/// AWS credentials used to sign requests
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }
}

#[async_trait]
impl CredentialSource for AwsCredentials {
    async fn credentials(&self) -> Result<AwsCredentials> {
        Ok(self.clone())
    }
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
