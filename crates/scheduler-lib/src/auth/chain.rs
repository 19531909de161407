//! Credentials from the standard AWS provider chain
//!
//! Environment variables, shared config profiles, web identity, SSO, ECS
//! and instance roles are all resolved by `aws-config`. Temporary
//! credentials are kept until shortly before they expire.

use super::{AwsCredentials, CredentialSource};
use crate::error::{Result, SchedulerError};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use std::fmt;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::debug;

/// Credentials are refreshed once they are this close to expiry
const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// [`CredentialSource`] backed by the AWS SDK default provider chain
pub struct DefaultCredentialChain {
    provider: SharedCredentialsProvider,
    current: Mutex<Option<Credentials>>,
}

impl DefaultCredentialChain {
    /// Resolve the provider chain for `region`, optionally pinned to a
    /// shared config profile
    pub async fn load(region: &str, profile: Option<&str>) -> Result<Self> {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }

        let sdk_config = loader.load().await;
        let provider = sdk_config.credentials_provider().ok_or_else(|| {
            SchedulerError::Credentials("no AWS credential provider configured".to_string())
        })?;

        Ok(Self::from_provider(provider))
    }

    pub fn from_provider(provider: SharedCredentialsProvider) -> Self {
        Self {
            provider,
            current: Mutex::new(None),
        }
    }
}

fn is_fresh(credentials: &Credentials, now: SystemTime) -> bool {
    match credentials.expiry() {
        None => true,
        Some(expiry) => expiry > now + REFRESH_MARGIN,
    }
}

#[async_trait]
impl CredentialSource for DefaultCredentialChain {
    async fn credentials(&self) -> Result<AwsCredentials> {
        let mut current = self.current.lock().await;

        let credentials = match current.as_ref() {
            Some(credentials) if is_fresh(credentials, SystemTime::now()) => credentials.clone(),
            _ => {
                let fresh = self
                    .provider
                    .provide_credentials()
                    .await
                    .map_err(|e| SchedulerError::Credentials(e.to_string()))?;
                debug!(expiry = ?fresh.expiry(), "Resolved AWS credentials");
                *current = Some(fresh.clone());
                fresh
            }
        };

        Ok(AwsCredentials::new(
            credentials.access_key_id(),
            credentials.secret_access_key(),
            credentials.session_token().map(str::to_string),
        ))
    }
}

impl fmt::Debug for DefaultCredentialChain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DefaultCredentialChain").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_credential_types::provider::future;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hands out a new key id on every call
    #[derive(Debug)]
    struct Rotating {
        calls: AtomicUsize,
        lifetime: Duration,
    }

    impl ProvideCredentials for Rotating {
        fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
        where
            Self: 'a,
        {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            future::ProvideCredentials::ready(Ok(Credentials::new(
                format!("AKID{}", call),
                "secret",
                Some("session".to_string()),
                Some(SystemTime::now() + self.lifetime),
                "rotating",
            )))
        }
    }

    fn chain(lifetime: Duration) -> DefaultCredentialChain {
        DefaultCredentialChain::from_provider(SharedCredentialsProvider::new(Rotating {
            calls: AtomicUsize::new(0),
            lifetime,
        }))
    }

    #[tokio::test]
    async fn test_long_lived_credentials_are_reused() {
        let chain = chain(Duration::from_secs(3600));

        let first = chain.credentials().await.unwrap();
        let second = chain.credentials().await.unwrap();

        assert_eq!(first.access_key_id, "AKID0");
        assert_eq!(second.access_key_id, "AKID0");
        assert_eq!(second.session_token.as_deref(), Some("session"));
    }

    #[tokio::test]
    async fn test_expiring_credentials_are_refreshed() {
        let chain = chain(Duration::from_secs(60));

        let first = chain.credentials().await.unwrap();
        let second = chain.credentials().await.unwrap();

        assert_eq!(first.access_key_id, "AKID0");
        assert_eq!(second.access_key_id, "AKID1");
    }

    #[tokio::test]
    async fn test_static_provider() {
        let chain = DefaultCredentialChain::from_provider(SharedCredentialsProvider::new(
            Credentials::new("AKIDSTATIC", "secret", None, None, "static"),
        ));

        let credentials = chain.credentials().await.unwrap();
        assert_eq!(credentials.access_key_id, "AKIDSTATIC");
        assert!(credentials.session_token.is_none());
    }
}
