//! Error types for the scheduler library

use std::time::Duration;
use thiserror::Error;

/// Errors raised by platform clients, discovery and reconciliation
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("EKS API error: {0}")]
    ComputeApi(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Kubernetes client configuration error: {0}")]
    KubeConfig(String),

    #[error("credential error: {0}")]
    Credentials(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("no cached connection for cluster {0}")]
    MissingConnection(String),

    #[error("{0} is not a supported workload kind, expected rollout or deployment")]
    InvalidKind(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Run a future with a deadline, mapping expiry to [`SchedulerError::Timeout`]
pub async fn with_timeout<T, F>(
    operation: impl Into<String>,
    timeout: Duration,
    fut: F,
) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(SchedulerError::Timeout {
            operation: operation.into(),
            timeout,
        }),
    }
}
