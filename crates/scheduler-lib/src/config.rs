//! Scheduler configuration

use crate::discovery::DiscoveryOptions;
use crate::error::{Result, SchedulerError};
use crate::models::{
    ScheduleTagFilter, DEFAULT_CLUSTER_TAG_KEY, DEFAULT_CLUSTER_TAG_VALUE, DEFAULT_SCHEDULE_TAG,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix, e.g. `EKS_SCHEDULER_REGION`
pub const ENV_PREFIX: &str = "EKS_SCHEDULER";

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// AWS region whose clusters are scheduled
    #[serde(default = "default_region")]
    pub region: String,

    /// Account id, used to label logs
    #[serde(default)]
    pub account: String,

    /// Annotation key naming a workload's schedule
    #[serde(default = "default_tag_name")]
    pub tag_name: String,

    /// Cluster tag key gating which clusters are visited
    #[serde(default = "default_cluster_tag_key")]
    pub cluster_tag_key: String,

    /// Cluster tag value gating which clusters are visited
    #[serde(default = "default_cluster_tag_value")]
    pub cluster_tag_value: String,

    /// Clusters scanned concurrently during discovery
    #[serde(default = "default_cluster_concurrency")]
    pub cluster_concurrency: usize,

    /// Deadline for every remote call, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum number of cached cluster connections
    #[serde(default)]
    pub cache_capacity: Option<usize>,
}

fn default_region() -> String {
    std::env::var("AWS_REGION")
        .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
        .unwrap_or_else(|_| "us-east-1".to_string())
}

fn default_tag_name() -> String {
    DEFAULT_SCHEDULE_TAG.to_string()
}

fn default_cluster_tag_key() -> String {
    DEFAULT_CLUSTER_TAG_KEY.to_string()
}

fn default_cluster_tag_value() -> String {
    DEFAULT_CLUSTER_TAG_VALUE.to_string()
}

fn default_cluster_concurrency() -> usize {
    1
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            account: String::new(),
            tag_name: default_tag_name(),
            cluster_tag_key: default_cluster_tag_key(),
            cluster_tag_value: default_cluster_tag_value(),
            cluster_concurrency: default_cluster_concurrency(),
            request_timeout_secs: default_request_timeout(),
            cache_capacity: None,
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from an optional file, then `EKS_SCHEDULER_*`
    /// environment variables, and validate it
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()
            .map_err(|e| SchedulerError::Config(e.to_string()))?;

        let loaded: SchedulerConfig = config
            .try_deserialize()
            .map_err(|e| SchedulerError::Config(e.to_string()))?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject values no discovery pass could run with
    pub fn validate(&self) -> Result<()> {
        if self.region.trim().is_empty() {
            return Err(SchedulerError::Config("region must not be empty".into()));
        }
        if self.tag_name.trim().is_empty() {
            return Err(SchedulerError::Config("tag_name must not be empty".into()));
        }
        if self.cluster_tag_key.trim().is_empty() {
            return Err(SchedulerError::Config(
                "cluster_tag_key must not be empty".into(),
            ));
        }
        if self.cluster_concurrency == 0 {
            return Err(SchedulerError::Config(
                "cluster_concurrency must be at least 1".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(SchedulerError::Config(
                "request_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn tag_filter(&self) -> ScheduleTagFilter {
        ScheduleTagFilter::new(&self.cluster_tag_key, &self.cluster_tag_value)
    }

    /// Discovery parameters, optionally restricted to one cluster
    pub fn discovery_options(&self, cluster: Option<String>) -> DiscoveryOptions {
        DiscoveryOptions {
            filter: self.tag_filter(),
            schedule_tag: self.tag_name.clone(),
            cluster_concurrency: self.cluster_concurrency,
            request_timeout: self.request_timeout(),
            cluster,
        }
    }
}
