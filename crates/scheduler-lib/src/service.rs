//! EKS scheduling service
//!
//! Entry point used by the scheduling engine: a discovery pass produces
//! [`SchedulableResource`]s, and stop/start requests yield one `(id, outcome)`
//! pair per resource as the consumer polls. Every call opens platform clients
//! for the region and credentials carried by its [`SchedulerArgs`].

use crate::auth::CredentialSource;
use crate::cache::ConnectionCache;
use crate::config::SchedulerConfig;
use crate::determiner::normalize_all;
use crate::discovery::{Discoverer, DiscoveryReport};
use crate::error::{Result, SchedulerError};
use crate::models::{ReconcileOutcome, SchedulableResource};
use crate::observability::{SchedulerMetrics, StructuredLogger};
use crate::platform::{AwsPlatform, Platform, PlatformFactory};
use crate::reconciler::Reconciler;
use dashmap::DashMap;
use futures::stream::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Arguments of a single scheduling call
#[derive(Debug, Clone)]
pub struct SchedulerArgs {
    pub account: String,
    pub region: String,
    /// Identity every request of the call is signed with
    pub credentials: Arc<dyn CredentialSource>,
    pub config: SchedulerConfig,
    /// Resources to stop or start; ignored by discovery
    pub resources: Vec<SchedulableResource>,
}

impl SchedulerArgs {
    /// Arguments for the configured account and region
    pub fn new(config: SchedulerConfig, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            account: config.account.clone(),
            region: config.region.clone(),
            credentials,
            config,
            resources: Vec::new(),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_resources(mut self, resources: Vec<SchedulableResource>) -> Self {
        self.resources = resources;
        self
    }

    fn logger(&self) -> StructuredLogger {
        StructuredLogger::new(&self.account, &self.region)
    }
}

/// Result of a discovery pass: normalized resources plus the raw report
#[derive(Debug)]
pub struct Inventory {
    pub resources: Vec<SchedulableResource>,
    pub report: DiscoveryReport,
}

/// Discovers and reconciles scheduled workloads across EKS clusters
pub struct EksService {
    platforms: Arc<dyn PlatformFactory>,
    /// One connection cache per (account, region)
    caches: DashMap<(String, String), Arc<ConnectionCache>>,
    cache_capacity: Option<usize>,
    metrics: SchedulerMetrics,
}

impl EksService {
    pub fn new(platforms: Arc<dyn PlatformFactory>, config: &SchedulerConfig) -> Self {
        Self {
            platforms,
            caches: DashMap::new(),
            cache_capacity: config.cache_capacity,
            metrics: SchedulerMetrics::new(),
        }
    }

    /// Service talking to the EKS control plane and cluster API servers
    pub fn aws(config: &SchedulerConfig) -> Self {
        Self::new(Arc::new(AwsPlatform), config)
    }

    /// Connection cache shared by discovery and reconciliation for the
    /// account and region of `args`
    pub fn cache(&self, args: &SchedulerArgs) -> Arc<ConnectionCache> {
        self.caches
            .entry((args.account.clone(), args.region.clone()))
            .or_insert_with(|| Arc::new(ConnectionCache::with_capacity(self.cache_capacity)))
            .value()
            .clone()
    }

    fn open(&self, args: &SchedulerArgs) -> Result<Platform> {
        if args.region.trim().is_empty() {
            return Err(SchedulerError::Config("region must not be empty".into()));
        }
        debug!(account = %args.account, region = %args.region, "Opening platform for call");
        self.platforms.open(
            &args.region,
            args.credentials.clone(),
            args.config.request_timeout(),
        )
    }

    /// Every workload that satisfies the annotation contract
    pub async fn get_schedulable_resources(
        &self,
        args: &SchedulerArgs,
    ) -> Result<Vec<SchedulableResource>> {
        Ok(self.discover(args, None).await?.resources)
    }

    /// Discovery pass, optionally restricted to one cluster
    pub async fn discover(
        &self,
        args: &SchedulerArgs,
        cluster: Option<String>,
    ) -> Result<Inventory> {
        let logger = args.logger();
        logger.log_discovery_started(&args.config.tag_name);
        let start = Instant::now();

        let platform = self.open(args)?;
        let discoverer = Discoverer::new(platform.compute, platform.sessions, self.cache(args));
        let report = discoverer
            .discover(&args.config.discovery_options(cluster))
            .await?;
        let resources = normalize_all(&report.workloads, &args.config.tag_name, &self.metrics);

        logger.log_discovery_completed(
            report.clusters_scanned.len(),
            resources.len(),
            report.failures.len(),
            start.elapsed().as_millis(),
        );
        Ok(Inventory { resources, report })
    }

    /// Scale every resource in `args` to zero
    pub fn stop_instances(
        &self,
        args: SchedulerArgs,
    ) -> Result<impl Stream<Item = (String, ReconcileOutcome)>> {
        let logger = args.logger();
        let outcomes = self.reconciler(&args)?.stop(args.resources);
        Ok(outcomes.map(move |outcome| {
            logger.log_outcome(&outcome);
            (outcome.id.clone(), outcome)
        }))
    }

    /// Restore every resource in `args` to its saved replica count
    pub fn start_instances(
        &self,
        args: SchedulerArgs,
    ) -> Result<impl Stream<Item = (String, ReconcileOutcome)>> {
        let logger = args.logger();
        let outcomes = self.reconciler(&args)?.start(args.resources);
        Ok(outcomes.map(move |outcome| {
            logger.log_outcome(&outcome);
            (outcome.id.clone(), outcome)
        }))
    }

    fn reconciler(&self, args: &SchedulerArgs) -> Result<Reconciler> {
        let platform = self.open(args)?;
        Ok(Reconciler::new(
            platform.sessions,
            self.cache(args),
            args.config.request_timeout(),
        ))
    }
}
