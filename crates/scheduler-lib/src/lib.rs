//! Scheduling library for EKS workloads
//!
//! This crate provides the core functionality for:
//! - Discovering deployments and Argo rollouts on clusters tagged for scheduling
//! - Deriving each workload's state from its replicas and annotations
//! - Stopping and starting workloads while preserving the saved replica count
//! - Caching per-cluster connection details across passes
//! - Sanitizing tag values and observability

pub mod auth;
pub mod cache;
pub mod config;
pub mod determiner;
pub mod discovery;
pub mod error;
pub mod models;
pub mod observability;
pub mod platform;
pub mod reconciler;
pub mod sanitizer;
pub mod service;

pub use cache::ConnectionCache;
pub use config::SchedulerConfig;
pub use error::{Result, SchedulerError};
pub use models::*;
pub use observability::{SchedulerMetrics, StructuredLogger};
pub use service::{EksService, Inventory, SchedulerArgs};
