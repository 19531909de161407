//! Configuration management for the CLI

use anyhow::{Context, Result};
use scheduler_lib::SchedulerConfig;

use crate::GlobalArgs;

/// Load the scheduler configuration and apply command-line overrides
pub fn load(global: &GlobalArgs) -> Result<SchedulerConfig> {
    let mut config = SchedulerConfig::load(global.config.as_deref())
        .context("Failed to load scheduler configuration")?;

    if let Some(region) = &global.region {
        config.region = region.clone();
    }
    if let Some(account) = &global.account {
        config.account = account.clone();
    }

    config.validate().context("Invalid scheduler configuration")?;
    Ok(config)
}
