//! Discovery command

use anyhow::{Context, Result};
use scheduler_lib::{EksService, SchedulableResource, SchedulerArgs};
use serde_json::json;
use tabled::Tabled;

use crate::output::{
    color_status, format_replicas, print_json, print_table, print_warning, OutputFormat,
};

/// Row for the resources table
#[derive(Tabled)]
pub struct ResourceRow {
    #[tabled(rename = "Cluster")]
    cluster: String,
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Schedule")]
    schedule: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Replicas (cur/saved)")]
    replicas: String,
}

impl From<&SchedulableResource> for ResourceRow {
    fn from(r: &SchedulableResource) -> Self {
        Self {
            cluster: r.cluster.clone(),
            namespace: r.namespace.clone(),
            kind: r.kind.to_string(),
            name: r.name.clone(),
            schedule: r.schedule.clone(),
            state: color_status(r.state.as_str()),
            replicas: format_replicas(r.current_replicas, r.saved_replicas),
        }
    }
}

/// Run a discovery pass and print every schedulable resource
pub async fn show_resources(
    service: &EksService,
    args: &SchedulerArgs,
    cluster: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let inventory = service
        .discover(args, cluster)
        .await
        .context("Discovery failed")?;

    match format {
        OutputFormat::Json => print_json(&json!({
            "resources": inventory.resources,
            "clusters_scanned": inventory.report.clusters_scanned,
            "clusters_skipped": inventory.report.clusters_skipped,
            "failures": inventory.report.failures,
        }))?,
        OutputFormat::Table => {
            let rows: Vec<ResourceRow> =
                inventory.resources.iter().map(ResourceRow::from).collect();
            print_table(rows, "No schedulable resources found");

            for failure in &inventory.report.failures {
                let scope = match failure.kind {
                    Some(kind) => format!("{} ({}s)", failure.cluster, kind),
                    None => failure.cluster.clone(),
                };
                print_warning(&format!("{}: {}", scope, failure.error));
            }

            println!(
                "\nTotal: {} resources in {} clusters ({} skipped)",
                inventory.resources.len(),
                inventory.report.clusters_scanned.len(),
                inventory.report.clusters_skipped.len()
            );
        }
    }

    Ok(())
}
