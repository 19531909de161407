//! Stop and start commands

use anyhow::{bail, Context, Result};
use clap::Args;
use futures::StreamExt;
use scheduler_lib::reconciler::{collect_report, plan};
use scheduler_lib::{
    EksService, PatchStatus, ReconcileAction, SchedulableResource, SchedulerArgs, WorkloadKind,
};
use serde_json::json;
use tabled::Tabled;

use crate::output::{
    color_status, print_error, print_info, print_json, print_success, print_table,
    print_warning, OutputFormat,
};

/// Which discovered resources a stop/start applies to
#[derive(Args, Debug, Clone)]
pub struct SelectArgs {
    /// Resource ids (workload names)
    #[arg(required = true)]
    pub ids: Vec<String>,

    /// Only consider this cluster
    #[arg(long, short)]
    pub cluster: Option<String>,

    /// Only consider this namespace
    #[arg(long, short)]
    pub namespace: Option<String>,

    /// Only consider this workload kind (deployment or rollout)
    #[arg(long, short)]
    pub kind: Option<String>,

    /// Show the patches without sending them
    #[arg(long)]
    pub dry_run: bool,
}

/// Row for the outcome table
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Resource")]
    key: String,
    #[tabled(rename = "Target")]
    state: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Row for the dry-run table
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "Resource")]
    key: String,
    #[tabled(rename = "Patch")]
    patch: String,
}

/// Resources matching the selection, plus the ids that matched nothing
pub fn select(
    resources: Vec<SchedulableResource>,
    selection: &SelectArgs,
) -> Result<(Vec<SchedulableResource>, Vec<String>)> {
    let kind = selection
        .kind
        .as_deref()
        .map(str::parse::<WorkloadKind>)
        .transpose()?;

    let selected: Vec<SchedulableResource> = resources
        .into_iter()
        .filter(|r| selection.ids.contains(&r.id))
        .filter(|r| selection.namespace.as_ref().map(|ns| &r.namespace == ns).unwrap_or(true))
        .filter(|r| kind.map(|k| r.kind == k).unwrap_or(true))
        .collect();

    let missing = selection
        .ids
        .iter()
        .filter(|id| !selected.iter().any(|r| &r.id == *id))
        .cloned()
        .collect();

    Ok((selected, missing))
}

fn action_name(action: ReconcileAction) -> &'static str {
    match action {
        ReconcileAction::Stop => "stop",
        ReconcileAction::Start => "start",
    }
}

/// Discover, select and stop/start resources
pub async fn reconcile(
    service: &EksService,
    args: SchedulerArgs,
    action: ReconcileAction,
    selection: SelectArgs,
    format: OutputFormat,
) -> Result<()> {
    let inventory = service
        .discover(&args, selection.cluster.clone())
        .await
        .context("Discovery failed")?;
    let (selected, missing) = select(inventory.resources, &selection)?;

    for id in &missing {
        print_warning(&format!("No schedulable resource named {}", id));
    }
    if selected.is_empty() {
        bail!("Nothing to {}", action_name(action));
    }

    if selection.dry_run {
        return show_plan(action, &selected, format);
    }

    let args = args.with_resources(selected);
    let outcomes = match action {
        ReconcileAction::Stop => service.stop_instances(args)?.boxed_local(),
        ReconcileAction::Start => service.start_instances(args)?.boxed_local(),
    };
    let report = collect_report(outcomes.map(|(_, outcome)| outcome)).await;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            let rows: Vec<OutcomeRow> = report
                .outcomes
                .iter()
                .map(|o| {
                    let (status, reason) = match &o.status {
                        PatchStatus::Succeeded => ("succeeded", String::new()),
                        PatchStatus::Unchanged => ("unchanged", "already stopped".to_string()),
                        PatchStatus::Failed(reason) => ("failed", reason.clone()),
                    };
                    OutcomeRow {
                        key: o.key.clone(),
                        state: color_status(o.state.as_str()),
                        status: color_status(status),
                        reason,
                    }
                })
                .collect();
            print_table(rows, "No outcomes");
        }
    }

    let failed = report.failed().len();
    if failed > 0 {
        print_error(&format!(
            "{} of {} resources failed to {}",
            failed,
            report.outcomes.len(),
            action_name(action)
        ));
        bail!("{} failed", action_name(action));
    }

    print_success(&format!(
        "{} {} resources ({} unchanged)",
        match action {
            ReconcileAction::Stop => "Stopped",
            ReconcileAction::Start => "Started",
        },
        report.succeeded(),
        report.unchanged()
    ));
    Ok(())
}

fn show_plan(
    action: ReconcileAction,
    selected: &[SchedulableResource],
    format: OutputFormat,
) -> Result<()> {
    let planned: Vec<_> = selected
        .iter()
        .map(|r| (r.key(), plan(action, r)))
        .collect();

    match format {
        OutputFormat::Json => {
            let entries: Vec<_> = planned
                .iter()
                .map(|(key, patch)| json!({ "resource": key, "patch": patch }))
                .collect();
            print_json(&entries)?;
        }
        OutputFormat::Table => {
            print_warning("Dry-run mode - no changes applied");
            let count = planned.iter().filter(|(_, patch)| patch.is_some()).count();
            let rows: Vec<PlanRow> = planned
                .into_iter()
                .map(|(key, patch)| PlanRow {
                    key,
                    patch: patch
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "none (already stopped)".to_string()),
                })
                .collect();
            print_table(rows, "Nothing to patch");
            print_info(&format!("{} patches planned", count));
        }
    }

    Ok(())
}
