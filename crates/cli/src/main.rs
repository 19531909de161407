//! EKS Workload Scheduler CLI
//!
//! A command-line tool for discovering scheduled workloads on EKS clusters
//! and stopping or starting them by hand.

mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use commands::{discover, reconcile, sanitize};
use scheduler_lib::auth::DefaultCredentialChain;
use scheduler_lib::{EksService, ReconcileAction, SchedulerArgs, SchedulerMetrics};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// EKS Workload Scheduler CLI
#[derive(Parser)]
#[command(name = "eks-scheduler")]
#[command(author, version, about = "CLI for the EKS Workload Scheduler", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    /// Log format written to stderr
    #[arg(long, global = true, default_value = "text")]
    pub log_format: output::LogFormat,

    /// Print Prometheus metrics after the command finishes
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command that talks to AWS
#[derive(Args)]
pub struct GlobalArgs {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, global = true, env = "EKS_SCHEDULER_CONFIG")]
    pub config: Option<PathBuf>,

    /// AWS region, overrides the configuration
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// AWS account id used to label logs, overrides the configuration
    #[arg(long, global = true)]
    pub account: Option<String>,

    /// Shared config profile to take AWS credentials from
    #[arg(long, global = true)]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List workloads that can be scheduled
    Discover {
        /// Only scan this cluster
        #[arg(long, short)]
        cluster: Option<String>,
    },

    /// Scale workloads to zero, saving their replica count
    Stop(reconcile::SelectArgs),

    /// Restore workloads to their saved replica count
    Start(reconcile::SelectArgs),

    /// Show how tag values would be sanitized
    Sanitize {
        /// Tag values to sanitize
        #[arg(required = true)]
        values: Vec<String>,
    },
}

fn init_tracing(format: output::LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        output::LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        output::LogFormat::Text => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init(),
    }
}

/// Build the service and call arguments from configuration and the AWS
/// credential provider chain
async fn connect(global: &GlobalArgs) -> Result<(EksService, SchedulerArgs)> {
    let config = config::load(global)?;
    debug!(region = %config.region, account = %config.account, "Scheduler configured");

    let credentials = DefaultCredentialChain::load(&config.region, global.profile.as_deref())
        .await
        .context("Failed to resolve AWS credentials")?;
    let service = EksService::aws(&config);

    Ok((service, SchedulerArgs::new(config, Arc::new(credentials))))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let result = match cli.command {
        Commands::Discover { cluster } => {
            let (service, args) = connect(&cli.global).await?;
            discover::show_resources(&service, &args, cluster, cli.format).await
        }
        Commands::Stop(select) => {
            let (service, args) = connect(&cli.global).await?;
            reconcile::reconcile(&service, args, ReconcileAction::Stop, select, cli.format).await
        }
        Commands::Start(select) => {
            let (service, args) = connect(&cli.global).await?;
            reconcile::reconcile(&service, args, ReconcileAction::Start, select, cli.format).await
        }
        Commands::Sanitize { values } => sanitize::show_sanitized(&values, cli.format),
    };

    if cli.metrics {
        print!("{}", SchedulerMetrics::new().render());
    }

    result
}
