//! stretchguard - desired-state configuration for stretched clusters
//!
//! This is the main CLI entry point.

use clap::{Args, Parser, Subcommand};
use stretchguard::config::{Overrides, Settings};
use stretchguard::error::Result;
use stretchguard::platform::{Inventory, Platform, RestPlatform};
use stretchguard::policy::{DesiredRuleSet, FaultTolerance, Locality};
use stretchguard::runner::{RunSummary, Runner};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Keeps stretched clusters' tags, affinity rules and storage policies in shape
#[derive(Parser)]
#[command(name = "stretchguard")]
#[command(version)]
#[command(about = "Desired-state configuration for stretched clusters", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Storage fault tolerance; defaults to mirroring with one sub-failure
#[derive(Args, Debug, Default)]
#[group(multiple = false)]
struct PolicyArgs {
    /// Mirror objects, tolerating N sub-failures (0-3)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=3))]
    ftt: Option<u8>,
    /// Erasure coding with single parity
    #[arg(long)]
    raid5: bool,
    /// Erasure coding with double parity
    #[arg(long)]
    raid6: bool,
}

impl PolicyArgs {
    fn fault_tolerance(&self) -> Option<FaultTolerance> {
        if let Some(failures) = self.ftt {
            Some(FaultTolerance::Mirror { failures })
        } else if self.raid5 {
            Some(FaultTolerance::Raid5)
        } else if self.raid6 {
            Some(FaultTolerance::Raid6)
        } else {
            None
        }
    }
}

#[derive(Args, Debug, Default)]
struct TargetArgs {
    /// Tag category holding one tag per fault domain
    #[arg(long)]
    category: Option<String>,
    /// Cluster name or wildcard pattern
    #[arg(long)]
    cluster: Option<String>,
    /// Print every touched tag assignment and policy as JSON
    #[arg(long)]
    passthru: bool,
    /// Reconcile clusters concurrently
    #[arg(long)]
    parallel: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile clusters on a management endpoint
    Apply {
        /// Management endpoint URL
        #[arg(long)]
        endpoint: Option<String>,
        /// User to log in as
        #[arg(short, long)]
        username: Option<String>,
        /// Skip TLS certificate verification
        #[arg(long)]
        insecure: bool,
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Run a full pass against an inventory file instead of a live endpoint
    Rehearse {
        /// Inventory file describing clusters and existing resources
        #[arg(short, long)]
        inventory: PathBuf,
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Print the storage rules each fault domain would get
    Rules {
        #[command(flatten)]
        policy: PolicyArgs,
    },
}

fn overrides(target: TargetArgs, policy: &PolicyArgs) -> Overrides {
    Overrides {
        category: target.category,
        cluster: target.cluster,
        fault_tolerance: policy.fault_tolerance(),
        passthru: target.passthru,
        parallel: target.parallel,
        ..Default::default()
    }
}

async fn run(platform: Arc<dyn Platform>, settings: &Settings) -> Result<RunSummary> {
    let runner = Runner::new(platform, settings.run_options())?;
    runner.run().await
}

fn print_summary(summary: &RunSummary) -> Result<()> {
    println!(
        "{:<24} {:<12} {:>8} {:>10}  {}",
        "CLUSTER", "CATEGORY", "CREATED", "COMPLIANT", "STATUS"
    );
    for outcome in &summary.outcomes {
        match &outcome.result {
            Ok(report) => println!(
                "{:<24} {:<12} {:>8} {:>10}  {}",
                outcome.cluster.name,
                report.category.to_string(),
                report.created(),
                report.compliant(),
                "ok"
            ),
            Err(e) => println!(
                "{:<24} {:<12} {:>8} {:>10}  failed: {}",
                outcome.cluster.name, "-", "-", "-", e
            ),
        }
    }

    for report in summary.succeeded() {
        for touched in &report.passthru {
            println!("{}", serde_json::to_string(touched)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::load_or_default(cli.config.as_deref())?;

    let summary = match cli.command {
        Commands::Apply {
            endpoint,
            username,
            insecure,
            target,
            policy,
        } => {
            let overrides = Overrides {
                endpoint,
                username,
                insecure,
                ..overrides(target, &policy)
            };
            let settings = overrides.apply(settings).with_env();
            settings.validate()?;

            let platform = RestPlatform::connect(&settings.rest_settings()?).await?;
            run(Arc::new(platform), &settings).await?
        }

        Commands::Rehearse {
            inventory,
            target,
            policy,
        } => {
            let settings = overrides(target, &policy).apply(settings);
            settings.validate()?;

            let platform = Arc::new(Inventory::parse_file(&inventory)?.into_platform()?);
            let summary = run(platform.clone(), &settings).await?;

            let journal = platform.journal()?;
            println!("{} change(s) would be made:", journal.len());
            for mutation in journal {
                println!("  {}", mutation);
            }
            println!();
            summary
        }

        Commands::Rules { policy } => {
            let tolerance = policy
                .fault_tolerance()
                .unwrap_or(settings.fault_tolerance);
            let template = DesiredRuleSet::build(tolerance)?;
            let rules = serde_json::json!({
                "preferred": template.for_domain(Locality::Preferred).to_wire(),
                "secondary": template.for_domain(Locality::Secondary).to_wire(),
            });
            println!("{}", serde_json::to_string_pretty(&rules)?);
            return Ok(());
        }
    };

    print_summary(&summary)?;
    if !summary.is_success() {
        std::process::exit(1);
    }

    Ok(())
}
