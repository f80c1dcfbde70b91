//! Bare-Metal Storage
//!
//! Plans the storage layout described by a deployment document and builds
//! it on the local host under the chosen partitioning policy.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use baremetal_storage::{
    CommandExecutorRef, Deployment, DeviceResolver, HardwareInventoryRef, HostInventory,
    PartitionPolicy, PlannerConfig, Planner, PolicyExecutor, Result, StaticInventory,
    SystemExecutor,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Storage layout planner and executor for bare-metal deployments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Deployment document (YAML or JSON)
    #[arg(long, env = "DEPLOYMENT")]
    deployment: PathBuf,

    /// Planner configuration file (YAML)
    #[arg(long, env = "PLANNER_CONFIG")]
    config: Option<PathBuf>,

    /// Override the document's partitioning policy (verify, clean, legacy)
    #[arg(long, env = "PARTITIONING_POLICY")]
    policy: Option<PartitionPolicy>,

    /// Print the planned scheme as JSON and stop
    #[arg(long)]
    dry_run: bool,

    /// Resolve devices from a JSON inventory file instead of the host
    #[arg(long, env = "INVENTORY")]
    inventory: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args);

    if let Err(e) = run(args).await {
        error!("Storage build failed ({:?}): {}", e.kind(), e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    info!("Starting {} {}", baremetal_storage::NAME, baremetal_storage::VERSION);

    let config = match &args.config {
        Some(path) => PlannerConfig::from_file(path)?,
        None => PlannerConfig::default(),
    };
    let deployment = Deployment::from_file(&args.deployment)?;
    let policy = args.policy.unwrap_or(deployment.partitioning_policy);

    info!("  Deployment: {}", args.deployment.display());
    info!("  Policy: {}", policy);
    info!("  Dry run: {}", args.dry_run);

    let executor: CommandExecutorRef = Arc::new(SystemExecutor);
    let inventory: HardwareInventoryRef = match &args.inventory {
        Some(path) => Arc::new(StaticInventory::from_file(path)?),
        None => Arc::new(HostInventory::new(executor.clone())),
    };
    let resolver = DeviceResolver::new(inventory);

    let plan = Planner::new(&config, &resolver).plan(&deployment).await?;

    if args.dry_run {
        println!("{}", serde_json::to_string_pretty(&plan.scheme)?);
        return Ok(());
    }

    let report = PolicyExecutor::new(executor, config)
        .apply(policy, &plan.scheme, &deployment.image_targets())
        .await?;

    info!(
        "Build complete: rebuilt {}, formatted {:?}",
        report.rebuilt, report.formatted
    );
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
