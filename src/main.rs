use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sysbench_queue::approval::OwnerOrReviewerPolicy;
use sysbench_queue::config::EngineConfig;
use sysbench_queue::node::Node;
use sysbench_queue::scheduler::Instance;
use sysbench_queue::shutdown::install_shutdown_handler;
use sysbench_queue::worker::{parse_metrics, WorkerId};

#[derive(Parser, Debug)]
#[command(name = "sysbench-queue")]
#[command(version)]
#[command(about = "Approval-gated sysbench job queue with per-instance fairness")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a worker with the HTTP dashboard
    Server(ServerArgs),

    /// Parse a saved sysbench report and print its latency metrics as JSON
    Parse {
        /// File holding sysbench stdout
        file: PathBuf,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Port for the web dashboard (omit to run without one)
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Path to the sysbench executable
    #[arg(long, default_value = "sysbench")]
    sysbench: PathBuf,

    /// Directory for generated driver scripts (defaults to the temp dir)
    #[arg(long)]
    script_dir: Option<PathBuf>,

    /// Seconds a job may wait in an instance queue before timing out
    #[arg(long, default_value = "86400")]
    claim_ttl_secs: u64,

    /// Queue re-check interval in milliseconds
    #[arg(long, default_value = "1000")]
    poll_interval_ms: u64,

    /// JSON file listing the database instances jobs may target
    #[arg(long)]
    instances: PathBuf,

    /// User allowed to approve and reject jobs (repeatable)
    #[arg(long = "reviewer")]
    reviewers: Vec<String>,
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let raw = tokio::fs::read_to_string(&args.instances).await?;
    let instances: Vec<Instance> = serde_json::from_str(&raw)?;
    if instances.is_empty() {
        return Err(format!("no instances defined in {}", args.instances.display()).into());
    }

    let dashboard_addr: Option<SocketAddr> = match args.dashboard_port {
        Some(p) => Some(format!("0.0.0.0:{}", p).parse()?),
        None => None,
    };

    let mut config = EngineConfig::new(WorkerId::new())
        .with_program(args.sysbench)
        .with_claim_ttl_secs(args.claim_ttl_secs)
        .with_poll_interval_ms(args.poll_interval_ms);
    if let Some(dir) = args.script_dir {
        tokio::fs::create_dir_all(&dir).await?;
        config = config.with_script_dir(dir);
    }

    tracing::info!(
        worker = %config.worker_id,
        instances = instances.len(),
        reviewers = args.reviewers.len(),
        "Starting sysbench queue"
    );

    let approvals = Arc::new(OwnerOrReviewerPolicy::new(args.reviewers));
    let node = Node::new(config, instances, approvals, dashboard_addr).await;

    let shutdown = install_shutdown_handler()?;
    node.run(shutdown).await;
    Ok(())
}

async fn run_parse(file: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let stdout = tokio::fs::read_to_string(&file).await?;
    let metrics = parse_metrics(&stdout);
    if metrics.is_empty() {
        tracing::warn!(file = %file.display(), "No latency metrics found");
    }
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await,
        Commands::Parse { file } => run_parse(file).await,
    }
}
