//! gpuadmit CLI
//!
//! Command-line interface for the gpuadmit daemon and local telemetry probes.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// gpuadmit - real-time GPU usage admission for shared-GPU scheduling
#[derive(Parser, Debug)]
#[command(name = "gpuadmit")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Daemon API address
    #[arg(long, default_value = "http://localhost:9095", global = true)]
    api: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Filter candidate nodes for a pod
    Filter {
        /// Pod spec as a JSON file
        #[arg(long)]
        pod: PathBuf,

        /// Candidate node (repeatable)
        #[arg(long = "node", required = true)]
        nodes: Vec<String>,
    },

    /// List nodes in the device inventory
    Nodes,

    /// Show devices and cached usage on a node
    Devices {
        /// Node ID
        node: String,
    },

    /// Record capacity committed to a pod
    Commit {
        node: String,
        device: String,
        /// Memory in MB
        #[arg(long)]
        memory_mb: u64,
        #[arg(long, default_value_t = 0)]
        compute_units: u32,
    },

    /// Return capacity previously committed to a pod
    Release {
        node: String,
        device: String,
        /// Memory in MB
        #[arg(long)]
        memory_mb: u64,
        #[arg(long, default_value_t = 0)]
        compute_units: u32,
    },

    /// Show the process-wide real-time check policy
    Policy,

    /// Show daemon status
    Status,

    /// Query device telemetry locally, without the daemon
    Probe {
        /// Vendor tag (NVIDIA, AMD, HYGON, ...)
        #[arg(long, default_value = "NVIDIA")]
        vendor: String,

        /// Deadline for all queries, in milliseconds
        #[arg(long, default_value_t = gpuadmit_core::DEFAULT_TELEMETRY_TIMEOUT_MS)]
        timeout_ms: u64,

        /// Device UUIDs
        #[arg(required = true)]
        uuids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let client = commands::ApiClient::new(&cli.api);

    match cli.command {
        Commands::Filter { pod, nodes } => {
            commands::filter(&client, &pod, nodes).await?;
        }
        Commands::Nodes => {
            commands::nodes(&client).await?;
        }
        Commands::Devices { node } => {
            commands::devices(&client, &node).await?;
        }
        Commands::Commit {
            node,
            device,
            memory_mb,
            compute_units,
        } => {
            commands::update_usage(&client, "commit", node, device, memory_mb, compute_units)
                .await?;
        }
        Commands::Release {
            node,
            device,
            memory_mb,
            compute_units,
        } => {
            commands::update_usage(&client, "release", node, device, memory_mb, compute_units)
                .await?;
        }
        Commands::Policy => {
            commands::policy(&client).await?;
        }
        Commands::Status => {
            commands::status(&client).await?;
        }
        Commands::Probe {
            vendor,
            timeout_ms,
            uuids,
        } => {
            commands::probe(&vendor, timeout_ms, uuids).await?;
        }
    }

    Ok(())
}
