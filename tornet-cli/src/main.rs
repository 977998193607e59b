//! Tornet CLI
//!
//! Command-line client for the tornet storage overlay.
//!
//! # Commands
//! - `import` - Split a file into encrypted chunks and store them locally
//! - `export` - Reconstruct a file from its tornet id and checksum
//! - `publish` - Maintain a replication level for an imported file
//! - `unpublish` - Drop the replication intents for a file
//! - `serve` - Run the node: chunk service plus publish loop
//!
//! Exit codes: 0 success, 1 user error, 2 I/O error, 3 protocol error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use tornet_core::digest::Digest;
use tornet_core::error::TornetError;
use tornet_network::SimOverlay;
use tornet_node::{NodeConfig, NodeContext};

#[derive(Parser)]
#[command(name = "tornet")]
#[command(about = "Content-addressed peer-to-peer file storage")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = "tornet.toml", global = true)]
    config: PathBuf,

    /// Data directory override
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a file; prints `tornet_id checksum`
    Import {
        /// Path to the file
        path: PathBuf,

        /// Where to write the descriptor sidecar (default: `<path>.tornet`)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Export a file by tornet id and checksum
    Export {
        /// Tornet id (40-char hex)
        tornet_id: String,

        /// Plaintext checksum (40-char hex)
        checksum: String,

        /// Output path (default: the name recorded in the descriptor)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Maintain a replication level for an imported file
    Publish {
        tornet_id: String,
        checksum: String,
        replicas: u16,
    },

    /// Drop the replication intents for a file
    Unpublish { tornet_id: String },

    /// Run the node
    Serve,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("error: {}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(err: &TornetError) -> u8 {
    match err {
        TornetError::Io(_) | TornetError::Storage(_) | TornetError::Capacity(_) => 2,
        TornetError::Protocol(_)
        | TornetError::ChecksumMismatch { .. }
        | TornetError::BlockRejected { .. }
        | TornetError::BadSignature(_)
        | TornetError::Timeout(_)
        | TornetError::OutOfCredit { .. } => 3,
        TornetError::NotFound(_) | TornetError::InvalidInput(_) | TornetError::Cancelled => 1,
    }
}

async fn run(cli: Cli) -> Result<(), TornetError> {
    let config = NodeConfig::load_or_default(&cli.config)
        .with_env_overrides()
        .with_overrides(cli.data_dir.clone());
    config.validate()?;

    // A development overlay: the local node is its only member until a
    // routing layer and transport are wired in.
    let overlay = SimOverlay::new();
    let node_id = tornet_node::derive_node_id(config.node.id_seed.as_deref());
    let ctx = NodeContext::new(
        node_id,
        config,
        overlay.routing(node_id),
        overlay.transport(node_id),
    )?;

    match cli.command {
        Commands::Import { path, out } => {
            let (tornet_id, checksum) = ctx.engine.import(&path, out.as_deref())?;
            println!("{} {}", tornet_id, checksum);
        }
        Commands::Export {
            tornet_id,
            checksum,
            out,
        } => {
            let tornet_id = Digest::from_hex(&tornet_id)?;
            let checksum = Digest::from_hex(&checksum)?;
            let written = ctx.engine.export(&tornet_id, &checksum, out.as_deref())?;
            println!("{}", written.display());
        }
        Commands::Publish {
            tornet_id,
            checksum,
            replicas,
        } => {
            let tornet_id = Digest::from_hex(&tornet_id)?;
            let checksum = Digest::from_hex(&checksum)?;
            ctx.engine.publish(&tornet_id, &checksum, replicas)?;
        }
        Commands::Unpublish { tornet_id } => {
            let tornet_id = Digest::from_hex(&tornet_id)?;
            ctx.engine.unpublish(&tornet_id)?;
        }
        Commands::Serve => {
            overlay.add_node(ctx.chunk_service());
            let publisher = ctx.publish_loop();
            let handle = publisher.start();
            info!(node_id = %ctx.node_id, "node running, ctrl-c to stop");

            tokio::signal::ctrl_c().await?;
            publisher.stop();
            let _ = handle.await;
        }
    }
    Ok(())
}
