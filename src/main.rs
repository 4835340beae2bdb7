mod cli;
mod config;
mod consolidate;
mod control;
mod db;
mod embedding;
mod engine;
mod error;
mod events;
mod graph;
mod memory;
mod salience;
mod server;
mod tools;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rmcp::ServiceExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cortex", version, about = "Brain-inspired memory engine for LLM coding assistants")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server (stdio transport)
    Serve,
    /// Start the HTTP + WebSocket API server
    Http {
        /// Override the configured bind host
        #[arg(long)]
        host: Option<String>,
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one consolidation pass and exit
    Consolidate,
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to ~/.claude-cortex/models/
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::CortexConfig::load()?;

    // Log to stderr so stdout stays clean for MCP JSON-RPC.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve => {
            let engine = engine::Engine::new(config)?;
            engine.clone().start_workers();
            tracing::info!("starting Cortex MCP server on stdio");

            let handler = tools::CortexTools::new(engine);
            let server = handler.serve(rmcp::transport::stdio()).await?;
            tracing::info!("MCP server running — waiting for client");
            server.waiting().await?;
            tracing::info!("MCP server shut down");
        }
        Command::Http { host, port } => {
            let bind_host = host.unwrap_or_else(|| config.server.host.clone());
            let bind_port = port.unwrap_or(config.server.port);
            let engine = engine::Engine::new(config)?;
            engine.clone().start_workers();
            server::serve_http(engine, &bind_host, bind_port).await?;
        }
        Command::Consolidate => {
            let engine = engine::Engine::new(config)?;
            let outcome = engine.consolidate().await?;
            println!(
                "consolidated {} memories, refreshed {} decay scores, evicted {}",
                outcome.consolidated,
                outcome.decayed,
                outcome.deleted.len(),
            );
        }
        Command::Model { action } => match action {
            ModelAction::Download => {
                cli::model_download(&config.embedding).await?;
            }
        },
    }

    Ok(())
}
