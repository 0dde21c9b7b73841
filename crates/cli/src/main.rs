//! ragline CLI: the main entry point.
//!
//! Commands:
//! - `init`    Write a default config file
//! - `serve`   Start the HTTP gateway
//! - `ask`     One question, or an interactive session without one
//! - `status`  Show configuration and engine status

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "ragline",
    about = "ragline: retrieval-augmented chat over a local language model",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init,

    /// Start the HTTP gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Ask a question, optionally grounded in local text files
    Ask {
        /// The question; omit it for an interactive session
        question: Option<String>,

        /// A plain-text file to retrieve from (repeatable)
        #[arg(short, long = "doc")]
        docs: Vec<PathBuf>,
    },

    /// Show configuration and engine status
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => commands::init::run().await?,
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Ask { question, docs } => commands::ask::run(question, docs).await?,
        Commands::Status => commands::status::run().await?,
    }

    Ok(())
}
