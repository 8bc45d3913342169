use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

mod cli;
mod config;

use crate::config::PiecesCliConfig;

#[derive(Parser)]
#[command(name = "pieces")]
#[command(about = "Ask the PiecesOS copilot from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.pieces-cli)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// PiecesOS host (overrides config)
    #[arg(long, global = true)]
    host: Option<String>,

    /// PiecesOS port (overrides config; disables port scanning)
    #[arg(long, global = true)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a single question and stream the answer
    Ask(AskArgs),

    /// Chat interactively, keeping the conversation between questions
    Chat(ChatArgs),

    /// Check whether PiecesOS is reachable
    Status,
}

#[derive(Parser)]
struct AskArgs {
    /// The question
    #[arg(required = true, num_args = 1..)]
    query: Vec<String>,

    /// Model id to answer with
    #[arg(short, long)]
    model: Option<String>,

    /// Attach a file as context (repeatable)
    #[arg(short, long = "file")]
    files: Vec<PathBuf>,

    /// Attach a saved snippet by id (repeatable)
    #[arg(short, long = "snippet")]
    snippets: Vec<String>,

    /// Print only the final answer
    #[arg(long)]
    no_stream: bool,
}

#[derive(Parser)]
struct ChatArgs {
    /// Model id to answer with
    #[arg(short, long)]
    model: Option<String>,
}

fn init_logging(debug: bool) {
    let default_directive = if debug {
        "pieces=debug,pieces_cli=debug,copilot_stream=debug,warn"
    } else {
        "pieces=warn,pieces_cli=warn,copilot_stream=warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = PiecesCliConfig::new(cli.data_dir.clone())?;
    let mut file = config.file_config()?;
    if let Some(host) = cli.host {
        file.pieces.host = host;
    }
    if let Some(port) = cli.port {
        file.pieces.port = port;
        file.pieces.scan_ports = false;
    }

    match cli.command {
        Commands::Ask(args) => {
            let materials = cli::Materials {
                files: args.files,
                snippets: args.snippets,
            };
            cli::ask_command(
                &file,
                args.query.join(" "),
                args.model,
                materials,
                !args.no_stream,
            )
            .await
        }
        Commands::Chat(args) => cli::chat_command(&file, args.model).await,
        Commands::Status => cli::status_command(&file).await,
    }
}
