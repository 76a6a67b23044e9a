//! Citeline CLI: index PDF folders and ask grounded questions about them.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Citeline: answers from your PDFs, with the pages to prove it
#[derive(Parser, Debug)]
#[command(name = "citeline", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Index PDF documents from a folder
    Index {
        /// Folder containing PDF files
        folder: PathBuf,

        /// Include subdirectories
        #[arg(short, long)]
        recursive: bool,

        /// Reindex documents that are already indexed
        #[arg(short, long)]
        force: bool,
    },
    /// Ask a question about the indexed documents
    #[command(visible_alias = "ask")]
    Query {
        /// Natural language question
        question: String,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,

        /// Omit verbatim quotes from citations
        #[arg(long)]
        no_quotes: bool,

        /// Maximum sources to cite
        #[arg(long)]
        max_sources: Option<usize>,
    },
    /// Show indexing status
    Status,
    /// Delete all indexed data
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default workspace configuration file
    Init,
    /// Print the effective configuration
    Show,
}

fn main() {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error".to_string(),
        0 => std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "citeline", "citeline")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "citeline.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let options = commands::Options {
        workspace,
        config: cli.config,
        verbose: cli.verbose > 0,
        quiet: cli.quiet,
    };

    if let Err(e) = commands::handle_command(cli.command, &options) {
        eprintln!("Error: {}", commands::describe_error(&e));
        drop(_guard);
        std::process::exit(1);
    }
}
