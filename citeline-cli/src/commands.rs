//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use citeline_core::config::CitelineConfig;
use citeline_core::providers::{OpenAiCompatibleProvider, embedder_for};
use citeline_core::store::{SqliteMetadataStore, SqliteVectorStore};
use citeline_core::{
    Chunker, CitelineError, DocumentStatus, Generator, IndexStatus, Indexer, MetadataStore,
    ProviderError, RagPipeline, RerankerHandle, Retriever, SidecarTextSource, VectorStore,
    clear_index,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Global flags shared by every subcommand.
pub struct Options {
    pub workspace: PathBuf,
    pub config: Option<PathBuf>,
    pub verbose: bool,
    pub quiet: bool,
}

/// Handle a CLI subcommand.
pub fn handle_command(command: Commands, options: &Options) -> anyhow::Result<()> {
    match command {
        Commands::Index {
            folder,
            recursive,
            force,
        } => handle_index(&folder, recursive, force, options),
        Commands::Query {
            question,
            json,
            no_quotes,
            max_sources,
        } => handle_query(&question, json, no_quotes, max_sources, options),
        Commands::Status => handle_status(options),
        Commands::Clear { yes } => handle_clear(yes, options),
        Commands::Config { action } => handle_config(action, options),
    }
}

fn load_config(options: &Options) -> anyhow::Result<CitelineConfig> {
    let mut config =
        citeline_core::load_config(Some(&options.workspace), options.config.as_deref())
            .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if config.storage.data_dir.is_relative() {
        config.storage.data_dir = options.workspace.join(&config.storage.data_dir);
    }
    tracing::debug!(data_dir = %config.storage.data_dir.display(), "Loaded configuration");
    Ok(config)
}

fn open_stores(
    config: &CitelineConfig,
) -> anyhow::Result<(Arc<SqliteVectorStore>, Arc<SqliteMetadataStore>)> {
    config.storage.ensure_directories()?;
    let vectors = SqliteVectorStore::open(&config.storage.vector_db_path())?;
    let metadata = SqliteMetadataStore::open(&config.storage.metadata_db_path())?;
    Ok((Arc::new(vectors), Arc::new(metadata)))
}

fn handle_index(
    folder: &Path,
    recursive: bool,
    force: bool,
    options: &Options,
) -> anyhow::Result<()> {
    if !folder.is_dir() {
        anyhow::bail!("Folder not found: {}", folder.display());
    }
    let config = load_config(options)?;
    let provider = Arc::new(OpenAiCompatibleProvider::new(&config.provider)?);
    let embedder = embedder_for(&config.provider, provider.clone());
    let (vectors, metadata) = open_stores(&config)?;

    let chunker = Chunker::new(provider, embedder, config.chunking.clone());
    let indexer = Indexer::new(Arc::new(SidecarTextSource::new()), chunker, vectors, metadata);

    if !options.quiet {
        println!("Indexing PDFs from: {}\n", folder.display());
    }
    let quiet = options.quiet;
    let summary = indexer.index_folder(folder, recursive, force, |name, current, total| {
        if !quiet {
            eprintln!("  [{}/{}] {}", current, total, name);
        }
    })?;

    if summary.total_documents == 0 {
        println!("No PDF files found in the specified folder.");
        return Ok(());
    }

    if options.verbose {
        println!();
        for result in &summary.results {
            if result.is_success() {
                println!(
                    "  ok   {} ({} pages, {} chunks)",
                    result.document.name, result.document.page_count, result.chunks_created
                );
            } else {
                println!(
                    "  fail {}: {}",
                    result.document.name,
                    result.error_message.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }

    println!("\nIndexing complete!");
    println!("  Documents indexed: {}", summary.indexed);
    if summary.skipped > 0 {
        println!("  Documents skipped: {}", summary.skipped);
    }
    if summary.failed > 0 {
        println!("  Documents failed: {}", summary.failed);
    }
    println!("  Total chunks: {}", summary.total_chunks);
    println!("  Time elapsed: {}", format_duration(summary.elapsed_seconds));
    Ok(())
}

fn handle_query(
    question: &str,
    json: bool,
    no_quotes: bool,
    max_sources: Option<usize>,
    options: &Options,
) -> anyhow::Result<()> {
    let config = load_config(options)?;
    let (vectors, metadata) = open_stores(&config)?;
    if metadata.count(Some(DocumentStatus::Completed))? == 0 {
        anyhow::bail!(
            "No documents have been indexed yet.\n\
             Run 'citeline index <folder>' to index documents first."
        );
    }

    let provider = Arc::new(OpenAiCompatibleProvider::new(&config.provider)?);
    let embedder = embedder_for(&config.provider, provider.clone());
    let reranker = Arc::new(RerankerHandle::from_config(&config.reranker));
    let retriever = Retriever::new(embedder, vectors, reranker, config.retrieval.clone());
    let generator = Generator::new(provider, config.generation.clone());
    let pipeline = RagPipeline::new(retriever, generator);

    let answer = pipeline.ask(question, max_sources)?;

    if json {
        let mut output = answer.response.to_json_dict();
        if options.verbose {
            output["timing"] = answer.timing_json();
        }
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}", answer.response.format_human_readable(!no_quotes));
    if options.verbose {
        println!("\nTiming breakdown:");
        println!("  Embedding:  {}ms", answer.retrieval.embedding_time_ms);
        println!("  Search:     {}ms", answer.retrieval.retrieval_time_ms);
        println!("  Reranking:  {}ms", answer.retrieval.rerank_time_ms);
        println!("  Generation: {}ms", answer.generation_time_ms());
    }
    Ok(())
}

fn handle_status(options: &Options) -> anyhow::Result<()> {
    let config = load_config(options)?;
    let (vectors, metadata) = open_stores(&config)?;
    let status = IndexStatus::collect(vectors.as_ref(), metadata.as_ref(), 5)?;
    println!("{}", render_status(&status, &config));
    Ok(())
}

fn render_status(status: &IndexStatus, config: &CitelineConfig) -> String {
    let mut lines = vec![
        "Citeline Index Status".to_string(),
        "=".repeat(21),
        format!("Documents indexed: {}", status.completed_documents),
    ];
    if status.failed_documents > 0 {
        lines.push(format!("Documents failed: {}", status.failed_documents));
    }
    lines.push(format!("Total chunks: {}", status.total_chunks));
    if let Some(latest) = status.recent.first() {
        lines.push(format!(
            "Last indexed: {}",
            latest.indexed_at.format("%Y-%m-%d %H:%M:%S")
        ));
    }

    lines.push(String::new());
    lines.push("Storage:".to_string());
    lines.push(format!(
        "  Vector DB: {} ({})",
        format_size(status.vector_bytes),
        config.storage.vector_db_path().display()
    ));
    lines.push(format!(
        "  Metadata: {} ({})",
        format_size(status.metadata_bytes),
        config.storage.metadata_db_path().display()
    ));

    if !status.recent.is_empty() {
        lines.push(String::new());
        lines.push("Recent documents:".to_string());
        for doc in &status.recent {
            let marker = if doc.status == DocumentStatus::Completed {
                "ok  "
            } else {
                "fail"
            };
            lines.push(format!(
                "  {} {} ({} pages, {} chunks)",
                marker, doc.name, doc.page_count, doc.chunk_count
            ));
        }
    }
    lines.join("\n")
}

fn handle_clear(yes: bool, options: &Options) -> anyhow::Result<()> {
    let config = load_config(options)?;
    let (vectors, metadata) = open_stores(&config)?;

    let documents = metadata.count(None)?;
    let chunks = vectors.get_count()?;
    if documents == 0 && chunks == 0 {
        println!("No indexed data to clear.");
        return Ok(());
    }

    if !yes {
        println!("This will delete {} documents and {} chunks.", documents, chunks);
        let confirmed = dialoguer::Confirm::new()
            .with_prompt("Are you sure?")
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let (docs_deleted, chunks_deleted) = clear_index(vectors.as_ref(), metadata.as_ref())?;
    println!(
        "Cleared {} documents and {} chunks.",
        docs_deleted, chunks_deleted
    );
    Ok(())
}

fn handle_config(action: ConfigAction, options: &Options) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = options.workspace.join(".citeline");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&CitelineConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(options)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// User-facing explanation for a failed command.
pub fn describe_error(error: &anyhow::Error) -> String {
    for cause in error.chain() {
        let provider = cause.downcast_ref::<ProviderError>().or_else(|| {
            match cause.downcast_ref::<CitelineError>() {
                Some(CitelineError::Provider(e)) => Some(e),
                _ => None,
            }
        });
        if let Some(e) = provider {
            return describe_provider_error(e);
        }
    }
    error.to_string()
}

fn describe_provider_error(error: &ProviderError) -> String {
    match error {
        ProviderError::RateLimited { retry_after_secs } => format!(
            "API rate limit exceeded.\nPlease wait {}s and try again.",
            retry_after_secs
        ),
        ProviderError::Auth { provider } => format!(
            "Authentication failed for {}.\nCheck the key in the variable named by provider.api_key_env.",
            provider
        ),
        ProviderError::Network { message } => format!(
            "Network connection failed ({}).\nPlease check your connection and try again.",
            message
        ),
        ProviderError::ModelUnavailable { message } => format!("Model unavailable: {}", message),
        ProviderError::InvalidResponse { .. } => error.to_string(),
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        return format!("{:.1}s", seconds);
    }
    let total = seconds as u64;
    format!("{}m {}s", total / 60, total % 60)
}
