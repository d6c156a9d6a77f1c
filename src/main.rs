//! kbindex CLI - local knowledge-base index
//!
//! Build, inspect and query the document index from the command line.

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use kbindex::digest::load_saved_digest;
use kbindex::{
    docs_digest, format_results, format_results_json, should_reindex, Config, EmbeddingBackend,
    EmbeddingModel, IndexManager, IndexWatcher, VectorIndex,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kbindex")]
#[command(author, version, about = "Local knowledge-base index - chunk, embed and search documents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Document root to index
    #[arg(short = 'd', long, global = true, env = "KB_DOCS_DIR")]
    docs: Option<PathBuf>,

    /// Directory holding the persisted index
    #[arg(short = 'i', long, global = true, env = "KB_INDEX_DIR")]
    index_dir: Option<PathBuf>,

    /// Embedding backend (openai, local)
    #[arg(long, global = true, env = "KB_EMBED_BACKEND")]
    backend: Option<String>,

    /// Local embedding model (minilm, bge, nomic, multilingual)
    #[arg(long, global = true, env = "KB_LOCAL_MODEL")]
    model: Option<String>,

    /// Enable verbose logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load the index, rebuilding it if the documents changed
    Index {
        /// Rebuild even if the documents look unchanged
        #[arg(short, long)]
        force: bool,
    },

    /// Search the index
    Search {
        /// Search query
        query: String,

        /// Maximum number of results
        #[arg(short = 'k', long, default_value = "5")]
        top_k: usize,

        /// Show content of results
        #[arg(short = 'c', long)]
        content: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show index statistics
    Stats,

    /// Show the current and saved document digests
    Digest,

    /// Watch the document root and reindex when it changes
    Watch,

    /// List available local embedding models
    Models,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = build_config(&cli)?;

    match cli.command {
        Commands::Index { force } => cmd_index(config, force),
        Commands::Search {
            query,
            top_k,
            content,
            json,
        } => cmd_search(config, &query, top_k, content, json),
        Commands::Stats => cmd_stats(config),
        Commands::Digest => cmd_digest(config),
        Commands::Watch => cmd_watch(config),
        Commands::Models => cmd_models(),
    }
}

fn build_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::from_env()?.with_progress(true);

    if let Some(docs) = &cli.docs {
        config.docs_dir = docs.clone();
    }
    if let Some(index_dir) = &cli.index_dir {
        config.index_dir = index_dir.clone();
    }
    if let Some(backend) = &cli.backend {
        config = config.with_backend(backend.parse::<EmbeddingBackend>()?);
    }
    if let Some(model) = &cli.model {
        config = config.with_model(model.parse::<EmbeddingModel>()?);
    }

    Ok(config)
}

fn cmd_index(config: Config, force: bool) -> Result<()> {
    println!("{} {:?}", "Indexing".cyan().bold(), config.docs_dir);

    let manager = IndexManager::open(config)?;
    if force {
        manager.reindex()?;
    }

    let stats = manager.stats();
    println!(
        "\n{} {} chunks from {} files (dimension {}, {:?})",
        "✓".green(),
        stats.chunks,
        stats.sources,
        stats.dimension,
        stats.state
    );

    Ok(())
}

fn cmd_search(config: Config, query: &str, top_k: usize, content: bool, json: bool) -> Result<()> {
    let manager = IndexManager::open(config)?;
    let results = manager.search(query, top_k)?;

    if json {
        println!("{}", format_results_json(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results found for: {}", query.yellow());
        return Ok(());
    }

    println!(
        "\n{} results for \"{}\":\n",
        results.len().to_string().green().bold(),
        query.cyan()
    );
    print!("{}", format_results(&results, content));

    Ok(())
}

fn cmd_stats(config: Config) -> Result<()> {
    // Read-only: inspect what is on disk without triggering a rebuild
    let index = VectorIndex::load(&config);
    let sources: std::collections::HashSet<&str> =
        index.metadata().iter().map(|m| m.source.as_str()).collect();

    println!("{}", "Index Statistics".cyan().bold());
    println!("  Location:  {}", config.index_dir.display().to_string().yellow());
    println!("  Files:     {}", sources.len().to_string().green());
    println!("  Chunks:    {}", index.len().to_string().green());
    println!("  Dimension: {}", index.dimension().to_string().green());

    Ok(())
}

fn cmd_digest(config: Config) -> Result<()> {
    let current = docs_digest(&config.docs_dir, &config.index_dir).ok();
    let saved = load_saved_digest(&config.digest_path());
    let has_index = !VectorIndex::load(&config).is_empty();

    println!("{}", "Document Digest".cyan().bold());
    println!("  Current: {}", current.as_deref().unwrap_or("unknown").green());
    println!("  Saved:   {}", saved.as_deref().unwrap_or("none").yellow());
    println!(
        "  Reindex needed: {}",
        should_reindex(current.as_deref(), saved.as_deref(), has_index)
    );

    Ok(())
}

fn cmd_watch(config: Config) -> Result<()> {
    println!("{} {:?}", "Watching".cyan().bold(), config.docs_dir);

    let manager = Arc::new(IndexManager::open(config)?);
    let stats = manager.stats();
    println!("\n✓ Index ready ({} files, {} chunks)", stats.sources, stats.chunks);
    println!("  Watching for changes. Press Ctrl+C to stop.\n");

    IndexWatcher::new(manager).watch()?;
    Ok(())
}

fn cmd_models() -> Result<()> {
    println!("{}", "Available Local Embedding Models".cyan().bold());
    println!();
    println!("  {} (default)", "minilm".green().bold());
    println!("    Fast, lightweight model (384 dims, ~30MB)");
    println!();
    println!("  {}", "bge".green().bold());
    println!("    High quality retrieval model (384 dims, ~90MB)");
    println!();
    println!("  {}", "nomic".green().bold());
    println!("    Long-document model (768 dims, ~90MB)");
    println!();
    println!("  {}", "multilingual".green().bold());
    println!("    Supports 100+ languages (384 dims, ~470MB)");
    println!();
    println!(
        "Usage: {} --backend local --model nomic",
        "kbindex index".yellow()
    );
    println!(
        "The default backend is {} ({} via OPENAI_API_KEY).",
        "openai".yellow(),
        kbindex::config::DEFAULT_OPENAI_MODEL
    );

    Ok(())
}
