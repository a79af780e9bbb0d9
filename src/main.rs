//! # Code Quarry CLI (`cq`)
//!
//! Command-line interface for indexing a source tree into the vector
//! store and searching it.
//!
//! ## Usage
//!
//! ```bash
//! cq --config ./cq.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cq index <dir>` | Run the two-phase indexing pipeline over a directory |
//! | `cq search <dir> "<query>"` | Hybrid search over an indexed directory |
//! | `cq status <dir>` | Show cache and collection state for a directory |
//! | `cq restart <dir>` | Drop the collection and cache, then re-index |
//! | `cq clear <dir>` | Same reset sequence, phrased as a cache operation |
//!
//! ## Examples
//!
//! ```bash
//! # Index a codebase
//! cq index ./my-project/src
//!
//! # Search it (works while indexing is still running)
//! cq search ./my-project/src "REST API endpoints"
//!
//! # Start over from nothing
//! cq restart ./my-project/src
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use code_quarry::cache::FileCache;
use code_quarry::collection::CollectionManager;
use code_quarry::config::{load_config, Config};
use code_quarry::indexer::IndexingPipeline;
use code_quarry::lexical::LexicalSearchEngine;
use code_quarry::orchestrator::SearchOrchestrator;
use code_quarry::producer::TextProducer;
use code_quarry::session::{IndexingObserver, IndexingStatus};
use code_quarry::store::{HttpVectorStore, VectorStore};

/// Code Quarry — hybrid semantic + lexical search over a codebase.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file; a missing file means built-in defaults (local Qdrant and Ollama
/// endpoints).
#[derive(Parser)]
#[command(
    name = "cq",
    about = "Hybrid codebase search: vector similarity + lexical ranking",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./cq.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a directory tree into the vector store.
    ///
    /// Runs the two-phase pipeline: priority files first (controllers,
    /// services, repositories, configuration), then the remaining corpus
    /// in batches. Files already indexed at the same modification time
    /// are skipped via the incremental cache.
    Index {
        /// Directory to index.
        directory: PathBuf,
    },

    /// Search an indexed directory.
    ///
    /// Always runs the lexical engine; adds vector similarity results
    /// when the store is reachable. Endpoint/API queries are expanded
    /// into several targeted sub-queries for higher recall.
    Search {
        /// Directory the query targets (chooses the collection).
        directory: PathBuf,
        /// The query text.
        query: String,
        /// Maximum number of results.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Show indexing cache and collection state for a directory.
    Status {
        directory: PathBuf,
    },

    /// Delete the directory's collection and cache, then re-index from
    /// scratch. All previously stored vectors for the directory are lost.
    Restart {
        directory: PathBuf,
    },

    /// Clear the incremental cache and re-index everything.
    ///
    /// Same reset sequence as `restart`; no stale vectors survive next to
    /// freshly indexed ones.
    Clear {
        directory: PathBuf,
    },
}

/// Console observer: prints progress at phase boundaries when stderr is a
/// terminal, stays quiet when output is piped.
struct ConsoleObserver {
    verbose: bool,
}

impl ConsoleObserver {
    fn for_tty() -> Self {
        Self {
            verbose: atty::is(atty::Stream::Stderr),
        }
    }
}

impl IndexingObserver for ConsoleObserver {
    fn on_update(&self, status: &IndexingStatus) {
        if self.verbose && status.total_files > 0 {
            eprintln!(
                "indexing {}  {}/{} files  ({:.0}%, {:.1} files/s)",
                status.directory,
                status.indexed_files,
                status.total_files,
                status.progress,
                status.speed
            );
        }
    }

    fn on_complete(&self, status: &IndexingStatus) {
        if self.verbose {
            eprintln!(
                "indexing complete: {} indexed, {} skipped, {} failed",
                status.indexed_files, status.skipped_files, status.failed_files
            );
        }
    }

    fn on_error(&self, error: &anyhow::Error, context: &str) {
        eprintln!("indexing error ({}): {}", context, error);
    }
}

fn build_pipeline(config: &Config, directory: &PathBuf) -> Result<Arc<IndexingPipeline>> {
    let store: Arc<dyn VectorStore> =
        Arc::new(HttpVectorStore::new(&config.vector, &config.embedding)?);
    let producer = Arc::new(TextProducer::new(
        config.indexing.clone(),
        config.chunking.clone(),
    ));
    let cache_name = config.cache.file_for(&directory.to_string_lossy());
    let cache = Arc::new(FileCache::new(cache_name, config.cache.enabled));
    let collections = CollectionManager::new(store.clone(), config.vector.dimension);

    let pipeline = Arc::new(IndexingPipeline::new(
        store,
        producer,
        collections,
        cache,
        config.indexing.clone(),
    ));
    pipeline.add_observer(Arc::new(ConsoleObserver::for_tty()));
    Ok(pipeline)
}

fn print_status(status: &IndexingStatus) {
    println!("Indexing status");
    println!("===============");
    println!("  directory:   {}", status.directory);
    println!("  state:       {}", status.state.as_str());
    println!("  total:       {}", status.total_files);
    println!("  indexed:     {}", status.indexed_files);
    println!("  skipped:     {}", status.skipped_files);
    println!("  failed:      {}", status.failed_files);
    println!("  progress:    {:.1}%", status.progress);
    println!("  speed:       {:.1} files/s", status.speed);
    println!("  workers:     {} active / {} peak", status.active_workers, status.peak_workers);
    println!("  tasks run:   {}", status.tasks_executed);

    if !status.indexed_types.is_empty() {
        let mut types: Vec<(&String, &usize)> = status.indexed_types.iter().collect();
        types.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        println!("  indexed types:");
        for (extension, count) in types {
            println!("    {:<12} {}", extension, count);
        }
    }
    if !status.skipped_types.is_empty() {
        let mut types: Vec<(&String, &usize)> = status.skipped_types.iter().collect();
        types.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        println!("  skipped types:");
        for (extension, count) in types {
            println!("    {:<12} {}", extension, count);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        Config::default()
    };

    match cli.command {
        Commands::Index { directory } => {
            anyhow::ensure!(directory.exists(), "directory not found: {}", directory.display());
            let pipeline = build_pipeline(&config, &directory)?;
            pipeline.start_indexing(&directory).await?;
            print_status(&pipeline.status());
        }

        Commands::Search {
            directory,
            query,
            limit,
        } => {
            anyhow::ensure!(directory.exists(), "directory not found: {}", directory.display());
            let store: Arc<dyn VectorStore> =
                Arc::new(HttpVectorStore::new(&config.vector, &config.embedding)?);
            let lexical = Arc::new(LexicalSearchEngine::new(
                config.indexing.clone(),
                config.search.clone(),
            ));
            let orchestrator = SearchOrchestrator::new(store, lexical, config.search.clone());

            let outcome = orchestrator.search(&directory, &query, limit).await;
            if outcome.used_fallback {
                eprintln!("note: vector store unavailable, showing lexical results only");
            }
            if outcome.results.is_empty() {
                println!("No results.");
                return Ok(());
            }

            for (i, result) in outcome.results.iter().enumerate() {
                println!(
                    "{}. [{:.2}] {} ({})",
                    i + 1,
                    result.relevance_score,
                    result.file_name,
                    result.source.as_str()
                );
                println!("    path: {}", result.file_path);
                for line_match in result.line_matches.iter().take(3) {
                    println!("    {}: {}", line_match.line_number, line_match.line);
                }
                if !result.content.is_empty() {
                    let excerpt: String = result.content.replace('\n', " ");
                    let excerpt = excerpt.trim();
                    let cut = excerpt
                        .char_indices()
                        .nth(160)
                        .map(|(idx, _)| idx)
                        .unwrap_or(excerpt.len());
                    println!("    excerpt: \"{}\"", &excerpt[..cut]);
                }
                println!();
            }
        }

        Commands::Status { directory } => {
            let cache_name = config.cache.file_for(&directory.to_string_lossy());
            let cache = FileCache::new(&cache_name, config.cache.enabled);
            let report = cache.load();
            let collection =
                CollectionManager::collection_name(&directory.to_string_lossy());

            println!("Code Quarry — status");
            println!("====================");
            println!("  directory:    {}", directory.display());
            println!("  collection:   {}", collection);
            println!("  cache file:   {}", cache_name);
            println!("  cached files: {}", cache.len());
            println!("  stale (modified): {}", report.modified);
            println!("  stale (deleted):  {}", report.deleted.len());

            let store = HttpVectorStore::new(&config.vector, &config.embedding)?;
            match store.describe_collection(&collection).await {
                Ok(Some(info)) => {
                    println!("  collection dimension: {}", info.dimension);
                    if info.dimension != config.vector.dimension {
                        println!(
                            "  warning: configured dimension is {}; next index run will recreate the collection",
                            config.vector.dimension
                        );
                    }
                }
                Ok(None) => println!("  collection not created yet"),
                Err(e) => println!("  vector store unreachable: {}", e),
            }
        }

        Commands::Restart { directory } | Commands::Clear { directory } => {
            anyhow::ensure!(directory.exists(), "directory not found: {}", directory.display());
            let pipeline = build_pipeline(&config, &directory)?;
            pipeline.clear_cache_and_reindex(&directory).await?;
            println!("collection and cache cleared; re-indexing started");

            // Foreground CLI: wait for the background session to finish
            // so the command exits with the final statistics. The session
            // ends either complete or back at idle after a failure.
            let mut polls = 0u32;
            loop {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                let status = pipeline.status();
                polls += 1;
                if status.complete
                    || (polls > 5 && status.state == code_quarry::session::RunState::Idle)
                {
                    print_status(&status);
                    break;
                }
            }
        }
    }

    Ok(())
}
