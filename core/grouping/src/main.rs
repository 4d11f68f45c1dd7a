/// Idea graph CLI
///
/// Usage:
///   idea-graph [--db-path <path>] crawl [--no-resolve]
///   idea-graph [--db-path <path>] resolve
///   idea-graph [--db-path <path>] cluster
///   idea-graph [--db-path <path>] stats
///
/// Configuration comes from the environment (MISTRAL_API_KEY, OLLAMA_URL,
/// CRAWLER_TOPICS, ...). Only setup errors produce a non-zero exit; per-item
/// failures are logged and counted in the run summary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use idea_graph_grouping::{ClusterBuilder, GroupingConfig, Resolver};
use idea_graph_indexing::{EmbeddingConfig, EmbeddingEngine, OllamaEmbedder};
use idea_graph_ingestion::{AnalysisClient, AppConfig, Crawler, Database, RedditClient};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "idea-graph")]
#[command(about = "Crawl feeds into a deduplicated graph of problems, ideas and products")]
struct Args {
    /// Path to SQLite database file (defaults to $IDEA_GRAPH_DB or ideas.db)
    #[arg(long, short, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch new posts, analyze and store them
    Crawl {
        /// Store items without resolving them into entities
        #[arg(long)]
        no_resolve: bool,
    },
    /// Replay stored analyses of ungrouped items through entity resolution
    Resolve,
    /// Group remaining ungrouped items into ideas by similarity
    Cluster,
    /// Print store counts
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    info!("Idea Graph v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Crawl { no_resolve } => crawl(args.db_path, no_resolve).await,
        Command::Resolve => resolve(args.db_path).await,
        Command::Cluster => cluster(args.db_path),
        Command::Stats => stats(args.db_path),
    }
}

async fn crawl(db_path: Option<PathBuf>, no_resolve: bool) -> Result<()> {
    let mut config = AppConfig::from_env().context("failed to load configuration")?;
    if let Some(path) = db_path {
        config.db_path = path.display().to_string();
    }

    info!("Database: {}", config.db_path);
    let db = Database::new(&config.db_path)?;

    let embedder: Arc<dyn EmbeddingEngine> = Arc::new(OllamaEmbedder::new(config.embedding)?);
    let mut crawler = Crawler::new(
        db,
        Box::new(RedditClient::new()?),
        Box::new(AnalysisClient::new(config.llm)?),
        embedder.clone(),
        config.crawler,
    );

    if no_resolve {
        info!("Resolution disabled, items stay ungrouped");
    } else {
        let grouping = GroupingConfig::from_env()?;
        crawler = crawler.with_resolver(Box::new(Resolver::new(embedder, &grouping)?));
    }

    let stats = crawler.crawl_all().await;
    print_summary(&stats)
}

async fn resolve(db_path: Option<PathBuf>) -> Result<()> {
    let grouping = GroupingConfig::from_env()?;
    let db = open_database(db_path)?;

    let embedder = Arc::new(OllamaEmbedder::new(EmbeddingConfig::from_env())?);
    let resolver = Resolver::new(embedder, &grouping)?;

    let stats = resolver.resolve_ungrouped(&db).await?;
    print_summary(&stats)
}

fn cluster(db_path: Option<PathBuf>) -> Result<()> {
    let grouping = GroupingConfig::from_env()?;
    let db = open_database(db_path)?;

    let stats = ClusterBuilder::new(&grouping)?.run(&db)?;
    print_summary(&stats)
}

fn stats(db_path: Option<PathBuf>) -> Result<()> {
    let db = open_database(db_path)?;
    print_summary(&db.stats()?)
}

fn open_database(db_path: Option<PathBuf>) -> Result<Database> {
    let path = db_path.unwrap_or_else(|| {
        PathBuf::from(std::env::var("IDEA_GRAPH_DB").unwrap_or_else(|_| "ideas.db".to_string()))
    });

    info!("Database: {}", path.display());
    Database::new(&path)
}

fn print_summary<T: Serialize>(summary: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}
