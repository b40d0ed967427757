use quarry::cli::{is_confirmed, Cli, Commands, ConfigAction, FoldersAction, TypesAction};
use quarry::config::Config;
use quarry::embedding::{EmbeddingProvider, FastEmbedProvider};
use quarry::error::{QuarryError, Result};
use quarry::folders::{
    resolve_file_types, FolderIndexer, FolderIngest, FolderListResponse, FolderRegistry,
    FolderRemover, DEFAULT_PRESETS, FILE_TYPE_PRESETS,
};
use quarry::jobs::JobQueue;
use quarry::retrieval::{
    QueryMode, QueryService, RerankStage, RerankerRegistry, SearchQuery, SearchResult,
};
use quarry::storage::{ChunkStore, StorageBackend};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => Config::default_path()?,
    };

    match cli.command {
        // Config commands manage the file themselves
        Commands::Config { action } => {
            init_logging(cli.verbose, "info");
            cmd_config(config_path, action)
        }
        command => {
            let config = load_config(&config_path)?;
            init_logging(cli.verbose, &config.logging.level);
            run(command, &config).await
        }
    }
}

async fn run(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Folders { action } => match action {
            FoldersAction::List { json } => cmd_folders_list(config, json).await,
            FoldersAction::Add { path, types, json } => {
                cmd_folders_add(config, path, types, json).await
            }
            FoldersAction::Remove { path, yes, json } => {
                cmd_folders_remove(config, path, yes, json).await
            }
        },
        Commands::Query {
            query,
            top_k,
            mode,
            rerank,
            no_rerank,
            json,
        } => {
            let rerank = Commands::rerank_override(rerank, no_rerank);
            cmd_query(config, &query, top_k, mode, rerank, json).await
        }
        Commands::Stats => cmd_stats(config).await,
        Commands::Types { action } => match action {
            TypesAction::List { json } => cmd_types_list(json),
        },
        Commands::Config { action } => cmd_config(Config::default_path()?, action),
    }
}

fn init_logging(verbose: bool, level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose {
        "quarry=debug".to_string()
    } else {
        format!("quarry={}", level)
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &std::path::Path) -> Result<Config> {
    if !path.exists() {
        eprintln!("Config file not found, using defaults. Run 'quarry config init' to create one.");
    }
    Config::load_or_default(path)
}

async fn open_registry(config: &Config) -> Result<Arc<FolderRegistry>> {
    Ok(Arc::new(
        FolderRegistry::open(config.storage.state_dir()).await?,
    ))
}

async fn open_store(config: &Config) -> Result<Arc<ChunkStore>> {
    let store_dir = config.storage.store_dir();
    let store = tokio::task::spawn_blocking(move || ChunkStore::open(&store_dir)).await??;
    Ok(Arc::new(store))
}

fn to_json<T: serde::Serialize>(value: &T, context: &str) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| QuarryError::Json {
        source: e,
        context: context.to_string(),
    })
}

async fn cmd_folders_list(config: &Config, json: bool) -> Result<()> {
    let registry = open_registry(config).await?;
    let response = FolderListResponse::from_records(&registry.list().await);

    if json {
        println!("{}", to_json(&response, "Failed to serialize folder list")?);
        return Ok(());
    }

    if response.folders.is_empty() {
        println!("No folders indexed");
        return Ok(());
    }

    println!("Indexed folders ({})", response.total);
    println!("===================");
    for folder in &response.folders {
        println!(
            "  {}  {} chunks  (last indexed {})",
            folder.folder_path, folder.chunk_count, folder.last_indexed
        );
    }

    Ok(())
}

async fn open_embedder(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let model = config.embedding.model.clone();
    let provider = tokio::task::spawn_blocking(move || FastEmbedProvider::new(&model)).await??;
    Ok(Arc::new(provider))
}

async fn cmd_folders_add(
    config: &Config,
    path: PathBuf,
    types: Vec<String>,
    json: bool,
) -> Result<()> {
    let globs = if types.is_empty() {
        resolve_file_types(DEFAULT_PRESETS)?
    } else {
        resolve_file_types(types.as_slice())?
    };

    let registry = open_registry(config).await?;
    let store = open_store(config).await?;
    let ingest = FolderIngest::new(registry, store, open_embedder(config).await?, &config.embedding);
    let indexer = FolderIndexer::new(Arc::new(JobQueue::new()), ingest);

    let outcome = indexer.index(&path, &globs).await?;

    if json {
        let body = serde_json::json!({
            "job": outcome.job,
            "files": outcome.files,
            "folder_path": outcome.report.record.folder_path,
            "chunk_count": outcome.report.record.chunk_count,
            "stale_deleted": outcome.report.stale_deleted,
            "skipped": outcome.report.skipped,
        });
        println!("{}", to_json(&body, "Failed to serialize index result")?);
        return Ok(());
    }

    println!("✓ Indexed {}", outcome.report.record.folder_path);
    println!("  Job: {} ({})", outcome.job.id, outcome.job.status);
    println!("  Files: {}", outcome.files);
    println!("  Chunks: {}", outcome.report.record.chunk_count);
    if outcome.report.stale_deleted > 0 {
        println!("  Stale chunks removed: {}", outcome.report.stale_deleted);
    }

    Ok(())
}

fn cmd_types_list(json: bool) -> Result<()> {
    if json {
        let presets: serde_json::Map<String, serde_json::Value> = FILE_TYPE_PRESETS
            .iter()
            .map(|(name, globs)| (name.to_string(), serde_json::json!(globs)))
            .collect();
        println!("{}", to_json(&presets, "Failed to serialize presets")?);
        return Ok(());
    }

    println!("File type presets");
    println!("=================");
    for (name, globs) in FILE_TYPE_PRESETS {
        println!("  {:<12} {}", name, globs.join(", "));
    }
    println!("\nDefault: {}", DEFAULT_PRESETS.join(", "));

    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout()
        .flush()
        .map_err(|source| QuarryError::Io {
            source,
            context: "Failed to write prompt".to_string(),
        })?;

    let mut answer = String::new();
    io::stdin()
        .read_line(&mut answer)
        .map_err(|source| QuarryError::Io {
            source,
            context: "Failed to read confirmation".to_string(),
        })?;
    Ok(is_confirmed(&answer))
}

async fn cmd_folders_remove(config: &Config, path: PathBuf, yes: bool, json: bool) -> Result<()> {
    if !yes && !json && !confirm(&format!("Remove all indexed chunks for {}?", path.display()))? {
        println!("Aborted");
        return Ok(());
    }

    let registry = open_registry(config).await?;
    let store = open_store(config).await?;

    // Indexing jobs run in-process, so none is active while this command runs
    let jobs = Arc::new(JobQueue::new());

    let remover = FolderRemover::new(registry, store, jobs);

    match remover.remove(&path).await {
        Ok(removal) => {
            if json {
                println!("{}", to_json(&removal, "Failed to serialize removal")?);
            } else {
                println!("✓ {}", removal.message);
            }
            Ok(())
        }
        Err(e) => {
            if json {
                let body = serde_json::json!({
                    "status": e.status_code(),
                    "detail": e.to_string(),
                });
                println!("{}", to_json(&body, "Failed to serialize error")?);
            }
            Err(anyhow::Error::new(e).into())
        }
    }
}

async fn cmd_query(
    config: &Config,
    text: &str,
    top_k: Option<usize>,
    mode: Option<String>,
    rerank: Option<bool>,
    json: bool,
) -> Result<()> {
    let mode: QueryMode = mode
        .as_deref()
        .unwrap_or(config.retrieval.default_mode.as_str())
        .parse()
        .map_err(|e: String| QuarryError::InvalidConfigValue {
            path: "retrieval.default_mode".to_string(),
            message: e,
        })?;

    let store = open_store(config).await?;

    let provider = open_embedder(config).await?;

    let mut service = QueryService::new(
        provider,
        store,
        &config.retrieval,
        config.reranker.clone(),
    )
    .map_err(anyhow::Error::new)?;

    if rerank.unwrap_or(config.reranker.enabled) {
        let registry = Arc::new(RerankerRegistry::new(config.reranker.clone()));
        service = service.with_reranker(RerankStage::new(registry, config.reranker.timeout()));
    }

    let mut query = SearchQuery::new(text, top_k.unwrap_or(config.retrieval.default_top_k))
        .with_mode(mode);
    query.similarity_threshold = config.retrieval.similarity_threshold;
    query.rerank = rerank;

    let results = service.search(&query).await.map_err(anyhow::Error::new)?;

    if json {
        println!("{}", to_json(&results, "Failed to serialize results")?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results");
        return Ok(());
    }

    for (rank, result) in results.iter().enumerate() {
        print_result(rank + 1, result);
    }

    Ok(())
}

fn print_result(rank: usize, result: &SearchResult) {
    let mut scores = format!("score {:.3}", result.score);
    if let Some(v) = result.vector_score {
        scores.push_str(&format!(", vector {:.3}", v));
    }
    if let Some(b) = result.bm25_score {
        scores.push_str(&format!(", bm25 {:.3}", b));
    }
    if let Some(r) = result.rerank_score {
        scores.push_str(&format!(", rerank {:.2}", r));
    }

    println!("{}. [{}] ({})", rank, result.chunk_id, scores);
    if let Some(source) = result.source() {
        println!("   {}", source);
    }
    println!("   {}", result.preview(200).replace('\n', " "));
    println!();
}

async fn cmd_stats(config: &Config) -> Result<()> {
    let registry = open_registry(config).await?;
    let store = open_store(config).await?;

    let database = store.database().clone();
    let stats = tokio::task::spawn_blocking(move || database.stats()).await??;
    let chunk_count = store.get_count().await?;

    println!("Quarry Status");
    println!("=============");
    println!("\nFolders: {}", registry.len().await);
    println!("Chunks: {}", chunk_count);
    println!("Sources: {}", stats.source_count);
    println!("Embedding storage: {} bytes", stats.embedding_bytes);
    println!("\nData directory: {}", config.storage.store_dir().display());

    Ok(())
}

fn cmd_config(path: PathBuf, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(&path)?;
            let value = serde_json::to_value(&config).map_err(|e| QuarryError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;

            let shown = match section {
                Some(section) => value.get(&section).cloned().ok_or_else(|| {
                    QuarryError::Config(format!("Unknown config section: {}", section))
                })?,
                None => value,
            };

            println!("{}", to_json(&shown, "Failed to serialize config")?);
        }
        ConfigAction::Validate { file } => {
            let path = file.unwrap_or(path);
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
        ConfigAction::Path => {
            println!("{}", path.display());
        }
    }

    Ok(())
}
