use std::path::PathBuf;
use std::sync::Arc;

use evidx::capability::{CapabilityDetector, CapabilitySnapshot};
use evidx::chunking::Chunker;
use evidx::cli::{Cli, Commands, ConfigAction};
use evidx::config::Config;
use evidx::embedding::{BatchEmbedder, EmbeddingBackend, EmbeddingProvider};
use evidx::error::{EvidxError, Result};
use evidx::ingest::{EvidenceSource, Ingestor};
use evidx::retrieval::{HybridSearchEngine, SearchResult};
use evidx::storage::{EvidenceStore, ProjectId, SqliteEvidenceStore};

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    let runtime = tokio::runtime::Runtime::new().map_err(|e| EvidxError::Io {
        source: e,
        context: "Failed to start async runtime".to_string(),
    })?;

    match cli.command {
        Commands::Ingest {
            project,
            commit,
            files,
        } => {
            let app = App::open(cli.config, cli.profile)?;
            runtime.block_on(cmd_ingest(&app, project, commit, &files))?;
        }
        Commands::Search {
            query,
            project,
            limit,
            json,
        } => {
            let app = App::open(cli.config, cli.profile)?;
            runtime.block_on(cmd_search(&app, project, &query, limit, json))?;
        }
        Commands::Capabilities { project } => {
            let app = App::open(cli.config, cli.profile)?;
            runtime.block_on(cmd_capabilities(&app, project))?;
        }
        Commands::Reembed { project } => {
            let app = App::open(cli.config, cli.profile)?;
            runtime.block_on(cmd_reembed(&app, project))?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "evidx=debug" } else { "evidx=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Everything a command needs, built once from configuration
struct App {
    config: Config,
    store: Arc<dyn EvidenceStore>,
    capabilities: Arc<CapabilitySnapshot>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
}

impl App {
    fn open(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Self> {
        let config = load_config(config_path, profile)?;

        let db_path = config.storage.resolved_database_path()?;
        let store: Arc<dyn EvidenceStore> = Arc::new(SqliteEvidenceStore::open(
            &db_path,
            config.storage.store_options(),
        )?);
        let capabilities = Arc::new(CapabilityDetector::detect(store.as_ref())?);

        // keyword search still works without a provider
        let provider: Option<Arc<dyn EmbeddingProvider>> =
            match EmbeddingBackend::from_config(&config.embedding) {
                Ok(backend) => {
                    if !backend.is_ready() {
                        tracing::warn!(
                            "Embedding provider {} has no credentials; vector search disabled",
                            backend.kind()
                        );
                    }
                    Some(Arc::new(backend))
                }
                Err(e) => {
                    tracing::warn!("Embedding provider unavailable: {}", e);
                    None
                }
            };

        Ok(Self {
            config,
            store,
            capabilities,
            provider,
        })
    }

    fn engine(&self) -> HybridSearchEngine {
        HybridSearchEngine::new(
            Arc::clone(&self.store),
            self.provider.clone(),
            Arc::clone(&self.capabilities),
            self.config.search.clone(),
        )
    }

    fn ingestor(&self) -> Result<Ingestor> {
        let chunker = Chunker::from_config(&self.config.chunking)?;
        let embedder = self.provider.as_ref().map(|provider| {
            BatchEmbedder::new(
                Arc::clone(provider),
                self.config.embedding.batch_size,
                self.config.embedding.max_concurrent_batches,
                self.config.embedding.retry_policy(),
            )
        });

        Ok(Ingestor::new(
            Arc::clone(&self.store),
            chunker,
            embedder,
            Arc::clone(&self.capabilities),
        ))
    }
}

async fn cmd_ingest(
    app: &App,
    project: ProjectId,
    commit: Option<String>,
    files: &[PathBuf],
) -> Result<()> {
    let mut sources = Vec::with_capacity(files.len());
    for file in files {
        let bytes = std::fs::read(file).map_err(|e| EvidxError::Io {
            source: e,
            context: format!("Failed to read evidence file: {:?}", file),
        })?;
        let text = String::from_utf8_lossy(&bytes).into_owned();

        let mut source = EvidenceSource::from_path(file.to_string_lossy(), text);
        if let Some(sha) = &commit {
            source = source.with_commit(sha.clone());
        }
        sources.push(source);
    }

    let report = app.ingestor()?.ingest(project, &sources).await?;

    println!("✓ Ingested {} files into project {}", report.references, project);
    println!("  Chunks inserted: {}", report.chunks_inserted);
    println!("  Already stored: {}", report.chunks_duplicate);
    if report.chunks_without_embedding > 0 {
        println!("  Without embedding: {}", report.chunks_without_embedding);
    }
    if report.skipped_references > 0 {
        println!("  Skipped files: {}", report.skipped_references);
    }

    Ok(())
}

async fn cmd_search(
    app: &App,
    project: ProjectId,
    query: &str,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let limit = limit.unwrap_or(app.config.search.default_limit);
    let results = app.engine().search(project, query, limit).await?;

    if json {
        println!("{}", to_json(&results, "Failed to serialize results")?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results for \"{}\"", query);
        return Ok(());
    }

    for (rank, result) in results.iter().enumerate() {
        print_result(rank + 1, result);
    }

    Ok(())
}

fn print_result(rank: usize, result: &SearchResult) {
    println!(
        "{}. {}#{} [{} {:.4}]",
        rank, result.reference_path, result.chunk_index, result.search_type, result.score
    );

    let preview: String = result.text.chars().take(200).collect();
    let preview = preview.split_whitespace().collect::<Vec<_>>().join(" ");
    if result.text.chars().count() > 200 {
        println!("   {}...", preview);
    } else {
        println!("   {}", preview);
    }
}

async fn cmd_capabilities(app: &App, project: Option<ProjectId>) -> Result<()> {
    let report = app.engine().capability_report(project).await?;
    println!("{}", to_json(&report, "Failed to serialize capability report")?);
    Ok(())
}

async fn cmd_reembed(app: &App, project: ProjectId) -> Result<()> {
    let embedded = app.ingestor()?.reembed_project(project).await?;
    println!("✓ Re-embedded {} chunks in project {}", embedded, project);
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, profile: Option<String>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, profile)?;
            println!("{}", to_json(&config, "Failed to serialize config")?);
        }
        ConfigAction::Init { force } => {
            let path = resolve_config_path(config_path)?;
            match Config::init(&path, force) {
                Ok(_) => println!("✓ Configuration written to {}", path.display()),
                Err(EvidxError::Config(_)) if !force => {
                    println!("Configuration file already exists at: {}", path.display());
                    println!("Use --force to overwrite");
                }
                Err(e) => return Err(e),
            }
        }
        ConfigAction::Validate { file } => {
            let path = match file {
                Some(file) => file,
                None => resolve_config_path(config_path)?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
            println!(
                "  Embedding: {} {} ({} dimensions)",
                config.embedding.provider,
                config.embedding.effective_model(),
                config.embedding.effective_dimension()
            );
        }
    }

    Ok(())
}

fn resolve_config_path(config_path: Option<PathBuf>) -> Result<PathBuf> {
    match config_path {
        Some(path) => Ok(path),
        None => Config::default_path(),
    }
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = resolve_config_path(config_path)?;
    if !path.exists() {
        tracing::debug!("Config file not found, using defaults. Run 'evidx config init' to create one.");
    }

    let mut config = Config::load_or_default(&path)?;
    if let Some(profile) = profile {
        config.apply_profile(&profile)?;
    }
    Ok(config)
}

fn to_json<T: serde::Serialize>(value: &T, context: &str) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| EvidxError::Json {
        source: e,
        context: context.to_string(),
    })
}
