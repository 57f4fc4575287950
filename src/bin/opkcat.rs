//! The opkcat binary.

use clap::{Parser, Subcommand};
use opkcat::fetcher::{HttpGetter, UnsquashfsExtractor};
use opkcat::{
    Catalog, Config, FetchPool, FetchScheduler, RecordBuilder, Result, Service, run_until_signal,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(version, about = "Incremental catalog builder for OPK package archives")]
struct Args {
    /// Directory holding the catalog database
    #[arg(long, global = true)]
    db_dir: Option<PathBuf>,

    /// Location of the search index database
    #[arg(long, global = true)]
    index_path: Option<PathBuf>,

    /// Directory for temporary data (system default if unset)
    #[arg(long, global = true)]
    tmp_dir: Option<PathBuf>,

    /// JSON configuration file; flags override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Maximum concurrent fetches per cycle
    #[arg(long, global = true)]
    max_fetches: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register every package linked from DOCUMENT and fetch on a schedule until interrupted
    Run {
        /// Markdown document listing package links
        document: PathBuf,
    },
    /// Search the catalog
    Search {
        /// Free text; every term must match
        query: String,
    },
    /// Register every package linked from DOCUMENT and run a single fetch cycle
    FetchOnce {
        /// Markdown document listing package links
        document: PathBuf,
    },
}

impl Args {
    fn to_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)?,
            None => Config::default(),
        };

        if let Some(dir) = &self.db_dir {
            config.storage.database_path = dir.join("catalog.db");
            if self.index_path.is_none() {
                config.storage.index_path = dir.join("index.db");
            }
        }
        if let Some(path) = &self.index_path {
            config.storage.index_path = path.clone();
        }
        if let Some(dir) = &self.tmp_dir {
            config.storage.temp_dir = Some(dir.clone());
        }
        if let Some(max) = self.max_fetches {
            config.fetch.max_concurrent_fetches = max;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing();

    let config = match args.to_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let catalog = match Catalog::from_config(&config).await {
        Ok(catalog) => Arc::new(catalog),
        Err(e) => {
            tracing::error!(error = %e, "Failed to open catalog");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = catalog.reindex_missing().await {
        tracing::warn!(error = %e, "Search index reconciliation failed");
    }

    let result = match &args.command {
        Command::Run { document } => run(&config, catalog.clone(), document).await,
        Command::Search { query } => search(&catalog, query).await,
        Command::FetchOnce { document } => fetch_once(&config, catalog.clone(), document).await,
    };

    catalog.close().await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "opkcat failed");
            ExitCode::FAILURE
        }
    }
}

async fn register_sources(config: &Config, catalog: &Catalog, document: &Path) -> Result<()> {
    let urls = opkcat::sources::source_list(document, &config.extract.archive_suffix)?;
    let mut added = 0;
    for url in &urls {
        if catalog.register_source(url).await? {
            added += 1;
        }
    }
    tracing::info!(
        document = %document.display(),
        discovered = urls.len(),
        added,
        "Registered package sources"
    );
    Ok(())
}

fn fetch_pool(config: &Config, catalog: Arc<Catalog>) -> Result<Arc<FetchPool>> {
    let builder = RecordBuilder::new(
        Arc::new(HttpGetter::new(&config.fetch)?),
        Arc::new(UnsquashfsExtractor::from_config(&config.extract)?),
        config.temp_dir(),
        config.extract.manifest_suffix.clone(),
    );
    Ok(Arc::new(FetchPool::new(
        catalog,
        Arc::new(builder),
        config.fetch.max_concurrent_fetches,
    )))
}

async fn run(config: &Config, catalog: Arc<Catalog>, document: &Path) -> Result<()> {
    register_sources(config, &catalog, document).await?;

    let scheduler = FetchScheduler::new(
        fetch_pool(config, catalog)?,
        config.schedule.fetch_interval,
        config.schedule.allow_overlapping_cycles,
    );
    scheduler.start(CancellationToken::new()).await?;
    run_until_signal(&scheduler).await
}

async fn fetch_once(config: &Config, catalog: Arc<Catalog>, document: &Path) -> Result<()> {
    register_sources(config, &catalog, document).await?;

    let pool = fetch_pool(config, catalog)?;
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, finishing queued sources");
                cancel.cancel();
            }
        })
    };
    let report = pool.run_cycle(0, &cancel).await;
    interrupt.abort();
    let report = report?;

    println!(
        "{} sources: {} built, {} unchanged, {} failed, {} new records",
        report.sources, report.built, report.unchanged, report.failed, report.inserted
    );
    Ok(())
}

async fn search(catalog: &Catalog, query: &str) -> Result<()> {
    let records = catalog.query(query).await?;
    if records.is_empty() {
        println!("No matches for '{}'", query);
        return Ok(());
    }

    for record in records {
        for entry in &record.entries {
            println!("{} ({})", entry.name, entry.kind);
            if !entry.description.is_empty() {
                println!("    {}", entry.description);
            }
            if !entry.categories.is_empty() {
                println!("    categories: {}", entry.categories.join(", "));
            }
        }
        println!("    {} [{}]", record.source_url, record.hash);
    }
    Ok(())
}
