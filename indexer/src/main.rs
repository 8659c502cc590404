use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sitesearch_core::{SledStore, Store};
use sitesearch_crawler::HttpFetcher;
use sitesearch_indexer::{IndexingService, Settings};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Crawl configured sites into the lemma index", long_about = None)]
struct Cli {
    /// Settings file with the sites to index
    #[arg(long, global = true, default_value = "./sitesearch.toml")]
    config: String,
    /// Index store directory
    #[arg(long, global = true, default_value = "./data/index")]
    store: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wipe and re-crawl every configured site; Ctrl-C stops the run
    Crawl,
    /// Fetch one page again and replace its index entries
    Page {
        #[arg(long)]
        url: String,
    },
    /// Print page and lemma counts per site as JSON
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    let settings = Settings::load(&cli.config)?;
    let store = SledStore::open(&cli.store).with_context(|| format!("opening store {}", cli.store))?;
    let fetcher = HttpFetcher::new(&settings.fetch_settings())?;
    let store: Arc<SledStore> = Arc::new(store);
    let service = IndexingService::new(store.clone() as Arc<dyn Store>, Arc::new(fetcher), settings)?;

    match cli.command {
        Commands::Crawl => crawl(&service).await?,
        Commands::Page { url } => {
            let indexed = service.index_page(&url).await?;
            tracing::info!(path = %indexed.page.path, code = indexed.page.code, lemmas = indexed.lemmas, "page indexed");
        }
        Commands::Stats => {
            let stats = service.statistics()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }
    store.flush()?;
    Ok(())
}

async fn crawl(service: &IndexingService) -> Result<()> {
    service.start_indexing()?;
    tokio::select! {
        _ = service.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, stopping indexing");
            service.stop_indexing().await?;
        }
    }
    for site in service.statistics()?.detailed {
        tracing::info!(site = %site.url, status = %site.status, pages = site.pages, lemmas = site.lemmas, error = ?site.error, "crawl finished");
    }
    Ok(())
}
