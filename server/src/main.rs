use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use sitesearch_core::{LemmaExtractor, SledStore, Store};
use sitesearch_crawler::HttpFetcher;
use sitesearch_indexer::{IndexingService, Settings};
use sitesearch_server::search::SearchEngine;
use sitesearch_server::{build_app, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Settings file with the sites to index
    #[arg(long, default_value = "./sitesearch.toml")]
    config: String,
    /// Index store directory
    #[arg(long, default_value = "./data/index")]
    store: String,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let settings = Settings::load(&args.config)?;
    let fetcher = HttpFetcher::new(&settings.fetch_settings())?;
    let store = Arc::new(SledStore::open(&args.store).with_context(|| format!("opening store {}", args.store))?);
    let indexing = Arc::new(IndexingService::new(store.clone() as Arc<dyn Store>, Arc::new(fetcher), settings)?);
    let search = Arc::new(SearchEngine::new(store.clone() as Arc<dyn Store>, LemmaExtractor::default()));
    let app: Router = build_app(AppState { indexing: indexing.clone(), search });

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    if indexing.stop_indexing().await.is_ok() {
        tracing::info!("indexing stopped on shutdown");
    }
    store.flush()?;
    Ok(())
}
