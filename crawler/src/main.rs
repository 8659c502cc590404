use anyhow::{anyhow, Result};
use clap::Parser;
use serde::Serialize;
use sha1::{Digest, Sha1};
use sitesearch_core::html;
use sitesearch_crawler::{FetchSettings, HttpFetcher, WalkConfig, Walker};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "crawler")]
#[command(about = "Walk one site and dump its pages to JSONL, without indexing")]
struct Cli {
    /// Site to walk, e.g. https://example.com
    #[arg(long)]
    seed: String,
    /// Output JSONL file path
    #[arg(long, default_value = "./sample_data/crawl.jsonl")]
    output: String,
    /// Parallel fetches per round
    #[arg(long, default_value_t = 8)]
    concurrency: usize,
    /// Request timeout seconds
    #[arg(long, default_value_t = 12)]
    timeout_secs: u64,
    /// Pause between rounds, milliseconds
    #[arg(long, default_value_t = 200)]
    round_delay_ms: u64,
    #[arg(long, default_value = "sitesearch-bot/0.1 (+https://example.com/bot)")]
    user_agent: String,
    #[arg(long)]
    referrer: Option<String>,
    /// Fetch pages even when robots.txt disallows them
    #[arg(long, default_value_t = false)]
    ignore_robots: bool,
}

#[derive(Serialize)]
struct OutDoc<'a> {
    id: String,
    url: &'a str,
    path: &'a str,
    code: u16,
    title: String,
    timestamp: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Cli::parse();
    let seed = Url::parse(&args.seed).or_else(|_| Url::parse(&format!("https://{}", args.seed)))
        .map_err(|e| anyhow!("invalid seed {}: {e}", args.seed))?;
    if let Some(dir) = std::path::Path::new(&args.output).parent() {
        fs::create_dir_all(dir).ok();
    }

    let fetcher = HttpFetcher::new(&FetchSettings {
        user_agent: args.user_agent.clone(),
        referrer: args.referrer.clone(),
        timeout: Duration::from_secs(args.timeout_secs),
    })?;
    let config = WalkConfig {
        fetch_concurrency: args.concurrency,
        round_delay: Duration::from_millis(args.round_delay_ms),
        respect_robots: !args.ignore_robots,
    };
    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping walk");
            interrupt.cancel();
        }
    });

    let (tx, mut rx) = mpsc::channel(64);
    let mut walker = Walker::new(Arc::new(fetcher), config, seed);
    let walk_token = token.clone();
    let walk = tokio::spawn(async move { walker.walk(&walk_token, tx).await });

    let mut out = BufWriter::new(File::create(&args.output)?);
    let mut emitted = 0usize;
    while let Some(page) = rx.recv().await {
        let url = page.url.to_string();
        let mut hasher = Sha1::new();
        hasher.update(url.as_bytes());
        let rec = OutDoc {
            id: format!("{:x}", hasher.finalize()),
            url: &url,
            path: &page.path,
            code: page.code,
            title: html::title(&page.content),
            timestamp: time::OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
        };
        serde_json::to_writer(&mut out, &rec)?;
        out.write_all(b"\n")?;
        emitted += 1;
        if emitted % 100 == 0 {
            tracing::info!(emitted, "progress");
        }
    }
    out.flush()?;

    let report = walk.await??;
    tracing::info!(emitted, rounds = report.rounds, failed = report.failed, output = %args.output, "done");
    Ok(())
}
