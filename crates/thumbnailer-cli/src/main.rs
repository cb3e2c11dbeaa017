//! Downloads thumbnails from a thumbnailer server into a directory.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Url;
use tracing_subscriber::EnvFilter;

mod batch;
mod client;

use client::ThumbnailClient;

/// Downloads video thumbnails through a thumbnailer server.
///
/// Every thumbnail is written to `<video_id>.jpg` in the output directory.
#[derive(Clone, Parser, Debug)]
#[command(author, version, about, long_about)]
struct Cli {
    /// Video URLs or ids to download.
    urls: Vec<String>,

    /// The address of the thumbnailer server.
    #[arg(long, default_value = "localhost:8080")]
    addr: String,

    /// A file with newline separated urls, downloaded before the ones on the command line.
    #[arg(long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// The directory to write thumbnails to. Created if it does not exist.
    #[arg(long, default_value = ".")]
    output: PathBuf,

    /// Download thumbnails in parallel.
    #[arg(long = "async")]
    parallel: bool,

    /// How many downloads run at once with `--async`.
    #[arg(long, default_value_t = 8)]
    max_parallel_requests: usize,

    /// How often to try a request while the server is unavailable (0 means no retries).
    #[arg(long, default_value_t = 3)]
    max_retries: usize,
}

impl Cli {
    fn base_url(&self) -> Result<Url> {
        let addr = if self.addr.contains("://") {
            self.addr.clone()
        } else {
            format!("http://{}", self.addr)
        };
        Url::parse(&addr).with_context(|| format!("invalid server address `{}`", self.addr))
    }

    fn parallelism(&self) -> usize {
        if self.parallel {
            self.max_parallel_requests
        } else {
            1
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .without_time()
        .init();

    batch::prepare_output(&cli.output)?;

    let urls = batch::read_urls(cli.input.as_deref(), &cli.urls)?;
    if urls.is_empty() {
        anyhow::bail!("No urls specified");
    }
    tracing::info!("Total number of urls: {}", urls.len());
    if cli.parallel {
        tracing::info!("async: ON");
        tracing::info!("Number of parallel requests: {}", cli.max_parallel_requests);
    } else {
        tracing::info!("async: OFF");
    }

    let client = ThumbnailClient::new(&cli.base_url()?, cli.max_retries)?;
    let saved = batch::download_all(&client, &urls, &cli.output, cli.parallelism()).await;

    tracing::info!("Downloaded {}/{} thumbnails", saved, urls.len());
    Ok(())
}
