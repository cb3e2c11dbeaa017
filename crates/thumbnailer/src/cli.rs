//! Exposes the command line application.
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use thumbnailer_service::caching;
use thumbnailer_service::config::Config;
use thumbnailer_service::metrics;

use crate::healthcheck;
use crate::logging;
use crate::server;

/// Thumbnailer commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the web server.
    Run {
        /// Host and port to bind the HTTP webserver to, overriding the config.
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,

        /// The maximum number of concurrent thumbnail downloads, overriding the config.
        #[arg(long, value_name = "N")]
        max_concurrent_fetches: Option<usize>,
    },

    /// Remove expired thumbnails from the cache.
    Cleanup,

    /// Check whether a running server is healthy.
    Healthcheck {
        /// The address of the server. Defaults to the configured bind address.
        #[arg(long)]
        addr: Option<SocketAddr>,

        /// Request timeout in seconds.
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
}

/// Command line interface parser.
#[derive(Parser, Debug)]
#[command(bin_name = "thumbnailer", version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::get(cli.config()).context("failed loading config")?;

    if let Command::Run {
        bind,
        max_concurrent_fetches,
    } = &cli.command
    {
        if let Some(bind) = bind {
            config.bind = bind.clone();
        }
        if let Some(max) = *max_concurrent_fetches {
            config.max_concurrent_fetches = max;
        }
        config.validate().context("invalid command line options")?;
    }

    let sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        enable_logs: true,
        ..Default::default()
    });

    // SAFETY: No other threads touching the environment have been started yet.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        let mut tags = config.metrics.custom_tags.clone();

        if let Some(hostname_tag) = config.metrics.hostname_tag.clone() {
            if tags.contains_key(&hostname_tag) {
                tracing::warn!(
                    "tag {} defined both as hostname tag and as a custom tag",
                    hostname_tag
                );
            }
            if let Some(hostname) = hostname::get().ok().and_then(|s| s.into_string().ok()) {
                tags.insert(hostname_tag, hostname);
            } else {
                tracing::error!("could not read host name");
            }
        };
        if let Some(environment_tag) = config.metrics.environment_tag.clone() {
            if tags.contains_key(&environment_tag) {
                tracing::warn!(
                    "tag {} defined both as environment tag and as a custom tag",
                    environment_tag
                );
            }
            if let Some(environment) = sentry.options().environment.as_ref() {
                tags.insert(environment_tag, environment.to_string());
            } else {
                tracing::error!("could not read environment");
            }
        };

        metrics::configure_statsd(&config.metrics.prefix, statsd.as_str(), tags)
            .context("failed to configure statsd")?;
    }

    match cli.command {
        Command::Run { .. } => server::run(config).context("failed to start the server")?,
        Command::Cleanup => cleanup(&config).context("failed to clean up the cache")?,
        Command::Healthcheck { addr, timeout } => healthcheck::healthcheck(&config, addr, timeout)?,
    }

    Ok(())
}

fn cleanup(config: &Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(caching::cleanup(config))?;
    Ok(())
}
