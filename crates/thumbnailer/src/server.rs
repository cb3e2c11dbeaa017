use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use axum_server::Handle;
use axum_server::accept::DefaultAcceptor;
use thumbnailer_service::caching::spawn_cleanup;
use thumbnailer_service::config::Config;
use thumbnailer_service::metric;
use thumbnailer_service::service::ThumbnailService;
use thumbnailer_service::shutdown::ShutdownSignal;

use crate::endpoints;

/// Starts the service and HTTP server based on loaded config.
pub fn run(config: Config) -> Result<()> {
    // Log this metric before actually starting the server. This allows to see restarts even if
    // service creation fails.
    metric!(counter("server.starting") += 1);

    let megs = 1024 * 1024;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("thumbnailer-web")
        .enable_all()
        .thread_stack_size(8 * megs)
        .build()?;

    runtime.block_on(async {
        let service =
            ThumbnailService::from_config(&config).context("failed to create thumbnail service")?;
        let socket = config
            .bind
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid bind address `{}`", config.bind))?;

        let cleanup = config.cleanup_interval.map(|interval| {
            spawn_cleanup(
                service.store().clone(),
                config.cache_ttl,
                interval,
                service.shutdown().clone(),
            )
        });

        tracing::info!("Starting HTTP server on {}", socket);
        let result = serve(
            service,
            axum_server::bind(socket),
            config.shutdown_timeout,
        )
        .await;

        if let Some(cleanup) = cleanup {
            cleanup.abort();
        }
        result
    })?;

    tracing::info!("System shutdown complete");
    Ok(())
}

/// Serves `service` until the process is asked to terminate or a fatal error was reported.
///
/// In-flight requests get `shutdown_timeout` to finish. Stopping because of a fatal error is
/// returned as an error.
pub async fn serve(
    service: ThumbnailService,
    server: axum_server::Server<DefaultAcceptor>,
    shutdown_timeout: Duration,
) -> Result<()> {
    let handle = Handle::new();
    tokio::spawn(shutdown_on_signal(
        handle.clone(),
        service.shutdown_signal(),
        shutdown_timeout,
    ));

    server
        .handle(handle)
        .serve(endpoints::create_app(service.clone()).into_make_service())
        .await
        .context("HTTP server failed")?;

    match service.shutdown().reason() {
        Some(reason) => Err(anyhow::anyhow!("stopped after fatal error: {reason}")),
        None => Ok(()),
    }
}

async fn shutdown_on_signal(handle: Handle, fatal: ShutdownSignal, grace: Duration) {
    tokio::select! {
        _ = terminate() => tracing::info!("Received termination signal, shutting down"),
        _ = fatal.triggered() => tracing::warn!("Draining after fatal error"),
    }
    handle.graceful_shutdown(Some(grace));
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
async fn terminate() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = &err as &dyn std::error::Error, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = &err as &dyn std::error::Error, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = sigterm => {},
    }
}
