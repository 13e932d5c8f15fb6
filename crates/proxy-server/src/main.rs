mod capture;
mod config;
mod error;
mod forward;
mod metrics;
mod proxy;
mod sweeper;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use config::{Config, Settings};
use error::ConfigError;
use forward::HyperForwarder;
use proxy::{proxy_router, AppState};
use stash_cache::CacheStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

/// Stash — caching reverse proxy for GET responses.
#[derive(Parser)]
#[command(name = "stash")]
struct Args {
    /// Path to the TOML config file. Defaults are used if it does not exist.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Upstream origin, overrides `upstream.url`
    #[arg(long)]
    upstream: Option<String>,

    /// Proxy listen address, overrides `server.listen_addr`
    #[arg(long)]
    listen: Option<String>,
}

fn load_settings(args: &Args) -> Result<Settings, ConfigError> {
    let mut config = Config::load_or_default(&args.config)?;
    if let Some(upstream) = &args.upstream {
        config.upstream.url = upstream.clone();
    }
    if let Some(listen) = &args.listen {
        config.server.listen_addr = listen.clone();
    }
    config.validate()
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let args = Args::parse();

    let settings = match load_settings(&args) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let prom_handle = match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()
    {
        Ok(h) => h,
        Err(e) => {
            tracing::error!(error = %e, "failed to install prometheus recorder");
            return ExitCode::FAILURE;
        }
    };
    metrics::describe();

    let store = Arc::new(CacheStore::new(settings.ttl));

    let state = Arc::new(AppState {
        store: Arc::clone(&store),
        forwarder: Arc::new(HyperForwarder::new(
            settings.upstream.clone(),
            settings.upstream_timeout,
        )),
        max_body_size: settings.max_body_size,
        sweep_interval: settings.sweep_interval,
    });

    // Shutdown token for graceful shutdown, shared with the sweeper
    let shutdown = CancellationToken::new();

    let sweeper = sweeper::spawn_sweeper(
        Arc::clone(&store),
        settings.sweep_interval,
        shutdown.clone(),
    );

    // Build metrics/admin router (separate port)
    let metrics_router = Router::new()
        .route("/api/stats", get(metrics::stats_handler))
        .route(
            "/metrics",
            get(move || {
                let h = prom_handle.clone();
                async move { h.render() }
            }),
        )
        .with_state(Arc::clone(&state));

    // Build proxy router (main port)
    let proxy_router = proxy_router(Arc::clone(&state)).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                settings.request_timeout,
            )),
    );

    tracing::info!(
        proxy = %settings.listen_addr,
        metrics = %settings.metrics_addr,
        upstream = %settings.upstream.base_url,
        ttl_secs = settings.ttl.as_secs(),
        sweep_interval_secs = settings.sweep_interval.as_secs(),
        "stash proxy starting"
    );

    let proxy_listener = match tokio::net::TcpListener::bind(settings.listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, addr = %settings.listen_addr, "failed to bind proxy");
            return ExitCode::FAILURE;
        }
    };

    let metrics_listener = match tokio::net::TcpListener::bind(settings.metrics_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, addr = %settings.metrics_addr, "failed to bind metrics");
            return ExitCode::FAILURE;
        }
    };

    // Spawn shutdown signal handler
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal(shutdown_clone).await;
    });

    // Run both servers with graceful shutdown
    let proxy_future = axum::serve(
        proxy_listener,
        proxy_router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned());

    let metrics_future = axum::serve(metrics_listener, metrics_router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());

    let mut exit = ExitCode::SUCCESS;
    tokio::select! {
        result = proxy_future => {
            if let Err(e) = result {
                tracing::error!(error = %e, "proxy server error");
                exit = ExitCode::FAILURE;
            }
        }
        result = metrics_future => {
            if let Err(e) = result {
                tracing::error!(error = %e, "metrics server error");
                exit = ExitCode::FAILURE;
            }
        }
    }

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "expiry sweeper task failed");
    }

    tracing::info!("stash proxy shut down");
    exit
}

/// Listen for SIGINT (Ctrl+C) or SIGTERM and cancel the shutdown token.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    tracing::info!("shutdown signal received, draining connections...");
    token.cancel();
}
