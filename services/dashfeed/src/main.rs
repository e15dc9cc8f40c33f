use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use dashfeed::config::Config;
use dashfeed::janitor::Janitor;
use dashfeed::persistence::EventStore;
use dashfeed::router;
use dashfeed::state::AppState;

/// How long queued frames get to drain after the close signal.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(true).init();

    let config = Config::from_env().context("loading configuration")?;
    info!(
        port = config.port,
        stream_port = config.stream_port(),
        "starting dashfeed"
    );

    // Persistence must be reachable before anything listens.
    let store = EventStore::connect(&config.mongodb_uri)
        .await
        .context("connecting to persistence")?;
    store
        .ensure_indexes(config.raw_events_ttl_days)
        .await
        .context("ensuring indexes")?;

    let state = AppState::new(config, store);

    let api_addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let stream_addr = SocketAddr::from(([0, 0, 0, 0], state.config.stream_port()));
    let api_listener = TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("binding {api_addr}"))?;
    let stream_listener = TcpListener::bind(stream_addr)
        .await
        .with_context(|| format!("binding {stream_addr}"))?;

    let janitor = Janitor::spawn(state.aggregator.clone());

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    spawn_signal_listener(shutdown_tx);

    let api = router::api_router(state.clone());
    let stream = router::stream_router(state.clone());

    let mut api_shutdown = shutdown_rx.clone();
    let api_server = tokio::spawn(async move {
        let serve = axum::serve(
            api_listener,
            api.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = api_shutdown.changed().await;
        });
        if let Err(err) = serve.await {
            error!(error = %err, "request endpoint failed");
        }
    });

    let stream_server = tokio::spawn(async move {
        if let Err(err) = axum::serve(stream_listener, stream).await {
            error!(error = %err, "streaming endpoint failed");
        }
    });

    info!(api = %api_addr, stream = %stream_addr, "listening");

    let _ = shutdown_rx.changed().await;
    info!("shutting down");

    janitor.stop().await;

    // Streaming sessions are long-lived, so they are not awaited: each
    // connection gets a close frame behind its queued deltas, then the
    // process exits after the grace window.
    state.registry.close_all();
    tokio::time::sleep(SHUTDOWN_GRACE).await;

    let _ = api_server.await;
    stream_server.abort();

    info!("dashfeed stopped");
    Ok(())
}

fn spawn_signal_listener(shutdown: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => info!("received SIGINT"),
                        _ = sigterm.recv() => info!("received SIGTERM"),
                    }
                }
                Err(err) => {
                    error!(error = %err, "failed to register SIGTERM handler");
                    let _ = ctrl_c.await;
                    info!("received SIGINT");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received ctrl-c");
        }

        let _ = shutdown.send(true);
    });
}
