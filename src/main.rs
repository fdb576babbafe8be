//! fleet-relay — soft-realtime fan-out relay for a fleet-tracking
//! application (spec.md §1). Driver connections push position/route/
//! destination/occupancy updates; user connections subscribe and render a
//! live map. See `SPEC_FULL.md` for the full requirements this crate
//! implements and `DESIGN.md` for the grounding ledger.

use fleet_relay::clock::SystemClock;
use fleet_relay::config::{self, Config, LogFormat};
use fleet_relay::fanout::broadcast_to_all;
use fleet_relay::metrics;
use fleet_relay::reaper;
use fleet_relay::server::{self, AppState};
use fleet_relay::state::Hub;
use relay_proto::OutboundEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Resolves the config path from `-c <path>`/`--config <path>`/a bare
/// first argument, falling back to `config.toml` (mirrors the teacher's
/// `resolve_config_path`, minus REHASH's need to canonicalize).
fn resolve_config_path() -> String {
    let mut args = std::env::args().skip(1);
    match args.next() {
        Some(flag) if flag == "-c" || flag == "--config" => args.next().unwrap_or_else(|| {
            eprintln!("missing path after {flag}");
            std::process::exit(1);
        }),
        Some(path) => path,
        None => "config.toml".to_string(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = resolve_config_path();
    let config = if std::path::Path::new(&config_path).exists() {
        Config::load(&config_path).map_err(|e| {
            eprintln!("ERROR: failed to load config from {config_path}: {e}");
            e
        })?
    } else {
        Config::default()
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match config.server.log_format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .json()
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .init();
        }
    }

    if let Err(errors) = config::validate(&config) {
        for err in &errors {
            error!(error = %err, "configuration validation failed");
        }
        return Err(anyhow::anyhow!(
            "configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    info!(bind = %config.server.bind, "starting fleet-relay");

    metrics::init();

    let hub = Arc::new(Hub::new(Arc::new(config.clone()), Arc::new(SystemClock)));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Reaper task (spec.md §4.8): periodic sweep, also subscribed to the
    // shutdown broadcast so it stops promptly rather than on its next tick.
    {
        let hub = Arc::clone(&hub);
        let interval = Duration::from_secs(config.limits.cleanup_interval_secs);
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        reaper::sweep(&hub, hub.clock.now());
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    let app_state = AppState {
        hub: Arc::clone(&hub),
        shutdown: shutdown_tx.clone(),
    };
    let app = server::router(app_state).layer(tower_http::compression::CompressionLayer::new());

    let listener = TcpListener::bind(config.server.bind).await?;
    info!(addr = %config.server.bind, "listening");

    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<()>();

    // Signal handling + graceful shutdown sequence (spec.md §5, §11.1):
    // mark every live driver disconnected, broadcast `serverShutdown` to
    // every connection, settle briefly, then let axum stop accepting and
    // drain in-flight connections.
    tokio::spawn(async move {
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
                .expect("failed to install SIGINT handler");
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }

        hub.mark_all_disconnected(hub.clock.now());
        broadcast_to_all(
            &hub,
            &OutboundEvent::ServerShutdown {
                timestamp: chrono::Utc::now().timestamp_millis(),
            },
        );
        let _ = shutdown_tx.send(());

        tokio::time::sleep(Duration::from_millis(500)).await;
        let _ = ready_tx.send(());
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = ready_rx.await;
        })
        .await?;

    info!("fleet-relay stopped");
    Ok(())
}
