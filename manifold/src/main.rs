#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod args;

use std::sync::Arc;

use args::Args;
use clap::Parser;
use manifold_config::{Settings, SettingsStore};
use manifold_server::Hub;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(&args.config)?;
    if let Some(listen) = args.listen {
        settings.server.listen_address = Some(listen);
    }

    let _telemetry_guard = manifold_telemetry::init(settings.telemetry.as_ref(), "info")?;

    tracing::info!(
        config_path = %args.config.display(),
        upstreams = settings.upstreams.len(),
        "starting manifold"
    );

    let store = Arc::new(SettingsStore::new(settings));
    let hub = Hub::new(Arc::clone(&store)).await?;

    let shutdown = CancellationToken::new();
    let shutdown_clone = shutdown.clone();

    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_clone.cancel();
    });

    spawn_reload_on_sighup(store, args.config.clone());

    hub.serve(shutdown).await?;

    tracing::info!("manifold stopped");
    Ok(())
}

/// Wait for a shutdown signal (`SIGINT` or `SIGTERM`)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("shutdown signal received");
}

/// Re-load the settings file on SIGHUP and apply it as a mutation
///
/// This drives the same reconciliation path as any other settings edit:
/// upstream restarts, catalog updates, and session notifications all
/// follow from the diff.
fn spawn_reload_on_sighup(store: Arc<SettingsStore>, config_path: std::path::PathBuf) {
    #[cfg(unix)]
    tokio::spawn(async move {
        let mut hangup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        {
            Ok(signal) => signal,
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGHUP handler");
                return;
            }
        };

        while hangup.recv().await.is_some() {
            tracing::info!(config_path = %config_path.display(), "reloading settings");
            match Settings::load(&config_path) {
                Ok(new_settings) => match store.replace(new_settings).await {
                    Ok(diff) if diff.is_empty() => tracing::info!("settings unchanged"),
                    Ok(_) => tracing::info!("settings reloaded"),
                    Err(e) => tracing::error!(error = %e, "settings rejected"),
                },
                Err(e) => tracing::error!(error = %e, "failed to load settings file"),
            }
        }
    });

    #[cfg(not(unix))]
    let _ = (store, config_path);
}
