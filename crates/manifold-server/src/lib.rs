#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

//! Downstream side of the Manifold MCP hub
//!
//! Owns session management (SSE and streamable HTTP), scope resolution,
//! request routing with tool namespacing, the smart meta-tools, and the
//! composition root wiring settings, supervisor, catalog, and vector index
//! together.

pub mod auth;
mod endpoints;
mod error;
mod notify;
pub mod protocol;
pub mod resolve;
pub mod router;
pub mod scope;
pub mod session;
pub mod smart;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use manifold_catalog::CatalogReader;
use manifold_config::{SettingsEvent, SettingsStore};
use manifold_upstream::{Connect, Connector, UpstreamSet, UpstreamState};
use manifold_vector::{
    Embedder, HttpEmbedder, JsonFileStore, MemoryStore, VectorIndex, VectorStore,
};
use session::SessionManager;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub use error::HubError;

/// Grace window for forcing shutdown of sessions and supervisors
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Shared state behind every downstream handler
pub struct HubState {
    pub settings: Arc<SettingsStore>,
    pub upstreams: Arc<UpstreamSet>,
    pub catalog: CatalogReader,
    /// Present only when smart routing is enabled
    pub vector: Option<Arc<VectorIndex>>,
    pub sessions: Arc<SessionManager>,
    /// Normalized route prefix ("" or "/prefix")
    pub base_path: String,
}

impl HubState {
    /// Whether the named upstream is currently ready
    pub fn upstream_ready(&self, name: &str) -> bool {
        self.upstreams
            .status(name)
            .is_some_and(|s| s.state == UpstreamState::Ready)
    }
}

/// Assembled hub: background tasks plus the downstream HTTP surface
pub struct Hub {
    state: Arc<HubState>,
    router: Router,
    listen_address: SocketAddr,
    cancel: CancellationToken,
}

impl Hub {
    /// Build the hub with the production connector
    pub async fn new(store: Arc<SettingsStore>) -> anyhow::Result<Self> {
        Self::with_connector(store, Arc::new(Connector)).await
    }

    /// Build the hub with a caller-provided upstream connector
    ///
    /// The composition root: spawns the catalog task, the upstream set and
    /// its settings listener, the vector reconciler when smart routing is
    /// on, the session sweeper, and the change notifier.
    pub async fn with_connector(
        store: Arc<SettingsStore>,
        connector: Arc<dyn Connect>,
    ) -> anyhow::Result<Self> {
        let cancel = CancellationToken::new();
        let snapshot = store.snapshot();

        let (catalog_writer, catalog) = manifold_catalog::spawn(cancel.child_token());

        let upstreams = Arc::new(UpstreamSet::new(
            connector,
            catalog_writer,
            Arc::clone(&store),
            cancel.child_token(),
        ));
        upstreams.sync().await;

        let vector = if snapshot.smart_routing.enabled {
            let smart = &snapshot.smart_routing;
            let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(
                smart.embed_model.clone(),
                smart
                    .api_url
                    .as_ref()
                    .map(|u| u.as_str().trim_end_matches('/').to_string()),
                smart.api_key.clone(),
            ));
            let vector_store: Arc<dyn VectorStore> = match &smart.vector_path {
                Some(path) => Arc::new(JsonFileStore::open(path.clone()).await?),
                None => Arc::new(MemoryStore::default()),
            };
            let index = Arc::new(VectorIndex::open(embedder, vector_store).await?);
            manifold_vector::spawn_reconciler(
                Arc::clone(&index),
                catalog.clone(),
                cancel.child_token(),
            );
            Some(index)
        } else {
            None
        };

        let sessions = SessionManager::new(cancel.child_token());
        sessions.spawn_sweeper(Arc::clone(&store), cancel.child_token());

        let base_path = normalize_base_path(&snapshot.server.base_path);
        let listen_address = snapshot
            .server
            .listen_address
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

        let state = Arc::new(HubState {
            settings: Arc::clone(&store),
            upstreams: Arc::clone(&upstreams),
            catalog,
            vector,
            sessions,
            base_path: base_path.clone(),
        });

        spawn_settings_listener(Arc::clone(&store), upstreams, cancel.child_token());
        notify::spawn_notifier(Arc::clone(&state), cancel.child_token());

        let mut routes = endpoints::routes();
        if snapshot.server.health.enabled {
            routes = routes.route(
                &snapshot.server.health.path,
                axum::routing::get(endpoints::health_handler),
            );
        }
        let routes = routes.with_state(Arc::clone(&state));

        let app = if base_path.is_empty() {
            routes
        } else {
            Router::new().nest(&base_path, routes)
        };
        let router = app.layer(TraceLayer::new_for_http());

        Ok(Self {
            state,
            router,
            listen_address,
            cancel,
        })
    }

    pub fn state(&self) -> Arc<HubState> {
        Arc::clone(&self.state)
    }

    pub const fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    /// The assembled router, for callers that manage the listener
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until the token fires, then shut down in order: sessions
    /// first, supervisors second, with the grace window before forcing
    pub async fn serve(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.listen_address).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "hub listening");

        let graceful = shutdown.clone();
        axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(async move {
                graceful.cancelled().await;
                tracing::info!("graceful shutdown initiated");
            })
            .await?;

        self.shutdown(SHUTDOWN_GRACE).await;
        Ok(())
    }

    /// Cancel all sessions, then all supervisors
    pub async fn shutdown(&self, grace: Duration) {
        self.state.sessions.close_all();
        self.state.upstreams.shutdown(grace).await;
        self.cancel.cancel();
    }
}

/// Feed settings diffs into supervisor reconciliation
fn spawn_settings_listener(
    store: Arc<SettingsStore>,
    upstreams: Arc<UpstreamSet>,
    cancel: CancellationToken,
) {
    let mut events = store.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(SettingsEvent::Changed(diff)) => upstreams.apply(&diff).await,
                    Ok(SettingsEvent::PersistFailed { .. }) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "settings events lagged, resyncing upstreams");
                        upstreams.sync().await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });
}

fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
