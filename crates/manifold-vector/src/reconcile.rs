use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use manifold_catalog::{CatalogReader, CatalogSnapshot, ToolKey};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::index::VectorIndex;

/// How often failed embeddings are retried
const RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Keep the vector index in lockstep with catalog versions
///
/// Runs asynchronously with respect to request handling: a search may see
/// slightly stale rows, which is why results are filtered against the
/// current catalog at query time.
pub fn spawn_reconciler(
    index: Arc<VectorIndex>,
    catalog: CatalogReader,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut events = catalog.subscribe();
        let mut retry = tokio::time::interval(RETRY_INTERVAL);
        retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        retry.tick().await;

        sync(&index, &catalog.snapshot()).await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,

                event = events.recv() => match event {
                    Ok(change) => {
                        tracing::debug!(
                            version = change.new_version,
                            "reconciling vector index with catalog"
                        );
                        sync(&index, &catalog.snapshot()).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "catalog events lagged, resyncing");
                        sync(&index, &catalog.snapshot()).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },

                _ = retry.tick() => {
                    index.retry_pending().await;
                }
            }
        }
    })
}

/// One full pass: drop rows for vanished tools, upsert the enabled set
async fn sync(index: &VectorIndex, snapshot: &CatalogSnapshot) {
    let desired: Vec<(ToolKey, String)> = snapshot
        .enabled_tools()
        .map(|tool| (tool.key(), tool.embed_text()))
        .collect();

    let keep: HashSet<ToolKey> = desired.iter().map(|(key, _)| key.clone()).collect();
    if let Err(e) = index.retain(&keep).await {
        tracing::warn!(error = %e, "failed to prune vector index");
    }

    match index.upsert_many(desired).await {
        Ok(0) => {}
        Ok(embedded) => tracing::info!(embedded, "vector index updated"),
        Err(e) => tracing::warn!(error = %e, "vector index upsert failed, will retry"),
    }
}
