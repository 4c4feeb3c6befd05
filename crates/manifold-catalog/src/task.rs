use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::{CatalogSnapshot, EffectiveTool, ToolKey};

/// Set-level difference between two catalog versions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogDiff {
    pub added: Vec<ToolKey>,
    pub removed: Vec<ToolKey>,
    /// Description, schema, or enabled flag changed
    pub changed: Vec<ToolKey>,
}

impl CatalogDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Change notification delivered to catalog subscribers
#[derive(Debug, Clone)]
pub struct CatalogChange {
    pub old_version: u64,
    pub new_version: u64,
    pub diff: CatalogDiff,
}

enum Command {
    /// Replace one upstream's tool projection
    Publish {
        upstream: String,
        tools: Vec<EffectiveTool>,
    },
    /// Drop one upstream's tools entirely
    Remove { upstream: String },
}

/// Write handle used by upstream supervisors
#[derive(Clone)]
pub struct CatalogWriter {
    tx: mpsc::Sender<Command>,
}

impl CatalogWriter {
    /// Replace the named upstream's tools; a no-op when nothing changed
    pub async fn publish(&self, upstream: impl Into<String>, tools: Vec<EffectiveTool>) {
        let _ = self
            .tx
            .send(Command::Publish {
                upstream: upstream.into(),
                tools,
            })
            .await;
    }

    /// Remove the named upstream's tools
    pub async fn remove(&self, upstream: impl Into<String>) {
        let _ = self
            .tx
            .send(Command::Remove {
                upstream: upstream.into(),
            })
            .await;
    }
}

/// Read handle: snapshots plus change subscription
#[derive(Clone)]
pub struct CatalogReader {
    snapshot_rx: watch::Receiver<Arc<CatalogSnapshot>>,
    events: broadcast::Sender<Arc<CatalogChange>>,
}

impl CatalogReader {
    /// Current immutable snapshot
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.snapshot_rx.borrow().clone()
    }

    pub fn version(&self) -> u64 {
        self.snapshot_rx.borrow().version()
    }

    /// Subscribe to `(old, new, diff)` change events
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<CatalogChange>> {
        self.events.subscribe()
    }

    /// Watch channel for callers that only care about the latest snapshot
    pub fn watch(&self) -> watch::Receiver<Arc<CatalogSnapshot>> {
        self.snapshot_rx.clone()
    }
}

/// Spawn the single-writer catalog reconciliation task
pub fn spawn(cancel: CancellationToken) -> (CatalogWriter, CatalogReader) {
    let (tx, mut rx) = mpsc::channel::<Command>(256);
    let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(CatalogSnapshot::default()));
    let (events, _) = broadcast::channel(64);

    let reader = CatalogReader {
        snapshot_rx,
        events: events.clone(),
    };

    tokio::spawn(async move {
        let mut entries: BTreeMap<ToolKey, EffectiveTool> = BTreeMap::new();
        let mut version: u64 = 0;

        loop {
            let command = tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(cmd) => cmd,
                    None => break,
                },
                () = cancel.cancelled() => break,
            };

            let (upstream, new_tools) = match command {
                Command::Publish { upstream, tools } => (upstream, tools),
                Command::Remove { upstream } => (upstream, Vec::new()),
            };

            let diff = apply(&mut entries, &upstream, new_tools);
            if diff.is_empty() {
                continue;
            }

            let old_version = version;
            version += 1;

            let snapshot = Arc::new(CatalogSnapshot::new(
                version,
                entries.values().cloned().collect(),
            ));
            let _ = snapshot_tx.send(snapshot);

            tracing::debug!(
                upstream = %upstream,
                version,
                added = diff.added.len(),
                removed = diff.removed.len(),
                changed = diff.changed.len(),
                "catalog updated"
            );

            let _ = events.send(Arc::new(CatalogChange {
                old_version,
                new_version: version,
                diff,
            }));
        }
    });

    (CatalogWriter { tx }, reader)
}

/// Replace one upstream's entries, returning the set-level diff
fn apply(
    entries: &mut BTreeMap<ToolKey, EffectiveTool>,
    upstream: &str,
    new_tools: Vec<EffectiveTool>,
) -> CatalogDiff {
    let mut diff = CatalogDiff::default();

    let old_keys: Vec<ToolKey> = entries
        .keys()
        .filter(|k| k.upstream == upstream)
        .cloned()
        .collect();

    let mut incoming: BTreeMap<ToolKey, EffectiveTool> = new_tools
        .into_iter()
        .filter(|t| t.upstream == upstream)
        .map(|t| (t.key(), t))
        .collect();

    for key in old_keys {
        match incoming.remove(&key) {
            None => {
                entries.remove(&key);
                diff.removed.push(key);
            }
            Some(tool) => {
                if entries.get(&key) != Some(&tool) {
                    entries.insert(key.clone(), tool);
                    diff.changed.push(key);
                }
            }
        }
    }

    for (key, tool) in incoming {
        entries.insert(key.clone(), tool);
        diff.added.push(key);
    }

    diff
}
