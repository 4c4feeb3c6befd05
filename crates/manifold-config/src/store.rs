use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};

use crate::{diff, ConfigError, Settings, SettingsDiff};

/// Event stream emitted by the settings store
#[derive(Debug, Clone)]
pub enum SettingsEvent {
    /// A mutation was applied; carries the reconciliation diff
    Changed(Arc<SettingsDiff>),
    /// The persistence collaborator failed; in-memory state stays
    /// authoritative
    PersistFailed { message: String },
}

/// Persistence collaborator invoked after each successful mutation
///
/// Encoding and storage format are the collaborator's concern; the store
/// only hands over the new snapshot.
#[async_trait]
pub trait SettingsPersist: Send + Sync {
    async fn persist(&self, settings: &Settings) -> anyhow::Result<()>;
}

/// Single source of truth for the hub configuration
///
/// Readers take lock-free snapshots; writers are serialized and broadcast a
/// diff per applied mutation. Persistence failures are logged and surfaced
/// but never roll back the in-memory snapshot.
pub struct SettingsStore {
    current: RwLock<Arc<Settings>>,
    writer: Mutex<()>,
    events: broadcast::Sender<SettingsEvent>,
    persist: Option<Arc<dyn SettingsPersist>>,
}

impl SettingsStore {
    pub fn new(initial: Settings) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            current: RwLock::new(Arc::new(initial)),
            writer: Mutex::new(()),
            events,
            persist: None,
        }
    }

    pub fn with_persistence(initial: Settings, persist: Arc<dyn SettingsPersist>) -> Self {
        let mut store = Self::new(initial);
        store.persist = Some(persist);
        store
    }

    /// Immutable view of the current settings
    pub fn snapshot(&self) -> Arc<Settings> {
        Arc::clone(&self.current.read().expect("settings lock poisoned"))
    }

    /// Subscribe to mutation and persistence events
    pub fn subscribe(&self) -> broadcast::Receiver<SettingsEvent> {
        self.events.subscribe()
    }

    /// Apply a mutation to a working copy and swap it in atomically
    ///
    /// Mutations are serialized: one completes (including validation and the
    /// persist request) before the next begins. Mutating to identical
    /// content is a no-op: nothing is swapped, broadcast, or persisted.
    ///
    /// # Errors
    ///
    /// Returns the mutation's own error or a validation error; in either
    /// case the previous snapshot remains in place
    pub async fn mutate<F>(&self, f: F) -> Result<Arc<SettingsDiff>, ConfigError>
    where
        F: FnOnce(&mut Settings) -> Result<(), ConfigError>,
    {
        let _guard = self.writer.lock().await;

        let old = self.snapshot();
        let mut working = (*old).clone();
        f(&mut working)?;
        working.validate()?;

        let d = Arc::new(diff(&old, &working));
        if d.is_empty() {
            tracing::debug!("settings mutation was a no-op");
            return Ok(d);
        }

        let next = Arc::new(working);
        *self.current.write().expect("settings lock poisoned") = Arc::clone(&next);

        tracing::info!(
            added = d.added_upstreams.len(),
            removed = d.removed_upstreams.len(),
            recreated = d.recreated_upstreams.len(),
            overlay = d.overlay_upstreams.len(),
            groups = d.groups_changed,
            flags = d.flags_changed,
            "settings changed"
        );

        let _ = self.events.send(SettingsEvent::Changed(Arc::clone(&d)));

        if let Some(persist) = &self.persist {
            if let Err(e) = persist.persist(&next).await {
                tracing::warn!(error = %e, "failed to persist settings");
                let _ = self.events.send(SettingsEvent::PersistFailed {
                    message: e.to_string(),
                });
            }
        }

        Ok(d)
    }

    /// Replace the whole settings value, e.g. on a file reload
    pub async fn replace(&self, new: Settings) -> Result<Arc<SettingsDiff>, ConfigError> {
        self.mutate(|settings| {
            *settings = new;
            Ok(())
        })
        .await
    }
}
