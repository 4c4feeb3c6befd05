use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use manifold_config::SettingsStore;
use manifold_core::Principal;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::scope::Scope;

/// How often the idle sweeper runs
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Outbound frame on an SSE session stream
#[derive(Debug, Clone)]
pub enum SseFrame {
    /// First event: where to POST client→server messages
    Endpoint(String),
    /// JSON-RPC response or notification
    Message(Value),
}

/// Downstream delivery channel of a session
pub enum SessionChannel {
    /// SSE: responses and notifications ride the event stream
    Sse { tx: mpsc::Sender<SseFrame> },
    /// Streamable HTTP: notifications queue up and ride the next POST
    /// response
    HttpStream { pending: Mutex<VecDeque<Value>> },
}

/// The filtered tool view last computed for a session
///
/// Effective names are pinned for the lifetime of the catalog version, so
/// `tools/call` can reverse-map what `tools/list` handed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub catalog_version: u64,
    /// Hash over the rendered list (names, descriptions, schemas); a
    /// notification goes out only when this moves
    pub fingerprint: u64,
    /// Effective names in list order
    pub names: Vec<String>,
    /// effective name → (upstream, tool)
    pub map: HashMap<String, (String, String)>,
}

/// One downstream session
pub struct Session {
    pub id: String,
    pub scope: Scope,
    pub principal: Principal,
    pub created_at: Instant,
    last_activity: Mutex<Instant>,
    view: RwLock<Option<Arc<SessionView>>>,
    channel: SessionChannel,
    /// Cancels every in-flight upstream call owned by this session
    pub cancel: CancellationToken,
}

impl Session {
    /// Record downstream activity for the idle timer
    pub fn touch(&self) {
        *self.last_activity.lock().expect("session lock poisoned") = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .expect("session lock poisoned")
            .elapsed()
    }

    pub fn view(&self) -> Option<Arc<SessionView>> {
        self.view.read().expect("session lock poisoned").clone()
    }

    pub fn set_view(&self, view: Arc<SessionView>) {
        *self.view.write().expect("session lock poisoned") = Some(view);
    }

    /// Push a frame onto an SSE session; false when the stream is gone
    pub async fn send_sse(&self, frame: SseFrame) -> bool {
        match &self.channel {
            SessionChannel::Sse { tx } => tx.send(frame).await.is_ok(),
            SessionChannel::HttpStream { .. } => false,
        }
    }

    /// Deliver a notification over whichever channel the session has
    pub async fn deliver(&self, message: Value) {
        match &self.channel {
            SessionChannel::Sse { tx } => {
                let _ = tx.send(SseFrame::Message(message)).await;
            }
            SessionChannel::HttpStream { pending } => {
                pending
                    .lock()
                    .expect("session lock poisoned")
                    .push_back(message);
            }
        }
    }

    /// Take the queued notifications of a streamable-HTTP session
    pub fn drain_pending(&self) -> Vec<Value> {
        match &self.channel {
            SessionChannel::Sse { .. } => Vec::new(),
            SessionChannel::HttpStream { pending } => pending
                .lock()
                .expect("session lock poisoned")
                .drain(..)
                .collect(),
        }
    }
}

/// Per-session state keyed by session id
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    cancel: CancellationToken,
}

impl SessionManager {
    pub fn new(cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            cancel,
        })
    }

    /// Create a session bound to a scope and principal
    pub fn create(
        &self,
        scope: Scope,
        principal: Principal,
        channel: SessionChannel,
    ) -> Arc<Session> {
        let session = Arc::new(Session {
            id: uuid::Uuid::new_v4().to_string(),
            scope,
            principal,
            created_at: Instant::now(),
            last_activity: Mutex::new(Instant::now()),
            view: RwLock::new(None),
            channel,
            cancel: self.cancel.child_token(),
        });

        self.sessions
            .write()
            .expect("session lock poisoned")
            .insert(session.id.clone(), Arc::clone(&session));

        tracing::info!(
            session = %session.id,
            scope = %session.scope,
            principal = %session.principal.id,
            "session opened"
        );
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .expect("session lock poisoned")
            .get(id)
            .cloned()
    }

    /// Remove a session, cancelling its in-flight calls
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let session = self
            .sessions
            .write()
            .expect("session lock poisoned")
            .remove(id);
        if let Some(session) = &session {
            session.cancel.cancel();
            tracing::info!(session = %session.id, "session closed");
        }
        session
    }

    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .expect("session lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().expect("session lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every session (shutdown path)
    pub fn close_all(&self) {
        let drained: Vec<Arc<Session>> = {
            let mut guard = self.sessions.write().expect("session lock poisoned");
            guard.drain().map(|(_, s)| s).collect()
        };
        for session in drained {
            session.cancel.cancel();
        }
    }

    /// Expire sessions past the idle timeout
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        settings: Arc<SettingsStore>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            tick.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        let timeout = settings.snapshot().idle_session_timeout();
                        let expired: Vec<String> = manager
                            .all()
                            .into_iter()
                            .filter(|s| s.idle_for() > timeout)
                            .map(|s| s.id.clone())
                            .collect();
                        for id in expired {
                            tracing::info!(session = %id, "session expired");
                            manager.remove(&id);
                        }
                    }
                }
            }
        })
    }
}
