use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use manifold_catalog::{CatalogWriter, EffectiveTool};
use manifold_config::{SettingsDiff, SettingsStore, UpstreamSpec};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::client::{Connect, ServerIdentity, ToolDef, UpstreamClient, UpstreamEvent};
use crate::error::UpstreamError;

/// Handshake deadline for a single connection attempt
const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);
/// Consecutive keep-alive failures tolerated before degrading
const KEEP_ALIVE_FAILURE_LIMIT: u32 = 2;

/// Lifecycle of one upstream runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamState {
    Disconnected,
    Connecting,
    Ready,
    Degraded,
    Closed,
}

impl UpstreamState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Closed => "closed",
        }
    }
}

/// Published snapshot of one runtime's state
///
/// The client handle is only present while ready; callers clone it and run
/// their calls on their own tasks so a slow upstream never blocks another.
#[derive(Clone)]
pub struct UpstreamStatus {
    pub state: UpstreamState,
    pub identity: Option<ServerIdentity>,
    pub client: Option<Arc<dyn UpstreamClient>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub tool_count: usize,
}

impl Default for UpstreamStatus {
    fn default() -> Self {
        Self {
            state: UpstreamState::Disconnected,
            identity: None,
            client: None,
            last_error: None,
            consecutive_failures: 0,
            tool_count: 0,
        }
    }
}

impl std::fmt::Debug for UpstreamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamStatus")
            .field("state", &self.state)
            .field("last_error", &self.last_error)
            .field("consecutive_failures", &self.consecutive_failures)
            .field("tool_count", &self.tool_count)
            .finish_non_exhaustive()
    }
}

enum Command {
    /// Overlay-only spec edit: re-project the catalog without a restart
    Overlay(Box<UpstreamSpec>),
    /// Re-fetch the tool list (e.g. the upstream signalled list_changed)
    Refresh,
    /// A call worker observed a transport failure
    ReportFailure { message: String },
    /// Drive to closed; the ack fires after catalog cleanup
    Close(oneshot::Sender<()>),
}

struct Handle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<UpstreamStatus>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// One supervised runtime per enabled upstream, in lockstep with settings
///
/// State transitions are serialized per upstream; different upstreams run in
/// parallel. Tool projections flow into the catalog writer.
pub struct UpstreamSet {
    connector: Arc<dyn Connect>,
    catalog: CatalogWriter,
    settings: Arc<SettingsStore>,
    backoff: Backoff,
    runtimes: RwLock<HashMap<String, Handle>>,
    cancel: CancellationToken,
}

impl UpstreamSet {
    pub fn new(
        connector: Arc<dyn Connect>,
        catalog: CatalogWriter,
        settings: Arc<SettingsStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connector,
            catalog,
            settings,
            backoff: Backoff::default(),
            runtimes: RwLock::new(HashMap::new()),
            cancel,
        }
    }

    /// Override the reconnect backoff (tests use short delays)
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Bring runtimes in line with the current settings snapshot
    ///
    /// Used at startup; afterwards [`UpstreamSet::apply`] consumes diffs.
    pub async fn sync(&self) {
        let settings = self.settings.snapshot();
        for (name, spec) in &settings.upstreams {
            if spec.enabled && !self.is_running(name) {
                self.spawn_runtime(name, spec.clone());
            }
        }
    }

    /// Apply one settings diff to the running set
    pub async fn apply(&self, diff: &SettingsDiff) {
        for name in &diff.removed_upstreams {
            self.close_runtime(name).await;
        }
        for name in &diff.recreated_upstreams {
            self.close_runtime(name).await;
            self.spawn_from_settings(name);
        }
        for name in &diff.added_upstreams {
            self.spawn_from_settings(name);
        }
        for name in &diff.overlay_upstreams {
            let spec = self.settings.snapshot().upstreams.get(name).cloned();
            if let Some(spec) = spec {
                self.send_command(name, Command::Overlay(Box::new(spec))).await;
            }
        }
    }

    /// Current status of one upstream
    pub fn status(&self, name: &str) -> Option<UpstreamStatus> {
        self.runtimes
            .read()
            .expect("runtime lock poisoned")
            .get(name)
            .map(|h| h.status.borrow().clone())
    }

    /// All statuses, ordered by upstream name
    pub fn statuses(&self) -> Vec<(String, UpstreamStatus)> {
        let mut out: Vec<(String, UpstreamStatus)> = self
            .runtimes
            .read()
            .expect("runtime lock poisoned")
            .iter()
            .map(|(name, h)| (name.clone(), h.status.borrow().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Tell the supervisor a call worker hit a transport failure
    ///
    /// Fire-and-forget: a full command queue means the runtime is already
    /// busy transitioning.
    pub fn report_failure(&self, name: &str, message: impl Into<String>) {
        if let Some(handle) = self
            .runtimes
            .read()
            .expect("runtime lock poisoned")
            .get(name)
        {
            let _ = handle.commands.try_send(Command::ReportFailure {
                message: message.into(),
            });
        }
    }

    /// Request a tool-list refresh (upstream signalled list_changed)
    pub async fn refresh(&self, name: &str) {
        self.send_command(name, Command::Refresh).await;
    }

    /// Close every runtime, forcing after the grace window
    pub async fn shutdown(&self, grace: Duration) {
        self.cancel.cancel();

        let handles: Vec<(String, Handle)> = self
            .runtimes
            .write()
            .expect("runtime lock poisoned")
            .drain()
            .collect();

        for (name, mut handle) in handles {
            match tokio::time::timeout(grace, &mut handle.task).await {
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!(upstream = %name, "forcing upstream shutdown after grace window");
                    handle.task.abort();
                }
            }
        }
    }

    fn is_running(&self, name: &str) -> bool {
        self.runtimes
            .read()
            .expect("runtime lock poisoned")
            .contains_key(name)
    }

    fn spawn_from_settings(&self, name: &str) {
        let spec = self.settings.snapshot().upstreams.get(name).cloned();
        match spec {
            Some(spec) if spec.enabled => self.spawn_runtime(name, spec),
            _ => {}
        }
    }

    fn spawn_runtime(&self, name: &str, spec: UpstreamSpec) {
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (status_tx, status_rx) = watch::channel(UpstreamStatus::default());
        let cancel = self.cancel.child_token();

        let runtime = Runtime {
            name: name.to_string(),
            keep_alive: self.settings.snapshot().keep_alive_for(name),
            spec,
            connector: Arc::clone(&self.connector),
            catalog: self.catalog.clone(),
            status: status_tx,
            commands: commands_rx,
            cancel: cancel.clone(),
            backoff: self.backoff,
            failures: 0,
            tools: Vec::new(),
        };

        let task = tokio::spawn(runtime.run());

        let previous = self.runtimes.write().expect("runtime lock poisoned").insert(
            name.to_string(),
            Handle {
                commands: commands_tx,
                status: status_rx,
                cancel,
                task,
            },
        );

        if let Some(previous) = previous {
            // A stale runtime under the same name is a reconcile race; shut
            // it down off to the side.
            previous.cancel.cancel();
        }
    }

    async fn close_runtime(&self, name: &str) {
        let handle = self
            .runtimes
            .write()
            .expect("runtime lock poisoned")
            .remove(name);
        let Some(handle) = handle else { return };

        let (ack_tx, ack_rx) = oneshot::channel();
        if handle.commands.send(Command::Close(ack_tx)).await.is_ok() {
            let _ = tokio::time::timeout(Duration::from_secs(5), ack_rx).await;
        }
        handle.cancel.cancel();
        let _ = handle.task.await;
    }

    async fn send_command(&self, name: &str, command: Command) {
        let tx = self
            .runtimes
            .read()
            .expect("runtime lock poisoned")
            .get(name)
            .map(|h| h.commands.clone());
        if let Some(tx) = tx {
            let _ = tx.send(command).await;
        }
    }
}

enum ServeOutcome {
    /// Ready loop ended on a failure; retry after backoff
    Degrade(String),
    /// Close requested; the ack fires after catalog cleanup
    Shutdown(Option<oneshot::Sender<()>>),
}

struct Runtime {
    name: String,
    spec: UpstreamSpec,
    keep_alive: Duration,
    connector: Arc<dyn Connect>,
    catalog: CatalogWriter,
    status: watch::Sender<UpstreamStatus>,
    commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    backoff: Backoff,
    failures: u32,
    tools: Vec<ToolDef>,
}

impl Runtime {
    async fn run(mut self) {
        let ack = loop {
            self.set_state(UpstreamState::Connecting, None);

            match self.connect_once().await {
                Ok(client) => {
                    self.failures = 0;
                    self.publish_tools().await;
                    self.set_ready(&client);
                    tracing::info!(upstream = %self.name, tools = self.tools.len(), "upstream ready");

                    match self.serve_ready(Arc::clone(&client)).await {
                        ServeOutcome::Degrade(message) => {
                            let _ = client.close().await;
                            self.failures = 1;
                            tracing::warn!(upstream = %self.name, error = %message, "upstream degraded");
                            self.set_state(UpstreamState::Degraded, Some(message));
                        }
                        ServeOutcome::Shutdown(ack) => {
                            let _ = client.close().await;
                            break ack;
                        }
                    }
                }
                Err(e) => {
                    self.failures = self.failures.saturating_add(1);
                    tracing::warn!(
                        upstream = %self.name,
                        error = %e,
                        failures = self.failures,
                        "upstream connect failed"
                    );
                    self.set_state(UpstreamState::Degraded, Some(e.to_string()));
                }
            }

            match self.wait_for_retry().await {
                None => {}
                Some(ack) => break ack,
            }
        };

        self.set_state(UpstreamState::Closed, None);
        self.catalog.remove(&self.name).await;
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
        tracing::info!(upstream = %self.name, "upstream closed");
    }

    async fn connect_once(&mut self) -> Result<Arc<dyn UpstreamClient>, UpstreamError> {
        let connect = self.connector.connect(&self.name, &self.spec.transport);
        let client = tokio::time::timeout(STARTUP_TIMEOUT, connect)
            .await
            .map_err(|_| {
                UpstreamError::Transport(format!(
                    "handshake timed out after {}s",
                    STARTUP_TIMEOUT.as_secs()
                ))
            })??;

        self.tools = client.list_tools().await?;
        Ok(client)
    }

    /// Ready loop: commands, upstream events, keep-alive, cancellation
    async fn serve_ready(&mut self, client: Arc<dyn UpstreamClient>) -> ServeOutcome {
        let mut events = client.take_events();
        let mut keep_alive = tokio::time::interval_at(
            tokio::time::Instant::now() + self.keep_alive,
            self.keep_alive,
        );
        keep_alive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut ping_failures: u32 = 0;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return ServeOutcome::Shutdown(None),

                command = self.commands.recv() => match command {
                    None => return ServeOutcome::Shutdown(None),
                    Some(Command::Close(ack)) => return ServeOutcome::Shutdown(Some(ack)),
                    Some(Command::Overlay(spec)) => {
                        self.spec = *spec;
                        self.publish_tools().await;
                        self.touch_tool_count();
                    }
                    Some(Command::Refresh) => {
                        if let Err(message) = self.refresh_tools(&client).await {
                            return ServeOutcome::Degrade(message);
                        }
                    }
                    Some(Command::ReportFailure { message }) => {
                        return ServeOutcome::Degrade(message);
                    }
                },

                event = next_event(&mut events) => match event {
                    Some(UpstreamEvent::ToolListChanged) => {
                        tracing::debug!(upstream = %self.name, "upstream announced tool list change");
                        if let Err(message) = self.refresh_tools(&client).await {
                            return ServeOutcome::Degrade(message);
                        }
                    }
                    None => events = None,
                },

                _ = keep_alive.tick() => {
                    if self.spec.transport.has_persistent_channel() {
                        // A probe that takes the whole interval counts as a
                        // failure.
                        let alive = tokio::time::timeout(self.keep_alive, client.ping())
                            .await
                            .map(|r| r.is_ok())
                            .unwrap_or(false);
                        if alive {
                            ping_failures = 0;
                        } else {
                            ping_failures += 1;
                            tracing::warn!(
                                upstream = %self.name,
                                failures = ping_failures,
                                "keep-alive probe failed"
                            );
                            if ping_failures >= KEEP_ALIVE_FAILURE_LIMIT {
                                return ServeOutcome::Degrade("keep-alive failed".to_string());
                            }
                            continue;
                        }
                    }

                    if let Err(message) = self.refresh_tools(&client).await {
                        return ServeOutcome::Degrade(message);
                    }
                }
            }
        }
    }

    /// Re-fetch the tool list and re-project the catalog
    async fn refresh_tools(&mut self, client: &Arc<dyn UpstreamClient>) -> Result<(), String> {
        match client.list_tools().await {
            Ok(tools) => {
                self.tools = tools;
                self.publish_tools().await;
                self.touch_tool_count();
                Ok(())
            }
            Err(e) => Err(format!("tool refresh failed: {e}")),
        }
    }

    /// Degraded: sleep out the backoff, still answering overlay/close
    ///
    /// Returns `Some(ack)` when the runtime should shut down.
    async fn wait_for_retry(&mut self) -> Option<Option<oneshot::Sender<()>>> {
        let delay = self.backoff.jittered(self.failures);
        tracing::debug!(upstream = %self.name, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        let retry_at = tokio::time::Instant::now() + delay;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Some(None),
                () = tokio::time::sleep_until(retry_at) => return None,
                command = self.commands.recv() => match command {
                    None => return Some(None),
                    Some(Command::Close(ack)) => return Some(Some(ack)),
                    Some(Command::Overlay(spec)) => {
                        self.spec = *spec;
                        if !self.tools.is_empty() {
                            self.publish_tools().await;
                        }
                    }
                    // Already on the way back up.
                    Some(Command::Refresh | Command::ReportFailure { .. }) => {}
                },
            }
        }
    }

    /// Project the cached tool list through the per-tool overlay into the
    /// catalog
    async fn publish_tools(&self) {
        let effective = overlay_tools(&self.name, &self.spec, &self.tools);
        self.catalog.publish(&self.name, effective).await;
    }

    fn set_ready(&self, client: &Arc<dyn UpstreamClient>) {
        let _ = self.status.send(UpstreamStatus {
            state: UpstreamState::Ready,
            identity: Some(client.identity().clone()),
            client: Some(Arc::clone(client)),
            last_error: None,
            consecutive_failures: 0,
            tool_count: self.tools.len(),
        });
    }

    fn set_state(&self, state: UpstreamState, last_error: Option<String>) {
        let _ = self.status.send(UpstreamStatus {
            state,
            identity: None,
            client: None,
            last_error,
            consecutive_failures: self.failures,
            tool_count: self.tools.len(),
        });
    }

    fn touch_tool_count(&self) {
        self.status.send_modify(|status| {
            status.tool_count = self.tools.len();
        });
    }
}

/// Await the next upstream event, or hang forever once the stream is gone
async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<UpstreamEvent>>,
) -> Option<UpstreamEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Apply the per-tool overlay to an upstream-reported tool list
fn overlay_tools(upstream: &str, spec: &UpstreamSpec, tools: &[ToolDef]) -> Vec<EffectiveTool> {
    tools
        .iter()
        .map(|tool| {
            let overlay = spec.tools.get(&tool.name);
            EffectiveTool {
                upstream: upstream.to_string(),
                name: tool.name.clone(),
                description: overlay
                    .and_then(|o| o.description.clone())
                    .or_else(|| tool.description.clone())
                    .unwrap_or_default(),
                input_schema: tool.input_schema.clone(),
                enabled: overlay.and_then(|o| o.enabled).unwrap_or(true),
            }
        })
        .collect()
}
