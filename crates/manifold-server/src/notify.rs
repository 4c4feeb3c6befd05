use std::sync::Arc;
use std::time::Duration;

use manifold_config::SettingsEvent;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::protocol::notification;
use crate::router::compute_view;
use crate::HubState;

/// Version bumps arriving within this window coalesce into one notification
const COALESCE_WINDOW: Duration = Duration::from_millis(100);

/// Re-resolve session views on catalog or group changes
///
/// A session is notified with `notifications/tools/list_changed` only when
/// its filtered view actually differs from the one last sent; unrelated
/// edits stay silent.
pub fn spawn_notifier(state: Arc<HubState>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut catalog_events = state.catalog.subscribe();
        let mut settings_events = state.settings.subscribe();

        loop {
            let triggered = tokio::select! {
                () = cancel.cancelled() => break,

                event = catalog_events.recv() => match event {
                    Ok(_) | Err(RecvError::Lagged(_)) => true,
                    Err(RecvError::Closed) => break,
                },

                event = settings_events.recv() => match event {
                    Ok(SettingsEvent::Changed(diff)) => diff.groups_changed || diff.flags_changed,
                    Ok(SettingsEvent::PersistFailed { .. }) => false,
                    Err(RecvError::Lagged(_)) => true,
                    Err(RecvError::Closed) => break,
                },
            };

            if !triggered {
                continue;
            }

            tokio::time::sleep(COALESCE_WINDOW).await;
            while catalog_events.try_recv().is_ok() {}
            while settings_events.try_recv().is_ok() {}

            refresh_sessions(&state).await;
        }
    })
}

async fn refresh_sessions(state: &Arc<HubState>) {
    for session in state.sessions.all() {
        let Some(new_view) = compute_view(state, &session.scope, &session.principal) else {
            continue;
        };

        let changed = session
            .view()
            .is_some_and(|old| old.fingerprint != new_view.fingerprint);
        session.set_view(new_view);

        if changed {
            tracing::debug!(session = %session.id, "tool view changed, notifying");
            session
                .deliver(notification("notifications/tools/list_changed"))
                .await;
        }
    }
}
