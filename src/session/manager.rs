// Session manager — owns the registry and all live connections, applies the
// download state machine, and executes user actions against the backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::connection::{self, AttachKind, ConnectionEvent, SessionEvent, SocketState};
use super::model::{Session, SessionStatus};
use super::registry::SessionRegistry;
use crate::backend::client::ControlApi;
use crate::config::{BACKEND_HOST, RECONNECT_SETTLE_DELAY};

/// Failures surfaced to the caller of a user action. Anything below this
/// tier stays confined to the affected session's status.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("unknown session {0}")]
    UnknownSession(String),
    #[error("session {0} cannot {1} from its current status")]
    InvalidTransition(String, &'static str),
    #[error("session {0} has no stored magnet to retry")]
    MissingMagnet(String),
    #[error("backend call failed: {0:#}")]
    Backend(#[source] anyhow::Error),
}

struct Inner {
    registry: Mutex<SessionRegistry>,
    connections: Mutex<HashMap<String, connection::ConnectionHandle>>,
    retry_counts: Mutex<HashMap<String, u32>>,
    backend: Arc<dyn ControlApi>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    stream_base: String,
    epoch: AtomicU64,
}

/// Cloneable handle to the session manager. All registry mutation funnels
/// through one event loop plus the action methods, each taking the registry
/// lock briefly; per-session ordering holds because a session has at most
/// one live connection feeding the event channel.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Build a manager talking to the backend on `port` and spawn its event
    /// loop. The registry should already be loaded.
    pub fn new(backend: Arc<dyn ControlApi>, registry: SessionRegistry, port: u16) -> Self {
        Self::with_stream_base(
            backend,
            registry,
            format!("ws://{}:{}", BACKEND_HOST, port),
        )
    }

    /// Like `new`, but with an explicit websocket base URL (tests point this
    /// at a fake backend on an ephemeral port).
    pub fn with_stream_base(
        backend: Arc<dyn ControlApi>,
        registry: SessionRegistry,
        stream_base: String,
    ) -> Self {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            registry: Mutex::new(registry),
            connections: Mutex::new(HashMap::new()),
            retry_counts: Mutex::new(HashMap::new()),
            backend,
            events_tx,
            stream_base,
            epoch: AtomicU64::new(0),
        });

        let loop_inner = inner.clone();
        tokio::spawn(async move {
            while let Some(ev) = events_rx.recv().await {
                Self::handle_event(&loop_inner, ev);
            }
        });

        Self { inner }
    }

    // --- queries ---------------------------------------------------------

    pub fn sessions(&self) -> Vec<Session> {
        self.inner.registry.lock().all().to_vec()
    }

    pub fn session(&self, id: &str) -> Option<Session> {
        self.inner.registry.lock().get(id).cloned()
    }

    /// Transport state of the session's connection, if one exists.
    pub fn connection_state(&self, id: &str) -> Option<SocketState> {
        self.inner
            .connections
            .lock()
            .get(id)
            .map(|h| h.socket_state())
    }

    pub fn has_live_connection(&self, id: &str) -> bool {
        self.inner
            .connections
            .lock()
            .get(id)
            .map(|h| h.is_live())
            .unwrap_or(false)
    }

    // --- user actions ----------------------------------------------------

    /// Start a new download: backend assigns the id, the session enters the
    /// registry as `Downloading`, and a connection is opened immediately.
    pub async fn start_download(
        &self,
        title: &str,
        magnet: &str,
        quality: Option<String>,
    ) -> Result<String, ControlError> {
        let id = self
            .inner
            .backend
            .create_download(magnet)
            .await
            .map_err(ControlError::Backend)?;
        info!("started download {} ({})", id, title);

        let session = Session::new_download(id.clone(), title, magnet.to_string(), quality);
        self.inner.registry.lock().upsert(session);
        self.attach(&id, AttachKind::UserInitiated);
        Ok(id)
    }

    /// Pause a download. The local transition is optimistic: it happens
    /// before the backend confirms, and a backend failure is surfaced to
    /// the caller without rolling the status back.
    pub async fn pause(&self, id: &str) -> Result<(), ControlError> {
        self.optimistic_transition(id, "pause", SessionStatus::Paused, |s| {
            matches!(s, SessionStatus::Downloading | SessionStatus::Paused)
        })?;
        self.inner
            .backend
            .pause(id)
            .await
            .map_err(ControlError::Backend)
    }

    /// Resume a paused download. Same optimistic-call discipline as `pause`.
    pub async fn resume(&self, id: &str) -> Result<(), ControlError> {
        self.optimistic_transition(id, "resume", SessionStatus::Downloading, |s| {
            matches!(s, SessionStatus::Paused)
        })?;
        self.inner
            .backend
            .resume(id)
            .await
            .map_err(ControlError::Backend)
    }

    /// Retry a stopped or errored download using its stored magnet. The
    /// backend forgets downloads across restarts, so the magnet is
    /// re-submitted and the session follows the id the backend returns.
    pub async fn retry(&self, id: &str) -> Result<String, ControlError> {
        let magnet = {
            let reg = self.inner.registry.lock();
            let session = reg
                .get(id)
                .ok_or_else(|| ControlError::UnknownSession(id.to_string()))?;
            if !matches!(
                session.status,
                SessionStatus::Stopped | SessionStatus::Error
            ) {
                return Err(ControlError::InvalidTransition(id.to_string(), "retry"));
            }
            session
                .magnet
                .clone()
                .ok_or_else(|| ControlError::MissingMagnet(id.to_string()))?
        };

        self.inner
            .registry
            .lock()
            .update(id, |s| s.status = SessionStatus::Reconnecting);
        *self
            .inner
            .retry_counts
            .lock()
            .entry(id.to_string())
            .or_insert(0) += 1;

        match self.inner.backend.create_download(&magnet).await {
            Ok(new_id) => {
                if new_id != id {
                    self.inner.registry.lock().rekey(id, new_id.clone());
                    let mut counts = self.inner.retry_counts.lock();
                    if let Some(count) = counts.remove(id) {
                        counts.insert(new_id.clone(), count);
                    }
                }
                info!("retrying session {} as {}", id, new_id);
                self.attach(&new_id, AttachKind::UserInitiated);
                Ok(new_id)
            }
            Err(e) => {
                self.inner
                    .registry
                    .lock()
                    .update(id, |s| s.status = SessionStatus::Stopped);
                Err(ControlError::Backend(e))
            }
        }
    }

    /// Remove a session. Its connection is closed first so no further event
    /// can touch it; the backend stop is best-effort and a failure there
    /// never blocks removal.
    pub async fn remove(&self, id: &str) -> Result<(), ControlError> {
        self.detach(id);
        let removed = self.inner.registry.lock().remove(id);
        if removed.is_none() {
            return Err(ControlError::UnknownSession(id.to_string()));
        }
        self.inner.retry_counts.lock().remove(id);
        info!("removed session {}", id);

        if let Err(e) = self.inner.backend.stop(id).await {
            warn!("backend stop for removed session {} failed: {:#}", id, e);
        }
        Ok(())
    }

    /// Reattach every session the registry loaded as `Reconnecting`,
    /// after a short delay that lets the UI settle. Failures here are
    /// passive: the session simply ends up `Stopped`, with no warning
    /// surfaced.
    pub async fn restore(&self) {
        tokio::time::sleep(RECONNECT_SETTLE_DELAY).await;
        let ids: Vec<String> = self
            .inner
            .registry
            .lock()
            .all()
            .iter()
            .filter(|s| s.status == SessionStatus::Reconnecting)
            .map(|s| s.id.clone())
            .collect();
        for id in ids {
            debug!("passively reattaching session {}", id);
            self.attach(&id, AttachKind::PassiveReconnect);
        }
    }

    // --- internals -------------------------------------------------------

    fn optimistic_transition(
        &self,
        id: &str,
        action: &'static str,
        next: SessionStatus,
        allowed: fn(SessionStatus) -> bool,
    ) -> Result<(), ControlError> {
        let mut reg = self.inner.registry.lock();
        let current = reg
            .get(id)
            .map(|s| s.status)
            .ok_or_else(|| ControlError::UnknownSession(id.to_string()))?;
        if !allowed(current) {
            return Err(ControlError::InvalidTransition(id.to_string(), action));
        }
        reg.update(id, |s| s.status = next);
        Ok(())
    }

    /// Open a connection for the session, closing any existing one first.
    /// At most one live connection per session id, always.
    fn attach(&self, id: &str, kind: AttachKind) {
        let epoch = self.inner.epoch.fetch_add(1, Ordering::Relaxed) + 1;
        let url = format!("{}/ws/{}", self.inner.stream_base, id);
        let mut conns = self.inner.connections.lock();
        if let Some(prev) = conns.remove(id) {
            prev.close();
        }
        let handle =
            connection::attach(url, id.to_string(), epoch, kind, self.inner.events_tx.clone());
        conns.insert(id.to_string(), handle);
    }

    fn detach(&self, id: &str) {
        if let Some(handle) = self.inner.connections.lock().remove(id) {
            handle.close();
        }
    }

    fn handle_event(inner: &Inner, ev: SessionEvent) {
        // Events from a superseded or detached connection are dropped: the
        // handle for the id either no longer exists or carries a newer epoch.
        let kind = {
            let conns = inner.connections.lock();
            match conns.get(&ev.session_id) {
                Some(h) if h.epoch == ev.epoch => h.kind,
                _ => return,
            }
        };

        match ev.event {
            ConnectionEvent::Attached => {
                inner.retry_counts.lock().remove(&ev.session_id);
                inner.registry.lock().update(&ev.session_id, |s| {
                    if !s.status.is_terminal() {
                        s.status = SessionStatus::Downloading;
                    }
                });
                debug!("session {} attached", ev.session_id);
            }
            ConnectionEvent::Progress { progress, paused } => {
                inner.registry.lock().update(&ev.session_id, |s| {
                    if let Some(next) = status_after_progress(s.status, progress, paused) {
                        s.status = next;
                        s.set_progress(progress);
                    }
                });
            }
            ConnectionEvent::Closed { error } => {
                {
                    // A newer attach may already own this id; only drop the
                    // handle belonging to the connection that closed.
                    let mut conns = inner.connections.lock();
                    if conns
                        .get(&ev.session_id)
                        .map(|h| h.epoch == ev.epoch)
                        .unwrap_or(false)
                    {
                        conns.remove(&ev.session_id);
                    }
                }
                inner.registry.lock().update(&ev.session_id, |s| {
                    if let Some(next) = status_after_close(s.status) {
                        s.status = next;
                    }
                });
                match kind {
                    AttachKind::UserInitiated => match error {
                        Some(e) => warn!("connection for session {} failed: {}", ev.session_id, e),
                        None => info!("connection for session {} closed", ev.session_id),
                    },
                    AttachKind::PassiveReconnect => {
                        debug!(
                            "passive reattach for session {} ended ({:?})",
                            ev.session_id, error
                        );
                    }
                }
            }
        }
    }
}

/// Status after one progress message. `None` means no transition: terminal
/// statuses never move on passive events.
fn status_after_progress(
    current: SessionStatus,
    progress: f64,
    paused: bool,
) -> Option<SessionStatus> {
    if current.is_terminal() {
        return None;
    }
    if progress >= 100.0 {
        Some(SessionStatus::Completed)
    } else if paused {
        Some(SessionStatus::Paused)
    } else {
        Some(SessionStatus::Downloading)
    }
}

/// Status after the connection closed or errored. Completed stays Completed.
fn status_after_close(current: SessionStatus) -> Option<SessionStatus> {
    match current {
        SessionStatus::Downloading | SessionStatus::Reconnecting | SessionStatus::Paused => {
            Some(SessionStatus::Stopped)
        }
        SessionStatus::Completed | SessionStatus::Stopped | SessionStatus::Error => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_keeps_downloading() {
        assert_eq!(
            status_after_progress(SessionStatus::Downloading, 45.0, false),
            Some(SessionStatus::Downloading)
        );
        assert_eq!(
            status_after_progress(SessionStatus::Reconnecting, 45.0, false),
            Some(SessionStatus::Downloading)
        );
    }

    #[test]
    fn paused_message_pauses() {
        assert_eq!(
            status_after_progress(SessionStatus::Downloading, 45.0, true),
            Some(SessionStatus::Paused)
        );
    }

    #[test]
    fn full_progress_completes_even_when_paused() {
        assert_eq!(
            status_after_progress(SessionStatus::Downloading, 100.0, true),
            Some(SessionStatus::Completed)
        );
        assert_eq!(
            status_after_progress(SessionStatus::Reconnecting, 100.5, false),
            Some(SessionStatus::Completed)
        );
    }

    #[test]
    fn completed_is_absorbing_for_messages() {
        assert_eq!(
            status_after_progress(SessionStatus::Completed, 10.0, false),
            None
        );
        assert_eq!(
            status_after_progress(SessionStatus::Stopped, 50.0, false),
            None
        );
        assert_eq!(
            status_after_progress(SessionStatus::Error, 50.0, false),
            None
        );
    }

    #[test]
    fn close_stops_active_states() {
        assert_eq!(
            status_after_close(SessionStatus::Downloading),
            Some(SessionStatus::Stopped)
        );
        assert_eq!(
            status_after_close(SessionStatus::Reconnecting),
            Some(SessionStatus::Stopped)
        );
        assert_eq!(
            status_after_close(SessionStatus::Paused),
            Some(SessionStatus::Stopped)
        );
    }

    #[test]
    fn close_is_noop_on_terminal_states() {
        assert_eq!(status_after_close(SessionStatus::Completed), None);
        assert_eq!(status_after_close(SessionStatus::Stopped), None);
        assert_eq!(status_after_close(SessionStatus::Error), None);
    }
}
