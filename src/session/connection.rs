// Streaming connection — one websocket per session, translated into an
// ordered event stream consumed by the session manager.

use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why a connection was opened. Passive reattach failures stay quiet;
/// user-initiated ones are surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachKind {
    UserInitiated,
    PassiveReconnect,
}

/// Transport state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Connecting,
    Open,
    Closed,
}

/// Connection lifecycle, flattened into a single ordered event type.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The socket opened.
    Attached,
    /// One backend progress report.
    Progress { progress: f64, paused: bool },
    /// The socket closed or failed; `error` is set for the failure case.
    Closed { error: Option<String> },
}

/// Envelope delivered to the manager's event loop. Events from a superseded
/// connection carry a stale epoch and are dropped there.
#[derive(Debug)]
pub struct SessionEvent {
    pub session_id: String,
    pub epoch: u64,
    pub event: ConnectionEvent,
}

/// Handle to a live (or finished) connection task. Dropping the handle does
/// not close the socket; call `close()`.
pub struct ConnectionHandle {
    pub session_id: String,
    pub epoch: u64,
    pub kind: AttachKind,
    token: CancellationToken,
    socket_state: Arc<Mutex<SocketState>>,
}

impl ConnectionHandle {
    pub fn socket_state(&self) -> SocketState {
        *self.socket_state.lock()
    }

    pub fn is_live(&self) -> bool {
        self.socket_state() != SocketState::Closed
    }

    /// Cancel the reader task. No further events for this epoch will be
    /// observed after the cancellation is polled.
    pub fn close(&self) {
        self.token.cancel();
        *self.socket_state.lock() = SocketState::Closed;
    }
}

#[derive(Debug, Deserialize)]
struct ProgressMessage {
    progress: f64,
    #[serde(default)]
    paused: bool,
}

/// Parse one inbound frame. Malformed payloads yield `None` and must cause
/// no state transition.
fn parse_progress(text: &str) -> Option<ProgressMessage> {
    serde_json::from_str(text).ok()
}

/// Open a websocket to `url` and pump its frames into `events` as
/// `SessionEvent`s tagged with `epoch`.
pub fn attach(
    url: String,
    session_id: String,
    epoch: u64,
    kind: AttachKind,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> ConnectionHandle {
    let token = CancellationToken::new();
    let socket_state = Arc::new(Mutex::new(SocketState::Connecting));

    let task_token = token.clone();
    let task_state = socket_state.clone();
    let task_id = session_id.clone();
    tokio::spawn(async move {
        let send = |event: ConnectionEvent| {
            let _ = events.send(SessionEvent {
                session_id: task_id.clone(),
                epoch,
                event,
            });
        };

        let connect = tokio::select! {
            _ = task_token.cancelled() => {
                *task_state.lock() = SocketState::Closed;
                return;
            }
            c = connect_async(url.as_str()) => c,
        };

        let mut ws = match connect {
            Ok((ws, _)) => ws,
            Err(e) => {
                debug!("connect failed for session {}: {}", task_id, e);
                *task_state.lock() = SocketState::Closed;
                send(ConnectionEvent::Closed {
                    error: Some(e.to_string()),
                });
                return;
            }
        };

        *task_state.lock() = SocketState::Open;
        send(ConnectionEvent::Attached);

        loop {
            let frame = tokio::select! {
                _ = task_token.cancelled() => {
                    // Detached on purpose: close quietly, dispatch nothing.
                    *task_state.lock() = SocketState::Closed;
                    let _ = ws.close(None).await;
                    return;
                }
                f = ws.next() => f,
            };

            match frame {
                Some(Ok(Message::Text(text))) => match parse_progress(&text) {
                    Some(msg) => send(ConnectionEvent::Progress {
                        progress: msg.progress,
                        paused: msg.paused,
                    }),
                    None => debug!("dropping malformed progress frame for {}", task_id),
                },
                Some(Ok(Message::Close(_))) | None => {
                    *task_state.lock() = SocketState::Closed;
                    send(ConnectionEvent::Closed { error: None });
                    return;
                }
                Some(Ok(_)) => {
                    // Ping/pong and binary frames carry nothing for us.
                }
                Some(Err(e)) => {
                    *task_state.lock() = SocketState::Closed;
                    send(ConnectionEvent::Closed {
                        error: Some(e.to_string()),
                    });
                    return;
                }
            }
        }
    });

    ConnectionHandle {
        session_id,
        epoch,
        kind,
        token,
        socket_state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_progress_and_paused() {
        let msg = parse_progress(r#"{"progress": 45.5, "paused": true}"#).unwrap();
        assert_eq!(msg.progress, 45.5);
        assert!(msg.paused);
    }

    #[test]
    fn paused_defaults_to_false() {
        let msg = parse_progress(r#"{"progress": 12}"#).unwrap();
        assert_eq!(msg.progress, 12.0);
        assert!(!msg.paused);
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert!(parse_progress("not json").is_none());
        assert!(parse_progress(r#"{"paused": true}"#).is_none());
        assert!(parse_progress(r#"{"progress": "half"}"#).is_none());
        assert!(parse_progress("").is_none());
    }
}
