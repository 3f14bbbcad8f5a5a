use serde::{Deserialize, Serialize};

/// Life-cycle status of a download session.
///
/// `Completed` and `Stopped` absorb passive connection events; only an
/// explicit user action (retry, removal) moves a session out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Downloading,
    Paused,
    Completed,
    Stopped,
    Error,
    /// Was active before a restart or disconnect; reattachment in progress.
    Reconnecting,
}

impl SessionStatus {
    /// Whether passive connection events may still change this session.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Stopped | SessionStatus::Error
        )
    }
}

/// One user-tracked download. The id is assigned by the backend at creation.
/// Only these fields are durable; the live connection handle is not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    /// Backend-reported percentage in [0, 100]; never computed locally.
    pub progress: f64,
    pub status: SessionStatus,
    /// Needed to retry after the backend lost the download.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
}

impl Session {
    /// A freshly started download, with the quality tag folded into the
    /// display title ("Movie (1080p)").
    pub fn new_download(
        id: String,
        title: &str,
        magnet: String,
        quality: Option<String>,
    ) -> Self {
        let title = match &quality {
            Some(q) => format!("{} ({})", title, q),
            None => title.to_string(),
        };
        Self {
            id,
            title,
            progress: 0.0,
            status: SessionStatus::Downloading,
            magnet: Some(magnet),
            quality,
        }
    }

    /// Store a backend-reported progress value, clamped to [0, 100].
    pub fn set_progress(&mut self, reported: f64) {
        self.progress = reported.clamp(0.0, 100.0);
    }
}
