use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use super::model::Session;

/// Durable snapshot of all sessions: one JSON blob, replaced wholesale on
/// every mutation. Writes go to a sibling temp file first and are renamed
/// into place, so a crash mid-write leaves the previous snapshot intact.
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Read the last snapshot. A missing file yields an empty list.
    pub fn load(&self) -> Result<Vec<Session>> {
        let data = match fs::read(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("reading session snapshot"),
        };
        let sessions: Vec<Session> =
            serde_json::from_slice(&data).context("parsing session snapshot")?;
        debug!("loaded {} persisted session(s)", sessions.len());
        Ok(sessions)
    }

    /// Replace the snapshot with the given sessions.
    pub fn save(&self, sessions: &[Session]) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).context("creating snapshot directory")?;
        }
        let data = serde_json::to_vec_pretty(sessions).context("serializing sessions")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &data).context("writing snapshot temp file")?;
        fs::rename(&tmp, &self.path).context("replacing snapshot")?;
        debug!("persisted {} session(s)", sessions.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::{Session, SessionStatus};

    fn sample() -> Vec<Session> {
        vec![
            Session {
                id: "a".into(),
                title: "Heat (1080p)".into(),
                progress: 42.5,
                status: SessionStatus::Downloading,
                magnet: Some("magnet:?xt=a".into()),
                quality: Some("1080p".into()),
            },
            Session {
                id: "b".into(),
                title: "Ran".into(),
                progress: 100.0,
                status: SessionStatus::Completed,
                magnet: None,
                quality: None,
            },
        ]
    }

    #[test]
    fn missing_file_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path().join("sessions.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path().join("sessions.json"));
        let sessions = sample();
        store.save(&sessions).unwrap();
        assert_eq!(store.load().unwrap(), sessions);
    }

    #[test]
    fn save_replaces_whole_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path().join("sessions.json"));
        store.save(&sample()).unwrap();
        store.save(&sample()[..1]).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "a");
        // No stray temp file left behind.
        assert!(!tmp.path().join("sessions.json.tmp").exists());
    }

    #[test]
    fn creates_missing_parent_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path().join("nested/dir/sessions.json"));
        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap().len(), 2);
    }
}
