use anyhow::Result;
use tracing::{info, warn};

use super::model::{Session, SessionStatus};
use super::store::SnapshotStore;

/// In-memory source of truth for all known sessions, in insertion order.
/// Every mutation persists the full snapshot before returning; a mutation
/// the store rejected is still visible in memory but logged loudly.
pub struct SessionRegistry {
    sessions: Vec<Session>,
    store: SnapshotStore,
}

impl SessionRegistry {
    pub fn new(store: SnapshotStore) -> Self {
        Self {
            sessions: Vec::new(),
            store,
        }
    }

    /// Load the persisted snapshot. Sessions persisted as `Downloading` or
    /// `Reconnecting` come back as `Reconnecting`: a session is never
    /// trusted as actively streaming until reattachment succeeds. This is
    /// the only status rewrite outside an explicit action or connection
    /// event.
    pub fn load(&mut self) -> Result<()> {
        let mut sessions = self.store.load()?;
        let mut rewritten = 0;
        for s in &mut sessions {
            if matches!(
                s.status,
                SessionStatus::Downloading | SessionStatus::Reconnecting
            ) {
                s.status = SessionStatus::Reconnecting;
                rewritten += 1;
            }
        }
        if rewritten > 0 {
            info!("{} session(s) marked for reconnection", rewritten);
        }
        self.sessions = sessions;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn all(&self) -> &[Session] {
        &self.sessions
    }

    /// Insert or replace the session with the same id, then persist.
    pub fn upsert(&mut self, session: Session) {
        match self.sessions.iter_mut().find(|s| s.id == session.id) {
            Some(slot) => *slot = session,
            None => self.sessions.push(session),
        }
        self.persist();
    }

    /// Apply a mutation to one session in place, then persist. Returns
    /// false if the id is unknown.
    pub fn update<F: FnOnce(&mut Session)>(&mut self, id: &str, f: F) -> bool {
        let Some(session) = self.sessions.iter_mut().find(|s| s.id == id) else {
            return false;
        };
        f(session);
        self.persist();
        true
    }

    /// Re-key a session (the backend assigned a new id on retry), then
    /// persist. Position in the list is kept.
    pub fn rekey(&mut self, old_id: &str, new_id: String) -> bool {
        let Some(session) = self.sessions.iter_mut().find(|s| s.id == old_id) else {
            return false;
        };
        session.id = new_id;
        self.persist();
        true
    }

    /// Remove a session, then persist. Returns the removed entry.
    pub fn remove(&mut self, id: &str) -> Option<Session> {
        let idx = self.sessions.iter().position(|s| s.id == id)?;
        let removed = self.sessions.remove(idx);
        self.persist();
        Some(removed)
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.sessions) {
            warn!("failed to persist session snapshot: {:#}", e);
        }
    }
}
