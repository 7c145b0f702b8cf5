//! Shared registry of per-remote sessions.
//!
//! One async mutex guards the whole map; remote cardinality is small and
//! every closure run under it is short and synchronous. Callers must not
//! perform transport I/O from inside a closure.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::models::session::Session;

/// Map of remote id to [`Session`], safe to share between tasks.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one session.
    pub async fn get(&self, remote_id: &str) -> Option<Session> {
        self.sessions.lock().await.get(remote_id).cloned()
    }

    /// Whether a session exists for `remote_id`.
    pub async fn contains(&self, remote_id: &str) -> bool {
        self.sessions.lock().await.contains_key(remote_id)
    }

    /// Insert the session built by `init` unless one already exists.
    ///
    /// Returns `true` when a new session was inserted.
    pub async fn upsert(&self, remote_id: &str, init: impl FnOnce() -> Session) -> bool {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(remote_id) {
            return false;
        }
        sessions.insert(remote_id.to_owned(), init());
        true
    }

    /// Run `f` with exclusive access to one session.
    ///
    /// Returns `None` if the session does not exist.
    pub async fn update<R>(&self, remote_id: &str, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.sessions.lock().await.get_mut(remote_id).map(f)
    }

    /// Remove and return a session.
    pub async fn remove(&self, remote_id: &str) -> Option<Session> {
        self.sessions.lock().await.remove(remote_id)
    }

    /// Visit every session with exclusive access.
    pub async fn for_each(&self, mut visitor: impl FnMut(&str, &mut Session)) {
        let mut sessions = self.sessions.lock().await;
        for (remote_id, session) in sessions.iter_mut() {
            visitor(remote_id, session);
        }
    }

    /// Visit every session and remove those for which `pred` returns `true`,
    /// atomically with respect to other table operations.
    ///
    /// Returns the removed remote ids, sorted.
    pub async fn remove_where(&self, mut pred: impl FnMut(&mut Session) -> bool) -> Vec<String> {
        let mut sessions = self.sessions.lock().await;
        let mut removed = Vec::new();
        sessions.retain(|remote_id, session| {
            if pred(session) {
                removed.push(remote_id.clone());
                false
            } else {
                true
            }
        });
        removed.sort();
        removed
    }

    /// Ids of all sessions, sorted.
    pub async fn remote_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Whether the table holds no sessions.
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}
