//! Session registry: the one structure shared across sessions.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::session::{SessionHandle, SessionId};

/// Tracks live sessions. A session registers once on creation and asks for its
/// own removal once on destroy; it never owns the registry.
pub trait SessionRegistry: Send + Sync {
    fn register(&self, id: SessionId, handle: SessionHandle);
    fn unregister(&self, id: SessionId);
}

/// Mutex-guarded id -> handle map.
#[derive(Default)]
pub struct SessionTable {
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, SessionHandle>> {
        // Each critical section is one map operation; a poisoned map is still consistent.
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn get(&self, id: SessionId) -> Option<SessionHandle> {
        self.lock().get(&id).cloned()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    /// End every client connection with `reason`. Sessions tear themselves down
    /// when the resulting end events arrive. Returns how many were kicked.
    pub fn kick_all(&self, reason: &str) -> usize {
        let handles: Vec<SessionHandle> = self.lock().values().cloned().collect();
        for handle in &handles {
            handle.kick(reason);
        }
        handles.len()
    }
}

impl SessionRegistry for SessionTable {
    fn register(&self, id: SessionId, handle: SessionHandle) {
        self.lock().insert(id, handle);
    }

    fn unregister(&self, id: SessionId) {
        self.lock().remove(&id);
    }
}
