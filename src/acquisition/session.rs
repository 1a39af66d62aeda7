//! The process-wide live session
//!
//! Exactly one [`Session`] is live at a time. Every install issues a fresh
//! [`SessionId`] so work started under one session can tell, when it
//! completes, whether the session it belonged to is still the live one.

use crate::types::{Session, SessionId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

#[derive(Debug, Default)]
pub struct SessionSlot {
    current: RwLock<Option<(SessionId, Session)>>,
    next_id: AtomicU64,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `session` the live one, replacing any previous session
    pub fn install(&self, session: Session) -> SessionId {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        *self.write() = Some((id, session));
        id
    }

    /// Remove the live session
    pub fn clear(&self) -> Option<Session> {
        self.write().take().map(|(_, session)| session)
    }

    pub fn current(&self) -> Option<(SessionId, Session)> {
        self.read().clone()
    }

    pub fn session(&self) -> Option<Session> {
        self.read().as_ref().map(|(_, s)| s.clone())
    }

    pub fn id(&self) -> Option<SessionId> {
        self.read().as_ref().map(|(id, _)| *id)
    }

    pub fn is_connected(&self) -> bool {
        self.read().as_ref().is_some_and(|(_, s)| s.connected)
    }

    /// Whether `id` still names the live session
    pub fn is_current(&self, id: SessionId) -> bool {
        self.id() == Some(id)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<(SessionId, Session)>> {
        self.current.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<(SessionId, Session)>> {
        self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
