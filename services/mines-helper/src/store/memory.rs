use async_trait::async_trait;
use mines_types::{ExternalGameId, GameState, Session, SessionId, SessionStatus};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{finalize_conflict, NewSession, SessionStore, StoreError};

#[derive(Default)]
struct Inner {
    next_id: i64,
    sessions: BTreeMap<SessionId, Session>,
}

/// Process-local store for tests and single-process development runs.
///
/// Every operation runs under one lock, which gives the claim the same compare-and-swap
/// semantics as the SQL backends.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored sessions, any status.
    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_pending(&self, session: NewSession) -> Result<SessionId, StoreError> {
        let mut inner = self.lock();
        if inner
            .sessions
            .values()
            .any(|existing| existing.external_game_id == session.external_game_id)
        {
            return Err(StoreError::Duplicate(session.external_game_id));
        }
        inner.next_id += 1;
        let id = SessionId(inner.next_id);
        inner.sessions.insert(
            id,
            Session {
                id,
                external_game_id: session.external_game_id,
                status: SessionStatus::PendingPickup,
                owner_id: session.owner_id,
                owner_name: session.owner_name,
                chat: session.chat,
                wager: session.wager,
                state: GameState::default(),
                claimed_by: None,
            },
        );
        Ok(id)
    }

    async fn claim_pending(
        &self,
        external_game_id: &ExternalGameId,
        worker_id: &str,
    ) -> Result<Option<Session>, StoreError> {
        let mut inner = self.lock();
        let Some(session) = inner.sessions.values_mut().find(|session| {
            &session.external_game_id == external_game_id
                && session.status == SessionStatus::PendingPickup
        }) else {
            return Ok(None);
        };
        session.status = SessionStatus::AwaitingDifficulty;
        session.claimed_by = Some(worker_id.to_string());
        Ok(Some(session.clone()))
    }

    async fn write_state(
        &self,
        session_id: SessionId,
        state: &GameState,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(StoreError::NotFound(session_id))?;
        if session.status.is_terminal() {
            return Err(StoreError::Immutable {
                session_id,
                status: session.status,
            });
        }
        session.state = state.clone();
        Ok(())
    }

    async fn finalize(
        &self,
        session_id: SessionId,
        status: SessionStatus,
        state: &GameState,
    ) -> Result<(), StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::NotTerminal(status));
        }
        let mut inner = self.lock();
        match inner.sessions.get_mut(&session_id) {
            Some(session) if !session.status.is_terminal() => {
                session.status = status;
                session.state = state.clone();
                Ok(())
            }
            existing => finalize_conflict(session_id, existing.map(|s| s.status), status),
        }
    }

    async fn load(&self, session_id: SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.lock().sessions.get(&session_id).cloned())
    }
}
