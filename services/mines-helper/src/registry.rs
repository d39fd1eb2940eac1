//! In-memory index of the sessions this process has claimed.
//!
//! The lock is never held across an await; callers copy what they need and release it.

use mines_types::{Session, SessionId};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::timeout::TimerHandle;

struct SessionHandle {
    session: Session,
    timer: Option<TimerHandle>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or overwrite. An overwritten entry's timer is cancelled.
    pub fn put(&self, session: Session) {
        let previous = self.lock().insert(
            session.id,
            SessionHandle {
                session,
                timer: None,
            },
        );
        if let Some(timer) = previous.and_then(|handle| handle.timer) {
            timer.cancel();
        }
    }

    pub fn get(&self, session_id: SessionId) -> Option<Session> {
        self.lock()
            .get(&session_id)
            .map(|handle| handle.session.clone())
    }

    pub fn contains(&self, session_id: SessionId) -> bool {
        self.lock().contains_key(&session_id)
    }

    /// Replace the stored session, keeping its timer. Returns false when the entry is gone.
    pub fn replace(&self, session: Session) -> bool {
        match self.lock().get_mut(&session.id) {
            Some(handle) => {
                handle.session = session;
                true
            }
            None => false,
        }
    }

    /// Remove the entry and cancel its timer. Returns the last stored session.
    pub fn remove(&self, session_id: SessionId) -> Option<Session> {
        let handle = self.lock().remove(&session_id)?;
        if let Some(timer) = handle.timer {
            timer.cancel();
        }
        Some(handle.session)
    }

    /// Attach `timer`, cancelling any previous one. A timer for a missing entry is cancelled
    /// immediately and false is returned.
    pub fn set_timer(&self, session_id: SessionId, timer: TimerHandle) -> bool {
        let mut sessions = self.lock();
        match sessions.get_mut(&session_id) {
            Some(handle) => {
                if let Some(previous) = handle.timer.replace(timer) {
                    previous.cancel();
                }
                true
            }
            None => {
                timer.cancel();
                false
            }
        }
    }

    /// Cancel and detach the session's timer, handing it back so its deadline can be reused.
    pub fn cancel_timer(&self, session_id: SessionId) -> Option<TimerHandle> {
        let timer = self
            .lock()
            .get_mut(&session_id)
            .and_then(|handle| handle.timer.take())?;
        timer.cancel();
        Some(timer)
    }

    /// Generation of the session's live timer, if it has one.
    pub fn timer_generation(&self, session_id: SessionId) -> Option<u64> {
        self.lock()
            .get(&session_id)
            .and_then(|handle| handle.timer.as_ref())
            .map(TimerHandle::generation)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
