//! Durable session persistence.
//!
//! The store is the single source of truth shared by every helper process. Three operations
//! matter to the coordinator:
//! - [`SessionStore::claim_pending`]: one atomic conditional update moving a session from
//!   `pending_pickup` to `awaiting_difficulty`. This is the only cross-process mutual exclusion.
//! - [`SessionStore::write_state`]: opportunistic persistence of in-progress state.
//! - [`SessionStore::finalize`]: terminal status write. Repeating the same terminal status is a
//!   no-op; a different terminal status is refused with [`StoreError::TerminalConflict`].

mod memory;
mod pg;
mod sqlite;

pub use self::memory::MemoryStore;
pub use self::pg::PostgresStore;
pub use self::sqlite::SqliteStore;

use async_trait::async_trait;
use mines_types::{
    ChatContext, ExternalGameId, GameState, PlayerId, Session, SessionId, SessionStatus,
};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session {0} not found")]
    NotFound(SessionId),
    #[error("session {session_id} already finalized as {existing}, refusing {attempted}")]
    TerminalConflict {
        session_id: SessionId,
        existing: SessionStatus,
        attempted: SessionStatus,
    },
    #[error("{0} is not a terminal status")]
    NotTerminal(SessionStatus),
    #[error("session {session_id} is {status} and can no longer be written")]
    Immutable {
        session_id: SessionId,
        status: SessionStatus,
    },
    #[error("external game id {0} already has a session")]
    Duplicate(ExternalGameId),
    #[error("invalid stored value: {0}")]
    Corrupt(String),
    #[error("game state codec: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("store backend: {0}")]
    Backend(String),
}

/// A wager handed over by the upstream service, not yet claimed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewSession {
    pub external_game_id: ExternalGameId,
    pub owner_id: PlayerId,
    pub owner_name: Option<String>,
    pub chat: ChatContext,
    pub wager: u64,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a `pending_pickup` session. Production sessions are inserted by the upstream
    /// service; this exists for local runs and tests.
    async fn insert_pending(&self, session: NewSession) -> Result<SessionId, StoreError>;

    /// Atomically claim the pending session for `external_game_id`.
    ///
    /// `Ok(None)` means another worker already claimed it or the id is unknown.
    async fn claim_pending(
        &self,
        external_game_id: &ExternalGameId,
        worker_id: &str,
    ) -> Result<Option<Session>, StoreError>;

    /// Persist in-progress state. Refused once the session is terminal.
    async fn write_state(&self, session_id: SessionId, state: &GameState)
        -> Result<(), StoreError>;

    /// Record the terminal status and final state.
    async fn finalize(
        &self,
        session_id: SessionId,
        status: SessionStatus,
        state: &GameState,
    ) -> Result<(), StoreError>;

    async fn load(&self, session_id: SessionId) -> Result<Option<Session>, StoreError>;
}

/// Decide what a finalize that matched no open row means, given the stored status.
pub(crate) fn finalize_conflict(
    session_id: SessionId,
    existing: Option<SessionStatus>,
    attempted: SessionStatus,
) -> Result<(), StoreError> {
    match existing {
        None => Err(StoreError::NotFound(session_id)),
        Some(existing) if existing == attempted => Ok(()),
        Some(existing) => Err(StoreError::TerminalConflict {
            session_id,
            existing,
            attempted,
        }),
    }
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

pub(crate) fn to_i64(value: u64, label: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Corrupt(format!("{label} does not fit in i64")))
}

pub(crate) fn to_u64(value: i64, label: &str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("{label} is negative")))
}

pub(crate) fn parse_status(value: &str) -> Result<SessionStatus, StoreError> {
    value
        .parse()
        .map_err(|err: mines_types::UnknownStatus| StoreError::Corrupt(err.to_string()))
}

pub(crate) fn decode_state(raw: Option<&str>) -> Result<GameState, StoreError> {
    match raw {
        None => Ok(GameState::default()),
        Some(raw) if raw.trim().is_empty() => Ok(GameState::default()),
        Some(raw) => Ok(serde_json::from_str(raw)?),
    }
}

/// Columns shared by the SQL backends, in `RETURNING`/`SELECT` order.
pub(crate) const SESSION_COLUMNS: &str = "session_id, external_game_id, status, owner_id, \
     owner_name, chat_context, wager_amount, game_state, claimed_by";

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every [`SessionStore`] must share; run against each backend.

    use super::*;
    use mines_types::{Board, DifficultyKey, Grid, MessageRef};

    pub fn new_session(external: &str) -> NewSession {
        NewSession {
            external_game_id: ExternalGameId::new(external),
            owner_id: PlayerId::new("1001"),
            owner_name: Some("alice".to_string()),
            chat: ChatContext::new("chat-9"),
            wager: 1_000_000_000,
        }
    }

    fn sample_state() -> GameState {
        GameState {
            board: Some(Board {
                difficulty: DifficultyKey::Easy,
                grid: Grid::new(5, 5),
                mine_locations: Vec::new(),
                gems_found: 0,
            }),
            message_ref: Some(MessageRef::new("m-1")),
            error: None,
        }
    }

    pub async fn claim_is_exclusive(store: &dyn SessionStore) {
        let id = store.insert_pending(new_session("g-1")).await.unwrap();
        let external = ExternalGameId::new("g-1");

        let claimed = store
            .claim_pending(&external, "worker-a")
            .await
            .unwrap()
            .expect("first claim wins");
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.status, SessionStatus::AwaitingDifficulty);
        assert_eq!(claimed.claimed_by.as_deref(), Some("worker-a"));
        assert_eq!(claimed.wager, 1_000_000_000);
        assert_eq!(claimed.owner_name.as_deref(), Some("alice"));

        assert!(store
            .claim_pending(&external, "worker-b")
            .await
            .unwrap()
            .is_none());
        assert!(store
            .claim_pending(&ExternalGameId::new("missing"), "worker-b")
            .await
            .unwrap()
            .is_none());

        let stored = store.load(id).await.unwrap().unwrap();
        assert_eq!(stored.claimed_by.as_deref(), Some("worker-a"));
    }

    pub async fn duplicate_insert_rejected(store: &dyn SessionStore) {
        store.insert_pending(new_session("dup")).await.unwrap();
        assert!(matches!(
            store.insert_pending(new_session("dup")).await,
            Err(StoreError::Duplicate(_))
        ));
    }

    pub async fn write_state_round_trips(store: &dyn SessionStore) {
        let id = store.insert_pending(new_session("g-2")).await.unwrap();
        store
            .claim_pending(&ExternalGameId::new("g-2"), "w")
            .await
            .unwrap()
            .unwrap();
        let state = sample_state();
        store.write_state(id, &state).await.unwrap();
        let stored = store.load(id).await.unwrap().unwrap();
        assert_eq!(stored.state, state);
        assert_eq!(stored.status, SessionStatus::AwaitingDifficulty);

        assert!(matches!(
            store.write_state(SessionId(9_999), &state).await,
            Err(StoreError::NotFound(_))
        ));
    }

    pub async fn finalize_is_monotonic(store: &dyn SessionStore) {
        let id = store.insert_pending(new_session("g-3")).await.unwrap();
        store
            .claim_pending(&ExternalGameId::new("g-3"), "w")
            .await
            .unwrap()
            .unwrap();
        let state = sample_state();

        assert!(matches!(
            store.finalize(id, SessionStatus::InProgress, &state).await,
            Err(StoreError::NotTerminal(SessionStatus::InProgress))
        ));

        store
            .finalize(id, SessionStatus::CompletedCashedOut, &state)
            .await
            .unwrap();
        // Same status again is harmless.
        store
            .finalize(id, SessionStatus::CompletedCashedOut, &GameState::default())
            .await
            .unwrap();
        let err = store
            .finalize(id, SessionStatus::CompletedTimeout, &GameState::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::TerminalConflict {
                existing: SessionStatus::CompletedCashedOut,
                attempted: SessionStatus::CompletedTimeout,
                ..
            }
        ));

        let stored = store.load(id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::CompletedCashedOut);
        assert_eq!(stored.state, state);

        assert!(matches!(
            store.write_state(id, &GameState::default()).await,
            Err(StoreError::Immutable { .. })
        ));
        assert!(matches!(
            store
                .finalize(SessionId(9_999), SessionStatus::CompletedTimeout, &state)
                .await,
            Err(StoreError::NotFound(_))
        ));
    }
}
