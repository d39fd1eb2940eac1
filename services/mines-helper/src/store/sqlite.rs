use async_trait::async_trait;
use mines_types::{
    ChatContext, ExternalGameId, GameState, PlayerId, Session, SessionId, SessionStatus,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::{
    decode_state, finalize_conflict, now_ms, parse_status, to_i64, to_u64, NewSession,
    SessionStore, StoreError, SESSION_COLUMNS,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Backend(format!("sqlite: {err}"))
    }
}

/// SQLite-backed store. Several processes may share one database file; the claim relies on
/// SQLite serialising writers.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        init_schema_sqlite(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            op(&mut guard)
        })
        .await
        .map_err(|err| StoreError::Backend(format!("sqlite task failed: {err}")))?
    }
}

fn init_schema_sqlite(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS mines_sessions (
            session_id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_game_id TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            owner_name TEXT,
            chat_context TEXT NOT NULL,
            wager_amount INTEGER NOT NULL,
            game_state TEXT,
            claimed_by TEXT,
            updated_at_ms INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS mines_sessions_status ON mines_sessions(status);",
    )?;
    Ok(())
}

type SessionRow = (
    i64,
    String,
    String,
    String,
    Option<String>,
    String,
    i64,
    Option<String>,
    Option<String>,
);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn into_session(row: SessionRow) -> Result<Session, StoreError> {
    let (id, external, status, owner, owner_name, chat, wager, state, claimed_by) = row;
    Ok(Session {
        id: SessionId(id),
        external_game_id: ExternalGameId(external),
        status: parse_status(&status)?,
        owner_id: PlayerId(owner),
        owner_name,
        chat: ChatContext(chat),
        wager: to_u64(wager, "wager_amount")?,
        state: decode_state(state.as_deref())?,
        claimed_by,
    })
}

fn current_status(conn: &Connection, session_id: SessionId) -> Result<Option<SessionStatus>, StoreError> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM mines_sessions WHERE session_id = ?1",
            params![session_id.0],
            |row| row.get(0),
        )
        .optional()?;
    status.as_deref().map(parse_status).transpose()
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn insert_pending(&self, session: NewSession) -> Result<SessionId, StoreError> {
        let wager = to_i64(session.wager, "wager_amount")?;
        self.with_conn(move |conn| {
            let result = conn.execute(
                "INSERT INTO mines_sessions
                    (external_game_id, status, owner_id, owner_name, chat_context, wager_amount, updated_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    session.external_game_id.0,
                    SessionStatus::PendingPickup.as_str(),
                    session.owner_id.0,
                    session.owner_name,
                    session.chat.0,
                    wager,
                    now_ms(),
                ],
            );
            match result {
                Ok(_) => Ok(SessionId(conn.last_insert_rowid())),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::Duplicate(session.external_game_id))
                }
                Err(err) => Err(err.into()),
            }
        })
        .await
    }

    async fn claim_pending(
        &self,
        external_game_id: &ExternalGameId,
        worker_id: &str,
    ) -> Result<Option<Session>, StoreError> {
        let external = external_game_id.0.clone();
        let worker = worker_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "UPDATE mines_sessions
                 SET status = ?1, claimed_by = ?2, updated_at_ms = ?3
                 WHERE external_game_id = ?4 AND status = ?5
                 RETURNING {SESSION_COLUMNS}"
            );
            let row = conn
                .query_row(
                    &sql,
                    params![
                        SessionStatus::AwaitingDifficulty.as_str(),
                        worker,
                        now_ms(),
                        external,
                        SessionStatus::PendingPickup.as_str(),
                    ],
                    read_row,
                )
                .optional()?;
            row.map(into_session).transpose()
        })
        .await
    }

    async fn write_state(
        &self,
        session_id: SessionId,
        state: &GameState,
    ) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(state)?;
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE mines_sessions SET game_state = ?1, updated_at_ms = ?2
                 WHERE session_id = ?3 AND status NOT LIKE 'completed%'",
                params![encoded, now_ms(), session_id.0],
            )?;
            if changed == 1 {
                return Ok(());
            }
            match current_status(conn, session_id)? {
                None => Err(StoreError::NotFound(session_id)),
                Some(status) => Err(StoreError::Immutable { session_id, status }),
            }
        })
        .await
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
        let encoded = serde_json::to_string(state)?;
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE mines_sessions SET status = ?1, game_state = ?2, updated_at_ms = ?3
                 WHERE session_id = ?4 AND status NOT LIKE 'completed%'",
                params![status.as_str(), encoded, now_ms(), session_id.0],
            )?;
            if changed == 1 {
                return Ok(());
            }
            finalize_conflict(session_id, current_status(conn, session_id)?, status)
        })
        .await
    }

    async fn load(&self, session_id: SessionId) -> Result<Option<Session>, StoreError> {
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {SESSION_COLUMNS} FROM mines_sessions WHERE session_id = ?1"),
                    params![session_id.0],
                    read_row,
                )
                .optional()?;
            row.map(into_session).transpose()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    #[tokio::test]
    async fn test_sqlite_store_contract() {
        contract::claim_is_exclusive(&SqliteStore::open_in_memory().unwrap()).await;
        contract::duplicate_insert_rejected(&SqliteStore::open_in_memory().unwrap()).await;
        contract::write_state_round_trips(&SqliteStore::open_in_memory().unwrap()).await;
        contract::finalize_is_monotonic(&SqliteStore::open_in_memory().unwrap()).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_claims_across_connections_pick_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");
        let seed = SqliteStore::open(&path).unwrap();
        seed.insert_pending(contract::new_session("shared"))
            .await
            .unwrap();

        // One connection per simulated worker process.
        let attempts: Vec<_> = (0..8)
            .map(|idx| {
                let store = SqliteStore::open(&path).unwrap();
                tokio::spawn(async move {
                    store
                        .claim_pending(&ExternalGameId::new("shared"), &format!("worker-{idx}"))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut winners = Vec::new();
        for attempt in attempts {
            if let Some(session) = attempt.await.unwrap() {
                winners.push(session);
            }
        }
        assert_eq!(winners.len(), 1);
        let stored = seed.load(winners[0].id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::AwaitingDifficulty);
        assert_eq!(stored.claimed_by, winners[0].claimed_by);
    }

    #[tokio::test]
    async fn test_corrupt_state_is_reported() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .insert_pending(contract::new_session("bad"))
            .await
            .unwrap();
        store
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE mines_sessions SET game_state = '{not json' WHERE session_id = ?1",
                    params![id.0],
                )?;
                Ok(())
            })
            .await
            .unwrap();
        assert!(matches!(store.load(id).await, Err(StoreError::Codec(_))));
    }
}
