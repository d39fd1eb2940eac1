use async_trait::async_trait;
use mines_types::{
    ChatContext, ExternalGameId, GameState, PlayerId, Session, SessionId, SessionStatus,
};
use postgres::error::SqlState;
use postgres::{Client, NoTls, Row};
use std::sync::{Arc, Mutex, PoisonError};
use url::Url;

use super::{
    decode_state, finalize_conflict, now_ms, parse_status, to_i64, to_u64, NewSession,
    SessionStore, StoreError, SESSION_COLUMNS,
};

impl From<postgres::Error> for StoreError {
    fn from(err: postgres::Error) -> Self {
        StoreError::Backend(format!("postgres: {err}"))
    }
}

/// Owns the blocking client. Closing it blocks on the client's private runtime, so the final
/// drop is moved off whatever thread releases the store.
struct PgConn(Option<Client>);

impl Drop for PgConn {
    fn drop(&mut self) {
        if let Some(client) = self.0.take() {
            std::thread::spawn(move || drop(client));
        }
    }
}

/// Postgres-backed store shared by every helper process in a deployment.
#[derive(Clone)]
pub struct PostgresStore {
    conn: Arc<Mutex<PgConn>>,
}

impl PostgresStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        validate_postgres_url(url)?;
        let url = url.to_string();
        let client = tokio::task::spawn_blocking(move || -> Result<Client, StoreError> {
            let mut client = Client::connect(&url, NoTls)?;
            init_schema_postgres(&mut client)?;
            Ok(client)
        })
        .await
        .map_err(|err| StoreError::Backend(format!("postgres connect task failed: {err}")))??;
        Ok(Self {
            conn: Arc::new(Mutex::new(PgConn(Some(client)))),
        })
    }

    async fn with_client<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Client) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            let client = guard
                .0
                .as_mut()
                .ok_or_else(|| StoreError::Backend("postgres client closed".to_string()))?;
            op(client)
        })
        .await
        .map_err(|err| StoreError::Backend(format!("postgres task failed: {err}")))?
    }
}

pub(crate) fn validate_postgres_url(url: &str) -> Result<(), StoreError> {
    let parsed =
        Url::parse(url).map_err(|err| StoreError::Backend(format!("parse postgres url: {err}")))?;
    let scheme = parsed.scheme();
    if scheme != "postgres" && scheme != "postgresql" {
        return Err(StoreError::Backend(
            "postgres url must start with postgres:// or postgresql://".to_string(),
        ));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(StoreError::Backend("postgres url missing host".to_string()));
    }
    Ok(())
}

fn init_schema_postgres(client: &mut Client) -> Result<(), StoreError> {
    client.batch_execute(
        "CREATE TABLE IF NOT EXISTS mines_sessions (
            session_id BIGSERIAL PRIMARY KEY,
            external_game_id TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            owner_name TEXT,
            chat_context TEXT NOT NULL,
            wager_amount BIGINT NOT NULL,
            game_state TEXT,
            claimed_by TEXT,
            updated_at_ms BIGINT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS mines_sessions_status ON mines_sessions(status);",
    )?;
    Ok(())
}

fn row_to_session(row: &Row) -> Result<Session, StoreError> {
    let status: String = row.try_get(2)?;
    let wager: i64 = row.try_get(6)?;
    let state: Option<String> = row.try_get(7)?;
    Ok(Session {
        id: SessionId(row.try_get(0)?),
        external_game_id: ExternalGameId(row.try_get(1)?),
        status: parse_status(&status)?,
        owner_id: PlayerId(row.try_get(3)?),
        owner_name: row.try_get(4)?,
        chat: ChatContext(row.try_get(5)?),
        wager: to_u64(wager, "wager_amount")?,
        state: decode_state(state.as_deref())?,
        claimed_by: row.try_get(8)?,
    })
}

fn current_status(
    client: &mut Client,
    session_id: SessionId,
) -> Result<Option<SessionStatus>, StoreError> {
    let row = client.query_opt(
        "SELECT status FROM mines_sessions WHERE session_id = $1",
        &[&session_id.0],
    )?;
    match row {
        None => Ok(None),
        Some(row) => {
            let status: String = row.try_get(0)?;
            parse_status(&status).map(Some)
        }
    }
}

#[async_trait]
impl SessionStore for PostgresStore {
    async fn insert_pending(&self, session: NewSession) -> Result<SessionId, StoreError> {
        let wager = to_i64(session.wager, "wager_amount")?;
        self.with_client(move |client| {
            let result = client.query_one(
                "INSERT INTO mines_sessions
                    (external_game_id, status, owner_id, owner_name, chat_context, wager_amount, updated_at_ms)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 RETURNING session_id",
                &[
                    &session.external_game_id.0,
                    &SessionStatus::PendingPickup.as_str(),
                    &session.owner_id.0,
                    &session.owner_name,
                    &session.chat.0,
                    &wager,
                    &now_ms(),
                ],
            );
            match result {
                Ok(row) => Ok(SessionId(row.try_get(0)?)),
                Err(err) if err.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
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
        self.with_client(move |client| {
            let sql = format!(
                "UPDATE mines_sessions
                 SET status = $1, claimed_by = $2, updated_at_ms = $3
                 WHERE external_game_id = $4 AND status = $5
                 RETURNING {SESSION_COLUMNS}"
            );
            let row = client.query_opt(
                sql.as_str(),
                &[
                    &SessionStatus::AwaitingDifficulty.as_str(),
                    &worker,
                    &now_ms(),
                    &external,
                    &SessionStatus::PendingPickup.as_str(),
                ],
            )?;
            row.as_ref().map(row_to_session).transpose()
        })
        .await
    }

    async fn write_state(
        &self,
        session_id: SessionId,
        state: &GameState,
    ) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(state)?;
        self.with_client(move |client| {
            let changed = client.execute(
                "UPDATE mines_sessions SET game_state = $1, updated_at_ms = $2
                 WHERE session_id = $3 AND status NOT LIKE 'completed%'",
                &[&encoded, &now_ms(), &session_id.0],
            )?;
            if changed == 1 {
                return Ok(());
            }
            match current_status(client, session_id)? {
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
        self.with_client(move |client| {
            let changed = client.execute(
                "UPDATE mines_sessions SET status = $1, game_state = $2, updated_at_ms = $3
                 WHERE session_id = $4 AND status NOT LIKE 'completed%'",
                &[&status.as_str(), &encoded, &now_ms(), &session_id.0],
            )?;
            if changed == 1 {
                return Ok(());
            }
            finalize_conflict(session_id, current_status(client, session_id)?, status)
        })
        .await
    }

    async fn load(&self, session_id: SessionId) -> Result<Option<Session>, StoreError> {
        self.with_client(move |client| {
            let sql = format!("SELECT {SESSION_COLUMNS} FROM mines_sessions WHERE session_id = $1");
            let row = client.query_opt(sql.as_str(), &[&session_id.0])?;
            row.as_ref().map(row_to_session).transpose()
        })
        .await
    }
}
