//! What the coordinator hands to the chat transport.
//!
//! [`SessionView`] is a transport-neutral snapshot of a session: everything needed to draw the
//! message and its buttons. Every action option carries the session id so a button press can be
//! routed back without extra lookups.

use async_trait::async_trait;
use mines_execution::multiplier_for;
use mines_types::{
    format_units, ChatContext, DifficultyKey, MessageRef, Multiplier, PlayerActionKind, Session,
    SessionId, SessionStatus,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleSeverity {
    Neutral,
    Loss,
    Win,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileView {
    Hidden,
    Gem,
    Mine,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOption {
    pub session_id: SessionId,
    pub label: String,
    pub action: PlayerActionKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: SessionId,
    pub chat: ChatContext,
    pub status: SessionStatus,
    pub title: String,
    pub severity: TitleSeverity,
    pub player: String,
    pub wager: u64,
    pub wager_display: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<DifficultyKey>,
    pub gems_found: u32,
    pub total_gems: u32,
    pub current_multiplier: Multiplier,
    /// Only while the game is running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_multiplier: Option<Multiplier>,
    pub potential_payout: u64,
    /// Row-major; empty before a difficulty is chosen.
    pub tiles: Vec<Vec<TileView>>,
    pub actions: Vec<ActionOption>,
}

impl SessionView {
    pub fn build(session: &Session) -> Self {
        let session_id = session.id;
        let in_progress = session.status == SessionStatus::InProgress;
        let mut view = Self {
            session_id,
            chat: session.chat.clone(),
            status: session.status,
            title: "Mines Challenge!".to_string(),
            severity: severity_for(session.status),
            player: session.display_name(),
            wager: session.wager,
            wager_display: format_units(session.wager),
            difficulty: None,
            gems_found: 0,
            total_gems: 0,
            current_multiplier: Multiplier::ZERO,
            next_multiplier: None,
            potential_payout: 0,
            tiles: Vec::new(),
            actions: Vec::new(),
        };

        let Some(board) = session.board() else {
            if session.status == SessionStatus::AwaitingDifficulty {
                view.actions = DifficultyKey::ALL
                    .iter()
                    .map(|&difficulty| {
                        let profile = difficulty.profile();
                        ActionOption {
                            session_id,
                            label: format!("{} {}", profile.emoji, profile.label),
                            action: PlayerActionKind::ChooseDifficulty { difficulty },
                        }
                    })
                    .collect();
                view.actions.push(ActionOption {
                    session_id,
                    label: "Cancel".to_string(),
                    action: PlayerActionKind::Cancel,
                });
            }
            return view;
        };

        let profile = board.difficulty.profile();
        let current = multiplier_for(board.difficulty, board.gems_found);
        view.title = format!("Mines - {}", profile.label);
        view.difficulty = Some(board.difficulty);
        view.gems_found = board.gems_found;
        view.total_gems = board.total_gems();
        view.current_multiplier = current;
        if in_progress || severity_for(session.status) == TitleSeverity::Win {
            view.potential_payout = current.apply(session.wager);
        }
        if in_progress {
            view.next_multiplier = Some(multiplier_for(
                board.difficulty,
                board.gems_found.saturating_add(1),
            ));
        }

        for (row, cells) in (0u8..).zip(board.grid.iter_rows()) {
            let mut tiles = Vec::with_capacity(cells.len());
            for (col, cell) in (0u8..).zip(cells) {
                tiles.push(match (cell.is_revealed, cell.is_mine) {
                    (false, _) => TileView::Hidden,
                    (true, false) => TileView::Gem,
                    (true, true) => TileView::Mine,
                });
                if in_progress && !cell.is_revealed {
                    view.actions.push(ActionOption {
                        session_id,
                        label: format!("{row}:{col}"),
                        action: PlayerActionKind::RevealTile { row, col },
                    });
                }
            }
            view.tiles.push(tiles);
        }
        if in_progress && board.gems_found > 0 {
            view.actions.push(ActionOption {
                session_id,
                label: format!("Cash Out ({current})"),
                action: PlayerActionKind::CashOut,
            });
        }
        view
    }

    pub fn has_action(&self, action: &PlayerActionKind) -> bool {
        self.actions.iter().any(|option| &option.action == action)
    }
}

fn severity_for(status: SessionStatus) -> TitleSeverity {
    match status {
        SessionStatus::CompletedMineHit => TitleSeverity::Loss,
        SessionStatus::CompletedCashedOut | SessionStatus::CompletedAllGemsFound => {
            TitleSeverity::Win
        }
        _ => TitleSeverity::Neutral,
    }
}

/// Notice attached to a terminal render.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Annotation {
    MineHit,
    AllGemsFound { payout: u64 },
    CashedOut { payout: u64 },
    TimedOut,
}

impl Annotation {
    /// Annotation for a terminal `session`, if its status has one.
    pub fn for_session(session: &Session) -> Option<Self> {
        let payout = || {
            session
                .board()
                .map(|board| multiplier_for(board.difficulty, board.gems_found).apply(session.wager))
                .unwrap_or(0)
        };
        match session.status {
            SessionStatus::CompletedMineHit => Some(Self::MineHit),
            SessionStatus::CompletedAllGemsFound => Some(Self::AllGemsFound { payout: payout() }),
            SessionStatus::CompletedCashedOut => Some(Self::CashedOut { payout: payout() }),
            SessionStatus::CompletedTimeout => Some(Self::TimedOut),
            _ => None,
        }
    }
}

/// Response to a button press, shown only to the presser.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Acknowledgement {
    Received,
    NotActionable,
    Unauthorized,
}

/// Transport handle for acknowledging one inbound action.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AckToken(pub String);

#[derive(Debug, Error)]
pub enum PresenterError {
    #[error("presenter unavailable: {0}")]
    Unavailable(String),
    #[error("unknown message {0}")]
    UnknownMessage(MessageRef),
    /// The transport rejected an edit identical to what is shown.
    #[error("message not modified")]
    NotModified,
}

#[async_trait]
pub trait Presenter: Send + Sync {
    async fn render(
        &self,
        view: &SessionView,
        annotation: Option<Annotation>,
    ) -> Result<MessageRef, PresenterError>;

    async fn update_render(
        &self,
        message: &MessageRef,
        view: &SessionView,
        annotation: Option<Annotation>,
    ) -> Result<(), PresenterError>;

    async fn dispose(&self, chat: &ChatContext, message: &MessageRef)
        -> Result<(), PresenterError>;

    async fn acknowledge(
        &self,
        ack: &AckToken,
        acknowledgement: Acknowledgement,
    ) -> Result<(), PresenterError>;
}
