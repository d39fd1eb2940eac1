use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error as ThisError;

use super::Board;

/// Store primary key of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub i64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier the upstream service assigned to the wager.
    ExternalGameId
);
string_id!(
    /// Identity of a player in the chat transport.
    PlayerId
);
string_id!(
    /// Opaque addressing info telling the presenter where the game lives.
    ChatContext
);
string_id!(
    /// Handle of the message that renders a session.
    MessageRef
);

#[derive(Debug, ThisError, PartialEq, Eq)]
#[error("unknown session status: {0}")]
pub struct UnknownStatus(pub String);

/// Session lifecycle status. `Completed*` values are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    PendingPickup,
    AwaitingDifficulty,
    InProgress,
    CompletedMineHit,
    CompletedAllGemsFound,
    CompletedCashedOut,
    CompletedTimeout,
    CompletedCancelled,
    CompletedErrorUi,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPickup => "pending_pickup",
            Self::AwaitingDifficulty => "awaiting_difficulty",
            Self::InProgress => "in_progress",
            Self::CompletedMineHit => "completed_mine_hit",
            Self::CompletedAllGemsFound => "completed_all_gems_found",
            Self::CompletedCashedOut => "completed_cashed_out",
            Self::CompletedTimeout => "completed_timeout",
            Self::CompletedCancelled => "completed_cancelled",
            Self::CompletedErrorUi => "completed_error_ui",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CompletedMineHit
                | Self::CompletedAllGemsFound
                | Self::CompletedCashedOut
                | Self::CompletedTimeout
                | Self::CompletedCancelled
                | Self::CompletedErrorUi
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending_pickup" => Ok(Self::PendingPickup),
            "awaiting_difficulty" => Ok(Self::AwaitingDifficulty),
            "in_progress" => Ok(Self::InProgress),
            "completed_mine_hit" => Ok(Self::CompletedMineHit),
            "completed_all_gems_found" => Ok(Self::CompletedAllGemsFound),
            "completed_cashed_out" => Ok(Self::CompletedCashedOut),
            "completed_timeout" => Ok(Self::CompletedTimeout),
            "completed_cancelled" => Ok(Self::CompletedCancelled),
            "completed_error_ui" => Ok(Self::CompletedErrorUi),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Mutable part of a session, persisted as JSON.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    /// Absent until a difficulty is chosen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board: Option<Board>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_ref: Option<MessageRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub external_game_id: ExternalGameId,
    pub status: SessionStatus,
    pub owner_id: PlayerId,
    pub owner_name: Option<String>,
    pub chat: ChatContext,
    /// Stake in base units.
    pub wager: u64,
    pub state: GameState,
    pub claimed_by: Option<String>,
}

impl Session {
    /// Name shown to players, falling back to the owner id.
    pub fn display_name(&self) -> String {
        match &self.owner_name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => format!("Player {}", self.owner_id),
        }
    }

    pub fn message_ref(&self) -> Option<&MessageRef> {
        self.state.message_ref.as_ref()
    }

    pub fn board(&self) -> Option<&Board> {
        self.state.board.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
