use serde::{Deserialize, Serialize};

use super::DifficultyKey;

/// Everything a player can ask of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlayerActionKind {
    ChooseDifficulty { difficulty: DifficultyKey },
    RevealTile { row: u8, col: u8 },
    CashOut,
    Cancel,
}

impl PlayerActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ChooseDifficulty { .. } => "choose_difficulty",
            Self::RevealTile { .. } => "reveal_tile",
            Self::CashOut => "cash_out",
            Self::Cancel => "cancel",
        }
    }
}
