//! Mines helper types.
//!
//! Sessions, statuses, boards and the static difficulty table shared by the
//! game logic (`mines-execution`) and the helper service.

pub mod mines;

pub use mines::{
    format_units, Board, Cell, CellPos, ChatContext, DifficultyKey, DifficultyProfile,
    ExternalGameId, GameState, Grid, MessageRef, Multiplier, PlayerActionKind, PlayerId,
    Session, SessionId, SessionStatus, UnknownDifficulty, UnknownStatus,
};
