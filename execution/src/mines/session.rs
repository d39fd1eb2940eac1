//! Session transition function.
//!
//! Applies one player move (or a timeout) to a [`Session`]. Validation happens before any
//! mutation, so an `Err` always leaves the session exactly as it was.

use mines_types::{Board, CellPos, PlayerActionKind, Session, SessionStatus};
use rand::Rng;
use thiserror::Error;
use tracing::debug;

use super::grid::{generate_grid, reveal, reveal_all, GridError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("{action} is not allowed while {status}")]
    WrongPhase {
        action: &'static str,
        status: SessionStatus,
    },
    #[error("cell ({row}, {col}) is already revealed")]
    AlreadyRevealed { row: u8, col: u8 },
    #[error("cell ({row}, {col}) is outside the board")]
    OutOfBounds { row: u8, col: u8 },
    #[error("nothing to cash out before the first gem")]
    NothingToCashOut,
    #[error("session is in progress without a board")]
    MissingBoard,
    #[error(transparent)]
    Grid(#[from] GridError),
}

/// What a successful transition did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Board generated; the game is now in progress.
    Started,
    /// Safe cell revealed; the game continues.
    GemFound { gems_found: u32 },
    /// The session reached a terminal status.
    Finished(SessionStatus),
}

impl Outcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Outcome::Finished(_))
    }
}

fn require(
    session: &Session,
    expected: SessionStatus,
    action: &'static str,
) -> Result<(), TransitionError> {
    if session.status != expected {
        return Err(TransitionError::WrongPhase {
            action,
            status: session.status,
        });
    }
    Ok(())
}

/// Apply a player move.
pub fn apply_action<R: Rng + ?Sized>(
    session: &mut Session,
    action: &PlayerActionKind,
    rng: &mut R,
) -> Result<Outcome, TransitionError> {
    let outcome = match *action {
        PlayerActionKind::ChooseDifficulty { difficulty } => {
            require(session, SessionStatus::AwaitingDifficulty, action.name())?;
            let profile = difficulty.profile();
            let (grid, mine_locations) =
                generate_grid(rng, profile.rows, profile.cols, profile.mines)?;
            session.state.board = Some(Board {
                difficulty,
                grid,
                mine_locations,
                gems_found: 0,
            });
            session.status = SessionStatus::InProgress;
            Outcome::Started
        }
        PlayerActionKind::Cancel => {
            require(session, SessionStatus::AwaitingDifficulty, action.name())?;
            session.status = SessionStatus::CompletedCancelled;
            Outcome::Finished(SessionStatus::CompletedCancelled)
        }
        PlayerActionKind::RevealTile { row, col } => {
            require(session, SessionStatus::InProgress, action.name())?;
            let board = session
                .state
                .board
                .as_mut()
                .ok_or(TransitionError::MissingBoard)?;
            let pos = CellPos::new(row, col);
            let cell = board
                .grid
                .cell(pos)
                .ok_or(TransitionError::OutOfBounds { row, col })?;
            if cell.is_revealed {
                return Err(TransitionError::AlreadyRevealed { row, col });
            }

            let status = if reveal(&mut board.grid, pos)?.is_mine {
                reveal_all(&mut board.grid);
                Some(SessionStatus::CompletedMineHit)
            } else {
                board.gems_found = board.gems_found.saturating_add(1);
                if board.gems_found >= board.total_gems() {
                    reveal_all(&mut board.grid);
                    Some(SessionStatus::CompletedAllGemsFound)
                } else {
                    None
                }
            };
            let gems_found = board.gems_found;
            match status {
                Some(status) => {
                    session.status = status;
                    Outcome::Finished(status)
                }
                None => Outcome::GemFound { gems_found },
            }
        }
        PlayerActionKind::CashOut => {
            require(session, SessionStatus::InProgress, action.name())?;
            let board = session
                .state
                .board
                .as_mut()
                .ok_or(TransitionError::MissingBoard)?;
            if board.gems_found == 0 {
                return Err(TransitionError::NothingToCashOut);
            }
            reveal_all(&mut board.grid);
            session.status = SessionStatus::CompletedCashedOut;
            Outcome::Finished(SessionStatus::CompletedCashedOut)
        }
    };
    debug!(
        session_id = %session.id,
        action = action.name(),
        status = %session.status,
        "applied action"
    );
    Ok(outcome)
}

/// Expire a claimed, unfinished session, disclosing the board if there is one.
pub fn apply_timeout(session: &mut Session) -> Result<Outcome, TransitionError> {
    match session.status {
        SessionStatus::AwaitingDifficulty | SessionStatus::InProgress => {}
        status => {
            return Err(TransitionError::WrongPhase {
                action: "timeout",
                status,
            })
        }
    }
    if let Some(board) = session.state.board.as_mut() {
        reveal_all(&mut board.grid);
    }
    session.status = SessionStatus::CompletedTimeout;
    Ok(Outcome::Finished(SessionStatus::CompletedTimeout))
}
