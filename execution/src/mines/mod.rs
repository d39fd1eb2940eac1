//! Mines game implementation.
//!
//! Board:
//! `rows x cols` cells, exactly `mines` of them mined, placed uniformly at random by rejection
//! sampling. Mine positions never change once generated.
//!
//! Moves:
//! - choose difficulty: generates the board (awaiting difficulty -> in progress)
//! - reveal tile: mine ends the game, last safe cell ends the game, otherwise continue
//! - cash out: only once at least one gem has been found
//! - cancel: only before a difficulty is chosen
//!
//! Every terminal transition discloses the full board.

pub mod grid;
pub mod session;
