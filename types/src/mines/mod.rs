//! Mines domain types.
//!
//! Defines session/board/difficulty state and constants used by the execution layer and the
//! helper service.

mod action;
mod constants;
mod difficulty;
mod grid;
mod session;

pub use action::*;
pub use constants::*;
pub use difficulty::*;
pub use grid::*;
pub use session::*;
