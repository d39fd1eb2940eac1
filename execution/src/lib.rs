//! Mines execution layer.
//!
//! Pure game logic used by the helper service: board generation, reveal evaluation, payout
//! multipliers, and the session transition function.
//!
//! ## Requirements
//! - No I/O. Callers own persistence and presentation.
//! - Randomness comes from the caller's RNG so boards can be reproduced from a seed.
//! - A failed transition leaves the session untouched.

pub mod mines;

pub use mines::grid::{
    generate_grid, multiplier_for, reveal, reveal_all, total_safe_cells, GridError, Reveal,
};
pub use mines::session::{apply_action, apply_timeout, Outcome, TransitionError};
