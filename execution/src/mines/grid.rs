//! Board generation and reveal evaluation.

use mines_types::{CellPos, DifficultyKey, Grid, Multiplier};
use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GridError {
    #[error("{mines} mines do not fit a {rows}x{cols} board")]
    TooManyMines { rows: u8, cols: u8, mines: u8 },
    #[error("cell ({row}, {col}) is outside the board")]
    OutOfBounds { row: u8, col: u8 },
}

/// Result of revealing a single cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reveal {
    pub is_mine: bool,
}

/// Place `mines` distinct mines uniformly at random.
///
/// Returns the grid and the mine locations in placement order. At least one cell must stay safe.
pub fn generate_grid<R: Rng + ?Sized>(
    rng: &mut R,
    rows: u8,
    cols: u8,
    mines: u8,
) -> Result<(Grid, Vec<CellPos>), GridError> {
    let cells = usize::from(rows) * usize::from(cols);
    if usize::from(mines) >= cells {
        return Err(GridError::TooManyMines { rows, cols, mines });
    }

    let mut grid = Grid::new(rows, cols);
    let mut locations = Vec::with_capacity(usize::from(mines));
    while locations.len() < usize::from(mines) {
        let pos = CellPos::new(rng.gen_range(0..rows), rng.gen_range(0..cols));
        let Some(cell) = grid.cell_mut(pos) else {
            continue;
        };
        if cell.is_mine {
            continue;
        }
        cell.is_mine = true;
        locations.push(pos);
    }
    Ok((grid, locations))
}

/// Mark a cell revealed and report whether it was a mine.
pub fn reveal(grid: &mut Grid, pos: CellPos) -> Result<Reveal, GridError> {
    let cell = grid.cell_mut(pos).ok_or(GridError::OutOfBounds {
        row: pos.row,
        col: pos.col,
    })?;
    cell.is_revealed = true;
    Ok(Reveal {
        is_mine: cell.is_mine,
    })
}

pub fn reveal_all(grid: &mut Grid) {
    for cell in grid.cells_mut() {
        cell.is_revealed = true;
    }
}

/// Multiplier after `gems_found` safe reveals; zero when out of range.
pub fn multiplier_for(difficulty: DifficultyKey, gems_found: u32) -> Multiplier {
    usize::try_from(gems_found)
        .ok()
        .and_then(|idx| difficulty.profile().multipliers.get(idx).copied())
        .unwrap_or(Multiplier::ZERO)
}

pub fn total_safe_cells(difficulty: DifficultyKey) -> u32 {
    difficulty.profile().total_safe_cells()
}
