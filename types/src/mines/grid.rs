use serde::{Deserialize, Serialize};

use super::DifficultyKey;

/// Board coordinate (row, column), zero-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellPos {
    pub row: u8,
    pub col: u8,
}

impl CellPos {
    pub fn new(row: u8, col: u8) -> Self {
        Self { row, col }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub is_mine: bool,
    pub is_revealed: bool,
}

/// Row-major `rows x cols` board.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    rows: u8,
    cols: u8,
    cells: Vec<Cell>,
}

impl Grid {
    /// Empty board: no mines, nothing revealed.
    pub fn new(rows: u8, cols: u8) -> Self {
        Self {
            rows,
            cols,
            cells: vec![Cell::default(); usize::from(rows) * usize::from(cols)],
        }
    }

    pub fn rows(&self) -> u8 {
        self.rows
    }

    pub fn cols(&self) -> u8 {
        self.cols
    }

    pub fn contains(&self, pos: CellPos) -> bool {
        pos.row < self.rows && pos.col < self.cols
    }

    fn index(&self, pos: CellPos) -> Option<usize> {
        self.contains(pos)
            .then(|| usize::from(pos.row) * usize::from(self.cols) + usize::from(pos.col))
    }

    pub fn cell(&self, pos: CellPos) -> Option<&Cell> {
        self.index(pos).map(|idx| &self.cells[idx])
    }

    pub fn cell_mut(&mut self, pos: CellPos) -> Option<&mut Cell> {
        self.index(pos).map(move |idx| &mut self.cells[idx])
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [Cell] {
        &mut self.cells
    }

    /// Iterate rows as slices of cells.
    pub fn iter_rows(&self) -> impl Iterator<Item = &[Cell]> {
        self.cells.chunks(usize::from(self.cols.max(1)))
    }

    pub fn mine_count(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_mine).count()
    }

    pub fn revealed_safe_count(&self) -> usize {
        self.cells
            .iter()
            .filter(|cell| cell.is_revealed && !cell.is_mine)
            .count()
    }

    pub fn all_revealed(&self) -> bool {
        self.cells.iter().all(|cell| cell.is_revealed)
    }
}

/// Board state once a difficulty has been chosen.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub difficulty: DifficultyKey,
    pub grid: Grid,
    pub mine_locations: Vec<CellPos>,
    pub gems_found: u32,
}

impl Board {
    pub fn total_gems(&self) -> u32 {
        self.difficulty.profile().total_safe_cells()
    }
}
