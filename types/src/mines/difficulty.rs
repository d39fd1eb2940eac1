use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error as ThisError;

use super::MULTIPLIER_BASE_BPS;

#[derive(Debug, ThisError, PartialEq, Eq)]
#[error("unknown difficulty: {0}")]
pub struct UnknownDifficulty(pub String);

/// Difficulty selector offered to the player before the board is generated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyKey {
    Easy,
    Medium,
    Hard,
}

impl DifficultyKey {
    /// All difficulties in display order.
    pub const ALL: [DifficultyKey; 3] = [Self::Easy, Self::Medium, Self::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }

    /// Static profile for this difficulty.
    pub fn profile(&self) -> &'static DifficultyProfile {
        match self {
            Self::Easy => &EASY,
            Self::Medium => &MEDIUM,
            Self::Hard => &HARD,
        }
    }
}

impl fmt::Display for DifficultyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DifficultyKey {
    type Err = UnknownDifficulty;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            other => Err(UnknownDifficulty(other.to_string())),
        }
    }
}

/// Payout multiplier in basis points (10_000 = 1.00x).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Multiplier(u32);

impl Multiplier {
    pub const ZERO: Multiplier = Multiplier(0);

    pub const fn from_bps(bps: u32) -> Self {
        Self(bps)
    }

    pub fn bps(&self) -> u32 {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        f64::from(self.0) / f64::from(MULTIPLIER_BASE_BPS)
    }

    /// Payout for `wager` base units, rounded down.
    pub fn apply(&self, wager: u64) -> u64 {
        let scaled = u128::from(wager) * u128::from(self.0) / u128::from(MULTIPLIER_BASE_BPS);
        u64::try_from(scaled).unwrap_or(u64::MAX)
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / MULTIPLIER_BASE_BPS;
        let hundredths = (self.0 % MULTIPLIER_BASE_BPS) / 100;
        write!(f, "x{whole}.{hundredths:02}")
    }
}

/// Static board configuration for a difficulty.
///
/// `multipliers[n]` is the payout multiplier after `n` safe cells have been
/// revealed; index 0 is always zero (nothing to cash out yet).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DifficultyProfile {
    pub key: DifficultyKey,
    pub rows: u8,
    pub cols: u8,
    pub mines: u8,
    pub label: &'static str,
    pub emoji: &'static str,
    pub multipliers: &'static [Multiplier],
}

impl DifficultyProfile {
    pub fn cell_count(&self) -> u32 {
        u32::from(self.rows) * u32::from(self.cols)
    }

    pub fn total_safe_cells(&self) -> u32 {
        self.cell_count().saturating_sub(u32::from(self.mines))
    }
}

const fn m(bps: u32) -> Multiplier {
    Multiplier::from_bps(bps)
}

const EASY_MULTIPLIERS: [Multiplier; 23] = [
    m(0), m(10_800), m(11_800), m(12_900), m(14_200), m(15_500), m(17_000), m(18_800),
    m(20_800), m(23_000), m(25_500), m(28_500), m(32_000), m(36_000), m(40_500), m(45_000),
    m(50_000), m(60_000), m(75_000), m(100_000), m(150_000), m(250_000), m(500_000),
];

const MEDIUM_MULTIPLIERS: [Multiplier; 21] = [
    m(0), m(11_200), m(12_800), m(14_700), m(17_000), m(19_800), m(23_000), m(27_000),
    m(31_500), m(37_000), m(43_500), m(51_000), m(60_000), m(71_000), m(85_000), m(105_000),
    m(130_000), m(165_000), m(220_000), m(300_000), m(750_000),
];

const HARD_MULTIPLIERS: [Multiplier; 19] = [
    m(0), m(11_800), m(14_000), m(16_800), m(20_000), m(24_000), m(29_000), m(35_000),
    m(42_000), m(51_000), m(62_000), m(75_000), m(92_000), m(115_000), m(145_000), m(180_000),
    m(230_000), m(300_000), m(1_000_000),
];

pub const EASY: DifficultyProfile = DifficultyProfile {
    key: DifficultyKey::Easy,
    rows: 5,
    cols: 5,
    mines: 3,
    label: "Easy (5x5, 3 Mines)",
    emoji: "🟢",
    multipliers: &EASY_MULTIPLIERS,
};

pub const MEDIUM: DifficultyProfile = DifficultyProfile {
    key: DifficultyKey::Medium,
    rows: 5,
    cols: 5,
    mines: 5,
    label: "Medium (5x5, 5 Mines)",
    emoji: "🟡",
    multipliers: &MEDIUM_MULTIPLIERS,
};

pub const HARD: DifficultyProfile = DifficultyProfile {
    key: DifficultyKey::Hard,
    rows: 5,
    cols: 5,
    mines: 7,
    label: "Hard (5x5, 7 Mines)",
    emoji: "🔴",
    multipliers: &HARD_MULTIPLIERS,
};
