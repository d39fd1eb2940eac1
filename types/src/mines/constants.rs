/// Base units per whole currency unit (wagers are stored in base units).
pub const BASE_UNITS_PER_UNIT: u64 = 1_000_000_000;

/// Decimal places shown when a wager or payout is displayed.
pub const DISPLAY_DECIMALS: u32 = 4;

/// Multiplier scale: 10_000 basis points = 1.00x.
pub const MULTIPLIER_BASE_BPS: u32 = 10_000;

/// Default time a claimed session may wait for a difficulty choice.
pub const DEFAULT_OFFER_TIMEOUT_MS: u64 = 30_000;

/// Default time a player may take between moves once the board is shown.
pub const DEFAULT_TURN_TIMEOUT_MS: u64 = 45_000;

/// Notification channel the upstream service publishes pickups on.
pub const PICKUP_CHANNEL: &str = "mines_session_pickup";

/// Format an amount of base units with [`DISPLAY_DECIMALS`] decimals (truncated).
///
/// `format_units(1_000_000_000) == "1.0000"`.
pub fn format_units(amount: u64) -> String {
    let whole = amount / BASE_UNITS_PER_UNIT;
    let scale = BASE_UNITS_PER_UNIT / 10u64.pow(DISPLAY_DECIMALS);
    let frac = (amount % BASE_UNITS_PER_UNIT) / scale;
    format!("{whole}.{frac:0width$}", width = DISPLAY_DECIMALS as usize)
}
