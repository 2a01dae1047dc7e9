//! Amount normalization: drops arithmetic.
//!
//! # Design invariant
//!
//! Every transferable amount is carried internally as `i64` drops
//! (1 XRP = 1_000_000 drops), which is the ledger's minimum unit and therefore
//! its maximum fractional precision (6 decimal places).
//!
//! `f64` quantities only appear at the edges:
//!
//! | Direction                         | Function           | Notes                        |
//! |-----------------------------------|--------------------|------------------------------|
//! | hours × rate → escrow amount      | [`xrp_to_drops`]   | Rounds half away from zero   |
//! | drops → API response / metadata   | [`drops_to_xrp`]   | Exact for realistic amounts  |
//!
//! [`normalize_xrp`] is `drops_to_xrp(xrp_to_drops(x))` and is idempotent: the
//! escrow amount, the certificate metadata and the caller-visible total are all
//! derived from the same `Drops` value, so a session can never show two
//! different rounded totals.

use serde::{Deserialize, Serialize};

/// Scale factor: 1 XRP = 1_000_000 drops (6 decimal places).
pub const DROPS_PER_XRP: i64 = 1_000_000;

/// A non-negative quantity of the ledger's native minimum unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Drops(i64);

impl Drops {
    pub const ZERO: Drops = Drops(0);

    /// Construct from a raw drops count. Negative counts are rejected.
    pub fn new(drops: i64) -> Result<Self, AmountError> {
        if drops < 0 {
            return Err(AmountError::Negative);
        }
        Ok(Self(drops))
    }

    /// Whole-XRP convenience constructor (reserve / fee-buffer configuration).
    pub fn from_whole_xrp(xrp: u32) -> Self {
        Self(i64::from(xrp) * DROPS_PER_XRP)
    }

    pub fn get(self) -> i64 {
        self.0
    }

    pub fn as_xrp(self) -> f64 {
        drops_to_xrp(self.0)
    }

    /// Saturating sum; used for balance requirements where overflow would only
    /// ever make the requirement stricter.
    pub fn saturating_add(self, other: Drops) -> Drops {
        Drops(self.0.saturating_add(other.0))
    }

    pub fn checked_sub(self, other: Drops) -> Option<Drops> {
        self.0.checked_sub(other.0).filter(|d| *d >= 0).map(Drops)
    }
}

impl std::fmt::Display for Drops {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// AmountError
// ---------------------------------------------------------------------------

/// Errors returned when a quantity cannot be represented as drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    /// Input was `NaN` or infinite.
    NotFinite,
    /// Input was below zero; settlement amounts are never negative.
    Negative,
    /// Input would overflow `i64` after scaling by [`DROPS_PER_XRP`].
    OutOfRange,
}

impl std::fmt::Display for AmountError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AmountError::NotFinite => write!(f, "amount is not finite (NaN or Inf)"),
            AmountError::Negative => write!(f, "amount is negative"),
            AmountError::OutOfRange => write!(f, "amount out of i64 drops range after scaling"),
        }
    }
}

impl std::error::Error for AmountError {}

// ---------------------------------------------------------------------------
// Conversion functions
// ---------------------------------------------------------------------------

/// Convert an XRP quantity to drops, rounding half away from zero.
///
/// Values in `(-0.0000005, 0)` round to zero and are accepted; anything that
/// would round to a negative drops count is rejected.
pub fn xrp_to_drops(xrp: f64) -> Result<Drops, AmountError> {
    if !xrp.is_finite() {
        return Err(AmountError::NotFinite);
    }
    let scaled = xrp * DROPS_PER_XRP as f64;
    if scaled > i64::MAX as f64 || scaled < i64::MIN as f64 {
        return Err(AmountError::OutOfRange);
    }
    // f64::round is half-away-from-zero.
    let rounded = scaled.round() as i64;
    Drops::new(rounded)
}

/// Convert drops to an XRP quantity for display and metadata.
pub fn drops_to_xrp(drops: i64) -> f64 {
    drops as f64 / DROPS_PER_XRP as f64
}

/// Round an XRP quantity to the ledger's 6 fractional digits.
pub fn normalize_xrp(xrp: f64) -> Result<f64, AmountError> {
    Ok(xrp_to_drops(xrp)?.as_xrp())
}

/// `hours × rate`, normalized. The single entry point for session totals.
pub fn settlement_amount(hours: f64, hourly_rate: f64) -> Result<Drops, AmountError> {
    xrp_to_drops(hours * hourly_rate)
}

/// Parse a ledger drops string (`"Balance": "100000000"`).
pub fn parse_drops(s: &str) -> Option<Drops> {
    s.trim().parse::<i64>().ok().and_then(|d| Drops::new(d).ok())
}
