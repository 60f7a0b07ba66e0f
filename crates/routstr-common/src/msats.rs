//! Millisatoshi arithmetic helpers.
//!
//! The ledger and cost calculator both operate in msats; sats-denominated
//! amounts (proofs, invoices) are converted at the wallet boundary.

/// Convert a floating-point msat amount to an integer using half-away-from-zero
/// rounding, matching the pricing model's documented rounding rule.
pub fn round_half_away_from_zero(value: f64) -> u64 {
    if value <= 0.0 {
        return 0;
    }
    value.round() as u64
}

/// Sats to msats.
pub const fn sats_to_msats(sats: u64) -> u64 {
    sats * 1000
}

/// Msats to whole sats, truncating any fractional sat.
pub const fn msats_to_sats_floor(msats: u64) -> u64 {
    msats / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round_half_away_from_zero(1.5), 2);
        assert_eq!(round_half_away_from_zero(1.4), 1);
        assert_eq!(round_half_away_from_zero(0.0), 0);
        assert_eq!(round_half_away_from_zero(-1.5), 0);
    }

    #[test]
    fn converts_between_units() {
        assert_eq!(sats_to_msats(3), 3000);
        assert_eq!(msats_to_sats_floor(2999), 2);
    }
}
