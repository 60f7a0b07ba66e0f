//! The `ApiKey` entity: one row per opaque bearer credential, carrying the
//! two-bucket balance accounting the Payment State Machine reserves against.

use serde::{Deserialize, Serialize};

/// A key's balance bookkeeping. `balance` already has any in-flight
/// reservations subtracted out of it, so admission only ever needs to check
/// `balance >= cost` — it never has to also subtract `reserved_balance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    /// sha256 hex digest of the redeemed cashu token, or of the `sk-...`
    /// value itself for keys created directly. Primary key.
    pub hashed_key: String,
    /// spendable balance, msats. Never goes negative; reservations are
    /// already deducted from it.
    pub balance: u64,
    /// sum of all currently-outstanding reservations against this key,
    /// msats. Used only for observability and refund accounting, never as
    /// an admission guard.
    pub reserved_balance: u64,
    /// lifetime total actually charged, msats.
    pub total_spent: u64,
    /// lifetime count of admitted requests.
    pub total_requests: u64,
    /// where to send a balance refund, if the holder asked for one.
    pub refund_address: Option<String>,
    /// currency the refund should be denominated in (`"sat"` or a mint unit).
    pub refund_currency: Option<String>,
    /// mint the refund should be drawn from, if not the primary mint.
    pub refund_mint_url: Option<String>,
    /// unix seconds after which this key should be treated as expired.
    pub key_expiry_time: Option<i64>,
}

impl ApiKey {
    /// A freshly created key with zero balance, as produced by redeeming a
    /// first-sight cashu token.
    pub fn new(hashed_key: impl Into<String>) -> Self {
        ApiKey {
            hashed_key: hashed_key.into(),
            balance: 0,
            reserved_balance: 0,
            total_spent: 0,
            total_requests: 0,
            refund_address: None,
            refund_currency: None,
            refund_mint_url: None,
            key_expiry_time: None,
        }
    }

    /// Whether this key's advisory expiry has passed. Expiry is never
    /// checked at auth-resolve time — a key keeps authenticating past its
    /// expiry until the background sweep gets to it — so the only caller is
    /// that sweep, deciding whether to refund and clear a row.
    pub fn is_expired(&self, now_unix: i64) -> bool {
        matches!(self.key_expiry_time, Some(t) if now_unix >= t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_key_has_zero_balance() {
        let key = ApiKey::new("deadbeef");
        assert_eq!(key.balance, 0);
        assert_eq!(key.reserved_balance, 0);
    }

    #[test]
    fn expiry_is_inclusive_of_the_boundary_second() {
        let mut key = ApiKey::new("deadbeef");
        key.key_expiry_time = Some(1000);
        assert!(!key.is_expired(999));
        assert!(key.is_expired(1000));
    }
}
