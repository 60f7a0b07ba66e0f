//! The Key/Balance Ledger: a small set of atomic primitives, each shaped the
//! way a single conditional `UPDATE ... WHERE <guard>` would be expressed in
//! SQL — guard, mutate, report whether the guard held — so that concurrent
//! callers race-free rather than needing an external lock.
//!
//! `reserve` subtracts the reservation straight out of `balance` (and adds it
//! to `reserved_balance`) in one step; `balance` therefore already has every
//! outstanding reservation taken out of it, and admission only ever needs to
//! compare `balance >= cost`. This is why `reserve`'s guard is exactly that
//! comparison and nothing more.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::key::ApiKey;

/// Failure modes a `LedgerStore` primitive can report. These are
/// intentionally narrower than `routstr_common::Error`: callers translate
/// them into the richer HTTP-facing error at the edge.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// No row exists for the given key.
    #[error("no such key")]
    NotFound,
    /// The guarded condition did not hold (e.g. balance too low to reserve).
    #[error("guard condition failed")]
    GuardFailed,
}

/// Atomic operations over the Key/Balance Ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Fetch a key's current row, if it exists.
    async fn get(&self, hashed_key: &str) -> Option<ApiKey>;

    /// Create a new zero-balance row for `hashed_key` if it doesn't already
    /// exist; idempotent — returns the existing row unchanged if it does.
    async fn get_or_create(&self, hashed_key: &str) -> ApiKey;

    /// Add `amount_msats` to the key's spendable balance (token redemption).
    /// Creates the row first if necessary.
    async fn credit(&self, hashed_key: &str, amount_msats: u64) -> ApiKey;

    /// Update the refund address / currency / mint / expiry fields on an
    /// existing row. No-op fields are left untouched.
    async fn update_refund_info(
        &self,
        hashed_key: &str,
        refund_address: Option<String>,
        refund_currency: Option<String>,
        refund_mint_url: Option<String>,
        key_expiry_time: Option<i64>,
    ) -> Result<ApiKey, StoreError>;

    /// Admit a request: atomically checks `balance >= cost_msats` and, if
    /// so, moves `cost_msats` out of `balance` and into `reserved_balance`,
    /// and increments `total_requests`. Returns `GuardFailed` if the
    /// balance was insufficient; the row is left untouched in that case.
    async fn reserve(&self, hashed_key: &str, cost_msats: u64) -> Result<ApiKey, StoreError>;

    /// Release a reservation without ever forwarding the request upstream:
    /// restores `cost_msats` to `balance`, removes it from
    /// `reserved_balance`, and undoes the `total_requests` increment.
    async fn revert(&self, hashed_key: &str, cost_msats: u64) -> Result<ApiKey, StoreError>;

    /// Settle a reservation after the request completed. `deducted_max_cost`
    /// is what `reserve` took out; `actual_total_msats` (capped at
    /// `deducted_max_cost` by the caller) is what is really owed.
    /// `reserved_balance` drops by `deducted_max_cost`, `balance` is
    /// credited back the unspent difference, and `total_spent` grows by the
    /// actual amount.
    async fn finalize(
        &self,
        hashed_key: &str,
        deducted_max_cost: u64,
        actual_total_msats: u64,
    ) -> Result<ApiKey, StoreError>;

    /// Read the final balance and permanently remove the row — used when a
    /// holder withdraws everything, and for ephemeral per-request keys.
    async fn drain_and_delete(&self, hashed_key: &str) -> Result<u64, StoreError>;

    /// Sum of every key's `balance + reserved_balance` — what the wallet
    /// actually owes its holders, msats. Used by the payout sweep to avoid
    /// sending user funds to the operator.
    async fn total_user_balance(&self) -> u64;

    /// Every row currently on file — used by the expiry sweep to find keys
    /// whose advisory expiry has passed and still carry a refundable
    /// balance. Expiry is never enforced at auth-resolve time; this is the
    /// only place it has any effect.
    async fn all_keys(&self) -> Vec<ApiKey>;
}

#[derive(Default)]
struct Inner {
    keys: HashMap<String, ApiKey>,
}

/// An in-memory `LedgerStore`, guarded by a single mutex. Every primitive is
/// still expressed as guard-then-mutate so it enforces exactly the contract
/// a conditional SQL `UPDATE` would — this is not a shortcut around the
/// concurrency guarantees, just a different storage engine underneath them.
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryLedgerStore {
    /// A fresh, empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn get(&self, hashed_key: &str) -> Option<ApiKey> {
        self.inner.lock().await.keys.get(hashed_key).cloned()
    }

    async fn get_or_create(&self, hashed_key: &str) -> ApiKey {
        let mut inner = self.inner.lock().await;
        inner
            .keys
            .entry(hashed_key.to_string())
            .or_insert_with(|| ApiKey::new(hashed_key))
            .clone()
    }

    async fn credit(&self, hashed_key: &str, amount_msats: u64) -> ApiKey {
        let mut inner = self.inner.lock().await;
        let key = inner
            .keys
            .entry(hashed_key.to_string())
            .or_insert_with(|| ApiKey::new(hashed_key));
        key.balance += amount_msats;
        key.clone()
    }

    async fn update_refund_info(
        &self,
        hashed_key: &str,
        refund_address: Option<String>,
        refund_currency: Option<String>,
        refund_mint_url: Option<String>,
        key_expiry_time: Option<i64>,
    ) -> Result<ApiKey, StoreError> {
        let mut inner = self.inner.lock().await;
        let key = inner.keys.get_mut(hashed_key).ok_or(StoreError::NotFound)?;
        if refund_address.is_some() {
            key.refund_address = refund_address;
        }
        if refund_currency.is_some() {
            key.refund_currency = refund_currency;
        }
        if refund_mint_url.is_some() {
            key.refund_mint_url = refund_mint_url;
        }
        if key_expiry_time.is_some() {
            key.key_expiry_time = key_expiry_time;
        }
        Ok(key.clone())
    }

    async fn reserve(&self, hashed_key: &str, cost_msats: u64) -> Result<ApiKey, StoreError> {
        let mut inner = self.inner.lock().await;
        let key = inner.keys.get_mut(hashed_key).ok_or(StoreError::NotFound)?;
        if key.balance < cost_msats {
            return Err(StoreError::GuardFailed);
        }
        key.balance -= cost_msats;
        key.reserved_balance += cost_msats;
        key.total_requests += 1;
        Ok(key.clone())
    }

    async fn revert(&self, hashed_key: &str, cost_msats: u64) -> Result<ApiKey, StoreError> {
        let mut inner = self.inner.lock().await;
        let key = inner.keys.get_mut(hashed_key).ok_or(StoreError::NotFound)?;
        key.balance += cost_msats;
        key.reserved_balance = key.reserved_balance.saturating_sub(cost_msats);
        key.total_requests = key.total_requests.saturating_sub(1);
        Ok(key.clone())
    }

    async fn finalize(
        &self,
        hashed_key: &str,
        deducted_max_cost: u64,
        actual_total_msats: u64,
    ) -> Result<ApiKey, StoreError> {
        let mut inner = self.inner.lock().await;
        let key = inner.keys.get_mut(hashed_key).ok_or(StoreError::NotFound)?;
        let actual = actual_total_msats.min(deducted_max_cost);
        let refund = deducted_max_cost - actual;
        key.reserved_balance = key.reserved_balance.saturating_sub(deducted_max_cost);
        key.balance += refund;
        key.total_spent += actual;
        Ok(key.clone())
    }

    async fn drain_and_delete(&self, hashed_key: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let key = inner.keys.remove(hashed_key).ok_or(StoreError::NotFound)?;
        Ok(key.balance)
    }

    async fn total_user_balance(&self) -> u64 {
        let inner = self.inner.lock().await;
        inner.keys.values().map(|k| k.balance + k.reserved_balance).sum()
    }

    async fn all_keys(&self) -> Vec<ApiKey> {
        self.inner.lock().await.keys.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reserve_moves_balance_into_reserved() {
        let store = MemoryLedgerStore::new();
        store.credit("k1", 1000).await;
        let key = store.reserve("k1", 400).await.unwrap();
        assert_eq!(key.balance, 600);
        assert_eq!(key.reserved_balance, 400);
        assert_eq!(key.total_requests, 1);
    }

    #[tokio::test]
    async fn reserve_fails_closed_when_balance_insufficient() {
        let store = MemoryLedgerStore::new();
        store.credit("k1", 100).await;
        let err = store.reserve("k1", 400).await.unwrap_err();
        assert_eq!(err, StoreError::GuardFailed);
        let key = store.get("k1").await.unwrap();
        assert_eq!(key.balance, 100, "untouched on guard failure");
    }

    #[tokio::test]
    async fn revert_restores_exactly_what_reserve_took() {
        let store = MemoryLedgerStore::new();
        store.credit("k1", 1000).await;
        store.reserve("k1", 400).await.unwrap();
        let key = store.revert("k1", 400).await.unwrap();
        assert_eq!(key.balance, 1000);
        assert_eq!(key.reserved_balance, 0);
        assert_eq!(key.total_requests, 0);
    }

    #[tokio::test]
    async fn finalize_at_full_max_cost_refunds_nothing() {
        let store = MemoryLedgerStore::new();
        store.credit("k1", 1000).await;
        store.reserve("k1", 400).await.unwrap();
        let key = store.finalize("k1", 400, 400).await.unwrap();
        assert_eq!(key.balance, 600);
        assert_eq!(key.reserved_balance, 0);
        assert_eq!(key.total_spent, 400);
    }

    #[tokio::test]
    async fn finalize_under_max_cost_refunds_the_difference() {
        let store = MemoryLedgerStore::new();
        store.credit("k1", 1000).await;
        store.reserve("k1", 400).await.unwrap();
        let key = store.finalize("k1", 400, 150).await.unwrap();
        assert_eq!(key.balance, 850, "600 remaining + 250 refunded");
        assert_eq!(key.reserved_balance, 0);
        assert_eq!(key.total_spent, 150);
    }

    #[tokio::test]
    async fn concurrent_reserves_never_drive_balance_negative() {
        let store = MemoryLedgerStore::new();
        store.credit("k1", 100).await;
        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.reserve("k1", 30).await }));
        }
        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 3, "only 3 reservations of 30 fit in a balance of 100");
        let key = store.get("k1").await.unwrap();
        assert_eq!(key.balance, 10);
    }

    #[tokio::test]
    async fn drain_and_delete_removes_the_row() {
        let store = MemoryLedgerStore::new();
        store.credit("k1", 500).await;
        let balance = store.drain_and_delete("k1").await.unwrap();
        assert_eq!(balance, 500);
        assert!(store.get("k1").await.is_none());
    }
}
