//! The per-request Payment State Machine: `Idle -> Reserved -> AwaitingUsage
//! -> Finalized`, with `Reverted`/`Rejected` exits before a request ever
//! reaches upstream. One `Reservation` is created per admitted request and
//! must reach exactly one terminal state.

use routstr_common::error::Error as CommonError;
use routstr_common::cost::{calculate_cost, CostOutcome, Usage};
use routstr_common::model::Model;

use crate::store::{LedgerStore, StoreError};

/// A live reservation: the balance has already been debited by
/// `cost_msats` and is sitting in `reserved_balance` awaiting a terminal
/// call to [`PaymentStateMachine::finalize`] or
/// [`PaymentStateMachine::revert`].
#[derive(Debug, Clone)]
pub struct Reservation {
    /// the key this reservation is against
    pub hashed_key: String,
    /// msats moved out of balance at admission time — the ceiling this
    /// request may cost
    pub cost_msats: u64,
}

/// Orchestrates admission, forwarding, and settlement against a
/// [`LedgerStore`]. Stateless itself; all state lives in the store.
pub struct PaymentStateMachine<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> PaymentStateMachine<S> {
    /// Wrap a ledger store.
    pub fn new(store: S) -> Self {
        PaymentStateMachine { store }
    }

    /// Borrow the underlying store (used by handlers that also need raw
    /// `get`/`credit`/`drain_and_delete` access outside the state machine).
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Idle -> Reserved. Admits the request if `balance >= cost_msats`.
    pub async fn reserve(&self, hashed_key: &str, cost_msats: u64) -> Result<Reservation, CommonError> {
        match self.store.reserve(hashed_key, cost_msats).await {
            Ok(_) => Ok(Reservation {
                hashed_key: hashed_key.to_string(),
                cost_msats,
            }),
            Err(StoreError::GuardFailed) => {
                let available = self.store.get(hashed_key).await.map(|k| k.balance).unwrap_or(0);
                Err(CommonError::InsufficientBalance {
                    needed: cost_msats,
                    available,
                })
            }
            Err(StoreError::NotFound) => Err(CommonError::Unauthorized),
        }
    }

    /// Reserved -> Reverted, for requests that never reach upstream (e.g.
    /// upstream returned a non-2xx before any body was produced).
    pub async fn revert(&self, reservation: &Reservation) -> Result<(), CommonError> {
        self.store
            .revert(&reservation.hashed_key, reservation.cost_msats)
            .await
            .map(|_| ())
            .map_err(|_| CommonError::Internal("revert of unknown reservation".to_string()))
    }

    /// AwaitingUsage -> Finalized. Costs the response against `model`'s
    /// pricing and `usage` (if any was observed) and settles the
    /// reservation: unspent balance is returned, `total_spent` grows by the
    /// actual amount. Returns the costing outcome so the caller can surface
    /// a `"cost"` field in the response.
    pub async fn finalize(
        &self,
        reservation: &Reservation,
        model: Option<&Model>,
        usage: Option<Usage>,
    ) -> Result<CostOutcome, CommonError> {
        let outcome = calculate_cost(model, usage, reservation.cost_msats);
        let actual = match &outcome {
            CostOutcome::MaxCost { total_msats } => *total_msats,
            CostOutcome::Cost(data) => data.total_msats,
            // Costing failed after we already forwarded the request: charge
            // the full reservation rather than leave it stuck, matching the
            // "release exactly once" guarantee.
            CostOutcome::Error { .. } => reservation.cost_msats,
        };
        self.store
            .finalize(&reservation.hashed_key, reservation.cost_msats, actual)
            .await
            .map_err(|_| CommonError::Internal("finalize of unknown reservation".to_string()))?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLedgerStore;
    use routstr_common::model::Pricing;

    fn priced_model() -> Model {
        Model {
            id: "test/model".to_string(),
            sats_pricing: Some(Pricing {
                prompt: 1.0,
                completion: 1.0,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn reserve_then_finalize_at_actual_cost_refunds_the_rest() {
        let store = MemoryLedgerStore::new();
        store.credit("k1", 1000).await;
        let psm = PaymentStateMachine::new(store);

        let reservation = psm.reserve("k1", 500).await.unwrap();
        let usage = Usage {
            prompt_tokens: 50,
            completion_tokens: 50,
            ..Default::default()
        };
        let outcome = psm
            .finalize(&reservation, Some(&priced_model()), Some(usage))
            .await
            .unwrap();
        match outcome {
            CostOutcome::Cost(data) => assert_eq!(data.total_msats, 100),
            _ => panic!("expected Cost"),
        }
        let key = psm.store().get("k1").await.unwrap();
        assert_eq!(key.balance, 900, "1000 - 500 reserved + 400 refunded");
        assert_eq!(key.reserved_balance, 0);
        assert_eq!(key.total_spent, 100);
    }

    #[tokio::test]
    async fn reserve_rejects_when_balance_too_low() {
        let store = MemoryLedgerStore::new();
        store.credit("k1", 10).await;
        let psm = PaymentStateMachine::new(store);
        let err = psm.reserve("k1", 500).await.unwrap_err();
        matches!(err, CommonError::InsufficientBalance { .. });
    }

    #[tokio::test]
    async fn boundary_balance_equal_to_cost_is_admitted() {
        let store = MemoryLedgerStore::new();
        store.credit("k1", 500).await;
        let psm = PaymentStateMachine::new(store);
        assert!(psm.reserve("k1", 500).await.is_ok());
    }

    #[tokio::test]
    async fn boundary_balance_one_below_cost_is_rejected() {
        let store = MemoryLedgerStore::new();
        store.credit("k1", 499).await;
        let psm = PaymentStateMachine::new(store);
        assert!(psm.reserve("k1", 500).await.is_err());
    }

    #[tokio::test]
    async fn revert_returns_reserved_balance_to_pre_reserve_value() {
        let store = MemoryLedgerStore::new();
        store.credit("k1", 1000).await;
        let psm = PaymentStateMachine::new(store);
        let reservation = psm.reserve("k1", 300).await.unwrap();
        psm.revert(&reservation).await.unwrap();
        let key = psm.store().get("k1").await.unwrap();
        assert_eq!(key.balance, 1000);
        assert_eq!(key.reserved_balance, 0);
    }

    #[tokio::test]
    async fn finalize_without_usage_charges_full_max_cost() {
        let store = MemoryLedgerStore::new();
        store.credit("k1", 1000).await;
        let psm = PaymentStateMachine::new(store);
        let reservation = psm.reserve("k1", 300).await.unwrap();
        let outcome = psm.finalize(&reservation, None, None).await.unwrap();
        match outcome {
            CostOutcome::MaxCost { total_msats } => assert_eq!(total_msats, 300),
            _ => panic!("expected MaxCost"),
        }
        let key = psm.store().get("k1").await.unwrap();
        assert_eq!(key.balance, 700);
        assert_eq!(key.total_spent, 300);
    }
}
