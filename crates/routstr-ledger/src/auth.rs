//! Auth Resolver: turns a bearer credential into an `ApiKey` row, creating
//! and crediting one on first sight of a cashu token.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use routstr_common::error::Error as CommonError;

use crate::key::ApiKey;
use crate::store::LedgerStore;

/// Everything the Auth Resolver needs from the Wallet Gateway to turn a
/// deposited cashu token into a credited balance. Implemented by
/// `routstr-wallet`'s `WalletGateway`; kept as a trait here so
/// `routstr-ledger` never depends on `routstr-wallet`.
#[async_trait]
pub trait EcashRedeemer: Send + Sync {
    /// Redeem `token`, returning the amount credited in msats. Rejects
    /// already-spent or malformed tokens.
    async fn redeem(&self, token: &str) -> Result<u64, CommonError>;
}

/// Refund/expiry metadata carried on selected request headers, applied to
/// the resolved key whenever present (including on every subsequent call,
/// not only the first).
#[derive(Debug, Clone, Default)]
pub struct RefundHeaders {
    /// `Refund-LNURL` header value
    pub refund_address: Option<String>,
    /// `Key-Expiry-Time` header value, unix seconds
    pub key_expiry_time: Option<i64>,
}

/// Resolves bearer credentials against a `LedgerStore`, redeeming
/// newly-seen cashu tokens through an `EcashRedeemer`.
pub struct AuthResolver<S, R> {
    store: S,
    redeemer: R,
}

impl<S: LedgerStore, R: EcashRedeemer> AuthResolver<S, R> {
    /// Wrap a ledger store and an ecash redeemer.
    pub fn new(store: S, redeemer: R) -> Self {
        AuthResolver { store, redeemer }
    }

    /// Redeem a raw ecash token directly, without creating or touching any
    /// ledger row — used for the ephemeral `X-Cashu` per-request flow,
    /// where the caller manages the throwaway key's lifecycle itself.
    pub async fn redeem_raw(&self, token: &str) -> Result<u64, CommonError> {
        self.redeemer.redeem(token).await
    }

    /// Resolve a bearer value (without the `Bearer ` prefix) into a key row.
    ///
    /// - `sk-<64 hex>` looks up an existing key; unknown -> `Unauthorized`.
    /// - a `cashu...` token hashes to its own primary key; if that hash is
    ///   already on file, the call is idempotent (no re-redeeming); if not,
    ///   the token is redeemed and a new zero-then-credited row is created.
    /// - anything else -> `Unauthorized`.
    pub async fn resolve(&self, bearer: &str, refund: RefundHeaders) -> Result<ApiKey, CommonError> {
        let bearer = bearer.trim();
        if bearer.is_empty() {
            return Err(CommonError::Unauthorized);
        }

        if let Some(hex_key) = bearer.strip_prefix("sk-") {
            if hex_key.len() != 64 || !hex_key.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(CommonError::Unauthorized);
            }
            let key = self.store.get(hex_key).await.ok_or(CommonError::Unauthorized)?;
            return self.apply_refund_headers(&key.hashed_key, refund).await;
        }

        if bearer.starts_with("cashu") {
            let hashed_key = hash_token(bearer);
            if self.store.get(&hashed_key).await.is_some() {
                return self.apply_refund_headers(&hashed_key, refund).await;
            }

            let amount_msats = self.redeemer.redeem(bearer).await?;
            self.store.get_or_create(&hashed_key).await;
            let key = self.store.credit(&hashed_key, amount_msats).await;
            return self.apply_refund_headers(&key.hashed_key, refund).await;
        }

        Err(CommonError::Unauthorized)
    }

    async fn apply_refund_headers(&self, hashed_key: &str, refund: RefundHeaders) -> Result<ApiKey, CommonError> {
        if refund.refund_address.is_none() && refund.key_expiry_time.is_none() {
            return self.store.get(hashed_key).await.ok_or(CommonError::Unauthorized);
        }
        self.store
            .update_refund_info(hashed_key, refund.refund_address, None, None, refund.key_expiry_time)
            .await
            .map_err(|_| CommonError::Unauthorized)
    }
}

/// sha256 hex digest used both to name a redeemed token's key row and to
/// key the refund idempotency cache.
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLedgerStore;

    struct FakeRedeemer(u64);

    #[async_trait]
    impl EcashRedeemer for FakeRedeemer {
        async fn redeem(&self, _token: &str) -> Result<u64, CommonError> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn unknown_sk_key_is_unauthorized() {
        let resolver = AuthResolver::new(MemoryLedgerStore::new(), FakeRedeemer(0));
        let err = resolver
            .resolve(&format!("sk-{}", "a".repeat(64)), RefundHeaders::default())
            .await
            .unwrap_err();
        matches!(err, CommonError::Unauthorized);
    }

    #[tokio::test]
    async fn first_sight_cashu_token_is_redeemed_and_credited() {
        let resolver = AuthResolver::new(MemoryLedgerStore::new(), FakeRedeemer(5000));
        let key = resolver
            .resolve("cashuAtoken123", RefundHeaders::default())
            .await
            .unwrap();
        assert_eq!(key.balance, 5000);
    }

    #[tokio::test]
    async fn resubmitting_the_same_cashu_token_is_idempotent() {
        let resolver = AuthResolver::new(MemoryLedgerStore::new(), FakeRedeemer(5000));
        let first = resolver
            .resolve("cashuAtoken123", RefundHeaders::default())
            .await
            .unwrap();
        let second = resolver
            .resolve("cashuAtoken123", RefundHeaders::default())
            .await
            .unwrap();
        assert_eq!(first.balance, second.balance, "not re-credited on resubmission");
    }

    #[tokio::test]
    async fn garbage_bearer_is_unauthorized() {
        let resolver = AuthResolver::new(MemoryLedgerStore::new(), FakeRedeemer(0));
        let err = resolver.resolve("nonsense", RefundHeaders::default()).await.unwrap_err();
        matches!(err, CommonError::Unauthorized);
    }
}
