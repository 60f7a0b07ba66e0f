//! Refund idempotency cache: a resubmitted refund request with the same
//! bearer credential within the TTL window replays the original result
//! instead of attempting to drain an already-drained key.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;

/// In-memory TTL cache keyed by `sha256(bearer)`.
#[derive(Default)]
pub struct RefundCache {
    entries: HashMap<String, (Instant, Value)>,
}

impl RefundCache {
    /// A fresh, empty cache.
    pub fn new() -> Self {
        RefundCache::default()
    }

    /// Look up a cached result, evicting it if it has expired.
    pub fn get(&mut self, key: &str) -> Option<Value> {
        match self.entries.get(key) {
            Some((expires_at, value)) if *expires_at > Instant::now() => Some(value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Cache `value` for `key`, valid for `ttl`.
    pub fn set(&mut self, key: String, value: Value, ttl: Duration) {
        self.entries.insert(key, (Instant::now() + ttl, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_none_after_expiry() {
        let mut cache = RefundCache::new();
        cache.set("k".to_string(), serde_json::json!({"a": 1}), Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn returns_cached_value_within_ttl() {
        let mut cache = RefundCache::new();
        cache.set("k".to_string(), serde_json::json!({"a": 1}), Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some(serde_json::json!({"a": 1})));
    }
}
