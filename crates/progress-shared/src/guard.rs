//! Award deduplication guard.
//!
//! Short-lived in-memory map suppressing identical awards issued within a
//! cooldown window (double taps, duplicate callbacks). Best-effort only: a
//! restart clears it, and single-shot idempotency in the ledger is the
//! durable protection.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::transaction::{AwardRequest, SourceType};

/// Default cooldown between identical awards
pub const DEFAULT_COOLDOWN_MS: i64 = 2_000;

/// Entries older than this are dropped on prune
pub const ENTRY_TTL_MS: i64 = 60_000;

/// Minimum spacing between prune sweeps
const PRUNE_INTERVAL_MS: i64 = 10_000;

/// Identity of an award for dedup purposes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AwardKey {
    pub user_id: String,
    pub source_type: SourceType,
    pub source_id: Option<String>,
    pub amount: i64,
}

impl AwardKey {
    pub fn new(user_id: &str, request: &AwardRequest) -> Self {
        Self {
            user_id: user_id.to_string(),
            source_type: request.source_type,
            source_id: request.source_id.clone(),
            amount: request.amount,
        }
    }
}

#[derive(Debug, Default)]
struct GuardState {
    last_awarded: HashMap<AwardKey, i64>,
    last_prune_ms: i64,
}

#[derive(Debug, Default)]
pub struct DedupGuard {
    state: Mutex<GuardState>,
}

impl DedupGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `key` was accepted within `cooldown_ms` of `now_ms`.
    /// A non-suppressed call records `now_ms` for the key.
    pub fn should_suppress(&self, key: &AwardKey, cooldown_ms: i64, now_ms: i64) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if now_ms - state.last_prune_ms >= PRUNE_INTERVAL_MS {
            state
                .last_awarded
                .retain(|_, &mut at| now_ms - at <= ENTRY_TTL_MS);
            state.last_prune_ms = now_ms;
        }

        if let Some(&last) = state.last_awarded.get(key) {
            if now_ms - last < cooldown_ms {
                return true;
            }
        }

        state.last_awarded.insert(key.clone(), now_ms);
        false
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last_awarded
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson_key(id: &str) -> AwardKey {
        let req = AwardRequest::new(SourceType::LessonComplete, 10).with_source_id(id);
        AwardKey::new("u1", &req)
    }

    #[test]
    fn test_suppresses_within_cooldown() {
        let guard = DedupGuard::new();
        let key = lesson_key("L1");
        assert!(!guard.should_suppress(&key, DEFAULT_COOLDOWN_MS, 1_000));
        assert!(guard.should_suppress(&key, DEFAULT_COOLDOWN_MS, 1_100));
    }

    #[test]
    fn test_allows_after_cooldown() {
        let guard = DedupGuard::new();
        let key = lesson_key("L1");
        assert!(!guard.should_suppress(&key, DEFAULT_COOLDOWN_MS, 1_000));
        assert!(!guard.should_suppress(&key, DEFAULT_COOLDOWN_MS, 4_000));
    }

    #[test]
    fn test_suppressed_call_does_not_extend_window() {
        let guard = DedupGuard::new();
        let key = lesson_key("L1");
        assert!(!guard.should_suppress(&key, 2_000, 0));
        assert!(guard.should_suppress(&key, 2_000, 1_500));
        assert!(!guard.should_suppress(&key, 2_000, 2_100));
    }

    #[test]
    fn test_different_amount_is_different_key() {
        let guard = DedupGuard::new();
        let a = lesson_key("L1");
        let mut b = a.clone();
        b.amount = 20;
        assert!(!guard.should_suppress(&a, 2_000, 0));
        assert!(!guard.should_suppress(&b, 2_000, 10));
    }

    #[test]
    fn test_prunes_old_entries() {
        let guard = DedupGuard::new();
        assert!(!guard.should_suppress(&lesson_key("L1"), 2_000, 0));
        assert!(!guard.should_suppress(&lesson_key("L2"), 2_000, 5_000));
        assert_eq!(guard.len(), 2);

        assert!(!guard.should_suppress(&lesson_key("L3"), 2_000, 64_000));
        // L1 is 64s old and gone; L2 is 59s old and kept
        assert_eq!(guard.len(), 2);
    }
}
