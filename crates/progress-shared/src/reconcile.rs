//! Reconciliation of the optimistic local ledger against the remote store.
//!
//! Local state is an event-sourced ledger plus a `SyncState`: the last
//! adopted remote total (`baseline`) and the set of local transactions the
//! remote has acknowledged. The effective total is
//! `baseline + sum(unacknowledged amounts)`, so remote-wins on totals never
//! double counts and queued transactions are never lost.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::levels::{LevelStatus, LevelTable};
use crate::transaction::XpTransaction;

/// Remote acknowledgement of one pushed local transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAck {
    pub local_id: String,
    pub remote_id: String,
}

/// Authoritative per-user totals as reported by the remote store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    pub user_id: String,
    pub total_xp: i64,
    pub level: u32,
    pub streak: u32,
    /// Local transactions the remote has recorded (this round)
    #[serde(default)]
    pub acknowledged: Vec<RemoteAck>,
    pub as_of: DateTime<Utc>,
}

/// Per-user sync bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// Last adopted remote total; `None` until the first successful sync
    pub baseline: Option<i64>,
    /// local transaction id -> remote id
    pub acknowledged: HashMap<String, String>,
    pub remote_streak: Option<u32>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl SyncState {
    pub fn is_acknowledged(&self, local_id: &str) -> bool {
        self.acknowledged.contains_key(local_id)
    }

    /// Transactions not yet recorded remotely, in ledger order
    pub fn pending<'a>(&self, transactions: &'a [XpTransaction]) -> Vec<&'a XpTransaction> {
        transactions
            .iter()
            .filter(|t| !self.is_acknowledged(&t.id))
            .collect()
    }

    pub fn effective_total(&self, transactions: &[XpTransaction]) -> i64 {
        match self.baseline {
            Some(baseline) => {
                baseline
                    + self
                        .pending(transactions)
                        .iter()
                        .map(|t| t.amount)
                        .sum::<i64>()
            }
            None => transactions.iter().map(|t| t.amount).sum(),
        }
    }

    /// True if `remote` predates the snapshot adopted last. Passes can
    /// finish out of order; an older snapshot must not roll the baseline back.
    pub fn is_stale(&self, remote: &RemoteSnapshot) -> bool {
        self.last_synced_at.is_some_and(|at| remote.as_of < at)
    }

    /// Adopt a merge result: new baseline and acknowledgements
    pub fn adopt(&mut self, merged: &MergedState) {
        self.baseline = Some(merged.baseline);
        for ack in &merged.newly_acknowledged {
            self.acknowledged
                .insert(ack.local_id.clone(), ack.remote_id.clone());
        }
        self.remote_streak = Some(merged.remote_streak);
        self.last_synced_at = Some(merged.synced_at);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub expected: i64,
    pub remote: i64,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedState {
    pub user_id: String,
    /// Remote total adopted as the new baseline
    pub baseline: i64,
    /// Baseline plus everything still queued locally
    pub total_xp: i64,
    pub level: LevelStatus,
    pub remote_streak: u32,
    /// Local ids kept for re-send
    pub retained: Vec<String>,
    /// Local ids dropped from the unsent queue this pass
    pub dropped: Vec<String>,
    pub newly_acknowledged: Vec<RemoteAck>,
    pub conflict: Option<Conflict>,
    pub synced_at: DateTime<Utc>,
}

/// Merge local transactions with a remote snapshot. Pure; the caller adopts
/// the result with `SyncState::adopt` only after the whole fetch succeeded.
///
/// Remote wins on totals. A total that differs from what the local side
/// expected (previous baseline plus newly acknowledged amounts) is recorded
/// as a conflict and logged, never surfaced.
pub fn reconcile(
    state: &SyncState,
    transactions: &[XpTransaction],
    remote: &RemoteSnapshot,
    table: &LevelTable,
) -> MergedState {
    let acks: HashMap<&str, &RemoteAck> = remote
        .acknowledged
        .iter()
        .map(|a| (a.local_id.as_str(), a))
        .collect();

    let mut retained = Vec::new();
    let mut dropped = Vec::new();
    let mut newly_acknowledged = Vec::new();
    let mut retained_xp = 0i64;
    let mut dropped_xp = 0i64;

    for tx in state.pending(transactions) {
        match acks.get(tx.id.as_str()) {
            Some(ack) => {
                dropped.push(tx.id.clone());
                dropped_xp += tx.amount;
                newly_acknowledged.push((*ack).clone());
            }
            None => {
                retained.push(tx.id.clone());
                retained_xp += tx.amount;
            }
        }
    }

    let expected = state.baseline.unwrap_or(0) + dropped_xp;
    let conflict = (expected != remote.total_xp).then(|| {
        warn!(
            "Reconciliation conflict for {}: expected remote total {}, got {} (remote wins)",
            remote.user_id, expected, remote.total_xp
        );
        Conflict {
            expected,
            remote: remote.total_xp,
        }
    });

    let total_xp = remote.total_xp + retained_xp;
    debug!(
        "Reconciled {}: baseline {} + {} queued = {} ({} dropped)",
        remote.user_id,
        remote.total_xp,
        retained.len(),
        total_xp,
        dropped.len()
    );

    MergedState {
        user_id: remote.user_id.clone(),
        baseline: remote.total_xp,
        total_xp,
        level: table.classify(total_xp),
        remote_streak: remote.streak,
        retained,
        dropped,
        newly_acknowledged,
        conflict,
        synced_at: remote.as_of,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::XpLedger;
    use crate::transaction::{AwardRequest, SourceType};

    fn ack(local: &str) -> RemoteAck {
        RemoteAck {
            local_id: local.to_string(),
            remote_id: format!("r-{}", local),
        }
    }

    fn snapshot(total: i64, acked: Vec<RemoteAck>) -> RemoteSnapshot {
        RemoteSnapshot {
            user_id: "u1".to_string(),
            total_xp: total,
            level: 4,
            streak: 2,
            acknowledged: acked,
            as_of: Utc::now(),
        }
    }

    fn ledger_with(amounts: &[i64]) -> XpLedger {
        let mut ledger = XpLedger::new("u1");
        for &amount in amounts {
            ledger
                .append(AwardRequest::new(SourceType::Manual, amount), Utc::now())
                .unwrap();
        }
        ledger
    }

    #[test]
    fn test_remote_wins_and_unsent_are_reapplied() {
        // t0 was sent (and duplicated server side); t1 is still queued
        let ledger = ledger_with(&[30, 20]);
        let t0 = ledger.transactions()[0].id.clone();
        let t1 = ledger.transactions()[1].id.clone();
        let mut state = SyncState::default();

        let merged = reconcile(
            &state,
            ledger.transactions(),
            &snapshot(500, vec![ack(&t0)]),
            &LevelTable::standard(),
        );

        assert_eq!(merged.total_xp, 520);
        assert_eq!(merged.retained, vec![t1.clone()]);
        assert_eq!(merged.dropped, vec![t0.clone()]);
        assert!(merged.conflict.is_some());

        state.adopt(&merged);
        assert_eq!(state.effective_total(ledger.transactions()), 520);
        assert_eq!(state.pending(ledger.transactions()).len(), 1);
        assert_eq!(state.pending(ledger.transactions())[0].id, t1);
    }

    #[test]
    fn test_consistent_sync_has_no_conflict() {
        let ledger = ledger_with(&[40, 60]);
        let acks = ledger.transactions().iter().map(|t| ack(&t.id)).collect();
        let mut state = SyncState::default();

        let merged = reconcile(
            &state,
            ledger.transactions(),
            &snapshot(100, acks),
            &LevelTable::standard(),
        );
        assert!(merged.conflict.is_none());
        assert!(merged.retained.is_empty());
        assert_eq!(merged.level.level, 2);

        state.adopt(&merged);
        assert!(state.pending(ledger.transactions()).is_empty());
        assert_eq!(state.effective_total(ledger.transactions()), 100);
    }

    #[test]
    fn test_failed_fetch_leaves_state_alone() {
        let ledger = ledger_with(&[10]);
        let state = SyncState::default();
        // Nothing adopted: optimistic local total stands
        assert_eq!(state.effective_total(ledger.transactions()), 10);
        assert_eq!(state.pending(ledger.transactions()).len(), 1);
    }

    #[test]
    fn test_resync_is_idempotent() {
        let ledger = ledger_with(&[25]);
        let t0 = ledger.transactions()[0].id.clone();
        let mut state = SyncState::default();
        let snap = snapshot(25, vec![ack(&t0)]);

        let first = reconcile(&state, ledger.transactions(), &snap, &LevelTable::standard());
        state.adopt(&first);
        let second = reconcile(&state, ledger.transactions(), &snap, &LevelTable::standard());
        assert!(second.dropped.is_empty());
        assert!(second.conflict.is_none());
        assert_eq!(second.total_xp, 25);
    }

    #[test]
    fn test_older_snapshot_is_stale() {
        let ledger = ledger_with(&[40]);
        let t0 = ledger.transactions()[0].id.clone();
        let mut state = SyncState::default();
        let newer = snapshot(40, vec![ack(&t0)]);
        let mut older = snapshot(0, Vec::new());
        older.as_of = newer.as_of - chrono::Duration::seconds(5);
        assert!(!state.is_stale(&older));

        let merged = reconcile(&state, ledger.transactions(), &newer, &LevelTable::standard());
        state.adopt(&merged);
        assert!(state.is_stale(&older));
        assert!(!state.is_stale(&newer));
        assert_eq!(state.effective_total(ledger.transactions()), 40);
    }
}
