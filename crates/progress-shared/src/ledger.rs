//! XP ledger: append-only signed transactions for one user.
//!
//! The authoritative total is the running sum of all amounts. The cached
//! total is always recomputable via `recompute_total`. The ledger never
//! clamps at zero; see `LevelStatus::display_xp` for the clamped view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::ProgressError;
use crate::transaction::{AwardRequest, SourceType, XpTransaction};

/// Result of a successful append
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appended {
    pub transaction: XpTransaction,
    pub total_xp: i64,
}

/// Per-user transaction log
#[derive(Debug, Clone)]
pub struct XpLedger {
    user_id: String,
    transactions: Vec<XpTransaction>,
    claimed_keys: HashSet<(SourceType, String)>,
    total_xp: i64,
    last_modified: Option<DateTime<Utc>>,
}

impl XpLedger {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            transactions: Vec::new(),
            claimed_keys: HashSet::new(),
            total_xp: 0,
            last_modified: None,
        }
    }

    /// Rebuild from persisted transactions (any order; sorted by creation time)
    pub fn from_transactions(user_id: &str, mut transactions: Vec<XpTransaction>) -> Self {
        transactions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let mut ledger = Self::new(user_id);
        for tx in transactions {
            ledger.push(tx);
        }
        ledger
    }

    fn push(&mut self, tx: XpTransaction) {
        if let Some(key) = tx.idempotency_key() {
            self.claimed_keys.insert((tx.source_type, key));
        }
        self.total_xp += tx.amount;
        self.last_modified = Some(tx.created_at);
        self.transactions.push(tx);
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Append a transaction built from `request`.
    ///
    /// Fails with `InvalidAward` for zero or wrongly-signed amounts and with
    /// `Duplicate` when a single-shot key was already credited.
    pub fn append(
        &mut self,
        request: AwardRequest,
        now: DateTime<Utc>,
    ) -> Result<Appended, ProgressError> {
        request.validate()?;

        if let Some(key) = request.idempotency_key() {
            if self.claimed_keys.contains(&(request.source_type, key.clone())) {
                return Err(ProgressError::Duplicate {
                    source_type: request.source_type,
                    key,
                });
            }
        }

        let tx = XpTransaction::from_request(&self.user_id, request, now);
        self.push(tx.clone());

        Ok(Appended {
            transaction: tx,
            total_xp: self.total_xp,
        })
    }

    pub fn contains_key(&self, source_type: SourceType, key: &str) -> bool {
        self.claimed_keys
            .contains(&(source_type, key.to_string()))
    }

    pub fn total_xp(&self) -> i64 {
        self.total_xp
    }

    pub fn recompute_total(&self) -> i64 {
        self.transactions.iter().map(|t| t.amount).sum()
    }

    /// Cached running total matches a full recompute
    pub fn verify(&self) -> bool {
        self.total_xp == self.recompute_total()
    }

    pub fn transactions(&self) -> &[XpTransaction] {
        &self.transactions
    }

    pub fn get(&self, id: &str) -> Option<&XpTransaction> {
        self.transactions.iter().find(|t| t.id == id)
    }

    /// Most recent first
    pub fn recent(&self, limit: usize) -> Vec<XpTransaction> {
        self.transactions.iter().rev().take(limit).cloned().collect()
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn summary(&self) -> LedgerSummary {
        let mut summary = LedgerSummary::default();
        for tx in &self.transactions {
            let entry = summary.by_source.entry(tx.source_type).or_default();
            entry.count += 1;
            entry.xp += tx.amount;
            if tx.amount >= 0 {
                summary.xp_gained += tx.amount;
            } else {
                summary.xp_lost += -tx.amount;
            }
        }
        summary.total = self.transactions.len();
        summary.net_xp = summary.xp_gained - summary.xp_lost;
        summary
    }
}

/// Per-source totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTotals {
    pub count: usize,
    pub xp: i64,
}

/// Summary of ledger contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub total: usize,
    pub xp_gained: i64,
    pub xp_lost: i64,
    pub net_xp: i64,
    pub by_source: BTreeMap<SourceType, SourceTotals>,
}
