//! Remote authoritative progression store.
//!
//! The daemon pushes unacknowledged ledger transactions and fetches the
//! remote totals. Every remote enforces `(user, source_type, key)`
//! idempotency, so a re-sent transaction is acknowledged without being
//! counted twice.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use progress_shared::levels::LevelTable;
use progress_shared::{ProgressError, RemoteAck, RemoteSnapshot, SourceType, XpTransaction};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    fn name(&self) -> &str;

    /// Record `transactions`; returns one ack per transaction the remote
    /// now holds (new or already known)
    async fn push(
        &self,
        user_id: &str,
        transactions: &[XpTransaction],
    ) -> Result<Vec<RemoteAck>, ProgressError>;

    async fn fetch(&self, user_id: &str) -> Result<RemoteSnapshot, ProgressError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PushBody {
    pub transactions: Vec<XpTransaction>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PushResponse {
    pub acknowledged: Vec<RemoteAck>,
}

/// JSON-over-HTTP remote
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ProgressError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProgressError::SyncFailure(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, user_id: &str, tail: &str) -> String {
        format!("{}/v1/users/{}/{}", self.base_url, user_id, tail)
    }
}

fn sync_err(context: &str, e: reqwest::Error) -> ProgressError {
    ProgressError::SyncFailure(format!("{}: {}", context, e))
}

#[async_trait]
impl RemoteStore for HttpRemote {
    fn name(&self) -> &str {
        "http"
    }

    async fn push(
        &self,
        user_id: &str,
        transactions: &[XpTransaction],
    ) -> Result<Vec<RemoteAck>, ProgressError> {
        let body = PushBody {
            transactions: transactions.to_vec(),
        };
        let response = self
            .client
            .post(self.url(user_id, "transactions"))
            .json(&body)
            .send()
            .await
            .map_err(|e| sync_err("push", e))?
            .error_for_status()
            .map_err(|e| sync_err("push", e))?;

        let parsed: PushResponse = response.json().await.map_err(|e| sync_err("push", e))?;
        Ok(parsed.acknowledged)
    }

    async fn fetch(&self, user_id: &str) -> Result<RemoteSnapshot, ProgressError> {
        self.client
            .get(self.url(user_id, "progression"))
            .send()
            .await
            .map_err(|e| sync_err("fetch", e))?
            .error_for_status()
            .map_err(|e| sync_err("fetch", e))?
            .json()
            .await
            .map_err(|e| sync_err("fetch", e))
    }
}

#[derive(Debug, Default)]
struct RemoteUser {
    total_xp: i64,
    streak: u32,
    /// local id -> remote id
    acks: HashMap<String, String>,
    /// (source_type, idempotency key) -> remote id
    keys: HashMap<(SourceType, String), String>,
    next_id: u64,
}

impl RemoteUser {
    fn record(&mut self, user_id: &str, tx: &XpTransaction) -> RemoteAck {
        if let Some(remote_id) = self.acks.get(&tx.id) {
            return ack(&tx.id, remote_id);
        }

        let key = tx.idempotency_key().map(|k| (tx.source_type, k));
        if let Some(remote_id) = key.as_ref().and_then(|k| self.keys.get(k)).cloned() {
            debug!("Remote already holds {} for {}", tx.source_type, user_id);
            self.acks.insert(tx.id.clone(), remote_id.clone());
            return ack(&tx.id, &remote_id);
        }

        self.next_id += 1;
        let remote_id = format!("r-{}-{}", user_id, self.next_id);
        self.total_xp += tx.amount;
        self.acks.insert(tx.id.clone(), remote_id.clone());
        if let Some(key) = key {
            self.keys.insert(key, remote_id.clone());
        }
        ack(&tx.id, &remote_id)
    }
}

fn ack(local_id: &str, remote_id: &str) -> RemoteAck {
    RemoteAck {
        local_id: local_id.to_string(),
        remote_id: remote_id.to_string(),
    }
}

/// In-process authoritative store
pub struct MemoryRemote {
    table: Arc<LevelTable>,
    users: Mutex<HashMap<String, RemoteUser>>,
    failures: AtomicU32,
    fetch_failures: AtomicU32,
}

impl MemoryRemote {
    pub fn new(table: Arc<LevelTable>) -> Self {
        Self {
            table,
            users: Mutex::new(HashMap::new()),
            failures: AtomicU32::new(0),
            fetch_failures: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` calls of either kind
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Fail only the next `n` fetches
    pub fn fail_next_fetch(&self, n: u32) {
        self.fetch_failures.store(n, Ordering::SeqCst);
    }

    /// XP recorded by another device
    pub async fn credit(&self, user_id: &str, amount: i64) {
        let mut users = self.users.lock().await;
        users.entry(user_id.to_string()).or_default().total_xp += amount;
    }

    pub async fn set_streak(&self, user_id: &str, streak: u32) {
        let mut users = self.users.lock().await;
        users.entry(user_id.to_string()).or_default().streak = streak;
    }

    pub async fn total_xp(&self, user_id: &str) -> i64 {
        let users = self.users.lock().await;
        users.get(user_id).map(|u| u.total_xp).unwrap_or(0)
    }

    /// Distinct transactions counted for `user_id`
    pub async fn transaction_count(&self, user_id: &str) -> usize {
        let users = self.users.lock().await;
        users
            .get(user_id)
            .map(|u| u.acks.values().collect::<HashSet<_>>().len())
            .unwrap_or(0)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    fn name(&self) -> &str {
        "memory"
    }

    async fn push(
        &self,
        user_id: &str,
        transactions: &[XpTransaction],
    ) -> Result<Vec<RemoteAck>, ProgressError> {
        if Self::take_failure(&self.failures) {
            return Err(ProgressError::SyncFailure("remote unavailable".to_string()));
        }
        let mut users = self.users.lock().await;
        let user = users.entry(user_id.to_string()).or_default();
        Ok(transactions
            .iter()
            .map(|tx| user.record(user_id, tx))
            .collect())
    }

    async fn fetch(&self, user_id: &str) -> Result<RemoteSnapshot, ProgressError> {
        if Self::take_failure(&self.failures) || Self::take_failure(&self.fetch_failures) {
            return Err(ProgressError::SyncFailure("remote unavailable".to_string()));
        }
        let users = self.users.lock().await;
        let (total_xp, streak, acknowledged) = match users.get(user_id) {
            Some(u) => (
                u.total_xp,
                u.streak,
                u.acks.iter().map(|(l, r)| ack(l, r)).collect(),
            ),
            None => (0, 0, Vec::new()),
        };
        Ok(RemoteSnapshot {
            user_id: user_id.to_string(),
            total_xp,
            level: self.table.level_for(total_xp),
            streak,
            acknowledged,
            as_of: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use progress_shared::AwardRequest;

    fn tx(id: &str, request: AwardRequest) -> XpTransaction {
        XpTransaction {
            id: id.to_string(),
            user_id: "u1".to_string(),
            amount: request.amount,
            source_type: request.source_type,
            source_id: request.source_id,
            metadata: request.metadata,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_push_is_idempotent_on_local_id() {
        let remote = MemoryRemote::new(Arc::new(LevelTable::standard()));
        let t = tx("t1", AwardRequest::new(SourceType::Manual, 20));
        remote.push("u1", &[t.clone()]).await.unwrap();
        let acks = remote.push("u1", &[t]).await.unwrap();
        assert_eq!(acks.len(), 1);
        assert_eq!(remote.total_xp("u1").await, 20);
    }

    #[tokio::test]
    async fn test_same_event_from_two_devices_counts_once() {
        let remote = MemoryRemote::new(Arc::new(LevelTable::standard()));
        let claim = AwardRequest::new(SourceType::ChallengeComplete, 40).with_source_id("c1");
        let a = remote.push("u1", &[tx("a", claim.clone())]).await.unwrap();
        let b = remote.push("u1", &[tx("b", claim)]).await.unwrap();
        assert_eq!(a[0].remote_id, b[0].remote_id);
        assert_eq!(remote.total_xp("u1").await, 40);
        assert_eq!(remote.transaction_count("u1").await, 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let remote = MemoryRemote::new(Arc::new(LevelTable::standard()));
        remote.set_streak("u1", 4).await;
        remote.fail_next(1);
        assert!(remote.fetch("u1").await.is_err());
        let snapshot = remote.fetch("u1").await.unwrap();
        assert_eq!(snapshot.total_xp, 0);
        assert_eq!(snapshot.level, 1);
        assert_eq!(snapshot.streak, 4);
    }
}
