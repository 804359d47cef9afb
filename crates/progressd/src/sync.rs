//! Background reconciliation with the remote store.
//!
//! A pass pushes unacknowledged transactions, fetches the remote snapshot
//! and only then touches local state. An abandoned or failed pass leaves
//! the user exactly as it found them, so every pass is retryable from
//! scratch.

use std::sync::Arc;
use std::time::Duration;

use progress_shared::{ProgressError, RemoteAck, SyncReport};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::remote::RemoteStore;
use crate::retry::{with_retry, with_timeout, RetryPolicy};
use crate::service::ProgressionService;

/// Capacity of the on-demand trigger queue
pub const TRIGGER_CAPACITY: usize = 64;

pub struct SyncWorker {
    service: Arc<ProgressionService>,
    remote: Arc<dyn RemoteStore>,
    policy: RetryPolicy,
    timeout: Duration,
    interval: Duration,
}

impl SyncWorker {
    pub fn new(
        service: Arc<ProgressionService>,
        remote: Arc<dyn RemoteStore>,
        policy: RetryPolicy,
        timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            service,
            remote,
            policy,
            timeout,
            interval,
        }
    }

    pub fn remote_name(&self) -> &str {
        self.remote.name()
    }

    /// One full push/fetch/reconcile pass for `user_id`
    pub async fn sync_user(&self, user_id: &str) -> Result<SyncReport, ProgressError> {
        let pending = self.service.pending_transactions(user_id).await?;

        let mut attempts = 0;
        let mut acks: Vec<RemoteAck> = Vec::new();
        if !pending.is_empty() {
            let outcome = with_retry(&self.policy, "push", || {
                with_timeout(self.timeout, "push", self.remote.push(user_id, &pending))
            })
            .await;
            attempts += outcome.attempts;
            acks = outcome.result?;
        }

        let outcome = with_retry(&self.policy, "fetch", || {
            with_timeout(self.timeout, "fetch", self.remote.fetch(user_id))
        })
        .await;
        attempts += outcome.attempts;
        let mut snapshot = outcome.result?;

        for ack in acks.iter() {
            if !snapshot.acknowledged.iter().any(|a| a.local_id == ack.local_id) {
                snapshot.acknowledged.push(ack.clone());
            }
        }
        let remote_total = snapshot.total_xp;

        let Some(merged) = self.service.apply_remote(user_id, snapshot).await? else {
            return Err(ProgressError::SyncFailure(format!(
                "snapshot for {} superseded by a newer pass",
                user_id
            )));
        };
        let report = SyncReport {
            user_id: user_id.to_string(),
            pushed: pending.len(),
            acknowledged: merged.newly_acknowledged.len(),
            remote_total,
            total_xp: merged.total_xp,
            level: merged.level.level,
            retained: merged.retained.len(),
            conflict: merged.conflict.is_some(),
            attempts,
            synced_at: merged.synced_at,
        };
        info!(
            "Synced {} with {}: pushed {}, total {} (level {})",
            user_id,
            self.remote.name(),
            report.pushed,
            report.total_xp,
            report.level
        );
        Ok(report)
    }

    /// Sync every open session; failures are logged and left for next tick
    pub async fn sync_all(&self) -> Vec<SyncReport> {
        let mut reports = Vec::new();
        for user_id in self.service.open_users().await {
            match self.sync_user(&user_id).await {
                Ok(report) => reports.push(report),
                Err(e) => warn!("Sync for {} failed, keeping local state: {}", user_id, e),
            }
        }
        reports
    }

    /// Interval loop plus on-demand triggers until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>, mut triggers: mpsc::Receiver<String>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Sync worker started ({} remote, every {:?})",
            self.remote.name(),
            self.interval
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let reports = self.sync_all().await;
                    debug!("Periodic sync finished for {} users", reports.len());
                }
                Some(user_id) = triggers.recv() => {
                    if let Err(e) = self.sync_user(&user_id).await {
                        warn!("Sync for {} failed, keeping local state: {}", user_id, e);
                    }
                }
            }
        }

        info!("Sync worker stopped");
    }
}
