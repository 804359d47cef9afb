//! Reconciliation against the in-memory remote

use std::sync::Arc;
use std::time::Duration;

use progress_shared::levels::LevelTable;
use chrono::Utc;
use progress_shared::{ActivityKind, ActivityReport, AwardRequest, RemoteAck, RemoteSnapshot, SourceType};
use progressd::config::Config;
use progressd::remote::{MemoryRemote, RemoteStore};
use progressd::retry::RetryPolicy;
use progressd::store::ProgressStore;
use progressd::sync::{SyncWorker, TRIGGER_CAPACITY};
use progressd::ProgressionService;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

struct Harness {
    _dir: TempDir,
    service: Arc<ProgressionService>,
    remote: Arc<MemoryRemote>,
    worker: Arc<SyncWorker>,
}

async fn harness(max_attempts: u32, trigger: Option<mpsc::Sender<String>>) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.awards.off_peak_enabled = false;
    let table = Arc::new(LevelTable::standard());

    let store = ProgressStore::open(dir.path().join("progress.db")).await.unwrap();
    let mut service = ProgressionService::new(&config, Arc::clone(&table), store);
    if let Some(tx) = trigger {
        service = service.with_sync_trigger(tx);
    }
    let service = Arc::new(service);

    let remote = Arc::new(MemoryRemote::new(table));
    let worker = Arc::new(SyncWorker::new(
        Arc::clone(&service),
        Arc::clone(&remote) as Arc<dyn RemoteStore>,
        RetryPolicy::immediate(max_attempts),
        Duration::from_secs(5),
        Duration::from_secs(3_600),
    ));

    Harness {
        _dir: dir,
        service,
        remote,
        worker,
    }
}

async fn award(service: &ProgressionService, user: &str, amount: i64) {
    service
        .award(user, AwardRequest::new(SourceType::Manual, amount))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_sync_pushes_and_adopts_remote_total() {
    let h = harness(3, None).await;
    award(&h.service, "alice", 20).await;

    let report = h.worker.sync_user("alice").await.unwrap();

    assert_eq!(report.pushed, 1);
    assert_eq!(report.remote_total, 20);
    assert_eq!(report.total_xp, 20);
    assert!(!report.conflict);
    let snapshot = h.service.snapshot("alice").await.unwrap();
    assert_eq!(snapshot.pending_sync, 0);
    assert!(snapshot.last_synced_at.is_some());
}

#[tokio::test]
async fn test_remote_wins_and_queued_awards_stay_on_top() {
    let h = harness(3, None).await;
    award(&h.service, "bob", 20).await;
    h.worker.sync_user("bob").await.unwrap();

    // Another device recorded 480 XP
    h.remote.credit("bob", 480).await;
    h.service
        .award("bob", AwardRequest::new(SourceType::Manual, 20).with_source_id("t1"))
        .await
        .unwrap();
    h.remote.fail_next(3);
    assert!(h.worker.sync_user("bob").await.is_err());

    // Failed pass changes nothing locally
    let snapshot = h.service.snapshot("bob").await.unwrap();
    assert_eq!(snapshot.total_xp, 40);
    assert_eq!(snapshot.pending_sync, 1);

    let report = h.worker.sync_user("bob").await.unwrap();
    assert_eq!(report.total_xp, 520);
    assert!(report.conflict);
    assert_eq!(h.service.snapshot("bob").await.unwrap().total_xp, 520);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let h = harness(5, None).await;
    award(&h.service, "carol", 15).await;
    h.remote.fail_next(2);

    let report = h.worker.sync_user("carol").await.unwrap();

    assert!(report.attempts >= 3);
    assert_eq!(h.remote.total_xp("carol").await, 15);
}

#[tokio::test]
async fn test_resend_after_lost_fetch_is_not_double_counted() {
    let h = harness(2, None).await;
    award(&h.service, "dana", 25).await;

    // Push lands, fetch never completes
    h.remote.fail_next_fetch(2);
    assert!(h.worker.sync_user("dana").await.is_err());
    assert_eq!(h.service.snapshot("dana").await.unwrap().pending_sync, 1);

    let report = h.worker.sync_user("dana").await.unwrap();
    assert_eq!(report.total_xp, 25);
    assert_eq!(h.remote.total_xp("dana").await, 25);
    assert_eq!(h.remote.transaction_count("dana").await, 1);
}

#[tokio::test]
async fn test_sync_survives_session_reload() {
    let h = harness(3, None).await;
    award(&h.service, "erin", 30).await;
    h.worker.sync_user("erin").await.unwrap();

    h.service.close_session("erin").await.unwrap();
    let snapshot = h.service.open_session("erin").await.unwrap();
    assert_eq!(snapshot.total_xp, 30);
    assert_eq!(snapshot.pending_sync, 0);

    let report = h.worker.sync_user("erin").await.unwrap();
    assert_eq!(report.pushed, 0);
    assert_eq!(h.remote.total_xp("erin").await, 30);
}

#[tokio::test]
async fn test_out_of_order_snapshot_is_discarded() {
    let h = harness(3, None).await;
    award(&h.service, "gail", 40).await;
    let pending = h.service.pending_transactions("gail").await.unwrap();

    let newer = RemoteSnapshot {
        user_id: "gail".to_string(),
        total_xp: 40,
        level: 1,
        streak: 1,
        acknowledged: vec![RemoteAck {
            local_id: pending[0].id.clone(),
            remote_id: "r-1".to_string(),
        }],
        as_of: Utc::now(),
    };
    let older = RemoteSnapshot {
        total_xp: 0,
        acknowledged: Vec::new(),
        as_of: newer.as_of - chrono::Duration::seconds(5),
        ..newer.clone()
    };

    assert!(h.service.apply_remote("gail", newer).await.unwrap().is_some());
    assert!(h.service.apply_remote("gail", older).await.unwrap().is_none());

    let snapshot = h.service.snapshot("gail").await.unwrap();
    assert_eq!(snapshot.total_xp, 40);
    assert_eq!(snapshot.pending_sync, 0);
}

#[tokio::test]
async fn test_worker_runs_on_trigger_until_shutdown() {
    let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_CAPACITY);
    let h = harness(3, Some(trigger_tx)).await;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(Arc::clone(&h.worker).run(shutdown_rx, trigger_rx));

    h.service
        .report_activity(ActivityReport::new("finn", ActivityKind::Manual, 12))
        .await
        .unwrap();

    let mut synced = false;
    for _ in 0..100 {
        if h.remote.total_xp("finn").await == 12
            && h.service.snapshot("finn").await.unwrap().pending_sync == 0
        {
            synced = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(synced);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
}
