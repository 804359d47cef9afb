//! Progression service: the per-user award pipeline.
//!
//! Owns the read-only catalogs, the shared dedup guard and the map of open
//! user sessions. Every mutation for a user runs under that user's mutex,
//! so award application order matches report order. Local state changes
//! are synchronous; persistence and sync happen afterwards and never fail
//! the report.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use progress_shared::achievements::{AchievementCatalog, AchievementUpdate, AchievementView};
use progress_shared::activity::OffPeakWindow;
use progress_shared::challenges::{BoardSizes, ChallengeCatalog, ChallengeInstance, ChallengeType, ProgressResult};
use progress_shared::{
    apply_award, reconcile, ActivityKind, ActivityOutcome, ActivityReport, AwardContext, AwardOutcome,
    AwardRequest, DedupGuard, LedgerSummary, LevelTable, LevelingEngine, MergedState,
    ClaimOutcome, ProgressError, ProgressionSnapshot, RemoteSnapshot, SourceType, XpTransaction,
};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::hooks::{NotificationHub, ProgressNotification};
use crate::state::{create_shared_user, SharedUser, UserProgression};
use crate::store::ProgressStore;

const MAX_USER_ID_LEN: usize = 128;

/// Award pipeline settings derived from the config file
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub cooldown_ms: i64,
    pub streak_bonus_xp: i64,
    pub off_peak: Option<(OffPeakWindow, i64)>,
    pub board_sizes: BoardSizes,
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cooldown_ms: config.awards.dedup_cooldown_ms.max(0),
            streak_bonus_xp: config.awards.streak_bonus_xp,
            off_peak: config.awards.off_peak(),
            board_sizes: config.challenges.board_sizes(),
        }
    }
}

pub struct ProgressionService {
    store: ProgressStore,
    table: Arc<LevelTable>,
    engine: LevelingEngine,
    guard: DedupGuard,
    challenges: ChallengeCatalog,
    achievements: AchievementCatalog,
    settings: ServiceSettings,
    sessions: RwLock<HashMap<String, SharedUser>>,
    hub: NotificationHub,
    sync_trigger: Option<mpsc::Sender<String>>,
}

impl ProgressionService {
    pub fn new(config: &Config, table: Arc<LevelTable>, store: ProgressStore) -> Self {
        Self {
            store,
            engine: LevelingEngine::new(Arc::clone(&table), config.awards.bonus_policy()),
            table,
            guard: DedupGuard::new(),
            challenges: ChallengeCatalog::standard(),
            achievements: AchievementCatalog::standard(),
            settings: ServiceSettings::from_config(config),
            sessions: RwLock::new(HashMap::new()),
            hub: NotificationHub::default(),
            sync_trigger: None,
        }
    }

    /// Ask the sync worker for a pass after local awards
    pub fn with_sync_trigger(mut self, trigger: mpsc::Sender<String>) -> Self {
        self.sync_trigger = Some(trigger);
        self
    }

    pub fn with_catalogs(mut self, challenges: ChallengeCatalog, achievements: AchievementCatalog) -> Self {
        self.challenges = challenges;
        self.achievements = achievements;
        self
    }

    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressNotification> {
        self.hub.subscribe()
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Load the user's state (if not already open) and return a snapshot
    pub async fn open_session(&self, user_id: &str) -> Result<ProgressionSnapshot, ProgressError> {
        let shared = self.session(user_id).await?;
        let user = shared.lock().await;
        Ok(user.snapshot(&self.table, Utc::now()))
    }

    /// Persist and evict. Returns false if no session was open.
    pub async fn close_session(&self, user_id: &str) -> Result<bool, ProgressError> {
        validate_user_id(user_id)?;
        let removed = self.sessions.write().await.remove(user_id);
        let Some(shared) = removed else {
            return Ok(false);
        };

        let mut user = shared.lock().await;
        self.store
            .save_user(user.to_record(&self.table, Utc::now()))
            .await
            .map_err(store_err)?;
        user.mark_saved();
        info!("Closed session for {}", user_id);
        Ok(true)
    }

    /// Persist and evict every open session (daemon shutdown)
    pub async fn close_all(&self) {
        for user_id in self.open_users().await {
            if let Err(e) = self.close_session(&user_id).await {
                error!("Failed to persist {} on shutdown: {}", user_id, e);
            }
        }
    }

    pub async fn open_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        users.sort();
        users
    }

    async fn session(&self, user_id: &str) -> Result<SharedUser, ProgressError> {
        validate_user_id(user_id)?;
        if let Some(shared) = self.sessions.read().await.get(user_id) {
            return Ok(Arc::clone(shared));
        }

        let record = self.store.load_user(user_id).await.map_err(store_err)?;
        let mut sessions = self.sessions.write().await;
        // Another request may have opened it while we were loading
        if let Some(shared) = sessions.get(user_id) {
            return Ok(Arc::clone(shared));
        }

        if record.is_new() {
            info!("Opened session for new user {}", user_id);
        } else {
            info!(
                "Opened session for {} ({} transactions)",
                user_id,
                record.transactions.len()
            );
        }
        let shared = create_shared_user(UserProgression::from_record(record));
        sessions.insert(user_id.to_string(), Arc::clone(&shared));
        Ok(shared)
    }

    // ------------------------------------------------------------------
    // Awards
    // ------------------------------------------------------------------

    /// `reportActivity`: the only call that can fail in front of a user,
    /// and only for an invalid award or user id.
    pub async fn report_activity(&self, report: ActivityReport) -> Result<ActivityOutcome, ProgressError> {
        report.validate()?;
        let shared = self.session(&report.user_id).await?;
        let now = Utc::now();

        let mut user = shared.lock().await;
        let (outcome, notifications) = self.apply_activity(&mut user, &report, now)?;
        self.persist(&mut user, now).await;
        drop(user);

        self.publish_all(notifications);
        if !outcome.award.is_noop() {
            self.request_sync(&report.user_id);
        }
        Ok(outcome)
    }

    /// Direct award (admin tools, other subsystems)
    pub async fn award(&self, user_id: &str, request: AwardRequest) -> Result<AwardOutcome, ProgressError> {
        request.validate()?;
        let shared = self.session(user_id).await?;
        let now = Utc::now();

        let mut user = shared.lock().await;
        let outcome = self.apply(&mut user, request, now)?;
        let completed = record_xp_earned(&mut user, &outcome, now);
        let mut notifications = level_up_notifications(user_id, &outcome);
        notifications.extend(completed_notifications(user_id, completed));
        self.persist(&mut user, now).await;
        drop(user);

        self.publish_all(notifications);
        if !outcome.is_noop() {
            self.request_sync(user_id);
        }
        Ok(outcome)
    }

    fn apply_activity(
        &self,
        user: &mut UserProgression,
        report: &ActivityReport,
        now: DateTime<Utc>,
    ) -> Result<(ActivityOutcome, Vec<ProgressNotification>), ProgressError> {
        if let Some(offset) = report.context.utc_offset_minutes {
            user.utc_offset_minutes = offset;
        }
        let ended_at = report.ended_at_or(now);
        let today = user.local_date(now);
        self.ensure_board(user, today, false);

        let session_id = match report.kind {
            ActivityKind::StudySession => report.context.session_id.as_deref(),
            _ => None,
        };
        let seen_session = session_id.is_some_and(|id| user.has_session(id));

        let mut award = AwardOutcome {
            total_xp: user.total_xp(),
            ..Default::default()
        };
        if !seen_session {
            if let Some(request) = report.award_request() {
                award.merge(self.apply(user, request, now)?);
            }
        }
        let redelivered = seen_session || (award.applied.is_empty() && !award.suppressed.is_empty());

        let mut completed = Vec::new();
        if redelivered {
            debug!(
                "Ignoring re-delivered {} report for {}",
                report.kind.as_str(),
                user.user_id
            );
        } else {
            if let Some(id) = session_id {
                user.note_session(id);
            }
            match report.kind {
                ActivityKind::CourseAdded => user.course_count += 1,
                ActivityKind::NoteCreated => user.note_count += 1,
                _ => {}
            }

            if report.kind.qualifies_for_streak() {
                let date = user.local_date(ended_at);
                let is_session = report.kind == ActivityKind::StudySession;
                let new_day = user.record_day(date, report.context.minutes, is_session);
                if new_day && date == today {
                    if let Some(bonus) = self.streak_bonus(user, date, now) {
                        award.merge(self.apply(user, bonus, now)?);
                    }
                }
            }

            if let Some(bonus) = self.off_peak_bonus(user, report, ended_at) {
                award.merge(self.apply(user, bonus, now)?);
            }

            if report.context.minutes > 0 {
                completed.extend(user.board.record(
                    ChallengeType::StudyMinutes,
                    clamp_i64(report.context.minutes),
                    now,
                ));
            }
            if let Some(challenge_type) = report.kind.challenge_type() {
                completed.extend(user.board.record(challenge_type, 1, now));
            }
        }
        completed.extend(record_xp_earned(user, &award, now));

        let metrics = user.metrics(now);
        let updates = user.achievements.evaluate(&self.achievements, &metrics, now);

        let mut notifications = level_up_notifications(&user.user_id, &award);
        notifications.extend(completed_notifications(&user.user_id, completed.clone()));
        for update in updates.iter().filter(|u| u.newly_unlocked) {
            let name = self
                .achievements
                .get(&update.achievement_id)
                .map(|d| d.name)
                .unwrap_or_default();
            notifications.push(ProgressNotification::AchievementUnlocked {
                user_id: user.user_id.clone(),
                achievement_id: update.achievement_id.clone(),
                name: name.to_string(),
            });
        }

        let outcome = ActivityOutcome {
            award,
            redelivered,
            streak: user.streaks(now),
            completed_challenges: completed,
            achievement_updates: updates,
            snapshot: user.snapshot(&self.table, now),
        };
        Ok((outcome, notifications))
    }

    /// Daily streak bonus for the first qualifying activity on `date`
    fn streak_bonus(&self, user: &UserProgression, date: NaiveDate, now: DateTime<Utc>) -> Option<AwardRequest> {
        if self.settings.streak_bonus_xp <= 0 {
            return None;
        }
        let streak = user.streaks(now).current_streak;
        (streak >= 2).then(|| {
            AwardRequest::new(SourceType::DailyStreak, self.settings.streak_bonus_xp)
                .with_source_id(date.to_string())
                .with_metadata("streak", streak)
        })
    }

    fn off_peak_bonus(
        &self,
        user: &UserProgression,
        report: &ActivityReport,
        ended_at: DateTime<Utc>,
    ) -> Option<AwardRequest> {
        let (window, xp) = self.settings.off_peak?;
        if report.kind != ActivityKind::StudySession {
            return None;
        }
        let session_id = report.context.session_id.as_ref()?;
        window
            .contains(ended_at, user.utc_offset_minutes)
            .then(|| AwardRequest::new(SourceType::OffPeakBonus, xp).with_source_id(session_id.clone()))
    }

    fn apply(
        &self,
        user: &mut UserProgression,
        request: AwardRequest,
        now: DateTime<Utc>,
    ) -> Result<AwardOutcome, ProgressError> {
        let ctx = AwardContext {
            guard: &self.guard,
            engine: &self.engine,
            cooldown_ms: self.settings.cooldown_ms,
            now,
        };
        let current_total = user.total_xp();
        apply_award(&mut user.ledger, &mut user.cascade, &ctx, current_total, request)
    }

    fn ensure_board(&self, user: &mut UserProgression, today: NaiveDate, refresh: bool) -> usize {
        let mut rng = rand::thread_rng();
        let created = user.board.assign(
            &self.challenges,
            self.settings.board_sizes,
            today,
            refresh,
            &mut rng,
        );
        if created > 0 {
            debug!("Assigned {} challenges to {}", created, user.user_id);
        }
        created
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// `getProgressionSnapshot`
    pub async fn snapshot(&self, user_id: &str) -> Result<ProgressionSnapshot, ProgressError> {
        let shared = self.session(user_id).await?;
        let user = shared.lock().await;
        Ok(user.snapshot(&self.table, Utc::now()))
    }

    /// Most recent transactions first
    pub async fn transactions(&self, user_id: &str, limit: usize) -> Result<Vec<XpTransaction>, ProgressError> {
        let shared = self.session(user_id).await?;
        let user = shared.lock().await;
        Ok(user.ledger.recent(limit))
    }

    pub async fn ledger_summary(&self, user_id: &str) -> Result<LedgerSummary, ProgressError> {
        let shared = self.session(user_id).await?;
        let user = shared.lock().await;
        Ok(user.ledger.summary())
    }

    // ------------------------------------------------------------------
    // Challenges
    // ------------------------------------------------------------------

    /// Current board, assigning the day's instances if needed
    pub async fn challenges(&self, user_id: &str) -> Result<Vec<ChallengeInstance>, ProgressError> {
        self.assign_board(user_id, false).await
    }

    pub async fn refresh_challenges(&self, user_id: &str) -> Result<Vec<ChallengeInstance>, ProgressError> {
        self.assign_board(user_id, true).await
    }

    async fn assign_board(&self, user_id: &str, refresh: bool) -> Result<Vec<ChallengeInstance>, ProgressError> {
        let shared = self.session(user_id).await?;
        let now = Utc::now();
        let mut user = shared.lock().await;
        let today = user.local_date(now);
        if self.ensure_board(&mut user, today, refresh) > 0 || refresh {
            self.persist(&mut user, now).await;
        }
        Ok(user.board.instances().to_vec())
    }

    /// Manual progress on one instance. `None` if the id is unknown.
    pub async fn progress_challenge(
        &self,
        user_id: &str,
        challenge_id: &str,
        delta: i64,
    ) -> Result<Option<ChallengeInstance>, ProgressError> {
        let shared = self.session(user_id).await?;
        let now = Utc::now();
        let mut user = shared.lock().await;

        let result = user.board.progress(challenge_id, delta, now);
        let instance = user.board.get(challenge_id).cloned();
        if result != ProgressResult::Ignored {
            self.persist(&mut user, now).await;
        }
        drop(user);

        if let (ProgressResult::Completed, Some(instance)) = (result, &instance) {
            self.hub.publish(ProgressNotification::ChallengeCompleted {
                user_id: user_id.to_string(),
                instance: instance.clone(),
            });
        }
        Ok(instance)
    }

    /// Claim a completed challenge. Claiming twice is a silent no-op.
    pub async fn claim_challenge(&self, user_id: &str, challenge_id: &str) -> Result<ClaimOutcome, ProgressError> {
        let shared = self.session(user_id).await?;
        let now = Utc::now();
        let mut user = shared.lock().await;

        let Some(request) = user.board.claim(challenge_id, now) else {
            debug!("Challenge {} not claimable for {}", challenge_id, user_id);
            return Ok(ClaimOutcome {
                claimed: false,
                award: AwardOutcome {
                    total_xp: user.total_xp(),
                    ..Default::default()
                },
            });
        };
        self.claim_with(user, user_id, request, now).await
    }

    // ------------------------------------------------------------------
    // Achievements
    // ------------------------------------------------------------------

    pub async fn achievements(&self, user_id: &str) -> Result<Vec<AchievementView>, ProgressError> {
        let shared = self.session(user_id).await?;
        let now = Utc::now();
        let mut user = shared.lock().await;
        let metrics = user.metrics(now);
        if !user.achievements.evaluate(&self.achievements, &metrics, now).is_empty() {
            self.persist(&mut user, now).await;
        }
        Ok(user.achievements.view(&self.achievements))
    }

    /// Claim an unlocked achievement. Claiming twice is a silent no-op.
    pub async fn claim_achievement(&self, user_id: &str, achievement_id: &str) -> Result<ClaimOutcome, ProgressError> {
        let shared = self.session(user_id).await?;
        let now = Utc::now();
        let mut user = shared.lock().await;

        let Some(request) = user.achievements.claim(&self.achievements, achievement_id, now) else {
            debug!("Achievement {} not claimable for {}", achievement_id, user_id);
            return Ok(ClaimOutcome {
                claimed: false,
                award: AwardOutcome {
                    total_xp: user.total_xp(),
                    ..Default::default()
                },
            });
        };
        self.claim_with(user, user_id, request, now).await
    }

    async fn claim_with(
        &self,
        mut user: tokio::sync::MutexGuard<'_, UserProgression>,
        user_id: &str,
        request: AwardRequest,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, ProgressError> {
        let award = self.apply(&mut user, request, now)?;
        let completed = record_xp_earned(&mut user, &award, now);
        let mut notifications = level_up_notifications(user_id, &award);
        notifications.extend(completed_notifications(user_id, completed));
        self.persist(&mut user, now).await;
        drop(user);

        self.publish_all(notifications);
        if !award.is_noop() {
            self.request_sync(user_id);
        }
        Ok(ClaimOutcome {
            claimed: true,
            award,
        })
    }

    // ------------------------------------------------------------------
    // Sync support
    // ------------------------------------------------------------------

    pub async fn pending_transactions(&self, user_id: &str) -> Result<Vec<XpTransaction>, ProgressError> {
        let shared = self.session(user_id).await?;
        let user = shared.lock().await;
        Ok(user.pending_transactions())
    }

    /// Reconcile against a complete remote snapshot and adopt the result.
    /// Returns `None` when a newer snapshot was already adopted.
    pub async fn apply_remote(
        &self,
        user_id: &str,
        remote: RemoteSnapshot,
    ) -> Result<Option<MergedState>, ProgressError> {
        let shared = self.session(user_id).await?;
        let mut user = shared.lock().await;

        if user.sync.is_stale(&remote) {
            debug!(
                "Discarding snapshot for {} taken at {}, already synced to {:?}",
                user_id, remote.as_of, user.sync.last_synced_at
            );
            return Ok(None);
        }

        let merged = reconcile(&user.sync, user.ledger.transactions(), &remote, &self.table);
        user.sync.adopt(&merged);
        self.persist(&mut user, merged.synced_at).await;

        debug!(
            "Reconciled {}: baseline {}, total {}, {} still queued",
            user_id,
            merged.baseline,
            merged.total_xp,
            merged.retained.len()
        );
        Ok(Some(merged))
    }

    /// Non-blocking; dropped when no worker runs or its queue is full
    pub fn request_sync(&self, user_id: &str) -> bool {
        match &self.sync_trigger {
            Some(tx) => tx.try_send(user_id.to_string()).is_ok(),
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn persist(&self, user: &mut UserProgression, now: DateTime<Utc>) {
        match self.store.save_user(user.to_record(&self.table, now)).await {
            Ok(()) => user.mark_saved(),
            Err(e) => error!("Failed to persist progression for {}: {:#}", user.user_id, e),
        }
    }

    fn publish_all(&self, notifications: Vec<ProgressNotification>) {
        for notification in notifications {
            self.hub.publish(notification);
        }
    }
}

fn record_xp_earned(user: &mut UserProgression, award: &AwardOutcome, now: DateTime<Utc>) -> Vec<ChallengeInstance> {
    let earned = award.xp_delta();
    if earned > 0 {
        user.board.record(ChallengeType::XpEarned, earned, now)
    } else {
        Vec::new()
    }
}

fn level_up_notifications(user_id: &str, award: &AwardOutcome) -> Vec<ProgressNotification> {
    award
        .level_ups
        .iter()
        .map(|event| ProgressNotification::LevelUp {
            user_id: user_id.to_string(),
            event: event.clone(),
        })
        .collect()
}

fn completed_notifications(user_id: &str, completed: Vec<ChallengeInstance>) -> Vec<ProgressNotification> {
    completed
        .into_iter()
        .map(|instance| ProgressNotification::ChallengeCompleted {
            user_id: user_id.to_string(),
            instance,
        })
        .collect()
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Identity scoping: non-empty, bounded, URL-safe
pub fn validate_user_id(user_id: &str) -> Result<(), ProgressError> {
    let valid = !user_id.is_empty()
        && user_id.len() <= MAX_USER_ID_LEN
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
    if valid {
        Ok(())
    } else {
        Err(ProgressError::UnknownUser(user_id.to_string()))
    }
}

fn store_err(e: anyhow::Error) -> ProgressError {
    ProgressError::Store(format!("{:#}", e))
}
