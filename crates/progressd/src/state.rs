//! Per-user progression state.
//!
//! One `UserProgression` per open session, behind its own async mutex so
//! all mutations for a user are serialized while different users proceed
//! in parallel.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use progress_shared::achievements::{AchievementBook, ActivityMetrics};
use progress_shared::challenges::ChallengeBoard;
use progress_shared::leveling::CascadeGuard;
use progress_shared::levels::LevelTable;
use progress_shared::reconcile::SyncState;
use progress_shared::streaks::{activity_date, calculate_streaks, offset_from_minutes, StreakStats};
use progress_shared::{ProgressionSnapshot, XpLedger, XpTransaction};
use tokio::sync::Mutex;

use crate::store::{DayActivity, StoredTransaction, SummaryRow, UserRecord};

pub struct UserProgression {
    pub user_id: String,
    pub ledger: XpLedger,
    pub sync: SyncState,
    pub board: ChallengeBoard,
    pub achievements: AchievementBook,
    pub cascade: CascadeGuard,
    pub days: BTreeMap<NaiveDate, DayActivity>,
    pub course_count: u64,
    pub note_count: u64,
    /// Minutes east of UTC, from the latest report that carried one
    pub utc_offset_minutes: i32,
    /// Study session ids already counted toward days and challenges
    sessions: HashSet<String>,
    unsaved_sessions: Vec<String>,
    /// Ledger prefix already written to the store
    saved_transactions: usize,
    saved_acks: HashSet<String>,
}

impl UserProgression {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ledger: XpLedger::new(user_id),
            sync: SyncState::default(),
            board: ChallengeBoard::new(),
            achievements: AchievementBook::new(),
            cascade: CascadeGuard::default(),
            days: BTreeMap::new(),
            course_count: 0,
            note_count: 0,
            utc_offset_minutes: 0,
            sessions: HashSet::new(),
            unsaved_sessions: Vec::new(),
            saved_transactions: 0,
            saved_acks: HashSet::new(),
        }
    }

    pub fn from_record(record: UserRecord) -> Self {
        let mut user = Self::new(&record.user_id);

        let mut transactions = Vec::with_capacity(record.transactions.len());
        for stored in record.transactions {
            if let Some(remote_id) = stored.remote_id {
                user.sync
                    .acknowledged
                    .insert(stored.transaction.id.clone(), remote_id);
            }
            transactions.push(stored.transaction);
        }
        user.ledger = XpLedger::from_transactions(&record.user_id, transactions);
        user.saved_transactions = user.ledger.len();
        user.saved_acks = user.sync.acknowledged.keys().cloned().collect();

        if let Some(summary) = record.summary {
            user.sync.baseline = summary.baseline_xp;
            user.sync.remote_streak = summary.remote_streak;
            user.sync.last_synced_at = summary.last_synced_at;
            user.course_count = summary.course_count;
            user.note_count = summary.note_count;
            user.utc_offset_minutes = summary.utc_offset_minutes;
        }

        user.board = ChallengeBoard::from_instances(record.challenges);
        user.achievements = AchievementBook::from_states(record.achievements);
        user.days = record.days.into_iter().collect();
        user.sessions = record.sessions.into_iter().collect();
        user
    }

    /// Record to save at `now`. Carries only the transactions and session
    /// ids not yet written (plus newly acknowledged transactions); the rest
    /// of the state is written whole.
    pub fn to_record(&self, table: &LevelTable, now: DateTime<Utc>) -> UserRecord {
        let total_xp = self.total_xp();
        let transactions = self
            .ledger
            .transactions()
            .iter()
            .enumerate()
            .filter_map(|(i, t)| {
                let remote_id = self.sync.acknowledged.get(&t.id);
                let unsaved_ack = remote_id.is_some() && !self.saved_acks.contains(&t.id);
                (i >= self.saved_transactions || unsaved_ack).then(|| StoredTransaction {
                    transaction: t.clone(),
                    remote_id: remote_id.cloned(),
                })
            })
            .collect();
        UserRecord {
            user_id: self.user_id.clone(),
            summary: Some(SummaryRow {
                baseline_xp: self.sync.baseline,
                remote_streak: self.sync.remote_streak,
                total_xp,
                level: table.level_for(total_xp),
                streak: self.streaks(now).current_streak,
                course_count: self.course_count,
                note_count: self.note_count,
                utc_offset_minutes: self.utc_offset_minutes,
                last_synced_at: self.sync.last_synced_at,
                updated_at: now,
            }),
            transactions,
            challenges: self.board.instances().to_vec(),
            achievements: self.achievements.states().cloned().collect(),
            days: self.days.iter().map(|(d, a)| (*d, *a)).collect(),
            sessions: self.unsaved_sessions.clone(),
        }
    }

    /// Everything in the last `to_record` reached the store
    pub fn mark_saved(&mut self) {
        self.saved_transactions = self.ledger.len();
        self.saved_acks = self.sync.acknowledged.keys().cloned().collect();
        self.unsaved_sessions.clear();
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        self.sessions.contains(session_id)
    }

    /// Returns false if the session was already counted
    pub fn note_session(&mut self, session_id: &str) -> bool {
        let added = self.sessions.insert(session_id.to_string());
        if added {
            self.unsaved_sessions.push(session_id.to_string());
        }
        added
    }

    /// Effective total: remote baseline plus unacknowledged local awards
    pub fn total_xp(&self) -> i64 {
        self.sync.effective_total(self.ledger.transactions())
    }

    pub fn pending_transactions(&self) -> Vec<XpTransaction> {
        self.sync
            .pending(self.ledger.transactions())
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        activity_date(at, offset_from_minutes(self.utc_offset_minutes))
    }

    pub fn activity_dates(&self) -> BTreeSet<NaiveDate> {
        self.days.keys().copied().collect()
    }

    pub fn streaks(&self, now: DateTime<Utc>) -> StreakStats {
        calculate_streaks(&self.activity_dates(), self.local_date(now))
    }

    /// Record qualifying activity on `date`. Returns true if the date is new.
    pub fn record_day(&mut self, date: NaiveDate, minutes: u64, session: bool) -> bool {
        let is_new = !self.days.contains_key(&date);
        let day = self.days.entry(date).or_default();
        day.minutes = day.minutes.saturating_add(minutes);
        if session {
            day.sessions = day.sessions.saturating_add(1);
        }
        is_new
    }

    pub fn metrics(&self, now: DateTime<Utc>) -> ActivityMetrics {
        let today = self.local_date(now);
        let week = today.iso_week();
        let streaks = self.streaks(now);

        let mut metrics = ActivityMetrics {
            course_count: self.course_count,
            note_count: self.note_count,
            current_streak: u64::from(streaks.current_streak),
            longest_streak: u64::from(streaks.longest_streak),
            ..Default::default()
        };
        for (date, day) in &self.days {
            metrics.total_sessions = metrics.total_sessions.saturating_add(day.sessions);
            metrics.total_study_minutes = metrics.total_study_minutes.saturating_add(day.minutes);
            if *date == today {
                metrics.daily_study_minutes = metrics.daily_study_minutes.saturating_add(day.minutes);
            }
            if date.iso_week() == week {
                metrics.weekly_study_minutes = metrics.weekly_study_minutes.saturating_add(day.minutes);
            }
            if date.year() == today.year() && date.month() == today.month() {
                metrics.monthly_study_minutes = metrics.monthly_study_minutes.saturating_add(day.minutes);
            }
        }
        metrics
    }

    pub fn snapshot(&self, table: &LevelTable, now: DateTime<Utc>) -> ProgressionSnapshot {
        let mut snapshot =
            ProgressionSnapshot::new(&self.user_id, table.classify(self.total_xp()), self.streaks(now));
        snapshot.unclaimed_achievements = self
            .achievements
            .unclaimed()
            .iter()
            .map(|s| s.achievement_id.clone())
            .collect();
        snapshot.unclaimed_challenges = self
            .board
            .unclaimed()
            .iter()
            .map(|c| c.id.clone())
            .collect();
        snapshot.pending_sync = self.sync.pending(self.ledger.transactions()).len();
        snapshot.last_synced_at = self.sync.last_synced_at;
        snapshot
    }
}

/// Thread-safe handle to one user's state
pub type SharedUser = Arc<Mutex<UserProgression>>;

pub fn create_shared_user(user: UserProgression) -> SharedUser {
    Arc::new(Mutex::new(user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use progress_shared::{AwardRequest, SourceType};

    #[test]
    fn test_record_day_reports_new_dates() {
        let mut user = UserProgression::new("u1");
        let day = NaiveDate::from_ymd_opt(2026, 4, 2).unwrap();
        assert!(user.record_day(day, 30, true));
        assert!(!user.record_day(day, 15, true));
        assert_eq!(user.days[&day].minutes, 45);
        assert_eq!(user.days[&day].sessions, 2);
    }

    #[test]
    fn test_record_day_saturates() {
        let mut user = UserProgression::new("u1");
        let now = Utc.with_ymd_and_hms(2026, 4, 2, 12, 0, 0).unwrap();
        let day = now.date_naive();
        user.record_day(day, u64::MAX, true);
        user.record_day(day, 5, true);
        user.record_day(day - Duration::days(1), 5, true);
        assert_eq!(user.days[&day].minutes, u64::MAX);

        let m = user.metrics(now);
        assert_eq!(m.total_study_minutes, u64::MAX);
        assert_eq!(m.weekly_study_minutes, u64::MAX);
        assert_eq!(m.total_sessions, 3);
    }

    #[test]
    fn test_metrics_windows() {
        let mut user = UserProgression::new("u1");
        let now = Utc.with_ymd_and_hms(2026, 4, 15, 12, 0, 0).unwrap();
        let today = now.date_naive();
        user.record_day(today, 30, true);
        user.record_day(today - Duration::days(1), 20, true);
        user.record_day(today - Duration::days(20), 60, true);

        let m = user.metrics(now);
        assert_eq!(m.total_sessions, 3);
        assert_eq!(m.total_study_minutes, 110);
        assert_eq!(m.daily_study_minutes, 30);
        assert_eq!(m.weekly_study_minutes, 50);
        assert_eq!(m.monthly_study_minutes, 50);
        assert_eq!(m.current_streak, 2);
    }

    #[test]
    fn test_record_round_trip() {
        let mut user = UserProgression::new("u1");
        let now = Utc::now();
        user.ledger
            .append(AwardRequest::new(SourceType::Manual, 40), now)
            .unwrap();
        let id = user.ledger.transactions()[0].id.clone();
        user.sync.acknowledged.insert(id.clone(), "r-1".into());
        user.sync.baseline = Some(40);
        user.sync.remote_streak = Some(6);
        user.note_count = 3;
        assert!(user.note_session("s-1"));
        assert!(!user.note_session("s-1"));

        let record = user.to_record(&LevelTable::standard(), now);
        let restored = UserProgression::from_record(record);
        assert_eq!(restored.total_xp(), 40);
        assert!(restored.sync.is_acknowledged(&id));
        assert_eq!(restored.sync.remote_streak, Some(6));
        assert_eq!(restored.note_count, 3);
        assert!(restored.has_session("s-1"));
        assert!(restored.pending_transactions().is_empty());
    }

    #[test]
    fn test_saved_rows_are_not_resent() {
        let table = LevelTable::standard();
        let mut user = UserProgression::new("u1");
        let now = Utc::now();
        for source in ["a", "b"] {
            user.ledger
                .append(AwardRequest::new(SourceType::Manual, 10).with_source_id(source), now)
                .unwrap();
        }
        user.note_session("s-1");
        assert_eq!(user.to_record(&table, now).transactions.len(), 2);
        user.mark_saved();

        let record = user.to_record(&table, now);
        assert!(record.transactions.is_empty());
        assert!(record.sessions.is_empty());

        // A later acknowledgement resends just that row
        let first = user.ledger.transactions()[0].id.clone();
        user.sync.acknowledged.insert(first.clone(), "r-1".into());
        user.ledger
            .append(AwardRequest::new(SourceType::Manual, 10).with_source_id("c"), now)
            .unwrap();
        let record = user.to_record(&table, now);
        assert_eq!(record.transactions.len(), 2);
        assert_eq!(record.transactions[0].transaction.id, first);
        assert_eq!(record.transactions[0].remote_id.as_deref(), Some("r-1"));
    }
}
