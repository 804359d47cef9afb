//! Daily challenge state machine v0.3.0
//!
//! Per-user board of challenge instances sampled from a read-only template
//! catalog, partitioned by cadence:
//!
//! - daily: period = local date (`2026-10-17`)
//! - weekly: period = ISO week (`2026-W42`)
//! - seasonal: period = quarter (`2026-Q4`)
//!
//! Instance lifecycle: `not_started → in_progress → completed`, with a
//! one-way `claimed` flag reachable only from `completed`. Every transition
//! on an invalid precondition is a silent no-op.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::transaction::{AwardRequest, SourceType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeType {
    StudyMinutes,
    SessionsCount,
    LessonsCompleted,
    QuizzesCompleted,
    XpEarned,
}

impl ChallengeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeType::StudyMinutes => "study_minutes",
            ChallengeType::SessionsCount => "sessions_count",
            ChallengeType::LessonsCompleted => "lessons_completed",
            ChallengeType::QuizzesCompleted => "quizzes_completed",
            ChallengeType::XpEarned => "xp_earned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "study_minutes" => Some(ChallengeType::StudyMinutes),
            "sessions_count" => Some(ChallengeType::SessionsCount),
            "lessons_completed" => Some(ChallengeType::LessonsCompleted),
            "quizzes_completed" => Some(ChallengeType::QuizzesCompleted),
            "xp_earned" => Some(ChallengeType::XpEarned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Daily,
    Weekly,
    Seasonal,
}

impl Cadence {
    pub const ALL: [Cadence; 3] = [Cadence::Daily, Cadence::Weekly, Cadence::Seasonal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Daily => "daily",
            Cadence::Weekly => "weekly",
            Cadence::Seasonal => "seasonal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Cadence::ALL.iter().copied().find(|c| c.as_str() == s)
    }

    /// Period an instance of this cadence belongs to on `date`
    pub fn period_key(&self, date: NaiveDate) -> String {
        match self {
            Cadence::Daily => date.format("%Y-%m-%d").to_string(),
            Cadence::Weekly => {
                let week = date.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            Cadence::Seasonal => format!("{}-Q{}", date.year(), (date.month() - 1) / 3 + 1),
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "easy" => Some(Difficulty::Easy),
            "medium" => Some(Difficulty::Medium),
            "hard" => Some(Difficulty::Hard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeTemplate {
    pub key: String,
    pub title: String,
    pub challenge_type: ChallengeType,
    pub cadence: Cadence,
    pub target_value: u64,
    pub xp_reward: i64,
    pub difficulty: Difficulty,
}

impl ChallengeTemplate {
    fn new(
        key: &str,
        title: &str,
        challenge_type: ChallengeType,
        cadence: Cadence,
        target_value: u64,
        xp_reward: i64,
        difficulty: Difficulty,
    ) -> Self {
        Self {
            key: key.to_string(),
            title: title.to_string(),
            challenge_type,
            cadence,
            target_value,
            xp_reward,
            difficulty,
        }
    }
}

/// Read-only template catalog, loaded once at startup
#[derive(Debug, Clone, Default)]
pub struct ChallengeCatalog {
    templates: Vec<ChallengeTemplate>,
}

impl ChallengeCatalog {
    pub fn new(templates: Vec<ChallengeTemplate>) -> Self {
        Self { templates }
    }

    pub fn standard() -> Self {
        use Cadence::*;
        use ChallengeType::*;
        use Difficulty::*;
        Self::new(vec![
            // Daily
            ChallengeTemplate::new("study_15", "Study for 15 minutes", StudyMinutes, Daily, 15, 20, Easy),
            ChallengeTemplate::new("study_45", "Study for 45 minutes", StudyMinutes, Daily, 45, 40, Medium),
            ChallengeTemplate::new("sessions_2", "Complete 2 study sessions", SessionsCount, Daily, 2, 20, Easy),
            ChallengeTemplate::new("lessons_3", "Finish 3 lessons", LessonsCompleted, Daily, 3, 35, Medium),
            ChallengeTemplate::new("quiz_1", "Take a quiz", QuizzesCompleted, Daily, 1, 15, Easy),
            ChallengeTemplate::new("xp_150", "Earn 150 XP", XpEarned, Daily, 150, 50, Hard),
            // Weekly
            ChallengeTemplate::new("study_300", "Study for 5 hours", StudyMinutes, Weekly, 300, 150, Medium),
            ChallengeTemplate::new("sessions_10", "Complete 10 study sessions", SessionsCount, Weekly, 10, 120, Medium),
            ChallengeTemplate::new("lessons_15", "Finish 15 lessons", LessonsCompleted, Weekly, 15, 200, Hard),
            ChallengeTemplate::new("quizzes_5", "Take 5 quizzes", QuizzesCompleted, Weekly, 5, 100, Medium),
            // Seasonal
            ChallengeTemplate::new("study_3000", "Study for 50 hours", StudyMinutes, Seasonal, 3_000, 1_000, Hard),
            ChallengeTemplate::new("sessions_60", "Complete 60 study sessions", SessionsCount, Seasonal, 60, 800, Hard),
        ])
    }

    pub fn templates(&self) -> &[ChallengeTemplate] {
        &self.templates
    }

    pub fn for_cadence(&self, cadence: Cadence) -> Vec<&ChallengeTemplate> {
        self.templates.iter().filter(|t| t.cadence == cadence).collect()
    }
}

/// How many instances of each cadence a board holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSizes {
    pub daily: usize,
    pub weekly: usize,
    pub seasonal: usize,
}

impl BoardSizes {
    pub fn for_cadence(&self, cadence: Cadence) -> usize {
        match cadence {
            Cadence::Daily => self.daily,
            Cadence::Weekly => self.weekly,
            Cadence::Seasonal => self.seasonal,
        }
    }
}

impl Default for BoardSizes {
    fn default() -> Self {
        Self {
            daily: 3,
            weekly: 2,
            seasonal: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    NotStarted,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeInstance {
    /// `<cadence>-<period>-<template key>`
    pub id: String,
    pub template_key: String,
    pub title: String,
    pub challenge_type: ChallengeType,
    pub cadence: Cadence,
    pub period: String,
    pub target_value: u64,
    pub xp_reward: i64,
    pub difficulty: Difficulty,
    /// Clamped to `[0, target_value]`
    pub current_progress: u64,
    pub is_completed: bool,
    pub is_claimed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub assigned_on: NaiveDate,
}

impl ChallengeInstance {
    pub fn from_template(template: &ChallengeTemplate, date: NaiveDate) -> Self {
        let period = template.cadence.period_key(date);
        Self {
            id: format!("{}-{}-{}", template.cadence, period, template.key),
            template_key: template.key.clone(),
            title: template.title.clone(),
            challenge_type: template.challenge_type,
            cadence: template.cadence,
            period,
            target_value: template.target_value,
            xp_reward: template.xp_reward,
            difficulty: template.difficulty,
            current_progress: 0,
            is_completed: false,
            is_claimed: false,
            completed_at: None,
            claimed_at: None,
            assigned_on: date,
        }
    }

    pub fn status(&self) -> ChallengeStatus {
        if self.is_completed {
            ChallengeStatus::Completed
        } else if self.current_progress > 0 {
            ChallengeStatus::InProgress
        } else {
            ChallengeStatus::NotStarted
        }
    }

    pub fn is_claimable(&self) -> bool {
        self.is_completed && !self.is_claimed
    }

    fn advance(&mut self, delta: i64, now: DateTime<Utc>) -> ProgressResult {
        if delta <= 0 || self.is_completed {
            return ProgressResult::Ignored;
        }
        self.current_progress = self
            .current_progress
            .saturating_add(delta as u64)
            .min(self.target_value);
        if self.current_progress >= self.target_value {
            self.is_completed = true;
            self.completed_at = Some(now);
            ProgressResult::Completed
        } else {
            ProgressResult::Advanced
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressResult {
    Ignored,
    Advanced,
    Completed,
}

/// One user's challenge board
#[derive(Debug, Clone, Default)]
pub struct ChallengeBoard {
    instances: Vec<ChallengeInstance>,
}

impl ChallengeBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_instances(instances: Vec<ChallengeInstance>) -> Self {
        Self { instances }
    }

    pub fn instances(&self) -> &[ChallengeInstance] {
        &self.instances
    }

    pub fn get(&self, id: &str) -> Option<&ChallengeInstance> {
        self.instances.iter().find(|i| i.id == id)
    }

    pub fn unclaimed(&self) -> Vec<&ChallengeInstance> {
        self.instances.iter().filter(|i| i.is_claimable()).collect()
    }

    /// Populate every cadence whose current period has no instances yet.
    ///
    /// Idempotent per period unless `refresh` is set, in which case the
    /// not-yet-completed instances of the current period are resampled.
    /// Completed and claimed instances are never dropped within their
    /// period; instances from past periods are pruned. Returns how many
    /// instances were created.
    pub fn assign<R: Rng + ?Sized>(
        &mut self,
        catalog: &ChallengeCatalog,
        sizes: BoardSizes,
        date: NaiveDate,
        refresh: bool,
        rng: &mut R,
    ) -> usize {
        let mut created = 0;

        for cadence in Cadence::ALL {
            let period = cadence.period_key(date);
            self.instances
                .retain(|i| i.cadence != cadence || i.period == period);

            let has_current = self.instances.iter().any(|i| i.cadence == cadence);
            if has_current && !refresh {
                continue;
            }
            if refresh {
                self.instances
                    .retain(|i| i.cadence != cadence || i.is_completed);
            }

            let kept: HashSet<String> = self
                .instances
                .iter()
                .filter(|i| i.cadence == cadence)
                .map(|i| i.template_key.clone())
                .collect();
            let wanted = sizes.for_cadence(cadence).saturating_sub(kept.len());
            if wanted == 0 {
                continue;
            }

            let candidates: Vec<&ChallengeTemplate> = catalog
                .for_cadence(cadence)
                .into_iter()
                .filter(|t| !kept.contains(&t.key))
                .collect();

            for template in candidates.choose_multiple(rng, wanted) {
                self.instances
                    .push(ChallengeInstance::from_template(template, date));
                created += 1;
            }
        }

        created
    }

    pub fn progress(&mut self, id: &str, delta: i64, now: DateTime<Utc>) -> ProgressResult {
        match self.instances.iter_mut().find(|i| i.id == id) {
            Some(instance) => instance.advance(delta, now),
            None => ProgressResult::Ignored,
        }
    }

    /// Feed an activity amount to every instance of `challenge_type`.
    /// Returns the instances this call completed.
    pub fn record(
        &mut self,
        challenge_type: ChallengeType,
        delta: i64,
        now: DateTime<Utc>,
    ) -> Vec<ChallengeInstance> {
        self.instances
            .iter_mut()
            .filter(|i| i.challenge_type == challenge_type)
            .filter_map(|i| match i.advance(delta, now) {
                ProgressResult::Completed => Some(i.clone()),
                _ => None,
            })
            .collect()
    }

    /// Mark a completed instance claimed and return its one reward request.
    /// `None` when the instance is unknown, incomplete or already claimed.
    pub fn claim(&mut self, id: &str, now: DateTime<Utc>) -> Option<AwardRequest> {
        let instance = self
            .instances
            .iter_mut()
            .find(|i| i.id == id && i.is_claimable())?;
        instance.is_claimed = true;
        instance.claimed_at = Some(now);

        let request = AwardRequest::new(SourceType::ChallengeComplete, instance.xp_reward)
            .with_source_id(instance.id.clone())
            .with_metadata("cadence", instance.cadence.as_str())
            .with_metadata("difficulty", instance.difficulty.as_str());
        (instance.xp_reward > 0).then_some(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn study_45(date: NaiveDate) -> ChallengeInstance {
        let catalog = ChallengeCatalog::standard();
        let template = catalog
            .templates()
            .iter()
            .find(|t| t.key == "study_45")
            .unwrap();
        ChallengeInstance::from_template(template, date)
    }

    #[test]
    fn test_period_keys() {
        let d = date(2026, 10, 17);
        assert_eq!(Cadence::Daily.period_key(d), "2026-10-17");
        assert_eq!(Cadence::Weekly.period_key(d), "2026-W42");
        assert_eq!(Cadence::Seasonal.period_key(d), "2026-Q4");
    }

    #[test]
    fn test_instance_id_is_deterministic() {
        let instance = study_45(date(2026, 10, 17));
        assert_eq!(instance.id, "daily-2026-10-17-study_45");
        assert_eq!(instance.status(), ChallengeStatus::NotStarted);
    }

    #[test]
    fn test_progress_clamps_at_target() {
        let instance = study_45(date(2026, 10, 17));
        let id = instance.id.clone();
        let mut board = ChallengeBoard::from_instances(vec![instance]);
        let now = Utc::now();

        assert_eq!(board.progress(&id, 1000, now), ProgressResult::Completed);
        assert_eq!(board.progress(&id, 1000, now), ProgressResult::Ignored);
        let inst = board.get(&id).unwrap();
        assert_eq!(inst.current_progress, 45);
        assert!(inst.is_completed);
        assert_eq!(inst.completed_at, Some(now));
    }

    #[test]
    fn test_non_positive_delta_ignored() {
        let instance = study_45(date(2026, 10, 17));
        let id = instance.id.clone();
        let mut board = ChallengeBoard::from_instances(vec![instance]);
        assert_eq!(board.progress(&id, 0, Utc::now()), ProgressResult::Ignored);
        assert_eq!(board.progress(&id, -5, Utc::now()), ProgressResult::Ignored);
        assert_eq!(board.progress(&id, 10, Utc::now()), ProgressResult::Advanced);
        assert_eq!(board.get(&id).unwrap().status(), ChallengeStatus::InProgress);
    }

    #[test]
    fn test_claim_once() {
        let instance = study_45(date(2026, 10, 17));
        let id = instance.id.clone();
        let mut board = ChallengeBoard::from_instances(vec![instance]);

        assert!(board.claim(&id, Utc::now()).is_none(), "not completed yet");
        board.progress(&id, 45, Utc::now());

        let award = board.claim(&id, Utc::now()).unwrap();
        assert_eq!(award.source_type, SourceType::ChallengeComplete);
        assert_eq!(award.source_id.as_deref(), Some(id.as_str()));
        assert_eq!(award.amount, 40);
        assert!(board.claim(&id, Utc::now()).is_none());
        assert!(board.unclaimed().is_empty());
    }

    #[test]
    fn test_assign_is_idempotent_per_day() {
        let catalog = ChallengeCatalog::standard();
        let mut rng = StdRng::seed_from_u64(7);
        let mut board = ChallengeBoard::new();
        let day = date(2026, 10, 17);

        let created = board.assign(&catalog, BoardSizes::default(), day, false, &mut rng);
        assert_eq!(created, 6);
        let before: Vec<String> = board.instances().iter().map(|i| i.id.clone()).collect();

        assert_eq!(board.assign(&catalog, BoardSizes::default(), day, false, &mut rng), 0);
        let after: Vec<String> = board.instances().iter().map(|i| i.id.clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_new_day_replaces_daily_only() {
        let catalog = ChallengeCatalog::standard();
        let mut rng = StdRng::seed_from_u64(7);
        let mut board = ChallengeBoard::new();

        // Thursday and Friday of the same ISO week
        board.assign(&catalog, BoardSizes::default(), date(2026, 10, 15), false, &mut rng);
        let created = board.assign(&catalog, BoardSizes::default(), date(2026, 10, 16), false, &mut rng);
        assert_eq!(created, 3);
        assert!(board
            .instances()
            .iter()
            .filter(|i| i.cadence == Cadence::Daily)
            .all(|i| i.period == "2026-10-16"));
        assert_eq!(
            board.instances().iter().filter(|i| i.cadence == Cadence::Weekly).count(),
            2
        );
    }

    #[test]
    fn test_refresh_keeps_completed() {
        let catalog = ChallengeCatalog::standard();
        let mut rng = StdRng::seed_from_u64(11);
        let mut board = ChallengeBoard::new();
        let day = date(2026, 10, 17);
        board.assign(&catalog, BoardSizes::default(), day, false, &mut rng);

        let done_id = board
            .instances()
            .iter()
            .find(|i| i.cadence == Cadence::Daily)
            .unwrap()
            .id
            .clone();
        board.progress(&done_id, 10_000, Utc::now());

        board.assign(&catalog, BoardSizes::default(), day, true, &mut rng);
        assert!(board.get(&done_id).unwrap().is_completed);
        let daily: Vec<_> = board
            .instances()
            .iter()
            .filter(|i| i.cadence == Cadence::Daily)
            .collect();
        assert_eq!(daily.len(), 3);
        let keys: HashSet<_> = daily.iter().map(|i| i.template_key.clone()).collect();
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn test_record_by_type() {
        let mut board = ChallengeBoard::from_instances(vec![study_45(date(2026, 10, 17))]);
        assert!(board.record(ChallengeType::StudyMinutes, 30, Utc::now()).is_empty());
        assert!(board.record(ChallengeType::SessionsCount, 30, Utc::now()).is_empty());
        let done = board.record(ChallengeType::StudyMinutes, 30, Utc::now());
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].current_progress, 45);
    }
}
