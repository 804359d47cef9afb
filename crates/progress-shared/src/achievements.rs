//! Achievement evaluator (v0.3.0).
//!
//! Single claim-based achievement system. Evaluation only moves progress
//! forward and flips `unlocked` one way; XP is granted by `claim`, once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::transaction::{AwardRequest, SourceType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementType {
    TotalSessions,
    TotalStudyMinutes,
    DailyStudyMinutes,
    WeeklyStudyMinutes,
    MonthlyStudyMinutes,
    CourseCount,
    NoteCount,
    CurrentStreak,
    LongestStreak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

impl Rarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rarity::Common => "common",
            Rarity::Uncommon => "uncommon",
            Rarity::Rare => "rare",
            Rarity::Epic => "epic",
            Rarity::Legendary => "legendary",
        }
    }
}

/// Catalog entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AchievementDefinition {
    pub id: &'static str,
    /// ASCII badge (e.g. "[10]", "<7d>")
    pub badge: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub requirement: RequirementType,
    pub target: u64,
    pub xp_reward: i64,
    pub rarity: Rarity,
}

impl AchievementDefinition {
    const fn new(
        id: &'static str,
        badge: &'static str,
        name: &'static str,
        description: &'static str,
        requirement: RequirementType,
        target: u64,
        xp_reward: i64,
        rarity: Rarity,
    ) -> Self {
        Self {
            id,
            badge,
            name,
            description,
            requirement,
            target,
            xp_reward,
            rarity,
        }
    }

    /// `min(100, metric / target * 100)`
    pub fn progress_for(&self, metric: u64) -> f64 {
        if self.target == 0 {
            return 100.0;
        }
        (metric as f64 / self.target as f64 * 100.0).min(100.0)
    }
}

/// Read-only achievement catalog, loaded once at startup
#[derive(Debug, Clone)]
pub struct AchievementCatalog {
    entries: Vec<AchievementDefinition>,
}

impl AchievementCatalog {
    pub fn new(entries: Vec<AchievementDefinition>) -> Self {
        Self { entries }
    }

    pub fn standard() -> Self {
        use Rarity::*;
        use RequirementType::*;
        Self::new(vec![
            // Sessions
            AchievementDefinition::new("first_session", "[1]", "First Steps", "Complete your first study session", TotalSessions, 1, 10, Common),
            AchievementDefinition::new("sessions_10", "[10]", "Getting Into It", "Complete 10 study sessions", TotalSessions, 10, 25, Common),
            AchievementDefinition::new("sessions_50", "[50]", "Regular", "Complete 50 study sessions", TotalSessions, 50, 75, Uncommon),
            AchievementDefinition::new("sessions_250", "[250]", "Devoted", "Complete 250 study sessions", TotalSessions, 250, 250, Epic),

            // Study time
            AchievementDefinition::new("hours_10", "(10h)", "Ten Hours", "Study for 10 hours in total", TotalStudyMinutes, 600, 50, Uncommon),
            AchievementDefinition::new("hours_100", "(100h)", "Centurion", "Study for 100 hours in total", TotalStudyMinutes, 6_000, 300, Legendary),
            AchievementDefinition::new("deep_day", "(2h/d)", "Deep Day", "Study for 2 hours in one day", DailyStudyMinutes, 120, 40, Uncommon),
            AchievementDefinition::new("solid_week", "(10h/w)", "Solid Week", "Study for 10 hours in one week", WeeklyStudyMinutes, 600, 100, Rare),
            AchievementDefinition::new("marathon_month", "(40h/m)", "Marathon Month", "Study for 40 hours in one month", MonthlyStudyMinutes, 2_400, 200, Epic),

            // Library
            AchievementDefinition::new("first_course", "{1}", "Enrolled", "Add your first course", CourseCount, 1, 10, Common),
            AchievementDefinition::new("courses_5", "{5}", "Curious Mind", "Add 5 courses", CourseCount, 5, 50, Rare),
            AchievementDefinition::new("notes_10", "{n10}", "Note Taker", "Create 10 notes", NoteCount, 10, 25, Common),
            AchievementDefinition::new("notes_100", "{n100}", "Archivist", "Create 100 notes", NoteCount, 100, 150, Epic),

            // Streaks
            AchievementDefinition::new("streak_3", "<3d>", "On Fire", "Maintain a 3-day streak", CurrentStreak, 3, 20, Common),
            AchievementDefinition::new("streak_7", "<7d>", "Week Warrior", "Maintain a 7-day streak", CurrentStreak, 7, 50, Uncommon),
            AchievementDefinition::new("streak_30", "<30d>", "Monthly Master", "Maintain a 30-day streak", CurrentStreak, 30, 200, Epic),
            AchievementDefinition::new("best_run_100", "<100d>", "Unbroken", "Reach a 100-day best streak", LongestStreak, 100, 500, Legendary),
        ])
    }

    pub fn entries(&self) -> &[AchievementDefinition] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&AchievementDefinition> {
        self.entries.iter().find(|e| e.id == id)
    }
}

impl Default for AchievementCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

/// Raw metrics an evaluation runs against
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityMetrics {
    pub total_sessions: u64,
    pub total_study_minutes: u64,
    pub daily_study_minutes: u64,
    pub weekly_study_minutes: u64,
    pub monthly_study_minutes: u64,
    pub course_count: u64,
    pub note_count: u64,
    pub current_streak: u64,
    pub longest_streak: u64,
}

impl ActivityMetrics {
    pub fn metric(&self, requirement: RequirementType) -> u64 {
        match requirement {
            RequirementType::TotalSessions => self.total_sessions,
            RequirementType::TotalStudyMinutes => self.total_study_minutes,
            RequirementType::DailyStudyMinutes => self.daily_study_minutes,
            RequirementType::WeeklyStudyMinutes => self.weekly_study_minutes,
            RequirementType::MonthlyStudyMinutes => self.monthly_study_minutes,
            RequirementType::CourseCount => self.course_count,
            RequirementType::NoteCount => self.note_count,
            RequirementType::CurrentStreak => self.current_streak,
            RequirementType::LongestStreak => self.longest_streak,
        }
    }
}

/// Per-user progress on one achievement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementState {
    pub achievement_id: String,
    /// Percent in `[0, 100]`, never decreases
    pub progress: f64,
    pub is_unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub is_claimed: bool,
    pub claimed_at: Option<DateTime<Utc>>,
}

impl AchievementState {
    pub fn new(achievement_id: &str) -> Self {
        Self {
            achievement_id: achievement_id.to_string(),
            progress: 0.0,
            is_unlocked: false,
            unlocked_at: None,
            is_claimed: false,
            claimed_at: None,
        }
    }

    pub fn is_claimable(&self) -> bool {
        self.is_unlocked && !self.is_claimed
    }
}

/// One progress change produced by `evaluate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementUpdate {
    pub achievement_id: String,
    pub previous_progress: f64,
    pub progress: f64,
    pub newly_unlocked: bool,
}

/// Achievement entry joined with the user's state, for listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AchievementView {
    pub definition: AchievementDefinition,
    pub state: AchievementState,
}

/// One user's achievement progress
#[derive(Debug, Clone, Default)]
pub struct AchievementBook {
    states: BTreeMap<String, AchievementState>,
}

impl AchievementBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_states(states: Vec<AchievementState>) -> Self {
        Self {
            states: states
                .into_iter()
                .map(|s| (s.achievement_id.clone(), s))
                .collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&AchievementState> {
        self.states.get(id)
    }

    pub fn states(&self) -> impl Iterator<Item = &AchievementState> {
        self.states.values()
    }

    /// Recompute progress for every catalog entry. Safe to call on every
    /// activity: unlocked entries stay frozen at 100 and progress never
    /// moves down. Only entries whose state changed are returned.
    pub fn evaluate(
        &mut self,
        catalog: &AchievementCatalog,
        metrics: &ActivityMetrics,
        now: DateTime<Utc>,
    ) -> Vec<AchievementUpdate> {
        let mut updates = Vec::new();

        for def in catalog.entries() {
            let state = self
                .states
                .entry(def.id.to_string())
                .or_insert_with(|| AchievementState::new(def.id));
            if state.is_unlocked {
                continue;
            }

            let computed = def.progress_for(metrics.metric(def.requirement));
            if computed <= state.progress {
                continue;
            }

            let previous = state.progress;
            state.progress = computed;
            let newly_unlocked = computed >= 100.0;
            if newly_unlocked {
                state.progress = 100.0;
                state.is_unlocked = true;
                state.unlocked_at = Some(now);
            }

            updates.push(AchievementUpdate {
                achievement_id: def.id.to_string(),
                previous_progress: previous,
                progress: state.progress,
                newly_unlocked,
            });
        }

        updates
    }

    /// Mark an unlocked achievement claimed and return its one reward
    /// request. `None` when unknown, locked or already claimed.
    pub fn claim(
        &mut self,
        catalog: &AchievementCatalog,
        id: &str,
        now: DateTime<Utc>,
    ) -> Option<AwardRequest> {
        let def = catalog.get(id)?;
        let state = self.states.get_mut(id).filter(|s| s.is_claimable())?;
        state.is_claimed = true;
        state.claimed_at = Some(now);

        (def.xp_reward > 0).then(|| {
            AwardRequest::new(SourceType::AchievementUnlock, def.xp_reward)
                .with_source_id(def.id)
                .with_metadata("rarity", def.rarity.as_str())
        })
    }

    pub fn unclaimed(&self) -> Vec<&AchievementState> {
        self.states.values().filter(|s| s.is_claimable()).collect()
    }

    pub fn view(&self, catalog: &AchievementCatalog) -> Vec<AchievementView> {
        catalog
            .entries()
            .iter()
            .map(|def| AchievementView {
                definition: def.clone(),
                state: self
                    .states
                    .get(def.id)
                    .cloned()
                    .unwrap_or_else(|| AchievementState::new(def.id)),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(sessions: u64) -> ActivityMetrics {
        ActivityMetrics {
            total_sessions: sessions,
            ..Default::default()
        }
    }

    #[test]
    fn test_catalog_ids_unique() {
        let catalog = AchievementCatalog::standard();
        let mut ids: Vec<_> = catalog.entries().iter().map(|e| e.id).collect();
        let before = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), before);
    }

    #[test]
    fn test_progress_percent() {
        let catalog = AchievementCatalog::standard();
        let mut book = AchievementBook::new();
        book.evaluate(&catalog, &metrics(5), Utc::now());
        let state = book.get("sessions_10").unwrap();
        assert!((state.progress - 50.0).abs() < f64::EPSILON);
        assert!(!state.is_unlocked);
        assert!(book.get("first_session").unwrap().is_unlocked);
    }

    #[test]
    fn test_unlock_is_one_way_and_frozen() {
        let catalog = AchievementCatalog::standard();
        let mut book = AchievementBook::new();
        let t0 = Utc::now();
        let updates = book.evaluate(&catalog, &metrics(10), t0);
        assert!(updates
            .iter()
            .any(|u| u.achievement_id == "sessions_10" && u.newly_unlocked));

        // Metrics going down (e.g. a stale recount) never relock
        let again = book.evaluate(&catalog, &metrics(0), Utc::now());
        assert!(again.is_empty());
        let state = book.get("sessions_10").unwrap();
        assert!(state.is_unlocked);
        assert_eq!(state.progress, 100.0);
        assert_eq!(state.unlocked_at, Some(t0));
    }

    #[test]
    fn test_progress_never_decreases() {
        let catalog = AchievementCatalog::standard();
        let mut book = AchievementBook::new();
        book.evaluate(&catalog, &metrics(8), Utc::now());
        book.evaluate(&catalog, &metrics(3), Utc::now());
        assert!((book.get("sessions_10").unwrap().progress - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_unlock_does_not_award() {
        let catalog = AchievementCatalog::standard();
        let mut book = AchievementBook::new();
        book.evaluate(&catalog, &metrics(1), Utc::now());
        assert_eq!(book.unclaimed().len(), 1);
    }

    #[test]
    fn test_claim_once() {
        let catalog = AchievementCatalog::standard();
        let mut book = AchievementBook::new();

        assert!(book.claim(&catalog, "first_session", Utc::now()).is_none());
        book.evaluate(&catalog, &metrics(1), Utc::now());

        let award = book.claim(&catalog, "first_session", Utc::now()).unwrap();
        assert_eq!(award.source_type, SourceType::AchievementUnlock);
        assert_eq!(award.source_id.as_deref(), Some("first_session"));
        assert_eq!(award.amount, 10);
        assert!(book.claim(&catalog, "first_session", Utc::now()).is_none());
        assert!(book.unclaimed().is_empty());
    }

    #[test]
    fn test_unknown_claim_is_noop() {
        let catalog = AchievementCatalog::standard();
        let mut book = AchievementBook::new();
        assert!(book.claim(&catalog, "nope", Utc::now()).is_none());
    }

    #[test]
    fn test_view_covers_catalog() {
        let catalog = AchievementCatalog::standard();
        let book = AchievementBook::new();
        assert_eq!(book.view(&catalog).len(), catalog.entries().len());
    }
}
