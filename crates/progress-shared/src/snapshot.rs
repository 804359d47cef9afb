//! Read-only progression snapshot for dashboards and leaderboards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::levels::{LevelProgress, LevelStatus, Tier};
use crate::streaks::StreakStats;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressionSnapshot {
    pub user_id: String,
    /// Effective signed total (remote baseline plus queued local awards)
    pub total_xp: i64,
    pub display_xp: i64,
    pub level: u32,
    pub tier: Tier,
    pub title: String,
    pub icon: String,
    pub progress: LevelProgress,
    pub streak: StreakStats,
    pub unclaimed_achievements: Vec<String>,
    pub unclaimed_challenges: Vec<String>,
    /// Local transactions not yet acknowledged remotely
    pub pending_sync: usize,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl ProgressionSnapshot {
    pub fn new(user_id: &str, level: LevelStatus, streak: StreakStats) -> Self {
        Self {
            user_id: user_id.to_string(),
            total_xp: level.total_xp,
            display_xp: level.display_xp,
            level: level.level,
            tier: level.tier,
            title: level.title,
            icon: level.icon,
            progress: level.progress,
            streak,
            unclaimed_achievements: Vec::new(),
            unclaimed_challenges: Vec::new(),
            pending_sync: 0,
            last_synced_at: None,
        }
    }

    pub fn unclaimed_count(&self) -> usize {
        self.unclaimed_achievements.len() + self.unclaimed_challenges.len()
    }

    /// One-line summary, e.g. `[**] Lv 5 Scholar (1020 XP) | streak 4d`
    pub fn headline(&self) -> String {
        format!(
            "{} Lv {} {} ({} XP) | streak {}d",
            self.icon, self.level, self.title, self.display_xp, self.streak.current_streak
        )
    }
}
