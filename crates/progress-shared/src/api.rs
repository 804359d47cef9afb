//! HTTP API request and response types shared by progressd and progressctl.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::achievements::{AchievementUpdate, AchievementView, Rarity};
use crate::award::AwardOutcome;
use crate::challenges::ChallengeInstance;
use crate::snapshot::ProgressionSnapshot;
use crate::streaks::StreakStats;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub open_sessions: usize,
    /// Remote backend name, `None` when sync is disabled
    pub sync: Option<String>,
}

/// Result of one activity report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityOutcome {
    pub award: AwardOutcome,
    /// The report was a re-delivery; only the dedup layer saw it
    pub redelivered: bool,
    pub streak: StreakStats,
    pub completed_challenges: Vec<ChallengeInstance>,
    pub achievement_updates: Vec<AchievementUpdate>,
    pub snapshot: ProgressionSnapshot,
}

/// Result of a challenge or achievement claim; `claimed == false` is a no-op
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimOutcome {
    pub claimed: bool,
    pub award: AwardOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRequest {
    pub delta: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Owned achievement listing row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementEntry {
    pub id: String,
    pub badge: String,
    pub name: String,
    pub description: String,
    pub rarity: Rarity,
    pub target: u64,
    pub xp_reward: i64,
    pub progress: f64,
    pub is_unlocked: bool,
    pub is_claimed: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
}

impl From<&AchievementView> for AchievementEntry {
    fn from(view: &AchievementView) -> Self {
        Self {
            id: view.definition.id.to_string(),
            badge: view.definition.badge.to_string(),
            name: view.definition.name.to_string(),
            description: view.definition.description.to_string(),
            rarity: view.definition.rarity,
            target: view.definition.target,
            xp_reward: view.definition.xp_reward,
            progress: view.state.progress,
            is_unlocked: view.state.is_unlocked,
            is_claimed: view.state.is_claimed,
            unlocked_at: view.state.unlocked_at,
        }
    }
}

/// Outcome of one push/fetch/reconcile pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub user_id: String,
    pub pushed: usize,
    pub acknowledged: usize,
    pub remote_total: i64,
    pub total_xp: i64,
    pub level: u32,
    /// Local transactions still queued for re-send
    pub retained: usize,
    pub conflict: bool,
    pub attempts: u32,
    pub synced_at: DateTime<Utc>,
}
