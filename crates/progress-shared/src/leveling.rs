//! Leveling engine v0.3.0
//!
//! Derives level/tier from a total and detects level transitions. A
//! transition caused by an ordinary award yields exactly one cascade bonus
//! request (`level_up_bonus`, source id `level_{n}`). A transition caused by
//! a `level_up_bonus` is still reported, but never yields another cascade.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::levels::{LevelStatus, LevelTable, Tier};
use crate::transaction::{AwardRequest, SourceType};

/// Cascade bonus size per reached level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusPolicy {
    pub base_xp: i64,
    pub per_level_xp: i64,
}

impl BonusPolicy {
    pub fn bonus_for(&self, level: u32) -> i64 {
        (self.base_xp + self.per_level_xp * (i64::from(level) - 1)).max(0)
    }
}

impl Default for BonusPolicy {
    fn default() -> Self {
        Self {
            base_xp: 25,
            per_level_xp: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelUpEvent {
    pub previous_level: u32,
    pub new_level: u32,
    pub previous_tier: Tier,
    pub new_tier: Tier,
    pub tier_changed: bool,
    /// Cascade bonus scheduled for this transition (0 when none)
    pub bonus_xp: i64,
    pub triggered_by: SourceType,
}

/// A detected transition plus the cascade award it schedules, if any
#[derive(Debug, Clone, PartialEq)]
pub struct LevelTransition {
    pub event: LevelUpEvent,
    pub cascade: Option<AwardRequest>,
}

#[derive(Debug, Clone)]
pub struct LevelingEngine {
    table: Arc<LevelTable>,
    bonus: BonusPolicy,
}

impl LevelingEngine {
    pub fn new(table: Arc<LevelTable>, bonus: BonusPolicy) -> Self {
        Self { table, bonus }
    }

    pub fn table(&self) -> &LevelTable {
        &self.table
    }

    pub fn classify(&self, total_xp: i64) -> LevelStatus {
        self.table.classify(total_xp)
    }

    /// Compare levels before and after an award of `source` type.
    pub fn on_award(
        &self,
        previous_total: i64,
        new_total: i64,
        source: SourceType,
    ) -> Option<LevelTransition> {
        let before = self.table.classify(previous_total);
        let after = self.table.classify(new_total);
        if after.level <= before.level {
            return None;
        }

        let bonus_xp = if source == SourceType::LevelUpBonus {
            0
        } else {
            self.bonus.bonus_for(after.level)
        };

        let cascade = (bonus_xp > 0).then(|| {
            AwardRequest::new(SourceType::LevelUpBonus, bonus_xp)
                .with_source_id(format!("level_{}", after.level))
                .with_metadata("previous_level", before.level)
                .with_metadata("new_level", after.level)
        });

        Some(LevelTransition {
            event: LevelUpEvent {
                previous_level: before.level,
                new_level: after.level,
                previous_tier: before.tier,
                new_tier: after.tier,
                tier_changed: before.tier != after.tier,
                bonus_xp,
                triggered_by: source,
            },
            cascade,
        })
    }
}

/// Per-user in-flight cascade flag: at most one pending bonus at a time.
#[derive(Debug, Clone, Default)]
pub struct CascadeGuard {
    pending: Option<String>,
}

impl CascadeGuard {
    /// Claim the slot for `request`; false if a cascade is already pending
    pub fn try_schedule(&mut self, request: &AwardRequest) -> bool {
        if self.pending.is_some() {
            return false;
        }
        self.pending = Some(request.source_id.clone().unwrap_or_default());
        true
    }

    pub fn resolve(&mut self) {
        self.pending = None;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::levels::LevelDefinition;

    fn engine() -> LevelingEngine {
        let defs = [(1, 0), (2, 100), (3, 300)]
            .iter()
            .map(|&(level, required_xp)| LevelDefinition {
                level,
                required_xp,
                tier: if level < 3 { Tier::Beginner } else { Tier::Apprentice },
                title: String::new(),
                icon: String::new(),
            })
            .collect();
        LevelingEngine::new(
            Arc::new(LevelTable::new(defs).unwrap()),
            BonusPolicy::default(),
        )
    }

    #[test]
    fn test_no_transition_within_level() {
        assert!(engine().on_award(10, 50, SourceType::LessonComplete).is_none());
    }

    #[test]
    fn test_transition_schedules_one_bonus() {
        let t = engine().on_award(95, 105, SourceType::LessonComplete).unwrap();
        assert_eq!(t.event.previous_level, 1);
        assert_eq!(t.event.new_level, 2);
        assert!(!t.event.tier_changed);
        let cascade = t.cascade.unwrap();
        assert_eq!(cascade.source_type, SourceType::LevelUpBonus);
        assert_eq!(cascade.source_id.as_deref(), Some("level_2"));
        assert_eq!(cascade.amount, 25);
    }

    #[test]
    fn test_bonus_never_cascades() {
        let t = engine().on_award(290, 315, SourceType::LevelUpBonus).unwrap();
        assert_eq!(t.event.new_level, 3);
        assert!(t.event.tier_changed);
        assert_eq!(t.event.bonus_xp, 0);
        assert!(t.cascade.is_none());
    }

    #[test]
    fn test_multi_level_jump_is_one_transition() {
        let t = engine().on_award(0, 500, SourceType::Manual).unwrap();
        assert_eq!(t.event.previous_level, 1);
        assert_eq!(t.event.new_level, 3);
        assert_eq!(t.cascade.unwrap().source_id.as_deref(), Some("level_3"));
    }

    #[test]
    fn test_penalty_drop_is_not_a_transition() {
        assert!(engine().on_award(150, 50, SourceType::Penalty).is_none());
    }

    #[test]
    fn test_bonus_policy_scaling() {
        let policy = BonusPolicy {
            base_xp: 20,
            per_level_xp: 5,
        };
        assert_eq!(policy.bonus_for(2), 25);
        assert_eq!(policy.bonus_for(5), 40);
    }

    #[test]
    fn test_cascade_guard_single_slot() {
        let mut guard = CascadeGuard::default();
        let req = AwardRequest::new(SourceType::LevelUpBonus, 25).with_source_id("level_2");
        assert!(guard.try_schedule(&req));
        assert!(!guard.try_schedule(&req));
        guard.resolve();
        assert!(guard.try_schedule(&req));
    }
}
