//! Award pipeline: dedup guard → ledger → leveling engine.
//!
//! Cascade bonuses go through an explicit queue and pass the guard and the
//! ledger like any other award. A bonus can never schedule another bonus:
//! the engine refuses to cascade from `level_up_bonus`, and the per-user
//! `CascadeGuard` holds at most one pending bonus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

use crate::error::ProgressError;
use crate::guard::{AwardKey, DedupGuard};
use crate::ledger::XpLedger;
use crate::leveling::{CascadeGuard, LevelUpEvent, LevelingEngine};
use crate::transaction::{AwardRequest, SourceType, XpTransaction};

/// Shared collaborators for one award call
pub struct AwardContext<'a> {
    pub guard: &'a DedupGuard,
    pub engine: &'a LevelingEngine,
    pub cooldown_ms: i64,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    /// Identical award inside the cooldown window
    Cooldown,
    /// Single-shot key already credited
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suppressed {
    pub source_type: SourceType,
    pub source_id: Option<String>,
    pub amount: i64,
    pub reason: SuppressReason,
}

impl Suppressed {
    fn new(request: &AwardRequest, reason: SuppressReason) -> Self {
        Self {
            source_type: request.source_type,
            source_id: request.source_id.clone(),
            amount: request.amount,
            reason,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwardOutcome {
    pub applied: Vec<XpTransaction>,
    pub level_ups: Vec<LevelUpEvent>,
    pub suppressed: Vec<Suppressed>,
    /// Effective total after the call
    pub total_xp: i64,
}

impl AwardOutcome {
    pub fn xp_delta(&self) -> i64 {
        self.applied.iter().map(|t| t.amount).sum()
    }

    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }

    pub fn merge(&mut self, other: AwardOutcome) {
        self.applied.extend(other.applied);
        self.level_ups.extend(other.level_ups);
        self.suppressed.extend(other.suppressed);
        self.total_xp = other.total_xp;
    }
}

/// Apply `request` and any cascade it triggers.
///
/// `current_total` is the user's effective total before the call (it can
/// differ from the ledger's raw sum once a remote baseline is adopted).
/// Only an invalid initial request is an error; suppression is reported in
/// the outcome.
pub fn apply_award(
    ledger: &mut XpLedger,
    cascade: &mut CascadeGuard,
    ctx: &AwardContext<'_>,
    current_total: i64,
    request: AwardRequest,
) -> Result<AwardOutcome, ProgressError> {
    request.validate()?;

    let mut outcome = AwardOutcome {
        total_xp: current_total,
        ..Default::default()
    };
    let mut queue = VecDeque::from([request]);
    let now_ms = ctx.now.timestamp_millis();

    while let Some(request) = queue.pop_front() {
        let is_bonus = request.source_type == SourceType::LevelUpBonus;
        let key = AwardKey::new(ledger.user_id(), &request);

        if ctx.guard.should_suppress(&key, ctx.cooldown_ms, now_ms) {
            debug!(
                "Suppressed {} award ({:?}) inside cooldown",
                request.source_type, request.source_id
            );
            outcome
                .suppressed
                .push(Suppressed::new(&request, SuppressReason::Cooldown));
            if is_bonus {
                cascade.resolve();
            }
            continue;
        }

        let appended = match ledger.append(request.clone(), ctx.now) {
            Ok(appended) => appended,
            Err(e) if e.is_duplicate() => {
                debug!("Ledger rejected duplicate: {}", e);
                outcome
                    .suppressed
                    .push(Suppressed::new(&request, SuppressReason::Duplicate));
                if is_bonus {
                    cascade.resolve();
                }
                continue;
            }
            Err(e) => return Err(e),
        };

        let previous_total = outcome.total_xp;
        outcome.total_xp += appended.transaction.amount;
        outcome.applied.push(appended.transaction);

        if let Some(transition) =
            ctx.engine
                .on_award(previous_total, outcome.total_xp, request.source_type)
        {
            if let Some(bonus) = transition.cascade {
                if cascade.try_schedule(&bonus) {
                    queue.push_back(bonus);
                }
            }
            outcome.level_ups.push(transition.event);
        }

        if is_bonus {
            cascade.resolve();
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::levels::{LevelDefinition, LevelTable, Tier};
    use crate::leveling::BonusPolicy;
    use std::sync::Arc;

    fn engine(bonus: i64) -> LevelingEngine {
        let defs = [(1, 0), (2, 100), (3, 300)]
            .iter()
            .map(|&(level, required_xp)| LevelDefinition {
                level,
                required_xp,
                tier: Tier::Beginner,
                title: String::new(),
                icon: String::new(),
            })
            .collect();
        LevelingEngine::new(
            Arc::new(LevelTable::new(defs).unwrap()),
            BonusPolicy {
                base_xp: bonus,
                per_level_xp: 0,
            },
        )
    }

    #[test]
    fn test_level_up_scenario() {
        let guard = DedupGuard::new();
        let engine = engine(25);
        let ctx = AwardContext {
            guard: &guard,
            engine: &engine,
            cooldown_ms: 2_000,
            now: Utc::now(),
        };
        let mut ledger = XpLedger::new("u1");
        let mut cascade = CascadeGuard::default();

        apply_award(
            &mut ledger,
            &mut cascade,
            &ctx,
            0,
            AwardRequest::new(SourceType::Manual, 95),
        )
        .unwrap();

        let outcome = apply_award(
            &mut ledger,
            &mut cascade,
            &ctx,
            95,
            AwardRequest::new(SourceType::LessonComplete, 10).with_source_id("L1"),
        )
        .unwrap();

        assert_eq!(outcome.level_ups.len(), 1);
        assert_eq!(outcome.level_ups[0].previous_level, 1);
        assert_eq!(outcome.level_ups[0].new_level, 2);
        let bonuses: Vec<_> = outcome
            .applied
            .iter()
            .filter(|t| t.source_type == SourceType::LevelUpBonus)
            .collect();
        assert_eq!(bonuses.len(), 1);
        assert_eq!(bonuses[0].amount, 25);
        assert_eq!(outcome.total_xp, 130);
        assert_eq!(ledger.total_xp(), 130);
        assert_eq!(engine.classify(outcome.total_xp).level, 2);
        assert!(!cascade.is_pending());
    }

    #[test]
    fn test_bonus_crossing_a_level_does_not_cascade_again() {
        let guard = DedupGuard::new();
        // Bonus of 250 from level 2 carries straight past level 3
        let engine = engine(250);
        let ctx = AwardContext {
            guard: &guard,
            engine: &engine,
            cooldown_ms: 2_000,
            now: Utc::now(),
        };
        let mut ledger = XpLedger::new("u1");
        let mut cascade = CascadeGuard::default();

        let outcome = apply_award(
            &mut ledger,
            &mut cascade,
            &ctx,
            0,
            AwardRequest::new(SourceType::Manual, 100),
        )
        .unwrap();

        let bonus_count = ledger
            .transactions()
            .iter()
            .filter(|t| t.source_type == SourceType::LevelUpBonus)
            .count();
        assert_eq!(bonus_count, 1);
        assert_eq!(outcome.level_ups.len(), 2);
        assert_eq!(outcome.level_ups[1].triggered_by, SourceType::LevelUpBonus);
        assert_eq!(outcome.level_ups[1].bonus_xp, 0);
        assert_eq!(outcome.total_xp, 350);
    }

    #[test]
    fn test_cooldown_suppression_is_not_an_error() {
        let guard = DedupGuard::new();
        let engine = engine(25);
        let now = Utc::now();
        let ctx = AwardContext {
            guard: &guard,
            engine: &engine,
            cooldown_ms: 2_000,
            now,
        };
        let mut ledger = XpLedger::new("u1");
        let mut cascade = CascadeGuard::default();
        let req = AwardRequest::new(SourceType::LessonComplete, 10).with_source_id("L1");

        apply_award(&mut ledger, &mut cascade, &ctx, 0, req.clone()).unwrap();
        let second = apply_award(&mut ledger, &mut cascade, &ctx, 10, req).unwrap();

        assert!(second.is_noop());
        assert_eq!(second.suppressed[0].reason, SuppressReason::Cooldown);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_invalid_initial_request_errors() {
        let guard = DedupGuard::new();
        let engine = engine(25);
        let ctx = AwardContext {
            guard: &guard,
            engine: &engine,
            cooldown_ms: 2_000,
            now: Utc::now(),
        };
        let mut ledger = XpLedger::new("u1");
        let mut cascade = CascadeGuard::default();
        let err = apply_award(
            &mut ledger,
            &mut cascade,
            &ctx,
            0,
            AwardRequest::new(SourceType::QuizComplete, 0),
        )
        .unwrap_err();
        assert!(err.is_user_facing());
    }
}
