//! Property-based tests for the ledger and award pipeline.
//!
//! Verifies:
//! - Sum: cached total equals the sum of amounts, in any replay order
//! - No infinite cascade: at most one level_up_bonus per reached level,
//!   and never one triggered by a bonus
//! - Challenge progress: monotone, clamped at target
//! - Streak bounds: current <= longest <= active days

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use progress_shared::award::{apply_award, AwardContext};
use progress_shared::challenges::{ChallengeBoard, ChallengeCatalog, ChallengeInstance};
use progress_shared::guard::DedupGuard;
use progress_shared::leveling::{BonusPolicy, CascadeGuard, LevelingEngine};
use progress_shared::levels::LevelTable;
use progress_shared::streaks::calculate_streaks;
use progress_shared::{AwardRequest, SourceType, XpLedger};

// ────────────────────────────────────────────────────────────────────
// Strategies
// ────────────────────────────────────────────────────────────────────

fn arb_request() -> impl Strategy<Value = AwardRequest> {
    prop_oneof![
        (1..200i64).prop_map(|xp| AwardRequest::new(SourceType::LessonComplete, xp)),
        (1..100i64).prop_map(|xp| AwardRequest::new(SourceType::QuizComplete, xp)),
        (-150..-1i64).prop_map(|xp| AwardRequest::new(SourceType::Penalty, xp)),
        (1..1_500i64).prop_map(|xp| AwardRequest::new(SourceType::Manual, xp)),
    ]
}

fn arb_dates() -> impl Strategy<Value = BTreeSet<u32>> {
    prop::collection::btree_set(0..60u32, 0..40)
}

// ────────────────────────────────────────────────────────────────────
// Properties
// ────────────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn prop_total_is_sum_of_amounts(requests in prop::collection::vec(arb_request(), 0..64)) {
        let mut ledger = XpLedger::new("u1");
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut expected = 0i64;
        for (i, req) in requests.iter().enumerate() {
            expected += req.amount;
            ledger.append(req.clone(), base + Duration::seconds(i as i64)).unwrap();
        }
        prop_assert_eq!(ledger.total_xp(), expected);
        prop_assert!(ledger.verify());

        let mut reversed = ledger.transactions().to_vec();
        reversed.reverse();
        let rebuilt = XpLedger::from_transactions("u1", reversed);
        prop_assert_eq!(rebuilt.total_xp(), expected);
    }

    #[test]
    fn prop_no_bonus_from_bonus(requests in prop::collection::vec(arb_request(), 1..48)) {
        let engine = LevelingEngine::new(Arc::new(LevelTable::standard()), BonusPolicy {
            base_xp: 400,
            per_level_xp: 0,
        });
        let guard = DedupGuard::new();
        let mut ledger = XpLedger::new("u1");
        let mut cascade = CascadeGuard::default();
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut total = 0;

        for (i, req) in requests.into_iter().enumerate() {
            let ctx = AwardContext {
                guard: &guard,
                engine: &engine,
                cooldown_ms: 2_000,
                now: base + Duration::seconds(10 * i as i64),
            };
            let outcome = apply_award(&mut ledger, &mut cascade, &ctx, total, req).unwrap();
            total = outcome.total_xp;
            for event in &outcome.level_ups {
                if event.triggered_by == SourceType::LevelUpBonus {
                    prop_assert_eq!(event.bonus_xp, 0);
                }
            }
            prop_assert!(!cascade.is_pending());
        }

        let bonus_ids: Vec<_> = ledger
            .transactions()
            .iter()
            .filter(|t| t.source_type == SourceType::LevelUpBonus)
            .filter_map(|t| t.source_id.clone())
            .collect();
        let unique: HashSet<_> = bonus_ids.iter().collect();
        prop_assert_eq!(unique.len(), bonus_ids.len());
        prop_assert_eq!(total, ledger.total_xp());
    }

    #[test]
    fn prop_challenge_progress_clamped(deltas in prop::collection::vec(-50..500i64, 0..32)) {
        let catalog = ChallengeCatalog::standard();
        let template = &catalog.templates()[0];
        let day = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        let instance = ChallengeInstance::from_template(template, day);
        let id = instance.id.clone();
        let mut board = ChallengeBoard::from_instances(vec![instance]);

        let mut last = 0;
        for delta in deltas {
            board.progress(&id, delta, Utc::now());
            let current = board.get(&id).unwrap().current_progress;
            prop_assert!(current >= last);
            prop_assert!(current <= template.target_value);
            last = current;
        }
    }

    #[test]
    fn prop_streak_bounds(offsets in arb_dates()) {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let dates: BTreeSet<NaiveDate> = offsets
            .iter()
            .map(|&o| start + Duration::days(i64::from(o)))
            .collect();
        let today = start + Duration::days(59);
        let stats = calculate_streaks(&dates, today);
        prop_assert!(stats.current_streak <= stats.longest_streak);
        prop_assert!(stats.longest_streak <= stats.active_days);
        prop_assert!(stats.current_streak == 0 || stats.at_risk_streak == 0);
    }
}
