//! Streak calculation (v0.3.0).
//!
//! Streaks are derived on every query from the set of local calendar dates
//! with at least one qualifying activity; nothing is stored as a counter.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Streak statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakStats {
    /// Consecutive active days ending today
    pub current_streak: u32,
    /// Best run ever
    pub longest_streak: u32,
    /// Unique days with activity
    pub active_days: u32,
    /// Run ending yesterday that today's activity would extend (0 if none)
    pub at_risk_streak: u32,
}

/// Offset from minutes east of UTC, falling back to UTC when out of range
pub fn offset_from_minutes(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes.saturating_mul(60)).unwrap_or_else(|| Utc.fix())
}

/// Local calendar date an activity counts for: the date its end falls on.
pub fn activity_date(ended_at: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    ended_at.with_timezone(&offset).date_naive()
}

/// Run length ending exactly at `end`, walking backwards. O(run length).
fn run_ending_at(dates: &BTreeSet<NaiveDate>, end: NaiveDate) -> u32 {
    let mut expected = end;
    let mut run = 0u32;
    for day in dates.range(..=end).rev() {
        if *day != expected {
            break;
        }
        run += 1;
        expected = expected - Duration::days(1);
    }
    run
}

/// Consecutive active days counted backwards from `today`.
///
/// Returns 0 as soon as the most recent activity is more than a day old;
/// otherwise walks back from `today`, stopping at the first missing date.
pub fn current_streak(dates: &BTreeSet<NaiveDate>, today: NaiveDate) -> u32 {
    let Some(&last) = dates.range(..=today).next_back() else {
        return 0;
    };
    if today - last > Duration::days(1) {
        return 0;
    }
    run_ending_at(dates, today)
}

/// Longest run anywhere in the set
pub fn longest_streak(dates: &BTreeSet<NaiveDate>) -> u32 {
    let mut best = 0u32;
    let mut run = 0u32;
    let mut prev: Option<NaiveDate> = None;
    for &day in dates {
        run = match prev {
            Some(p) if day - p == Duration::days(1) => run + 1,
            _ => 1,
        };
        best = best.max(run);
        prev = Some(day);
    }
    best
}

pub fn calculate_streaks(dates: &BTreeSet<NaiveDate>, today: NaiveDate) -> StreakStats {
    let current = current_streak(dates, today);
    let at_risk = if current == 0 {
        run_ending_at(dates, today - Duration::days(1))
    } else {
        0
    };
    StreakStats {
        current_streak: current,
        longest_streak: longest_streak(dates),
        active_days: dates.len() as u32,
        at_risk_streak: at_risk,
    }
}
