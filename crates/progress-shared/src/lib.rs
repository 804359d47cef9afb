//! Shared types and logic for the progression ledger.
//! v0.3.0: Ledger, leveling cascade, streaks, challenges, achievements, reconciliation.

pub mod activity;
pub mod api;
pub mod award;
pub mod error;
pub mod guard;
pub mod ledger;
pub mod leveling;
pub mod levels;
pub mod reconcile;
pub mod snapshot;
pub mod transaction;

// v0.2.0: Daily challenge board and claim-based achievements
pub mod achievements;
pub mod challenges;

// v0.2.1: Day-based streaks
pub mod streaks;

pub use activity::{ActivityContext, ActivityKind, ActivityReport, OffPeakWindow, MAX_REPORT_MINUTES};
pub use api::{ActivityOutcome, ClaimOutcome, HealthResponse, SyncReport};
pub use award::{apply_award, AwardContext, AwardOutcome, SuppressReason, Suppressed};
pub use error::ProgressError;
pub use guard::{AwardKey, DedupGuard, DEFAULT_COOLDOWN_MS};
pub use ledger::{LedgerSummary, XpLedger};
pub use leveling::{BonusPolicy, CascadeGuard, LevelUpEvent, LevelingEngine};
pub use levels::{LevelDefinition, LevelProgress, LevelStatus, LevelTable, Tier};
pub use reconcile::{reconcile, MergedState, RemoteAck, RemoteSnapshot, SyncState};
pub use snapshot::ProgressionSnapshot;
pub use streaks::StreakStats;
pub use transaction::{AwardRequest, SourceType, XpTransaction};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default daemon listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7870";

/// Default state directory
pub const STATE_DIR: &str = "/var/lib/progressd";

/// Environment variable overriding the daemon URL for clients
pub const URL_ENV: &str = "PROGRESSD_URL";
