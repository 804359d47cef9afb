//! CLI - Command-line argument parsing
//!
//! Keeps argument parsing separate from execution logic.

use clap::{Parser, Subcommand};

/// Progression ledger CLI
#[derive(Parser)]
#[command(name = "progressctl")]
#[command(about = "Progression ledger - XP, levels, streaks and challenges", long_about = None)]
#[command(version = progress_shared::VERSION)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// Daemon URL (overrides $PROGRESSD_URL and the default)
    #[arg(long, global = true)]
    pub url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Show daemon health, or a user's progression when a user is given
    Status {
        user: Option<String>,

        /// Output JSON only
        #[arg(long)]
        json: bool,
    },

    /// Report an activity (study_session, lesson_complete, quiz_complete,
    /// course_complete, course_added, note_created, manual, penalty)
    Report {
        user: String,
        kind: String,

        /// Signed XP carried by the activity
        #[arg(default_value_t = 0, allow_hyphen_values = true)]
        xp: i64,

        /// Lesson, quiz or course id
        #[arg(long)]
        source_id: Option<String>,

        /// Study session id
        #[arg(long)]
        session: Option<String>,

        /// Study minutes for a session
        #[arg(long, default_value_t = 0)]
        minutes: u64,

        /// Local offset from UTC in minutes
        #[arg(long, allow_hyphen_values = true)]
        utc_offset: Option<i32>,

        #[arg(long)]
        json: bool,
    },

    /// Append a raw ledger entry
    Award {
        user: String,

        #[arg(allow_hyphen_values = true)]
        amount: i64,

        /// Source type (manual, penalty, lesson_complete, ...)
        #[arg(long, default_value = "manual")]
        source: String,

        #[arg(long)]
        source_id: Option<String>,
    },

    /// Show recent transactions and ledger totals
    History {
        user: String,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long)]
        json: bool,
    },

    /// Show the challenge board
    Challenges {
        user: String,

        /// Drop expired instances and top the board up
        #[arg(long)]
        refresh: bool,
    },

    /// Add manual progress to a challenge
    Progress {
        user: String,
        id: String,

        #[arg(allow_hyphen_values = true)]
        delta: i64,
    },

    /// Claim a completed challenge's reward
    ClaimChallenge { user: String, id: String },

    /// Show achievements
    Achievements {
        user: String,

        #[arg(long)]
        json: bool,
    },

    /// Claim an unlocked achievement's reward
    ClaimAchievement { user: String, id: String },

    /// Push queued transactions and reconcile with the remote store
    Sync { user: String },
}

/// Resolve the daemon URL: flag, then environment, then default
pub fn resolve_url(flag: Option<String>) -> String {
    flag.or_else(|| std::env::var(progress_shared::URL_ENV).ok())
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| crate::client::DEFAULT_URL.to_string())
}
