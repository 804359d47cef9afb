//! SQLite persistence for progression state.
//!
//! Single connection behind an async mutex; every call runs on the blocking
//! pool. All writes are idempotent (`INSERT OR IGNORE` / upsert), so a failed
//! save can be retried wholesale with the same record. Transactions and
//! session ids are append-only: a saved record only needs to carry the new
//! ones.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use progress_shared::achievements::AchievementState;
use progress_shared::challenges::{Cadence, ChallengeInstance, ChallengeType, Difficulty};
use progress_shared::{SourceType, XpTransaction};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Per-day activity aggregate (local calendar date)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DayActivity {
    pub minutes: u64,
    pub sessions: u64,
}

/// Cached per-user summary row; rebuildable from the other tables
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub baseline_xp: Option<i64>,
    /// Streak from the last adopted remote snapshot
    pub remote_streak: Option<u32>,
    pub total_xp: i64,
    pub level: u32,
    pub streak: u32,
    pub course_count: u64,
    pub note_count: u64,
    pub utc_offset_minutes: i32,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredTransaction {
    pub transaction: XpTransaction,
    /// Set once the remote store acknowledged the transaction
    pub remote_id: Option<String>,
}

/// Everything persisted for one user. On save, `transactions` and
/// `sessions` may hold only the rows not yet written.
#[derive(Debug, Clone, Default)]
pub struct UserRecord {
    pub user_id: String,
    pub summary: Option<SummaryRow>,
    pub transactions: Vec<StoredTransaction>,
    pub challenges: Vec<ChallengeInstance>,
    pub achievements: Vec<AchievementState>,
    pub days: Vec<(NaiveDate, DayActivity)>,
    /// Study session ids already counted
    pub sessions: Vec<String>,
}

impl UserRecord {
    pub fn is_new(&self) -> bool {
        self.summary.is_none() && self.transactions.is_empty()
    }
}

pub struct ProgressStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl ProgressStore {
    /// Open or create the database at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        info!("Opening progression database at: {}", path.display());

        let db_path = path.clone();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&db_path).context("Failed to open SQLite database")?;
            conn.pragma_update(None, "journal_mode", "WAL")
                .context("Failed to enable WAL mode")?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .context("Failed to set synchronous mode")?;
            Ok(conn)
        })
        .await??;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        };
        store.initialize_schema().await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn initialize_schema(&self) -> Result<()> {
        self.execute(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS transactions (
                    user_id TEXT NOT NULL,
                    id TEXT NOT NULL,
                    amount INTEGER NOT NULL,
                    source_type TEXT NOT NULL,
                    source_id TEXT,
                    idempotency_key TEXT,
                    metadata TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL,
                    acknowledged INTEGER NOT NULL DEFAULT 0,
                    remote_id TEXT,
                    PRIMARY KEY (user_id, id)
                );
                CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_idempotency
                    ON transactions(user_id, source_type, idempotency_key)
                    WHERE idempotency_key IS NOT NULL;
                CREATE INDEX IF NOT EXISTS idx_transactions_created
                    ON transactions(user_id, created_at);

                CREATE TABLE IF NOT EXISTS progression_summary (
                    user_id TEXT PRIMARY KEY,
                    baseline_xp INTEGER,
                    remote_streak INTEGER,
                    total_xp INTEGER NOT NULL,
                    level INTEGER NOT NULL,
                    streak INTEGER NOT NULL,
                    course_count INTEGER NOT NULL DEFAULT 0,
                    note_count INTEGER NOT NULL DEFAULT 0,
                    utc_offset_minutes INTEGER NOT NULL DEFAULT 0,
                    last_synced_at TEXT,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS challenge_instances (
                    user_id TEXT NOT NULL,
                    id TEXT NOT NULL,
                    template_key TEXT NOT NULL,
                    title TEXT NOT NULL,
                    challenge_type TEXT NOT NULL,
                    cadence TEXT NOT NULL,
                    period TEXT NOT NULL,
                    target_value INTEGER NOT NULL,
                    xp_reward INTEGER NOT NULL,
                    difficulty TEXT NOT NULL,
                    current_progress INTEGER NOT NULL,
                    is_completed INTEGER NOT NULL,
                    is_claimed INTEGER NOT NULL,
                    completed_at TEXT,
                    claimed_at TEXT,
                    assigned_on TEXT NOT NULL,
                    PRIMARY KEY (user_id, id)
                );

                CREATE TABLE IF NOT EXISTS achievement_progress (
                    user_id TEXT NOT NULL,
                    achievement_id TEXT NOT NULL,
                    progress REAL NOT NULL,
                    is_unlocked INTEGER NOT NULL,
                    unlocked_at TEXT,
                    is_claimed INTEGER NOT NULL,
                    claimed_at TEXT,
                    PRIMARY KEY (user_id, achievement_id)
                );

                CREATE TABLE IF NOT EXISTS activity_days (
                    user_id TEXT NOT NULL,
                    day TEXT NOT NULL,
                    minutes INTEGER NOT NULL DEFAULT 0,
                    sessions INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (user_id, day)
                );

                CREATE TABLE IF NOT EXISTS study_sessions (
                    user_id TEXT NOT NULL,
                    session_id TEXT NOT NULL,
                    PRIMARY KEY (user_id, session_id)
                );",
            )?;
            debug!("Progression schema ready");
            Ok(())
        })
        .await
    }

    /// Run a closure against the connection on the blocking pool
    pub async fn execute<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&conn)
        })
        .await?
    }

    /// Users with any persisted state
    pub async fn list_users(&self) -> Result<Vec<String>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM progression_summary
                 UNION SELECT DISTINCT user_id FROM transactions
                 ORDER BY 1",
            )?;
            let users = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(users)
        })
        .await
    }

    pub async fn load_user(&self, user_id: &str) -> Result<UserRecord> {
        let user_id = user_id.to_string();
        self.execute(move |conn| load_user_blocking(conn, &user_id))
            .await
    }

    pub async fn save_user(&self, record: UserRecord) -> Result<()> {
        self.execute(move |conn| save_user_blocking(conn, &record))
            .await
    }
}

fn load_user_blocking(conn: &Connection, user_id: &str) -> Result<UserRecord> {
    let summary = conn
        .query_row(
            "SELECT baseline_xp, remote_streak, total_xp, level, streak, course_count,
                    note_count, utc_offset_minutes, last_synced_at, updated_at
             FROM progression_summary WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok(SummaryRow {
                    baseline_xp: row.get(0)?,
                    remote_streak: row.get(1)?,
                    total_xp: row.get(2)?,
                    level: row.get(3)?,
                    streak: row.get(4)?,
                    course_count: row.get::<_, i64>(5)?.max(0) as u64,
                    note_count: row.get::<_, i64>(6)?.max(0) as u64,
                    utc_offset_minutes: row.get(7)?,
                    last_synced_at: row.get(8)?,
                    updated_at: row.get(9)?,
                })
            },
        )
        .optional()?;

    let mut stmt = conn.prepare(
        "SELECT id, amount, source_type, source_id, metadata, created_at, remote_id
         FROM transactions WHERE user_id = ?1 ORDER BY created_at, rowid",
    )?;
    let rows = stmt
        .query_map(params![user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, DateTime<Utc>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut transactions = Vec::with_capacity(rows.len());
    for (id, amount, source_type, source_id, metadata, created_at, remote_id) in rows {
        let source_type: SourceType = source_type.parse()?;
        let metadata: Map<String, Value> = serde_json::from_str(&metadata)?;
        transactions.push(StoredTransaction {
            transaction: XpTransaction {
                id,
                user_id: user_id.to_string(),
                amount,
                source_type,
                source_id,
                metadata,
                created_at,
            },
            remote_id,
        });
    }

    let mut stmt = conn.prepare(
        "SELECT id, template_key, title, challenge_type, cadence, period, target_value,
                xp_reward, difficulty, current_progress, is_completed, is_claimed,
                completed_at, claimed_at, assigned_on
         FROM challenge_instances WHERE user_id = ?1 ORDER BY cadence, id",
    )?;
    let rows = stmt
        .query_map(params![user_id], |row| {
            Ok(ChallengeRow {
                id: row.get(0)?,
                template_key: row.get(1)?,
                title: row.get(2)?,
                challenge_type: row.get(3)?,
                cadence: row.get(4)?,
                period: row.get(5)?,
                target_value: row.get(6)?,
                xp_reward: row.get(7)?,
                difficulty: row.get(8)?,
                current_progress: row.get(9)?,
                is_completed: row.get(10)?,
                is_claimed: row.get(11)?,
                completed_at: row.get(12)?,
                claimed_at: row.get(13)?,
                assigned_on: row.get(14)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let challenges = rows
        .into_iter()
        .map(ChallengeRow::into_instance)
        .collect::<Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(
        "SELECT achievement_id, progress, is_unlocked, unlocked_at, is_claimed, claimed_at
         FROM achievement_progress WHERE user_id = ?1",
    )?;
    let achievements = stmt
        .query_map(params![user_id], |row| {
            Ok(AchievementState {
                achievement_id: row.get(0)?,
                progress: row.get(1)?,
                is_unlocked: row.get(2)?,
                unlocked_at: row.get(3)?,
                is_claimed: row.get(4)?,
                claimed_at: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(
        "SELECT day, minutes, sessions FROM activity_days WHERE user_id = ?1 ORDER BY day",
    )?;
    let days = stmt
        .query_map(params![user_id], |row| {
            Ok((
                row.get::<_, NaiveDate>(0)?,
                DayActivity {
                    minutes: row.get::<_, i64>(1)?.max(0) as u64,
                    sessions: row.get::<_, i64>(2)?.max(0) as u64,
                },
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(
        "SELECT session_id FROM study_sessions WHERE user_id = ?1 ORDER BY session_id",
    )?;
    let sessions = stmt
        .query_map(params![user_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(UserRecord {
        user_id: user_id.to_string(),
        summary,
        transactions,
        challenges,
        achievements,
        days,
        sessions,
    })
}

fn save_user_blocking(conn: &Connection, record: &UserRecord) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    let user_id = record.user_id.as_str();

    for stored in &record.transactions {
        let t = &stored.transaction;
        tx.execute(
            "INSERT OR IGNORE INTO transactions
                (user_id, id, amount, source_type, source_id, idempotency_key, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                user_id,
                t.id,
                t.amount,
                t.source_type.as_str(),
                t.source_id,
                t.idempotency_key(),
                serde_json::to_string(&t.metadata)?,
                t.created_at,
            ],
        )?;
        if let Some(remote_id) = &stored.remote_id {
            tx.execute(
                "UPDATE transactions SET acknowledged = 1, remote_id = ?3
                 WHERE user_id = ?1 AND id = ?2",
                params![user_id, t.id, remote_id],
            )?;
        }
    }

    if let Some(s) = &record.summary {
        tx.execute(
            "INSERT INTO progression_summary
                (user_id, baseline_xp, remote_streak, total_xp, level, streak, course_count,
                 note_count, utc_offset_minutes, last_synced_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(user_id) DO UPDATE SET
                baseline_xp = excluded.baseline_xp,
                remote_streak = excluded.remote_streak,
                total_xp = excluded.total_xp,
                level = excluded.level,
                streak = excluded.streak,
                course_count = excluded.course_count,
                note_count = excluded.note_count,
                utc_offset_minutes = excluded.utc_offset_minutes,
                last_synced_at = excluded.last_synced_at,
                updated_at = excluded.updated_at",
            params![
                user_id,
                s.baseline_xp,
                s.remote_streak,
                s.total_xp,
                s.level,
                s.streak,
                clamp_i64(s.course_count),
                clamp_i64(s.note_count),
                s.utc_offset_minutes,
                s.last_synced_at,
                s.updated_at,
            ],
        )?;
    }

    // The board is replaced as a whole: past periods are pruned in memory
    tx.execute(
        "DELETE FROM challenge_instances WHERE user_id = ?1",
        params![user_id],
    )?;
    for c in &record.challenges {
        tx.execute(
            "INSERT INTO challenge_instances
                (user_id, id, template_key, title, challenge_type, cadence, period,
                 target_value, xp_reward, difficulty, current_progress, is_completed,
                 is_claimed, completed_at, claimed_at, assigned_on)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                user_id,
                c.id,
                c.template_key,
                c.title,
                c.challenge_type.as_str(),
                c.cadence.as_str(),
                c.period,
                clamp_i64(c.target_value),
                c.xp_reward,
                c.difficulty.as_str(),
                clamp_i64(c.current_progress),
                c.is_completed,
                c.is_claimed,
                c.completed_at,
                c.claimed_at,
                c.assigned_on,
            ],
        )?;
    }

    for a in &record.achievements {
        tx.execute(
            "INSERT INTO achievement_progress
                (user_id, achievement_id, progress, is_unlocked, unlocked_at, is_claimed, claimed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id, achievement_id) DO UPDATE SET
                progress = MAX(progress, excluded.progress),
                is_unlocked = MAX(is_unlocked, excluded.is_unlocked),
                unlocked_at = COALESCE(unlocked_at, excluded.unlocked_at),
                is_claimed = MAX(is_claimed, excluded.is_claimed),
                claimed_at = COALESCE(claimed_at, excluded.claimed_at)",
            params![
                user_id,
                a.achievement_id,
                a.progress,
                a.is_unlocked,
                a.unlocked_at,
                a.is_claimed,
                a.claimed_at,
            ],
        )?;
    }

    for (day, activity) in &record.days {
        tx.execute(
            "INSERT INTO activity_days (user_id, day, minutes, sessions)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, day) DO UPDATE SET
                minutes = excluded.minutes,
                sessions = excluded.sessions",
            params![
                user_id,
                day,
                clamp_i64(activity.minutes),
                clamp_i64(activity.sessions)
            ],
        )?;
    }

    for session_id in &record.sessions {
        tx.execute(
            "INSERT OR IGNORE INTO study_sessions (user_id, session_id) VALUES (?1, ?2)",
            params![user_id, session_id],
        )?;
    }

    tx.commit()?;
    debug!(
        "Saved {} ({} transactions, {} challenges)",
        user_id,
        record.transactions.len(),
        record.challenges.len()
    );
    Ok(())
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

struct ChallengeRow {
    id: String,
    template_key: String,
    title: String,
    challenge_type: String,
    cadence: String,
    period: String,
    target_value: i64,
    xp_reward: i64,
    difficulty: String,
    current_progress: i64,
    is_completed: bool,
    is_claimed: bool,
    completed_at: Option<DateTime<Utc>>,
    claimed_at: Option<DateTime<Utc>>,
    assigned_on: NaiveDate,
}

impl ChallengeRow {
    fn into_instance(self) -> Result<ChallengeInstance> {
        Ok(ChallengeInstance {
            challenge_type: ChallengeType::parse(&self.challenge_type)
                .ok_or_else(|| anyhow!("unknown challenge type '{}'", self.challenge_type))?,
            cadence: Cadence::parse(&self.cadence)
                .ok_or_else(|| anyhow!("unknown cadence '{}'", self.cadence))?,
            difficulty: Difficulty::parse(&self.difficulty)
                .ok_or_else(|| anyhow!("unknown difficulty '{}'", self.difficulty))?,
            id: self.id,
            template_key: self.template_key,
            title: self.title,
            period: self.period,
            target_value: self.target_value.max(0) as u64,
            xp_reward: self.xp_reward,
            current_progress: self.current_progress.max(0) as u64,
            is_completed: self.is_completed,
            is_claimed: self.is_claimed,
            completed_at: self.completed_at,
            claimed_at: self.claimed_at,
            assigned_on: self.assigned_on,
        })
    }
}
