//! Level table v0.3.0
//!
//! Static, externally supplied ascending list of level thresholds.
//!
//! ## Invariants
//!
//! - Level 1 requires 0 XP
//! - Levels and cumulative thresholds are strictly increasing
//!
//! Classification is a binary search for the greatest level whose threshold
//! is at or below the (display) total. Negative totals classify as level 1.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::ProgressError;

/// Ordinal tier category, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Beginner,
    Apprentice,
    Scholar,
    Expert,
    Master,
    Grandmaster,
    Legend,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Beginner => "beginner",
            Tier::Apprentice => "apprentice",
            Tier::Scholar => "scholar",
            Tier::Expert => "expert",
            Tier::Master => "master",
            Tier::Grandmaster => "grandmaster",
            Tier::Legend => "legend",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Built-in table: (level, required_xp, tier, title, icon)
const STANDARD_LEVELS: &[(u32, i64, Tier, &str, &str)] = &[
    (1, 0, Tier::Beginner, "Curious Mind", "[.]"),
    (2, 100, Tier::Beginner, "Note Taker", "[:]"),
    (3, 300, Tier::Beginner, "Page Turner", "[*]"),
    (4, 600, Tier::Apprentice, "Study Buddy", "<.>"),
    (5, 1_000, Tier::Apprentice, "Focused Learner", "<:>"),
    (6, 1_500, Tier::Apprentice, "Flashcard Fiend", "<*>"),
    (7, 2_100, Tier::Scholar, "Scholar", "{.}"),
    (8, 2_800, Tier::Scholar, "Library Regular", "{:}"),
    (9, 3_600, Tier::Scholar, "Deep Diver", "{*}"),
    (10, 4_500, Tier::Expert, "Subject Expert", "(.)"),
    (11, 5_500, Tier::Expert, "Quiz Crusher", "(:)"),
    (12, 6_600, Tier::Expert, "Concept Architect", "(*)"),
    (13, 7_800, Tier::Master, "Master Student", "|.|"),
    (14, 9_100, Tier::Master, "Knowledge Keeper", "|:|"),
    (15, 10_500, Tier::Master, "Mentor", "|*|"),
    (16, 12_000, Tier::Grandmaster, "Grand Scholar", "#.#"),
    (17, 13_600, Tier::Grandmaster, "Sage", "#:#"),
    (18, 15_300, Tier::Grandmaster, "Polymath", "#*#"),
    (19, 17_100, Tier::Legend, "Living Legend", "~.~"),
    (20, 19_000, Tier::Legend, "Eternal Student", "~*~"),
];

/// One row of the level table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelDefinition {
    pub level: u32,
    /// Cumulative XP threshold to reach this level
    pub required_xp: i64,
    pub tier: Tier,
    pub title: String,
    #[serde(default)]
    pub icon: String,
}

/// Progress from the current level towards the next
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelProgress {
    /// XP earned since the current level's threshold
    pub current: i64,
    /// XP span between current and next level (0 at max level)
    pub required: i64,
    /// 0-100
    pub percent: u8,
    pub next_level: Option<u32>,
}

/// Result of classifying a total against the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelStatus {
    pub level: u32,
    pub tier: Tier,
    pub title: String,
    pub icon: String,
    /// True signed ledger total
    pub total_xp: i64,
    /// Total clamped at zero, used for display and classification
    pub display_xp: i64,
    pub progress: LevelProgress,
}

#[derive(Debug, Deserialize)]
struct LevelTableFile {
    levels: Vec<LevelDefinition>,
}

/// Validated, read-only level table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelTable {
    levels: Vec<LevelDefinition>,
}

impl LevelTable {
    pub fn new(levels: Vec<LevelDefinition>) -> Result<Self, ProgressError> {
        let first = levels
            .first()
            .ok_or_else(|| ProgressError::InvalidLevelTable("table is empty".to_string()))?;
        if first.level != 1 || first.required_xp != 0 {
            return Err(ProgressError::InvalidLevelTable(format!(
                "first entry must be level 1 at 0 XP, got level {} at {}",
                first.level, first.required_xp
            )));
        }
        for pair in levels.windows(2) {
            if pair[1].level <= pair[0].level || pair[1].required_xp <= pair[0].required_xp {
                return Err(ProgressError::InvalidLevelTable(format!(
                    "level {} ({} XP) does not follow level {} ({} XP)",
                    pair[1].level, pair[1].required_xp, pair[0].level, pair[0].required_xp
                )));
            }
        }
        Ok(Self { levels })
    }

    /// The built-in 20-level table
    pub fn standard() -> Self {
        let levels = STANDARD_LEVELS
            .iter()
            .map(|&(level, required_xp, tier, title, icon)| LevelDefinition {
                level,
                required_xp,
                tier,
                title: title.to_string(),
                icon: icon.to_string(),
            })
            .collect();
        Self { levels }
    }

    /// Parse a `[[levels]]` TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ProgressError> {
        let file: LevelTableFile = toml::from_str(content)
            .map_err(|e| ProgressError::InvalidLevelTable(e.to_string()))?;
        Self::new(file.levels)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProgressError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn levels(&self) -> &[LevelDefinition] {
        &self.levels
    }

    pub fn max_level(&self) -> u32 {
        self.levels.last().map(|d| d.level).unwrap_or(1)
    }

    pub fn get(&self, level: u32) -> Option<&LevelDefinition> {
        self.levels
            .binary_search_by_key(&level, |d| d.level)
            .ok()
            .map(|idx| &self.levels[idx])
    }

    fn index_for(&self, display_xp: i64) -> usize {
        self.levels
            .partition_point(|d| d.required_xp <= display_xp)
            .saturating_sub(1)
    }

    /// Level number only; cheaper than `classify`
    pub fn level_for(&self, total_xp: i64) -> u32 {
        self.levels[self.index_for(total_xp.max(0))].level
    }

    pub fn classify(&self, total_xp: i64) -> LevelStatus {
        let display_xp = total_xp.max(0);
        let idx = self.index_for(display_xp);
        let def = &self.levels[idx];
        let next = self.levels.get(idx + 1);

        let current = display_xp - def.required_xp;
        let required = next.map(|n| n.required_xp - def.required_xp).unwrap_or(0);
        let percent = if required == 0 {
            100
        } else {
            (current * 100 / required).clamp(0, 100) as u8
        };

        LevelStatus {
            level: def.level,
            tier: def.tier,
            title: def.title.clone(),
            icon: def.icon.clone(),
            total_xp,
            display_xp,
            progress: LevelProgress {
                current,
                required,
                percent,
                next_level: next.map(|n| n.level),
            },
        }
    }
}

impl Default for LevelTable {
    fn default() -> Self {
        Self::standard()
    }
}
