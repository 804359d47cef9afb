//! XP transactions: the immutable records the ledger is built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::ProgressError;

/// Metadata key carrying the study session id for `study_session` awards.
pub const SESSION_ID_KEY: &str = "session_id";

/// Origin of an XP transaction (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    LessonComplete,
    QuizComplete,
    DailyStreak,
    ChallengeComplete,
    AchievementUnlock,
    LevelUpBonus,
    CourseComplete,
    OffPeakBonus,
    StudySession,
    Manual,
    Penalty,
}

impl SourceType {
    pub const ALL: [SourceType; 11] = [
        SourceType::LessonComplete,
        SourceType::QuizComplete,
        SourceType::DailyStreak,
        SourceType::ChallengeComplete,
        SourceType::AchievementUnlock,
        SourceType::LevelUpBonus,
        SourceType::CourseComplete,
        SourceType::OffPeakBonus,
        SourceType::StudySession,
        SourceType::Manual,
        SourceType::Penalty,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::LessonComplete => "lesson_complete",
            SourceType::QuizComplete => "quiz_complete",
            SourceType::DailyStreak => "daily_streak",
            SourceType::ChallengeComplete => "challenge_complete",
            SourceType::AchievementUnlock => "achievement_unlock",
            SourceType::LevelUpBonus => "level_up_bonus",
            SourceType::CourseComplete => "course_complete",
            SourceType::OffPeakBonus => "off_peak_bonus",
            SourceType::StudySession => "study_session",
            SourceType::Manual => "manual",
            SourceType::Penalty => "penalty",
        }
    }

    /// Source types where one `source_id` may be credited at most once per user.
    pub fn is_single_shot(&self) -> bool {
        matches!(
            self,
            SourceType::ChallengeComplete
                | SourceType::AchievementUnlock
                | SourceType::LevelUpBonus
                | SourceType::CourseComplete
                | SourceType::DailyStreak
                | SourceType::OffPeakBonus
        )
    }

    /// Whether a transaction of this type may carry the given signed amount.
    pub fn accepts_amount(&self, amount: i64) -> bool {
        match self {
            SourceType::Penalty => amount < 0,
            SourceType::Manual => amount != 0,
            _ => amount > 0,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = ProgressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ProgressError::InvalidAward(format!("unknown source type '{}'", s)))
    }
}

/// A request to credit (or debit) XP, before the ledger turns it into a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwardRequest {
    pub amount: i64,
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl AwardRequest {
    pub fn new(source_type: SourceType, amount: i64) -> Self {
        Self {
            amount,
            source_type,
            source_id: None,
            metadata: Map::new(),
        }
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Reject zero and wrongly-signed amounts before anything touches the ledger.
    pub fn validate(&self) -> Result<(), ProgressError> {
        if self.amount == 0 {
            return Err(ProgressError::InvalidAward(format!(
                "zero-amount {} award",
                self.source_type
            )));
        }
        if !self.source_type.accepts_amount(self.amount) {
            return Err(ProgressError::InvalidAward(format!(
                "{} does not accept amount {}",
                self.source_type, self.amount
            )));
        }
        if self.source_type.is_single_shot() && self.source_id.is_none() {
            return Err(ProgressError::InvalidAward(format!(
                "{} award requires a source id",
                self.source_type
            )));
        }
        Ok(())
    }

    pub fn idempotency_key(&self) -> Option<String> {
        idempotency_key(self.source_type, self.source_id.as_deref(), &self.metadata)
    }
}

/// Immutable, append-only XP record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XpTransaction {
    /// Client-generated unique id
    pub id: String,
    pub user_id: String,
    /// Signed amount: positive for awards, negative for penalties
    pub amount: i64,
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl XpTransaction {
    /// Only the ledger creates transactions; see `XpLedger::append`.
    pub(crate) fn from_request(user_id: &str, request: AwardRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            amount: request.amount,
            source_type: request.source_type,
            source_id: request.source_id,
            metadata: request.metadata,
            created_at: now,
        }
    }

    pub fn idempotency_key(&self) -> Option<String> {
        idempotency_key(self.source_type, self.source_id.as_deref(), &self.metadata)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.metadata.get(SESSION_ID_KEY).and_then(Value::as_str)
    }
}

fn idempotency_key(
    source_type: SourceType,
    source_id: Option<&str>,
    metadata: &Map<String, Value>,
) -> Option<String> {
    if source_type.is_single_shot() {
        return source_id.map(str::to_string);
    }
    if source_type == SourceType::StudySession {
        return metadata
            .get(SESSION_ID_KEY)
            .and_then(Value::as_str)
            .map(str::to_string);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_round_trip_names() {
        for t in SourceType::ALL {
            assert_eq!(t.as_str().parse::<SourceType>().unwrap(), t);
        }
        assert!("bogus".parse::<SourceType>().is_err());
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&SourceType::LevelUpBonus).unwrap();
        assert_eq!(json, "\"level_up_bonus\"");
    }

    #[test]
    fn test_validate_rejects_zero_and_bad_sign() {
        assert!(AwardRequest::new(SourceType::LessonComplete, 0).validate().is_err());
        assert!(AwardRequest::new(SourceType::LessonComplete, -5).validate().is_err());
        assert!(AwardRequest::new(SourceType::Penalty, 5).validate().is_err());
        assert!(AwardRequest::new(SourceType::Penalty, -5).validate().is_ok());
        assert!(AwardRequest::new(SourceType::Manual, -5).validate().is_ok());
    }

    #[test]
    fn test_single_shot_requires_source_id() {
        let req = AwardRequest::new(SourceType::ChallengeComplete, 50);
        assert!(req.validate().is_err());
        assert!(req.with_source_id("c1").validate().is_ok());
    }

    #[test]
    fn test_idempotency_keys() {
        let lesson = AwardRequest::new(SourceType::LessonComplete, 10).with_source_id("L1");
        assert_eq!(lesson.idempotency_key(), None);

        let claim = AwardRequest::new(SourceType::AchievementUnlock, 10).with_source_id("a1");
        assert_eq!(claim.idempotency_key().as_deref(), Some("a1"));

        let session = AwardRequest::new(SourceType::StudySession, 30)
            .with_source_id("course-9")
            .with_metadata(SESSION_ID_KEY, "s-42");
        assert_eq!(session.idempotency_key().as_deref(), Some("s-42"));
    }
}
