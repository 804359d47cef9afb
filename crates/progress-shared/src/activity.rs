//! Activity reports: the raw facts collaborators feed into the ledger.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::challenges::ChallengeType;
use crate::error::ProgressError;
use crate::streaks::offset_from_minutes;
use crate::transaction::{AwardRequest, SourceType, SESSION_ID_KEY};

/// Upper bound on the minutes one report may claim (a full day)
pub const MAX_REPORT_MINUTES: u64 = 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    StudySession,
    LessonComplete,
    QuizComplete,
    CourseComplete,
    CourseAdded,
    NoteCreated,
    Manual,
    Penalty,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::StudySession => "study_session",
            ActivityKind::LessonComplete => "lesson_complete",
            ActivityKind::QuizComplete => "quiz_complete",
            ActivityKind::CourseComplete => "course_complete",
            ActivityKind::CourseAdded => "course_added",
            ActivityKind::NoteCreated => "note_created",
            ActivityKind::Manual => "manual",
            ActivityKind::Penalty => "penalty",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "study_session" => Some(ActivityKind::StudySession),
            "lesson_complete" => Some(ActivityKind::LessonComplete),
            "quiz_complete" => Some(ActivityKind::QuizComplete),
            "course_complete" => Some(ActivityKind::CourseComplete),
            "course_added" => Some(ActivityKind::CourseAdded),
            "note_created" => Some(ActivityKind::NoteCreated),
            "manual" => Some(ActivityKind::Manual),
            "penalty" => Some(ActivityKind::Penalty),
            _ => None,
        }
    }

    /// Ledger source type for XP carried by this activity
    pub fn source_type(&self) -> SourceType {
        match self {
            ActivityKind::StudySession => SourceType::StudySession,
            ActivityKind::LessonComplete => SourceType::LessonComplete,
            ActivityKind::QuizComplete => SourceType::QuizComplete,
            ActivityKind::CourseComplete => SourceType::CourseComplete,
            ActivityKind::CourseAdded | ActivityKind::NoteCreated | ActivityKind::Manual => {
                SourceType::Manual
            }
            ActivityKind::Penalty => SourceType::Penalty,
        }
    }

    /// Counts towards the day-based streak
    pub fn qualifies_for_streak(&self) -> bool {
        matches!(
            self,
            ActivityKind::StudySession
                | ActivityKind::LessonComplete
                | ActivityKind::QuizComplete
                | ActivityKind::CourseComplete
        )
    }

    /// Count-style challenge this activity advances by one
    pub fn challenge_type(&self) -> Option<ChallengeType> {
        match self {
            ActivityKind::StudySession => Some(ChallengeType::SessionsCount),
            ActivityKind::LessonComplete => Some(ChallengeType::LessonsCompleted),
            ActivityKind::QuizComplete => Some(ChallengeType::QuizzesCompleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Study minutes (study sessions only)
    #[serde(default)]
    pub minutes: u64,
    /// When the activity finished; defaults to receipt time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// User's local offset, minutes east of UTC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc_offset_minutes: Option<i32>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// `reportActivity(userId, activityType, amount, context)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityReport {
    pub user_id: String,
    pub kind: ActivityKind,
    /// Signed XP; 0 updates trackers without touching the ledger
    #[serde(default)]
    pub xp: i64,
    #[serde(default)]
    pub context: ActivityContext,
}

impl ActivityReport {
    pub fn new(user_id: &str, kind: ActivityKind, xp: i64) -> Self {
        Self {
            user_id: user_id.to_string(),
            kind,
            xp,
            context: ActivityContext::default(),
        }
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.context.source_id = Some(source_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>, minutes: u64) -> Self {
        self.context.session_id = Some(session_id.into());
        self.context.minutes = minutes;
        self
    }

    pub fn ended_at(mut self, at: DateTime<Utc>) -> Self {
        self.context.ended_at = Some(at);
        self
    }

    pub fn with_offset(mut self, minutes: i32) -> Self {
        self.context.utc_offset_minutes = Some(minutes);
        self
    }

    pub fn validate(&self) -> Result<(), ProgressError> {
        if self.user_id.trim().is_empty() {
            return Err(ProgressError::InvalidAward("missing user id".to_string()));
        }
        match (self.kind, self.xp) {
            (ActivityKind::Penalty, xp) if xp >= 0 => {
                return Err(ProgressError::InvalidAward(
                    "penalty requires a negative amount".to_string(),
                ))
            }
            (kind, xp) if kind != ActivityKind::Penalty && xp < 0 => {
                return Err(ProgressError::InvalidAward(format!(
                    "{} cannot carry negative XP ({})",
                    kind.as_str(),
                    xp
                )))
            }
            _ => {}
        }
        if self.context.minutes > MAX_REPORT_MINUTES {
            return Err(ProgressError::InvalidAward(format!(
                "{} minutes exceeds the {} minute limit per report",
                self.context.minutes, MAX_REPORT_MINUTES
            )));
        }
        if let Some(request) = self.award_request() {
            request.validate()?;
        }
        Ok(())
    }

    /// Ledger request for the XP this report carries; `None` when `xp == 0`
    pub fn award_request(&self) -> Option<AwardRequest> {
        if self.xp == 0 {
            return None;
        }
        let mut request = AwardRequest::new(self.kind.source_type(), self.xp);
        request.metadata = self.context.metadata.clone();
        if let Some(source_id) = &self.context.source_id {
            request = request.with_source_id(source_id.clone());
        }
        if let Some(session_id) = &self.context.session_id {
            request = request.with_metadata(SESSION_ID_KEY, session_id.clone());
        }
        if self.kind.source_type() == SourceType::Manual && self.kind != ActivityKind::Manual {
            request = request.with_metadata("activity", self.kind.as_str());
        }
        Some(request)
    }

    pub fn ended_at_or(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.context.ended_at.unwrap_or(now)
    }
}

/// Local hour window for the off-peak bonus; may wrap midnight (22 -> 6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffPeakWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl OffPeakWindow {
    pub fn contains_hour(&self, hour: u32) -> bool {
        if self.start_hour == self.end_hour {
            return false;
        }
        if self.start_hour < self.end_hour {
            (self.start_hour..self.end_hour).contains(&hour)
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }

    pub fn contains(&self, at: DateTime<Utc>, utc_offset_minutes: i32) -> bool {
        let local = at.with_timezone(&offset_from_minutes(utc_offset_minutes));
        self.contains_hour(local.hour())
    }
}

impl Default for OffPeakWindow {
    fn default() -> Self {
        Self {
            start_hour: 22,
            end_hour: 6,
        }
    }
}
