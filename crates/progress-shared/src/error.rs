//! Error types for the progression ledger.

use thiserror::Error;

use crate::transaction::SourceType;

#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("Invalid award: {0}")]
    InvalidAward(String),

    /// Re-delivery of a single-shot event; callers treat this as a no-op.
    #[error("Duplicate award for {source_type} ({key})")]
    Duplicate { source_type: SourceType, key: String },

    #[error("Sync failure: {0}")]
    SyncFailure(String),

    #[error("Reconciliation conflict: expected remote total {expected}, got {remote}")]
    ReconciliationConflict { expected: i64, remote: i64 },

    #[error("Invalid level table: {0}")]
    InvalidLevelTable(String),

    #[error("Unknown user: {0}")]
    UnknownUser(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProgressError {
    pub fn code(&self) -> i32 {
        match self {
            ProgressError::InvalidAward(_) => -32010,
            ProgressError::Duplicate { .. } => -32011,
            ProgressError::SyncFailure(_) => -32012,
            ProgressError::ReconciliationConflict { .. } => -32013,
            ProgressError::InvalidLevelTable(_) => -32014,
            ProgressError::UnknownUser(_) => -32015,
            ProgressError::Store(_) => -32016,
            ProgressError::Io(_) => -32006,
            ProgressError::Json(_) => -32700,
        }
    }

    /// Only the initiating activity report may fail in front of a user.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            ProgressError::InvalidAward(_) | ProgressError::UnknownUser(_)
        )
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, ProgressError::Duplicate { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_facing_errors() {
        assert!(ProgressError::InvalidAward("zero".into()).is_user_facing());
        assert!(!ProgressError::SyncFailure("offline".into()).is_user_facing());
        assert!(!ProgressError::ReconciliationConflict {
            expected: 10,
            remote: 12
        }
        .is_user_facing());
    }

    #[test]
    fn test_duplicate_display() {
        let err = ProgressError::Duplicate {
            source_type: SourceType::ChallengeComplete,
            key: "daily-2026-01-01-study_30".into(),
        };
        assert!(err.is_duplicate());
        assert!(err.to_string().contains("challenge_complete"));
    }
}
