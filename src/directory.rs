//! People, capability and question-attempt lookups.
//!
//! These are the read-only collaborators the composer consumes. The crate
//! ships [`crate::store::SqliteStore`] as one implementation; hosts embed
//! the composer by implementing these traits over their own data.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{
    Capability, Course, CourseId, Group, InvalidEnum, Participant, User, UserId,
};

/// Errors from directory lookups.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An invalid enum value was read from the backing store.
    #[error(transparent)]
    InvalidEnum(#[from] InvalidEnum),

    /// The backing service could not answer.
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Enumerates courses, users, participants and groups.
#[async_trait]
pub trait PersonDirectory: Send + Sync {
    /// Look up a course by id.
    async fn course(&self, course_id: CourseId) -> Result<Option<Course>, DirectoryError>;

    /// Look up a user by id.
    async fn user(&self, user_id: UserId) -> Result<Option<User>, DirectoryError>;

    /// Every user holding at least one role in the course, with roles and groups.
    async fn participants(&self, course_id: CourseId) -> Result<Vec<Participant>, DirectoryError>;

    /// Every group defined in the course, with member ids.
    async fn groups(&self, course_id: CourseId) -> Result<Vec<Group>, DirectoryError>;
}

/// Answers capability checks for a (user, course) pair.
#[async_trait]
pub trait CapabilityChecker: Send + Sync {
    /// Whether `user_id` holds `capability` in `course_id`.
    async fn has_capability(
        &self,
        capability: Capability,
        course_id: CourseId,
        user_id: UserId,
    ) -> Result<bool, DirectoryError>;
}

/// The activity that owns a question attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOwner {
    /// A quiz, identified by its display name.
    Quiz {
        /// Quiz name.
        name: String,
    },
    /// Any other activity type.
    Unknown {
        /// Component that owns the attempt, kept for logging.
        component: String,
    },
}

/// A student's attempt at one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionAttempt {
    /// Attempt id.
    pub id: i64,
    /// User who made the attempt.
    pub user_id: UserId,
    /// Course the owning activity lives in.
    pub course_id: CourseId,
    /// Owning activity.
    pub owner: AttemptOwner,
    /// Question number within the activity.
    pub slot: u32,
    /// Question prompt as stored (HTML).
    pub question_text: String,
    /// The student's last response, when one was recorded.
    pub response_summary: Option<String>,
    /// Link back to the attempt review page.
    pub review_url: String,
}

/// Looks up question attempts for the quiz-question composer.
#[async_trait]
pub trait AttemptSource: Send + Sync {
    /// Load an attempt by id.
    async fn question_attempt(
        &self,
        attempt_id: i64,
    ) -> Result<Option<QuestionAttempt>, DirectoryError>;
}
