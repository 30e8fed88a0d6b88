//! Message, signature and course-config persistence.
//!
//! [`RecordStore`] is the composer's view of storage: one logical table per
//! [`MessageStatus`] (`mail_drafts`, `mail_log`), the sender's signatures
//! and per-course settings. [`SqliteStore`] implements it together with the
//! directory traits over one SQLite database.

pub mod schema;
pub mod sqlite;

use async_trait::async_trait;

use crate::types::{
    CourseConfig, CourseId, InvalidEnum, Message, MessageId, MessageStatus, Signature, UserId,
};

pub use self::sqlite::SqliteStore;

/// Errors from record storage.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An invalid enum value was read from the database.
    #[error(transparent)]
    InvalidEnum(#[from] InvalidEnum),

    /// A stored column could not be decoded.
    #[error("corrupt {field} column: {reason}")]
    Corrupt {
        /// Which column failed to decode.
        field: &'static str,
        /// Decoder message.
        reason: String,
    },

    /// An update targeted a row that does not exist.
    #[error("{status} message {id} not found")]
    NotFound {
        /// Table the row was expected in.
        status: &'static str,
        /// Missing row id.
        id: MessageId,
    },

    /// An update was attempted on a message that has no id yet.
    #[error("message has not been persisted")]
    Unsaved,
}

/// Storage for composed messages and the settings that shape them.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert `message` into the table for `message.status`, returning its new id.
    async fn insert_message(&self, message: &Message) -> Result<MessageId, StoreError>;

    /// Overwrite an existing message row (last write wins).
    async fn update_message(&self, message: &Message) -> Result<(), StoreError>;

    /// Load one message.
    async fn get_message(
        &self,
        status: MessageStatus,
        id: MessageId,
    ) -> Result<Option<Message>, StoreError>;

    /// Delete one message. Returns whether a row was removed.
    async fn delete_message(&self, status: MessageStatus, id: MessageId)
        -> Result<bool, StoreError>;

    /// A sender's messages in one course, newest first.
    async fn list_messages(
        &self,
        status: MessageStatus,
        course_id: CourseId,
        sender_id: UserId,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError>;

    /// Number of messages [`RecordStore::list_messages`] would page through.
    async fn count_messages(
        &self,
        status: MessageStatus,
        course_id: CourseId,
        sender_id: UserId,
    ) -> Result<u64, StoreError>;

    /// A user's signatures, default first.
    async fn signatures(&self, user_id: UserId) -> Result<Vec<Signature>, StoreError>;

    /// Stored settings for a course, if any were saved.
    async fn course_config(&self, course_id: CourseId)
        -> Result<Option<CourseConfig>, StoreError>;

    /// Replace a course's stored settings.
    async fn save_course_config(
        &self,
        course_id: CourseId,
        config: &CourseConfig,
    ) -> Result<(), StoreError>;

    /// Drop a course's stored settings so site defaults apply again.
    async fn reset_course_config(&self, course_id: CourseId) -> Result<(), StoreError>;
}
