//! A sender's sent log and drafts: paging and deletion.

use tracing::info;

use crate::composer::{ComposeError, ComposeServices};
use crate::files::AreaRef;
use crate::store::{RecordStore, StoreError};
use crate::types::{Capability, CourseId, Message, MessageId, MessageStatus, UserId};

/// One page of a mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxPage {
    /// Messages on this page, newest first.
    pub messages: Vec<Message>,
    /// Messages across all pages.
    pub total: u64,
    /// Zero-based page number.
    pub page: u32,
    /// Page size.
    pub per_page: u32,
}

impl MailboxPage {
    /// Whether a later page has messages.
    pub fn has_more(&self) -> bool {
        let shown = u64::from(self.page.saturating_add(1)).saturating_mul(u64::from(self.per_page));
        shown < self.total
    }
}

/// Page `page` (zero-based) of `user_id`'s messages in a course.
///
/// # Errors
///
/// Returns [`StoreError`] if the lookup fails.
pub async fn list(
    store: &dyn RecordStore,
    status: MessageStatus,
    course_id: CourseId,
    user_id: UserId,
    page: u32,
    per_page: u32,
) -> Result<MailboxPage, StoreError> {
    let per_page = per_page.max(1);
    let offset = page.saturating_mul(per_page);
    let messages = store
        .list_messages(status, course_id, user_id, offset, per_page)
        .await?;
    let total = store.count_messages(status, course_id, user_id).await?;
    Ok(MailboxPage {
        messages,
        total,
        page,
        per_page,
    })
}

/// Delete a message and its attachments.
///
/// Drafts can only be deleted by their owner. Sent messages can be deleted
/// by their owner or by a holder of [`Capability::DeleteMessages`] in the
/// message's course.
///
/// # Errors
///
/// - [`ComposeError::NotFound`] if the message does not exist
/// - [`ComposeError::Permission`] if `acting_user` may not delete it
pub async fn delete(
    services: &ComposeServices,
    status: MessageStatus,
    id: MessageId,
    acting_user: UserId,
) -> Result<(), ComposeError> {
    let message = services
        .store
        .get_message(status, id)
        .await?
        .ok_or_else(|| ComposeError::NotFound(format!("{} message {id}", status.as_str())))?;

    let allowed = message.sender_id == acting_user
        || (status == MessageStatus::Sent
            && services
                .capabilities
                .has_capability(Capability::DeleteMessages, message.course_id, acting_user)
                .await?);
    if !allowed {
        return Err(ComposeError::Permission(format!(
            "user {acting_user} may not delete {} message {id}",
            status.as_str()
        )));
    }

    let course = services
        .directory
        .course(message.course_id)
        .await?
        .ok_or_else(|| ComposeError::NotFound(format!("course {}", message.course_id)))?;
    services.store.delete_message(status, id).await?;
    services
        .files
        .delete_area(&AreaRef::attachments(course.context_id, status, id))
        .await?;

    info!(id, status = status.as_str(), acting_user, "message deleted");
    Ok(())
}
