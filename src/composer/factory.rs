//! Picks the composer a user is entitled to.

use tracing::debug;

use super::{ComposeError, ComposeServices, ComposeTarget, Composer};
use crate::types::{Capability, CourseId, UserId};

/// The composer `user_id` gets when opening mail in a course.
///
/// Users who can send to participants get open selection; otherwise users
/// who can ask the instructor get the fixed instructor composer. Anyone else
/// gets `Ok(None)`, or a permission error when `mandatory` is set.
///
/// # Errors
///
/// Returns [`ComposeError::Permission`] when `mandatory` is set and no
/// composer applies, or any error from [`Composer::construct`].
pub async fn select_composer(
    services: ComposeServices,
    course_id: CourseId,
    user_id: UserId,
    mandatory: bool,
) -> Result<Option<Composer>, ComposeError> {
    let capabilities = services.capabilities.clone();
    let target = if capabilities
        .has_capability(Capability::SendToParticipants, course_id, user_id)
        .await?
    {
        ComposeTarget::New
    } else if capabilities
        .has_capability(Capability::AskInstructor, course_id, user_id)
        .await?
    {
        ComposeTarget::AskInstructor
    } else if mandatory {
        return Err(ComposeError::Permission(format!(
            "user {user_id} may not send mail in course {course_id}"
        )));
    } else {
        debug!(course_id, user_id, "no composer available");
        return Ok(None);
    };
    Composer::construct(services, course_id, None, target, user_id)
        .await
        .map(Some)
}
