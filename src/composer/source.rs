//! Where a composer's recipients come from.

use tracing::debug;

use super::ComposeError;
use crate::directory::{CapabilityChecker, DirectoryError, PersonDirectory};
use crate::recipients::RecipientSet;
use crate::types::{Capability, SendContext, User, UserId};

/// Recipient source of a composer.
#[derive(Debug, Clone)]
pub enum RecipientSource {
    /// Any subset of the eligible set, chosen by the sender.
    Open(RecipientSet),
    /// Like [`RecipientSource::Open`], starting from a stored selection.
    FromRecord {
        /// Eligible set used to re-validate the selection.
        set: RecipientSet,
        /// Recipient ids stored on the loaded record.
        preselected: Vec<UserId>,
    },
    /// Everyone receiving instructor questions. Loaded on first use.
    FixedSet {
        /// The loaded list.
        cached: Option<Vec<User>>,
    },
}

impl RecipientSource {
    /// Whether the sender cannot change the recipients.
    pub fn is_fixed(&self) -> bool {
        matches!(self, Self::FixedSet { .. })
    }

    /// Ids selected when the compose view opens.
    pub fn preselected(&self) -> Vec<UserId> {
        match self {
            Self::Open(_) => Vec::new(),
            Self::FromRecord { set, preselected } => preselected
                .iter()
                .copied()
                .filter(|id| set.contains(*id))
                .collect(),
            Self::FixedSet { cached } => cached
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(|u| u.id)
                .collect(),
        }
    }

    /// Users offered for selection. Empty for a fixed set not yet loaded.
    pub fn candidates(&self) -> &[User] {
        match self {
            Self::Open(set) | Self::FromRecord { set, .. } => set.users(),
            Self::FixedSet { cached } => cached.as_deref().unwrap_or_default(),
        }
    }

    /// Load the fixed set if it has not been loaded yet.
    pub(crate) async fn load(
        &mut self,
        directory: &dyn PersonDirectory,
        capabilities: &dyn CapabilityChecker,
        ctx: &SendContext,
    ) -> Result<(), DirectoryError> {
        if let Self::FixedSet { cached } = self {
            if cached.is_none() {
                *cached = Some(instructors(directory, capabilities, ctx).await?);
            }
        }
        Ok(())
    }

    /// The users a submission addresses.
    ///
    /// Open sources admit the submitted ids against the eligible set; fixed
    /// sources ignore them.
    pub(crate) async fn resolve(
        &mut self,
        submitted: &[UserId],
        directory: &dyn PersonDirectory,
        capabilities: &dyn CapabilityChecker,
        ctx: &SendContext,
    ) -> Result<Vec<User>, ComposeError> {
        self.load(directory, capabilities, ctx).await?;
        match self {
            Self::Open(set) | Self::FromRecord { set, .. } => Ok(set.admit(submitted)?),
            Self::FixedSet { cached } => Ok(cached.clone().unwrap_or_default()),
        }
    }

    /// Whether anyone at all could be addressed.
    pub(crate) async fn any(
        &mut self,
        directory: &dyn PersonDirectory,
        capabilities: &dyn CapabilityChecker,
        ctx: &SendContext,
    ) -> Result<bool, DirectoryError> {
        self.load(directory, capabilities, ctx).await?;
        Ok(!self.candidates().is_empty())
    }
}

/// Participants of the course holding the receive-instructor-questions
/// capability, excluding the acting user.
///
/// # Errors
///
/// Returns [`DirectoryError`] if a lookup fails.
pub async fn instructors(
    directory: &dyn PersonDirectory,
    capabilities: &dyn CapabilityChecker,
    ctx: &SendContext,
) -> Result<Vec<User>, DirectoryError> {
    let course_id = ctx.course.id;
    let mut found = Vec::new();
    for participant in directory.participants(course_id).await? {
        let user = participant.user;
        if user.id == ctx.acting_user.id {
            continue;
        }
        if capabilities
            .has_capability(Capability::ReceiveAskInstructor, course_id, user.id)
            .await?
        {
            found.push(user);
        }
    }
    debug!(course_id, count = found.len(), "instructor recipients loaded");
    Ok(found)
}
