//! Recipient resolution: who may a viewer address in a course.
//!
//! A candidate is eligible when at least one of their roles is on the
//! course's allow-list (exact shortname match) and they share a group the
//! viewer can see. Courses without any groups grant global access, so only
//! the role check applies there. The viewer is never their own candidate.
//!
//! [`resolve`] is pure; [`load`] fetches the inputs from the directory.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::directory::{CapabilityChecker, DirectoryError, PersonDirectory};
use crate::types::{Capability, Group, GroupId, Participant, Role, SendContext, User, UserId};

/// A submitted recipient id outside the eligible set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("user {0} is not an eligible recipient")]
pub struct RecipientAccessError(pub UserId);

/// Which groups the viewer can see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupVisibility {
    /// Every group in the course.
    All,
    /// Only these groups (the viewer's own memberships).
    Only(Vec<GroupId>),
}

impl GroupVisibility {
    /// Visibility for `viewer`: everything, or the groups listing them as a member.
    pub fn for_viewer(viewer: UserId, sees_all: bool, groups: &[Group]) -> Self {
        if sees_all {
            return Self::All;
        }
        Self::Only(
            groups
                .iter()
                .filter(|g| g.members.contains(&viewer))
                .map(|g| g.id)
                .collect(),
        )
    }

    fn admits(&self, group: GroupId) -> bool {
        match self {
            Self::All => true,
            Self::Only(ids) => ids.contains(&group),
        }
    }
}

/// The outcome of a resolution: eligible users plus filter metadata.
#[derive(Debug, Clone, Default)]
pub struct RecipientSet {
    users: Vec<User>,
    index: HashMap<UserId, usize>,
    users_to_roles: HashMap<UserId, Vec<Role>>,
    users_to_groups: HashMap<UserId, Vec<Group>>,
    roles: Vec<Role>,
    groups: Vec<Group>,
    global_access: bool,
}

impl RecipientSet {
    /// Eligible users, ordered by last name then first name.
    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// Whether nobody can be addressed.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Number of eligible users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether `id` is eligible.
    pub fn contains(&self, id: UserId) -> bool {
        self.index.contains_key(&id)
    }

    /// The eligible user with this id.
    pub fn get(&self, id: UserId) -> Option<&User> {
        self.index.get(&id).and_then(|&i| self.users.get(i))
    }

    /// Allow-listed roles the user matched on (empty if not eligible).
    pub fn matched_roles(&self, id: UserId) -> &[Role] {
        self.users_to_roles.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Visible groups the user matched on (empty under global access).
    pub fn matched_groups(&self, id: UserId) -> &[Group] {
        self.users_to_groups.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Allow-listed roles present among eligible users, for role filtering.
    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    /// Groups visible to the viewer, for group filtering.
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Whether the course defines no groups at all.
    pub fn global_access(&self) -> bool {
        self.global_access
    }

    /// Eligible users that matched on `group`.
    pub fn in_group(&self, group: GroupId) -> Vec<&User> {
        self.users
            .iter()
            .filter(|u| self.matched_groups(u.id).iter().any(|g| g.id == group))
            .collect()
    }

    /// Eligible users that matched on the role `shortname`.
    pub fn with_role(&self, shortname: &str) -> Vec<&User> {
        self.users
            .iter()
            .filter(|u| {
                self.matched_roles(u.id)
                    .iter()
                    .any(|r| r.shortname == shortname)
            })
            .collect()
    }

    /// Re-validate a submitted id list against the eligible set.
    ///
    /// Duplicates collapse to their first occurrence.
    ///
    /// # Errors
    ///
    /// Returns [`RecipientAccessError`] for the first id that is not eligible;
    /// nothing is admitted in that case.
    pub fn admit(&self, ids: &[UserId]) -> Result<Vec<User>, RecipientAccessError> {
        let mut seen = HashSet::new();
        let mut admitted = Vec::with_capacity(ids.len());
        for &id in ids {
            let user = self.get(id).ok_or(RecipientAccessError(id))?;
            if seen.insert(id) {
                admitted.push(user.clone());
            }
        }
        Ok(admitted)
    }
}

/// Resolve the eligible recipients for `viewer` among `participants`.
///
/// `groups` must be every group in the course; `allow_list` holds the
/// role shortnames from the course config.
pub fn resolve(
    viewer: UserId,
    participants: &[Participant],
    groups: &[Group],
    allow_list: &[String],
    visibility: &GroupVisibility,
) -> RecipientSet {
    let global_access = groups.is_empty();
    let groups_by_id: HashMap<GroupId, &Group> = groups.iter().map(|g| (g.id, g)).collect();

    let mut set = RecipientSet {
        global_access,
        groups: groups
            .iter()
            .filter(|g| visibility.admits(g.id))
            .cloned()
            .collect(),
        ..RecipientSet::default()
    };
    let mut role_names = HashSet::new();

    for participant in participants {
        let user = &participant.user;
        if user.id == viewer || set.index.contains_key(&user.id) {
            continue;
        }

        let mut matched_roles: Vec<Role> = Vec::new();
        for role in &participant.roles {
            let allowed = allow_list.iter().any(|name| *name == role.shortname);
            if allowed && !matched_roles.iter().any(|r| r.shortname == role.shortname) {
                matched_roles.push(role.clone());
            }
        }
        if matched_roles.is_empty() {
            continue;
        }

        let matched_groups: Vec<Group> = participant
            .groups
            .iter()
            .filter(|id| visibility.admits(**id))
            .filter_map(|id| groups_by_id.get(id).map(|g| (*g).clone()))
            .collect();
        if !global_access && matched_groups.is_empty() {
            continue;
        }

        for role in &matched_roles {
            if role_names.insert(role.shortname.clone()) {
                set.roles.push(role.clone());
            }
        }
        set.users_to_roles.insert(user.id, matched_roles);
        set.users_to_groups.insert(user.id, matched_groups);
        set.users.push(user.clone());
        set.index.insert(user.id, 0);
    }

    set.users.sort_by(|a, b| {
        (a.lastname.as_str(), a.firstname.as_str(), a.id).cmp(&(
            b.lastname.as_str(),
            b.firstname.as_str(),
            b.id,
        ))
    });
    set.index = set
        .users
        .iter()
        .enumerate()
        .map(|(i, u)| (u.id, i))
        .collect();
    set.roles.sort_by(|a, b| a.shortname.cmp(&b.shortname));
    set
}

/// Fetch participants and groups for the context's course and resolve them.
///
/// # Errors
///
/// Returns [`DirectoryError`] if a lookup fails.
pub async fn load(
    directory: &dyn PersonDirectory,
    capabilities: &dyn CapabilityChecker,
    ctx: &SendContext,
) -> Result<RecipientSet, DirectoryError> {
    let course_id = ctx.course.id;
    let viewer = ctx.acting_user.id;

    let sees_all = capabilities
        .has_capability(Capability::AccessAllGroups, course_id, viewer)
        .await?;
    let groups = directory.groups(course_id).await?;
    let participants = directory.participants(course_id).await?;

    let visibility = GroupVisibility::for_viewer(viewer, sees_all, &groups);
    let set = resolve(
        viewer,
        &participants,
        &groups,
        &ctx.config.role_selection,
        &visibility,
    );
    debug!(
        course_id,
        viewer,
        sees_all,
        candidates = participants.len(),
        eligible = set.len(),
        "recipients resolved"
    );
    Ok(set)
}
