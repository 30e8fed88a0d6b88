//! Domain types shared by the resolver, the composer and the stores.
//!
//! Identifiers are plain SQLite row ids. Enums that are persisted carry an
//! `as_str` / `parse` pair matching the stored text value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User row id.
pub type UserId = i64;
/// Course row id.
pub type CourseId = i64;
/// Group row id.
pub type GroupId = i64;
/// Role row id.
pub type RoleId = i64;
/// Message row id (unique per status table).
pub type MessageId = i64;
/// Signature row id.
pub type SignatureId = i64;

/// An unrecognised enum value read from storage or configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field} value: {value:?}")]
pub struct InvalidEnum {
    /// Which field contained the bad value.
    pub field: &'static str,
    /// The unexpected value.
    pub value: String,
}

/// Body format of a message, also a user's preferred mail format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    /// HTML body.
    #[default]
    Html,
    /// Plain text body.
    Plain,
}

impl BodyFormat {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Plain => "plain",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEnum`] if the value is not a recognised format.
    pub fn parse(s: &str) -> Result<Self, InvalidEnum> {
        match s {
            "html" => Ok(Self::Html),
            "plain" => Ok(Self::Plain),
            other => Err(InvalidEnum {
                field: "format",
                value: other.to_owned(),
            }),
        }
    }
}

/// A person known to the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Database id.
    pub id: UserId,
    /// Given name.
    pub firstname: String,
    /// Family name.
    pub lastname: String,
    /// Delivery address.
    pub email: String,
    /// Preferred body format for outgoing mail.
    pub mail_format: BodyFormat,
}

impl User {
    /// "First Last" display name.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.firstname, self.lastname)
    }
}

/// A role definition. Roles are matched by exact shortname.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Role {
    /// Database id.
    pub id: RoleId,
    /// Shortname such as `student` or `editingteacher`.
    pub shortname: String,
}

/// A named group of users inside one course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Database id.
    pub id: GroupId,
    /// Display name.
    pub name: String,
    /// Ids of the users in this group.
    pub members: Vec<UserId>,
}

/// A user enrolled in a course, with their roles and groups there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// The enrolled user.
    pub user: User,
    /// Roles held in the course.
    pub roles: Vec<Role>,
    /// Groups the user belongs to in the course.
    pub groups: Vec<GroupId>,
}

/// A course, the scope for capabilities and memberships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    /// Database id.
    pub id: CourseId,
    /// Context id used to address file areas.
    pub context_id: i64,
    /// Short name, e.g. `CS101`.
    pub shortname: String,
    /// Administrative id number (may be empty).
    pub idnumber: String,
    /// Full display name.
    pub fullname: String,
}

impl Course {
    /// The label to put in front of subjects under `prefix`, if the course has one.
    pub fn label(&self, prefix: SubjectPrefix) -> Option<&str> {
        let label = match prefix {
            SubjectPrefix::None => return None,
            SubjectPrefix::IdNumber => self.idnumber.as_str(),
            SubjectPrefix::ShortName => self.shortname.as_str(),
        };
        if label.trim().is_empty() {
            None
        } else {
            Some(label)
        }
    }
}

/// Which course field, if any, is prefixed to outgoing subjects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectPrefix {
    /// Subjects go out unchanged.
    #[default]
    None,
    /// `[idnumber] subject`.
    IdNumber,
    /// `[shortname] subject`.
    ShortName,
}

impl SubjectPrefix {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::IdNumber => "idnumber",
            Self::ShortName => "shortname",
        }
    }

    /// Parse from a stored text value.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEnum`] if the value is not a recognised policy.
    pub fn parse(s: &str) -> Result<Self, InvalidEnum> {
        match s {
            "none" | "" | "0" => Ok(Self::None),
            "idnumber" => Ok(Self::IdNumber),
            "shortname" => Ok(Self::ShortName),
            other => Err(InvalidEnum {
                field: "prepend",
                value: other.to_owned(),
            }),
        }
    }
}

/// Per-course mail settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseConfig {
    /// Role shortnames whose holders may be addressed.
    pub role_selection: Vec<String>,
    /// Subject prefix policy.
    pub prepend: SubjectPrefix,
    /// Whether senders get a copy of their own mail by default.
    pub receipt: bool,
}

/// Everything a composer needs to know about who is sending, and where.
#[derive(Debug, Clone)]
pub struct SendContext {
    /// The sender.
    pub acting_user: User,
    /// The course the message is sent from.
    pub course: Course,
    /// The course's mail settings.
    pub config: CourseConfig,
}

/// Which logical table a message lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Saved, not sent; editable by its owner.
    Draft,
    /// Sent; immutable apart from deletion.
    Sent,
}

impl MessageStatus {
    /// Returns the string representation used in logs and file areas.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "drafts",
            Self::Sent => "log",
        }
    }
}

/// A composed message, as persisted and as dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Database id (`None` until persisted).
    pub id: Option<MessageId>,
    /// Course the message was composed in.
    pub course_id: CourseId,
    /// Sender.
    pub sender_id: UserId,
    /// Subject as typed by the sender, never prefixed.
    pub subject: String,
    /// Body text.
    pub body: String,
    /// Body format.
    pub format: BodyFormat,
    /// Names of the attached files.
    pub attachments: Vec<String>,
    /// Recipients in selection order.
    pub recipients: Vec<UserId>,
    /// When the message was saved or sent.
    pub time: DateTime<Utc>,
    /// Selected signature (`None` for no signature).
    pub signature_id: Option<SignatureId>,
    /// Whether the sender receives a copy.
    pub receipt: bool,
    /// Whether the message may never be forwarded.
    pub no_forward: bool,
    /// Draft or sent.
    pub status: MessageStatus,
    /// Set on the outgoing copy once the course label has been applied.
    #[serde(skip)]
    pub subject_prefixed: bool,
}

/// A reusable text block owned by a sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Database id.
    pub id: SignatureId,
    /// Owner.
    pub user_id: UserId,
    /// Short title shown in pickers.
    pub title: String,
    /// Signature body, appended at send time.
    pub text: String,
    /// Whether this is the owner's default signature.
    pub is_default: bool,
}

/// Named permissions checked against a (user, course) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// May compose to any eligible participant.
    SendToParticipants,
    /// May use the restricted "ask instructor" composer.
    AskInstructor,
    /// Receives "ask instructor" messages.
    ReceiveAskInstructor,
    /// Sees every group in the course.
    AccessAllGroups,
    /// May delete other people's sent messages.
    DeleteMessages,
    /// May change the course's mail settings.
    Configure,
}

impl Capability {
    /// Returns the capability name stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendToParticipants => "mail:send",
            Self::AskInstructor => "mail:ask_instructor",
            Self::ReceiveAskInstructor => "mail:receive_ask_instructor",
            Self::AccessAllGroups => "site:access_all_groups",
            Self::DeleteMessages => "mail:delete",
            Self::Configure => "mail:configure",
        }
    }

    /// Parse from a stored capability name.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEnum`] if the name is not a known capability.
    pub fn parse(s: &str) -> Result<Self, InvalidEnum> {
        match s {
            "mail:send" => Ok(Self::SendToParticipants),
            "mail:ask_instructor" => Ok(Self::AskInstructor),
            "mail:receive_ask_instructor" => Ok(Self::ReceiveAskInstructor),
            "site:access_all_groups" => Ok(Self::AccessAllGroups),
            "mail:delete" => Ok(Self::DeleteMessages),
            "mail:configure" => Ok(Self::Configure),
            other => Err(InvalidEnum {
                field: "capability",
                value: other.to_owned(),
            }),
        }
    }
}
