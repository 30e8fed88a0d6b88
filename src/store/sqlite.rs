//! SQLite implementation of the storage and directory traits.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, trace};

use super::{schema, RecordStore, StoreError};
use crate::directory::{
    AttemptOwner, AttemptSource, CapabilityChecker, DirectoryError, PersonDirectory,
    QuestionAttempt,
};
use crate::types::{
    BodyFormat, Capability, Course, CourseConfig, CourseId, Group, GroupId, Message, MessageId,
    MessageStatus, Participant, Role, Signature, SignatureId, SubjectPrefix, User, UserId,
};

/// Row type for `mail_log` / `mail_drafts`.
type MessageRow = (
    i64,
    i64,
    i64,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<i64>,
    bool,
    bool,
);

/// Row type for `users`.
type UserRow = (i64, String, String, String, String);

/// Row type for `question_attempts`.
type AttemptRow = (
    i64,
    i64,
    i64,
    String,
    String,
    i64,
    String,
    String,
    Option<String>,
);

const MESSAGE_COLUMNS: &str = "id, course_id, sender_id, subject, body, format, attachments, \
     recipients, time, signature_id, receipt, no_forward";

fn table(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Draft => "mail_drafts",
        MessageStatus::Sent => "mail_log",
    }
}

fn encode_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            field: "time",
            reason: e.to_string(),
        })
}

fn encode_list<T: serde::Serialize>(field: &'static str, list: &[T]) -> Result<String, StoreError> {
    serde_json::to_string(list).map_err(|e| StoreError::Corrupt {
        field,
        reason: e.to_string(),
    })
}

fn decode_list<T: serde::de::DeserializeOwned>(
    field: &'static str,
    s: &str,
) -> Result<Vec<T>, StoreError> {
    serde_json::from_str(s).map_err(|e| StoreError::Corrupt {
        field,
        reason: e.to_string(),
    })
}

fn message_from_row(status: MessageStatus, row: MessageRow) -> Result<Message, StoreError> {
    let (
        id,
        course_id,
        sender_id,
        subject,
        body,
        format,
        attachments,
        recipients,
        time,
        signature_id,
        receipt,
        no_forward,
    ) = row;
    Ok(Message {
        id: Some(id),
        course_id,
        sender_id,
        subject,
        body,
        format: BodyFormat::parse(&format)?,
        attachments: decode_list("attachments", &attachments)?,
        recipients: decode_list("recipients", &recipients)?,
        time: decode_time(&time)?,
        signature_id,
        receipt,
        no_forward,
        status,
        subject_prefixed: false,
    })
}

fn user_from_row(row: UserRow) -> Result<User, DirectoryError> {
    let (id, firstname, lastname, email, format) = row;
    Ok(User {
        id,
        firstname,
        lastname,
        email,
        mail_format: BodyFormat::parse(&format)?,
    })
}

/// Storage, directory and capability lookups over one SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap an existing pool and make sure the schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the schema cannot be created.
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        schema::run(&pool).await?;
        Ok(Self { pool })
    }

    /// Open (creating if needed) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the file cannot be opened.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(sqlx::Error::Io)?;
            }
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        debug!(path = %path.display(), "database opened");
        Self::new(pool).await
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ── Directory seeding ───────────────────────────────────────

    /// Insert or replace a course.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub async fn put_course(&self, course: &Course) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO courses (id, context_id, shortname, idnumber, fullname) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(course.id)
        .bind(course.context_id)
        .bind(&course.shortname)
        .bind(&course.idnumber)
        .bind(&course.fullname)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or replace a user.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub async fn put_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO users (id, firstname, lastname, email, mail_format) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(user.id)
        .bind(&user.firstname)
        .bind(&user.lastname)
        .bind(&user.email)
        .bind(user.mail_format.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or replace a role and its capabilities.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub async fn put_role(&self, role: &Role, capabilities: &[Capability]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT OR REPLACE INTO roles (id, shortname) VALUES (?1, ?2)")
            .bind(role.id)
            .bind(&role.shortname)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM role_capabilities WHERE role_id = ?1")
            .bind(role.id)
            .execute(&mut *tx)
            .await?;
        for capability in capabilities {
            sqlx::query("INSERT INTO role_capabilities (role_id, capability) VALUES (?1, ?2)")
                .bind(role.id)
                .bind(capability.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Give `user_id` the role `role_id` in a course.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub async fn assign_role(
        &self,
        course_id: CourseId,
        user_id: UserId,
        role_id: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR IGNORE INTO role_assignments (course_id, user_id, role_id) \
             VALUES (?1, ?2, ?3)",
        )
        .bind(course_id)
        .bind(user_id)
        .bind(role_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or replace a group and its member list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub async fn put_group(&self, course_id: CourseId, group: &Group) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT OR REPLACE INTO course_groups (id, course_id, name) VALUES (?1, ?2, ?3)")
            .bind(group.id)
            .bind(course_id)
            .bind(&group.name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM group_members WHERE group_id = ?1")
            .bind(group.id)
            .execute(&mut *tx)
            .await?;
        for member in &group.members {
            sqlx::query("INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?1, ?2)")
                .bind(group.id)
                .bind(member)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Insert or replace a question attempt.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub async fn put_attempt(&self, attempt: &QuestionAttempt) -> Result<(), StoreError> {
        let (kind, name) = match &attempt.owner {
            AttemptOwner::Quiz { name } => ("quiz", name.as_str()),
            AttemptOwner::Unknown { component } => ("unknown", component.as_str()),
        };
        sqlx::query(
            "INSERT OR REPLACE INTO question_attempts \
             (id, user_id, course_id, owner_kind, owner_name, slot, question_text, review_url, \
             response_summary) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(attempt.id)
        .bind(attempt.user_id)
        .bind(attempt.course_id)
        .bind(kind)
        .bind(name)
        .bind(i64::from(attempt.slot))
        .bind(&attempt.question_text)
        .bind(&attempt.review_url)
        .bind(&attempt.response_summary)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Add a signature for `user_id`, returning its id.
    ///
    /// Marking it default clears the flag on the user's other signatures.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub async fn add_signature(
        &self,
        user_id: UserId,
        title: &str,
        text: &str,
        is_default: bool,
    ) -> Result<SignatureId, StoreError> {
        let mut tx = self.pool.begin().await?;
        if is_default {
            sqlx::query("UPDATE signatures SET is_default = 0 WHERE user_id = ?1")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }
        let result = sqlx::query(
            "INSERT INTO signatures (user_id, title, text, is_default) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(user_id)
        .bind(title)
        .bind(text)
        .bind(is_default)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.last_insert_rowid())
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn insert_message(&self, message: &Message) -> Result<MessageId, StoreError> {
        let sql = format!(
            "INSERT INTO {} (course_id, sender_id, subject, body, format, attachments, \
             recipients, time, signature_id, receipt, no_forward) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            table(message.status)
        );
        let result = sqlx::query(&sql)
            .bind(message.course_id)
            .bind(message.sender_id)
            .bind(&message.subject)
            .bind(&message.body)
            .bind(message.format.as_str())
            .bind(encode_list("attachments", &message.attachments)?)
            .bind(encode_list("recipients", &message.recipients)?)
            .bind(encode_time(&message.time))
            .bind(message.signature_id)
            .bind(message.receipt)
            .bind(message.no_forward)
            .execute(&self.pool)
            .await?;
        let id = result.last_insert_rowid();
        trace!(id, status = message.status.as_str(), "message inserted");
        Ok(id)
    }

    async fn update_message(&self, message: &Message) -> Result<(), StoreError> {
        let id = message.id.ok_or(StoreError::Unsaved)?;
        let sql = format!(
            "UPDATE {} SET course_id=?1, sender_id=?2, subject=?3, body=?4, format=?5, \
             attachments=?6, recipients=?7, time=?8, signature_id=?9, receipt=?10, \
             no_forward=?11 WHERE id=?12",
            table(message.status)
        );
        let result = sqlx::query(&sql)
            .bind(message.course_id)
            .bind(message.sender_id)
            .bind(&message.subject)
            .bind(&message.body)
            .bind(message.format.as_str())
            .bind(encode_list("attachments", &message.attachments)?)
            .bind(encode_list("recipients", &message.recipients)?)
            .bind(encode_time(&message.time))
            .bind(message.signature_id)
            .bind(message.receipt)
            .bind(message.no_forward)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                status: message.status.as_str(),
                id,
            });
        }
        trace!(id, status = message.status.as_str(), "message updated");
        Ok(())
    }

    async fn get_message(
        &self,
        status: MessageStatus,
        id: MessageId,
    ) -> Result<Option<Message>, StoreError> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM {} WHERE id = ?1", table(status));
        let row: Option<MessageRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| message_from_row(status, r)).transpose()
    }

    async fn delete_message(
        &self,
        status: MessageStatus,
        id: MessageId,
    ) -> Result<bool, StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", table(status));
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_messages(
        &self,
        status: MessageStatus,
        course_id: CourseId,
        sender_id: UserId,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM {} WHERE course_id = ?1 AND sender_id = ?2 \
             ORDER BY time DESC, id DESC LIMIT ?3 OFFSET ?4",
            table(status)
        );
        let rows: Vec<MessageRow> = sqlx::query_as(&sql)
            .bind(course_id)
            .bind(sender_id)
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|r| message_from_row(status, r))
            .collect()
    }

    async fn count_messages(
        &self,
        status: MessageStatus,
        course_id: CourseId,
        sender_id: UserId,
    ) -> Result<u64, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE course_id = ?1 AND sender_id = ?2",
            table(status)
        );
        let (count,): (i64,) = sqlx::query_as(&sql)
            .bind(course_id)
            .bind(sender_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn signatures(&self, user_id: UserId) -> Result<Vec<Signature>, StoreError> {
        let rows: Vec<(i64, i64, String, String, bool)> = sqlx::query_as(
            "SELECT id, user_id, title, text, is_default FROM signatures \
             WHERE user_id = ?1 ORDER BY is_default DESC, id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, user_id, title, text, is_default)| Signature {
                id,
                user_id,
                title,
                text,
                is_default,
            })
            .collect())
    }

    async fn course_config(
        &self,
        course_id: CourseId,
    ) -> Result<Option<CourseConfig>, StoreError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT name, value FROM course_config WHERE course_id = ?1")
                .bind(course_id)
                .fetch_all(&self.pool)
                .await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let mut config = CourseConfig::default();
        for (name, value) in rows {
            match name.as_str() {
                "roleselection" => config.role_selection = decode_list("roleselection", &value)?,
                "prepend_class" => config.prepend = SubjectPrefix::parse(&value)?,
                "receipt" => config.receipt = value == "1",
                other => debug!(course_id, name = other, "ignoring unknown course setting"),
            }
        }
        Ok(Some(config))
    }

    async fn save_course_config(
        &self,
        course_id: CourseId,
        config: &CourseConfig,
    ) -> Result<(), StoreError> {
        let values = [
            (
                "roleselection",
                encode_list("roleselection", &config.role_selection)?,
            ),
            ("prepend_class", config.prepend.as_str().to_owned()),
            ("receipt", if config.receipt { "1" } else { "0" }.to_owned()),
        ];
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM course_config WHERE course_id = ?1")
            .bind(course_id)
            .execute(&mut *tx)
            .await?;
        for (name, value) in &values {
            sqlx::query("INSERT INTO course_config (course_id, name, value) VALUES (?1, ?2, ?3)")
                .bind(course_id)
                .bind(name)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        debug!(course_id, "course config saved");
        Ok(())
    }

    async fn reset_course_config(&self, course_id: CourseId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM course_config WHERE course_id = ?1")
            .bind(course_id)
            .execute(&self.pool)
            .await?;
        debug!(course_id, "course config reset");
        Ok(())
    }
}

#[async_trait]
impl PersonDirectory for SqliteStore {
    async fn course(&self, course_id: CourseId) -> Result<Option<Course>, DirectoryError> {
        let row: Option<(i64, i64, String, String, String)> = sqlx::query_as(
            "SELECT id, context_id, shortname, idnumber, fullname FROM courses WHERE id = ?1",
        )
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, context_id, shortname, idnumber, fullname)| Course {
            id,
            context_id,
            shortname,
            idnumber,
            fullname,
        }))
    }

    async fn user(&self, user_id: UserId) -> Result<Option<User>, DirectoryError> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, firstname, lastname, email, mail_format FROM users WHERE id = ?1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(user_from_row).transpose()
    }

    async fn participants(&self, course_id: CourseId) -> Result<Vec<Participant>, DirectoryError> {
        let rows: Vec<(i64, String, String, String, String, i64, String)> = sqlx::query_as(
            "SELECT u.id, u.firstname, u.lastname, u.email, u.mail_format, r.id, r.shortname \
             FROM role_assignments ra \
             JOIN users u ON u.id = ra.user_id \
             JOIN roles r ON r.id = ra.role_id \
             WHERE ra.course_id = ?1 \
             ORDER BY u.lastname, u.firstname, u.id, r.shortname",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;

        let memberships: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT gm.user_id, gm.group_id FROM group_members gm \
             JOIN course_groups g ON g.id = gm.group_id \
             WHERE g.course_id = ?1 ORDER BY gm.group_id",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;
        let mut groups_by_user: HashMap<UserId, Vec<GroupId>> = HashMap::new();
        for (user_id, group_id) in memberships {
            groups_by_user.entry(user_id).or_default().push(group_id);
        }

        let mut participants: Vec<Participant> = Vec::new();
        let mut index: HashMap<UserId, usize> = HashMap::new();
        for (id, first, last, email, format, role_id, shortname) in rows {
            let role = Role {
                id: role_id,
                shortname,
            };
            if let Some(p) = index.get(&id).and_then(|&i| participants.get_mut(i)) {
                p.roles.push(role);
                continue;
            }
            let user = user_from_row((id, first, last, email, format))?;
            index.insert(id, participants.len());
            participants.push(Participant {
                user,
                roles: vec![role],
                groups: groups_by_user.remove(&id).unwrap_or_default(),
            });
        }
        Ok(participants)
    }

    async fn groups(&self, course_id: CourseId) -> Result<Vec<Group>, DirectoryError> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT id, name FROM course_groups WHERE course_id = ?1 ORDER BY name, id",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;
        let members: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT gm.group_id, gm.user_id FROM group_members gm \
             JOIN course_groups g ON g.id = gm.group_id \
             WHERE g.course_id = ?1 ORDER BY gm.user_id",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;
        let mut members_by_group: HashMap<GroupId, Vec<UserId>> = HashMap::new();
        for (group_id, user_id) in members {
            members_by_group.entry(group_id).or_default().push(user_id);
        }
        Ok(rows
            .into_iter()
            .map(|(id, name)| Group {
                id,
                name,
                members: members_by_group.remove(&id).unwrap_or_default(),
            })
            .collect())
    }
}

#[async_trait]
impl CapabilityChecker for SqliteStore {
    async fn has_capability(
        &self,
        capability: Capability,
        course_id: CourseId,
        user_id: UserId,
    ) -> Result<bool, DirectoryError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM role_assignments ra \
             JOIN role_capabilities rc ON rc.role_id = ra.role_id \
             WHERE ra.course_id = ?1 AND ra.user_id = ?2 AND rc.capability = ?3 LIMIT 1",
        )
        .bind(course_id)
        .bind(user_id)
        .bind(capability.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl AttemptSource for SqliteStore {
    async fn question_attempt(
        &self,
        attempt_id: i64,
    ) -> Result<Option<QuestionAttempt>, DirectoryError> {
        let row: Option<AttemptRow> = sqlx::query_as(
            "SELECT id, user_id, course_id, owner_kind, owner_name, slot, question_text, \
             review_url, response_summary FROM question_attempts WHERE id = ?1",
        )
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(
            |(id, user_id, course_id, kind, name, slot, question_text, review_url, response)| {
                let owner = match kind.as_str() {
                    "quiz" => AttemptOwner::Quiz { name },
                    _ => AttemptOwner::Unknown { component: name },
                };
                QuestionAttempt {
                    id,
                    user_id,
                    course_id,
                    owner,
                    slot: u32::try_from(slot).unwrap_or(0),
                    question_text,
                    review_url,
                    response_summary: response.filter(|r| !r.trim().is_empty()),
                }
            },
        ))
    }
}
