//! Database schema.

use sqlx::SqlitePool;
use tracing::debug;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS courses (
        id          INTEGER PRIMARY KEY,
        context_id  INTEGER NOT NULL,
        shortname   TEXT NOT NULL,
        idnumber    TEXT NOT NULL DEFAULT '',
        fullname    TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS users (
        id           INTEGER PRIMARY KEY,
        firstname    TEXT NOT NULL,
        lastname     TEXT NOT NULL,
        email        TEXT NOT NULL,
        mail_format  TEXT NOT NULL DEFAULT 'html'
    )",
    "CREATE TABLE IF NOT EXISTS roles (
        id         INTEGER PRIMARY KEY,
        shortname  TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS role_assignments (
        course_id  INTEGER NOT NULL,
        user_id    INTEGER NOT NULL,
        role_id    INTEGER NOT NULL,
        PRIMARY KEY (course_id, user_id, role_id)
    )",
    "CREATE TABLE IF NOT EXISTS role_capabilities (
        role_id     INTEGER NOT NULL,
        capability  TEXT NOT NULL,
        PRIMARY KEY (role_id, capability)
    )",
    "CREATE TABLE IF NOT EXISTS course_groups (
        id         INTEGER PRIMARY KEY,
        course_id  INTEGER NOT NULL,
        name       TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS group_members (
        group_id  INTEGER NOT NULL,
        user_id   INTEGER NOT NULL,
        PRIMARY KEY (group_id, user_id)
    )",
    "CREATE TABLE IF NOT EXISTS question_attempts (
        id             INTEGER PRIMARY KEY,
        user_id        INTEGER NOT NULL,
        course_id      INTEGER NOT NULL,
        owner_kind     TEXT NOT NULL,
        owner_name     TEXT NOT NULL,
        slot           INTEGER NOT NULL,
        question_text  TEXT NOT NULL,
        review_url     TEXT NOT NULL,
        response_summary TEXT
    )",
    "CREATE TABLE IF NOT EXISTS signatures (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id     INTEGER NOT NULL,
        title       TEXT NOT NULL,
        text        TEXT NOT NULL,
        is_default  INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS course_config (
        course_id  INTEGER NOT NULL,
        name       TEXT NOT NULL,
        value      TEXT NOT NULL,
        PRIMARY KEY (course_id, name)
    )",
    "CREATE TABLE IF NOT EXISTS mail_log (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        course_id     INTEGER NOT NULL,
        sender_id     INTEGER NOT NULL,
        subject       TEXT NOT NULL,
        body          TEXT NOT NULL,
        format        TEXT NOT NULL,
        attachments   TEXT NOT NULL DEFAULT '[]',
        recipients    TEXT NOT NULL DEFAULT '[]',
        time          TEXT NOT NULL,
        signature_id  INTEGER,
        receipt       INTEGER NOT NULL DEFAULT 0,
        no_forward    INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_mail_log_sender ON mail_log(course_id, sender_id, time)",
    "CREATE TABLE IF NOT EXISTS mail_drafts (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        course_id     INTEGER NOT NULL,
        sender_id     INTEGER NOT NULL,
        subject       TEXT NOT NULL,
        body          TEXT NOT NULL,
        format        TEXT NOT NULL,
        attachments   TEXT NOT NULL DEFAULT '[]',
        recipients    TEXT NOT NULL DEFAULT '[]',
        time          TEXT NOT NULL,
        signature_id  INTEGER,
        receipt       INTEGER NOT NULL DEFAULT 0,
        no_forward    INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_mail_drafts_sender ON mail_drafts(course_id, sender_id, time)",
];

/// Create every table and index that does not exist yet.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if a statement fails.
pub async fn run(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    debug!(statements = SCHEMA.len(), "schema ready");
    Ok(())
}
