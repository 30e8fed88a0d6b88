//! Tests for message persistence in `SqliteStore`.

use chrono::{Duration, TimeZone, Utc};

use coursemail::store::{RecordStore, StoreError};
use coursemail::types::{BodyFormat, Message, MessageStatus};

use crate::support::{self, ALICE, BOB, COURSE, TEACHER};

fn message(subject: &str, minutes: i64, status: MessageStatus) -> Message {
    let base = Utc
        .with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
        .single()
        .expect("valid time");
    Message {
        id: None,
        course_id: COURSE,
        sender_id: TEACHER,
        subject: subject.to_owned(),
        body: "<p>body</p>".to_owned(),
        format: BodyFormat::Html,
        attachments: vec!["notes.pdf".to_owned()],
        recipients: vec![BOB, ALICE],
        time: base
            .checked_add_signed(Duration::minutes(minutes))
            .expect("in range"),
        signature_id: None,
        receipt: true,
        no_forward: false,
        status,
        subject_prefixed: false,
    }
}

#[tokio::test]
async fn insert_then_get_preserves_every_field() {
    let store = support::memory_store().await;
    let original = message("Week 1", 0, MessageStatus::Sent);
    let id = store.insert_message(&original).await.expect("insert");

    let loaded = store
        .get_message(MessageStatus::Sent, id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(loaded.id, Some(id));
    assert_eq!(loaded.subject, "Week 1");
    assert_eq!(loaded.recipients, vec![BOB, ALICE]);
    assert_eq!(loaded.attachments, vec!["notes.pdf".to_owned()]);
    assert_eq!(loaded.time, original.time);
    assert_eq!(loaded.format, BodyFormat::Html);
    assert!(loaded.receipt);
    assert_eq!(loaded.status, MessageStatus::Sent);
}

#[tokio::test]
async fn drafts_and_sent_messages_live_apart() {
    let store = support::memory_store().await;
    let id = store
        .insert_message(&message("Draft", 0, MessageStatus::Draft))
        .await
        .expect("insert");
    let sent = store
        .get_message(MessageStatus::Sent, id)
        .await
        .expect("get");
    assert!(sent.is_none());
    assert!(store
        .get_message(MessageStatus::Draft, id)
        .await
        .expect("get")
        .is_some());
}

#[tokio::test]
async fn subject_prefix_marker_is_not_persisted() {
    let store = support::memory_store().await;
    let mut outgoing = message("Marked", 0, MessageStatus::Sent);
    outgoing.subject_prefixed = true;
    let id = store.insert_message(&outgoing).await.expect("insert");
    let loaded = store
        .get_message(MessageStatus::Sent, id)
        .await
        .expect("get")
        .expect("present");
    assert!(!loaded.subject_prefixed);
}

#[tokio::test]
async fn update_rewrites_and_reports_missing_rows() {
    let store = support::memory_store().await;
    let id = store
        .insert_message(&message("v1", 0, MessageStatus::Draft))
        .await
        .expect("insert");

    let mut edited = message("v2", 5, MessageStatus::Draft);
    edited.id = Some(id);
    edited.recipients = vec![ALICE];
    store.update_message(&edited).await.expect("update");
    let loaded = store
        .get_message(MessageStatus::Draft, id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(loaded.subject, "v2");
    assert_eq!(loaded.recipients, vec![ALICE]);

    edited.id = Some(id.saturating_add(100));
    assert!(matches!(
        store.update_message(&edited).await,
        Err(StoreError::NotFound { .. })
    ));
    edited.id = None;
    assert!(matches!(
        store.update_message(&edited).await,
        Err(StoreError::Unsaved)
    ));
}

#[tokio::test]
async fn list_is_newest_first_and_paged() {
    let store = support::memory_store().await;
    for (i, subject) in ["a", "b", "c", "d", "e"].iter().enumerate() {
        let minutes = i64::try_from(i).expect("small");
        store
            .insert_message(&message(subject, minutes, MessageStatus::Sent))
            .await
            .expect("insert");
    }
    let mut other = message("other sender", 10, MessageStatus::Sent);
    other.sender_id = ALICE;
    store.insert_message(&other).await.expect("insert");

    let first: Vec<String> = store
        .list_messages(MessageStatus::Sent, COURSE, TEACHER, 0, 2)
        .await
        .expect("list")
        .into_iter()
        .map(|m| m.subject)
        .collect();
    assert_eq!(first, vec!["e", "d"]);
    let last: Vec<String> = store
        .list_messages(MessageStatus::Sent, COURSE, TEACHER, 4, 2)
        .await
        .expect("list")
        .into_iter()
        .map(|m| m.subject)
        .collect();
    assert_eq!(last, vec!["a"]);
    assert_eq!(
        store
            .count_messages(MessageStatus::Sent, COURSE, TEACHER)
            .await
            .expect("count"),
        5
    );
}

#[tokio::test]
async fn delete_reports_whether_a_row_was_removed() {
    let store = support::memory_store().await;
    let id = store
        .insert_message(&message("gone", 0, MessageStatus::Sent))
        .await
        .expect("insert");
    assert!(store
        .delete_message(MessageStatus::Sent, id)
        .await
        .expect("delete"));
    assert!(!store
        .delete_message(MessageStatus::Sent, id)
        .await
        .expect("delete"));
}
