//! Tests for `Composer::send`: validation, persistence, transforms and
//! per-recipient delivery.

use coursemail::composer::{ComposeError, Composer, DeliveryFailure, SubmitAction, ValidationError};
use coursemail::files::{AreaRef, FileArea};
use coursemail::store::RecordStore;
use coursemail::types::{MessageStatus, SubjectPrefix};

use crate::support::{self, ALICE, BOB, COURSE, CONTEXT, DANA, GUEST, TEACHER};

#[tokio::test]
async fn partial_delivery_failure_is_reported_and_message_is_kept() {
    let fx = support::fixture_failing_for(&[BOB]).await;
    let mut composer = Composer::open(fx.services.clone(), COURSE, TEACHER)
        .await
        .expect("composer");
    composer.submit(support::send("Exam moved", "Now on Friday.", &[ALICE, BOB]));

    let outcome = composer.send().await.expect("send");

    assert_eq!(outcome.failures.len(), 1);
    let DeliveryFailure {
        recipient, receipt, ..
    } = &outcome.failures[0];
    assert_eq!(*recipient, BOB);
    assert!(!receipt);
    assert_eq!(fx.mailer.recipients(), vec![ALICE]);

    let stored = fx
        .store
        .get_message(MessageStatus::Sent, outcome.message_id)
        .await
        .expect("get")
        .expect("persisted as sent");
    assert_eq!(stored.recipients, vec![ALICE, BOB]);
    assert_eq!(stored.subject, "Exam moved");
}

#[tokio::test]
async fn empty_recipients_fail_before_store_or_mailer() {
    let fx = support::fixture().await;
    let mut composer = Composer::open(fx.services.clone(), COURSE, TEACHER)
        .await
        .expect("composer");
    composer.submit(support::send("Hello", "", &[]));

    let err = composer.send().await.expect_err("no recipients");
    assert!(matches!(
        err,
        ComposeError::Validation(ValidationError::MissingRecipients)
    ));
    let count = fx
        .store
        .count_messages(MessageStatus::Sent, COURSE, TEACHER)
        .await
        .expect("count");
    assert_eq!(count, 0);
    assert!(fx.mailer.delivered().is_empty());
}

#[tokio::test]
async fn blank_subject_and_no_recipients_reports_both() {
    let fx = support::fixture().await;
    let mut composer = Composer::open(fx.services.clone(), COURSE, TEACHER)
        .await
        .expect("composer");
    composer.submit(support::send("   ", "body", &[]));
    let err = composer.send().await.expect_err("invalid");
    assert!(matches!(err, ComposeError::Validation(ValidationError::Both)));
}

#[tokio::test]
async fn blank_subject_alone_is_missing_subject() {
    let fx = support::fixture().await;
    let mut composer = Composer::open(fx.services.clone(), COURSE, TEACHER)
        .await
        .expect("composer");
    let err = composer
        .validate(&support::send("", "body", &[ALICE]))
        .await
        .expect_err("invalid");
    assert!(matches!(
        err,
        ComposeError::Validation(ValidationError::MissingSubject)
    ));
}

#[tokio::test]
async fn tampered_recipient_rejects_whole_send() {
    let fx = support::fixture().await;
    let mut composer = Composer::open(fx.services.clone(), COURSE, TEACHER)
        .await
        .expect("composer");
    composer.submit(support::send("Hi", "x", &[ALICE, GUEST]));

    let err = composer.send().await.expect_err("guest is not eligible");
    assert!(matches!(err, ComposeError::RecipientAccess(e) if e.0 == GUEST));
    assert!(fx.mailer.delivered().is_empty());
}

#[tokio::test]
async fn subject_prefix_is_applied_once_and_never_stored() {
    let fx = support::fixture().await;
    let mut config = support::site_defaults();
    config.prepend = SubjectPrefix::ShortName;
    fx.store
        .save_course_config(COURSE, &config)
        .await
        .expect("config");

    let mut composer = Composer::open(fx.services.clone(), COURSE, TEACHER)
        .await
        .expect("composer");
    composer.submit(support::send("Reading list", "x", &[ALICE, DANA]));
    let outcome = composer.send().await.expect("send");

    for delivered in fx.mailer.delivered() {
        assert_eq!(delivered.mail.subject, "[CS101] Reading list");
    }
    let stored = fx
        .store
        .get_message(MessageStatus::Sent, outcome.message_id)
        .await
        .expect("get")
        .expect("stored");
    assert_eq!(stored.subject, "Reading list");
}

#[tokio::test]
async fn empty_course_label_leaves_subject_alone() {
    let fx = support::fixture().await;
    let mut config = support::site_defaults();
    config.prepend = SubjectPrefix::IdNumber;
    fx.store
        .save_course_config(COURSE, &config)
        .await
        .expect("config");

    let mut composer = Composer::open(fx.services.clone(), COURSE, TEACHER)
        .await
        .expect("composer");
    composer.submit(support::send("Plain", "x", &[ALICE]));
    composer.send().await.expect("send");
    assert_eq!(fx.mailer.delivered()[0].mail.subject, "Plain");
}

#[tokio::test]
async fn selected_signature_is_appended_to_outgoing_only() {
    let fx = support::fixture().await;
    let sig = fx
        .store
        .add_signature(TEACHER, "Formal", "-- Dr. Teach", true)
        .await
        .expect("signature");

    let mut composer = Composer::open(fx.services.clone(), COURSE, TEACHER)
        .await
        .expect("composer");
    assert_eq!(
        composer.compose_view().await.expect("view").signature_id,
        Some(sig)
    );
    let mut submission = support::send("Hi", "See you.", &[ALICE]);
    submission.signature_id = Some(sig);
    composer.submit(submission);
    let outcome = composer.send().await.expect("send");

    let delivered = fx.mailer.delivered();
    assert_eq!(delivered[0].mail.plain_body, "See you.\n\n-- Dr. Teach");
    let stored = fx
        .store
        .get_message(MessageStatus::Sent, outcome.message_id)
        .await
        .expect("get")
        .expect("stored");
    assert_eq!(stored.body, "See you.");
    assert_eq!(stored.signature_id, Some(sig));
}

#[tokio::test]
async fn receipt_copy_goes_to_sender_and_its_failure_is_marked() {
    let fx = support::fixture_failing_for(&[TEACHER]).await;
    let mut composer = Composer::open(fx.services.clone(), COURSE, TEACHER)
        .await
        .expect("composer");
    let mut submission = support::send("Hi", "x", &[ALICE]);
    submission.receipt = true;
    composer.submit(submission);

    let outcome = composer.send().await.expect("send");
    assert_eq!(fx.mailer.recipients(), vec![ALICE]);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].recipient, TEACHER);
    assert!(outcome.failures[0].receipt);
}

#[tokio::test]
async fn attachments_are_archived_for_delivery_then_removed() {
    let fx = support::fixture().await;
    let mut composer = Composer::open(fx.services.clone(), COURSE, TEACHER)
        .await
        .expect("composer");
    let upload = composer.upload_area();
    fx.files
        .write(&upload, "syllabus.txt", b"week 1: intro")
        .await
        .expect("upload");

    composer.submit(support::send("Syllabus", "attached", &[ALICE, DANA]));
    let outcome = composer.send().await.expect("send");

    let delivered = fx.mailer.delivered();
    assert_eq!(delivered.len(), 2);
    assert!(delivered.iter().all(|d| d.archive_present));
    let archive = fx
        .services
        .packager
        .archive_path(TEACHER, outcome.message_id);
    assert!(delivered
        .iter()
        .all(|d| d.mail.attachment.as_ref().map(|a| &a.path) == Some(&archive)));
    assert!(!archive.exists(), "archive must be released after send");

    let stored = fx
        .store
        .get_message(MessageStatus::Sent, outcome.message_id)
        .await
        .expect("get")
        .expect("stored");
    assert_eq!(stored.attachments, vec!["syllabus.txt".to_owned()]);
    let kept = fx
        .files
        .list(&AreaRef::attachments(
            CONTEXT,
            MessageStatus::Sent,
            outcome.message_id,
        ))
        .await
        .expect("list");
    assert_eq!(kept.len(), 1);
    assert!(fx.files.list(&upload).await.expect("list").is_empty());
}

#[tokio::test]
async fn archive_is_released_even_when_every_delivery_fails() {
    let fx = support::fixture_failing_for(&[ALICE]).await;
    let mut composer = Composer::open(fx.services.clone(), COURSE, TEACHER)
        .await
        .expect("composer");
    fx.files
        .write(&composer.upload_area(), "a.txt", b"a")
        .await
        .expect("upload");
    composer.submit(support::send("S", "b", &[ALICE]));
    let outcome = composer.send().await.expect("send");
    assert_eq!(outcome.failures.len(), 1);
    assert!(!fx
        .services
        .packager
        .archive_path(TEACHER, outcome.message_id)
        .exists());
}

#[tokio::test]
async fn cancel_and_missing_submission_short_circuit() {
    let fx = support::fixture().await;
    let mut composer = Composer::open(fx.services.clone(), COURSE, TEACHER)
        .await
        .expect("composer");
    assert!(matches!(
        composer.send().await,
        Err(ComposeError::NoSubmission)
    ));

    let mut cancel = support::send("S", "b", &[ALICE]);
    cancel.action = SubmitAction::Cancel;
    composer.submit(cancel);
    assert!(composer.cancel_requested());
    assert!(!composer.send_requested());
    assert!(matches!(composer.send().await, Err(ComposeError::Cancelled)));
    assert!(matches!(
        composer.save_draft(None).await,
        Err(ComposeError::Cancelled)
    ));
    assert!(fx.mailer.delivered().is_empty());
}

#[tokio::test]
async fn duplicate_recipient_ids_get_one_mail() {
    let fx = support::fixture().await;
    let mut composer = Composer::open(fx.services.clone(), COURSE, TEACHER)
        .await
        .expect("composer");
    composer.submit(support::send("Hi", "x", &[ALICE, ALICE, DANA]));
    composer.send().await.expect("send");
    assert_eq!(fx.mailer.recipients(), vec![ALICE, DANA]);
}
