//! Tests for the composer variants: ask instructor, drafts, forwards and
//! quiz questions.

use coursemail::composer::{
    ComposeError, ComposeTarget, Composer, ComposerKind, Destination, SubmitAction, Submission,
};
use coursemail::directory::{AttemptOwner, QuestionAttempt};
use coursemail::files::{AreaRef, FileArea};
use coursemail::store::RecordStore;
use coursemail::types::MessageStatus;

use crate::support::{self, ALICE, BOB, COURSE, DANA, GUEST, IVY, TEACHER};

fn attempt(id: i64, user_id: i64, owner: AttemptOwner) -> QuestionAttempt {
    QuestionAttempt {
        id,
        user_id,
        course_id: COURSE,
        owner,
        slot: 3,
        question_text: "<p>Why is <b>2 &lt; 3</b>?</p>".to_owned(),
        review_url: format!("https://lms.example/mod/quiz/review.php?attempt={id}"),
        response_summary: None,
    }
}

#[tokio::test]
async fn ask_instructor_ignores_submitted_recipients() {
    let fx = support::fixture().await;
    let mut composer = Composer::ask_instructor(fx.services.clone(), COURSE, ALICE)
        .await
        .expect("composer");
    assert!(composer.potential_recipients_exist().await.expect("check"));

    composer.submit(support::send("Help", "Stuck on lab 2", &[BOB, DANA]));
    let outcome = composer.send().await.expect("send");

    let mut sent_to = fx.mailer.recipients();
    sent_to.sort_unstable();
    assert_eq!(sent_to, vec![TEACHER, IVY]);
    let stored = fx
        .store
        .get_message(MessageStatus::Sent, outcome.message_id)
        .await
        .expect("get")
        .expect("stored");
    assert!(stored.no_forward);
    assert_eq!(
        composer.success_destination(),
        Destination::Course { course_id: COURSE }
    );
}

#[tokio::test]
async fn ask_instructor_view_is_fixed() {
    let fx = support::fixture().await;
    let mut composer = Composer::ask_instructor(fx.services.clone(), COURSE, ALICE)
        .await
        .expect("composer");
    let view = composer.compose_view().await.expect("view");
    assert!(view.recipients_fixed);
    assert!(!view.allow_draft);
    let mut candidates: Vec<i64> = view.candidates.iter().map(|u| u.id).collect();
    candidates.sort_unstable();
    assert_eq!(candidates, vec![TEACHER, IVY]);
}

#[tokio::test]
async fn ask_instructor_cannot_save_drafts() {
    let fx = support::fixture().await;
    let mut composer = Composer::ask_instructor(fx.services.clone(), COURSE, ALICE)
        .await
        .expect("composer");
    composer.submit(support::save("Help", "x", &[]));
    assert!(matches!(
        composer.save_draft(None).await,
        Err(ComposeError::Unsupported(_))
    ));
}

#[tokio::test]
async fn constructing_without_capability_is_denied() {
    let fx = support::fixture().await;
    let err = Composer::open(fx.services.clone(), COURSE, GUEST)
        .await
        .expect_err("guest cannot send");
    assert!(matches!(err, ComposeError::Permission(_)));

    let err = Composer::ask_instructor(fx.services.clone(), COURSE, TEACHER)
        .await
        .expect_err("teachers do not ask instructors");
    assert!(matches!(err, ComposeError::Permission(_)));
}

#[tokio::test]
async fn missing_course_is_not_found() {
    let fx = support::fixture().await;
    let err = Composer::open(fx.services.clone(), 999, TEACHER)
        .await
        .expect_err("no course");
    assert!(matches!(err, ComposeError::NotFound(_)));
}

#[tokio::test]
async fn saved_draft_is_reproduced_when_resumed() {
    let fx = support::fixture().await;
    let mut composer = Composer::open(fx.services.clone(), COURSE, TEACHER)
        .await
        .expect("composer");
    fx.files
        .write(&composer.upload_area(), "rubric.txt", b"10 points")
        .await
        .expect("upload");
    composer.submit(support::save("Lab 3", "Draft text", &[DANA, ALICE]));
    let draft_id = composer.save_draft(None).await.expect("save");
    assert!(fx.mailer.delivered().is_empty());

    let mut resumed = Composer::from_draft(fx.services.clone(), COURSE, TEACHER, draft_id)
        .await
        .expect("resume");
    let view = resumed.compose_view().await.expect("view");
    assert_eq!(view.subject, "Lab 3");
    assert_eq!(view.body, "Draft text");
    assert_eq!(view.selected, vec![DANA, ALICE]);
    let names: Vec<&str> = view.attachments.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["rubric.txt"]);
    assert_eq!(
        resumed.cancel_destination(),
        Destination::Mailbox {
            course_id: COURSE,
            status: MessageStatus::Draft
        }
    );
}

#[tokio::test]
async fn resaving_a_resumed_draft_updates_in_place() {
    let fx = support::fixture().await;
    let mut composer = Composer::open(fx.services.clone(), COURSE, TEACHER)
        .await
        .expect("composer");
    composer.submit(support::save("v1", "x", &[ALICE]));
    let first = composer.save_draft(None).await.expect("save");
    composer.submit(support::save("v2", "x", &[ALICE]));
    assert_eq!(composer.save_draft(None).await.expect("save"), first);

    let mut resumed = Composer::from_draft(fx.services.clone(), COURSE, TEACHER, first)
        .await
        .expect("resume");
    resumed.submit(support::save("v3", "x", &[ALICE]));
    assert_eq!(resumed.save_draft(None).await.expect("save"), first);

    let count = fx
        .store
        .count_messages(MessageStatus::Draft, COURSE, TEACHER)
        .await
        .expect("count");
    assert_eq!(count, 1);
    let stored = fx
        .store
        .get_message(MessageStatus::Draft, first)
        .await
        .expect("get")
        .expect("draft");
    assert_eq!(stored.subject, "v3");
}

#[tokio::test]
async fn delivered_draft_is_deleted() {
    let fx = support::fixture().await;
    let mut composer = Composer::open(fx.services.clone(), COURSE, TEACHER)
        .await
        .expect("composer");
    composer.submit(support::save("Notes", "x", &[ALICE]));
    let draft_id = composer.save_draft(None).await.expect("save");

    let mut resumed = Composer::from_draft(fx.services.clone(), COURSE, TEACHER, draft_id)
        .await
        .expect("resume");
    let view = resumed.compose_view().await.expect("view");
    let submission = Submission::from_view(view, SubmitAction::Send);
    resumed.submit(submission);
    let outcome = resumed.send().await.expect("send");
    assert!(outcome.is_complete());

    let draft = fx
        .store
        .get_message(MessageStatus::Draft, draft_id)
        .await
        .expect("get");
    assert!(draft.is_none());
}

#[tokio::test]
async fn draft_survives_a_partial_failure() {
    let fx = support::fixture_failing_for(&[BOB]).await;
    let mut composer = Composer::open(fx.services.clone(), COURSE, TEACHER)
        .await
        .expect("composer");
    composer.submit(support::save("Notes", "x", &[ALICE, BOB]));
    let draft_id = composer.save_draft(None).await.expect("save");

    let mut resumed = Composer::from_draft(fx.services.clone(), COURSE, TEACHER, draft_id)
        .await
        .expect("resume");
    resumed.submit(support::send("Notes", "x", &[ALICE, BOB]));
    let outcome = resumed.send().await.expect("send");
    assert!(!outcome.is_complete());

    let draft = fx
        .store
        .get_message(MessageStatus::Draft, draft_id)
        .await
        .expect("get");
    assert!(draft.is_some());
}

#[tokio::test]
async fn drafts_of_other_users_cannot_be_resumed() {
    let fx = support::fixture().await;
    let mut composer = Composer::open(fx.services.clone(), COURSE, TEACHER)
        .await
        .expect("composer");
    composer.submit(support::save("Mine", "x", &[ALICE]));
    let draft_id = composer.save_draft(None).await.expect("save");

    let err = Composer::from_draft(fx.services.clone(), COURSE, IVY, draft_id)
        .await
        .expect_err("not Ivy's draft");
    assert!(matches!(err, ComposeError::Permission(_)));
}

#[tokio::test]
async fn draft_saved_from_the_sending_composer_is_deleted() {
    let fx = support::fixture().await;
    let mut composer = Composer::open(fx.services.clone(), COURSE, TEACHER)
        .await
        .expect("composer");
    fx.files
        .write(&composer.upload_area(), "notes.txt", b"read me")
        .await
        .expect("upload");
    composer.submit(support::save("Notes", "x", &[ALICE]));
    let draft_id = composer.save_draft(None).await.expect("save");

    composer.submit(support::send("Notes", "x", &[ALICE]));
    let outcome = composer.send().await.expect("send");
    assert!(outcome.is_complete());

    let draft = fx
        .store
        .get_message(MessageStatus::Draft, draft_id)
        .await
        .expect("get");
    assert!(draft.is_none());
    let draft_files = fx
        .files
        .list(&AreaRef::attachments(
            support::CONTEXT,
            MessageStatus::Draft,
            draft_id,
        ))
        .await
        .expect("list");
    assert!(draft_files.is_empty());
    let count = fx
        .store
        .count_messages(MessageStatus::Draft, COURSE, TEACHER)
        .await
        .expect("count");
    assert_eq!(count, 0);
}

#[tokio::test]
async fn forward_prefixes_subject_and_keeps_recipients() {
    let fx = support::fixture().await;
    let mut composer = Composer::open(fx.services.clone(), COURSE, TEACHER)
        .await
        .expect("composer");
    composer.submit(support::send("Grades", "Posted.", &[ALICE]));
    let sent = composer.send().await.expect("send").message_id;

    let mut forward = Composer::forward(fx.services.clone(), COURSE, TEACHER, sent)
        .await
        .expect("forward");
    assert_eq!(forward.kind(), ComposerKind::Forward);
    let view = forward.compose_view().await.expect("view");
    assert_eq!(view.subject, "Fwd: Grades");
    assert_eq!(view.body, "Posted.");
    assert_eq!(view.selected, vec![ALICE]);
}

#[tokio::test]
async fn forwarding_twice_attaches_the_files_both_times() {
    let fx = support::fixture().await;
    let mut composer = Composer::open(fx.services.clone(), COURSE, TEACHER)
        .await
        .expect("composer");
    fx.files
        .write(&composer.upload_area(), "slides.pdf", b"%PDF")
        .await
        .expect("upload");
    composer.submit(support::send("Slides", "Attached.", &[ALICE]));
    let original = composer.send().await.expect("send").message_id;

    let mut forward = Composer::forward(fx.services.clone(), COURSE, TEACHER, original)
        .await
        .expect("forward");
    forward.submit(support::send("Fwd: Slides", "Attached.", &[BOB]));
    let first = forward.send().await.expect("first send").message_id;
    forward.submit(support::send("Fwd: Slides", "Attached.", &[DANA]));
    let second = forward.send().await.expect("second send").message_id;

    for id in [first, second] {
        let stored = fx
            .store
            .get_message(MessageStatus::Sent, id)
            .await
            .expect("get")
            .expect("sent");
        assert_eq!(stored.attachments, vec!["slides.pdf".to_owned()]);
    }
    assert!(fx.mailer.delivered().iter().all(|d| d.archive_present));
}

#[tokio::test]
async fn no_forward_messages_cannot_be_forwarded() {
    let fx = support::fixture().await;
    let mut ask = Composer::ask_instructor(fx.services.clone(), COURSE, ALICE)
        .await
        .expect("composer");
    ask.submit(support::send("Private", "x", &[]));
    let sent = ask.send().await.expect("send").message_id;

    // Give Alice a second role so she may use the forward composer at all.
    fx.store
        .assign_role(COURSE, ALICE, support::EDITING_TEACHER)
        .await
        .expect("assign");
    let err = Composer::forward(fx.services.clone(), COURSE, ALICE, sent)
        .await
        .expect_err("no-forward");
    assert!(matches!(err, ComposeError::Permission(_)));
}

#[tokio::test]
async fn quiz_question_prefills_subject_and_quoted_prompt() {
    let fx = support::fixture().await;
    fx.store
        .put_attempt(&attempt(
            7,
            ALICE,
            AttemptOwner::Quiz {
                name: "Week 1 quiz".to_owned(),
            },
        ))
        .await
        .expect("attempt");

    let mut composer = Composer::construct(
        fx.services.clone(),
        COURSE,
        None,
        ComposeTarget::QuizQuestion(7),
        ALICE,
    )
    .await
    .expect("composer");
    let view = composer.compose_view().await.expect("view");
    assert_eq!(view.subject, "Question about Week 1 quiz, question 3");
    assert!(view
        .body
        .contains("<blockquote>Why is 2 &lt; 3?</blockquote>"));
    assert!(view.body.contains("review.php?attempt=7"));
    assert!(view.recipients_fixed);
    assert_eq!(
        composer.success_destination(),
        Destination::Attempt {
            url: "https://lms.example/mod/quiz/review.php?attempt=7".to_owned()
        }
    );

    let view = composer.compose_view().await.expect("view");
    let submission = Submission::from_view(view, SubmitAction::SaveDraft);
    composer.submit(submission);
    assert!(matches!(
        composer.save_draft(None).await,
        Err(ComposeError::Unsupported(_))
    ));
}

#[tokio::test]
async fn quiz_question_quotes_the_last_response() {
    let fx = support::fixture().await;
    let mut answered = attempt(
        10,
        ALICE,
        AttemptOwner::Quiz {
            name: "Week 1 quiz".to_owned(),
        },
    );
    answered.response_summary = Some("Because 2 < 3".to_owned());
    fx.store.put_attempt(&answered).await.expect("attempt");

    let mut composer = Composer::quiz_question(fx.services.clone(), COURSE, ALICE, 10)
        .await
        .expect("composer");
    let view = composer.compose_view().await.expect("view");
    let prompt = view.body.find("Why is 2 &lt; 3?").expect("prompt quoted");
    let response = view
        .body
        .find("<blockquote>Because 2 &lt; 3</blockquote>")
        .expect("response quoted");
    assert!(prompt < response);
    assert!(view.body.contains("Last response:"));
}

#[tokio::test]
async fn unknown_attempt_owner_gets_generic_subject() {
    let fx = support::fixture().await;
    fx.store
        .put_attempt(&attempt(
            8,
            ALICE,
            AttemptOwner::Unknown {
                component: "mod_lesson".to_owned(),
            },
        ))
        .await
        .expect("attempt");
    let mut composer = Composer::quiz_question(fx.services.clone(), COURSE, ALICE, 8)
        .await
        .expect("composer");
    let view = composer.compose_view().await.expect("view");
    assert_eq!(view.subject, "Question about a course activity");
}

#[tokio::test]
async fn attempts_of_other_users_are_not_found() {
    let fx = support::fixture().await;
    fx.store
        .put_attempt(&attempt(
            9,
            BOB,
            AttemptOwner::Quiz {
                name: "Week 1 quiz".to_owned(),
            },
        ))
        .await
        .expect("attempt");
    let err = Composer::quiz_question(fx.services.clone(), COURSE, ALICE, 9)
        .await
        .expect_err("Bob's attempt");
    assert!(matches!(err, ComposeError::NotFound(_)));
}
