//! Tests for `src/composer/factory.rs`.

use coursemail::composer::{select_composer, ComposeError, ComposerKind};

use crate::support::{self, ALICE, COURSE, GUEST, TEACHER};

#[tokio::test]
async fn senders_get_open_selection() {
    let fx = support::fixture().await;
    let composer = select_composer(fx.services.clone(), COURSE, TEACHER, true)
        .await
        .expect("select")
        .expect("composer");
    assert_eq!(composer.kind(), ComposerKind::OpenSelection);
    assert_eq!(composer.header_string(), "CS101: Compose message");
}

#[tokio::test]
async fn students_get_ask_instructor() {
    let fx = support::fixture().await;
    let composer = select_composer(fx.services.clone(), COURSE, ALICE, true)
        .await
        .expect("select")
        .expect("composer");
    assert_eq!(composer.kind(), ComposerKind::AskInstructor);
}

#[tokio::test]
async fn nobody_else_gets_a_composer() {
    let fx = support::fixture().await;
    let optional = select_composer(fx.services.clone(), COURSE, GUEST, false)
        .await
        .expect("select");
    assert!(optional.is_none());

    let err = select_composer(fx.services.clone(), COURSE, GUEST, true)
        .await
        .expect_err("mandatory");
    assert!(matches!(err, ComposeError::Permission(_)));
}
