//! Per-variant policy: required capability, draft support, defaults and
//! where the caller goes next.

use crate::directory::{AttemptOwner, QuestionAttempt};
use crate::transform;
use crate::types::{Capability, CourseId, MessageId, MessageStatus};

/// What a composer is constructed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeTarget {
    /// A new message to any eligible participant.
    New,
    /// A new message to the course's instructors.
    AskInstructor,
    /// Resume the acting user's draft.
    Draft(MessageId),
    /// Forward the acting user's sent message.
    Forward(MessageId),
    /// Ask the instructors about a question attempt.
    QuizQuestion(i64),
}

impl ComposeTarget {
    /// The composer variant serving this target.
    pub fn kind(&self) -> ComposerKind {
        match self {
            Self::New => ComposerKind::OpenSelection,
            Self::AskInstructor => ComposerKind::AskInstructor,
            Self::Draft(_) => ComposerKind::Draft,
            Self::Forward(_) => ComposerKind::Forward,
            Self::QuizQuestion(_) => ComposerKind::QuizQuestion,
        }
    }
}

/// The five composer variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComposerKind {
    /// Sender picks recipients from the eligible set.
    OpenSelection,
    /// Fixed recipients: everyone who receives instructor questions.
    AskInstructor,
    /// Resumed from a stored draft.
    Draft,
    /// Forward of a sent message.
    Forward,
    /// Instructor question prefilled from a quiz attempt.
    QuizQuestion,
}

impl ComposerKind {
    /// Name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenSelection => "open",
            Self::AskInstructor => "ask_instructor",
            Self::Draft => "draft",
            Self::Forward => "forward",
            Self::QuizQuestion => "quiz_question",
        }
    }

    /// Capability the acting user must hold to construct this variant.
    pub fn required_capability(&self) -> Capability {
        match self {
            Self::OpenSelection | Self::Draft | Self::Forward => Capability::SendToParticipants,
            Self::AskInstructor | Self::QuizQuestion => Capability::AskInstructor,
        }
    }

    /// Behavior flags for this variant.
    pub fn policy(&self) -> VariantPolicy {
        match self {
            Self::OpenSelection | Self::Draft => VariantPolicy::default(),
            Self::AskInstructor => VariantPolicy {
                allow_draft: false,
                no_forward: true,
                ..VariantPolicy::default()
            },
            Self::Forward => VariantPolicy {
                subject_decorator: Some(transform::forward_subject),
                ..VariantPolicy::default()
            },
            Self::QuizQuestion => VariantPolicy {
                allow_draft: false,
                ..VariantPolicy::default()
            },
        }
    }

    /// Page heading.
    pub fn title(&self) -> &'static str {
        match self {
            Self::OpenSelection => "Compose message",
            Self::AskInstructor => "Ask the instructor",
            Self::Draft => "Edit draft",
            Self::Forward => "Forward message",
            Self::QuizQuestion => "Ask about a question",
        }
    }
}

/// Behavior flags that distinguish the variants.
#[derive(Debug, Clone, Copy)]
pub struct VariantPolicy {
    /// Whether `save_draft` is available.
    pub allow_draft: bool,
    /// Rewrites the loaded record's subject for the compose view.
    pub subject_decorator: Option<fn(&str) -> String>,
    /// Whether persisted messages are marked as not forwardable.
    pub no_forward: bool,
}

impl Default for VariantPolicy {
    fn default() -> Self {
        Self {
            allow_draft: true,
            subject_decorator: None,
            no_forward: false,
        }
    }
}

/// Where the caller should go after a send or a cancel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// The sender's mailbox for one status.
    Mailbox {
        /// Course of the mailbox.
        course_id: CourseId,
        /// Sent log or drafts.
        status: MessageStatus,
    },
    /// The course home.
    Course {
        /// Course to return to.
        course_id: CourseId,
    },
    /// The attempt a question was asked about.
    Attempt {
        /// Review page of the attempt.
        url: String,
    },
}

/// Subject for a question about `attempt`.
pub fn quiz_subject(attempt: &QuestionAttempt) -> String {
    match &attempt.owner {
        AttemptOwner::Quiz { name } => {
            format!("Question about {name}, question {}", attempt.slot)
        }
        AttemptOwner::Unknown { .. } => "Question about a course activity".to_owned(),
    }
}

/// Body for a question about `attempt`: the quoted prompt and a link back.
pub fn quiz_body(attempt: &QuestionAttempt) -> String {
    transform::quote_question(
        &attempt.question_text,
        attempt.response_summary.as_deref(),
        &attempt.review_url,
    )
}
