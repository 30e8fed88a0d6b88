//! The mail composer.
//!
//! One [`Composer`] serves one compose request. It is parameterized by a
//! [`RecipientSource`] and a [`VariantPolicy`], which together cover the
//! five variants (open selection, ask instructor, resumed draft, forward,
//! quiz question).
//!
//! Flow: construct -> [`Composer::compose_view`] -> [`Composer::submit`] ->
//! [`Composer::send`] or [`Composer::save_draft`]. Sending persists the
//! message, packages its attachments, then delivers one mail per recipient,
//! collecting failures instead of stopping at the first one.

pub mod factory;
pub mod source;
pub mod variant;

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::attachments::{AttachmentError, AttachmentPackager};
use crate::config::load_course_config;
use crate::directory::{
    AttemptSource, CapabilityChecker, DirectoryError, PersonDirectory, QuestionAttempt,
};
use crate::files::{AreaRef, FileArea, FileAreaError, StoredFile};
use crate::mailer::{MailAttachment, Mailer, OutgoingMail};
use crate::recipients::{self, RecipientAccessError};
use crate::store::{RecordStore, SqliteStore, StoreError};
use crate::transform;
use crate::types::{
    BodyFormat, CourseConfig, CourseId, Message, MessageId, MessageStatus, SendContext, Signature,
    SignatureId, User, UserId,
};

pub use self::factory::select_composer;
pub use self::source::RecipientSource;
pub use self::variant::{ComposeTarget, ComposerKind, Destination, VariantPolicy};

/// Why a submission cannot be sent or saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The subject is blank.
    #[error("a subject is required")]
    MissingSubject,
    /// Nobody would receive the message.
    #[error("at least one recipient is required")]
    MissingRecipients,
    /// Both of the above.
    #[error("a subject and at least one recipient are required")]
    Both,
}

/// Errors from composer operations.
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    /// The acting user may not do this.
    #[error("permission denied: {0}")]
    Permission(String),

    /// A course, user, message or attempt does not exist (or is not theirs).
    #[error("not found: {0}")]
    NotFound(String),

    /// The submission is incomplete.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The submission named a recipient outside the eligible set.
    #[error(transparent)]
    RecipientAccess(#[from] RecipientAccessError),

    /// The operation is not available for this variant.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// The latest submission was a cancel.
    #[error("composition was cancelled")]
    Cancelled,

    /// Nothing has been submitted yet.
    #[error("nothing has been submitted")]
    NoSubmission,

    /// Record storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A directory lookup failed.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// File storage failed.
    #[error(transparent)]
    Files(#[from] FileAreaError),

    /// Packaging attachments failed.
    #[error(transparent)]
    Attachment(#[from] AttachmentError),
}

/// The collaborators a composer works with.
#[derive(Clone)]
pub struct ComposeServices {
    /// Courses, users, participants and groups.
    pub directory: Arc<dyn PersonDirectory>,
    /// Capability checks.
    pub capabilities: Arc<dyn CapabilityChecker>,
    /// Question attempt lookups.
    pub attempts: Arc<dyn AttemptSource>,
    /// Message, signature and course-config storage.
    pub store: Arc<dyn RecordStore>,
    /// Upload and attachment storage.
    pub files: Arc<dyn FileArea>,
    /// Mail transport.
    pub mailer: Arc<dyn Mailer>,
    /// Delivery archive builder.
    pub packager: AttachmentPackager,
    /// Course settings used when a course has none stored.
    pub defaults: CourseConfig,
}

impl std::fmt::Debug for ComposeServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposeServices")
            .field("packager", &self.packager)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl ComposeServices {
    /// Services backed by one [`SqliteStore`] for every lookup.
    pub fn sqlite(
        store: Arc<SqliteStore>,
        files: Arc<dyn FileArea>,
        mailer: Arc<dyn Mailer>,
        packager: AttachmentPackager,
        defaults: CourseConfig,
    ) -> Self {
        Self {
            directory: store.clone(),
            capabilities: store.clone(),
            attempts: store.clone(),
            store,
            files,
            mailer,
            packager,
            defaults,
        }
    }
}

/// What the caller asked for with a submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubmitAction {
    /// Send the message.
    #[default]
    Send,
    /// Save it as a draft.
    SaveDraft,
    /// Abandon it.
    Cancel,
}

/// The latest state submitted by the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submission {
    /// Requested action.
    pub action: SubmitAction,
    /// Subject as typed.
    pub subject: String,
    /// Body as typed.
    pub body: String,
    /// Body format.
    pub format: BodyFormat,
    /// Selected recipient ids (ignored by fixed-recipient variants).
    pub recipients: Vec<UserId>,
    /// Selected signature, `None` for no signature.
    pub signature_id: Option<SignatureId>,
    /// Whether the sender wants a copy.
    pub receipt: bool,
}

impl Submission {
    /// A submission that keeps everything the view was prefilled with.
    pub fn from_view(view: &ComposeView, action: SubmitAction) -> Self {
        Self {
            action,
            subject: view.subject.clone(),
            body: view.body.clone(),
            format: view.format,
            recipients: view.selected.clone(),
            signature_id: view.signature_id,
            receipt: view.receipt,
        }
    }
}

/// Editable state offered to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeView {
    /// Heading for the page.
    pub header: String,
    /// Prefilled subject.
    pub subject: String,
    /// Prefilled body.
    pub body: String,
    /// Body format.
    pub format: BodyFormat,
    /// Users that may be selected.
    pub candidates: Vec<User>,
    /// Ids selected up front.
    pub selected: Vec<UserId>,
    /// Whether the selection is fixed.
    pub recipients_fixed: bool,
    /// The sender's signatures, default first.
    pub signatures: Vec<Signature>,
    /// Signature selected up front.
    pub signature_id: Option<SignatureId>,
    /// Receipt checkbox state.
    pub receipt: bool,
    /// Upload area the caller should write attachments into.
    pub upload_area: AreaRef,
    /// Files already in the upload area.
    pub attachments: Vec<StoredFile>,
    /// Whether a "save draft" action should be offered.
    pub allow_draft: bool,
}

/// A recipient that could not be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    /// Who missed out.
    pub recipient: UserId,
    /// Transport error text.
    pub reason: String,
    /// Whether this was the sender's own copy.
    pub receipt: bool,
}

/// Result of a send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    /// Id of the message in the sent log.
    pub message_id: MessageId,
    /// Recipients that could not be reached (empty when all succeeded).
    pub failures: Vec<DeliveryFailure>,
}

impl SendOutcome {
    /// Whether every delivery succeeded.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One compose request.
#[derive(Debug)]
pub struct Composer {
    services: ComposeServices,
    ctx: SendContext,
    kind: ComposerKind,
    policy: VariantPolicy,
    source: RecipientSource,
    signatures: Vec<Signature>,
    signature_id: Option<SignatureId>,
    record: Option<Message>,
    attempt: Option<QuestionAttempt>,
    upload_item: String,
    view: Option<ComposeView>,
    submission: Option<Submission>,
    saved_draft: Option<MessageId>,
}

impl Composer {
    /// Build a composer for `target` in `course_id`, acting as `acting_user`.
    ///
    /// `signature_id` overrides the preselected signature.
    ///
    /// # Errors
    ///
    /// - [`ComposeError::NotFound`] for a missing course, user, record or
    ///   attempt, or an attempt that belongs to someone else
    /// - [`ComposeError::Permission`] when the user lacks the variant's
    ///   capability, the record belongs to another sender, or the record to
    ///   forward is marked no-forward
    pub async fn construct(
        services: ComposeServices,
        course_id: CourseId,
        signature_id: Option<SignatureId>,
        target: ComposeTarget,
        acting_user: UserId,
    ) -> Result<Self, ComposeError> {
        let kind = target.kind();
        let course = services
            .directory
            .course(course_id)
            .await?
            .ok_or_else(|| ComposeError::NotFound(format!("course {course_id}")))?;
        let user = services
            .directory
            .user(acting_user)
            .await?
            .ok_or_else(|| ComposeError::NotFound(format!("user {acting_user}")))?;
        let config =
            load_course_config(services.store.as_ref(), course_id, &services.defaults).await?;

        let capability = kind.required_capability();
        if !services
            .capabilities
            .has_capability(capability, course_id, acting_user)
            .await?
        {
            return Err(ComposeError::Permission(format!(
                "user {acting_user} lacks {} in course {course_id}",
                capability.as_str()
            )));
        }

        let signatures = services.store.signatures(acting_user).await?;
        let ctx = SendContext {
            acting_user: user,
            course,
            config,
        };

        let mut record = None;
        let mut attempt = None;
        let source = match target {
            ComposeTarget::New => RecipientSource::Open(
                recipients::load(
                    services.directory.as_ref(),
                    services.capabilities.as_ref(),
                    &ctx,
                )
                .await?,
            ),
            ComposeTarget::AskInstructor => RecipientSource::FixedSet { cached: None },
            ComposeTarget::Draft(id) | ComposeTarget::Forward(id) => {
                let status = if kind == ComposerKind::Draft {
                    MessageStatus::Draft
                } else {
                    MessageStatus::Sent
                };
                let message = load_owned(services.store.as_ref(), status, id, &ctx).await?;
                if kind == ComposerKind::Forward && message.no_forward {
                    return Err(ComposeError::Permission(format!(
                        "message {id} cannot be forwarded"
                    )));
                }
                let preselected = message.recipients.clone();
                record = Some(message);
                RecipientSource::FromRecord {
                    set: recipients::load(
                        services.directory.as_ref(),
                        services.capabilities.as_ref(),
                        &ctx,
                    )
                    .await?,
                    preselected,
                }
            }
            ComposeTarget::QuizQuestion(attempt_id) => {
                let found = services
                    .attempts
                    .question_attempt(attempt_id)
                    .await?
                    .filter(|a| a.user_id == acting_user && a.course_id == course_id)
                    .ok_or_else(|| ComposeError::NotFound(format!("attempt {attempt_id}")))?;
                attempt = Some(found);
                RecipientSource::FixedSet { cached: None }
            }
        };

        let signature_id = signature_id.or_else(|| match (&record, kind) {
            (Some(draft), ComposerKind::Draft) => draft.signature_id,
            _ => signatures.iter().find(|s| s.is_default).map(|s| s.id),
        });

        info!(
            course_id,
            user_id = acting_user,
            kind = kind.as_str(),
            "composer constructed"
        );
        Ok(Self {
            services,
            ctx,
            kind,
            policy: kind.policy(),
            source,
            signatures,
            signature_id,
            record,
            attempt,
            upload_item: Uuid::new_v4().to_string(),
            view: None,
            submission: None,
            saved_draft: None,
        })
    }

    /// Open selection among the eligible participants.
    ///
    /// # Errors
    ///
    /// See [`Composer::construct`].
    pub async fn open(
        services: ComposeServices,
        course_id: CourseId,
        acting_user: UserId,
    ) -> Result<Self, ComposeError> {
        Self::construct(services, course_id, None, ComposeTarget::New, acting_user).await
    }

    /// Fixed message to the course's instructors.
    ///
    /// # Errors
    ///
    /// See [`Composer::construct`].
    pub async fn ask_instructor(
        services: ComposeServices,
        course_id: CourseId,
        acting_user: UserId,
    ) -> Result<Self, ComposeError> {
        Self::construct(
            services,
            course_id,
            None,
            ComposeTarget::AskInstructor,
            acting_user,
        )
        .await
    }

    /// Resume a draft.
    ///
    /// # Errors
    ///
    /// See [`Composer::construct`].
    pub async fn from_draft(
        services: ComposeServices,
        course_id: CourseId,
        acting_user: UserId,
        draft_id: MessageId,
    ) -> Result<Self, ComposeError> {
        Self::construct(
            services,
            course_id,
            None,
            ComposeTarget::Draft(draft_id),
            acting_user,
        )
        .await
    }

    /// Forward a sent message.
    ///
    /// # Errors
    ///
    /// See [`Composer::construct`].
    pub async fn forward(
        services: ComposeServices,
        course_id: CourseId,
        acting_user: UserId,
        message_id: MessageId,
    ) -> Result<Self, ComposeError> {
        Self::construct(
            services,
            course_id,
            None,
            ComposeTarget::Forward(message_id),
            acting_user,
        )
        .await
    }

    /// Ask the instructors about a question attempt.
    ///
    /// # Errors
    ///
    /// See [`Composer::construct`].
    pub async fn quiz_question(
        services: ComposeServices,
        course_id: CourseId,
        acting_user: UserId,
        attempt_id: i64,
    ) -> Result<Self, ComposeError> {
        Self::construct(
            services,
            course_id,
            None,
            ComposeTarget::QuizQuestion(attempt_id),
            acting_user,
        )
        .await
    }

    /// Which variant this is.
    pub fn kind(&self) -> ComposerKind {
        self.kind
    }

    /// The sender, course and settings in effect.
    pub fn context(&self) -> &SendContext {
        &self.ctx
    }

    /// The record this composer was resumed or forwarded from.
    pub fn record(&self) -> Option<&Message> {
        self.record.as_ref()
    }

    /// Upload area for this compose session.
    pub fn upload_area(&self) -> AreaRef {
        AreaRef::user_upload(self.ctx.acting_user.id, &self.upload_item)
    }

    /// The editable surface, built on first call.
    ///
    /// A loaded record's attachments are copied into the session's upload
    /// area the first time.
    ///
    /// # Errors
    ///
    /// Returns [`ComposeError`] if recipients or files cannot be loaded.
    pub async fn compose_view(&mut self) -> Result<&ComposeView, ComposeError> {
        let view = match self.view.take() {
            Some(view) => view,
            None => self.build_view().await?,
        };
        Ok(self.view.insert(view))
    }

    async fn build_view(&mut self) -> Result<ComposeView, ComposeError> {
        self.source
            .load(
                self.services.directory.as_ref(),
                self.services.capabilities.as_ref(),
                &self.ctx,
            )
            .await?;

        let upload = self.upload_area();
        let mut receipt = self.ctx.config.receipt;
        let (subject, body, format) = match (&self.record, &self.attempt) {
            (Some(record), _) => {
                if let Some(id) = record.id {
                    let stored =
                        AreaRef::attachments(self.ctx.course.context_id, record.status, id);
                    self.services.files.copy_area(&stored, &upload).await?;
                }
                if self.kind == ComposerKind::Draft {
                    receipt = record.receipt;
                }
                let subject = match self.policy.subject_decorator {
                    Some(decorate) => decorate(&record.subject),
                    None => record.subject.clone(),
                };
                (subject, record.body.clone(), record.format)
            }
            (None, Some(attempt)) => (
                variant::quiz_subject(attempt),
                variant::quiz_body(attempt),
                BodyFormat::Html,
            ),
            (None, None) => (String::new(), String::new(), BodyFormat::Html),
        };

        Ok(ComposeView {
            header: self.header_string(),
            subject,
            body,
            format,
            candidates: self.source.candidates().to_vec(),
            selected: self.source.preselected(),
            recipients_fixed: self.source.is_fixed(),
            signatures: self.signatures.clone(),
            signature_id: self.signature_id,
            receipt,
            attachments: self.services.files.list(&upload).await?,
            upload_area: upload,
            allow_draft: self.policy.allow_draft,
        })
    }

    /// Record the latest submitted state.
    pub fn submit(&mut self, submission: Submission) {
        self.submission = Some(submission);
    }

    /// Whether the latest submission asks to send.
    pub fn send_requested(&self) -> bool {
        self.requested(SubmitAction::Send)
    }

    /// Whether the latest submission asks to save a draft.
    pub fn save_requested(&self) -> bool {
        self.requested(SubmitAction::SaveDraft)
    }

    /// Whether the latest submission cancels.
    pub fn cancel_requested(&self) -> bool {
        self.requested(SubmitAction::Cancel)
    }

    fn requested(&self, action: SubmitAction) -> bool {
        self.submission.as_ref().is_some_and(|s| s.action == action)
    }

    fn current_submission(&self) -> Result<Submission, ComposeError> {
        let submission = self.submission.clone().ok_or(ComposeError::NoSubmission)?;
        if submission.action == SubmitAction::Cancel {
            return Err(ComposeError::Cancelled);
        }
        Ok(submission)
    }

    /// Check a submission and resolve its recipients.
    ///
    /// # Errors
    ///
    /// - [`ComposeError::RecipientAccess`] if a submitted id is not eligible
    /// - [`ComposeError::Validation`] if the subject is blank or nobody
    ///   would receive the message
    pub async fn validate(&mut self, submission: &Submission) -> Result<Vec<User>, ComposeError> {
        let recipients = self
            .source
            .resolve(
                &submission.recipients,
                self.services.directory.as_ref(),
                self.services.capabilities.as_ref(),
                &self.ctx,
            )
            .await?;
        let missing_subject = submission.subject.trim().is_empty();
        match (missing_subject, recipients.is_empty()) {
            (true, true) => Err(ValidationError::Both.into()),
            (true, false) => Err(ValidationError::MissingSubject.into()),
            (false, true) => Err(ValidationError::MissingRecipients.into()),
            (false, false) => Ok(recipients),
        }
    }

    fn build_message(
        &self,
        submission: &Submission,
        status: MessageStatus,
        recipients: &[User],
        attachments: Vec<String>,
    ) -> Message {
        Message {
            id: None,
            course_id: self.ctx.course.id,
            sender_id: self.ctx.acting_user.id,
            subject: submission.subject.clone(),
            body: submission.body.clone(),
            format: submission.format,
            attachments,
            recipients: recipients.iter().map(|u| u.id).collect(),
            time: Utc::now(),
            signature_id: submission.signature_id,
            receipt: submission.receipt,
            no_forward: self.policy.no_forward,
            status,
            subject_prefixed: false,
        }
    }

    fn outgoing_mail(
        &self,
        to: &User,
        message: &Message,
        attachment: Option<MailAttachment>,
    ) -> OutgoingMail {
        OutgoingMail {
            to: to.clone(),
            from: self.ctx.acting_user.clone(),
            subject: message.subject.clone(),
            plain_body: transform::plain_body(&message.body, message.format),
            html_body: transform::html_body(&message.body, message.format),
            attachment,
        }
    }

    /// Send the submitted message.
    ///
    /// Persists it to the sent log, packages attachments, appends the
    /// signature, applies the course subject prefix and delivers one mail
    /// per recipient (plus the sender's copy when requested). Failed
    /// deliveries are collected in the outcome. The draft this composition
    /// was saved as or resumed from is deleted only when every delivery
    /// succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`ComposeError`] when there is no submission, it was a cancel,
    /// it fails validation, or persistence or packaging fails. Nothing is
    /// stored or delivered when validation fails.
    #[instrument(skip(self), fields(
        course_id = self.ctx.course.id,
        sender = self.ctx.acting_user.id,
        kind = self.kind.as_str()
    ))]
    pub async fn send(&mut self) -> Result<SendOutcome, ComposeError> {
        let submission = self.current_submission()?;
        let recipients = self.validate(&submission).await?;
        self.compose_view().await?;

        let files = self.services.files.clone();
        let upload = self.upload_area();
        let attachments: Vec<String> = files
            .list(&upload)
            .await?
            .into_iter()
            .map(|f| f.name)
            .collect();
        let mut message =
            self.build_message(&submission, MessageStatus::Sent, &recipients, attachments);
        let message_id = self.services.store.insert_message(&message).await?;
        message.id = Some(message_id);

        let stored =
            AreaRef::attachments(self.ctx.course.context_id, MessageStatus::Sent, message_id);
        files.copy_area(&upload, &stored).await?;
        let archive = self
            .services
            .packager
            .package(files.as_ref(), &stored, self.ctx.acting_user.id, message_id)
            .await?;

        let mut outgoing = message.clone();
        outgoing.body = transform::append_signature(
            &message.body,
            message.format,
            &self.signatures,
            message.signature_id,
        );
        let label = self.ctx.course.label(self.ctx.config.prepend);
        transform::apply_subject_prefix(&mut outgoing, label);

        let attachment = archive.as_ref().map(|a| MailAttachment {
            name: a.name().to_owned(),
            path: a.path().to_path_buf(),
        });

        let mut failures = Vec::new();
        for user in &recipients {
            let mail = self.outgoing_mail(user, &outgoing, attachment.clone());
            if let Err(e) = self.services.mailer.deliver(&mail).await {
                warn!(message_id, recipient = user.id, error = %e, "delivery failed");
                failures.push(DeliveryFailure {
                    recipient: user.id,
                    reason: e.to_string(),
                    receipt: false,
                });
            }
        }

        if message.receipt {
            let sender = self.ctx.acting_user.clone();
            let mail = self.outgoing_mail(&sender, &outgoing, attachment.clone());
            if let Err(e) = self.services.mailer.deliver(&mail).await {
                warn!(message_id, error = %e, "receipt delivery failed");
                failures.push(DeliveryFailure {
                    recipient: sender.id,
                    reason: e.to_string(),
                    receipt: true,
                });
            }
        }

        if let Some(archive) = archive {
            archive.release().await;
        }
        if let Err(e) = files.delete_area(&upload).await {
            warn!(message_id, error = %e, "failed to clear upload area");
        }
        // The cached view lists files that are gone now.
        self.view = None;

        if failures.is_empty() {
            self.delete_source_draft().await;
        }

        info!(
            message_id,
            recipients = recipients.len(),
            failed = failures.len(),
            "message sent"
        );
        Ok(SendOutcome {
            message_id,
            failures,
        })
    }

    /// The draft this composition lives in: the one saved here, else the
    /// one it was resumed from.
    fn source_draft(&self) -> Option<MessageId> {
        if !self.policy.allow_draft {
            return None;
        }
        let resumed = match self.kind {
            ComposerKind::Draft => self.record.as_ref().and_then(|r| r.id),
            _ => None,
        };
        self.saved_draft.or(resumed)
    }

    async fn delete_source_draft(&mut self) {
        let Some(draft_id) = self.source_draft() else {
            return;
        };
        let area =
            AreaRef::attachments(self.ctx.course.context_id, MessageStatus::Draft, draft_id);
        if let Err(e) = self
            .services
            .store
            .delete_message(MessageStatus::Draft, draft_id)
            .await
        {
            warn!(draft_id, error = %e, "failed to delete sent draft");
            return;
        }
        self.saved_draft = None;
        if let Some(record) = self
            .record
            .as_mut()
            .filter(|r| r.status == MessageStatus::Draft && r.id == Some(draft_id))
        {
            record.id = None;
        }
        if let Err(e) = self.services.files.delete_area(&area).await {
            warn!(draft_id, error = %e, "failed to delete draft attachments");
        }
        debug!(draft_id, "sent draft deleted");
    }

    /// Save the submitted message as a draft, returning the draft id.
    ///
    /// Updates `existing_id` when given, else the draft this composer was
    /// resumed from or last saved, else inserts a new draft. Nothing is
    /// delivered.
    ///
    /// # Errors
    ///
    /// - [`ComposeError::Unsupported`] for variants without drafts
    /// - [`ComposeError::Permission`] when updating someone else's draft
    /// - everything [`Composer::validate`] returns
    #[instrument(skip(self), fields(
        course_id = self.ctx.course.id,
        sender = self.ctx.acting_user.id,
        kind = self.kind.as_str()
    ))]
    pub async fn save_draft(
        &mut self,
        existing_id: Option<MessageId>,
    ) -> Result<MessageId, ComposeError> {
        if !self.policy.allow_draft {
            return Err(ComposeError::Unsupported(
                "drafts are not available for this composer",
            ));
        }
        let submission = self.current_submission()?;
        let recipients = self.validate(&submission).await?;
        self.compose_view().await?;

        let files = self.services.files.clone();
        let upload = self.upload_area();
        let attachments: Vec<String> = files
            .list(&upload)
            .await?
            .into_iter()
            .map(|f| f.name)
            .collect();
        let mut message =
            self.build_message(&submission, MessageStatus::Draft, &recipients, attachments);

        let draft_id = match existing_id.or(self.source_draft()) {
            Some(id) => {
                load_owned(self.services.store.as_ref(), MessageStatus::Draft, id, &self.ctx)
                    .await?;
                message.id = Some(id);
                self.services.store.update_message(&message).await?;
                id
            }
            None => self.services.store.insert_message(&message).await?,
        };

        let stored =
            AreaRef::attachments(self.ctx.course.context_id, MessageStatus::Draft, draft_id);
        files.copy_area(&upload, &stored).await?;
        self.saved_draft = Some(draft_id);

        info!(draft_id, recipients = recipients.len(), "draft saved");
        Ok(draft_id)
    }

    /// Whether anybody at all could be addressed.
    ///
    /// # Errors
    ///
    /// Returns [`ComposeError::Directory`] if the fixed set cannot be loaded.
    pub async fn potential_recipients_exist(&mut self) -> Result<bool, ComposeError> {
        let any = self
            .source
            .any(
                self.services.directory.as_ref(),
                self.services.capabilities.as_ref(),
                &self.ctx,
            )
            .await?;
        Ok(any)
    }

    /// Page heading, e.g. `CS101: Forward message`.
    pub fn header_string(&self) -> String {
        format!("{}: {}", self.ctx.course.shortname, self.kind.title())
    }

    /// Where to go after a successful send.
    pub fn success_destination(&self) -> Destination {
        let course_id = self.ctx.course.id;
        match (self.kind, &self.attempt) {
            (ComposerKind::QuizQuestion, Some(attempt)) => Destination::Attempt {
                url: attempt.review_url.clone(),
            },
            (ComposerKind::AskInstructor | ComposerKind::QuizQuestion, _) => {
                Destination::Course { course_id }
            }
            _ => Destination::Mailbox {
                course_id,
                status: MessageStatus::Sent,
            },
        }
    }

    /// Where to go after a cancel.
    pub fn cancel_destination(&self) -> Destination {
        let course_id = self.ctx.course.id;
        match (self.kind, &self.attempt) {
            (ComposerKind::QuizQuestion, Some(attempt)) => Destination::Attempt {
                url: attempt.review_url.clone(),
            },
            (ComposerKind::Draft, _) => Destination::Mailbox {
                course_id,
                status: MessageStatus::Draft,
            },
            (ComposerKind::Forward, _) => Destination::Mailbox {
                course_id,
                status: MessageStatus::Sent,
            },
            _ => Destination::Course { course_id },
        }
    }
}

/// Load a message that must belong to the context's sender and course.
async fn load_owned(
    store: &dyn RecordStore,
    status: MessageStatus,
    id: MessageId,
    ctx: &SendContext,
) -> Result<Message, ComposeError> {
    let message = store
        .get_message(status, id)
        .await?
        .filter(|m| m.course_id == ctx.course.id)
        .ok_or_else(|| ComposeError::NotFound(format!("{} message {id}", status.as_str())))?;
    if message.sender_id != ctx.acting_user.id {
        return Err(ComposeError::Permission(format!(
            "message {id} belongs to another user"
        )));
    }
    Ok(message)
}
