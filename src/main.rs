//! coursemail CLI entry point.
//!
//! Administrative access to the mail store: schema setup, recipient
//! inspection, mailbox listing and deletion, sending stored drafts and
//! per-course settings.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use coursemail::attachments::AttachmentPackager;
use coursemail::composer::{ComposeServices, Composer, SubmitAction, Submission};
use coursemail::config::{self, AppConfig};
use coursemail::directory::PersonDirectory;
use coursemail::files::FsFileArea;
use coursemail::logging;
use coursemail::mailbox;
use coursemail::mailer::LogMailer;
use coursemail::recipients;
use coursemail::store::{RecordStore, SqliteStore};
use coursemail::types::{CourseId, MessageId, MessageStatus, SendContext, SubjectPrefix, UserId};

/// coursemail: course mail composer and mailbox tools.
#[derive(Parser)]
#[command(name = "coursemail", version, about)]
struct Cli {
    /// Config file (default: ~/.coursemail/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Create the database schema.
    Init,
    /// List who a user may address in a course.
    Recipients {
        #[arg(long)]
        course: CourseId,
        #[arg(long)]
        viewer: UserId,
    },
    /// List a user's sent messages (or drafts) in a course.
    List {
        #[arg(long)]
        course: CourseId,
        #[arg(long)]
        user: UserId,
        /// Show drafts instead of sent messages.
        #[arg(long)]
        drafts: bool,
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        per_page: u32,
    },
    /// Delete a sent message (or draft) and its attachments.
    Delete {
        /// Acting user.
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        id: MessageId,
        #[arg(long)]
        drafts: bool,
    },
    /// Send a stored draft as-is through the log mailer.
    SendDraft {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        id: MessageId,
    },
    /// Show or change a course's mail settings.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the settings in effect.
    Show {
        #[arg(long)]
        course: CourseId,
    },
    /// Drop stored settings so site defaults apply.
    Reset {
        #[arg(long)]
        course: CourseId,
    },
    /// Store settings, starting from the ones in effect.
    Set {
        #[arg(long)]
        course: CourseId,
        /// Comma-separated role shortnames that may be addressed.
        #[arg(long, value_delimiter = ',')]
        roles: Option<Vec<String>>,
        /// Subject prefix: none, idnumber or shortname.
        #[arg(long, value_parser = parse_prefix)]
        prepend: Option<SubjectPrefix>,
        /// Send senders a copy by default.
        #[arg(long)]
        receipt: Option<bool>,
    },
}

fn parse_prefix(s: &str) -> Result<SubjectPrefix, String> {
    SubjectPrefix::parse(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => config::config_dir()?.join("config.toml"),
    };
    let app = config::load_config_or_default(&config_path)?;
    let base = config_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let _logging_guard = logging::init(&app.logging, &base)?;
    let services = open_services(&app, &base).await?;

    match cli.command {
        Command::Init => {
            info!("schema ready");
            Ok(())
        }
        Command::Recipients { course, viewer } => handle_recipients(&services, course, viewer).await,
        Command::List {
            course,
            user,
            drafts,
            page,
            per_page,
        } => handle_list(&services, course, user, status(drafts), page, per_page).await,
        Command::Delete { user, id, drafts } => {
            mailbox::delete(&services, status(drafts), id, user).await?;
            println!("deleted {} message {id}", status(drafts).as_str());
            Ok(())
        }
        Command::SendDraft { user, id } => handle_send_draft(services, user, id).await,
        Command::Config { action } => handle_config(&services, action).await,
    }
}

fn status(drafts: bool) -> MessageStatus {
    if drafts {
        MessageStatus::Draft
    } else {
        MessageStatus::Sent
    }
}

async fn open_services(app: &AppConfig, base: &std::path::Path) -> anyhow::Result<ComposeServices> {
    let storage = app.storage.resolved(base);
    let store = SqliteStore::open(&storage.database)
        .await
        .with_context(|| format!("failed to open {}", storage.database.display()))?;
    let files = FsFileArea::new(storage.files_dir.clone())
        .await
        .with_context(|| format!("failed to open {}", storage.files_dir.display()))?;
    Ok(ComposeServices::sqlite(
        Arc::new(store),
        Arc::new(files),
        Arc::new(LogMailer),
        AttachmentPackager::new(storage.temp_dir),
        app.defaults.course_config(),
    ))
}

async fn send_context(
    services: &ComposeServices,
    course_id: CourseId,
    user_id: UserId,
) -> anyhow::Result<SendContext> {
    let directory: &dyn PersonDirectory = services.directory.as_ref();
    let course = directory
        .course(course_id)
        .await?
        .with_context(|| format!("course {course_id} not found"))?;
    let acting_user = directory
        .user(user_id)
        .await?
        .with_context(|| format!("user {user_id} not found"))?;
    let config =
        config::load_course_config(services.store.as_ref(), course_id, &services.defaults).await?;
    Ok(SendContext {
        acting_user,
        course,
        config,
    })
}

async fn handle_recipients(
    services: &ComposeServices,
    course_id: CourseId,
    viewer: UserId,
) -> anyhow::Result<()> {
    let ctx = send_context(services, course_id, viewer).await?;
    let set = recipients::load(
        services.directory.as_ref(),
        services.capabilities.as_ref(),
        &ctx,
    )
    .await?;
    if set.is_empty() {
        println!("no eligible recipients");
        return Ok(());
    }
    for user in set.users() {
        let roles: Vec<&str> = set
            .matched_roles(user.id)
            .iter()
            .map(|r| r.shortname.as_str())
            .collect();
        let groups: Vec<&str> = set
            .matched_groups(user.id)
            .iter()
            .map(|g| g.name.as_str())
            .collect();
        println!(
            "{:>6}  {:<30}  roles: {}  groups: {}",
            user.id,
            user.full_name(),
            roles.join(","),
            if set.global_access() {
                "(all)".to_owned()
            } else {
                groups.join(",")
            }
        );
    }
    Ok(())
}

async fn handle_list(
    services: &ComposeServices,
    course_id: CourseId,
    user_id: UserId,
    status: MessageStatus,
    page: u32,
    per_page: u32,
) -> anyhow::Result<()> {
    let listing = mailbox::list(
        services.store.as_ref(),
        status,
        course_id,
        user_id,
        page,
        per_page,
    )
    .await?;
    for message in &listing.messages {
        println!(
            "{:>6}  {}  to {:>3}  {}",
            message.id.unwrap_or_default(),
            message.time.format("%Y-%m-%d %H:%M"),
            message.recipients.len(),
            message.subject
        );
    }
    println!(
        "page {} ({} {} total{})",
        listing.page,
        listing.total,
        status.as_str(),
        if listing.has_more() { ", more" } else { "" }
    );
    Ok(())
}

async fn handle_send_draft(
    services: ComposeServices,
    user_id: UserId,
    draft_id: MessageId,
) -> anyhow::Result<()> {
    let draft = services
        .store
        .get_message(MessageStatus::Draft, draft_id)
        .await?
        .with_context(|| format!("draft {draft_id} not found"))?;
    let mut composer =
        Composer::from_draft(services, draft.course_id, user_id, draft_id).await?;
    let view = composer.compose_view().await?;
    let submission = Submission::from_view(view, SubmitAction::Send);
    composer.submit(submission);
    let outcome = composer.send().await?;
    println!("sent as message {}", outcome.message_id);
    for failure in &outcome.failures {
        println!(
            "  failed: user {}{}: {}",
            failure.recipient,
            if failure.receipt { " (receipt)" } else { "" },
            failure.reason
        );
    }
    Ok(())
}

async fn handle_config(services: &ComposeServices, action: ConfigAction) -> anyhow::Result<()> {
    let store: &dyn RecordStore = services.store.as_ref();
    match action {
        ConfigAction::Show { course } => {
            let stored = store.course_config(course).await?;
            let source = if stored.is_some() { "course" } else { "site defaults" };
            let effective = stored.unwrap_or_else(|| services.defaults.clone());
            println!("source:         {source}");
            println!("role selection: {}", effective.role_selection.join(","));
            println!("prepend:        {}", effective.prepend.as_str());
            println!("receipt:        {}", effective.receipt);
        }
        ConfigAction::Reset { course } => {
            store.reset_course_config(course).await?;
            println!("course {course} settings reset");
        }
        ConfigAction::Set {
            course,
            roles,
            prepend,
            receipt,
        } => {
            let mut effective =
                config::load_course_config(store, course, &services.defaults).await?;
            if let Some(roles) = roles {
                effective.role_selection = roles;
            }
            if let Some(prepend) = prepend {
                effective.prepend = prepend;
            }
            if let Some(receipt) = receipt {
                effective.receipt = receipt;
            }
            store.save_course_config(course, &effective).await?;
            println!("course {course} settings saved");
        }
    }
    Ok(())
}
