//! Course mail: recipient resolution, composition, drafts and delivery.
//!
//! A sender in a course composes a message through a [`composer::Composer`].
//! Eligible recipients come from [`recipients`], attachments are bundled by
//! [`attachments`], and storage, directory and transport sit behind the
//! traits in [`store`], [`directory`], [`files`] and [`mailer`].
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod types;

pub mod directory;
pub mod files;
pub mod mailer;
pub mod store;

pub mod attachments;
pub mod recipients;
pub mod transform;

pub mod composer;
pub mod mailbox;
