//! Attachment packaging for delivery.
//!
//! A message's stored files are bundled into one gzipped tar at
//! `{temp_root}/{user_id}/{message_id}/attachment.tar.gz`. The returned
//! [`ArchiveGuard`] owns the file; it is removed by
//! [`ArchiveGuard::release`] or, failing that, when the guard is dropped.

use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info, warn};

use crate::files::{AreaRef, FileArea, FileAreaError};
use crate::types::{MessageId, UserId};

/// File name of every delivery archive.
pub const ARCHIVE_NAME: &str = "attachment.tar.gz";

/// Errors from packaging attachments.
#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    /// Reading the stored files failed.
    #[error("file area error: {0}")]
    Files(#[from] FileAreaError),

    /// Writing the archive failed.
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking archive task panicked or was cancelled.
    #[error("archive task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Builds delivery archives under a temporary root.
#[derive(Debug, Clone)]
pub struct AttachmentPackager {
    temp_root: PathBuf,
}

impl AttachmentPackager {
    /// Create a packager writing below `temp_root`.
    pub fn new(temp_root: PathBuf) -> Self {
        Self { temp_root }
    }

    /// Temporary root directory.
    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    /// Where the archive for one (user, message) pair lives.
    pub fn archive_path(&self, user_id: UserId, message_id: MessageId) -> PathBuf {
        self.temp_root
            .join(user_id.to_string())
            .join(message_id.to_string())
            .join(ARCHIVE_NAME)
    }

    /// Bundle every file in `area` into a fresh archive.
    ///
    /// Returns `Ok(None)` when the area holds no files. Re-running for the
    /// same pair overwrites the previous archive.
    ///
    /// # Errors
    ///
    /// Returns [`AttachmentError`] if the files cannot be read or the
    /// archive cannot be written. No partial archive is left behind.
    pub async fn package(
        &self,
        files: &dyn FileArea,
        area: &AreaRef,
        user_id: UserId,
        message_id: MessageId,
    ) -> Result<Option<ArchiveGuard>, AttachmentError> {
        let stored = files.list(area).await?;
        if stored.is_empty() {
            debug!(message_id, "no attachments to package");
            return Ok(None);
        }

        let mut contents = Vec::with_capacity(stored.len());
        for file in &stored {
            let data = files.read(area, &file.name).await?;
            contents.push((file.name.clone(), data));
        }

        let path = self.archive_path(user_id, message_id);
        // The guard exists before the archive does, so a failed write is
        // cleaned up on drop.
        let guard = ArchiveGuard {
            name: ARCHIVE_NAME.to_owned(),
            path: path.clone(),
            released: false,
        };
        let count = contents.len();
        tokio::task::spawn_blocking(move || write_archive(&path, &contents)).await??;

        info!(
            message_id,
            user_id,
            files = count,
            archive = %guard.path.display(),
            "attachments packaged"
        );
        Ok(Some(guard))
    }
}

fn write_archive(path: &Path, contents: &[(String, Vec<u8>)]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, data) in contents {
        let mut header = tar::Header::new_gnu();
        header.set_size(u64::try_from(data.len()).unwrap_or(u64::MAX));
        header.set_mode(0o644);
        header.set_mtime(u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0));
        header.set_cksum();
        builder.append_data(&mut header, name, data.as_slice())?;
    }
    builder.into_inner()?.finish()?;
    Ok(())
}

/// A delivery archive on disk. Removed on release or drop.
#[derive(Debug)]
pub struct ArchiveGuard {
    name: String,
    path: PathBuf,
    released: bool,
}

impl ArchiveGuard {
    /// File name presented to recipients.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Location of the archive.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the archive, then its per-message and per-user directories
    /// once they are empty.
    pub async fn release(mut self) {
        self.released = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(archive = %self.path.display(), error = %e, "failed to remove archive");
            }
        }
        // Each removal fails harmlessly while another archive shares the directory.
        for dir in self.path.ancestors().skip(1).take(2) {
            if tokio::fs::remove_dir(dir).await.is_err() {
                break;
            }
        }
        debug!(archive = %self.path.display(), "archive released");
    }
}

impl Drop for ArchiveGuard {
    fn drop(&mut self) {
        if !self.released {
            remove_quietly(&self.path);
        }
    }
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(archive = %path.display(), error = %e, "failed to remove archive"),
    }
}
