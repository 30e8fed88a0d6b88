//! Scoped file storage for uploads and message attachments.
//!
//! Files are addressed by an [`AreaRef`] (context, component, area, item).
//! [`FsFileArea`] stores each area as a directory:
//! `{root}/{context}/{component}/{area}/{item}/{filename}`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use crate::types::{MessageId, MessageStatus, UserId};

/// Component name for areas owned by the mail composer.
pub const COMPONENT: &str = "coursemail";

/// Errors from file area operations.
#[derive(Debug, thiserror::Error)]
pub enum FileAreaError {
    /// Filesystem operation failed.
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A file name tried to escape its area.
    #[error("invalid file name: {0:?}")]
    InvalidName(String),
}

/// Address of one file area.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AreaRef {
    /// Owning context (course context, or the user id for personal uploads).
    pub context_id: i64,
    /// Owning component.
    pub component: String,
    /// Area within the component.
    pub area: String,
    /// Item within the area.
    pub item: String,
}

impl AreaRef {
    /// A user's personal upload area for one compose session.
    pub fn user_upload(user_id: UserId, item: &str) -> Self {
        Self {
            context_id: user_id,
            component: "user".to_owned(),
            area: "draft".to_owned(),
            item: item.to_owned(),
        }
    }

    /// Permanent attachment area of a stored message.
    pub fn attachments(context_id: i64, status: MessageStatus, message_id: MessageId) -> Self {
        Self {
            context_id,
            component: COMPONENT.to_owned(),
            area: format!("attachment_{}", status.as_str()),
            item: message_id.to_string(),
        }
    }
}

/// A file inside an area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// File name, unique within the area.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
}

/// Scoped storage addressed by [`AreaRef`].
#[async_trait]
pub trait FileArea: Send + Sync {
    /// Files in `area`, sorted by name. A missing area is empty.
    async fn list(&self, area: &AreaRef) -> Result<Vec<StoredFile>, FileAreaError>;

    /// Contents of one file.
    async fn read(&self, area: &AreaRef, name: &str) -> Result<Vec<u8>, FileAreaError>;

    /// Create or replace one file.
    async fn write(&self, area: &AreaRef, name: &str, data: &[u8]) -> Result<(), FileAreaError>;

    /// Replace the contents of `to` with a copy of `from`. Returns the file count.
    async fn copy_area(&self, from: &AreaRef, to: &AreaRef) -> Result<usize, FileAreaError>;

    /// Remove `area` and everything in it. A missing area is not an error.
    async fn delete_area(&self, area: &AreaRef) -> Result<(), FileAreaError>;
}

/// [`FileArea`] on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsFileArea {
    root: PathBuf,
}

impl FsFileArea {
    /// Use `root` as the storage directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`FileAreaError::Io`] if the directory cannot be created.
    pub async fn new(root: PathBuf) -> Result<Self, FileAreaError> {
        fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "file area ready");
        Ok(Self { root })
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn area_dir(&self, area: &AreaRef) -> PathBuf {
        self.root
            .join(area.context_id.to_string())
            .join(&area.component)
            .join(&area.area)
            .join(&area.item)
    }

    fn file_path(&self, area: &AreaRef, name: &str) -> Result<PathBuf, FileAreaError> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains('/')
            && !name.contains('\\');
        if !valid {
            return Err(FileAreaError::InvalidName(name.to_owned()));
        }
        Ok(self.area_dir(area).join(name))
    }
}

#[async_trait]
impl FileArea for FsFileArea {
    async fn list(&self, area: &AreaRef) -> Result<Vec<StoredFile>, FileAreaError> {
        let dir = self.area_dir(area);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                files.push(StoredFile {
                    name: name.to_owned(),
                    size: meta.len(),
                });
            }
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn read(&self, area: &AreaRef, name: &str) -> Result<Vec<u8>, FileAreaError> {
        let path = self.file_path(area, name)?;
        Ok(fs::read(&path).await?)
    }

    async fn write(&self, area: &AreaRef, name: &str, data: &[u8]) -> Result<(), FileAreaError> {
        let path = self.file_path(area, name)?;
        fs::create_dir_all(self.area_dir(area)).await?;
        fs::write(&path, data).await?;
        Ok(())
    }

    async fn copy_area(&self, from: &AreaRef, to: &AreaRef) -> Result<usize, FileAreaError> {
        self.delete_area(to).await?;
        let files = self.list(from).await?;
        if files.is_empty() {
            return Ok(0);
        }
        fs::create_dir_all(self.area_dir(to)).await?;
        for file in &files {
            fs::copy(self.file_path(from, &file.name)?, self.file_path(to, &file.name)?).await?;
        }
        debug!(count = files.len(), from = %from.item, to = %to.item, "file area copied");
        Ok(files.len())
    }

    async fn delete_area(&self, area: &AreaRef) -> Result<(), FileAreaError> {
        let dir = self.area_dir(area);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "failed to delete file area");
                Err(e.into())
            }
        }
    }
}
