//! Configuration loading.
//!
//! Site settings live in `~/.coursemail/config.toml`. Every section is
//! optional; missing values fall back to the defaults below. Per-course mail
//! settings are stored in the database and fall back to `[defaults]`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::store::{RecordStore, StoreError};
use crate::types::{CourseConfig, CourseId, SubjectPrefix};

/// Top-level site configuration.
#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    /// Where data lives.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Course settings used when a course has none of its own.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage locations. Relative paths are resolved against the config directory.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file.
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Root of the file area (uploads and attachments).
    #[serde(default = "default_files_dir")]
    pub files_dir: PathBuf,

    /// Root for transient delivery archives.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            files_dir: default_files_dir(),
            temp_dir: default_temp_dir(),
        }
    }
}

impl StorageConfig {
    /// Copy with every relative path joined onto `base`.
    pub fn resolved(&self, base: &Path) -> Self {
        let join = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        };
        Self {
            database: join(&self.database),
            files_dir: join(&self.files_dir),
            temp_dir: join(&self.temp_dir),
        }
    }
}

/// Site-wide course mail defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultsConfig {
    /// Role shortnames that may be addressed.
    #[serde(default = "default_role_selection")]
    pub role_selection: Vec<String>,

    /// Subject prefix policy.
    #[serde(default)]
    pub prepend: SubjectPrefix,

    /// Whether senders receive a copy by default.
    #[serde(default)]
    pub receipt: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            role_selection: default_role_selection(),
            prepend: SubjectPrefix::default(),
            receipt: false,
        }
    }
}

impl DefaultsConfig {
    /// The defaults as a course config.
    pub fn course_config(&self) -> CourseConfig {
        CourseConfig {
            role_selection: self.role_selection.clone(),
            prepend: self.prepend,
            receipt: self.receipt,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Directory for JSON log files. Console only when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Filter used when `RUST_LOG` is not set.
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            level: default_level(),
        }
    }
}

// Default value functions for serde

fn default_database() -> PathBuf {
    PathBuf::from("coursemail.db")
}
fn default_files_dir() -> PathBuf {
    PathBuf::from("files")
}
fn default_temp_dir() -> PathBuf {
    PathBuf::from("tmp")
}
fn default_role_selection() -> Vec<String> {
    vec![
        "editingteacher".to_owned(),
        "teacher".to_owned(),
        "student".to_owned(),
    ]
}
fn default_level() -> String {
    "info".to_owned()
}

/// Load the site config from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let config: AppConfig = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    Ok(config)
}

/// Load the site config, or the built-in defaults when `path` does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config_or_default(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        load_config(path)
    } else {
        debug!(path = %path.display(), "no config file, using defaults");
        Ok(AppConfig::default())
    }
}

/// Resolve the default config directory (`~/.coursemail/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".coursemail"))
}

/// A course's stored mail settings, or `defaults` when none were saved.
///
/// # Errors
///
/// Returns [`StoreError`] if the lookup fails.
pub async fn load_course_config(
    store: &dyn RecordStore,
    course_id: CourseId,
    defaults: &CourseConfig,
) -> Result<CourseConfig, StoreError> {
    match store.course_config(course_id).await? {
        Some(config) => Ok(config),
        None => {
            debug!(course_id, "course has no mail settings, using site defaults");
            Ok(defaults.clone())
        }
    }
}
