use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cli::{Cli, Command};
use crate::request::{DateWindow, Request, RequestError, RequestKind};
use crate::retry::RetryConfig;
use crate::types::FailurePolicy;

pub const DEFAULT_DOWNLOAD_DIR: &str = "flickr_photos";
pub const DEFAULT_NAMING_RULE: &str = "YYYY-MM-DD_hhmmss(camera)";
const DATABASE_FILE: &str = "photos.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    #[error("{0} is required (pass it on the command line or set it in the config file)")]
    Missing(&'static str),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Persisted defaults, read from and written back to the TOML config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub api_key: Option<String>,
    pub user: Option<String>,
    pub download_dir: Option<String>,
    pub naming_rule: Option<String>,
    pub subdir_rule: Option<String>,
}

impl FileConfig {
    /// Load the config file; a missing file yields empty defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Effective settings after merging the command line over the config file.
pub struct Config {
    pub api_key: Option<String>,
    pub user: Option<String>,
    pub download_dir: PathBuf,
    /// Download directory exactly as given, for writing back.
    download_dir_raw: String,
    pub naming_rule: String,
    pub subdir_rule: String,
    pub cache_dir: PathBuf,
    pub config_path: PathBuf,

    pub sync_interval: Duration,
    pub retry: RetryConfig,

    pub on_transfer_failure: FailurePolicy,

    pub yes: bool,
    pub no_progress_bar: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("user", &self.user)
            .field("download_dir", &self.download_dir)
            .field("naming_rule", &self.naming_rule)
            .field("subdir_rule", &self.subdir_rule)
            .field("cache_dir", &self.cache_dir)
            .finish_non_exhaustive()
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    /// Merge: command line, then config file, then built-in defaults.
    pub fn resolve(cli: &Cli, file: FileConfig) -> Result<Self, ConfigError> {
        let download_dir_raw = cli
            .download_dir
            .clone()
            .or(file.download_dir)
            .unwrap_or_else(|| DEFAULT_DOWNLOAD_DIR.to_string());
        let naming_rule = cli
            .naming_rule
            .clone()
            .or(file.naming_rule)
            .unwrap_or_else(|| DEFAULT_NAMING_RULE.to_string());
        if naming_rule.trim().is_empty() {
            return Err(ConfigError::Invalid("naming rule must not be empty".into()));
        }
        let subdir_rule = cli.subdir_rule.clone().or(file.subdir_rule).unwrap_or_default();

        Ok(Self {
            api_key: cli.api_key.clone().or(file.api_key).filter(|k| !k.is_empty()),
            user: cli.user.clone().or(file.user).filter(|u| !u.is_empty()),
            download_dir: expand_tilde(&download_dir_raw),
            download_dir_raw,
            naming_rule,
            subdir_rule,
            cache_dir: expand_tilde(&cli.cache_dir),
            config_path: expand_tilde(&cli.config),
            sync_interval: Duration::from_secs(cli.sync_interval),
            retry: RetryConfig {
                max_retries: cli.max_retries,
                base_delay: Duration::from_secs(cli.retry_delay),
                ..RetryConfig::default()
            },
            on_transfer_failure: cli.on_transfer_failure,
            yes: cli.yes,
            no_progress_bar: cli.no_progress_bar,
        })
    }

    /// Values to persist so they need not be repeated next time.
    pub fn to_file_config(&self) -> FileConfig {
        FileConfig {
            api_key: self.api_key.clone(),
            user: self.user.clone(),
            download_dir: Some(self.download_dir_raw.clone()),
            naming_rule: Some(self.naming_rule.clone()),
            subdir_rule: Some(self.subdir_rule.clone()),
        }
    }

    /// API key and user, both required to talk to the service.
    pub fn credentials(&self) -> Result<(&str, &str), ConfigError> {
        let api_key = self.api_key.as_deref().ok_or(ConfigError::Missing("--api-key"))?;
        let user = self.user.as_deref().ok_or(ConfigError::Missing("--user"))?;
        Ok((api_key, user))
    }

    pub fn database_path(&self) -> PathBuf {
        self.cache_dir.join(DATABASE_FILE)
    }

    /// Build the request for a download command; `None` for the others.
    pub fn request(&self, command: &Command) -> Result<Option<Request>, ConfigError> {
        let kind = match command {
            Command::All => RequestKind::All,
            Command::Sync => RequestKind::Sync,
            Command::Album { album_id } => RequestKind::album(album_id)?,
            Command::Taken { start, end } => {
                RequestKind::Taken(DateWindow::parse(start, end.as_deref())?)
            }
            Command::Posted { start, end } => {
                RequestKind::Posted(DateWindow::parse(start, end.as_deref())?)
            }
            Command::Status | Command::DeleteCache => return Ok(None),
        };
        Ok(Some(Request {
            kind,
            naming_rule: self.naming_rule.clone(),
            subdir_rule: self.subdir_rule.clone(),
            root: self.download_dir.clone(),
            run_count: 1,
            on_transfer_failure: self.on_transfer_failure,
        }))
    }
}
