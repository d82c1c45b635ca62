use std::path::PathBuf;

use thiserror::Error;

use crate::flickr::SourceError;
use crate::state::StateError;

/// Typed transfer errors enabling retry classification.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP error {status} downloading {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Disk error: {0}")]
    Disk(#[from] std::io::Error),

    #[error("HTTP error downloading {url} (bytes_so_far={bytes_written}): {source}")]
    Http {
        source: reqwest::Error,
        url: String,
        bytes_written: u64,
    },

    #[error("Transfer of {url} failed after {retries} retries: {last_error}")]
    RetriesExhausted {
        retries: u32,
        url: String,
        last_error: String,
    },
}

impl DownloadError {
    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            DownloadError::Http { .. } => true,
            DownloadError::Disk(_) => false,
            DownloadError::RetriesExhausted { .. } => false,
        }
    }
}

/// Failure of a sync operation, as surfaced to the scan driver.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Bad templates, unusable paths, or collision numbering exhausted.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transfer failed for photo {photo_id}: {source}")]
    TransferFailed {
        photo_id: u64,
        #[source]
        source: DownloadError,
    },

    #[error("Metadata unavailable for photo {photo_id}: {source}")]
    MetadataUnavailable {
        photo_id: u64,
        #[source]
        source: SourceError,
    },

    #[error("Photo source unavailable: {0}")]
    SourceUnavailable(#[source] SourceError),

    #[error(transparent)]
    Store(#[from] StateError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the scan must stop regardless of the transfer-failure policy.
    ///
    /// Only a single photo's transfer failure is eligible for skipping.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SyncError::TransferFailed { .. })
    }
}
