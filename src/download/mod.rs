//! Download pipeline: metadata resolution, collision classification,
//! staged transfer, hashing and duplicate reconciliation for one photo.

pub mod collision;
pub mod error;
pub mod file;
pub mod paths;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};

use crate::metadata::MetadataCache;
use crate::state::PhotoRecord;
use collision::Decision;
use error::SyncError;
use file::{Fetcher, StagingFile};
use paths::Layout;

/// Result of processing one photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoOutcome {
    /// A file with the recorded hash already exists.
    Skipped { path: PathBuf },
    /// The photo was downloaded and kept.
    Downloaded { path: PathBuf, bytes: u64 },
    /// The photo was downloaded, found identical to an existing file, and
    /// the new copy was removed.
    DuplicateDiscarded { duplicate_of: PathBuf },
}

impl PhotoOutcome {
    /// Whether the photo's bytes were already on disk before this call.
    pub fn was_already_present(&self) -> bool {
        matches!(
            self,
            PhotoOutcome::Skipped { .. } | PhotoOutcome::DuplicateDiscarded { .. }
        )
    }
}

/// Per-photo download orchestration, shared across scan runs.
pub struct Pipeline {
    cache: Arc<MetadataCache>,
    fetcher: Arc<dyn Fetcher>,
    no_progress_bar: bool,
}

impl Pipeline {
    pub fn new(cache: Arc<MetadataCache>, fetcher: Arc<dyn Fetcher>, no_progress_bar: bool) -> Self {
        Self {
            cache,
            fetcher,
            no_progress_bar,
        }
    }

    /// Bring one photo onto disk under `layout`, or confirm it already is.
    pub async fn process(&self, photo_id: u64, layout: &Layout) -> Result<PhotoOutcome, SyncError> {
        let record = self.cache.resolve(photo_id).await?;
        let name = layout.resolve(&record);

        match collision::classify(&name, &record.hash).await? {
            Decision::Skip { path } => {
                tracing::info!("Skipping {} (already downloaded)", path.display());
                Ok(PhotoOutcome::Skipped { path })
            }
            Decision::Fetch { path } => {
                let (bytes, _hash) = self.download(&record, &path).await?;
                Ok(PhotoOutcome::Downloaded { path, bytes })
            }
            Decision::FetchAndReconcile { path, alternates } => {
                let (bytes, hash) = self.download(&record, &path).await?;
                for alternate in alternates {
                    let existing = file::file_checksum(&alternate)
                        .await
                        .map_err(|e| SyncError::io(&alternate, e))?;
                    if existing == hash {
                        tokio::fs::remove_file(&path)
                            .await
                            .map_err(|e| SyncError::io(&path, e))?;
                        tracing::info!(
                            "Removed {}: same content as {}",
                            path.display(),
                            alternate.display()
                        );
                        return Ok(PhotoOutcome::DuplicateDiscarded {
                            duplicate_of: alternate,
                        });
                    }
                }
                Ok(PhotoOutcome::Downloaded { path, bytes })
            }
        }
    }

    /// Stage, commit, timestamp and hash one transfer. Returns the byte count
    /// and content hash of the committed file.
    async fn download(&self, record: &PhotoRecord, path: &Path) -> Result<(u64, String), SyncError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::io(parent, e))?;
        }

        tracing::info!("Downloading {} -> {}", record.url, path.display());

        let staging = StagingFile::new(path);
        let pb = create_progress_bar(self.no_progress_bar, path);
        let bytes = self
            .fetcher
            .fetch(&record.url, staging.path(), &pb)
            .await
            .map_err(|source| {
                pb.finish_and_clear();
                SyncError::TransferFailed {
                    photo_id: record.photo_id,
                    source,
                }
            })?;

        let path = staging
            .commit()
            .await
            .map_err(|e| SyncError::io(path, e))?;

        if let Err(e) = file::set_file_times(&path, record.date_taken).await {
            tracing::warn!("Could not set mtime on {}: {}", path.display(), e);
        }

        let hash = file::file_checksum(&path)
            .await
            .map_err(|e| SyncError::io(&path, e))?;
        if !self.cache.store().set_hash(record.photo_id, &hash).await?
            && record.has_hash()
            && record.hash != hash
        {
            tracing::warn!(
                photo_id = record.photo_id,
                "Downloaded content differs from the recorded hash; keeping the recorded one"
            );
        }

        tracing::debug!(bytes, "Downloaded {}", path.display());
        Ok((bytes, hash))
    }
}

/// Create a byte-level progress bar for one transfer.
///
/// Hidden when `--no-progress-bar` was passed or stdout is not a TTY.
fn create_progress_bar(no_progress_bar: bool, path: &Path) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::with_template(
        "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
    ) {
        pb.set_style(style.progress_chars("=> "));
    }
    if let Some(name) = path.file_name() {
        pb.set_message(name.to_string_lossy().into_owned());
    }
    pb
}
