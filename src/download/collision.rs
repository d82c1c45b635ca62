use std::path::PathBuf;

use super::error::SyncError;
use super::file::file_checksum;
use super::paths::ResolvedName;

/// Upper bound on numbered candidates (`base`, `base-2`, … `base-99`).
pub const MAX_CANDIDATES: u32 = 99;

/// What to do with a photo given the files already on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Nothing conflicting exists; download straight to `path`.
    Fetch { path: PathBuf },
    /// Download to a fresh numbered `path`, then compare its hash against
    /// `alternates` and discard it on the first match.
    FetchAndReconcile {
        path: PathBuf,
        alternates: Vec<PathBuf>,
    },
    /// A file with the recorded content hash already exists at `path`.
    Skip { path: PathBuf },
}

/// Probe candidate paths in order and classify the photo.
///
/// Existing files are only hashed when `known_hash` is non-empty; without a
/// recorded hash there is nothing to compare against, so every occupied
/// candidate is passed over and collected as an alternate.
pub async fn classify(name: &ResolvedName, known_hash: &str) -> Result<Decision, SyncError> {
    let mut occupied = Vec::new();

    for n in 1..=MAX_CANDIDATES {
        let path = name.candidate(n);
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| SyncError::io(&path, e))?;

        if !exists {
            if n == 1 || !known_hash.is_empty() {
                return Ok(Decision::Fetch { path });
            }
            return Ok(Decision::FetchAndReconcile {
                path,
                alternates: occupied,
            });
        }

        if !known_hash.is_empty() {
            let hash = file_checksum(&path)
                .await
                .map_err(|e| SyncError::io(&path, e))?;
            if hash == known_hash {
                return Ok(Decision::Skip { path });
            }
        }

        tracing::debug!("{} is taken, trying next candidate", path.display());
        occupied.push(path);
    }

    Err(SyncError::Configuration(format!(
        "more than {} files named like {}",
        MAX_CANDIDATES,
        name.candidate(1).display()
    )))
}
