//! Types for the photo metadata store.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Camera model recorded when the EXIF `Model` tag is absent.
pub const UNKNOWN_MODEL: &str = "Unknown";

/// The persisted unit: resolved metadata for one remote photo.
///
/// Created at most once per `photo_id`. Everything except `hash` is frozen at
/// first resolution; `hash` moves from empty to non-empty exactly once, after
/// the first successful local download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRecord {
    pub photo_id: u64,
    /// URL of the largest rendition at first resolution.
    pub url: String,
    /// Camera model, or [`UNKNOWN_MODEL`].
    pub model: String,
    /// SHA-256 of the downloaded bytes (lowercase hex); empty until verified.
    pub hash: String,

    /// Capture time as reported by the service. Flickr reports it without a
    /// zone, so it is kept naive and interpreted as local time.
    pub date_taken: NaiveDateTime,
    pub date_posted: DateTime<Utc>,
    pub date_lastupdate: DateTime<Utc>,

    pub width: u32,
    pub height: u32,
}

impl PhotoRecord {
    /// Whether a content hash has been recorded for this photo.
    pub fn has_hash(&self) -> bool {
        !self.hash.is_empty()
    }
}

/// Summary of the current store contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreSummary {
    /// Number of photos with resolved metadata.
    pub total_photos: u64,
    /// Number of those with a verified local download.
    pub downloaded: u64,
}
