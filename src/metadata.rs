//! Read-through cache of photo metadata in front of the remote source.
//!
//! Once a record exists in the store it is returned as-is forever; the
//! remote service is only consulted for ids never seen before. Concurrent
//! resolutions of the same id are serialized on a per-id lock so the store
//! never receives two independently resolved records for one photo.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::download::error::SyncError;
use crate::flickr::{PhotoMetadata, PhotoSource, Rendition, SourceError};
use crate::state::{PhotoRecord, PhotoStore, UNKNOWN_MODEL};

pub struct MetadataCache {
    source: Arc<dyn PhotoSource>,
    store: Arc<dyn PhotoStore>,
    in_flight: Mutex<HashMap<u64, Arc<tokio::sync::Mutex<()>>>>,
}

impl MetadataCache {
    pub fn new(source: Arc<dyn PhotoSource>, store: Arc<dyn PhotoStore>) -> Self {
        Self {
            source,
            store,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn PhotoStore> {
        &self.store
    }

    /// Return the stored record for `photo_id`, resolving it remotely first
    /// if it has never been seen.
    pub async fn resolve(&self, photo_id: u64) -> Result<PhotoRecord, SyncError> {
        if let Some(record) = self.store.get(photo_id).await? {
            return Ok(record);
        }

        let lock = self.lock_for(photo_id);
        let _guard = lock.lock().await;
        let result = self.resolve_locked(photo_id).await;
        self.release(photo_id, &lock);
        result
    }

    async fn resolve_locked(&self, photo_id: u64) -> Result<PhotoRecord, SyncError> {
        // Another caller may have finished while we waited for the lock.
        if let Some(record) = self.store.get(photo_id).await? {
            return Ok(record);
        }

        tracing::debug!(photo_id, "resolving metadata");
        let metadata = self
            .source
            .get_metadata(photo_id)
            .await
            .map_err(|source| SyncError::MetadataUnavailable { photo_id, source })?;
        let record = record_from_metadata(photo_id, metadata)?;

        if self.store.insert_new(&record).await? {
            return Ok(record);
        }
        match self.store.get(photo_id).await? {
            Some(stored) => Ok(stored),
            None => Ok(record),
        }
    }

    fn lock_for(&self, photo_id: u64) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.entry(photo_id).or_default().clone()
    }

    /// Drop the map entry once no other caller holds or waits on `lock`.
    ///
    /// Called with the guard still held. Waiters keep their own clone, so a
    /// count of two (map plus ours) means nobody else is queued and the next
    /// caller may start from a fresh lock.
    fn release(&self, photo_id: u64, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut map = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let idle = map
            .get(&photo_id)
            .is_some_and(|current| Arc::ptr_eq(current, lock) && Arc::strong_count(lock) == 2);
        if idle {
            map.remove(&photo_id);
        }
    }
}

/// Largest rendition by area; among equal areas the last one listed wins.
pub fn select_rendition(sizes: &[Rendition]) -> Option<&Rendition> {
    sizes.iter().max_by_key(|r| r.area())
}

fn record_from_metadata(photo_id: u64, metadata: PhotoMetadata) -> Result<PhotoRecord, SyncError> {
    let best = select_rendition(&metadata.sizes).ok_or_else(|| SyncError::MetadataUnavailable {
        photo_id,
        source: SourceError::malformed("flickr.photos.getSizes", "no image renditions"),
    })?;

    Ok(PhotoRecord {
        photo_id,
        url: best.url.clone(),
        model: metadata
            .exif_model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_MODEL.to_string()),
        hash: String::new(),
        date_taken: metadata.date_taken,
        date_posted: metadata.date_posted,
        date_lastupdate: metadata.date_lastupdate,
        width: best.width,
        height: best.height,
    })
}
