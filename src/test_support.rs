//! Shared fixtures and in-process stand-ins for the remote service and the
//! byte transfer.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::download::error::DownloadError;
use crate::download::file::{Fetcher, TransferProgress};
use crate::flickr::{Page, PhotoMetadata, PhotoSource, Rendition, SourceError};
use crate::request::Request;
use crate::state::PhotoRecord;

pub fn taken() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2016, 3, 2)
        .unwrap()
        .and_hms_opt(11, 22, 59)
        .unwrap()
}

pub fn sample_record(photo_id: u64) -> PhotoRecord {
    PhotoRecord {
        photo_id,
        url: format!("https://live.example/{photo_id}_o.jpg"),
        model: "iPhone 6".into(),
        hash: String::new(),
        date_taken: taken(),
        date_posted: Utc.timestamp_opt(1_457_000_000, 0).unwrap(),
        date_lastupdate: Utc.timestamp_opt(1_457_100_000, 0).unwrap(),
        width: 4032,
        height: 3024,
    }
}

pub fn rendition(width: u32, height: u32, url: &str) -> Rendition {
    Rendition {
        width,
        height,
        url: url.to_string(),
    }
}

pub fn sample_metadata(model: Option<&str>, url: &str) -> PhotoMetadata {
    PhotoMetadata {
        date_posted: Utc.timestamp_opt(1_457_000_000, 0).unwrap(),
        date_lastupdate: Utc.timestamp_opt(1_457_100_000, 0).unwrap(),
        date_taken: taken(),
        exif_model: model.map(str::to_string),
        sizes: vec![
            rendition(75, 75, "https://live.example/sq.jpg"),
            rendition(4032, 3024, url),
            rendition(1024, 768, "https://live.example/b.jpg"),
        ],
    }
}

/// In-memory photo source with a fixed listing and per-id metadata.
#[derive(Default)]
pub struct StubSource {
    listing: Mutex<Vec<u64>>,
    per_page: Mutex<usize>,
    title: Mutex<Option<String>>,
    metadata: Mutex<HashMap<u64, PhotoMetadata>>,
    metadata_calls: Mutex<HashMap<u64, usize>>,
    page_calls: AtomicUsize,
    delay: Mutex<Duration>,
    failures_left: AtomicUsize,
    in_progress: AtomicUsize,
    max_in_progress: AtomicUsize,
}

impl StubSource {
    pub fn new() -> Self {
        let source = Self::default();
        *source.per_page.lock().unwrap() = 500;
        source
    }

    pub fn add_photo(&self, photo_id: u64, metadata: PhotoMetadata) {
        self.metadata.lock().unwrap().insert(photo_id, metadata);
    }

    /// Ids returned by `list_page`, in order, split into pages.
    pub fn set_listing(&self, ids: Vec<u64>, per_page: usize) {
        *self.listing.lock().unwrap() = ids;
        *self.per_page.lock().unwrap() = per_page;
    }

    pub fn set_title(&self, title: &str) {
        *self.title.lock().unwrap() = Some(title.to_string());
    }

    pub fn set_metadata_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn metadata_calls(&self, photo_id: u64) -> usize {
        self.metadata_calls
            .lock()
            .unwrap()
            .get(&photo_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    /// Make the next `n` metadata calls fail after the usual delay.
    pub fn fail_next_metadata(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Highest number of metadata calls seen running at the same time.
    pub fn max_concurrent_metadata(&self) -> usize {
        self.max_in_progress.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PhotoSource for StubSource {
    async fn list_page(&self, _request: &Request, page: u32) -> Result<Page, SourceError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        let listing = self.listing.lock().unwrap().clone();
        let per_page = *self.per_page.lock().unwrap();
        let page_count = listing.len().div_ceil(per_page) as u32;
        let start = (page.saturating_sub(1) as usize) * per_page;
        let items = listing.iter().skip(start).take(per_page).copied().collect();
        Ok(Page {
            total: listing.len() as u64,
            page_count,
            title: self.title.lock().unwrap().clone(),
            items,
        })
    }

    async fn get_metadata(&self, photo_id: u64) -> Result<PhotoMetadata, SourceError> {
        *self
            .metadata_calls
            .lock()
            .unwrap()
            .entry(photo_id)
            .or_default() += 1;
        let running = self.in_progress.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_progress.fetch_max(running, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_progress.fetch_sub(1, Ordering::SeqCst);

        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(SourceError::Api {
                method: "flickr.photos.getInfo".into(),
                code: 105,
                message: "Service currently unavailable".into(),
            });
        }
        self.metadata
            .lock()
            .unwrap()
            .get(&photo_id)
            .cloned()
            .ok_or(SourceError::Api {
                method: "flickr.photos.getInfo".into(),
                code: 1,
                message: "Photo not found".into(),
            })
    }
}

/// Fetcher serving canned bodies by URL.
#[derive(Default)]
pub struct StubFetcher {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, body: &[u8]) {
        self.bodies
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_vec());
    }

    /// Make transfers of `url` break off after writing a partial body.
    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        progress: &dyn TransferProgress,
    ) -> Result<u64, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let body = self
            .bodies
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| DownloadError::HttpStatus {
                status: 404,
                url: url.to_string(),
            })?;

        progress.start(Some(body.len() as u64));
        if self.failing.lock().unwrap().contains(url) {
            std::fs::write(dest, &body[..body.len() / 2])?;
            return Err(DownloadError::HttpStatus {
                status: 503,
                url: url.to_string(),
            });
        }
        std::fs::write(dest, &body)?;
        progress.advance(body.len() as u64);
        progress.finish();
        Ok(body.len() as u64)
    }
}
