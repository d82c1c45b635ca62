//! Scan driver: pages through the source for one request, feeds every photo
//! through the download pipeline in source order, and stops a sync early
//! once it runs into a long stretch of photos that are already on disk.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::download::error::SyncError;
use crate::download::paths::{album_subdir_rule, Layout};
use crate::download::{PhotoOutcome, Pipeline};
use crate::flickr::PhotoSource;
use crate::request::{Request, RequestKind};
use crate::types::FailurePolicy;

/// Consecutive already-present photos after which a sync is caught up.
pub const WINDOW_CAPACITY: usize = 100;

/// Fixed-capacity record of the most recent "already present" flags.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    flags: VecDeque<bool>,
    capacity: usize,
    present: usize,
}

impl SlidingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            flags: VecDeque::with_capacity(capacity),
            capacity,
            present: 0,
        }
    }

    pub fn push(&mut self, already_present: bool) {
        if self.flags.len() == self.capacity {
            if let Some(true) = self.flags.pop_front() {
                self.present -= 1;
            }
        }
        self.flags.push_back(already_present);
        if already_present {
            self.present += 1;
        }
    }

    /// Full, and every entry is "already present".
    pub fn is_saturated(&self) -> bool {
        self.capacity > 0 && self.present == self.capacity
    }
}

/// How a single scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The request matched nothing.
    NoMatches,
    /// The confirmation hook said no.
    Declined,
    /// Every page was processed.
    Completed,
    /// A sync met a full window of already-present photos.
    CaughtUp,
    /// Interrupted between photos.
    Aborted,
}

impl ScanOutcome {
    /// Process exit status for this outcome, so scripts can tell an empty
    /// result or a refusal apart from a finished scan.
    pub fn exit_code(self) -> i32 {
        match self {
            ScanOutcome::Completed | ScanOutcome::CaughtUp => 0,
            ScanOutcome::NoMatches => 3,
            ScanOutcome::Declined => 4,
            ScanOutcome::Aborted => 130,
        }
    }
}

/// Counters for one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub downloaded: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub failed: usize,
}

impl ScanReport {
    fn record(&mut self, outcome: &PhotoOutcome) {
        match outcome {
            PhotoOutcome::Downloaded { .. } => self.downloaded += 1,
            PhotoOutcome::Skipped { .. } => self.skipped += 1,
            PhotoOutcome::DuplicateDiscarded { .. } => self.duplicates += 1,
        }
    }

    fn log(&self, outcome: ScanOutcome, elapsed: Duration) {
        tracing::info!(
            "── Summary ({:?}) ──\n  {} downloaded, {} skipped, {} duplicates removed, {} failed\n  Elapsed: {}",
            outcome,
            self.downloaded,
            self.skipped,
            self.duplicates,
            self.failed,
            format_duration(elapsed)
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanResult {
    pub outcome: ScanOutcome,
    pub report: ScanReport,
}

impl ScanResult {
    fn bare(outcome: ScanOutcome) -> Self {
        Self {
            outcome,
            report: ScanReport::default(),
        }
    }
}

/// Asked once per process, before the first photo is processed.
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, total: u64, label: &str) -> bool;
}

/// Always says yes (`-y`).
pub struct AutoConfirm;

#[async_trait]
impl Confirm for AutoConfirm {
    async fn confirm(&self, _total: u64, _label: &str) -> bool {
        true
    }
}

/// Interactive `[y/N]` prompt on stdin.
pub struct StdinConfirm;

#[async_trait]
impl Confirm for StdinConfirm {
    async fn confirm(&self, _total: u64, label: &str) -> bool {
        let prompt = format!("Download {}? [y/N] ", label);
        let answer = tokio::task::spawn_blocking(move || {
            print!("{}", prompt);
            io::stdout().flush()?;
            let mut line = String::new();
            io::stdin().read_line(&mut line)?;
            Ok::<String, io::Error>(line.trim().to_ascii_lowercase())
        })
        .await;

        match answer {
            Ok(Ok(answer)) => matches!(answer.as_str(), "y" | "yes"),
            Ok(Err(e)) => {
                tracing::error!("Could not read confirmation: {}", e);
                false
            }
            Err(e) => {
                tracing::error!("Confirmation prompt failed: {}", e);
                false
            }
        }
    }
}

pub struct ScanDriver {
    source: Arc<dyn PhotoSource>,
    pipeline: Pipeline,
    confirm: Box<dyn Confirm>,
    cancel: CancellationToken,
}

impl ScanDriver {
    pub fn new(
        source: Arc<dyn PhotoSource>,
        pipeline: Pipeline,
        confirm: Box<dyn Confirm>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            pipeline,
            confirm,
            cancel,
        }
    }

    /// Run one full scan of `request`.
    ///
    /// Fatal errors propagate. A transfer failure propagates under
    /// [`FailurePolicy::Abort`] and is counted and passed over under
    /// [`FailurePolicy::Skip`].
    pub async fn run_once(&self, request: &Request) -> Result<ScanResult, SyncError> {
        let started = Instant::now();
        let mut report = ScanReport::default();
        let mut window = SlidingWindow::new(WINDOW_CAPACITY);
        let mut layout = Layout {
            root: request.root.clone(),
            subdir_rule: request.subdir_rule.clone(),
            naming_rule: request.naming_rule.clone(),
        };
        let mut page_number: u32 = 1;

        let outcome = 'pages: loop {
            if self.cancel.is_cancelled() {
                break ScanOutcome::Aborted;
            }

            let page = self
                .source
                .list_page(request, page_number)
                .await
                .map_err(SyncError::SourceUnavailable)?;
            tracing::debug!(
                page = page_number,
                page_count = page.page_count,
                items = page.items.len(),
                "listed page"
            );

            if page_number == 1 {
                if page.total == 0 {
                    tracing::info!("No photos matched");
                    return Ok(ScanResult::bare(ScanOutcome::NoMatches));
                }
                if let (RequestKind::Album { .. }, Some(title)) = (&request.kind, &page.title) {
                    layout.subdir_rule = album_subdir_rule(title, &request.subdir_rule);
                }
                if request.is_first_run() {
                    let label = request.describe(page.total, page.title.as_deref());
                    tracing::info!("Target: {}", label);
                    tracing::info!("Destination: {}", layout.root.display());
                    tracing::info!("Subdirectory rule: {:?}", layout.subdir_rule);
                    tracing::info!("Naming rule: {:?}", layout.naming_rule);
                    if !self.confirm.confirm(page.total, &label).await {
                        return Ok(ScanResult::bare(ScanOutcome::Declined));
                    }
                }
            }

            for photo_id in page.items {
                if self.cancel.is_cancelled() {
                    break 'pages ScanOutcome::Aborted;
                }

                match self.pipeline.process(photo_id, &layout).await {
                    Ok(outcome) => {
                        report.record(&outcome);
                        window.push(outcome.was_already_present());
                    }
                    Err(e)
                        if !e.is_fatal()
                            && request.on_transfer_failure == FailurePolicy::Skip =>
                    {
                        tracing::error!("{}; continuing", e);
                        report.failed += 1;
                        window.push(false);
                    }
                    Err(e) => {
                        report.log(ScanOutcome::Aborted, started.elapsed());
                        return Err(e);
                    }
                }

                if request.kind.is_sync() && window.is_saturated() {
                    tracing::info!(
                        "{} photos in a row already downloaded; sync is caught up",
                        WINDOW_CAPACITY
                    );
                    break 'pages ScanOutcome::CaughtUp;
                }
            }

            if page_number >= page.page_count {
                break ScanOutcome::Completed;
            }
            page_number += 1;
        };

        if outcome == ScanOutcome::Aborted {
            tracing::warn!("Scan interrupted; a .part file may remain for the photo in flight");
        }
        report.log(outcome, started.elapsed());
        Ok(ScanResult { outcome, report })
    }
}

fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::metadata::MetadataCache;
    use crate::state::SqlitePhotoStore;
    use crate::test_support::{sample_metadata, StubFetcher, StubSource};

    struct FixedConfirm {
        answer: bool,
        asked: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Confirm for FixedConfirm {
        async fn confirm(&self, _total: u64, _label: &str) -> bool {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    struct Harness {
        source: Arc<StubSource>,
        fetcher: Arc<StubFetcher>,
        driver: ScanDriver,
        asked: Arc<AtomicUsize>,
        cancel: CancellationToken,
        dir: tempfile::TempDir,
    }

    fn harness(answer: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(StubSource::new());
        let fetcher = Arc::new(StubFetcher::new());
        let store = Arc::new(SqlitePhotoStore::open_in_memory().unwrap());
        let cache = Arc::new(MetadataCache::new(source.clone(), store));
        let pipeline = Pipeline::new(cache, fetcher.clone(), true);
        let asked = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let driver = ScanDriver::new(
            source.clone(),
            pipeline,
            Box::new(FixedConfirm {
                answer,
                asked: asked.clone(),
            }),
            cancel.clone(),
        );
        Harness {
            source,
            fetcher,
            driver,
            asked,
            cancel,
            dir,
        }
    }

    fn add_photos(h: &Harness, ids: impl IntoIterator<Item = u64>) {
        for id in ids {
            let url = format!("https://live.example/{id}_o.jpg");
            h.source.add_photo(id, sample_metadata(Some("iPhone 6"), &url));
            h.fetcher.serve(&url, format!("bytes of {id}").as_bytes());
        }
    }

    fn request(h: &Harness, kind: RequestKind, naming_rule: &str) -> Request {
        Request {
            kind,
            naming_rule: naming_rule.into(),
            subdir_rule: String::new(),
            root: h.dir.path().to_path_buf(),
            run_count: 1,
            on_transfer_failure: FailurePolicy::Abort,
        }
    }

    fn files_under(dir: &Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                out.extend(files_under(&path));
            } else {
                out.push(path);
            }
        }
        out.sort();
        out
    }

    #[test]
    fn test_window_saturates_only_when_full_of_present() {
        let mut w = SlidingWindow::new(3);
        w.push(true);
        w.push(true);
        assert!(!w.is_saturated());
        w.push(true);
        assert!(w.is_saturated());
        w.push(false);
        assert!(!w.is_saturated());
        w.push(true);
        w.push(true);
        assert!(!w.is_saturated());
        w.push(true);
        assert!(w.is_saturated());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ScanOutcome::Completed.exit_code(), 0);
        assert_eq!(ScanOutcome::CaughtUp.exit_code(), 0);
        assert_eq!(ScanOutcome::NoMatches.exit_code(), 3);
        assert_eq!(ScanOutcome::Declined.exit_code(), 4);
        assert_eq!(ScanOutcome::Aborted.exit_code(), 130);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 05s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 02m 05s");
    }

    #[tokio::test]
    async fn test_no_matches() {
        let h = harness(true);
        let result = h
            .driver
            .run_once(&request(&h, RequestKind::All, "photo_id"))
            .await
            .unwrap();
        assert_eq!(result.outcome, ScanOutcome::NoMatches);
        assert_eq!(h.asked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_declined_downloads_nothing() {
        let h = harness(false);
        add_photos(&h, [1, 2]);
        h.source.set_listing(vec![1, 2], 500);

        let result = h
            .driver
            .run_once(&request(&h, RequestKind::All, "photo_id"))
            .await
            .unwrap();

        assert_eq!(result.outcome, ScanOutcome::Declined);
        assert_eq!(h.fetcher.calls(), 0);
        assert_eq!(h.asked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_later_runs_are_not_confirmed() {
        let h = harness(false);
        add_photos(&h, [1]);
        h.source.set_listing(vec![1], 500);
        let mut req = request(&h, RequestKind::Sync, "photo_id");
        req.run_count = 2;

        let result = h.driver.run_once(&req).await.unwrap();

        assert_eq!(result.outcome, ScanOutcome::Completed);
        assert_eq!(h.asked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_completed_across_pages_and_idempotent() {
        let h = harness(true);
        add_photos(&h, 1..=7);
        h.source.set_listing((1..=7).collect(), 3);
        let req = request(&h, RequestKind::All, "photo_id");

        let first = h.driver.run_once(&req).await.unwrap();
        assert_eq!(first.outcome, ScanOutcome::Completed);
        assert_eq!(first.report.downloaded, 7);
        assert_eq!(h.source.page_calls(), 3);

        let second = h.driver.run_once(&req).await.unwrap();
        assert_eq!(second.outcome, ScanOutcome::Completed);
        assert_eq!(second.report.downloaded, 0);
        assert_eq!(second.report.skipped, 7);
        assert_eq!(h.fetcher.calls(), 7);
        assert_eq!(files_under(h.dir.path()).len(), 7);
    }

    #[tokio::test]
    async fn test_sync_caught_up_after_full_window() {
        let h = harness(true);
        add_photos(&h, 1..=200);
        h.source.set_listing((1..=150).collect(), 500);
        h.driver
            .run_once(&request(&h, RequestKind::All, "photo_id"))
            .await
            .unwrap();
        assert_eq!(h.fetcher.calls(), 150);

        h.source.set_listing((1..=200).collect(), 40);
        let result = h
            .driver
            .run_once(&request(&h, RequestKind::Sync, "photo_id"))
            .await
            .unwrap();

        assert_eq!(result.outcome, ScanOutcome::CaughtUp);
        assert_eq!(result.report.skipped, WINDOW_CAPACITY);
        assert_eq!(h.fetcher.calls(), 150);
        assert_eq!(h.source.metadata_calls(151), 0);
    }

    #[tokio::test]
    async fn test_non_sync_ignores_window() {
        let h = harness(true);
        add_photos(&h, 1..=120);
        h.source.set_listing((1..=120).collect(), 500);
        let req = request(&h, RequestKind::All, "photo_id");
        h.driver.run_once(&req).await.unwrap();

        let result = h.driver.run_once(&req).await.unwrap();

        assert_eq!(result.outcome, ScanOutcome::Completed);
        assert_eq!(result.report.skipped, 120);
    }

    #[tokio::test]
    async fn test_album_one_new_one_present() {
        let h = harness(true);
        add_photos(&h, [1, 2]);
        h.source.set_title("Trip");
        let req = request(&h, RequestKind::album("12345").unwrap(), "photo_id");

        h.source.set_listing(vec![1], 500);
        h.driver.run_once(&req).await.unwrap();
        assert_eq!(files_under(h.dir.path()).len(), 1);

        h.source.set_listing(vec![1, 2], 500);
        let result = h.driver.run_once(&req).await.unwrap();

        assert_eq!(result.outcome, ScanOutcome::Completed);
        assert_eq!(result.report.downloaded, 1);
        assert_eq!(result.report.skipped, 1);
        assert_eq!(
            files_under(h.dir.path()),
            vec![
                h.dir.path().join("Trip").join("1.jpg"),
                h.dir.path().join("Trip").join("2.jpg"),
            ]
        );
    }

    #[tokio::test]
    async fn test_transfer_failure_aborts_by_default() {
        let h = harness(true);
        add_photos(&h, [1, 2]);
        h.fetcher.fail("https://live.example/1_o.jpg");
        h.source.set_listing(vec![1, 2], 500);

        let err = h
            .driver
            .run_once(&request(&h, RequestKind::All, "photo_id"))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::TransferFailed { photo_id: 1, .. }));
        assert_eq!(h.source.metadata_calls(2), 0);
    }

    #[tokio::test]
    async fn test_transfer_failure_skipped_under_skip_policy() {
        let h = harness(true);
        add_photos(&h, [1, 2]);
        h.fetcher.fail("https://live.example/1_o.jpg");
        h.source.set_listing(vec![1, 2], 500);
        let mut req = request(&h, RequestKind::All, "photo_id");
        req.on_transfer_failure = FailurePolicy::Skip;

        let result = h.driver.run_once(&req).await.unwrap();

        assert_eq!(result.outcome, ScanOutcome::Completed);
        assert_eq!(result.report.failed, 1);
        assert_eq!(result.report.downloaded, 1);
        assert!(h.dir.path().join("2.jpg").exists());
    }

    #[tokio::test]
    async fn test_metadata_failure_is_fatal_even_when_skipping() {
        let h = harness(true);
        h.source.set_listing(vec![99], 500);
        let mut req = request(&h, RequestKind::All, "photo_id");
        req.on_transfer_failure = FailurePolicy::Skip;

        let err = h.driver.run_once(&req).await.unwrap_err();
        assert!(matches!(err, SyncError::MetadataUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_scan_is_aborted() {
        let h = harness(true);
        add_photos(&h, [1]);
        h.source.set_listing(vec![1], 500);
        h.cancel.cancel();

        let result = h
            .driver
            .run_once(&request(&h, RequestKind::All, "photo_id"))
            .await
            .unwrap();

        assert_eq!(result.outcome, ScanOutcome::Aborted);
        assert_eq!(h.fetcher.calls(), 0);
    }
}
