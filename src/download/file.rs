use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, TimeZone};
use futures_util::StreamExt;
use indicatif::ProgressBar;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::error::DownloadError;
use crate::retry::{self, RetryAction, RetryConfig};

/// Sink for byte-level transfer progress.
pub trait TransferProgress: Send + Sync {
    fn start(&self, total: Option<u64>);
    fn advance(&self, bytes: u64);
    fn finish(&self);
}

impl TransferProgress for ProgressBar {
    fn start(&self, total: Option<u64>) {
        self.reset();
        if let Some(total) = total {
            self.set_length(total);
        }
    }

    fn advance(&self, bytes: u64) {
        self.inc(bytes);
    }

    fn finish(&self) {
        self.finish_and_clear();
    }
}

/// Fetches the bytes behind a URL into a local file.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Write the body at `url` to `dest`, truncating any previous content.
    /// Returns the number of bytes written.
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        progress: &dyn TransferProgress,
    ) -> Result<u64, DownloadError>;
}

/// Streaming HTTP fetcher with retry on transient failures.
pub struct HttpFetcher {
    client: Client,
    retry: RetryConfig,
}

impl HttpFetcher {
    pub fn new(client: Client, retry: RetryConfig) -> Self {
        Self { client, retry }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        progress: &dyn TransferProgress,
    ) -> Result<u64, DownloadError> {
        let result = retry::retry_with_backoff(
            &self.retry,
            |e: &DownloadError| {
                if e.is_retryable() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            || attempt_download(&self.client, url, dest, progress),
        )
        .await;

        result.map_err(|e| {
            if e.is_retryable() && self.retry.max_retries > 0 {
                DownloadError::RetriesExhausted {
                    retries: self.retry.max_retries,
                    url: url.to_string(),
                    last_error: e.to_string(),
                }
            } else {
                e
            }
        })
    }
}

/// Single transfer attempt. Each attempt starts the file from scratch.
async fn attempt_download(
    client: &Client,
    url: &str,
    dest: &Path,
    progress: &dyn TransferProgress,
) -> Result<u64, DownloadError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| DownloadError::Http {
            source: e,
            url: url.to_string(),
            bytes_written: 0,
        })?;

    if !response.status().is_success() {
        return Err(DownloadError::HttpStatus {
            status: response.status().as_u16(),
            url: url.to_string(),
        });
    }

    progress.start(response.content_length());

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(dest)
        .await?;

    let mut bytes_written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| DownloadError::Http {
            source: e,
            url: url.to_string(),
            bytes_written,
        })?;
        file.write_all(&chunk).await?;
        bytes_written += chunk.len() as u64;
        progress.advance(chunk.len() as u64);
    }
    file.flush().await?;
    progress.finish();

    Ok(bytes_written)
}

/// A `<target>.part` file that becomes `target` on commit.
///
/// Dropping without commit leaves the `.part` file on disk; the next attempt
/// for the same target truncates it.
#[derive(Debug)]
pub struct StagingFile {
    part: PathBuf,
    target: PathBuf,
}

impl StagingFile {
    pub fn new(target: &Path) -> Self {
        let mut part = target.as_os_str().to_owned();
        part.push(".part");
        Self {
            part: PathBuf::from(part),
            target: target.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.part
    }

    /// Rename the staging file onto its target.
    pub async fn commit(self) -> io::Result<PathBuf> {
        fs::rename(&self.part, &self.target).await?;
        Ok(self.target)
    }
}

/// SHA-256 of a file's content as lowercase hex.
pub async fn file_checksum(path: &Path) -> io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;
        Ok(hex(&hasher.finalize()))
    })
    .await
    .map_err(io::Error::other)?
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{:02x}", b);
        s
    })
}

/// Set access and modification times to a local wall-clock instant.
pub async fn set_file_times(path: &Path, taken: NaiveDateTime) -> io::Result<()> {
    let timestamp = match Local.from_local_datetime(&taken).earliest() {
        Some(local) => local.timestamp(),
        None => taken.and_utc().timestamp(),
    };
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || set_file_mtime(&path, timestamp))
        .await
        .map_err(io::Error::other)?
}

/// Negative timestamps (dates before 1970) are handled via `checked_sub`.
fn set_file_mtime(path: &Path, timestamp: i64) -> io::Result<()> {
    let time = if timestamp >= 0 {
        UNIX_EPOCH + Duration::from_secs(timestamp as u64)
    } else {
        UNIX_EPOCH
            .checked_sub(Duration::from_secs(timestamp.unsigned_abs()))
            .unwrap_or(SystemTime::UNIX_EPOCH)
    };
    let times = std::fs::FileTimes::new()
        .set_modified(time)
        .set_accessed(time);
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_times(times)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    struct NoProgress;

    impl TransferProgress for NoProgress {
        fn start(&self, _total: Option<u64>) {}
        fn advance(&self, _bytes: u64) {}
        fn finish(&self) {}
    }

    /// Serve one canned HTTP response on a loopback port.
    async fn serve_once(response: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}/photo.jpg", addr)
    }

    #[tokio::test]
    async fn test_http_fetch_writes_body() {
        let url = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("photo.jpg.part");
        std::fs::write(&dest, b"stale leftover bytes").unwrap();

        let fetcher = HttpFetcher::new(Client::new(), RetryConfig::none());
        let n = fetcher.fetch(&url, &dest, &NoProgress).await.unwrap();

        assert_eq!(n, 5);
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_http_fetch_not_found_is_status_error() {
        let url = serve_once(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("x.part");

        let fetcher = HttpFetcher::new(Client::new(), RetryConfig::none());
        let err = fetcher.fetch(&url, &dest, &NoProgress).await.unwrap_err();
        assert!(matches!(err, DownloadError::HttpStatus { status: 404, .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_http_fetch_connection_refused() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = HttpFetcher::new(Client::new(), RetryConfig::none());
        let err = fetcher
            .fetch("http://127.0.0.1:1/x.jpg", &dir.path().join("x.part"), &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Http { .. }));
    }

    #[tokio::test]
    async fn test_staging_commit_renames() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.jpg");
        let staging = StagingFile::new(&target);
        assert_eq!(staging.path(), dir.path().join("a.jpg.part"));

        std::fs::write(staging.path(), b"data").unwrap();
        let committed = staging.commit().await.unwrap();

        assert_eq!(committed, target);
        assert_eq!(std::fs::read(&target).unwrap(), b"data");
        assert!(!dir.path().join("a.jpg.part").exists());
    }

    #[tokio::test]
    async fn test_file_checksum_sha256_hex() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            file_checksum(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_set_file_times_local() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jpg");
        std::fs::write(&path, b"x").unwrap();
        let taken = NaiveDate::from_ymd_opt(2016, 3, 2)
            .unwrap()
            .and_hms_opt(11, 22, 59)
            .unwrap();

        set_file_times(&path, taken).await.unwrap();

        let mtime = std::fs::metadata(&path).unwrap().modified().unwrap();
        let expected = Local
            .from_local_datetime(&taken)
            .earliest()
            .unwrap()
            .timestamp();
        let secs = mtime.duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
        assert_eq!(secs, expected);
    }

    #[test]
    fn test_set_file_mtime_pre_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.jpg");
        std::fs::write(&path, b"x").unwrap();
        set_file_mtime(&path, -86400).unwrap();
    }
}
