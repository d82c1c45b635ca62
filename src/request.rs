//! Validated parameters for one scan invocation.

use std::path::PathBuf;

use chrono::{Duration, Local, NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::types::FailurePolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Album id must be numeric, got {0:?}")]
    InvalidAlbumId(String),

    #[error("Dates must be in YYYYMMDD format, got {0:?}")]
    InvalidDate(String),

    #[error("End date {end} is before start date {start}")]
    InvertedWindow { start: NaiveDate, end: NaiveDate },
}

/// Inclusive range of calendar days, interpreted in local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// Parse `YYYYMMDD` bounds. A missing end means the single start day.
    pub fn parse(start: &str, end: Option<&str>) -> Result<Self, RequestError> {
        let start = parse_day(start)?;
        let end = end.map(parse_day).transpose()?.unwrap_or(start);
        if end < start {
            return Err(RequestError::InvertedWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Unix-second bounds `[start 00:00, end + 1 day 00:00)` in local time.
    pub fn bounds(&self) -> (i64, i64) {
        (
            local_midnight_timestamp(self.start),
            local_midnight_timestamp(self.end + Duration::days(1)),
        )
    }

    fn describe(&self) -> String {
        if self.start == self.end {
            format!("{}", self.start.format("%Y-%m-%d"))
        } else {
            format!(
                "{} .. {}",
                self.start.format("%Y-%m-%d"),
                self.end.format("%Y-%m-%d")
            )
        }
    }
}

fn parse_day(s: &str) -> Result<NaiveDate, RequestError> {
    if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RequestError::InvalidDate(s.to_string()));
    }
    NaiveDate::parse_from_str(s, "%Y%m%d").map_err(|_| RequestError::InvalidDate(s.to_string()))
}

fn local_midnight_timestamp(day: NaiveDate) -> i64 {
    let midnight: NaiveDateTime = day.and_time(chrono::NaiveTime::MIN);
    match midnight.and_local_timezone(Local).earliest() {
        Some(local) => local.timestamp(),
        None => midnight.and_utc().timestamp(),
    }
}

/// Which slice of the collection a request covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    All,
    Sync,
    Album { album_id: String },
    Taken(DateWindow),
    Posted(DateWindow),
}

impl RequestKind {
    pub fn album(album_id: &str) -> Result<Self, RequestError> {
        if album_id.is_empty() || !album_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(RequestError::InvalidAlbumId(album_id.to_string()));
        }
        Ok(RequestKind::Album {
            album_id: album_id.to_string(),
        })
    }

    pub fn is_sync(&self) -> bool {
        matches!(self, RequestKind::Sync)
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub kind: RequestKind,
    /// Filename template, e.g. `YYYY-MM-DD_hhmmss(camera)`.
    pub naming_rule: String,
    /// Subdirectory template, may be empty.
    pub subdir_rule: String,
    /// Destination root.
    pub root: PathBuf,
    /// 1 for the first scan in this process, incremented per sync iteration.
    pub run_count: u32,
    pub on_transfer_failure: FailurePolicy,
}

impl Request {
    pub fn is_first_run(&self) -> bool {
        self.run_count <= 1
    }

    /// Human-readable description of what the scan will fetch, shown next
    /// to the confirmation prompt.
    pub fn describe(&self, total: u64, title: Option<&str>) -> String {
        let count = group_thousands(total);
        match &self.kind {
            RequestKind::All => format!("all photos ({count})"),
            RequestKind::Sync => "new photos (sync)".to_string(),
            RequestKind::Album { album_id } => {
                format!("album [{}] ({count})", title.unwrap_or(album_id))
            }
            RequestKind::Taken(window) => {
                format!("photos taken {} ({count})", window.describe())
            }
            RequestKind::Posted(window) => {
                format!("photos posted {} ({count})", window.describe())
            }
        }
    }
}

/// Format an integer with `,` thousands separators.
fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
