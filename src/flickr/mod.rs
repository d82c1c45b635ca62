//! Remote photo source.
//!
//! [`PhotoSource`] is the narrow interface the scan engine consumes: paged
//! listing of photo ids for a request, and per-photo metadata. The concrete
//! implementation is [`FlickrClient`], which talks to the public Flickr REST
//! API with an API key.

pub mod client;
pub mod error;
pub mod responses;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::request::Request;

pub use client::FlickrClient;
pub use error::SourceError;

/// One page of photo ids as returned by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    /// Total matches across all pages.
    pub total: u64,
    pub page_count: u32,
    /// Album title, present for album listings.
    pub title: Option<String>,
    pub items: Vec<u64>,
}

/// One available size variant of a photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendition {
    pub width: u32,
    pub height: u32,
    pub url: String,
}

impl Rendition {
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Remote attributes of a single photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoMetadata {
    pub date_posted: DateTime<Utc>,
    pub date_lastupdate: DateTime<Utc>,
    pub date_taken: NaiveDateTime,
    /// EXIF `Model` tag, if exposed.
    pub exif_model: Option<String>,
    /// Raster renditions in the order the service lists them.
    pub sizes: Vec<Rendition>,
}

#[async_trait]
pub trait PhotoSource: Send + Sync {
    /// Fetch one page (1-based) of photo ids matching the request.
    async fn list_page(&self, request: &Request, page: u32) -> Result<Page, SourceError>;

    async fn get_metadata(&self, photo_id: u64) -> Result<PhotoMetadata, SourceError>;
}
