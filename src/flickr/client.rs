use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::{SourceError, PERMISSION_DENIED};
use super::responses::{
    ExifResponse, FindByUsernameResponse, InfoResponse, PageBody, PeopleInfoResponse,
    PhotosetListResponse, PhotosetPhotosResponse, SearchResponse, SizesResponse,
};
use super::{Page, PhotoMetadata, PhotoSource, Rendition};
use crate::request::{Request, RequestKind};
use crate::retry::{self, RetryAction, RetryConfig};

pub const DEFAULT_ENDPOINT: &str = "https://api.flickr.com/services/rest/";

/// Page size for listing calls; 500 is the API maximum.
const PER_PAGE: u32 = 500;

const TAKEN_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Account overview printed by the `status` command.
#[derive(Debug, Clone)]
pub struct AccountStatus {
    pub nsid: String,
    pub username: String,
    pub realname: String,
    pub profile_url: String,
    pub photo_count: u64,
    pub first_taken: String,
    pub first_upload: Option<DateTime<Utc>>,
    pub albums: Vec<AlbumSummary>,
}

#[derive(Debug, Clone)]
pub struct AlbumSummary {
    pub id: String,
    pub photos: u64,
    pub videos: u64,
    pub title: String,
}

/// Flickr REST client scoped to one user's photostream.
#[derive(Debug, Clone)]
pub struct FlickrClient {
    http: Client,
    endpoint: String,
    api_key: String,
    user_id: String,
    retry: RetryConfig,
}

impl FlickrClient {
    pub fn new(http: Client, api_key: String, user_id: String, retry: RetryConfig) -> Self {
        Self {
            http,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key,
            user_id,
            retry,
        }
    }

    #[cfg(test)]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Resolve the configured user to an NSID.
    ///
    /// NSIDs (`12345678@N00`) are used as-is; anything else is looked up as a
    /// username.
    pub async fn resolve_user(mut self) -> Result<Self, SourceError> {
        if self.user_id.contains('@') {
            return Ok(self);
        }
        let username = self.user_id.clone();
        let resp: FindByUsernameResponse = self
            .call("flickr.people.findByUsername", &[("username", username.clone())])
            .await
            .map_err(|e| match e {
                SourceError::Api { .. } => SourceError::UnknownUser(username.clone()),
                other => other,
            })?;
        tracing::debug!(username = %username, nsid = %resp.user.nsid, "Resolved Flickr user");
        self.user_id = resp.user.nsid;
        Ok(self)
    }

    pub async fn account_status(&self) -> Result<AccountStatus, SourceError> {
        let info: PeopleInfoResponse = self
            .call("flickr.people.getInfo", &[("user_id", self.user_id.clone())])
            .await?;
        let sets: PhotosetListResponse = self
            .call("flickr.photosets.getList", &[("user_id", self.user_id.clone())])
            .await?;

        let person = info.person;
        let first_upload = person
            .photos
            .firstdate
            .content
            .parse::<i64>()
            .ok()
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single());

        Ok(AccountStatus {
            nsid: person.nsid,
            username: person.username.content,
            realname: person.realname.content,
            profile_url: person.profileurl.content,
            photo_count: person.photos.count.content,
            first_taken: person.photos.firstdatetaken.content,
            first_upload,
            albums: sets
                .photosets
                .photoset
                .into_iter()
                .map(|s| AlbumSummary {
                    id: s.id,
                    photos: s.photos,
                    videos: s.videos,
                    title: s.title.content,
                })
                .collect(),
        })
    }

    /// Call a REST method, retrying transient failures.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let value = retry::retry_with_backoff(
            &self.retry,
            |e: &SourceError| {
                if e.is_retryable() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            || self.call_once(method, params),
        )
        .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn call_once(&self, method: &str, params: &[(&str, String)]) -> Result<Value, SourceError> {
        let mut query: Vec<(&str, &str)> = vec![
            ("method", method),
            ("api_key", self.api_key.as_str()),
            ("format", "json"),
            ("nojsoncallback", "1"),
        ];
        query.extend(params.iter().map(|(k, v)| (*k, v.as_str())));

        tracing::debug!(method, "Flickr API call");
        let response = self.http.get(&self.endpoint).query(&query).send().await?;

        if !response.status().is_success() {
            return Err(SourceError::HttpStatus {
                status: response.status().as_u16(),
                method: method.to_string(),
            });
        }

        let value: Value = response.json().await?;
        check_stat(method, value)
    }

    async fn list_body(&self, request: &Request, page: u32) -> Result<PageBody, SourceError> {
        let mut params = vec![
            ("user_id", self.user_id.clone()),
            ("per_page", PER_PAGE.to_string()),
            ("page", page.to_string()),
        ];

        match &request.kind {
            RequestKind::Album { album_id } => {
                params.push(("photoset_id", album_id.clone()));
                let resp: PhotosetPhotosResponse =
                    self.call("flickr.photosets.getPhotos", &params).await?;
                return Ok(resp.photoset);
            }
            RequestKind::All | RequestKind::Sync => {}
            RequestKind::Taken(window) => {
                let (min, max) = window.bounds();
                params.push(("min_taken_date", min.to_string()));
                params.push(("max_taken_date", max.to_string()));
            }
            RequestKind::Posted(window) => {
                let (min, max) = window.bounds();
                params.push(("min_upload_date", min.to_string()));
                params.push(("max_upload_date", max.to_string()));
            }
        }

        let resp: SearchResponse = self.call("flickr.photos.search", &params).await?;
        Ok(resp.photos)
    }

    async fn exif_model(&self, photo_id: u64) -> Result<Option<String>, SourceError> {
        let result: Result<ExifResponse, _> = self
            .call("flickr.photos.getExif", &[("photo_id", photo_id.to_string())])
            .await;
        match result {
            Ok(resp) => Ok(model_from_exif(&resp)),
            Err(SourceError::Api { code, .. }) if code == PERMISSION_DENIED => {
                tracing::debug!(photo_id, "EXIF hidden by owner");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Turn a `stat: "fail"` payload into an error.
fn check_stat(method: &str, value: Value) -> Result<Value, SourceError> {
    match value.get("stat").and_then(Value::as_str) {
        Some("ok") => Ok(value),
        Some(_) => Err(SourceError::Api {
            method: method.to_string(),
            code: value.get("code").and_then(Value::as_i64).unwrap_or(-1),
            message: value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        }),
        None => Err(SourceError::malformed(method, "missing stat field")),
    }
}

fn model_from_exif(resp: &ExifResponse) -> Option<String> {
    resp.photo
        .exif
        .iter()
        .find(|t| t.tag == "Model")
        .map(|t| t.raw.content.clone())
}

fn page_from_body(body: PageBody) -> Result<Page, SourceError> {
    let items = body
        .photo
        .iter()
        .map(|p| {
            p.id.parse::<u64>()
                .map_err(|_| SourceError::malformed("listing", format!("photo id {:?}", p.id)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        total: body.total,
        page_count: body.pages,
        title: body.title,
        items,
    })
}

fn timestamp(method: &str, secs: u64) -> Result<DateTime<Utc>, SourceError> {
    i64::try_from(secs)
        .ok()
        .and_then(|s| Utc.timestamp_opt(s, 0).single())
        .ok_or_else(|| SourceError::malformed(method, format!("timestamp {secs}")))
}

#[async_trait::async_trait]
impl PhotoSource for FlickrClient {
    async fn list_page(&self, request: &Request, page: u32) -> Result<Page, SourceError> {
        let body = self.list_body(request, page).await?;
        page_from_body(body)
    }

    async fn get_metadata(&self, photo_id: u64) -> Result<PhotoMetadata, SourceError> {
        const INFO: &str = "flickr.photos.getInfo";
        let id = photo_id.to_string();

        let info: InfoResponse = self.call(INFO, &[("photo_id", id.clone())]).await?;
        let dates = info.photo.dates;
        let date_taken = NaiveDateTime::parse_from_str(&dates.taken, TAKEN_FORMAT)
            .map_err(|_| SourceError::malformed(INFO, format!("taken date {:?}", dates.taken)))?;

        let exif_model = self.exif_model(photo_id).await?;

        let sizes: SizesResponse = self
            .call("flickr.photos.getSizes", &[("photo_id", id)])
            .await?;
        let sizes = sizes
            .sizes
            .size
            .into_iter()
            .filter(|s| {
                let video = s.media.as_deref() == Some("video");
                if video {
                    tracing::debug!(photo_id, label = %s.label, "Ignoring video rendition");
                }
                !video
            })
            .map(|s| Rendition {
                width: s.width,
                height: s.height,
                url: s.source,
            })
            .collect();

        Ok(PhotoMetadata {
            date_posted: timestamp(INFO, dates.posted)?,
            date_lastupdate: timestamp(INFO, dates.lastupdate)?,
            date_taken,
            exif_model,
            sizes,
        })
    }
}
