//! Serde models for the Flickr REST JSON responses we consume.
//!
//! Flickr is inconsistent about numeric fields: `total` is a number in
//! `photos.search` but a string in `photosets.getPhotos`, and rendition
//! dimensions flip between the two depending on the endpoint version. Every
//! numeric field therefore goes through [`lenient_u64`].

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Accept a JSON number or a numeric string.
fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom(format!("not an unsigned integer: {n}"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("not an unsigned integer: {s:?}"))),
        other => Err(serde::de::Error::custom(format!(
            "expected number or string, got {other}"
        ))),
    }
}

fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let n = lenient_u64(deserializer)?;
    u32::try_from(n).map_err(|_| serde::de::Error::custom(format!("out of range: {n}")))
}

/// Text wrapped in Flickr's `{"_content": "..."}` object.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Content {
    #[serde(rename = "_content", default)]
    pub content: String,
}

/// Common envelope of `photos.search` and `photosets.getPhotos`.
#[derive(Debug, Deserialize)]
pub struct PageBody {
    #[serde(deserialize_with = "lenient_u64")]
    pub total: u64,
    #[serde(deserialize_with = "lenient_u32")]
    pub pages: u32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub photo: Vec<PhotoRef>,
}

#[derive(Debug, Deserialize)]
pub struct PhotoRef {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub photos: PageBody,
}

#[derive(Debug, Deserialize)]
pub struct PhotosetPhotosResponse {
    pub photoset: PageBody,
}

#[derive(Debug, Deserialize)]
pub struct InfoResponse {
    pub photo: InfoPhoto,
}

#[derive(Debug, Deserialize)]
pub struct InfoPhoto {
    pub dates: InfoDates,
}

#[derive(Debug, Deserialize)]
pub struct InfoDates {
    #[serde(deserialize_with = "lenient_u64")]
    pub posted: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub lastupdate: u64,
    /// `YYYY-MM-DD HH:MM:SS`, no zone.
    pub taken: String,
}

#[derive(Debug, Deserialize)]
pub struct ExifResponse {
    pub photo: ExifPhoto,
}

#[derive(Debug, Deserialize)]
pub struct ExifPhoto {
    #[serde(default)]
    pub exif: Vec<ExifTag>,
}

#[derive(Debug, Deserialize)]
pub struct ExifTag {
    pub tag: String,
    #[serde(default)]
    pub raw: Content,
}

#[derive(Debug, Deserialize)]
pub struct SizesResponse {
    pub sizes: Sizes,
}

#[derive(Debug, Deserialize)]
pub struct Sizes {
    #[serde(default)]
    pub size: Vec<SizeEntry>,
}

#[derive(Debug, Deserialize)]
pub struct SizeEntry {
    #[serde(default)]
    pub label: String,
    #[serde(deserialize_with = "lenient_u32")]
    pub width: u32,
    #[serde(deserialize_with = "lenient_u32")]
    pub height: u32,
    pub source: String,
    #[serde(default)]
    pub media: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FindByUsernameResponse {
    pub user: FoundUser,
}

#[derive(Debug, Deserialize)]
pub struct FoundUser {
    pub nsid: String,
}

#[derive(Debug, Deserialize)]
pub struct PeopleInfoResponse {
    pub person: Person,
}

#[derive(Debug, Deserialize)]
pub struct Person {
    pub nsid: String,
    #[serde(default)]
    pub username: Content,
    #[serde(default)]
    pub realname: Content,
    #[serde(default)]
    pub profileurl: Content,
    pub photos: PersonPhotos,
}

#[derive(Debug, Deserialize)]
pub struct PersonPhotos {
    #[serde(default)]
    pub firstdatetaken: Content,
    #[serde(default)]
    pub firstdate: Content,
    pub count: CountContent,
}

#[derive(Debug, Deserialize)]
pub struct CountContent {
    #[serde(rename = "_content", deserialize_with = "lenient_u64")]
    pub content: u64,
}

#[derive(Debug, Deserialize)]
pub struct PhotosetListResponse {
    pub photosets: PhotosetList,
}

#[derive(Debug, Deserialize)]
pub struct PhotosetList {
    #[serde(default)]
    pub photoset: Vec<PhotosetEntry>,
}

#[derive(Debug, Deserialize)]
pub struct PhotosetEntry {
    pub id: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub photos: u64,
    #[serde(deserialize_with = "lenient_u64", default)]
    pub videos: u64,
    #[serde(default)]
    pub title: Content,
}
