use thiserror::Error;

/// Flickr API error code returned by `flickr.photos.getExif` when the owner
/// hides EXIF data.
pub const PERMISSION_DENIED: i64 = 2;

#[derive(Error, Debug)]
pub enum SourceError {
    /// The API answered with `stat: "fail"`.
    #[error("Flickr API error {code} in {method}: {message}")]
    Api {
        method: String,
        code: i64,
        message: String,
    },

    #[error("HTTP error {status} calling {method}")]
    HttpStatus { status: u16, method: String },

    #[error("Unexpected response from {method}: {reason}")]
    Malformed { method: String, reason: String },

    #[error("User not found: {0}")]
    UnknownUser(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SourceError {
    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            SourceError::Http(_) => true,
            SourceError::Api { .. }
            | SourceError::Malformed { .. }
            | SourceError::UnknownUser(_)
            | SourceError::Json(_) => false,
        }
    }

    pub(crate) fn malformed(method: &str, reason: impl Into<String>) -> Self {
        SourceError::Malformed {
            method: method.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_retryable() {
        for status in [429, 500, 502, 503] {
            let e = SourceError::HttpStatus {
                status,
                method: "flickr.photos.search".into(),
            };
            assert!(e.is_retryable(), "status {status}");
        }
    }

    #[test]
    fn test_client_errors_not_retryable() {
        let e = SourceError::HttpStatus {
            status: 404,
            method: "flickr.photos.search".into(),
        };
        assert!(!e.is_retryable());
    }

    #[test]
    fn test_api_failure_not_retryable() {
        let e = SourceError::Api {
            method: "flickr.photos.getInfo".into(),
            code: 1,
            message: "Photo not found".into(),
        };
        assert!(!e.is_retryable());
    }
}
