//! Persistent photo metadata store.
//!
//! One SQLite row per photo id holding the metadata resolved on first sight
//! (dimensions, camera model, best-size URL, timestamps) plus the content
//! hash of the local copy once it has been downloaded. The hash is what makes
//! repeated scans idempotent across renamed or re-numbered local files.

pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use db::{remove_database, PhotoStore, SqlitePhotoStore};
pub use error::StateError;
pub use types::{PhotoRecord, UNKNOWN_MODEL};
