//! Photo store trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::error::StateError;
use super::schema;
use super::types::{PhotoRecord, StoreSummary};

const DATE_TAKEN_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Key-value record store keyed by photo id.
///
/// Object-safe so it can be shared as `Arc<dyn PhotoStore>`. All writes are
/// single-record statements; no cross-record transactions are needed.
#[async_trait]
pub trait PhotoStore: Send + Sync {
    /// Look up a record by photo id.
    async fn get(&self, photo_id: u64) -> Result<Option<PhotoRecord>, StateError>;

    /// Upsert a full record.
    ///
    /// A non-empty stored hash is never replaced or cleared.
    async fn put(&self, record: &PhotoRecord) -> Result<(), StateError>;

    /// Insert a record only if no record exists for its id.
    ///
    /// Returns `false` when another record was already stored; the stored one
    /// wins.
    async fn insert_new(&self, record: &PhotoRecord) -> Result<bool, StateError>;

    /// Record the content hash for a photo whose hash is still empty.
    ///
    /// Returns `false` if the photo is unknown or already has a hash.
    async fn set_hash(&self, photo_id: u64, hash: &str) -> Result<bool, StateError>;

    /// Count resolved and downloaded photos.
    async fn summary(&self) -> Result<StoreSummary, StateError>;
}

/// SQLite implementation of the photo store.
pub struct SqlitePhotoStore {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync.
    conn: Mutex<Connection>,
    /// Path to the database file (for error messages).
    path: PathBuf,
}

impl std::fmt::Debug for SqlitePhotoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePhotoStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqlitePhotoStore {
    /// Open or create a database at the given path, creating parent
    /// directories as needed.
    pub async fn open(path: &Path) -> Result<Self, StateError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            if let Some(parent) = path_clone.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| StateError::CreateDir {
                        path: parent.to_path_buf(),
                        source: e,
                    })?;
                }
            }

            let conn = Connection::open(&path_clone).map_err(|e| StateError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StateError::Migration)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StateError::Migration)?;

            schema::migrate(&conn)?;

            Ok::<_, StateError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory database (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    /// Get the path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StateError> {
        self.conn
            .lock()
            .map_err(|e| StateError::Query(e.to_string()))
    }
}

/// Delete the database file and its WAL/SHM side files.
///
/// Returns whether a database file was present. Missing side files are
/// ignored.
pub fn remove_database(path: &Path) -> std::io::Result<bool> {
    let existed = match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => return Err(e),
    };

    let _ = std::fs::remove_file(path.with_extension("db-wal"));
    let _ = std::fs::remove_file(path.with_extension("db-shm"));

    Ok(existed)
}

#[async_trait]
impl PhotoStore for SqlitePhotoStore {
    async fn get(&self, photo_id: u64) -> Result<Option<PhotoRecord>, StateError> {
        let conn = self.lock()?;

        let row: Option<RawRow> = conn
            .query_row(
                "SELECT photo_id, width, height, model, url, date_taken, date_posted, date_lastupdate, hash FROM photos WHERE photo_id = ?1",
                [photo_id as i64],
                RawRow::from_row,
            )
            .optional()
            .map_err(StateError::query)?;

        row.map(RawRow::into_record).transpose()
    }

    async fn put(&self, record: &PhotoRecord) -> Result<(), StateError> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO photos (photo_id, width, height, model, url, date_taken, date_posted, date_lastupdate, hash)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(photo_id) DO UPDATE SET
                width = excluded.width,
                height = excluded.height,
                model = excluded.model,
                url = excluded.url,
                date_taken = excluded.date_taken,
                date_posted = excluded.date_posted,
                date_lastupdate = excluded.date_lastupdate,
                hash = CASE WHEN photos.hash = '' THEN excluded.hash ELSE photos.hash END
            "#,
            rusqlite::params_from_iter(record_params(record)),
        )
        .map_err(StateError::query)?;

        Ok(())
    }

    async fn insert_new(&self, record: &PhotoRecord) -> Result<bool, StateError> {
        let conn = self.lock()?;

        let rows = conn
            .execute(
                r#"
                INSERT INTO photos (photo_id, width, height, model, url, date_taken, date_posted, date_lastupdate, hash)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(photo_id) DO NOTHING
                "#,
                rusqlite::params_from_iter(record_params(record)),
            )
            .map_err(StateError::query)?;

        Ok(rows == 1)
    }

    async fn set_hash(&self, photo_id: u64, hash: &str) -> Result<bool, StateError> {
        let conn = self.lock()?;

        let rows = conn
            .execute(
                "UPDATE photos SET hash = ?1 WHERE photo_id = ?2 AND hash = ''",
                rusqlite::params![hash, photo_id as i64],
            )
            .map_err(StateError::query)?;

        Ok(rows == 1)
    }

    async fn summary(&self) -> Result<StoreSummary, StateError> {
        let conn = self.lock()?;

        let (total, downloaded): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COUNT(CASE WHEN hash != '' THEN 1 END) FROM photos",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(StateError::query)?;

        Ok(StoreSummary {
            total_photos: total as u64,
            downloaded: downloaded as u64,
        })
    }
}

fn record_params(record: &PhotoRecord) -> Vec<Box<dyn rusqlite::ToSql>> {
    vec![
        Box::new(record.photo_id as i64),
        Box::new(record.width),
        Box::new(record.height),
        Box::new(record.model.clone()),
        Box::new(record.url.clone()),
        Box::new(record.date_taken.format(DATE_TAKEN_FORMAT).to_string()),
        Box::new(record.date_posted.timestamp()),
        Box::new(record.date_lastupdate.timestamp()),
        Box::new(record.hash.clone()),
    ]
}

/// Column values as stored, before decoding dates.
struct RawRow {
    photo_id: i64,
    width: u32,
    height: u32,
    model: String,
    url: String,
    date_taken: String,
    date_posted: i64,
    date_lastupdate: i64,
    hash: String,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            photo_id: row.get(0)?,
            width: row.get(1)?,
            height: row.get(2)?,
            model: row.get(3)?,
            url: row.get(4)?,
            date_taken: row.get(5)?,
            date_posted: row.get(6)?,
            date_lastupdate: row.get(7)?,
            hash: row.get(8)?,
        })
    }

    fn into_record(self) -> Result<PhotoRecord, StateError> {
        let photo_id = self.photo_id as u64;
        let corrupt = |reason: String| StateError::CorruptRecord { photo_id, reason };

        let date_taken = NaiveDateTime::parse_from_str(&self.date_taken, DATE_TAKEN_FORMAT)
            .map_err(|e| corrupt(format!("date_taken {:?}: {}", self.date_taken, e)))?;

        Ok(PhotoRecord {
            photo_id,
            url: self.url,
            model: self.model,
            hash: self.hash,
            date_taken,
            date_posted: from_timestamp(self.date_posted),
            date_lastupdate: from_timestamp(self.date_lastupdate),
            width: self.width,
            height: self.height,
        })
    }
}

fn from_timestamp(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}
