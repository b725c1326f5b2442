mod schema;
pub mod annotations;
pub mod criteria;
pub mod images;
pub mod models;
pub mod pattern;
pub mod query;
pub mod resolution;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

pub use criteria::{FilterCriteria, TagMode};
pub use models::{
    Annotation, AnnotationBundle, CaptionAnnotation, Dimensions, Image, ImageMetadata,
    ImageRegistration, NewImage, NewProcessedImage, ProcessedImage, RatingAnnotation,
    ScoreAnnotation, StoredAnnotations, TagAnnotation,
};
pub use pattern::{compile_pattern, CompiledPattern, MatchMode};
pub use resolution::select_best_resolution;
pub use schema::SCHEMA;

/// Store handle. Cloning is cheap; it only carries the location of the
/// database. Connections are never shared: each unit of work opens its own
/// through [`Database::connect`] and drops it when done.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Self {
            path: path.to_path_buf(),
        };
        // Fail early on an unusable path rather than on the first task.
        db.connect()?;
        Ok(db)
    }

    /// Open a database and make sure the schema exists.
    pub fn open_initialized(path: &Path) -> Result<Self> {
        let db = Self::open(path)?;
        db.initialize()?;
        Ok(db)
    }

    pub fn initialize(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!(path = %self.path.display(), "database schema initialized");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a fresh connection scoped to the caller.
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "PRAGMA foreign_keys=ON;
             PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;",
        )?;
        Ok(conn)
    }

    /// Run `f` inside one write transaction on its own connection.
    ///
    /// Begins `IMMEDIATE`: the write lock is held before `f` reads anything,
    /// and concurrent writers wait on the busy timeout.
    ///
    /// Commits when `f` returns `Ok`. On `Err` the transaction is dropped,
    /// which rolls back every statement `f` executed.
    pub fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Current time in the storage timestamp format.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Fixed-width UTC format so string order matches time order.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Parse a timestamp. Values without an offset are taken as UTC, never local time.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_format_is_fixed_width() {
        let a = format_timestamp(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        let b = format_timestamp(Utc.with_ymd_and_hms(2024, 11, 12, 13, 14, 15).unwrap());
        assert_eq!(a, "2024-01-02T03:04:05.000000Z");
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[test]
    fn test_naive_timestamps_are_utc() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-05-01T12:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01 12:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01T14:30:00+02:00"), Some(expected));
        assert_eq!(
            parse_timestamp("2024-05-01"),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_initialize_is_repeatable() {
        let (_dir, db) = test_support::temp_db();
        db.initialize().unwrap();

        let conn = db.connect().unwrap();
        let columns: Vec<String> = conn
            .prepare("SELECT name FROM pragma_table_info('images')")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert!(columns.iter().any(|c| c == "phash"));
        assert!(columns.iter().any(|c| c == "manual_rating"));
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let (_dir, db) = test_support::temp_db();
        let result: Result<()> = db.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO models (name, created_at) VALUES ('wd-tagger', ?)",
                [now_timestamp()],
            )?;
            Err(crate::error::CurioError::validation("abort"))
        });
        assert!(result.is_err());

        let conn = db.connect().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM models", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
