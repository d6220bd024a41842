//! SQLite-backed persistent cache of resolved licenses.
//!
//! One row per `(name, version)` holding the JSON-serialized license list and
//! RFC 3339 `resolved_at` / `expires_at` timestamps. `expires_at` is indexed
//! so expired rows can be purged without a table scan.
//!
//! Every write is a single statement on one writer connection, so records are
//! replaced atomically and writes to the same key are serialized. Reads go
//! through a small set of read-only connections and, in WAL mode, run
//! alongside the writer and each other; a reader never observes a partially
//! written record. Blocking SQLite calls run on tokio's blocking pool.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use thiserror::Error;
use tracing::debug;

use crate::models::{CacheRecord, LicenseRef};

const DB_FILE: &str = "cache.db";
const READERS: usize = 4;
/// Longest lifetime a record can be given; keeps `expires_at` in RFC 3339 range.
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS license_cache (
    package_name    TEXT NOT NULL,
    package_version TEXT NOT NULL,
    license_data    TEXT NOT NULL,
    resolved_at     TEXT NOT NULL,
    expires_at      TEXT NOT NULL,
    PRIMARY KEY (package_name, package_version)
);
CREATE INDEX IF NOT EXISTS idx_expires ON license_cache(expires_at);
";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cache directory error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Summary returned by [`LicenseCache::stats`].
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub path: PathBuf,
    pub entries: u64,
    pub size_bytes: u64,
    pub oldest_resolved_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct LicenseCache {
    writer: Arc<Mutex<Connection>>,
    readers: Arc<[Mutex<Connection>]>,
    next_reader: Arc<AtomicUsize>,
    path: PathBuf,
}

impl LicenseCache {
    /// Open (creating if needed) `cache.db` inside `dir`.
    pub fn open(dir: &Path) -> Result<Self, CacheError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(DB_FILE);
        let conn = Connection::open(&path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.execute_batch(SCHEMA)?;

        let readers = (0..READERS)
            .map(|_| {
                let reader = Connection::open_with_flags(
                    &path,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )?;
                reader.busy_timeout(Duration::from_secs(5))?;
                Ok(Mutex::new(reader))
            })
            .collect::<Result<Vec<_>, CacheError>>()?;
        debug!(path = %path.display(), readers = READERS, "opened license cache");

        Ok(Self {
            writer: Arc::new(Mutex::new(conn)),
            readers: readers.into(),
            next_reader: Arc::new(AtomicUsize::new(0)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Licenses for `(name, version)`, or `None` when absent, expired, or unreadable.
    pub async fn get(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Option<Vec<LicenseRef>>, CacheError> {
        let (name, version) = (name.to_string(), version.to_string());
        self.with_reader(move |conn| get_at(conn, &name, &version, Utc::now()))
            .await
    }

    /// Store `licenses` for `(name, version)`, replacing any existing record.
    ///
    /// `ttl` is capped at [`MAX_TTL`].
    pub async fn set(
        &self,
        name: &str,
        version: &str,
        licenses: &[LicenseRef],
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let resolved_at = Utc::now();
        let ttl = TimeDelta::from_std(ttl.min(MAX_TTL)).unwrap_or(TimeDelta::MAX);
        let record = CacheRecord {
            name: name.to_string(),
            version: version.to_string(),
            payload: serde_json::to_string(licenses).unwrap_or_else(|_| "[]".to_string()),
            resolved_at,
            expires_at: resolved_at
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        self.insert_record(record).await
    }

    pub(crate) async fn insert_record(&self, record: CacheRecord) -> Result<(), CacheError> {
        self.with_writer(move |conn| {
            conn.execute(
                "REPLACE INTO license_cache
                 (package_name, package_version, license_data, resolved_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.name,
                    record.version,
                    record.payload,
                    timestamp(record.resolved_at),
                    timestamp(record.expires_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Delete every record whose expiry is earlier than now. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = timestamp(Utc::now());
        self.with_writer(move |conn| {
            Ok(conn.execute("DELETE FROM license_cache WHERE expires_at < ?1", [now])?)
        })
        .await
    }

    /// Remove one version of a package, every version of a package, or everything.
    pub async fn clear(
        &self,
        name: Option<&str>,
        version: Option<&str>,
    ) -> Result<usize, CacheError> {
        let name = name.map(str::to_string);
        let version = version.map(str::to_string);
        self.with_writer(move |conn| {
            let removed = match (name, version) {
                (None, _) => conn.execute("DELETE FROM license_cache", [])?,
                (Some(name), None) => conn.execute(
                    "DELETE FROM license_cache WHERE package_name = ?1",
                    [name],
                )?,
                (Some(name), Some(version)) => conn.execute(
                    "DELETE FROM license_cache WHERE package_name = ?1 AND package_version = ?2",
                    [name, version],
                )?,
            };
            Ok(removed)
        })
        .await
    }

    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        let path = self.path.clone();
        self.with_reader(move |conn| {
            let (entries, oldest): (i64, Option<String>) = conn.query_row(
                "SELECT COUNT(*), MIN(resolved_at) FROM license_cache",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let size: i64 = conn.query_row(
                "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                [],
                |row| row.get(0),
            )?;
            Ok(CacheStats {
                path,
                entries: u64::try_from(entries).unwrap_or(0),
                size_bytes: u64::try_from(size).unwrap_or(0),
                oldest_resolved_at: oldest.as_deref().and_then(parse_timestamp),
            })
        })
        .await
    }

    async fn with_writer<T, F>(&self, f: F) -> Result<T, CacheError>
    where
        F: FnOnce(&Connection) -> Result<T, CacheError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.writer);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&conn)
        })
        .await?
    }

    /// Run `f` on the next read-only connection in turn.
    async fn with_reader<T, F>(&self, f: F) -> Result<T, CacheError>
    where
        F: FnOnce(&Connection) -> Result<T, CacheError> + Send + 'static,
        T: Send + 'static,
    {
        let readers = Arc::clone(&self.readers);
        let slot = self.next_reader.fetch_add(1, Ordering::Relaxed) % readers.len();
        tokio::task::spawn_blocking(move || {
            let conn = readers[slot].lock().unwrap_or_else(PoisonError::into_inner);
            f(&conn)
        })
        .await?
    }
}

fn get_at(
    conn: &Connection,
    name: &str,
    version: &str,
    now: DateTime<Utc>,
) -> Result<Option<Vec<LicenseRef>>, CacheError> {
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT license_data, resolved_at, expires_at FROM license_cache
             WHERE package_name = ?1 AND package_version = ?2",
            [name, version],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let Some((payload, resolved_at, expires_at)) = row else {
        return Ok(None);
    };

    let (Some(resolved_at), Some(expires_at)) =
        (parse_timestamp(&resolved_at), parse_timestamp(&expires_at))
    else {
        debug!(package = name, version, "unreadable cache timestamps, treating as miss");
        return Ok(None);
    };
    let record = CacheRecord {
        name: name.to_string(),
        version: version.to_string(),
        payload,
        resolved_at,
        expires_at,
    };
    if !record.is_valid_at(now) {
        return Ok(None);
    }

    match serde_json::from_str::<Vec<LicenseRef>>(&record.payload) {
        Ok(licenses) if !licenses.is_empty() => Ok(Some(licenses)),
        Ok(_) | Err(_) => {
            debug!(package = name, version, "unreadable cache payload, treating as miss");
            Ok(None)
        }
    }
}

/// Fixed-width RFC 3339 so that string order matches time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Default cache location: `<platform cache dir>/license-waterfall`.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("license-waterfall")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mit() -> LicenseRef {
        LicenseRef {
            id: "MIT".into(),
            name: "MIT License".into(),
            url: "https://github.com/psf/requests/blob/v2.31.0/LICENSE".into(),
            verified: true,
        }
    }

    fn open() -> (TempDir, LicenseCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = LicenseCache::open(dir.path()).unwrap();
        (dir, cache)
    }

    fn record(name: &str, expires_at: DateTime<Utc>) -> CacheRecord {
        CacheRecord {
            name: name.into(),
            version: "1.0".into(),
            payload: serde_json::to_string(&vec![mit()]).unwrap(),
            resolved_at: expires_at - TimeDelta::days(30),
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (_dir, cache) = open();
        cache
            .set("requests", "2.31.0", &[mit()], Duration::from_secs(3600))
            .await
            .unwrap();

        let hit = cache.get("requests", "2.31.0").await.unwrap();
        assert_eq!(hit, Some(vec![mit()]));
        assert_eq!(cache.get("requests", "2.30.0").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let (_dir, cache) = open();
        let ttl = Duration::from_secs(3600);
        cache.set("six", "1.16.0", &[mit()], ttl).await.unwrap();

        let mut other = mit();
        other.id = "BSD-3-Clause".into();
        cache.set("six", "1.16.0", &[other.clone()], ttl).await.unwrap();

        assert_eq!(cache.get("six", "1.16.0").await.unwrap(), Some(vec![other]));
        assert_eq!(cache.stats().await.unwrap().entries, 1);
    }

    #[tokio::test]
    async fn test_expired_record_is_a_miss() {
        let (_dir, cache) = open();
        cache
            .insert_record(record("old", Utc::now() - TimeDelta::seconds(1)))
            .await
            .unwrap();
        assert_eq!(cache.get("old", "1.0").await.unwrap(), None);

        cache.set("zero", "1.0", &[mit()], Duration::ZERO).await.unwrap();
        assert_eq!(cache.get("zero", "1.0").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_a_miss() {
        let (_dir, cache) = open();
        let mut bad = record("bad", Utc::now() + TimeDelta::days(1));
        bad.payload = "{not json".into();
        cache.insert_record(bad).await.unwrap();
        assert_eq!(cache.get("bad", "1.0").await.unwrap(), None);

        let mut empty = record("empty", Utc::now() + TimeDelta::days(1));
        empty.payload = "[]".into();
        cache.insert_record(empty).await.unwrap();
        assert_eq!(cache.get("empty", "1.0").await.unwrap(), None);
    }

    #[test]
    fn test_malformed_expiry_is_a_miss() {
        let (_dir, cache) = open();
        let conn = cache.writer.lock().unwrap();
        conn.execute(
            "INSERT INTO license_cache VALUES ('x', '1.0', '[]', 'yesterday', 'tomorrow')",
            [],
        )
        .unwrap();
        assert_eq!(get_at(&conn, "x", "1.0", Utc::now()).unwrap(), None);
    }

    #[tokio::test]
    async fn test_huge_ttl_is_capped_and_readable() {
        let (_dir, cache) = open();
        cache.set("forever", "1.0", &[mit()], Duration::MAX).await.unwrap();
        cache
            .set("long", "1.0", &[mit()], Duration::from_secs(4_000_000 * 24 * 3600))
            .await
            .unwrap();

        assert_eq!(cache.get("forever", "1.0").await.unwrap(), Some(vec![mit()]));
        assert_eq!(cache.get("long", "1.0").await.unwrap(), Some(vec![mit()]));
        assert_eq!(cache.purge_expired().await.unwrap(), 0);
        assert_eq!(cache.stats().await.unwrap().entries, 2);
    }

    #[tokio::test]
    async fn test_reads_do_not_wait_for_the_writer() {
        let (_dir, cache) = open();
        cache
            .set("requests", "2.31.0", &[mit()], Duration::from_secs(3600))
            .await
            .unwrap();

        let _writing = cache.writer.lock().unwrap();
        let hit = tokio::time::timeout(Duration::from_secs(5), cache.get("requests", "2.31.0"))
            .await
            .expect("read blocked behind writer")
            .unwrap();
        assert_eq!(hit, Some(vec![mit()]));
    }

    #[tokio::test]
    async fn test_purge_removes_only_expired() {
        let (_dir, cache) = open();
        let now = Utc::now();
        cache.insert_record(record("a", now - TimeDelta::hours(1))).await.unwrap();
        cache.insert_record(record("b", now - TimeDelta::seconds(1))).await.unwrap();
        cache.insert_record(record("c", now + TimeDelta::hours(1))).await.unwrap();
        cache.insert_record(record("d", now + TimeDelta::days(30))).await.unwrap();

        assert_eq!(cache.purge_expired().await.unwrap(), 2);

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.entries, 2);
        assert!(cache.get("c", "1.0").await.unwrap().is_some());
        assert!(cache.get("d", "1.0").await.unwrap().is_some());
        assert_eq!(cache.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear_variants() {
        let (_dir, cache) = open();
        let ttl = Duration::from_secs(3600);
        cache.set("a", "1", &[mit()], ttl).await.unwrap();
        cache.set("a", "2", &[mit()], ttl).await.unwrap();
        cache.set("b", "1", &[mit()], ttl).await.unwrap();
        cache.set("c", "1", &[mit()], ttl).await.unwrap();

        assert_eq!(cache.clear(Some("a"), Some("1")).await.unwrap(), 1);
        assert!(cache.get("a", "2").await.unwrap().is_some());

        assert_eq!(cache.clear(Some("a"), None).await.unwrap(), 1);
        assert_eq!(cache.clear(None, None).await.unwrap(), 2);
        assert_eq!(cache.stats().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let (dir, cache) = open();
        let empty = cache.stats().await.unwrap();
        assert_eq!(empty.entries, 0);
        assert_eq!(empty.oldest_resolved_at, None);
        assert_eq!(empty.path, dir.path().join(DB_FILE));

        let now = Utc::now();
        cache.insert_record(record("a", now + TimeDelta::days(2))).await.unwrap();
        cache.insert_record(record("b", now + TimeDelta::days(1))).await.unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.entries, 2);
        assert!(stats.size_bytes > 0);
        let oldest = stats.oldest_resolved_at.unwrap();
        let expected = now + TimeDelta::days(1) - TimeDelta::days(30);
        assert!((oldest - expected).num_milliseconds().abs() < 1);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = LicenseCache::open(dir.path()).unwrap();
            cache
                .set("flask", "3.0.0", &[mit()], Duration::from_secs(3600))
                .await
                .unwrap();
        }
        let cache = LicenseCache::open(dir.path()).unwrap();
        assert_eq!(cache.get("flask", "3.0.0").await.unwrap(), Some(vec![mit()]));
    }

    #[tokio::test]
    async fn test_concurrent_writers_same_key() {
        let (_dir, cache) = open();
        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                let mut lic = mit();
                lic.name = format!("writer {i}");
                cache
                    .set("shared", "1.0", &[lic], Duration::from_secs(60))
                    .await
                    .unwrap();
                cache.get("shared", "1.0").await.unwrap()
            }));
        }
        for handle in handles {
            let seen = handle.await.unwrap().unwrap();
            assert_eq!(seen.len(), 1);
            assert!(seen[0].name.starts_with("writer "));
        }
    }
}
