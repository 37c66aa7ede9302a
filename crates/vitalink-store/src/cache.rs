//! The never-throw cache contract.
//!
//! `set` / `get` / `remove` are synchronous and best-effort: storage
//! and serialization failures are logged and reported as `false` /
//! `None`, never raised. TTL is evaluated lazily on `get` against the
//! entry's write timestamp; expired entries are evicted on read, there
//! is no background sweep.

use std::sync::Mutex;

use rusqlite::params;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use vitalink_shared::constants::{CACHE_SCHEMA_VERSION, CACHE_TTL_MS};
use vitalink_shared::Timestamp;

use crate::database::Database;
use crate::error::Result;

/// Versioned, TTL-bound key-value cache over the local database.
pub struct CacheStore {
    db: Mutex<Database>,
    version: String,
    ttl_ms: i64,
}

impl CacheStore {
    /// Cache with the default schema version and 24 h TTL.
    pub fn new(db: Database) -> Self {
        Self::with_options(db, CACHE_SCHEMA_VERSION, CACHE_TTL_MS)
    }

    /// Cache with explicit version namespace and TTL, for tests and
    /// migrations.
    pub fn with_options(db: Database, version: &str, ttl_ms: i64) -> Self {
        Self {
            db: Mutex::new(db),
            version: version.to_string(),
            ttl_ms,
        }
    }

    /// Namespaced storage key. Old-version entries become unreachable
    /// after a version bump; they are orphaned, not actively purged.
    fn scoped(&self, key: &str) -> String {
        format!("chat_{}_{}", self.version, key)
    }

    /// Store `value` under `key`. `false` means the cache is
    /// unavailable for this write, not an application error.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> bool {
        match self.try_set(key, value) {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, "cache write failed");
                false
            }
        }
    }

    /// Fetch `key`, enforcing TTL. Expired entries are evicted and
    /// reported as `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.try_get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "cache read failed");
                None
            }
        }
    }

    /// Delete `key`. `false` when nothing was deleted or the cache is
    /// unavailable.
    pub fn remove(&self, key: &str) -> bool {
        match self.try_remove(key) {
            Ok(removed) => removed,
            Err(e) => {
                warn!(key, error = %e, "cache remove failed");
                false
            }
        }
    }

    fn try_set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        let db = self.lock()?;
        db.conn().execute(
            "INSERT INTO cache (key, written_at, payload) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET written_at = ?2, payload = ?3",
            params![self.scoped(key), Timestamp::now().as_millis(), payload],
        )?;
        Ok(())
    }

    fn try_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let scoped = self.scoped(key);
        let db = self.lock()?;
        let row: Option<(i64, String)> = db
            .conn()
            .query_row(
                "SELECT written_at, payload FROM cache WHERE key = ?1",
                params![scoped],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let Some((written_at, payload)) = row else {
            return Ok(None);
        };

        let age = Timestamp::now().as_millis() - written_at;
        if age >= self.ttl_ms {
            debug!(key, age_ms = age, "cache entry expired, evicting");
            db.conn()
                .execute("DELETE FROM cache WHERE key = ?1", params![scoped])?;
            return Ok(None);
        }

        Ok(Some(serde_json::from_str(&payload)?))
    }

    fn try_remove(&self, key: &str) -> Result<bool> {
        let db = self.lock()?;
        let affected = db.conn().execute(
            "DELETE FROM cache WHERE key = ?1",
            params![self.scoped(key)],
        )?;
        Ok(affected > 0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Database>> {
        self.db.lock().map_err(|_| crate::error::StoreError::Poisoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Payload {
        name: String,
        count: u32,
    }

    fn payload() -> Payload {
        Payload {
            name: "hydration reminder".to_string(),
            count: 3,
        }
    }

    fn fresh_cache() -> CacheStore {
        CacheStore::new(Database::in_memory().unwrap())
    }

    #[test]
    fn round_trip_within_ttl() {
        let cache = fresh_cache();
        assert!(cache.set("k1", &payload()));
        assert_eq!(cache.get::<Payload>("k1"), Some(payload()));
    }

    #[test]
    fn missing_key_is_none() {
        let cache = fresh_cache();
        assert_eq!(cache.get::<Payload>("nope"), None);
    }

    #[test]
    fn expired_entry_is_evicted_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        let expiring =
            CacheStore::with_options(Database::open_at(&path).unwrap(), "v2", 0);
        assert!(expiring.set("k1", &payload()));
        assert_eq!(expiring.get::<Payload>("k1"), None);
        drop(expiring);

        // Same version, generous TTL: the row must actually be gone.
        let patient =
            CacheStore::with_options(Database::open_at(&path).unwrap(), "v2", i64::MAX);
        assert_eq!(patient.get::<Payload>("k1"), None);
    }

    #[test]
    fn version_bump_orphans_old_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        let v1 = CacheStore::with_options(Database::open_at(&path).unwrap(), "v1", i64::MAX);
        assert!(v1.set("k1", &payload()));
        drop(v1);

        let v2 = CacheStore::with_options(Database::open_at(&path).unwrap(), "v2", i64::MAX);
        assert_eq!(v2.get::<Payload>("k1"), None);
    }

    #[test]
    fn remove_reports_whether_anything_was_deleted() {
        let cache = fresh_cache();
        assert!(!cache.remove("k1"));
        assert!(cache.set("k1", &payload()));
        assert!(cache.remove("k1"));
        assert_eq!(cache.get::<Payload>("k1"), None);
    }

    #[test]
    fn overwrite_refreshes_payload() {
        let cache = fresh_cache();
        assert!(cache.set("k1", &payload()));
        let updated = Payload {
            name: "stretch break".to_string(),
            count: 9,
        };
        assert!(cache.set("k1", &updated));
        assert_eq!(cache.get::<Payload>("k1"), Some(updated));
    }

    #[test]
    fn unserializable_read_is_none_not_panic() {
        let cache = fresh_cache();
        assert!(cache.set("k1", &"just a string"));
        assert_eq!(cache.get::<Payload>("k1"), None);
    }
}
