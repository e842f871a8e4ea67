//! The single-process embedded driver, backed by `rusqlite` with the
//! `bundled` feature so installs never need a system SQLite. One table
//! `(key TEXT PRIMARY KEY, value BLOB, expires_at INTEGER)` under a
//! single file in the state directory gives create/upsert/update/CAS
//! semantics directly through SQL, the way the teacher's embedded
//! catalog storage uses a single SQLite file per node.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use nimbus_ore::now::NowFn;

use crate::error::KvError;
use crate::key::immediate_children;
use crate::lock::DEFAULT_LOCK_POLL_INTERVAL;
use crate::store_trait::{KvStore, LockGuard, Ttl};

/// The embedded, single-node KV driver.
pub struct Embedded {
    conn: Arc<Mutex<Connection>>,
    now: NowFn,
    lock_poll_interval: Duration,
}

impl Embedded {
    /// Opens (creating if absent) the SQLite file at `path`.
    pub fn open(path: &Path) -> Result<Embedded, KvError> {
        let conn = Connection::open(path)
            .map_err(|err| KvError::ConnectionProblem(err.into()))?;
        Self::from_connection(conn)
    }

    /// An in-memory store, used by tests and by `Memory`-style wrapping
    /// in higher layers.
    pub fn open_in_memory() -> Result<Embedded, KvError> {
        let conn =
            Connection::open_in_memory().map_err(|err| KvError::ConnectionProblem(err.into()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Embedded, KvError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                expires_at INTEGER
            )",
            [],
        )?;
        Ok(Embedded {
            conn: Arc::new(Mutex::new(conn)),
            now: NowFn::real(),
            lock_poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
        })
    }

    pub fn with_now(mut self, now: NowFn) -> Self {
        self.now = now;
        self
    }

    fn expires_at(&self, ttl: Ttl) -> Option<i64> {
        match ttl {
            Ttl::Forever => None,
            Ttl::After(duration) => Some(self.now.call() as i64 + duration.as_millis() as i64),
        }
    }

    fn is_live(&self, expires_at: Option<i64>) -> bool {
        match expires_at {
            None => true,
            Some(at) => (self.now.call() as i64) < at,
        }
    }

    /// Removes expired rows. Run opportunistically; correctness never
    /// depends on this having run, since every read also checks
    /// `expires_at` itself.
    fn sweep_expired(&self, conn: &Connection) -> Result<(), KvError> {
        conn.execute(
            "DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![self.now.call() as i64],
        )?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for Embedded {
    async fn create(&self, key: &str, value: Vec<u8>, ttl: Ttl) -> Result<(), KvError> {
        let conn = self.conn.lock().unwrap();
        self.sweep_expired(&conn)?;
        let expires_at = self.expires_at(ttl);
        let existing: Option<Option<i64>> = conn
            .query_row("SELECT expires_at FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        if let Some(existing_expires_at) = existing {
            if self.is_live(existing_expires_at) {
                return Err(KvError::AlreadyExists(key.to_string()));
            }
        }
        conn.execute(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![key, value, expires_at],
        )?;
        Ok(())
    }

    async fn upsert(&self, key: &str, value: Vec<u8>, ttl: Ttl) -> Result<(), KvError> {
        let conn = self.conn.lock().unwrap();
        let expires_at = self.expires_at(ttl);
        conn.execute(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![key, value, expires_at],
        )?;
        Ok(())
    }

    async fn update(&self, key: &str, value: Vec<u8>, ttl: Ttl) -> Result<(), KvError> {
        let conn = self.conn.lock().unwrap();
        self.sweep_expired(&conn)?;
        let expires_at = self.expires_at(ttl);
        let updated = conn.execute(
            "UPDATE kv SET value = ?2, expires_at = ?3 WHERE key = ?1",
            params![key, value, expires_at],
        )?;
        if updated == 0 {
            return Err(KvError::NotFound(key.to_string()));
        }
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        new: Vec<u8>,
        expected: &[u8],
        ttl: Ttl,
    ) -> Result<(), KvError> {
        let conn = self.conn.lock().unwrap();
        self.sweep_expired(&conn)?;
        let current: Option<Vec<u8>> = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        match current {
            None => Err(KvError::NotFound(key.to_string())),
            Some(current) if current != expected => {
                Err(KvError::CompareFailed(key.to_string()))
            }
            Some(_) => {
                let expires_at = self.expires_at(ttl);
                conn.execute(
                    "UPDATE kv SET value = ?2, expires_at = ?3 WHERE key = ?1",
                    params![key, new, expires_at],
                )?;
                Ok(())
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, KvError> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(Vec<u8>, Option<i64>)> = conn
            .query_row(
                "SELECT value, expires_at FROM kv WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((value, expires_at)) if self.is_live(expires_at) => Ok(value),
            _ => Err(KvError::NotFound(key.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        if deleted == 0 {
            return Err(KvError::NotFound(key.to_string()));
        }
        Ok(())
    }

    async fn delete_dir(&self, prefix: &str) -> Result<(), KvError> {
        let conn = self.conn.lock().unwrap();
        let like_pattern = format!("{prefix}/%");
        conn.execute(
            "DELETE FROM kv WHERE key = ?1 OR key LIKE ?2",
            params![prefix, like_pattern],
        )?;
        Ok(())
    }

    async fn acquire_lock(&self, key: &str, ttl: Ttl) -> Result<LockGuard, KvError> {
        loop {
            match KvStore::try_acquire_lock(self, key, ttl).await {
                Ok(guard) => return Ok(guard),
                Err(KvError::AlreadyExists(_)) => {
                    tokio::time::sleep(self.lock_poll_interval).await;
                }
                Err(other) => return Err(other),
            }
        }
    }

    async fn try_acquire_lock(&self, key: &str, ttl: Ttl) -> Result<LockGuard, KvError> {
        KvStore::create(self, key, Vec::new(), ttl).await?;
        let handle = self.clone_handle();
        let key_owned = key.to_string();
        Ok(LockGuard::new(key_owned.clone(), move || async move {
            match KvStore::delete(&handle, &key_owned).await {
                Ok(()) | Err(KvError::NotFound(_)) => Ok(()),
                Err(err) => Err(err),
            }
        }))
    }

    async fn list_children(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let conn = self.conn.lock().unwrap();
        self.sweep_expired(&conn)?;
        let mut stmt = conn.prepare("SELECT key FROM kv")?;
        let keys: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        Ok(immediate_children(prefix, keys.iter().map(|s| s.as_str())))
    }
}

impl Embedded {
    /// A cheap handle sharing the same underlying connection, used so a
    /// `LockGuard` can release its lock through the same store instance
    /// it was acquired from without requiring callers to wrap `Embedded`
    /// in an `Arc` themselves.
    fn clone_handle(&self) -> Embedded {
        Embedded {
            conn: self.conn.clone(),
            now: self.now.clone(),
            lock_poll_interval: self.lock_poll_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Embedded {
        Embedded::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn create_then_create_fails_with_already_exists() {
        let kv = store();
        kv.create("k", b"v1".to_vec(), Ttl::Forever).await.unwrap();
        let err = kv.create("k", b"v2".to_vec(), Ttl::Forever).await.unwrap_err();
        assert!(matches!(err, KvError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn update_on_absent_key_is_not_found() {
        let kv = store();
        let err = kv.update("k", b"v".to_vec(), Ttl::Forever).await.unwrap_err();
        assert!(matches!(err, KvError::NotFound(_)));
    }

    #[tokio::test]
    async fn compare_and_swap_only_one_of_two_racers_succeeds() {
        let kv = store();
        kv.create("k", b"v1".to_vec(), Ttl::Forever).await.unwrap();
        kv.compare_and_swap("k", b"v2".to_vec(), b"v1", Ttl::Forever)
            .await
            .unwrap();
        let err = kv
            .compare_and_swap("k", b"v3".to_vec(), b"v1", Ttl::Forever)
            .await
            .unwrap_err();
        assert!(matches!(err, KvError::CompareFailed(_)));
        assert_eq!(kv.get("k").await.unwrap(), b"v2".to_vec());
    }

    #[tokio::test]
    async fn delete_dir_removes_subtree_only() {
        let kv = store();
        kv.upsert("sites/a", b"1".to_vec(), Ttl::Forever).await.unwrap();
        kv.upsert("sites/a/meta", b"2".to_vec(), Ttl::Forever).await.unwrap();
        kv.upsert("other/b", b"3".to_vec(), Ttl::Forever).await.unwrap();
        kv.delete_dir("sites/a").await.unwrap();
        assert!(kv.get("sites/a").await.is_err());
        assert!(kv.get("sites/a/meta").await.is_err());
        assert_eq!(kv.get("other/b").await.unwrap(), b"3".to_vec());
    }

    #[tokio::test]
    async fn list_children_is_sorted_and_immediate_only() {
        let kv = store();
        kv.upsert("sites/b", b"1".to_vec(), Ttl::Forever).await.unwrap();
        kv.upsert("sites/a/meta", b"2".to_vec(), Ttl::Forever).await.unwrap();
        let children = kv.list_children("sites").await.unwrap();
        assert_eq!(children, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn try_acquire_lock_fails_fast_when_held() {
        let kv = store();
        let guard = kv.try_acquire_lock("locks/x", Ttl::Forever).await.unwrap();
        let err = kv.try_acquire_lock("locks/x", Ttl::Forever).await.unwrap_err();
        assert!(matches!(err, KvError::AlreadyExists(_)));
        guard.release().await.unwrap();
        kv.try_acquire_lock("locks/x", Ttl::Forever).await.unwrap();
    }

    #[tokio::test]
    async fn expired_value_reads_as_not_found() {
        let (now, clock) = NowFn::mock(0);
        let kv = Embedded::open_in_memory().unwrap().with_now(now);
        kv.upsert("k", b"v".to_vec(), Ttl::After(Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(kv.get("k").await.unwrap(), b"v".to_vec());
        clock.advance(20);
        assert!(kv.get("k").await.is_err());
    }
}
