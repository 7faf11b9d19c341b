//! `LockStore` — durable map from file path to `LockRecord`.
//!
//! Two backends satisfy the same trait (Design Notes: "tagged variants
//! chosen at construction time" rather than duck-typed ports): a RocksDB
//! store for in-process/distributed deployments, and a SQLite/WAL store
//! for single-node deployments that want concurrent readers without a
//! separate server process.

use std::sync::Arc;

use async_trait::async_trait;

use super::types::LockRecord;

/// Error type for lock store operations.
#[derive(Debug, thiserror::Error)]
pub enum LockStoreError {
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Lock poisoned")]
    LockPoisoned,
}

pub type LockStoreResult<T> = Result<T, LockStoreError>;

/// Shared reference to any `LockStore` implementation.
pub type SharedLockStore = Arc<dyn LockStore>;

/// Durable map `path → LockRecord` with TTL and atomic scan.
///
/// `get` returns `None` for expired records and MAY delete them
/// opportunistically. `set` is an upsert. TTL is enforced by the store,
/// not by the caller.
#[async_trait]
pub trait LockStore: Send + Sync {
    async fn set(&self, path: &str, record: LockRecord) -> LockStoreResult<()>;
    async fn get(&self, path: &str) -> LockStoreResult<Option<LockRecord>>;
    async fn delete(&self, path: &str) -> LockStoreResult<()>;
    /// Enumerate all non-expired paths currently recorded. Implementations
    /// MAY reap expired entries as a side effect of the scan.
    async fn scan(&self) -> LockStoreResult<Vec<String>>;
    /// Remove all expired records; returns the number removed.
    async fn cleanup_expired(&self) -> LockStoreResult<usize>;
}

/// RocksDB-backed `LockStore`, grounded on `state::store::StateStore`'s
/// column-family + bincode pattern.
pub mod rocksdb_backend {
    use super::*;
    use rocksdb::{Options, DB};
    use std::path::PathBuf;
    use std::sync::RwLock;

    const CF_LOCKS: &str = "locks";

    pub struct RocksDbLockStore {
        db: RwLock<DB>,
        #[allow(dead_code)]
        path: PathBuf,
    }

    impl RocksDbLockStore {
        pub fn open(path: impl Into<PathBuf>) -> LockStoreResult<Self> {
            let path = path.into();
            let mut opts = Options::default();
            opts.create_if_missing(true);
            opts.create_missing_column_families(true);

            let cf = rocksdb::ColumnFamilyDescriptor::new(CF_LOCKS, Options::default());
            let db = DB::open_cf_descriptors(&opts, &path, vec![cf])?;

            Ok(Self {
                db: RwLock::new(db),
                path,
            })
        }

        pub fn shared(self) -> SharedLockStore {
            Arc::new(self)
        }
    }

    #[async_trait]
    impl LockStore for RocksDbLockStore {
        async fn set(&self, path: &str, record: LockRecord) -> LockStoreResult<()> {
            let key = LockRecord::store_key(path);
            let db = self.db.read().map_err(|_| LockStoreError::LockPoisoned)?;
            let cf = db.cf_handle(CF_LOCKS).expect("locks cf exists");
            let bytes = bincode::serialize(&record)
                .map_err(|e| LockStoreError::Serialization(e.to_string()))?;
            db.put_cf(&cf, key.as_bytes(), bytes)?;
            Ok(())
        }

        async fn get(&self, path: &str) -> LockStoreResult<Option<LockRecord>> {
            let key = LockRecord::store_key(path);
            let db = self.db.read().map_err(|_| LockStoreError::LockPoisoned)?;
            let cf = db.cf_handle(CF_LOCKS).expect("locks cf exists");
            match db.get_cf(&cf, key.as_bytes())? {
                Some(bytes) => {
                    let record: LockRecord = bincode::deserialize(&bytes)
                        .map_err(|e| LockStoreError::Deserialization(e.to_string()))?;
                    if record.is_expired() {
                        drop(db);
                        self.delete(path).await?;
                        Ok(None)
                    } else {
                        Ok(Some(record))
                    }
                }
                None => Ok(None),
            }
        }

        async fn delete(&self, path: &str) -> LockStoreResult<()> {
            let key = LockRecord::store_key(path);
            let db = self.db.read().map_err(|_| LockStoreError::LockPoisoned)?;
            let cf = db.cf_handle(CF_LOCKS).expect("locks cf exists");
            db.delete_cf(&cf, key.as_bytes())?;
            Ok(())
        }

        async fn scan(&self) -> LockStoreResult<Vec<String>> {
            let db = self.db.read().map_err(|_| LockStoreError::LockPoisoned)?;
            let cf = db.cf_handle(CF_LOCKS).expect("locks cf exists");
            let mut paths = Vec::new();
            let mut expired = Vec::new();
            let iter = db.iterator_cf(&cf, rocksdb::IteratorMode::Start);
            for item in iter {
                let (key, value) = item?;
                let record: LockRecord = bincode::deserialize(&value)
                    .map_err(|e| LockStoreError::Deserialization(e.to_string()))?;
                if record.is_expired() {
                    expired.push(String::from_utf8_lossy(&key).to_string());
                } else {
                    paths.push(record.file_path);
                }
            }
            drop(db);
            for key in expired {
                let db = self.db.read().map_err(|_| LockStoreError::LockPoisoned)?;
                let cf = db.cf_handle(CF_LOCKS).expect("locks cf exists");
                db.delete_cf(&cf, key.as_bytes())?;
            }
            Ok(paths)
        }

        async fn cleanup_expired(&self) -> LockStoreResult<usize> {
            let before = self.scan().await?.len();
            let db = self.db.read().map_err(|_| LockStoreError::LockPoisoned)?;
            let cf = db.cf_handle(CF_LOCKS).expect("locks cf exists");
            let mut count = 0usize;
            let mut expired_keys = Vec::new();
            let iter = db.iterator_cf(&cf, rocksdb::IteratorMode::Start);
            for item in iter {
                let (key, value) = item?;
                let record: LockRecord = bincode::deserialize(&value)
                    .map_err(|e| LockStoreError::Deserialization(e.to_string()))?;
                if record.is_expired() {
                    expired_keys.push(key.to_vec());
                }
            }
            drop(db);
            let db = self.db.read().map_err(|_| LockStoreError::LockPoisoned)?;
            let cf = db.cf_handle(CF_LOCKS).expect("locks cf exists");
            for key in &expired_keys {
                db.delete_cf(&cf, key)?;
                count += 1;
            }
            let _ = before;
            Ok(count)
        }
    }
}

/// SQLite/WAL-mode `LockStore`, grounded on the `sqlx` + WAL pattern used
/// for single-node deployments that need concurrent readers without a
/// standalone server process.
pub mod sqlite_backend {
    use super::*;
    use chrono::Utc;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use sqlx::{Row, SqlitePool};
    use std::str::FromStr;

    pub struct SqliteLockStore {
        pool: SqlitePool,
    }

    impl SqliteLockStore {
        pub async fn open(path: &str) -> LockStoreResult<Self> {
            let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))
                .map_err(LockStoreError::Sqlite)?
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

            let pool = SqlitePoolOptions::new()
                .max_connections(8)
                .connect_with(opts)
                .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS locks (
                    file_path TEXT PRIMARY KEY,
                    agent_id TEXT NOT NULL,
                    file_hash TEXT NOT NULL,
                    lock_type TEXT NOT NULL,
                    acquired_at TEXT NOT NULL,
                    ttl_seconds INTEGER NOT NULL,
                    metadata TEXT NOT NULL
                )",
            )
            .execute(&pool)
            .await?;

            Ok(Self { pool })
        }

        pub fn shared(self) -> SharedLockStore {
            Arc::new(self)
        }

        fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> LockStoreResult<LockRecord> {
            let lock_type_str: String = row.try_get("lock_type")?;
            let lock_type = if lock_type_str == "WRITE" {
                super::super::types::LockType::Write
            } else {
                super::super::types::LockType::Read
            };
            let acquired_at_str: String = row.try_get("acquired_at")?;
            let acquired_at = chrono::DateTime::parse_from_rfc3339(&acquired_at_str)
                .map_err(|e| LockStoreError::Deserialization(e.to_string()))?
                .with_timezone(&Utc);
            let metadata_str: String = row.try_get("metadata")?;
            let metadata = serde_json::from_str(&metadata_str)
                .map_err(|e| LockStoreError::Deserialization(e.to_string()))?;

            Ok(LockRecord {
                file_path: row.try_get("file_path")?,
                agent_id: row.try_get("agent_id")?,
                file_hash: row.try_get("file_hash")?,
                lock_type,
                acquired_at,
                ttl_seconds: row.try_get::<i64, _>("ttl_seconds")? as u64,
                metadata,
            })
        }
    }

    #[async_trait]
    impl LockStore for SqliteLockStore {
        async fn set(&self, path: &str, record: LockRecord) -> LockStoreResult<()> {
            let metadata = serde_json::to_string(&record.metadata)
                .map_err(|e| LockStoreError::Serialization(e.to_string()))?;
            sqlx::query(
                "INSERT INTO locks (file_path, agent_id, file_hash, lock_type, acquired_at, ttl_seconds, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(file_path) DO UPDATE SET
                    agent_id = excluded.agent_id,
                    file_hash = excluded.file_hash,
                    lock_type = excluded.lock_type,
                    acquired_at = excluded.acquired_at,
                    ttl_seconds = excluded.ttl_seconds,
                    metadata = excluded.metadata",
            )
            .bind(path)
            .bind(&record.agent_id)
            .bind(&record.file_hash)
            .bind(record.lock_type.to_string())
            .bind(record.acquired_at.to_rfc3339())
            .bind(record.ttl_seconds as i64)
            .bind(metadata)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get(&self, path: &str) -> LockStoreResult<Option<LockRecord>> {
            let row = sqlx::query("SELECT * FROM locks WHERE file_path = ?1")
                .bind(path)
                .fetch_optional(&self.pool)
                .await?;
            match row {
                Some(row) => {
                    let record = Self::row_to_record(&row)?;
                    if record.is_expired() {
                        self.delete(path).await?;
                        Ok(None)
                    } else {
                        Ok(Some(record))
                    }
                }
                None => Ok(None),
            }
        }

        async fn delete(&self, path: &str) -> LockStoreResult<()> {
            sqlx::query("DELETE FROM locks WHERE file_path = ?1")
                .bind(path)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn scan(&self) -> LockStoreResult<Vec<String>> {
            let rows = sqlx::query("SELECT * FROM locks").fetch_all(&self.pool).await?;
            let mut paths = Vec::new();
            let mut expired = Vec::new();
            for row in &rows {
                let record = Self::row_to_record(row)?;
                if record.is_expired() {
                    expired.push(record.file_path);
                } else {
                    paths.push(record.file_path);
                }
            }
            for path in expired {
                self.delete(&path).await?;
            }
            Ok(paths)
        }

        async fn cleanup_expired(&self) -> LockStoreResult<usize> {
            let rows = sqlx::query("SELECT * FROM locks").fetch_all(&self.pool).await?;
            let mut count = 0usize;
            for row in &rows {
                let record = Self::row_to_record(row)?;
                if record.is_expired() {
                    self.delete(&record.file_path).await?;
                    count += 1;
                }
            }
            Ok(count)
        }
    }
}

pub use rocksdb_backend::RocksDbLockStore;
pub use sqlite_backend::SqliteLockStore;
