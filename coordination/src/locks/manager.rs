//! `LockManager` — two-phase, hash-tracking lock manager.

use std::path::Path;

use tracing::{debug, warn};

use super::hasher::FileHasher;
use super::store::{LockStoreError, SharedLockStore};
use super::types::{Conflict, DriftDetectionResult, LockRecord, LockType};

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock store error: {0}")]
    Store(#[from] LockStoreError),

    #[error("failed to hash {path}: {source}")]
    Hash {
        path: String,
        #[source]
        source: super::hasher::HashError,
    },

    #[error("path conflict: {0:?}")]
    Conflict(Conflict),

    #[error("acquire_ordered exceeded its timeout budget")]
    Timeout,

    #[error("{agent_id} does not own lock on {file_path}")]
    NotOwner { agent_id: String, file_path: String },
}

pub type LockResult<T> = Result<T, LockError>;

/// Batch size used by `list_locks`'s scan, matching the spec's "bounded
/// batch size (≈1000)" guidance. `LockStore::scan` already returns the
/// full non-expired set; this constant documents the intended pagination
/// point for store backends that support it.
pub const LIST_LOCKS_BATCH_SIZE: usize = 1000;

/// Default TTL applied when the caller does not specify one, matching
/// `LOCK_TTL_SECONDS` from the external interfaces section.
pub const DEFAULT_TTL_SECONDS: u64 = 3600;

pub struct LockManager {
    store: SharedLockStore,
    default_ttl_seconds: u64,
}

impl LockManager {
    pub fn new(store: SharedLockStore) -> Self {
        Self {
            store,
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
        }
    }

    pub fn with_default_ttl(mut self, ttl_seconds: u64) -> Self {
        self.default_ttl_seconds = ttl_seconds;
        self
    }

    fn hash_for(path: &str) -> LockResult<String> {
        if Path::new(path).exists() {
            FileHasher::hash_file(path).map_err(|source| LockError::Hash {
                path: path.to_string(),
                source,
            })
        } else {
            // A path that does not yet exist (e.g. a strategy introducing a
            // new file) hashes the empty byte string.
            Ok(FileHasher::hash_bytes(b""))
        }
    }

    /// `acquire(agent, path, type)` — see spec §4.6.
    pub async fn acquire(
        &self,
        agent_id: &str,
        path: &str,
        lock_type: LockType,
    ) -> LockResult<LockRecord> {
        match self.store.get(path).await? {
            None => {
                let hash = Self::hash_for(path)?;
                let record =
                    LockRecord::new(path, agent_id, hash, lock_type, self.default_ttl_seconds);
                self.store.set(path, record.clone()).await?;
                debug!(agent_id, path, "lock acquired");
                Ok(record)
            }
            Some(record) if record.agent_id == agent_id => {
                debug!(agent_id, path, "lock re-acquired (idempotent)");
                Ok(record)
            }
            Some(record) => {
                warn!(agent_id, path, holder = %record.agent_id, "lock conflict");
                Err(LockError::Conflict(Conflict::from_record(&record)))
            }
        }
    }

    /// `acquire_ordered(agent, paths, type, timeout)` — deadlock-prevention
    /// primitive. Returns `(acquired, remaining)` on full success, or an
    /// error after rolling back any partial acquisitions.
    pub async fn acquire_ordered(
        &self,
        agent_id: &str,
        paths: &[String],
        lock_type: LockType,
        timeout: std::time::Duration,
    ) -> LockResult<Vec<String>> {
        let mut sorted: Vec<String> = paths.to_vec();
        sorted.sort();
        sorted.dedup();

        let deadline = tokio::time::Instant::now() + timeout;
        let mut acquired: Vec<String> = Vec::with_capacity(sorted.len());

        for path in &sorted {
            if tokio::time::Instant::now() >= deadline {
                self.rollback(agent_id, &acquired).await;
                return Err(LockError::Timeout);
            }

            match self.acquire(agent_id, path, lock_type).await {
                Ok(_) => acquired.push(path.clone()),
                Err(e) => {
                    self.rollback(agent_id, &acquired).await;
                    return Err(e);
                }
            }
        }

        Ok(acquired)
    }

    /// Release previously-acquired locks in reverse (LIFO) order. Errors
    /// are logged, not propagated — rollback is best-effort cleanup on an
    /// already-failing path.
    async fn rollback(&self, agent_id: &str, acquired: &[String]) {
        for path in acquired.iter().rev() {
            if let Err(e) = self.release(agent_id, path).await {
                warn!(agent_id, path, error = %e, "rollback release failed");
            }
        }
    }

    /// `release(agent, path)` — succeeds only if the held record's
    /// `agent_id` matches `agent`.
    pub async fn release(&self, agent_id: &str, path: &str) -> LockResult<()> {
        match self.store.get(path).await? {
            Some(record) if record.agent_id == agent_id => {
                self.store.delete(path).await?;
                debug!(agent_id, path, "lock released");
                Ok(())
            }
            Some(record) => {
                warn!(agent_id, path, holder = %record.agent_id, "non-owning release rejected");
                Err(LockError::NotOwner {
                    agent_id: agent_id.to_string(),
                    file_path: path.to_string(),
                })
            }
            None => {
                warn!(agent_id, path, "release on absent lock");
                Err(LockError::NotOwner {
                    agent_id: agent_id.to_string(),
                    file_path: path.to_string(),
                })
            }
        }
    }

    /// `renew(agent, path)` — verifies ownership, updates `acquired_at`,
    /// resetting the TTL in the store. Used by `LockKeeper`.
    pub async fn renew(&self, agent_id: &str, path: &str) -> LockResult<LockRecord> {
        match self.store.get(path).await? {
            Some(mut record) if record.agent_id == agent_id => {
                record.acquired_at = chrono::Utc::now();
                self.store.set(path, record.clone()).await?;
                Ok(record)
            }
            _ => Err(LockError::NotOwner {
                agent_id: agent_id.to_string(),
                file_path: path.to_string(),
            }),
        }
    }

    /// `detect_drift(path)` — recomputes the file hash and compares with
    /// the stored hash. Informational only (Open Question 3).
    pub async fn detect_drift(&self, path: &str) -> LockResult<DriftDetectionResult> {
        let record = self
            .store
            .get(path)
            .await?
            .ok_or_else(|| LockError::NotOwner {
                agent_id: String::new(),
                file_path: path.to_string(),
            })?;

        let current_hash = Self::hash_for(path)?;
        let drifted = current_hash != record.file_hash;

        Ok(DriftDetectionResult {
            file_path: path.to_string(),
            locked_hash: record.file_hash,
            current_hash,
            drifted,
            checked_at: chrono::Utc::now(),
        })
    }

    /// `list_locks()` — enumerates via the store's `scan`, reaping expired
    /// entries encountered along the way.
    pub async fn list_locks(&self) -> LockResult<Vec<LockRecord>> {
        let paths = self.store.scan().await?;
        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(record) = self.store.get(&path).await? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locks::store::RocksDbLockStore;

    async fn store() -> SharedLockStore {
        let dir = tempfile::tempdir().unwrap();
        RocksDbLockStore::open(dir.path().join("locks.db"))
            .unwrap()
            .shared()
    }

    #[tokio::test]
    async fn test_acquire_is_idempotent_for_same_agent() {
        let manager = LockManager::new(store().await);
        manager.acquire("agent-1", "a.py", LockType::Write).await.unwrap();
        let second = manager.acquire("agent-1", "a.py", LockType::Write).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_acquire_conflict_for_other_agent() {
        let manager = LockManager::new(store().await);
        manager.acquire("agent-1", "a.py", LockType::Write).await.unwrap();
        let conflict = manager.acquire("agent-2", "a.py", LockType::Write).await;
        assert!(matches!(conflict, Err(LockError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_release_rejects_non_owner() {
        let manager = LockManager::new(store().await);
        manager.acquire("agent-1", "a.py", LockType::Write).await.unwrap();
        let result = manager.release("agent-2", "a.py").await;
        assert!(matches!(result, Err(LockError::NotOwner { .. })));
    }

    #[tokio::test]
    async fn test_acquire_ordered_sorts_canonically() {
        let manager = LockManager::new(store().await);
        let paths = vec!["b.py".to_string(), "a.py".to_string(), "c.py".to_string()];
        let acquired = manager
            .acquire_ordered("agent-1", &paths, LockType::Write, std::time::Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(acquired, vec!["a.py", "b.py", "c.py"]);
    }

    #[tokio::test]
    async fn test_acquire_ordered_rolls_back_on_conflict() {
        let shared = store().await;
        let manager = LockManager::new(shared.clone());
        manager.acquire("agent-2", "b.py", LockType::Write).await.unwrap();

        let paths = vec!["a.py".to_string(), "b.py".to_string()];
        let result = manager
            .acquire_ordered("agent-1", &paths, LockType::Write, std::time::Duration::from_secs(5))
            .await;
        assert!(result.is_err());

        // agent-1 must hold nothing after rollback.
        assert!(shared.get("a.py").await.unwrap().is_none());
    }
}
