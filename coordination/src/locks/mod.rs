//! Multi-agent lock & deadlock subsystem.
//!
//! Ordered two-phase file locking with TTL, Wait-For-Graph deadlock
//! detection with victim selection, lock keep-alive, and drift detection
//! against file hashes. This is the largest of the four core subsystems.

pub mod deadlock;
pub mod hasher;
pub mod keeper;
pub mod manager;
pub mod store;
pub mod types;

pub use deadlock::{CycleReport, DeadlockDetector, DeadlockError};
pub use hasher::{FileHasher, HashError};
pub use keeper::{LockKeeper, LockLost, Renewer};
pub use manager::{LockError, LockManager, LockResult};
pub use store::{LockStore, LockStoreError, LockStoreResult, RocksDbLockStore, SharedLockStore, SqliteLockStore};
pub use types::{AgentSession, AgentState, Conflict, DriftDetectionResult, LockRecord, LockType, WaitEdge};
