//! Data model for the file-locking subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lock mode requested by an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LockType {
    Read,
    Write,
}

impl std::fmt::Display for LockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockType::Read => write!(f, "READ"),
            LockType::Write => write!(f, "WRITE"),
        }
    }
}

/// One held file lock.
///
/// At most one `LockRecord` with `lock_type = WRITE` may exist per
/// `file_path` at any time; this invariant is enforced by `LockManager`,
/// not by the record itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub file_path: String,
    pub agent_id: String,
    /// SHA-256 hex digest of the file's contents at acquisition time.
    pub file_hash: String,
    pub lock_type: LockType,
    pub acquired_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl LockRecord {
    pub fn new(
        file_path: impl Into<String>,
        agent_id: impl Into<String>,
        file_hash: impl Into<String>,
        lock_type: LockType,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            agent_id: agent_id.into(),
            file_hash: file_hash.into(),
            lock_type,
            acquired_at: Utc::now(),
            ttl_seconds,
            metadata: serde_json::Map::new(),
        }
    }

    /// A record is logically absent once its TTL has elapsed.
    pub fn is_expired(&self) -> bool {
        let expires_at = self.acquired_at + chrono::Duration::seconds(self.ttl_seconds as i64);
        Utc::now() > expires_at
    }

    /// The store key used by every `LockStore` backend.
    pub fn store_key(file_path: &str) -> String {
        format!("lock:{}", file_path)
    }
}

/// One blocked agent-to-holder relation in the Wait-For graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitEdge {
    pub waiter_agent_id: String,
    pub holder_agent_id: String,
    pub file_path: String,
    pub created_at: DateTime<Utc>,
}

impl WaitEdge {
    /// Returns `None` instead of constructing a self-edge.
    pub fn new(
        waiter_agent_id: impl Into<String>,
        holder_agent_id: impl Into<String>,
        file_path: impl Into<String>,
    ) -> Option<Self> {
        let waiter_agent_id = waiter_agent_id.into();
        let holder_agent_id = holder_agent_id.into();
        if waiter_agent_id == holder_agent_id {
            return None;
        }
        Some(Self {
            waiter_agent_id,
            holder_agent_id,
            file_path: file_path.into(),
            created_at: Utc::now(),
        })
    }
}

/// Returned on a failed `acquire` — identifies who is holding the path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub file_path: String,
    pub holding_agent_id: String,
    pub lock_type: LockType,
    pub acquired_at: DateTime<Utc>,
}

impl Conflict {
    pub fn from_record(record: &LockRecord) -> Self {
        Self {
            file_path: record.file_path.clone(),
            holding_agent_id: record.agent_id.clone(),
            lock_type: record.lock_type,
            acquired_at: record.acquired_at,
        }
    }
}

/// Result of comparing the hash recorded at acquisition against the
/// file's current hash. Drift is informational only (Open Question 3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftDetectionResult {
    pub file_path: String,
    pub locked_hash: String,
    pub current_hash: String,
    pub drifted: bool,
    pub checked_at: DateTime<Utc>,
}

/// Agent lifecycle state tracked by the Orchestrator for the duration of
/// a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentState {
    Idle,
    Waiting,
    Running,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSession {
    pub agent_id: String,
    pub agent_type: String,
    pub state: AgentState,
    /// Higher means more important; used by the DeadlockDetector's victim
    /// selection.
    pub priority: i32,
    pub started_at: DateTime<Utc>,
}

impl AgentSession {
    pub fn new(agent_id: impl Into<String>, agent_type: impl Into<String>, priority: i32) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            state: AgentState::Idle,
            priority,
            started_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_record_expiry() {
        let mut record = LockRecord::new("a.py", "agent-1", "deadbeef", LockType::Write, 1);
        assert!(!record.is_expired());
        record.acquired_at = Utc::now() - chrono::Duration::seconds(5);
        assert!(record.is_expired());
    }

    #[test]
    fn test_lock_record_round_trip() {
        let record = LockRecord::new("a.py", "agent-1", "deadbeef", LockType::Write, 3600);
        let json = serde_json::to_string(&record).unwrap();
        let back: LockRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }

    #[test]
    fn test_wait_edge_rejects_self_edge() {
        assert!(WaitEdge::new("agent-1", "agent-1", "a.py").is_none());
        assert!(WaitEdge::new("agent-1", "agent-2", "a.py").is_some());
    }

    #[test]
    fn test_store_key_format() {
        assert_eq!(LockRecord::store_key("src/main.rs"), "lock:src/main.rs");
    }
}
