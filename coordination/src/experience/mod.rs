//! Experience repository — append-only log of past attempts, queryable
//! by session, problem similarity, and recency.
//!
//! Grounded on `state::store::StateStore`'s own-DB + column-family +
//! bincode pattern (spec §6's schema maps directly onto one column
//! family keyed by a monotonically increasing id, with secondary
//! indices over `session_id` and `created_at` built the same way
//! `StateStore::get_session_tasks`/`get_active_session` scan a prefix
//! and filter in memory rather than maintaining a second index
//! structure).

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use serde::{Deserialize, Serialize};

use crate::reflection::Verdict;

/// Default lookback window for similarity/time-window queries (Open
/// Question 4: 30 days, exposed as a parameter rather than hardcoded).
pub const DEFAULT_LOOKBACK_DAYS: i64 = 30;

const CF_EXPERIENCES: &str = "experiences";
const CF_COUNTER: &str = "experience_counter";

#[derive(Debug, thiserror::Error)]
pub enum ExperienceError {
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Lock poisoned")]
    LockPoisoned,
}

pub type ExperienceResult<T> = Result<T, ExperienceError>;

/// One row of the append-only experience log (spec §6 schema).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExperience {
    pub id: u64,
    pub session_id: String,
    pub problem_description: String,
    pub problem_type: String,
    pub strategy_type: String,
    pub file_paths: Vec<String>,
    pub success: bool,
    pub total_score: f32,
    pub verdict: String,
    pub created_at: DateTime<Utc>,
}

impl AgentExperience {
    pub fn from_verdict(
        id: u64,
        session_id: impl Into<String>,
        problem_description: impl Into<String>,
        problem_type: impl Into<String>,
        strategy_type: impl Into<String>,
        file_paths: Vec<String>,
        total_score: f32,
        verdict: Verdict,
    ) -> Self {
        Self {
            id,
            session_id: session_id.into(),
            problem_description: problem_description.into(),
            problem_type: problem_type.into(),
            strategy_type: strategy_type.into(),
            file_paths,
            success: matches!(verdict, Verdict::Accept),
            total_score,
            verdict: format!("{verdict:?}").to_lowercase(),
            created_at: Utc::now(),
        }
    }
}

fn experience_key(id: u64) -> String {
    format!("exp:{id:020}")
}

/// Own RocksDB instance with a single `experiences` column family plus a
/// small counter CF for the monotonic id, mirroring `StateStore`'s
/// per-module-owned-DB convention rather than sharing one DB instance
/// across unrelated subsystems.
pub struct ExperienceRepository {
    db: RwLock<DB>,
    #[allow(dead_code)]
    path: PathBuf,
}

pub type SharedExperienceRepository = Arc<ExperienceRepository>;

impl ExperienceRepository {
    pub fn open(path: impl Into<PathBuf>) -> ExperienceResult<Self> {
        let path = path.into();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_EXPERIENCES, Options::default()),
            ColumnFamilyDescriptor::new(CF_COUNTER, Options::default()),
        ];
        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;

        Ok(Self {
            db: RwLock::new(db),
            path,
        })
    }

    pub fn shared(self) -> SharedExperienceRepository {
        Arc::new(self)
    }

    fn next_id(&self) -> ExperienceResult<u64> {
        let db = self.db.read().map_err(|_| ExperienceError::LockPoisoned)?;
        let cf = db.cf_handle(CF_COUNTER).expect("counter cf exists");
        let current = match db.get_cf(&cf, b"next")? {
            Some(bytes) => u64::from_be_bytes(bytes.as_slice().try_into().unwrap_or_default()),
            None => 0,
        };
        db.put_cf(&cf, b"next", (current + 1).to_be_bytes())?;
        Ok(current)
    }

    /// Appends a new experience record, assigning the next monotonic id.
    /// Experiences are never updated or deleted in place — "append-only"
    /// per spec §6.
    pub fn append(
        &self,
        session_id: &str,
        problem_description: &str,
        problem_type: &str,
        strategy_type: &str,
        file_paths: Vec<String>,
        total_score: f32,
        verdict: Verdict,
    ) -> ExperienceResult<AgentExperience> {
        let id = self.next_id()?;
        let experience = AgentExperience::from_verdict(
            id,
            session_id,
            problem_description,
            problem_type,
            strategy_type,
            file_paths,
            total_score,
            verdict,
        );

        let db = self.db.read().map_err(|_| ExperienceError::LockPoisoned)?;
        let cf = db.cf_handle(CF_EXPERIENCES).expect("experiences cf exists");
        let bytes = bincode::serialize(&experience)
            .map_err(|e| ExperienceError::Serialization(e.to_string()))?;
        db.put_cf(&cf, experience_key(id).as_bytes(), bytes)?;

        Ok(experience)
    }

    fn scan_all(&self) -> ExperienceResult<Vec<AgentExperience>> {
        let db = self.db.read().map_err(|_| ExperienceError::LockPoisoned)?;
        let cf = db.cf_handle(CF_EXPERIENCES).expect("experiences cf exists");
        let mut experiences = Vec::new();
        for item in db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
            let (_, value) = item?;
            let experience: AgentExperience = bincode::deserialize(&value)
                .map_err(|e| ExperienceError::Deserialization(e.to_string()))?;
            experiences.push(experience);
        }
        Ok(experiences)
    }

    /// Secondary index over `session_id`, built the same way
    /// `StateStore::get_session_tasks` scans the full CF and filters in
    /// memory rather than maintaining a dedicated index structure.
    pub fn by_session(&self, session_id: &str) -> ExperienceResult<Vec<AgentExperience>> {
        Ok(self
            .scan_all()?
            .into_iter()
            .filter(|e| e.session_id == session_id)
            .collect())
    }

    /// Secondary index over `created_at`, returning experiences within
    /// `lookback_days` of now, newest first.
    pub fn recent(&self, lookback_days: i64) -> ExperienceResult<Vec<AgentExperience>> {
        let cutoff = Utc::now() - chrono::Duration::days(lookback_days);
        let mut experiences: Vec<AgentExperience> = self
            .scan_all()?
            .into_iter()
            .filter(|e| e.created_at >= cutoff)
            .collect();
        experiences.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(experiences)
    }

    /// Full-text-ish lookup over `problem_description`: case-insensitive
    /// substring/keyword overlap scoring, restricted to the default
    /// lookback window. A real full-text index (e.g. tantivy) is future
    /// work; this keeps the dependency stack unchanged for a feature
    /// that's advisory (experience is context, not a correctness input).
    pub fn similar_to(&self, problem_description: &str, limit: usize) -> ExperienceResult<Vec<AgentExperience>> {
        let query_words: Vec<String> = problem_description
            .to_lowercase()
            .split_whitespace()
            .map(|w| w.to_string())
            .collect();

        let mut scored: Vec<(usize, AgentExperience)> = self
            .recent(DEFAULT_LOOKBACK_DAYS)?
            .into_iter()
            .map(|e| {
                let lower = e.problem_description.to_lowercase();
                let overlap = query_words.iter().filter(|w| lower.contains(w.as_str())).count();
                (overlap, e)
            })
            .filter(|(overlap, _)| *overlap > 0)
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(limit).map(|(_, e)| e).collect())
    }
}
