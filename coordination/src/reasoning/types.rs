//! Data model shared by the Router, ToT Executor, and Scorer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Path chosen by the `Router`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Path {
    Fast,
    Slow,
}

/// Input to `Router::decide`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryFeatures {
    pub file_count: u32,
    pub impact_nodes: u32,
    pub cyclomatic_complexity: u32,
    pub has_test_failure: bool,
    pub touches_security_sink: bool,
    /// Regression risk in `[0, 1]`.
    pub regression_risk: f32,
    /// Historical success rate of similar tasks, in `[0, 1]`.
    pub similar_success_rate: f32,
    pub previous_attempts: u32,
}

/// Output of `Router::decide`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningDecision {
    pub path: Path,
    pub confidence: f32,
    pub complexity_score: f32,
    pub risk_score: f32,
    pub reasoning: String,
}

/// A candidate strategy type, used to vary `StrategyGenerator` calls
/// across the ToT fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    Minimal,
    Defensive,
    Refactor,
    SecurityHardened,
    PerformanceFocused,
}

impl StrategyType {
    /// The default rotation used by `ToTExecutor::generate` when varying
    /// `strategy_type` across N calls.
    pub const ROTATION: [StrategyType; 5] = [
        StrategyType::Minimal,
        StrategyType::Defensive,
        StrategyType::Refactor,
        StrategyType::SecurityHardened,
        StrategyType::PerformanceFocused,
    ];
}

/// Immutable after creation. `file_changes` values are full new file
/// contents (not diffs), keyed by repository-relative forward-slash
/// paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub strategy_id: String,
    pub strategy_type: StrategyType,
    pub title: String,
    pub description: String,
    pub rationale: String,
    pub file_changes: HashMap<String, String>,
    pub confidence: f32,
}

impl Strategy {
    /// Deterministic ULID-like id derived from the problem, strategy
    /// type, and fan-out index — guarantees the idempotency property
    /// (same session + same target files -> same strategy_ids) when the
    /// generator itself is deterministic.
    pub fn deterministic_id(problem: &str, strategy_type: StrategyType, index: u32) -> String {
        let hash = crate::locks::FileHasher::hash_bytes(
            format!("{problem}:{strategy_type:?}:{index}").as_bytes(),
        );
        format!("strat-{}", &hash[..26])
    }
}

/// Each criterion in `[0, 1]`; `total` is a weighted sum subject to the
/// security veto.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyScore {
    pub strategy_id: String,
    pub correctness: f32,
    pub quality: f32,
    pub security: f32,
    pub maintainability: f32,
    pub performance: f32,
    pub total: f32,
    pub confidence: f32,
    pub recommendation: Recommendation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    Accept,
    Revise,
    Reject,
}

/// Weights for the Scorer's weighted sum. MUST sum to 1.0 (validated at
/// construction).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub correctness: f32,
    pub quality: f32,
    pub security: f32,
    pub maintainability: f32,
    pub performance: f32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            correctness: 0.35,
            quality: 0.25,
            security: 0.20,
            maintainability: 0.10,
            performance: 0.10,
        }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f32 {
        self.correctness + self.quality + self.security + self.maintainability + self.performance
    }

    pub fn is_valid(&self) -> bool {
        (self.sum() - 1.0).abs() <= 1e-6
    }
}
