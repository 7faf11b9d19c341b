//! `Scorer` — maps an `ExecutionResult` into a weighted multi-criteria
//! score.
//!
//! Criteria formulas and the ranking tie-break are grounded on
//! `ensemble::voting::VotingProtocol`'s outcome/tie-break structure,
//! generalized from "rank model votes" to "rank strategy executions".

use crate::sandbox::{ExecutionResult, SecuritySeverity};

use super::types::{Recommendation, ScoringWeights, Strategy, StrategyScore};

#[derive(Debug, thiserror::Error)]
pub enum ScorerError {
    #[error("scoring weights must sum to 1.0, got {0}")]
    InvalidWeights(f32),
}

/// Additional, execution-independent inputs to `quality`/`maintainability`/
/// `performance` that a full impact-analysis pass would provide. Optional:
/// default to zero impact when unavailable (the formulas still hold).
#[derive(Debug, Clone, Default)]
pub struct ImpactMetrics {
    pub type_errors: u32,
    pub cfg_changes: u32,
    pub dfg_changes: u32,
    pub memory_delta_mb: f32,
}

pub struct Scorer {
    weights: ScoringWeights,
}

impl Scorer {
    /// Construction validates the weight vector sums to 1.0 ± 1e-6,
    /// raising before any scoring occurs (Invariant 4).
    pub fn new(weights: ScoringWeights) -> Result<Self, ScorerError> {
        if !weights.is_valid() {
            return Err(ScorerError::InvalidWeights(weights.sum()));
        }
        Ok(Self { weights })
    }

    fn correctness(result: &ExecutionResult) -> f32 {
        if !result.compile_success {
            return 0.0;
        }
        // Open Question 2: a no-test run with compile success yields 0.3,
        // not 0 — the compile-only fallback, not `test_pass_rate` itself.
        if result.tests_run == 0 {
            return 0.3;
        }
        0.3 * 1.0 + 0.7 * result.test_pass_rate
    }

    fn quality(result: &ExecutionResult, impact: &ImpactMetrics) -> f32 {
        let penalty = (0.05 * result.lint_errors as f32
            + 0.02 * result.lint_warnings as f32
            + 0.1 * impact.type_errors as f32)
            .clamp(0.0, 0.6);

        let complexity_bonus = (-result.complexity_delta).clamp(-0.2, 0.2);

        (1.0 - penalty + complexity_bonus).clamp(0.0, 1.0)
    }

    fn security(result: &ExecutionResult) -> f32 {
        match result.security_severity {
            SecuritySeverity::Critical => 0.0,
            SecuritySeverity::High => 0.2,
            SecuritySeverity::Medium => 0.5,
            SecuritySeverity::Low => 0.8,
            SecuritySeverity::None => 1.0,
        }
    }

    fn maintainability(impact: &ImpactMetrics) -> f32 {
        let cfg_penalty = (0.01 * impact.cfg_changes as f32).min(0.5);
        let dfg_penalty = (0.01 * impact.dfg_changes as f32).min(0.3);
        (1.0 - cfg_penalty - dfg_penalty).clamp(0.0, 1.0)
    }

    fn performance(result: &ExecutionResult, impact: &ImpactMetrics) -> f32 {
        let mut score = 1.0f32;
        if result.execution_time_ms > 10_000 {
            let over_secs = (result.execution_time_ms - 10_000) as f32 / 1000.0;
            score -= (0.05 * over_secs).min(0.5);
        }
        if impact.memory_delta_mb > 100.0 {
            let over_mb = impact.memory_delta_mb - 100.0;
            score -= (0.003 * over_mb).min(0.3);
        }
        score.clamp(0.0, 1.0)
    }

    /// Computes the five criteria, the weighted total (with the
    /// after-sum security veto applied per Open Question 1), and a
    /// geometric-mean-derived confidence.
    pub fn score(
        &self,
        strategy: &Strategy,
        result: &ExecutionResult,
        impact: &ImpactMetrics,
    ) -> StrategyScore {
        let correctness = Self::correctness(result);
        let quality = Self::quality(result, impact);
        let security = Self::security(result);
        let maintainability = Self::maintainability(impact);
        let performance = Self::performance(result, impact);

        let mut total = self.weights.correctness * correctness
            + self.weights.quality * quality
            + self.weights.security * security
            + self.weights.maintainability * maintainability
            + self.weights.performance * performance;

        // Security veto: applied AFTER the weighted sum (Open Question 1).
        if matches!(
            result.security_severity,
            SecuritySeverity::High | SecuritySeverity::Critical
        ) {
            total = total.min(0.4);
        }

        let criteria = [correctness, quality, security, maintainability, performance];
        let product: f32 = criteria.iter().map(|c| c.max(1e-6)).product();
        let confidence = product.powf(1.0 / criteria.len() as f32);

        let recommendation = if total >= 0.8 {
            Recommendation::Accept
        } else if total >= 0.5 {
            Recommendation::Revise
        } else {
            Recommendation::Reject
        };

        StrategyScore {
            strategy_id: strategy.strategy_id.clone(),
            correctness,
            quality,
            security,
            maintainability,
            performance,
            total,
            confidence,
            recommendation,
        }
    }

    /// Stable sort by `(-total, -confidence)`; returns the top `k`.
    pub fn rank(mut scores: Vec<StrategyScore>, k: usize) -> Vec<StrategyScore> {
        scores.sort_by(|a, b| {
            b.total
                .partial_cmp(&a.total)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal))
        });
        scores.truncate(k);
        scores
    }
}
