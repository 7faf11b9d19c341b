//! `Router` — chooses fast vs. slow path from query features.
//!
//! Grounded on `router::classifier::PreRoutingClassifier`'s
//! complexity/risk scoring (that component picks a model tier from
//! near-identical formulas); generalized here to a binary FAST/SLOW
//! decision over arbitrary thresholds, instance-scoped per Design Notes.

use serde::{Deserialize, Serialize};

use super::types::{Path, QueryFeatures, ReasoningDecision};

/// Thresholds are instance-scoped (reconfigurable), never global.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RouterConfig {
    pub complexity_threshold: f32,
    pub risk_threshold: f32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            complexity_threshold: 0.6,
            risk_threshold: 0.5,
        }
    }
}

pub struct Router {
    config: RouterConfig,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    fn complexity(features: &QueryFeatures) -> f32 {
        0.2 * (features.file_count as f32 / 10.0).min(1.0)
            + 0.3 * (features.impact_nodes as f32 / 100.0).min(1.0)
            + 0.5 * (features.cyclomatic_complexity as f32 / 50.0).min(1.0)
    }

    fn risk(features: &QueryFeatures) -> f32 {
        let mut risk = 0.5 * features.regression_risk;
        if features.has_test_failure {
            risk += 0.3;
        }
        if features.touches_security_sink {
            risk += 0.2;
        }
        risk += 0.1 * (features.previous_attempts as f32 - 2.0).max(0.0);
        risk.clamp(0.0, 1.0)
    }

    /// `decide` applies the complexity/risk formulas and the SLOW
    /// decision rule (ties broken toward SLOW).
    pub fn decide(&self, features: &QueryFeatures) -> ReasoningDecision {
        let complexity_score = Self::complexity(features);
        let risk_score = Self::risk(features);

        let path = if complexity_score >= self.config.complexity_threshold
            || risk_score >= self.config.risk_threshold
            || features.touches_security_sink
        {
            Path::Slow
        } else {
            Path::Fast
        };

        let confidence = 1.0 - (1.0 - features.similar_success_rate) * 0.3;

        let reasoning = format!(
            "complexity={:.2} (threshold={:.2}), risk={:.2} (threshold={:.2}), security_sink={}",
            complexity_score,
            self.config.complexity_threshold,
            risk_score,
            self.config.risk_threshold,
            features.touches_security_sink,
        );

        ReasoningDecision {
            path,
            confidence,
            complexity_score,
            risk_score,
            reasoning,
        }
    }
}
