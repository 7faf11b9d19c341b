//! `StrategyGenerator` — external collaborator interface (spec §4.2).
//!
//! Modeled as a trait with two implementations: a deterministic
//! `TemplateStrategyGenerator` fallback, and (in the `swarm-agents`
//! binary crate) an LLM-backed adapter. The core depends only on the
//! trait, matching the "duck-typed ports become tagged variants/explicit
//! interfaces" redesign flag — callers choose an implementation at
//! construction, not by probing capabilities at runtime.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use super::types::{Strategy, StrategyType};

#[derive(Debug, thiserror::Error)]
pub enum StrategyGeneratorError {
    #[error("LLM provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("generator timed out after {0:?}")]
    Timeout(Duration),
}

/// Given `(problem, context, strategy_type, index)` returns a Strategy
/// with non-empty `file_changes`. The generator MUST NOT block the
/// orchestrator indefinitely — timeouts are the caller's responsibility,
/// enforced by `ToTExecutor` wrapping each call in `tokio::time::timeout`.
#[async_trait]
pub trait StrategyGenerator: Send + Sync {
    async fn generate(
        &self,
        problem: &str,
        context: &str,
        strategy_type: StrategyType,
        index: u32,
    ) -> Result<Strategy, StrategyGeneratorError>;
}

/// Deterministic fallback used when the LLM-backed generator is
/// unavailable (`LLM_UNAVAILABLE`, logged but not propagated) — templates
/// keyed off problem keywords, per spec §4.2.
pub struct TemplateStrategyGenerator;

impl TemplateStrategyGenerator {
    pub fn new() -> Self {
        Self
    }

    fn template_for(problem: &str, strategy_type: StrategyType) -> (&'static str, &'static str) {
        let lower = problem.to_lowercase();
        if lower.contains("sql") || lower.contains("injection") {
            (
                "Parameterize query",
                "Replace string interpolation with bound parameters to eliminate SQL injection.",
            )
        } else if lower.contains("null") {
            (
                "Add null check",
                "Guard the access path with an explicit None/null check before dereferencing.",
            )
        } else if lower.contains("timeout") || lower.contains("hang") {
            (
                "Bound the operation",
                "Wrap the call in an explicit timeout and return a typed error on expiry.",
            )
        } else {
            match strategy_type {
                StrategyType::Minimal => (
                    "Minimal targeted fix",
                    "Smallest change that addresses the reported symptom directly.",
                ),
                StrategyType::Defensive => (
                    "Defensive guard",
                    "Add input validation and explicit error handling around the failure site.",
                ),
                StrategyType::Refactor => (
                    "Structural refactor",
                    "Restructure the surrounding code to remove the root cause.",
                ),
                StrategyType::SecurityHardened => (
                    "Security-hardened fix",
                    "Close the vulnerability and add a regression guard.",
                ),
                StrategyType::PerformanceFocused => (
                    "Performance-focused fix",
                    "Address the symptom while avoiding added allocations or copies.",
                ),
            }
        }
    }
}

impl Default for TemplateStrategyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StrategyGenerator for TemplateStrategyGenerator {
    async fn generate(
        &self,
        problem: &str,
        context: &str,
        strategy_type: StrategyType,
        index: u32,
    ) -> Result<Strategy, StrategyGeneratorError> {
        let strategy_id = Strategy::deterministic_id(problem, strategy_type, index);
        let (title, rationale) = Self::template_for(problem, strategy_type);

        let mut file_changes = HashMap::new();
        // The template generator cannot synthesize real edits; it emits a
        // placeholder file documenting the intended change so the
        // `file_changes` non-empty invariant holds even when the LLM
        // provider is unavailable.
        file_changes.insert(
            "TEMPLATE_STRATEGY.md".to_string(),
            format!(
                "# {title}\n\nProblem: {problem}\nContext: {context}\nRationale: {rationale}\n"
            ),
        );

        Ok(Strategy {
            strategy_id,
            strategy_type,
            title: title.to_string(),
            description: problem.to_string(),
            rationale: rationale.to_string(),
            file_changes,
            confidence: 0.3,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_template_generator_produces_nonempty_file_changes() {
        let generator = TemplateStrategyGenerator::new();
        let strategy = generator
            .generate("fix SQL injection", "ctx", StrategyType::SecurityHardened, 0)
            .await
            .unwrap();
        assert!(!strategy.file_changes.is_empty());
    }

    #[tokio::test]
    async fn test_template_generator_is_deterministic() {
        let generator = TemplateStrategyGenerator::new();
        let a = generator
            .generate("fix bug", "ctx", StrategyType::Minimal, 0)
            .await
            .unwrap();
        let b = generator
            .generate("fix bug", "ctx", StrategyType::Minimal, 0)
            .await
            .unwrap();
        assert_eq!(a.strategy_id, b.strategy_id);
    }

    #[tokio::test]
    async fn test_sql_keyword_selects_parameterize_template() {
        let generator = TemplateStrategyGenerator::new();
        let strategy = generator
            .generate("fix SQL injection in query builder", "ctx", StrategyType::Minimal, 0)
            .await
            .unwrap();
        assert_eq!(strategy.title, "Parameterize query");
    }
}
