//! `ToTExecutor` — parallel fan-out of generate→execute→collect.
//!
//! Grounded on `ensemble::coordinator::EnsembleCoordinator` (multiple
//! model results collected, then scored/voted), generalized from "N
//! models answer the same prompt" to "N strategies get executed and
//! scored". The bounded worker pool uses a `tokio::sync::Semaphore`, the
//! same primitive family the teacher favors over ad-hoc channel-based
//! fan-out for bounded concurrency.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::locks::{LockError, LockManager, LockType};
use crate::sandbox::{ExecutionResult, Language, SandboxRunner};

use super::scorer::{ImpactMetrics, Scorer};
use super::strategy::StrategyGenerator;
use super::types::{Strategy, StrategyScore, StrategyType};

#[derive(Debug, thiserror::Error)]
pub enum ToTError {
    #[error("lock acquisition failed: {0}")]
    Lock(#[from] LockError),

    #[error("all {0} strategies failed to compile")]
    AllStrategiesFailed(usize),
}

pub struct ToTConfig {
    /// Number of candidate strategies to generate (default 3-5).
    pub n_strategies: usize,
    pub per_strategy_timeout: Duration,
    pub lock_timeout: Duration,
    pub cpu_bound_limit: usize,
}

impl Default for ToTConfig {
    fn default() -> Self {
        Self {
            n_strategies: 3,
            per_strategy_timeout: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(10),
            cpu_bound_limit: 4,
        }
    }
}

pub struct ToTExecutor {
    generator: Arc<dyn StrategyGenerator>,
    lock_manager: Arc<LockManager>,
    scorer: Scorer,
    config: ToTConfig,
}

impl ToTExecutor {
    pub fn new(
        generator: Arc<dyn StrategyGenerator>,
        lock_manager: Arc<LockManager>,
        scorer: Scorer,
        config: ToTConfig,
    ) -> Self {
        Self {
            generator,
            lock_manager,
            scorer,
            config,
        }
    }

    /// **Generate phase**: N calls to `StrategyGenerator` varying
    /// `strategy_type` and `index`.
    pub async fn generate(&self, problem: &str, context: &str) -> Vec<Strategy> {
        let mut strategies = Vec::with_capacity(self.config.n_strategies);
        for index in 0..self.config.n_strategies as u32 {
            let strategy_type = StrategyType::ROTATION[index as usize % StrategyType::ROTATION.len()];
            match self.generator.generate(problem, context, strategy_type, index).await {
                Ok(strategy) => strategies.push(strategy),
                Err(e) => warn!(index, error = %e, "strategy generation failed, skipping"),
            }
        }
        strategies
    }

    /// **Execute phase**: acquire an ordered lock set over the union of
    /// affected paths, then fan out executions with bounded parallelism.
    /// A single strategy's failure never aborts the batch.
    pub async fn execute(
        &self,
        agent_id: &str,
        strategies: &[Strategy],
        language: Language,
    ) -> Result<Vec<ExecutionResult>, ToTError> {
        let mut paths: Vec<String> = strategies
            .iter()
            .flat_map(|s| s.file_changes.keys().cloned())
            .collect();
        paths.sort();
        paths.dedup();

        let acquired = self
            .lock_manager
            .acquire_ordered(agent_id, &paths, LockType::Write, self.config.lock_timeout)
            .await?;

        let semaphore = Arc::new(tokio::sync::Semaphore::new(
            strategies.len().min(self.config.cpu_bound_limit).max(1),
        ));

        let mut handles = Vec::with_capacity(strategies.len());
        for strategy in strategies {
            let permit = semaphore.clone();
            let strategy_id = strategy.strategy_id.clone();
            let file_changes = strategy.file_changes.clone();
            let timeout = self.config.per_strategy_timeout;
            let sandbox_id = format!("tot-{}", strategy_id);

            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore not closed");
                let sandbox = match SandboxRunner::create(&sandbox_id) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(strategy_id, error = %e, "sandbox creation failed");
                        return None;
                    }
                };
                let result = sandbox
                    .execute_code(&strategy_id, &file_changes, language, timeout)
                    .await;
                let _ = sandbox.destroy();
                match result {
                    Ok(r) => Some(r),
                    Err(e) => {
                        warn!(strategy_id, error = %e, "strategy execution failed");
                        None
                    }
                }
            }));
        }

        let mut results = Vec::with_capacity(strategies.len());
        for handle in handles {
            if let Ok(Some(result)) = handle.await {
                results.push(result);
            }
        }

        // Release in reverse acquisition order; the caller (Orchestrator)
        // owns the decision of when locks are released relative to
        // reflection, so this executor releases only the locks it itself
        // acquired here, immediately after collecting results.
        for path in acquired.iter().rev() {
            if let Err(e) = self.lock_manager.release(agent_id, path).await {
                warn!(path, error = %e, "failed to release lock after execution");
            }
        }

        Ok(results)
    }

    /// **Score phase**: score every result and rank, returning the top-K.
    pub fn score(
        &self,
        strategies: &[Strategy],
        results: &[ExecutionResult],
        k: usize,
    ) -> Result<Vec<StrategyScore>, ToTError> {
        let by_id: HashMap<&str, &Strategy> =
            strategies.iter().map(|s| (s.strategy_id.as_str(), s)).collect();

        let all_failed = results.iter().all(|r| !r.compile_success);
        if !results.is_empty() && all_failed {
            return Err(ToTError::AllStrategiesFailed(results.len()));
        }

        let scores: Vec<StrategyScore> = results
            .iter()
            .filter_map(|result| {
                by_id.get(result.strategy_id.as_str()).map(|strategy| {
                    self.scorer.score(strategy, result, &ImpactMetrics::default())
                })
            })
            .collect();

        Ok(Scorer::rank(scores, k))
    }
}
