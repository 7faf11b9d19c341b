//! `Orchestrator` — top-level coordinator wiring the Router, ToT
//! Executor, Reflection/FailSafe controller, lock subsystem, sandbox,
//! and experience repository into a single request/response API.
//!
//! Top-level wiring is new code (the teacher has no single
//! "Orchestrator" type spanning router -> locks -> execution ->
//! reflection), but its composition-root construction -- a `Config`
//! consumed once at startup producing an immutable, fully-wired struct
//! with no `Option` fields for required collaborators -- follows the
//! "explicit two-phase construction" redesign flag and mirrors how
//! `ensemble::coordinator::EnsembleCoordinator::new` wires its voting/
//! context/arbitration managers eagerly rather than lazily.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::events::SharedEventBus;
use crate::experience::SharedExperienceRepository;
use crate::locks::{LockManager, SharedLockStore};
use crate::reasoning::{
    ImpactMetrics, Path, QueryFeatures, Recommendation, Router, RouterConfig, Scorer, ScorerError,
    ScoringWeights, Strategy, StrategyGenerator, StrategyType, ToTConfig, ToTError, ToTExecutor,
};
use crate::reflection::{
    FailSafeConfig, FailSafeController, FailSafeOutcome, GraphImpact, ReflectionJudge, Verdict,
};
use crate::sandbox::{ExecutionResult, Language, SandboxRunner};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("lock error: {0}")]
    Lock(#[from] crate::locks::LockError),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] crate::sandbox::SandboxError),

    #[error("tree-of-thought error: {0}")]
    ToT(#[from] ToTError),

    #[error("cooldown active for session {session_id}")]
    Cooldown { session_id: String },

    #[error("both slow and fast paths failed: {0}")]
    FastPathFailedCritical(String),
}

impl OrchestratorError {
    /// CLI exit-code mapping per spec §6: 0 ACCEPT, 10 REVISE-exhausted,
    /// 20 ROLLBACK, 30 FAST_PATH_FAILED_CRITICAL, 2 malformed input.
    /// Non-terminal errors (lock/sandbox/ToT) are surfaced as 20
    /// (treated as a rollback of the attempt) rather than a crash.
    pub fn exit_code(&self) -> i32 {
        match self {
            OrchestratorError::Validation(_) => 2,
            OrchestratorError::Cooldown { .. } => 30,
            OrchestratorError::FastPathFailedCritical(_) => 30,
            OrchestratorError::Lock(_) | OrchestratorError::Sandbox(_) | OrchestratorError::ToT(_) => 20,
        }
    }
}

/// Read from the environment at startup with documented defaults (spec
/// §6 "Environment variables consumed"). Construction is fallible only
/// on malformed values (a `VALIDATION` error), never a panic.
pub struct OrchestratorConfig {
    pub cooldown_minutes: i64,
    pub max_consecutive_failures: u32,
    pub lock_ttl_seconds: u64,
    pub lock_renewal_interval_seconds: u64,
    pub router: RouterConfig,
    pub scoring_weights: ScoringWeights,
    pub tot: ToTConfig,
    pub default_max_attempts: u32,
    pub language: Language,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cooldown_minutes: 30,
            max_consecutive_failures: 3,
            lock_ttl_seconds: 3600,
            lock_renewal_interval_seconds: 300,
            router: RouterConfig::default(),
            scoring_weights: ScoringWeights::default(),
            tot: ToTConfig::default(),
            default_max_attempts: 3,
            language: Language::Python,
        }
    }
}

impl OrchestratorConfig {
    /// Parses `COOLDOWN_MINUTES`, `MAX_CONSECUTIVE_FAILURES`,
    /// `LOCK_TTL_SECONDS`, and `LOCK_RENEWAL_INTERVAL_SECONDS`,
    /// falling back to documented defaults when unset and failing fast
    /// (VALIDATION, not a panic) on malformed values.
    pub fn from_env() -> Result<Self, OrchestratorError> {
        fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, OrchestratorError> {
            match std::env::var(name) {
                Ok(raw) => raw
                    .parse()
                    .map_err(|_| OrchestratorError::Validation(format!("malformed {name}: {raw}"))),
                Err(_) => Ok(default),
            }
        }

        let defaults = Self::default();
        Ok(Self {
            cooldown_minutes: parse_env("COOLDOWN_MINUTES", defaults.cooldown_minutes)?,
            max_consecutive_failures: parse_env(
                "MAX_CONSECUTIVE_FAILURES",
                defaults.max_consecutive_failures,
            )?,
            lock_ttl_seconds: parse_env("LOCK_TTL_SECONDS", defaults.lock_ttl_seconds)?,
            lock_renewal_interval_seconds: parse_env(
                "LOCK_RENEWAL_INTERVAL_SECONDS",
                defaults.lock_renewal_interval_seconds,
            )?,
            ..defaults
        })
    }
}

/// Orchestrator request (in-process API), spec §6.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorRequest {
    pub task_description: String,
    pub session_id: String,
    pub target_files: Vec<String>,
    pub code_snippet: Option<String>,
    pub max_attempts: Option<u32>,
}

/// Orchestrator response, spec §6.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorResponse {
    pub verdict: String,
    pub strategy_summary: String,
    pub score: f32,
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub errors: Vec<String>,
}

/// Crude, self-contained stand-ins for the complexity analyzer / risk
/// assessor / index-lookup external collaborators named in spec §4.12
/// step 1 (out of scope per spec §1: "the code-indexing and retrieval
/// subsystem"). Derives `QueryFeatures` from the request alone so the
/// Router has something to decide on when no richer analysis is wired
/// in; a production deployment replaces this with the real analyzer.
fn derive_query_features(request: &OrchestratorRequest, similar_success_rate: f32) -> QueryFeatures {
    let snippet = request.code_snippet.as_deref().unwrap_or_default();
    let lower_task = request.task_description.to_lowercase();
    let lower_snippet = snippet.to_lowercase();

    let touches_security_sink = ["sql", "injection", "eval(", "exec(", "os.system", "password", "secret"]
        .iter()
        .any(|kw| lower_task.contains(kw) || lower_snippet.contains(kw));

    let cyclomatic_complexity = ["if ", "for ", "while ", "match ", "elif "]
        .iter()
        .map(|kw| lower_snippet.matches(kw).count() as u32)
        .sum::<u32>();

    QueryFeatures {
        file_count: request.target_files.len() as u32,
        impact_nodes: (request.target_files.len() as u32) * 2,
        cyclomatic_complexity,
        has_test_failure: false,
        touches_security_sink,
        regression_risk: if touches_security_sink { 0.6 } else { 0.2 },
        similar_success_rate,
        previous_attempts: 0,
    }
}

/// Immutable, fully-wired composition root. Every collaborator is
/// required at construction time -- there are no `Option` fields for
/// things the orchestrator cannot function without (Design Notes:
/// "reject any `None` dependency at wire time").
pub struct Orchestrator {
    config: OrchestratorConfig,
    router: Router,
    generator: Arc<dyn StrategyGenerator>,
    lock_manager: Arc<LockManager>,
    scorer: Scorer,
    reflection: ReflectionJudge,
    failsafe: Arc<FailSafeController>,
    experience: SharedExperienceRepository,
    agent_id: String,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        generator: Arc<dyn StrategyGenerator>,
        lock_store: SharedLockStore,
        experience: SharedExperienceRepository,
        event_bus: Option<SharedEventBus>,
        agent_id: impl Into<String>,
    ) -> Result<Self, ScorerError> {
        let scorer = Scorer::new(config.scoring_weights)?;
        let router = Router::new(config.router);
        let lock_manager = Arc::new(
            LockManager::new(lock_store).with_default_ttl(config.lock_ttl_seconds),
        );
        let failsafe = Arc::new(FailSafeController::new(
            FailSafeConfig {
                max_consecutive_failures: config.max_consecutive_failures,
                cooldown_minutes: config.cooldown_minutes,
            },
            event_bus,
        ));

        Ok(Self {
            config,
            router,
            generator,
            lock_manager,
            scorer,
            reflection: ReflectionJudge::new(),
            failsafe,
            experience,
            agent_id: agent_id.into(),
        })
    }

    /// Entry point for one incoming task (spec §4.12 steps 1-6).
    pub async fn handle(&self, request: OrchestratorRequest) -> Result<OrchestratorResponse, OrchestratorError> {
        if request.session_id.trim().is_empty() {
            return Err(OrchestratorError::Validation("session_id must not be empty".into()));
        }
        if request.target_files.is_empty() {
            return Err(OrchestratorError::Validation("target_files must not be empty".into()));
        }

        let start = Instant::now();
        let max_attempts = request.max_attempts.unwrap_or(self.config.default_max_attempts).max(1);

        // Step 1: query features (external analyzers stand in here).
        let similar = self
            .experience
            .similar_to(&request.task_description, 5)
            .unwrap_or_default();
        let similar_success_rate = if similar.is_empty() {
            0.5
        } else {
            similar.iter().filter(|e| e.success).count() as f32 / similar.len() as f32
        };
        let features = derive_query_features(&request, similar_success_rate);

        // Step 2: Router decision.
        let decision = self.router.decide(&features);
        info!(session_id = %request.session_id, ?decision.path, "routing decision");

        let response = match decision.path {
            Path::Fast => self.run_fast_path(&request, start).await,
            Path::Slow => self.run_slow_path_with_failsafe(&request, max_attempts, start).await,
        };

        match &response {
            Ok(resp) => {
                let verdict = Self::verdict_from_label(&resp.verdict);
                let _ = self.experience.append(
                    &request.session_id,
                    &request.task_description,
                    "generic",
                    "n/a",
                    request.target_files.clone(),
                    resp.score,
                    verdict,
                );
            }
            Err(e) => warn!(session_id = %request.session_id, error = %e, "orchestrator request failed"),
        }

        response
    }

    fn verdict_from_label(label: &str) -> Verdict {
        match label {
            "ACCEPT" => Verdict::Accept,
            "ROLLBACK" => Verdict::Rollback,
            "RETRY" => Verdict::Retry,
            _ => Verdict::Revise,
        }
    }

    /// Step 3: fast path -- single strategy, single sandbox run.
    async fn run_fast_path(
        &self,
        request: &OrchestratorRequest,
        start: Instant,
    ) -> Result<OrchestratorResponse, OrchestratorError> {
        let context = request.code_snippet.clone().unwrap_or_default();
        let strategy = self
            .generator
            .generate(&request.task_description, &context, StrategyType::Minimal, 0)
            .await
            .unwrap_or_else(|_| Self::degraded_strategy(&request.task_description));

        let sandbox_id = format!("fast-{}", strategy.strategy_id);
        let sandbox = SandboxRunner::create(&sandbox_id)?;
        let result = sandbox
            .execute_code(
                &strategy.strategy_id,
                &strategy.file_changes,
                self.config.language,
                self.config.tot.per_strategy_timeout,
            )
            .await?;
        let _ = sandbox.destroy();

        let score = self.scorer.score(&strategy, &result, &ImpactMetrics::default());
        let verdict = if score.recommendation == Recommendation::Accept {
            "ACCEPT"
        } else {
            "REVISE"
        };

        Ok(OrchestratorResponse {
            verdict: verdict.to_string(),
            strategy_summary: strategy.title,
            score: score.total,
            attempts: 1,
            elapsed_ms: start.elapsed().as_millis() as u64,
            errors: vec![],
        })
    }

    /// Deterministic fallback strategy used when even the configured
    /// generator's own fallback errors out (`LLM_UNAVAILABLE`, logged
    /// but never propagated per spec §7).
    fn degraded_strategy(problem: &str) -> Strategy {
        let mut file_changes = std::collections::HashMap::new();
        file_changes.insert(
            "DEGRADED_STRATEGY.md".to_string(),
            format!("# Degraded strategy\n\nProblem: {problem}\n"),
        );
        Strategy {
            strategy_id: Strategy::deterministic_id(problem, StrategyType::Minimal, 0),
            strategy_type: StrategyType::Minimal,
            title: "Degraded fallback".to_string(),
            description: problem.to_string(),
            rationale: "generator unavailable".to_string(),
            file_changes,
            confidence: 0.1,
        }
    }

    /// Wraps the slow path in the `FailSafeController`, demoting to the
    /// fast path on cooldown or after the fail-safe trips (spec §4.11).
    async fn run_slow_path_with_failsafe(
        &self,
        request: &OrchestratorRequest,
        max_attempts: u32,
        start: Instant,
    ) -> Result<OrchestratorResponse, OrchestratorError> {
        let failsafe = self.failsafe.clone();
        let session_id = request.session_id.clone();

        let outcome = failsafe
            .wrap(&session_id, || self.run_slow_path(request, max_attempts, start))
            .await;

        match outcome {
            Ok(response) => Ok(response),
            Err(FailSafeOutcome::CooldownActive) => {
                info!(session_id = %request.session_id, "cooldown active, demoting to fast path");
                let mut response = self.run_fast_path(request, start).await?;
                response.errors.push("reason=cooldown".to_string());
                Ok(response)
            }
            Err(FailSafeOutcome::AttemptFailed { error, tripped }) => {
                if tripped {
                    warn!(session_id = %request.session_id, "fail-safe tripped, demoting to fast path");
                    match self.run_fast_path(request, start).await {
                        Ok(mut response) => {
                            response.errors.push(format!("reason=consecutive_failure_exceeded: {error}"));
                            Ok(response)
                        }
                        Err(fast_err) => Err(OrchestratorError::FastPathFailedCritical(format!(
                            "slow path failed ({error}), fast path also failed ({fast_err})"
                        ))),
                    }
                } else {
                    Err(error)
                }
            }
        }
    }

    /// Step 5: the slow path proper. Generates and executes N
    /// strategies, scores them, reflects on the top candidate, and
    /// loops on REVISE/RETRY up to `max_attempts`.
    async fn run_slow_path(
        &self,
        request: &OrchestratorRequest,
        max_attempts: u32,
        start: Instant,
    ) -> Result<OrchestratorResponse, OrchestratorError> {
        let context = request.code_snippet.clone().unwrap_or_default();
        let mut errors = Vec::new();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let executor = ToTExecutor::new(
                self.generator.clone(),
                self.lock_manager.clone(),
                self.scorer_clone(),
                self.fresh_tot_config(),
            );

            let strategies = executor.generate(&request.task_description, &context).await;
            if strategies.is_empty() {
                errors.push("all strategy generation attempts failed".to_string());
                return Ok(OrchestratorResponse {
                    verdict: "ROLLBACK".to_string(),
                    strategy_summary: String::new(),
                    score: 0.0,
                    attempts: attempt,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    errors,
                });
            }

            let results = executor
                .execute(&self.agent_id, &strategies, self.config.language)
                .await?;

            let scores = match executor.score(&strategies, &results, 1) {
                Ok(scores) => scores,
                Err(ToTError::AllStrategiesFailed(n)) => {
                    // Boundary behavior (spec §8): all N strategies fail
                    // to compile -> empty score set -> ROLLBACK.
                    errors.push(format!("all {n} strategies failed to compile"));
                    return Ok(OrchestratorResponse {
                        verdict: "ROLLBACK".to_string(),
                        strategy_summary: String::new(),
                        score: 0.0,
                        attempts: attempt,
                        elapsed_ms: start.elapsed().as_millis() as u64,
                        errors,
                    });
                }
                Err(e) => return Err(e.into()),
            };

            let Some(top) = scores.into_iter().next() else {
                errors.push("no strategy produced a result".to_string());
                return Ok(OrchestratorResponse {
                    verdict: "ROLLBACK".to_string(),
                    strategy_summary: String::new(),
                    score: 0.0,
                    attempts: attempt,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    errors,
                });
            };

            let strategy = strategies
                .iter()
                .find(|s| s.strategy_id == top.strategy_id)
                .expect("scored strategy must be present in the generated set");
            let result = results
                .iter()
                .find(|r| r.strategy_id == top.strategy_id)
                .expect("scored result must be present in the collected set");

            let criteria = [top.correctness, top.quality, top.security, top.maintainability, top.performance];
            let impact = Self::graph_impact_from(result);
            let verdict = self.reflection.judge(result, &impact, &criteria);

            let label = match verdict.verdict {
                Verdict::Accept => "ACCEPT",
                Verdict::Revise => "REVISE",
                Verdict::Rollback => "ROLLBACK",
                Verdict::Retry => "RETRY",
            };

            let is_terminal = matches!(verdict.verdict, Verdict::Accept | Verdict::Rollback);
            if is_terminal || attempt >= max_attempts {
                if !is_terminal {
                    errors.push(format!("max_attempts ({max_attempts}) reached without a terminal verdict"));
                }
                return Ok(OrchestratorResponse {
                    verdict: label.to_string(),
                    strategy_summary: strategy.title.clone(),
                    score: top.total,
                    attempts: attempt,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    errors,
                });
            }

            // REVISE or RETRY: re-enter the slow path (attempt counter
            // already incremented; RETRY additionally rotates the
            // strategy_type mix by re-generating on the next loop turn,
            // which `ToTExecutor::generate` already varies by index).
            errors.extend(verdict.suggested_fixes.iter().cloned());
        }
    }

    fn scorer_clone(&self) -> Scorer {
        Scorer::new(self.config.scoring_weights).expect("weights already validated at construction")
    }

    fn fresh_tot_config(&self) -> ToTConfig {
        ToTConfig {
            n_strategies: self.config.tot.n_strategies,
            per_strategy_timeout: self.config.tot.per_strategy_timeout,
            lock_timeout: self.config.tot.lock_timeout,
            cpu_bound_limit: self.config.tot.cpu_bound_limit,
        }
    }

    fn graph_impact_from(result: &ExecutionResult) -> GraphImpact {
        // No real static-analysis impact pass is wired in (out of
        // scope); derive a conservative proxy from the execution
        // result's own complexity delta so `ReflectionJudge`'s stability
        // branches are still exercised meaningfully.
        let impact_score = (result.complexity_delta.abs() / 10.0).clamp(0.0, 1.0);
        GraphImpact {
            impact_score,
            new_exceptions: 0,
        }
    }

    /// Releases every lock the caller's `agent_id` still holds, in
    /// reverse acquisition order, mirroring spec §4.12 step 6's shutdown
    /// behavior. `ToTExecutor::execute` already releases its own locks
    /// immediately after collection, so this is a safety net for any
    /// lock acquired outside that path (e.g. by a future caller of
    /// `acquire` directly).
    pub async fn release_all(&self, agent_id: &str) {
        if let Ok(locks) = self.lock_manager.list_locks().await {
            let mut held: Vec<String> = locks
                .into_iter()
                .filter(|l| l.agent_id == agent_id)
                .map(|l| l.file_path)
                .collect();
            held.sort();
            for path in held.into_iter().rev() {
                let _ = self.lock_manager.release(agent_id, &path).await;
            }
        }
    }

    pub fn lock_manager(&self) -> Arc<LockManager> {
        self.lock_manager.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experience::ExperienceRepository;
    use crate::locks::RocksDbLockStore;
    use crate::reasoning::TemplateStrategyGenerator;

    async fn orchestrator() -> (Orchestrator, tempfile::TempDir, tempfile::TempDir) {
        let lock_dir = tempfile::tempdir().unwrap();
        let exp_dir = tempfile::tempdir().unwrap();
        let lock_store = RocksDbLockStore::open(lock_dir.path().join("locks.db")).unwrap().shared();
        let experience = ExperienceRepository::open(exp_dir.path().join("exp.db")).unwrap().shared();
        let generator = Arc::new(TemplateStrategyGenerator::new());

        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default(),
            generator,
            lock_store,
            experience,
            None,
            "agent-test",
        )
        .unwrap();

        (orchestrator, lock_dir, exp_dir)
    }

    #[tokio::test]
    async fn test_empty_session_id_is_validation_error() {
        let (orchestrator, _d1, _d2) = orchestrator().await;
        let request = OrchestratorRequest {
            task_description: "add null check".into(),
            session_id: "".into(),
            target_files: vec!["svc.py".into()],
            code_snippet: None,
            max_attempts: None,
        };
        let result = orchestrator.handle(request).await;
        assert!(matches!(result, Err(OrchestratorError::Validation(_))));
        assert_eq!(result.unwrap_err().exit_code(), 2);
    }

    #[tokio::test]
    async fn test_empty_target_files_is_validation_error() {
        let (orchestrator, _d1, _d2) = orchestrator().await;
        let request = OrchestratorRequest {
            task_description: "add null check".into(),
            session_id: "s1".into(),
            target_files: vec![],
            code_snippet: None,
            max_attempts: None,
        };
        let result = orchestrator.handle(request).await;
        assert!(matches!(result, Err(OrchestratorError::Validation(_))));
    }

    #[tokio::test]
    async fn test_s1_simple_fast_path_low_complexity() {
        let (orchestrator, _d1, _d2) = orchestrator().await;
        let request = OrchestratorRequest {
            task_description: "add null check".into(),
            session_id: "s1".into(),
            target_files: vec!["svc.py".into()],
            code_snippet: Some("def f(x):\n    return x.value\n".into()),
            max_attempts: None,
        };
        // Template generator can't run real tests, but the call must at
        // least route FAST and complete without error for this
        // low-complexity, low-risk input (spec scenario S1's routing
        // half; compile/test outcomes depend on the external generator).
        let result = orchestrator.handle(request).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_security_sink_routes_slow_and_returns_terminal_verdict() {
        let (orchestrator, _d1, _d2) = orchestrator().await;
        let request = OrchestratorRequest {
            task_description: "fix SQL injection".into(),
            session_id: "s2".into(),
            target_files: vec!["db.py".into()],
            code_snippet: Some("db.execute(f\"SELECT * FROM t WHERE id={amount}\")".into()),
            max_attempts: Some(1),
        };
        let result = orchestrator.handle(request).await.unwrap();
        assert!(matches!(result.verdict.as_str(), "ACCEPT" | "REVISE" | "ROLLBACK" | "RETRY"));
    }
}
