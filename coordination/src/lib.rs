//! Coordination core: the reasoning router, reflection/fail-safe
//! controller, multi-agent lock/deadlock subsystem, and sandbox/process
//! lifecycle manager for the code-modification orchestrator.
//!
//! A handful of ambient modules carried over from the agent harness this
//! crate grew out of remain as supporting infrastructure: `harness`
//! (session/feature tracking and git checkpoints used by the CLI),
//! `escalation`/`verifier`/`feedback`/`work_packet`/`analytics`/
//! `context_packer` (the compile-feedback and verification pipeline the
//! sandbox's test/lint step builds on), and `events`/`state` (the
//! pub/sub bus the deadlock detector and fail-safe controller publish
//! to). Everything else from the original harness binary (the ensemble
//! voting coordinator, council delegation, SLURM endpoint management,
//! rollout gating, and similar) was specific to that binary's MCP tool
//! surface and has no counterpart here.
//!
//! # Usage
//!
//! ```bash
//! orchestrator run "add a null check" --files svc.py --session-id s1
//! ```

#![allow(dead_code)]
#![allow(clippy::uninlined_format_args)]

pub mod analytics;
pub mod context_packer;
pub mod escalation;
pub mod events;
pub mod experience;
pub mod feedback;
pub mod harness;
pub mod locks;
pub mod orchestrator;
pub mod reasoning;
pub mod reflection;
pub mod sandbox;
pub mod state;
pub mod verifier;
pub mod work_packet;

// Re-export key harness types
pub use harness::{load_session_state, save_session_state};
pub use harness::{
    FeatureCategory, FeatureSpec, GitManager, HarnessConfig, HarnessError, HarnessResult,
    HarnessState, InterventionType, PendingIntervention, ProgressEntry, ProgressMarker,
    ProgressTracker, SessionManager, SessionState, SessionStatus, SessionSummary, StartupContext,
};

// Re-export key state types
pub use state::{
    EnsembleSession, EnsembleTask, ModelId, ModelResult, SharedContext, SharedStateStore,
    StateStore, TaskStatus, VoteRecord, VotingStrategy,
};

// Re-export key event types
pub use events::{
    ArbitrationReason, ContextUpdater, EnsembleEvent, EventHistory, SessionEndReason,
    SharedEventBus,
};

// Re-export verifier types
pub use verifier::{GateOutcome, GateResult, Verifier, VerifierConfig, VerifierReport};

// Re-export escalation types
pub use escalation::{
    EscalationDecision, EscalationEngine, EscalationState, SwarmTier, TierBudget, TurnPolicy,
};

// Re-export telemetry heuristic types
pub use escalation::{compute_heuristics, SessionSample, TelemetryHeuristics};

// Re-export friction detection types
pub use escalation::{FrictionDetector, FrictionKind, FrictionSeverity, FrictionSignal};

// Re-export delight detection types
pub use escalation::{DelightDetector, DelightIntensity, DelightKind, DelightSignal};

// Re-export work packet types
pub use work_packet::{Constraint, FileContext, KeySymbol, WorkPacket, WorkPacketGenerator};

// Re-export context packer types
pub use context_packer::{ContextPacker, FileWalker};

// Re-export lock & deadlock subsystem types
pub use locks::{
    AgentSession, AgentState, Conflict, CycleReport, DeadlockDetector, DeadlockError,
    DriftDetectionResult, FileHasher, LockError, LockKeeper, LockLost, LockManager, LockRecord,
    LockResult, LockStore, LockStoreError, LockType, Renewer, RocksDbLockStore, SharedLockStore,
    SqliteLockStore, WaitEdge,
};

// Re-export reasoning router / tree-of-thought scheduler types
pub use reasoning::{
    ImpactMetrics, Path as ReasoningPath, QueryFeatures, ReasoningDecision, Recommendation, Router,
    RouterConfig, Scorer, ScorerError, ScoringWeights, Strategy, StrategyGenerator,
    StrategyGeneratorError, StrategyScore, StrategyType, TemplateStrategyGenerator, ToTConfig,
    ToTError, ToTExecutor,
};

// Re-export reflection & fail-safe controller types
pub use reflection::{
    FailSafeConfig, FailSafeController, FailSafeOutcome, FailSafeVerdict, FailureHistory,
    GraphImpact, GraphStability, ReflectionJudge, ReflectionVerdict, Verdict,
};

// Re-export sandbox & process lifecycle types
pub use sandbox::{
    ExecutionResult, ExecutionStatus, Language, ProcessMonitor, ProcessMonitorConfig,
    ProcessMonitorError, SandboxConfig, SandboxError, SandboxResult, SandboxRunner,
    SandboxStatus, SecurityPolicy, SecuritySeverity, SystemProcess,
};

// Re-export experience repository types
pub use experience::{AgentExperience, ExperienceError, ExperienceRepository, ExperienceResult, SharedExperienceRepository};

// Re-export orchestrator types
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorError, OrchestratorRequest, OrchestratorResponse};

// Re-export skill library types
pub use analytics::{Skill, SkillHint, SkillLibrary, SkillTrigger, TaskContext};
