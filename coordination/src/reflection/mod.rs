//! Reflection & Fail-Safe Controller.
//!
//! After an execution result comes back, `ReflectionJudge` renders a
//! verdict (accept/revise/rollback/retry); `FailSafeController` tracks
//! consecutive failures per session and trips a cooldown before the
//! Orchestrator would otherwise spin forever.

pub mod failsafe;
pub mod judge;

pub use failsafe::{FailSafeConfig, FailSafeController, FailSafeOutcome, FailureHistory, FailSafeVerdict};
pub use judge::{GraphImpact, GraphStability, ReflectionJudge, ReflectionVerdict, Verdict};
