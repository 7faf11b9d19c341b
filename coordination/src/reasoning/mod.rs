//! Reasoning Router & Tree-of-Thought Scheduler.
//!
//! Decides between a cheap linear path and an expensive search path;
//! when the expensive path is taken, generates N candidate strategies,
//! executes them with bounded parallelism, scores them, and ranks them.

pub mod router;
pub mod scorer;
pub mod strategy;
pub mod tot;
pub mod types;

pub use router::{Router, RouterConfig};
pub use scorer::{ImpactMetrics, Scorer, ScorerError};
pub use strategy::{StrategyGenerator, StrategyGeneratorError, TemplateStrategyGenerator};
pub use tot::{ToTConfig, ToTError, ToTExecutor};
pub use types::{
    Path, QueryFeatures, ReasoningDecision, Recommendation, ScoringWeights, Strategy,
    StrategyScore, StrategyType,
};
