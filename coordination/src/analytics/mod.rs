//! Analytics — skill library, experience replay, and acceptance
//! tracking built on top of the experience repository's raw log.

pub mod error;
pub mod replay;
pub mod skills;
pub mod verification;

pub use error::AnalyticsError;
pub use skills::{Skill, SkillHint, SkillLibrary, SkillTrigger, TaskContext};
