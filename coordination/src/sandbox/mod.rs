//! Sandbox & process lifecycle subsystem.
//!
//! Isolated execution of generated code with timeout, zombie reaping,
//! port cleanup, and retry-with-exponential-backoff.

pub mod process_monitor;
pub mod runner;
pub mod types;

pub use process_monitor::{ProcessMonitor, ProcessMonitorConfig, ProcessMonitorError};
pub use runner::{SandboxConfig, SandboxError, SandboxResult, SandboxRunner, SecurityPolicy};
pub use types::{
    ExecutionResult, ExecutionStatus, Language, SandboxStatus, SecuritySeverity, SystemProcess,
};
