//! Data model for the sandbox & process lifecycle subsystem.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Lifecycle states per sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SandboxStatus {
    Created,
    Ready,
    Executing,
    Draining,
    Destroyed,
}

/// Severity bucket reported by static/dynamic security checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecuritySeverity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

/// Disambiguates `exit_code` semantics on `ExecutionResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Success,
    Failure,
    Timeout,
    PolicyViolation,
}

/// Languages the sandbox can dispatch a test runner for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
}

/// One per Strategy execution. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub strategy_id: String,
    pub status: ExecutionStatus,
    pub compile_success: bool,
    pub tests_run: u32,
    pub tests_passed: u32,
    pub tests_failed: u32,
    pub test_pass_rate: f32,
    pub lint_errors: u32,
    pub lint_warnings: u32,
    pub security_severity: SecuritySeverity,
    pub complexity_before: f32,
    pub complexity_after: f32,
    pub complexity_delta: f32,
    pub execution_time_ms: u64,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    /// `test_pass_rate` is `0.0` when `tests_run=0` (Open Question 2) —
    /// the Scorer's `correctness` formula applies a separate compile-only
    /// fallback, not this field.
    pub fn pass_rate(tests_run: u32, tests_passed: u32) -> f32 {
        if tests_run == 0 {
            0.0
        } else {
            tests_passed as f32 / tests_run as f32
        }
    }
}

/// A process snapshot returned by `ProcessMonitor::list_processes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemProcess {
    pub pid: u32,
    pub name: String,
    pub status: String,
    pub cpu_percent: f32,
    pub memory_mb: f32,
    pub listening_ports: Vec<u16>,
    pub env: HashMap<String, String>,
}

impl SystemProcess {
    /// A process belongs to a sandbox iff its environment carries
    /// `SANDBOX_ID` equal to the queried id.
    pub fn belongs_to_sandbox(&self, sandbox_id: &str) -> bool {
        self.env
            .get("SANDBOX_ID")
            .map(|v| v == sandbox_id)
            .unwrap_or(false)
    }

    /// `status="zombie"` OR idle beyond `zombie_threshold_sec` with
    /// `cpu% < cpu_threshold`.
    pub fn is_zombie(&self, zombie_threshold_sec: u64, cpu_threshold: f32, idle_sec: u64) -> bool {
        self.status.eq_ignore_ascii_case("zombie")
            || (idle_sec >= zombie_threshold_sec && self.cpu_percent < cpu_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_rate_zero_tests_is_zero() {
        assert_eq!(ExecutionResult::pass_rate(0, 0), 0.0);
    }

    #[test]
    fn test_pass_rate_computes_fraction() {
        assert_eq!(ExecutionResult::pass_rate(10, 7), 0.7);
    }

    #[test]
    fn test_belongs_to_sandbox() {
        let mut env = HashMap::new();
        env.insert("SANDBOX_ID".to_string(), "sbx-1".to_string());
        let proc = SystemProcess {
            pid: 1,
            name: "python".into(),
            status: "running".into(),
            cpu_percent: 0.0,
            memory_mb: 0.0,
            listening_ports: vec![],
            env,
        };
        assert!(proc.belongs_to_sandbox("sbx-1"));
        assert!(!proc.belongs_to_sandbox("sbx-2"));
    }
}
