//! `ReflectionJudge` — produces ACCEPT/REVISE/ROLLBACK/RETRY verdict with
//! confidence.
//!
//! Directly grounded on `escalation::engine::EscalationEngine::decide`:
//! that function already implements an ordered decision table over a
//! verification report producing a tiered verdict with confidence and
//! suggested fixes. `ReflectionJudge` generalizes its four-branch table
//! (ACCEPT/REVISE/ROLLBACK/RETRY replacing Worker/Council/Human tier
//! transitions).

use serde::{Deserialize, Serialize};

use crate::sandbox::{ExecutionResult, SecuritySeverity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Accept,
    Revise,
    Rollback,
    Retry,
}

/// `stability_level` is derived from the impact score: <0.2 STABLE, <0.5
/// MODERATE, <0.8 UNSTABLE, else CRITICAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphStability {
    Stable,
    Moderate,
    Unstable,
    Critical,
}

impl GraphStability {
    pub fn from_impact_score(impact_score: f32) -> Self {
        if impact_score < 0.2 {
            GraphStability::Stable
        } else if impact_score < 0.5 {
            GraphStability::Moderate
        } else if impact_score < 0.8 {
            GraphStability::Unstable
        } else {
            GraphStability::Critical
        }
    }
}

/// cfg/dfg node delta + impact radius summary, plus the new-exception
/// count the original attempt did not have.
#[derive(Debug, Clone)]
pub struct GraphImpact {
    pub impact_score: f32,
    pub new_exceptions: u32,
}

impl GraphImpact {
    pub fn stability_level(&self) -> GraphStability {
        GraphStability::from_impact_score(self.impact_score)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionVerdict {
    pub verdict: Verdict,
    pub confidence: f32,
    pub stability_level: GraphStability,
    pub critical_issues: Vec<String>,
    pub suggested_fixes: Vec<String>,
}

pub struct ReflectionJudge;

impl ReflectionJudge {
    pub fn new() -> Self {
        Self
    }

    fn geometric_mean_confidence(criteria: &[f32]) -> f32 {
        if criteria.is_empty() {
            return 0.5;
        }
        let product: f32 = criteria.iter().map(|c| c.max(1e-6)).product();
        product.powf(1.0 / criteria.len() as f32)
    }

    /// Evaluates the decision table in order; first match wins.
    pub fn judge(
        &self,
        result: &ExecutionResult,
        impact: &GraphImpact,
        criteria: &[f32],
    ) -> ReflectionVerdict {
        let stability = impact.stability_level();

        // 1. compile failure, critical security, or near-zero pass rate
        //    with tests actually run -> ROLLBACK.
        if !result.compile_success
            || result.security_severity == SecuritySeverity::Critical
            || (result.test_pass_rate < 0.3 && result.tests_run > 0)
        {
            let confidence =
                Self::geometric_mean_confidence(criteria).clamp(0.6, 1.0);
            return ReflectionVerdict {
                verdict: Verdict::Rollback,
                confidence,
                stability_level: stability,
                critical_issues: Self::critical_issues(result, impact),
                suggested_fixes: vec![],
            };
        }

        // 2. graph instability or new exceptions -> ROLLBACK.
        if stability == GraphStability::Critical || impact.new_exceptions > 0 {
            let confidence = Self::geometric_mean_confidence(criteria).clamp(0.6, 1.0);
            return ReflectionVerdict {
                verdict: Verdict::Rollback,
                confidence,
                stability_level: stability,
                critical_issues: Self::critical_issues(result, impact),
                suggested_fixes: vec![],
            };
        }

        // 3. strong pass rate, acceptable security, stable/moderate graph
        //    -> ACCEPT.
        if result.test_pass_rate >= 0.9
            && matches!(result.security_severity, SecuritySeverity::None | SecuritySeverity::Low)
            && matches!(stability, GraphStability::Stable | GraphStability::Moderate)
        {
            let confidence = Self::geometric_mean_confidence(criteria).clamp(0.5, 1.0);
            return ReflectionVerdict {
                verdict: Verdict::Accept,
                confidence,
                stability_level: stability,
                critical_issues: vec![],
                suggested_fixes: vec![],
            };
        }

        // 4. partial success -> REVISE with suggested fixes.
        if result.test_pass_rate >= 0.5 {
            let confidence = Self::geometric_mean_confidence(criteria);
            return ReflectionVerdict {
                verdict: Verdict::Revise,
                confidence,
                stability_level: stability,
                critical_issues: vec![],
                suggested_fixes: Self::suggest_fixes(result),
            };
        }

        // 5. otherwise -> RETRY with alternative strategy types.
        let confidence = Self::geometric_mean_confidence(criteria);
        ReflectionVerdict {
            verdict: Verdict::Retry,
            confidence,
            stability_level: stability,
            critical_issues: vec![],
            suggested_fixes: vec!["try an alternative strategy_type".to_string()],
        }
    }

    fn critical_issues(result: &ExecutionResult, impact: &GraphImpact) -> Vec<String> {
        let mut issues = Vec::new();
        if !result.compile_success {
            issues.push("compile failed".to_string());
        }
        if result.security_severity == SecuritySeverity::Critical {
            issues.push("critical security severity".to_string());
        }
        if impact.new_exceptions > 0 {
            issues.push(format!("{} new exception paths", impact.new_exceptions));
        }
        issues
    }

    fn suggest_fixes(result: &ExecutionResult) -> Vec<String> {
        let mut fixes = Vec::new();
        if result.tests_failed > 0 {
            fixes.push(format!("address {} failing test(s)", result.tests_failed));
        }
        if result.lint_errors > 0 {
            fixes.push(format!("resolve {} lint error(s)", result.lint_errors));
        }
        fixes
    }
}

impl Default for ReflectionJudge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ExecutionStatus;

    fn result(compile_success: bool, tests_run: u32, tests_passed: u32, severity: SecuritySeverity) -> ExecutionResult {
        ExecutionResult {
            strategy_id: "s1".into(),
            status: ExecutionStatus::Success,
            compile_success,
            tests_run,
            tests_passed,
            tests_failed: tests_run.saturating_sub(tests_passed),
            test_pass_rate: ExecutionResult::pass_rate(tests_run, tests_passed),
            lint_errors: 0,
            lint_warnings: 0,
            security_severity: severity,
            complexity_before: 0.0,
            complexity_after: 0.0,
            complexity_delta: 0.0,
            execution_time_ms: 100,
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    fn stable_impact() -> GraphImpact {
        GraphImpact { impact_score: 0.1, new_exceptions: 0 }
    }

    #[test]
    fn test_compile_failure_rolls_back() {
        let judge = ReflectionJudge::new();
        let r = result(false, 0, 0, SecuritySeverity::None);
        let verdict = judge.judge(&r, &stable_impact(), &[0.5, 0.5]);
        assert_eq!(verdict.verdict, Verdict::Rollback);
        assert!(verdict.confidence >= 0.6);
    }

    #[test]
    fn test_all_tests_pass_accepts() {
        let judge = ReflectionJudge::new();
        let r = result(true, 10, 10, SecuritySeverity::None);
        let verdict = judge.judge(&r, &stable_impact(), &[0.9, 0.9, 0.9]);
        assert_eq!(verdict.verdict, Verdict::Accept);
    }

    #[test]
    fn test_partial_pass_revises() {
        let judge = ReflectionJudge::new();
        let r = result(true, 10, 6, SecuritySeverity::None);
        let verdict = judge.judge(&r, &stable_impact(), &[0.6, 0.6]);
        assert_eq!(verdict.verdict, Verdict::Revise);
        assert!(!verdict.suggested_fixes.is_empty());
    }

    #[test]
    fn test_low_pass_rate_retries() {
        let judge = ReflectionJudge::new();
        let r = result(true, 10, 4, SecuritySeverity::None);
        let verdict = judge.judge(&r, &stable_impact(), &[0.4]);
        assert_eq!(verdict.verdict, Verdict::Retry);
    }

    #[test]
    fn test_s6_timeout_scenario_retries() {
        // S6: a pure timeout (tests_run=0, no tests ever executed) does not
        // satisfy the ROLLBACK pass-rate clause (which requires
        // tests_run > 0), and test_pass_rate(0.0) is below the REVISE
        // threshold of 0.5, so the fallback RETRY branch fires.
        let judge = ReflectionJudge::new();
        let mut r = result(true, 0, 0, SecuritySeverity::None);
        r.exit_code = 124;
        let verdict = judge.judge(&r, &stable_impact(), &[0.3]);
        assert_eq!(verdict.verdict, Verdict::Retry);
    }
}
