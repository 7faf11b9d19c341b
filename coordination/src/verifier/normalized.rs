//! Normalized, machine-readable verifier output.
//!
//! Compact enough for inclusion in work packets and reviewer prompts.
//! Approximately 500–2000 bytes serialized vs 5–50 KB for full [`VerifierReport`].

use crate::feedback::error_parser::ErrorCategory;
use crate::verifier::report::VerifierReport;
use serde::{Deserialize, Serialize};

/// Compact summary of a single gate result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateSummary {
    pub gate: String,
    pub passed: bool,
    pub error_count: usize,
    pub warning_count: usize,
    pub duration_ms: u64,
}

/// Bucketed error counts by category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBucket {
    pub category: ErrorCategory,
    pub count: usize,
    /// Representative error message (first occurrence).
    pub sample_message: String,
    /// Representative file (first occurrence).
    pub sample_file: Option<String>,
}

/// Normalized, machine-readable verifier output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedOutput {
    /// Overall pass/fail.
    pub all_green: bool,
    /// Number of gates passed / total gates.
    pub gates_passed: usize,
    pub gates_total: usize,
    /// Per-gate compact summaries.
    pub gates: Vec<GateSummary>,
    /// Bucketed error counts by category.
    pub error_buckets: Vec<ErrorBucket>,
    /// Total error count across all gates.
    pub total_errors: usize,
    /// Total warning count across all gates.
    pub total_warnings: usize,
    /// Dominant error category (most frequent), if any.
    pub dominant_category: Option<ErrorCategory>,
    /// Total pipeline duration in ms.
    pub duration_ms: u64,
    /// First failing gate name, if any.
    pub first_failure: Option<String>,
}

impl NormalizedOutput {
    /// Normalize a full [`VerifierReport`] into compact form.
    pub fn from_report(report: &VerifierReport) -> Self {
        let gates: Vec<GateSummary> = report
            .gates
            .iter()
            .map(|g| GateSummary {
                gate: g.gate.clone(),
                passed: g.outcome.is_passed(),
                error_count: g.error_count,
                warning_count: g.warning_count,
                duration_ms: g.duration_ms,
            })
            .collect();

        // Aggregate errors by category from report.error_categories
        let mut buckets: Vec<ErrorBucket> = report
            .error_categories
            .iter()
            .map(|(cat, count)| {
                // Find first error of this category for sample
                let sample = report
                    .gates
                    .iter()
                    .flat_map(|g| g.errors.iter())
                    .find(|e| e.category == *cat);
                ErrorBucket {
                    category: *cat,
                    count: *count,
                    sample_message: sample.map(|e| e.message.clone()).unwrap_or_default(),
                    sample_file: sample.and_then(|e| e.file.clone()),
                }
            })
            .collect();
        // Most frequent first
        buckets.sort_by(|a, b| b.count.cmp(&a.count));

        let total_errors: usize = gates.iter().map(|g| g.error_count).sum();
        let total_warnings: usize = gates.iter().map(|g| g.warning_count).sum();
        let dominant_category = buckets.first().map(|b| b.category);
        let first_failure = gates.iter().find(|g| !g.passed).map(|g| g.gate.clone());

        NormalizedOutput {
            all_green: report.all_green,
            gates_passed: report.gates_passed,
            gates_total: report.gates_total,
            gates,
            error_buckets: buckets,
            total_errors,
            total_warnings,
            dominant_category,
            duration_ms: report.total_duration_ms,
            first_failure,
        }
    }

    /// Compact text summary for inclusion in prompts.
    ///
    /// Example: `[FAIL] 2/4 gates | 5 errors (borrow_checker:3, lifetime:2) | first_fail=check | 1200ms`
    pub fn compact_text(&self) -> String {
        let status = if self.all_green { "GREEN" } else { "FAIL" };
        let mut parts = vec![format!(
            "[{}] {}/{} gates",
            status, self.gates_passed, self.gates_total
        )];
        if self.total_errors > 0 {
            let cats: Vec<String> = self
                .error_buckets
                .iter()
                .take(3) // Top 3 categories
                .map(|b| format!("{}:{}", b.category, b.count))
                .collect();
            parts.push(format!(
                "{} errors ({})",
                self.total_errors,
                cats.join(", ")
            ));
        }
        if let Some(ref fail) = self.first_failure {
            parts.push(format!("first_fail={}", fail));
        }
        parts.push(format!("{}ms", self.duration_ms));
        parts.join(" | ")
    }

    /// JSON string for machine consumption.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"error":"serialization failed"}"#.to_string())
    }

    /// Whether there are errors in a specific category.
    pub fn has_category(&self, cat: ErrorCategory) -> bool {
        self.error_buckets.iter().any(|b| b.category == cat)
    }

    /// Count of errors in a specific category.
    pub fn category_count(&self, cat: ErrorCategory) -> usize {
        self.error_buckets
            .iter()
            .find(|b| b.category == cat)
            .map(|b| b.count)
            .unwrap_or(0)
    }
}
