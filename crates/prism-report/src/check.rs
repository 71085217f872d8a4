use serde::Serialize;

use prism_core::types::Severity;
use prism_core::ProjectAnalysis;

/// What `prism check` treats as a failure.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CheckPolicy {
    pub allow_cycles: bool,
    pub fail_on_dead_code: bool,
}

/// Result of applying a [`CheckPolicy`] to an analysis.
#[derive(Debug, Clone, Serialize)]
pub struct CheckStatus {
    pub passed: bool,
    pub policy: CheckPolicy,
    pub cycle_count: usize,
    pub dead_code_count: usize,
    pub error_count: usize,
    pub failures: Vec<String>,
}

/// Cycles fail unless allowed, dead code fails when asked, and an incomplete
/// run always fails.
pub fn evaluate(analysis: &ProjectAnalysis, policy: CheckPolicy) -> CheckStatus {
    let cycle_count = analysis.dependency_cycles.len();
    let dead_code_count = analysis.dead_code.len();
    let error_count = analysis
        .all_diagnostics()
        .filter(|d| d.severity == Severity::Error)
        .count();

    let mut failures = Vec::new();
    if cycle_count > 0 && !policy.allow_cycles {
        failures.push(format!("{cycle_count} dependency cycle(s)"));
    }
    if dead_code_count > 0 && policy.fail_on_dead_code {
        failures.push(format!("{dead_code_count} dead code candidate(s)"));
    }
    if !analysis.complete {
        failures.push("analysis did not complete within its time budget".to_string());
    }

    CheckStatus {
        passed: failures.is_empty(),
        policy,
        cycle_count,
        dead_code_count,
        error_count,
        failures,
    }
}
