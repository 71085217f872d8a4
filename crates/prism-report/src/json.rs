use anyhow::{Context, Result};
use serde::Serialize;

use prism_core::ProjectAnalysis;

use crate::check::{evaluate, CheckPolicy, CheckStatus};

fn to_json<T: Serialize>(value: &T, compact: bool) -> Result<String> {
    let json = if compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    };
    json.context("failed to serialize analysis")
}

/// Format a full analysis as JSON.
pub fn format_report(analysis: &ProjectAnalysis, compact: bool) -> Result<String> {
    to_json(analysis, compact)
}

/// Analysis plus pass/fail metadata.
#[derive(Serialize)]
pub struct CheckOutput<'a> {
    #[serde(flatten)]
    pub analysis: &'a ProjectAnalysis,
    pub check: CheckStatus,
}

/// Format a check result as JSON. Returns (json, passed).
pub fn format_check(analysis: &ProjectAnalysis, policy: CheckPolicy, compact: bool) -> Result<(String, bool)> {
    let check = evaluate(analysis, policy);
    let passed = check.passed;
    let json = to_json(&CheckOutput { analysis, check }, compact)?;
    Ok((json, passed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{clean_project, cyclic_project};

    #[test]
    fn test_format_report_contract_keys() {
        let json = format_report(&cyclic_project(), false).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).expect("should be valid JSON");
        for key in [
            "root_path",
            "name",
            "total_files",
            "languages",
            "structure",
            "files",
            "entry_points",
            "dependency_cycles",
            "dead_code",
            "call_graph",
            "metrics",
            "complete",
        ] {
            assert!(parsed.get(key).is_some(), "missing key {key}");
        }
        assert_eq!(parsed["total_files"], 2);
        assert_eq!(parsed["languages"]["python"], 2);
        assert!(parsed.get("dependency_graph").is_none());
    }

    #[test]
    fn test_compact_is_single_line() {
        let json = format_report(&clean_project(), true).unwrap();
        assert!(!json.contains('\n'), "compact JSON should be single line");
        let _: serde_json::Value = serde_json::from_str(&json).expect("should be valid JSON");
    }

    #[test]
    fn test_format_check_flattens_analysis() {
        let (json, passed) = format_check(&cyclic_project(), CheckPolicy::default(), false).unwrap();
        assert!(!passed);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(parsed.get("files").is_some());
        assert_eq!(parsed["check"]["passed"], false);
        assert_eq!(parsed["check"]["cycle_count"], 1);
        assert_eq!(parsed["check"]["policy"]["allow_cycles"], false);
    }

    #[test]
    fn test_report_is_deterministic() {
        let first = format_report(&cyclic_project(), true).unwrap();
        let second = format_report(&cyclic_project(), true).unwrap();
        assert_eq!(first, second);
    }
}
