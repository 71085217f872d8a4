use colored::Colorize;

use prism_core::metrics::ProjectMetrics;
use prism_core::types::Severity;
use prism_core::ProjectAnalysis;

use crate::check::{evaluate, CheckPolicy};

/// Items listed per section before the rest is summarised.
const LIST_LIMIT: usize = 20;

/// Format a full analysis report for terminal output.
pub fn format_report(analysis: &ProjectAnalysis) -> String {
    let mut out = String::new();

    out.push_str(&format!("\n{}\n", "Prism - Structure Analysis".bold()));
    out.push_str(&format!("{}\n\n", "=".repeat(40)));

    out.push_str(&format!(
        "{}: {} ({} files, {} lines)\n",
        "Project".bold(),
        analysis.name,
        analysis.total_files,
        analysis.total_lines,
    ));
    if !analysis.languages.is_empty() {
        let languages: Vec<String> = analysis
            .languages
            .iter()
            .map(|(lang, count)| format!("{lang}: {count}"))
            .collect();
        out.push_str(&format!("  Languages: {}\n", languages.join(", ")));
    }
    if !analysis.entry_points.is_empty() {
        out.push_str(&format!("  Entry points: {}\n", analysis.entry_points.join(", ")));
    }

    out.push_str(&format_metrics_section(&analysis.metrics));

    // Dependencies
    out.push_str(&format!("\n{}\n{}\n", "Dependencies".bold(), "-".repeat(40)));
    if analysis.dependency_cycles.is_empty() {
        out.push_str(&format!("  {}\n", "No dependency cycles".green()));
        if let Some(order) = &analysis.topological_order {
            out.push_str(&format!("  Build order: {}\n", order.join(" -> ")));
        }
    } else {
        out.push_str(&format!(
            "  {} ({})\n",
            "Dependency cycles".red().bold(),
            analysis.dependency_cycles.len()
        ));
        for cycle in &analysis.dependency_cycles {
            out.push_str(&format!("    {}\n", cycle.join(" -> ")));
        }
    }

    // Call graph
    out.push_str(&format!("\n{}\n{}\n", "Call Graph".bold(), "-".repeat(40)));
    out.push_str(&format!(
        "  {} functions, {} resolved calls\n",
        analysis.call_graph.nodes.len(),
        analysis.call_graph.edges.len()
    ));
    push_list(&mut out, "Dead code", &analysis.dead_code, |s| s.yellow().to_string());
    push_list(&mut out, "Unreachable", &analysis.unreachable, |s| s.yellow().to_string());

    // Patterns
    if !analysis.patterns.is_empty() {
        out.push_str(&format!(
            "\n{} ({} found)\n{}\n",
            "Patterns".bold(),
            analysis.patterns.len(),
            "-".repeat(40)
        ));
        for pattern in analysis.patterns.iter().take(LIST_LIMIT) {
            out.push_str(&format!(
                "  {} {} ({:.0}%)\n",
                pattern.kind.to_string().cyan().bold(),
                pattern.symbols.join(", "),
                pattern.confidence * 100.0,
            ));
            for evidence in &pattern.evidence {
                out.push_str(&format!("    - {evidence}\n"));
            }
        }
    }

    // Smells
    if !analysis.smells.is_empty() {
        out.push_str(&format!(
            "\n{} ({} found)\n{}\n",
            "Code Smells".bold(),
            analysis.smells.len(),
            "-".repeat(40)
        ));
        for smell in analysis.smells.iter().take(LIST_LIMIT) {
            out.push_str(&format!(
                "  {} [{}] {}:{}\n    {}\n",
                severity_label(smell.severity),
                smell.kind,
                smell.path,
                smell.line,
                smell.message,
            ));
        }
        if analysis.smells.len() > LIST_LIMIT {
            out.push_str(&format!("  ... and {} more\n", analysis.smells.len() - LIST_LIMIT));
        }
    }

    // Diagnostics
    let diagnostics: Vec<_> = analysis.all_diagnostics().collect();
    if !diagnostics.is_empty() {
        out.push_str(&format!(
            "\n{} ({})\n{}\n",
            "Diagnostics".bold(),
            diagnostics.len(),
            "-".repeat(40)
        ));
        for diagnostic in diagnostics.iter().take(LIST_LIMIT) {
            out.push_str(&format!("  {} {diagnostic}\n", severity_label(diagnostic.severity)));
        }
    }
    if !analysis.complete {
        out.push_str(&format!(
            "\n{}\n",
            "Analysis incomplete: time budget exhausted, results are partial".red().bold()
        ));
    }

    out.push('\n');
    out
}

fn format_metrics_section(metrics: &ProjectMetrics) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n{}\n{}\n", "Metrics".bold(), "-".repeat(40)));
    out.push_str(&format!(
        "  Functions: {}, classes: {}, pure functions: {}\n",
        metrics.total_functions, metrics.total_classes, metrics.pure_functions
    ));

    let avg = format!("{:.1}", metrics.average_complexity);
    let avg = if metrics.average_complexity <= 5.0 {
        avg.green()
    } else if metrics.average_complexity <= 10.0 {
        avg.yellow()
    } else {
        avg.red()
    };
    out.push_str(&format!(
        "  Complexity: avg={avg}, max={}\n",
        metrics.max_complexity
    ));
    out.push_str(&format!("  Average coupling: {:.1}\n", metrics.average_coupling));
    match metrics.documentation_coverage {
        Some(coverage) => out.push_str(&format!("  Documentation coverage: {:.0}%\n", coverage * 100.0)),
        None => out.push_str("  Documentation coverage: n/a\n"),
    }
    out
}

fn push_list(out: &mut String, title: &str, items: &[String], paint: impl Fn(&str) -> String) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("  {title} ({}):\n", items.len()));
    for item in items.iter().take(LIST_LIMIT) {
        out.push_str(&format!("    {}\n", paint(item)));
    }
    if items.len() > LIST_LIMIT {
        out.push_str(&format!("    ... and {} more\n", items.len() - LIST_LIMIT));
    }
}

fn severity_label(severity: Severity) -> String {
    match severity {
        Severity::Error => "ERROR".red().bold().to_string(),
        Severity::Warning => "WARN".yellow().bold().to_string(),
        Severity::Info => "INFO".blue().bold().to_string(),
    }
}

/// Format a check result for CI use. Returns (text, passed).
pub fn format_check(analysis: &ProjectAnalysis, policy: CheckPolicy) -> (String, bool) {
    let status = evaluate(analysis, policy);
    let mut out = format_report(analysis);
    if status.passed {
        out.push_str(&format!("{}\n", "CHECK PASSED".green().bold()));
    } else {
        out.push_str(&format!(
            "{}: {}\n",
            "CHECK FAILED".red().bold(),
            status.failures.join("; ")
        ));
    }
    (out, status.passed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{clean_project, cyclic_project};

    fn plain() {
        colored::control::set_override(false);
    }

    #[test]
    fn test_report_lists_cycles_and_dead_code() {
        plain();
        let report = format_report(&cyclic_project());
        assert!(report.contains("Prism - Structure Analysis"));
        assert!(report.contains("Dependency cycles (1)"));
        assert!(report.contains("a.py::unused"));
        assert!(report.contains("python: 2"));
    }

    #[test]
    fn test_report_shows_build_order_when_acyclic() {
        plain();
        let report = format_report(&clean_project());
        assert!(report.contains("No dependency cycles"));
        assert!(report.contains("Build order: main.py"));
        assert!(report.contains("Documentation coverage: 100%"));
    }

    #[test]
    fn test_format_check_verdicts() {
        plain();
        let (failed, passed) = format_check(&cyclic_project(), CheckPolicy::default());
        assert!(!passed);
        assert!(failed.contains("CHECK FAILED: 1 dependency cycle(s)"));

        let (ok, passed) = format_check(&clean_project(), CheckPolicy::default());
        assert!(passed);
        assert!(ok.contains("CHECK PASSED"));
    }
}
