//! Complexity, coupling, and documentation coverage.
//!
//! Complexity itself is counted during extraction; this module rolls it up and
//! derives the measures that need resolved call edges.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::types::{FileRecord, FunctionSymbol};

/// Per-file rollup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetrics {
    pub lines: usize,
    pub functions: usize,
    pub classes: usize,
    pub total_complexity: u32,
    pub max_complexity: u32,
    pub average_complexity: f64,
    /// Distinct symbols in other files called from this file.
    pub coupling: usize,
    /// Documented symbols over all symbols; `None` when the file has none.
    pub documentation_coverage: Option<f64>,
}

/// Whole-project rollup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetrics {
    pub total_files: usize,
    pub total_lines: usize,
    pub total_functions: usize,
    pub total_classes: usize,
    pub total_complexity: u32,
    pub max_complexity: u32,
    pub average_complexity: f64,
    pub average_coupling: f64,
    pub pure_functions: usize,
    pub documentation_coverage: Option<f64>,
}

/// `documented / total`, undefined for zero symbols.
pub fn documentation_coverage(documented: usize, total: usize) -> Option<f64> {
    (total > 0).then(|| documented as f64 / total as f64)
}

/// Resolved call targets of `function` defined outside `path`.
fn external_targets<'a>(function: &'a FunctionSymbol, path: &str) -> impl Iterator<Item = &'a str> + 'a {
    let path = path.to_string();
    function
        .call_sites
        .iter()
        .filter_map(|site| site.resolved.as_ref())
        .filter(move |target| target.file() != path)
        .map(|target| target.as_str())
}

/// Fill in coupling on every symbol and the file's metrics.
pub fn compute_file_metrics(record: &mut FileRecord) {
    let path = record.path.clone();
    let mut file_targets: BTreeSet<String> = BTreeSet::new();

    for function in &mut record.functions {
        let targets: BTreeSet<String> = external_targets(function, &path).map(str::to_string).collect();
        function.coupling = targets.len();
        file_targets.extend(targets);
    }
    for class in &mut record.classes {
        let mut class_targets: BTreeSet<String> = BTreeSet::new();
        for method in &mut class.methods {
            let targets: BTreeSet<String> = external_targets(method, &path).map(str::to_string).collect();
            method.coupling = targets.len();
            class_targets.extend(targets);
        }
        class.coupling = class_targets.len();
        file_targets.extend(class_targets);
    }

    let complexities: Vec<u32> = record.all_functions().map(|f| f.complexity).collect();
    let total_complexity: u32 = complexities.iter().sum();
    let max_complexity = complexities.iter().copied().max().unwrap_or(0);
    let average_complexity = if complexities.is_empty() {
        0.0
    } else {
        f64::from(total_complexity) / complexities.len() as f64
    };

    let function_count = complexities.len();
    let symbols = function_count + record.classes.len();
    let documented = record.all_functions().filter(|f| f.has_documentation).count()
        + record.classes.iter().filter(|c| c.has_documentation).count();

    record.metrics = FileMetrics {
        lines: record.line_count,
        functions: function_count,
        classes: record.classes.len(),
        total_complexity,
        max_complexity,
        average_complexity,
        coupling: file_targets.len(),
        documentation_coverage: documentation_coverage(documented, symbols),
    };
}

pub fn compute_project_metrics(files: &IndexMap<String, FileRecord>) -> ProjectMetrics {
    let mut metrics = ProjectMetrics {
        total_files: files.len(),
        ..ProjectMetrics::default()
    };
    let mut documented = 0;
    let mut coupling_sum = 0usize;

    for record in files.values() {
        metrics.total_lines += record.line_count;
        metrics.total_classes += record.classes.len();
        documented += record.classes.iter().filter(|c| c.has_documentation).count();
        for function in record.all_functions() {
            metrics.total_functions += 1;
            metrics.total_complexity += function.complexity;
            metrics.max_complexity = metrics.max_complexity.max(function.complexity);
            coupling_sum += function.coupling;
            if function.is_pure {
                metrics.pure_functions += 1;
            }
            if function.has_documentation {
                documented += 1;
            }
        }
    }

    if metrics.total_functions > 0 {
        metrics.average_complexity = f64::from(metrics.total_complexity) / metrics.total_functions as f64;
        metrics.average_coupling = coupling_sum as f64 / metrics.total_functions as f64;
    }
    metrics.documentation_coverage =
        documentation_coverage(documented, metrics.total_functions + metrics.total_classes);
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CallReceiver, CallSite, ClassKind, ClassSymbol, Language, LineRange, QualifiedName};

    fn resolved(target: &str) -> CallSite {
        let mut site = CallSite::new(QualifiedName(target.into()).short_name().to_string(), CallReceiver::Bare, 1);
        site.resolved = Some(QualifiedName(target.into()));
        site
    }

    #[test]
    fn test_documentation_coverage_null_without_symbols() {
        let mut record = FileRecord::empty("empty.py", Language::Python);
        compute_file_metrics(&mut record);
        assert_eq!(record.metrics.documentation_coverage, None);
        assert_eq!(documentation_coverage(0, 0), None);
        assert_eq!(documentation_coverage(0, 4), Some(0.0));
    }

    #[test]
    fn test_documentation_coverage_counts_functions_and_classes() {
        let mut record = FileRecord::empty("a.py", Language::Python);
        let mut documented = FunctionSymbol::new("a.py", None, "f", LineRange::new(1, 3));
        documented.has_documentation = true;
        record.functions.push(documented);
        record.functions.push(FunctionSymbol::new("a.py", None, "g", LineRange::new(4, 5)));
        let mut class = ClassSymbol::new("C", ClassKind::Class, LineRange::new(6, 9));
        class.has_documentation = true;
        record.classes.push(class);
        record.classes.push(ClassSymbol::new("D", ClassKind::Class, LineRange::new(10, 12)));

        compute_file_metrics(&mut record);
        assert_eq!(record.metrics.documentation_coverage, Some(0.5));
    }

    #[test]
    fn test_coupling_counts_distinct_external_targets() {
        let mut record = FileRecord::empty("a.py", Language::Python);
        let mut f = FunctionSymbol::new("a.py", None, "f", LineRange::new(1, 3));
        f.call_sites = vec![
            resolved("b.py::load"),
            resolved("b.py::load"),
            resolved("c.py::save"),
            resolved("a.py::local"),
            CallSite::new("print", CallReceiver::Bare, 2),
        ];
        record.functions.push(f);
        record.functions.push(FunctionSymbol::new("a.py", None, "local", LineRange::new(4, 5)));

        compute_file_metrics(&mut record);
        assert_eq!(record.functions[0].coupling, 2);
        assert_eq!(record.functions[1].coupling, 0);
        assert_eq!(record.metrics.coupling, 2);
    }

    #[test]
    fn test_complexity_rollup() {
        let mut record = FileRecord::empty("a.py", Language::Python);
        for (name, complexity) in [("a", 1), ("b", 4), ("c", 2)] {
            let mut f = FunctionSymbol::new("a.py", None, name, LineRange::new(1, 1));
            f.complexity = complexity;
            record.functions.push(f);
        }
        compute_file_metrics(&mut record);
        assert_eq!(record.metrics.total_complexity, 7);
        assert_eq!(record.metrics.max_complexity, 4);
        assert!((record.metrics.average_complexity - 7.0 / 3.0).abs() < 1e-9);

        let files: IndexMap<String, FileRecord> = [("a.py".to_string(), record)].into_iter().collect();
        let project = compute_project_metrics(&files);
        assert_eq!(project.total_functions, 3);
        assert_eq!(project.max_complexity, 4);
        assert_eq!(project.documentation_coverage, Some(0.0));
    }
}
