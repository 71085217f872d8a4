use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::Serialize;

use crate::aggregate;
use crate::callgraph::{CallGraph, CallGraphSummary};
use crate::error::AnalysisError;
use crate::graph::DependencyGraph;
use crate::metrics::ProjectMetrics;
use crate::patterns::PatternMatch;
use crate::smells::CodeSmell;
use crate::types::{Diagnostic, FileRecord, Language};

/// Directory tree of the analysed files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructureNode {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub children: Vec<StructureNode>,
    pub size_bytes: u64,
}

impl StructureNode {
    fn dir(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            is_dir: true,
            children: Vec::new(),
            size_bytes: 0,
        }
    }

    /// Build from `(relative path, size)` pairs. Directories sort before files, then by name.
    pub fn build<'a, I>(root_name: &str, files: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, u64)>,
    {
        let mut root = Self::dir(root_name, "");
        for (path, size) in files {
            root.insert(path, path, size);
        }
        root.finish();
        root
    }

    fn insert(&mut self, full_path: &str, rest: &str, size: u64) {
        match rest.split_once('/') {
            Some((dir, tail)) => {
                let dir_path = if self.path.is_empty() {
                    dir.to_string()
                } else {
                    format!("{}/{dir}", self.path)
                };
                let idx = match self.children.iter().position(|c| c.is_dir && c.name == dir) {
                    Some(idx) => idx,
                    None => {
                        self.children.push(Self::dir(dir, &dir_path));
                        self.children.len() - 1
                    }
                };
                self.children[idx].insert(full_path, tail, size);
            }
            None => self.children.push(Self {
                name: rest.to_string(),
                path: full_path.to_string(),
                is_dir: false,
                children: Vec::new(),
                size_bytes: size,
            }),
        }
    }

    /// Sort children and roll file sizes up into directories.
    fn finish(&mut self) -> u64 {
        if self.is_dir {
            self.children
                .sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
            self.size_bytes = self.children.iter_mut().map(Self::finish).sum();
        }
        self.size_bytes
    }
}

/// The root aggregate of one run. Read-only once built.
#[derive(Serialize)]
pub struct ProjectAnalysis {
    pub root_path: String,
    pub name: String,
    pub total_files: usize,
    pub total_lines: usize,
    pub languages: BTreeMap<Language, usize>,
    pub structure: StructureNode,
    pub files: IndexMap<String, FileRecord>,
    pub entry_points: Vec<String>,
    pub entry_functions: Vec<String>,
    pub dependency_cycles: Vec<Vec<String>>,
    pub topological_order: Option<Vec<String>>,
    pub dead_code: Vec<String>,
    pub unreachable: Vec<String>,
    pub call_graph: CallGraphSummary,
    pub patterns: Vec<PatternMatch>,
    pub smells: Vec<CodeSmell>,
    pub metrics: ProjectMetrics,
    pub diagnostics: Vec<Diagnostic>,
    /// `false` when the run budget ran out before every file was extracted.
    pub complete: bool,
    #[serde(skip)]
    pub dependency_graph: DependencyGraph,
    #[serde(skip)]
    pub function_graph: CallGraph,
}

impl ProjectAnalysis {
    /// Check the call-edge and import invariants of the resolved model.
    pub fn verify_call_symmetry(&self) -> Result<(), AnalysisError> {
        aggregate::verify_call_symmetry(&self.files)
    }

    /// Per-file and run-level diagnostics together.
    pub fn all_diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.files
            .values()
            .flat_map(|f| f.diagnostics.iter())
            .chain(self.diagnostics.iter())
    }

    pub fn has_cycles(&self) -> bool {
        !self.dependency_cycles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structure_directories_first() {
        let tree = StructureNode::build(
            "demo",
            [("z.py", 10), ("src/b.py", 5), ("src/a.py", 7), ("src/pkg/c.py", 1)],
        );
        assert_eq!(tree.name, "demo");
        assert_eq!(tree.size_bytes, 23);
        let names: Vec<&str> = tree.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["src", "z.py"]);

        let src = &tree.children[0];
        assert_eq!(src.path, "src");
        let names: Vec<&str> = src.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["pkg", "a.py", "b.py"]);
        assert_eq!(src.children[0].children[0].path, "src/pkg/c.py");
        assert_eq!(src.size_bytes, 13);
    }

    #[test]
    fn test_structure_serializes_contract_fields() {
        let tree = StructureNode::build("demo", [("a.py", 3)]);
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["is_dir"], true);
        assert_eq!(json["children"][0]["name"], "a.py");
        assert_eq!(json["children"][0]["is_dir"], false);
        assert_eq!(json["children"][0]["path"], "a.py");
    }
}
