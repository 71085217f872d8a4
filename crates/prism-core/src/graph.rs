use std::collections::HashMap;

use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::types::FileRecord;

/// Edge in the file dependency graph: the first import statement that created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportLink {
    pub specifier: String,
    pub line: usize,
}

/// Directed file-level graph. An edge `a -> b` means `a` imports `b`.
pub struct DependencyGraph {
    graph: DiGraph<String, ImportLink>,
    index: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Build from resolved records: every file is a node, every internal import an edge.
    pub fn from_files(files: &IndexMap<String, FileRecord>) -> Self {
        let mut graph = Self::new();
        for path in files.keys() {
            graph.add_file(path);
        }
        for record in files.values() {
            for edge in &record.imports {
                if let Some(target) = edge.resolution.internal_target() {
                    if files.contains_key(target) {
                        graph.add_import(&record.path, target, &edge.specifier, edge.line);
                    }
                }
            }
        }
        graph
    }

    /// Add a file as a node. Returns the node index.
    pub fn add_file(&mut self, path: &str) -> NodeIndex {
        if let Some(&idx) = self.index.get(path) {
            return idx;
        }
        let idx = self.graph.add_node(path.to_string());
        self.index.insert(path.to_string(), idx);
        idx
    }

    /// Add an import edge. Repeated imports between the same pair collapse to one edge.
    pub fn add_import(&mut self, from: &str, to: &str, specifier: &str, line: usize) {
        let from_idx = self.add_file(from);
        let to_idx = self.add_file(to);
        if self.graph.find_edge(from_idx, to_idx).is_some() {
            return;
        }
        self.graph.add_edge(
            from_idx,
            to_idx,
            ImportLink {
                specifier: specifier.to_string(),
                line,
            },
        );
    }

    /// Iterate over all edges with their source and target paths.
    pub fn edges(&self) -> Vec<(&str, &str, &ImportLink)> {
        self.graph
            .edge_references()
            .map(|e| {
                let src = self.graph[e.source()].as_str();
                let tgt = self.graph[e.target()].as_str();
                (src, tgt, e.weight())
            })
            .collect()
    }

    /// Strongly connected components of size > 1, plus files importing themselves.
    ///
    /// Files inside a cycle, and the cycles themselves, follow insertion order.
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut cycles: Vec<Vec<NodeIndex>> = petgraph::algo::tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| match scc.as_slice() {
                [single] => self.graph.find_edge(*single, *single).is_some(),
                _ => true,
            })
            .map(|mut scc| {
                scc.sort();
                scc
            })
            .collect();
        cycles.sort_by_key(|scc| scc.first().copied());
        cycles
            .into_iter()
            .map(|scc| scc.into_iter().map(|idx| self.graph[idx].clone()).collect())
            .collect()
    }

    pub fn has_cycles(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.graph)
    }

    /// Dependencies before their dependents, or `None` when the graph has a cycle.
    ///
    /// For `a -> b -> c` this is `[c, b, a]`.
    pub fn topological_order(&self) -> Option<Vec<String>> {
        let order = petgraph::algo::toposort(&self.graph, None).ok()?;
        Some(order.into_iter().rev().map(|idx| self.graph[idx].clone()).collect())
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Get all nodes
    pub fn nodes(&self) -> Vec<&str> {
        self.graph.node_weights().map(String::as_str).collect()
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}
