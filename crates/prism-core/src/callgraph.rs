use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, EdgeRef};
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::types::{FileRecord, FunctionSymbol};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEdge {
    pub caller: String,
    pub callee: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDegree {
    pub in_degree: usize,
    pub out_degree: usize,
}

/// Serialized view of the call graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallGraphSummary {
    pub nodes: Vec<String>,
    pub edges: Vec<CallEdge>,
    pub degrees: IndexMap<String, NodeDegree>,
}

/// Directed function-level graph over resolved call edges.
pub struct CallGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Every function is a node; every resolved call site an edge (one per caller/callee pair).
    pub fn from_files(files: &IndexMap<String, FileRecord>) -> Self {
        let mut graph = Self::new();
        for record in files.values() {
            for function in record.all_functions() {
                graph.add_function(function.qualified_name.as_str());
            }
        }
        for record in files.values() {
            for function in record.all_functions() {
                for site in &function.call_sites {
                    if let Some(target) = &site.resolved {
                        graph.add_call(function.qualified_name.as_str(), target.as_str());
                    }
                }
            }
        }
        graph
    }

    pub fn add_function(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.index.insert(name.to_string(), idx);
        idx
    }

    /// Add an edge between two known functions. Unknown endpoints are ignored.
    pub fn add_call(&mut self, caller: &str, callee: &str) {
        let (Some(&from), Some(&to)) = (self.index.get(caller), self.index.get(callee)) else {
            return;
        };
        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, ());
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn in_degree(&self, name: &str) -> usize {
        self.degree(name, Direction::Incoming)
    }

    pub fn out_degree(&self, name: &str) -> usize {
        self.degree(name, Direction::Outgoing)
    }

    fn degree(&self, name: &str, direction: Direction) -> usize {
        self.index
            .get(name)
            .map(|&idx| self.graph.edges_directed(idx, direction).count())
            .unwrap_or(0)
    }

    /// Callers other than the function itself.
    fn external_in_degree(&self, idx: NodeIndex) -> usize {
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .filter(|e| e.source() != idx)
            .count()
    }

    pub fn has_edge(&self, caller: &str, callee: &str) -> bool {
        match (self.index.get(caller), self.index.get(callee)) {
            (Some(&from), Some(&to)) => self.graph.find_edge(from, to).is_some(),
            _ => false,
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Functions nobody calls that are neither entries nor exempt.
    ///
    /// Constructors, destructors, overrides, and other special methods are
    /// invoked by the language, and body-less declarations have nothing to run.
    pub fn dead_code(&self, files: &IndexMap<String, FileRecord>, entries: &BTreeSet<String>) -> Vec<String> {
        let mut dead = Vec::new();
        for record in files.values() {
            for function in record.all_functions() {
                let name = function.qualified_name.as_str();
                let Some(&idx) = self.index.get(name) else {
                    continue;
                };
                if self.external_in_degree(idx) == 0 && !entries.contains(name) && !is_exempt(function) {
                    dead.push(name.to_string());
                }
            }
        }
        dead
    }

    /// Functions not reachable from any entry. Empty when there are no entries.
    pub fn unreachable(&self, files: &IndexMap<String, FileRecord>, entries: &BTreeSet<String>) -> Vec<String> {
        let roots: Vec<NodeIndex> = entries.iter().filter_map(|e| self.index.get(e).copied()).collect();
        if roots.is_empty() {
            return Vec::new();
        }
        let mut reached = vec![false; self.graph.node_count()];
        for root in roots {
            if reached[root.index()] {
                continue;
            }
            let mut dfs = Dfs::new(&self.graph, root);
            while let Some(node) = dfs.next(&self.graph) {
                reached[node.index()] = true;
            }
        }

        let mut out = Vec::new();
        for record in files.values() {
            for function in record.all_functions() {
                if let Some(&idx) = self.index.get(function.qualified_name.as_str()) {
                    if !reached[idx.index()] && !is_exempt(function) {
                        out.push(function.qualified_name.0.clone());
                    }
                }
            }
        }
        out
    }

    pub fn summary(&self) -> CallGraphSummary {
        let nodes: Vec<String> = self.graph.node_weights().cloned().collect();
        let edges = self
            .graph
            .edge_references()
            .map(|e| CallEdge {
                caller: self.graph[e.source()].clone(),
                callee: self.graph[e.target()].clone(),
            })
            .collect();
        let degrees = self
            .graph
            .node_indices()
            .map(|idx| {
                (
                    self.graph[idx].clone(),
                    NodeDegree {
                        in_degree: self.graph.edges_directed(idx, Direction::Incoming).count(),
                        out_degree: self.graph.edges_directed(idx, Direction::Outgoing).count(),
                    },
                )
            })
            .collect();
        CallGraphSummary { nodes, edges, degrees }
    }
}

impl Default for CallGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn is_exempt(function: &FunctionSymbol) -> bool {
    function.is_special || function.is_constructor || function.is_declaration || function.is_abstract
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CallReceiver, CallSite, Language, LineRange, QualifiedName};

    fn function(name: &str, calls: &[&str]) -> FunctionSymbol {
        let mut f = FunctionSymbol::new("a.py", None, name, LineRange::new(1, 2));
        for callee in calls {
            let mut site = CallSite::new(*callee, CallReceiver::Bare, 1);
            site.resolved = Some(QualifiedName::new("a.py", None, callee));
            f.call_sites.push(site);
        }
        f
    }

    fn files(functions: Vec<FunctionSymbol>) -> IndexMap<String, FileRecord> {
        let mut record = FileRecord::empty("a.py", Language::Python);
        record.functions = functions;
        [("a.py".to_string(), record)].into_iter().collect()
    }

    #[test]
    fn test_degrees() {
        let files = files(vec![
            function("main", &["load", "save"]),
            function("load", &[]),
            function("save", &["load"]),
        ]);
        let graph = CallGraph::from_files(&files);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(graph.out_degree("a.py::main"), 2);
        assert_eq!(graph.in_degree("a.py::load"), 2);
        assert!(graph.has_edge("a.py::save", "a.py::load"));

        let summary = graph.summary();
        assert_eq!(summary.degrees["a.py::load"].in_degree, 2);
        assert_eq!(summary.nodes[0], "a.py::main");
    }

    #[test]
    fn test_dead_code_candidates() {
        let mut ctor = function("__init__", &[]);
        ctor.is_constructor = true;
        let files = files(vec![
            function("main", &["used"]),
            function("used", &[]),
            function("unused", &[]),
            function("recursive", &["recursive"]),
            ctor,
        ]);
        let graph = CallGraph::from_files(&files);
        let entries: BTreeSet<String> = ["a.py::main".to_string()].into_iter().collect();

        let dead = graph.dead_code(&files, &entries);
        assert_eq!(dead, vec!["a.py::unused".to_string(), "a.py::recursive".to_string()]);
    }

    #[test]
    fn test_unreachable_from_entries() {
        let files = files(vec![
            function("main", &["a"]),
            function("a", &["b"]),
            function("b", &[]),
            function("island", &["other"]),
            function("other", &[]),
        ]);
        let graph = CallGraph::from_files(&files);
        let entries: BTreeSet<String> = ["a.py::main".to_string()].into_iter().collect();
        assert_eq!(
            graph.unreachable(&files, &entries),
            vec!["a.py::island".to_string(), "a.py::other".to_string()]
        );
        assert!(graph.unreachable(&files, &BTreeSet::new()).is_empty());
    }
}
