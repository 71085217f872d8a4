//! Per-file lexical scopes.
//!
//! Scopes live in one arena per file. A scope refers to its parent by index,
//! so the tree carries no back-pointers and serializes as a flat list.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::VariableSymbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(pub u32);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Module,
    Namespace,
    Class,
    Function,
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub id: ScopeId,
    pub parent: Option<ScopeId>,
    pub kind: ScopeKind,
    pub name: Option<String>,
    pub declared: BTreeSet<String>,
    /// Names this scope explicitly rebinds to an enclosing scope (`global`, `nonlocal`).
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub outer_bindings: BTreeSet<String>,
}

/// Arena of scopes for one file. Index 0 is the module scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
}

impl ScopeTree {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                id: ScopeId(0),
                parent: None,
                kind: ScopeKind::Module,
                name: None,
                declared: BTreeSet::new(),
                outer_bindings: BTreeSet::new(),
            }],
        }
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn add(&mut self, parent: ScopeId, kind: ScopeKind, name: Option<&str>) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            id,
            parent: Some(parent),
            kind,
            name: name.map(str::to_string),
            declared: BTreeSet::new(),
            outer_bindings: BTreeSet::new(),
        });
        id
    }

    pub fn get(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(id.0 as usize)
    }

    pub fn parent(&self, id: ScopeId) -> Option<ScopeId> {
        self.get(id).and_then(|s| s.parent)
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scope> {
        self.scopes.iter()
    }

    /// Declare a name directly in `id`. Returns false if it was already declared there.
    pub fn declare(&mut self, id: ScopeId, name: &str) -> bool {
        match self.scopes.get_mut(id.0 as usize) {
            Some(scope) => scope.declared.insert(name.to_string()),
            None => false,
        }
    }

    pub fn bind_outer(&mut self, id: ScopeId, name: &str) {
        if let Some(scope) = self.scopes.get_mut(id.0 as usize) {
            scope.outer_bindings.insert(name.to_string());
        }
    }

    /// `id` followed by each ancestor up to the module scope.
    pub fn ancestors(&self, id: ScopeId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self.get(id).map(|s| s.id),
        }
    }

    /// Scope in which `name` is visible from `from`, honouring outer bindings.
    pub fn resolve(&self, from: ScopeId, name: &str) -> Option<ScopeId> {
        let mut skip_until_function = false;
        for scope in self.ancestors(from) {
            if scope.outer_bindings.contains(name) {
                skip_until_function = true;
                continue;
            }
            if skip_until_function && scope.kind != ScopeKind::Function && scope.kind != ScopeKind::Module {
                continue;
            }
            if scope.declared.contains(name) {
                return Some(scope.id);
            }
        }
        None
    }

    /// True if some scope between `from` and its enclosing function rebinds `name` outward.
    pub fn is_outer_bound(&self, from: ScopeId, name: &str) -> bool {
        for scope in self.ancestors(from) {
            if scope.outer_bindings.contains(name) {
                return true;
            }
            if scope.kind == ScopeKind::Function {
                break;
            }
        }
        false
    }

    /// True if `id` is `ancestor` or nested inside it.
    pub fn is_within(&self, id: ScopeId, ancestor: ScopeId) -> bool {
        self.ancestors(id).any(|s| s.id == ancestor)
    }

    pub fn enclosing_function(&self, id: ScopeId) -> Option<ScopeId> {
        self.ancestors(id)
            .find(|s| s.kind == ScopeKind::Function)
            .map(|s| s.id)
    }

    pub fn depth(&self, id: ScopeId) -> usize {
        self.ancestors(id).count().saturating_sub(1)
    }
}

impl Default for ScopeTree {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Ancestors<'a> {
    tree: &'a ScopeTree,
    next: Option<ScopeId>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Scope;

    fn next(&mut self) -> Option<Self::Item> {
        let scope = self.tree.get(self.next?)?;
        self.next = scope.parent;
        Some(scope)
    }
}

/// Declarations, assignments, and reads of variables, keyed by declaring scope.
#[derive(Debug, Default)]
pub struct VariableTracker {
    variables: Vec<Tracked>,
    index: HashMap<(ScopeId, String), usize>,
}

#[derive(Debug)]
struct Tracked {
    symbol: VariableSymbol,
    const_marker: bool,
}

impl VariableTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a variable. Redeclaring keeps the first line and fills a missing type.
    pub fn declare(
        &mut self,
        scope: ScopeId,
        name: &str,
        type_hint: Option<String>,
        line: usize,
        const_marker: bool,
    ) {
        if let Some(&idx) = self.index.get(&(scope, name.to_string())) {
            let tracked = &mut self.variables[idx];
            if tracked.symbol.type_hint.is_none() {
                tracked.symbol.type_hint = type_hint;
            }
            tracked.const_marker |= const_marker;
            return;
        }
        self.index.insert((scope, name.to_string()), self.variables.len());
        self.variables.push(Tracked {
            symbol: VariableSymbol {
                name: name.to_string(),
                type_hint,
                assignment_count: 0,
                usage_count: 0,
                scope,
                is_constant: false,
                line,
            },
            const_marker,
        });
    }

    pub fn assign(&mut self, scope: ScopeId, name: &str) {
        if let Some(&idx) = self.index.get(&(scope, name.to_string())) {
            self.variables[idx].symbol.assignment_count += 1;
        }
    }

    pub fn read(&mut self, scope: ScopeId, name: &str) {
        if let Some(&idx) = self.index.get(&(scope, name.to_string())) {
            self.variables[idx].symbol.usage_count += 1;
        }
    }

    pub fn contains(&self, scope: ScopeId, name: &str) -> bool {
        self.index.contains_key(&(scope, name.to_string()))
    }

    /// Final symbols in declaration order, with constness decided.
    pub fn finish(self) -> Vec<VariableSymbol> {
        self.variables
            .into_iter()
            .map(|tracked| {
                let mut symbol = tracked.symbol;
                symbol.is_constant = tracked.const_marker
                    || is_constant_name(&symbol.name)
                    || symbol.assignment_count == 1;
                symbol
            })
            .collect()
    }
}

/// SCREAMING_SNAKE_CASE with at least one letter.
pub fn is_constant_name(name: &str) -> bool {
    name.chars().any(|c| c.is_ascii_uppercase())
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        && name.len() > 1
}
