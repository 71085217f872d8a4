//! Two-pass cross-file resolution.
//!
//! Pass 1 collects every function, method, and class into one table keyed by
//! qualified name. Pass 2 resolves imports through each language's extractor,
//! then base classes, then call sites, linking callers and callees together.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::analyzer::ExtractorRegistry;
use crate::config::ResolveConfig;
use crate::error::AnalysisError;
use crate::resolve::{ResolveContext, Resolution};
use crate::types::{
    short_name, CallReceiver, CallSite, FileRecord, FunctionSymbol, ImportResolution,
    QualifiedName,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Method,
    Class,
}

/// Where a function lives inside the file list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionLocation {
    pub file: usize,
    pub class: Option<usize>,
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct SymbolEntry {
    pub qualified: QualifiedName,
    pub name: String,
    pub file: usize,
    /// Enclosing class name for methods.
    pub class: Option<String>,
    pub kind: SymbolKind,
    /// Body-less prototype or interface member.
    pub is_declaration: bool,
    pub function: Option<FunctionLocation>,
    /// For classes: the constructor's qualified name.
    pub constructor: Option<QualifiedName>,
}

/// Global table built in pass 1. Entries keep traversal and declaration order.
#[derive(Debug, Default)]
pub struct SymbolTable {
    entries: Vec<SymbolEntry>,
    by_qualified: HashMap<String, usize>,
    by_name: HashMap<String, Vec<usize>>,
}

impl SymbolTable {
    pub fn build(files: &[FileRecord]) -> Self {
        let mut table = SymbolTable::default();
        for (fi, file) in files.iter().enumerate() {
            for (index, function) in file.functions.iter().enumerate() {
                let kind = if function.class_name.is_some() {
                    SymbolKind::Method
                } else {
                    SymbolKind::Function
                };
                table.insert(SymbolEntry {
                    qualified: function.qualified_name.clone(),
                    name: function.name.clone(),
                    file: fi,
                    class: function.class_name.clone(),
                    kind,
                    is_declaration: function.is_declaration,
                    function: Some(FunctionLocation {
                        file: fi,
                        class: None,
                        index,
                    }),
                    constructor: None,
                });
            }
            for (ci, class) in file.classes.iter().enumerate() {
                table.insert(SymbolEntry {
                    qualified: class.qualified_name.clone(),
                    name: class.name.clone(),
                    file: fi,
                    class: None,
                    kind: SymbolKind::Class,
                    is_declaration: false,
                    function: None,
                    constructor: class.constructor().map(|c| c.qualified_name.clone()),
                });
                for (index, method) in class.methods.iter().enumerate() {
                    table.insert(SymbolEntry {
                        qualified: method.qualified_name.clone(),
                        name: method.name.clone(),
                        file: fi,
                        class: Some(class.name.clone()),
                        kind: SymbolKind::Method,
                        is_declaration: method.is_declaration,
                        function: Some(FunctionLocation {
                            file: fi,
                            class: Some(ci),
                            index,
                        }),
                        constructor: None,
                    });
                }
            }
        }
        table.attach_out_of_line_constructors();
        table
    }

    /// Point classes at a constructor defined outside the class body (`Foo::Foo() {}`).
    fn attach_out_of_line_constructors(&mut self) {
        for i in 0..self.entries.len() {
            if self.entries[i].kind != SymbolKind::Class {
                continue;
            }
            let needs_definition = match &self.entries[i].constructor {
                None => true,
                Some(ctor) => self.get(ctor.as_str()).is_some_and(|e| e.is_declaration),
            };
            if !needs_definition {
                continue;
            }
            let name = self.entries[i].name.clone();
            let found = self
                .named(&name)
                .find(|e| {
                    e.kind == SymbolKind::Method
                        && e.class.as_deref() == Some(name.as_str())
                        && !e.is_declaration
                        && e.function.is_some_and(|loc| loc.class.is_none())
                })
                .map(|e| e.qualified.clone());
            if found.is_some() {
                self.entries[i].constructor = found;
            }
        }
    }

    fn insert(&mut self, entry: SymbolEntry) {
        if self.by_qualified.contains_key(entry.qualified.as_str()) {
            // Same path and name across two records; the first definition owns the name.
            warn!(symbol = %entry.qualified, "duplicate qualified name ignored");
            return;
        }
        let idx = self.entries.len();
        self.by_qualified.insert(entry.qualified.0.clone(), idx);
        self.by_name.entry(entry.name.clone()).or_default().push(idx);
        self.entries.push(entry);
    }

    pub fn get(&self, qualified: &str) -> Option<&SymbolEntry> {
        self.by_qualified.get(qualified).map(|&i| &self.entries[i])
    }

    pub fn named<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a SymbolEntry> + 'a {
        self.by_name
            .get(name)
            .into_iter()
            .flat_map(move |ids| ids.iter().map(move |&i| &self.entries[i]))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolved project: records keyed by path in traversal order.
pub struct Aggregate {
    pub files: IndexMap<String, FileRecord>,
    pub symbols: SymbolTable,
}

/// Run both passes over the complete set of extracted records.
pub fn aggregate(
    records: Vec<FileRecord>,
    registry: &ExtractorRegistry,
    config: &ResolveConfig,
) -> Aggregate {
    let mut files = records;
    resolve_imports(&mut files, registry, config);
    link_dependencies(&mut files);

    let symbols = SymbolTable::build(&files);
    debug!(symbols = symbols.len(), "symbol table built");

    resolve_bases(&mut files, &symbols);
    mark_overrides(&mut files);
    resolve_calls(&mut files, &symbols);

    let files: IndexMap<String, FileRecord> = files.into_iter().map(|f| (f.path.clone(), f)).collect();
    debug_assert_eq!(verify_call_symmetry(&files), Ok(()));
    Aggregate { files, symbols }
}

fn resolve_imports(files: &mut [FileRecord], registry: &ExtractorRegistry, config: &ResolveConfig) {
    let paths: HashSet<String> = files.iter().map(|f| f.path.clone()).collect();
    let mut namespaces: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for file in files.iter() {
        for ns in &file.namespaces {
            namespaces.entry(ns.clone()).or_default().push(file.path.clone());
        }
    }
    let ctx = ResolveContext {
        files: &paths,
        namespaces: &namespaces,
        config,
    };

    for file in files.iter_mut() {
        let Some(extractor) = registry.for_language(file.language) else {
            continue;
        };
        let mut extra = Vec::new();
        for edge in &mut file.imports {
            match extractor.resolve_import(edge, &ctx) {
                Resolution::Internal(targets) => {
                    let mut targets = targets.into_iter().filter(|t| paths.contains(t));
                    if let Some(first) = targets.next() {
                        edge.upgrade(ImportResolution::Internal { target: first });
                        for target in targets {
                            let mut split = edge.clone();
                            split.resolution = ImportResolution::Internal { target };
                            extra.push(split);
                        }
                    }
                }
                Resolution::External(package) => {
                    edge.upgrade(ImportResolution::External { package });
                }
                Resolution::Unresolved => {}
            }
        }
        file.imports.extend(extra);
    }
}

fn link_dependencies(files: &mut [FileRecord]) {
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
    for file in files.iter_mut() {
        let mut deps: Vec<String> = Vec::new();
        for edge in &file.imports {
            if let Some(target) = edge.resolution.internal_target() {
                if !deps.iter().any(|d| d == target) {
                    deps.push(target.to_string());
                }
            }
        }
        for dep in &deps {
            dependents.entry(dep.clone()).or_default().push(file.path.clone());
        }
        file.dependencies = deps;
    }
    for file in files.iter_mut() {
        file.dependents = dependents.remove(&file.path).unwrap_or_default();
    }
}

/// Internal import targets of one file as file indices, in import order.
fn reachable_files(files: &[FileRecord], index_of: &HashMap<&str, usize>, fi: usize) -> Vec<usize> {
    let mut out = Vec::new();
    for dep in &files[fi].dependencies {
        if let Some(&idx) = index_of.get(dep.as_str()) {
            if idx != fi && !out.contains(&idx) {
                out.push(idx);
            }
        }
    }
    out
}

/// Lookup context for one file during pass 2.
struct Resolver<'a> {
    files: &'a [FileRecord],
    symbols: &'a SymbolTable,
    index_of: HashMap<&'a str, usize>,
}

impl<'a> Resolver<'a> {
    fn new(files: &'a [FileRecord], symbols: &'a SymbolTable) -> Self {
        let index_of = files
            .iter()
            .enumerate()
            .map(|(i, f)| (f.path.as_str(), i))
            .collect();
        Self {
            files,
            symbols,
            index_of,
        }
    }

    /// Tiered lookup: same file and scope, same file, then import-reachable files.
    ///
    /// Within a file the first declaration wins. Across import-reachable files
    /// the match must be unique, otherwise the name stays unresolved.
    fn lookup(
        &self,
        fi: usize,
        name: &str,
        scope_class: Option<&str>,
        accept: &dyn Fn(&SymbolEntry) -> bool,
    ) -> Option<&'a SymbolEntry> {
        let candidates: Vec<&'a SymbolEntry> = self.symbols.named(name).filter(|e| accept(e)).collect();
        if candidates.is_empty() {
            return None;
        }

        if let Some(hit) = candidates
            .iter()
            .find(|e| e.file == fi && e.class.as_deref() == scope_class)
        {
            return Some(*hit);
        }
        if let Some(hit) = candidates.iter().find(|e| e.file == fi) {
            return Some(*hit);
        }

        let reachable = reachable_files(self.files, &self.index_of, fi);
        let mut found: Option<&'a SymbolEntry> = None;
        for entry in candidates.into_iter().filter(|e| reachable.contains(&e.file)) {
            match found {
                None => found = Some(entry),
                Some(prev) if prev.qualified != entry.qualified => {
                    debug!(name, "ambiguous across imported files; left unresolved");
                    return None;
                }
                Some(_) => {}
            }
        }
        found
    }

    /// Names bound by this file's internal imports: local -> (target file, imported name).
    fn import_bindings(&self, fi: usize, local: &str) -> Vec<(usize, String)> {
        let mut out = Vec::new();
        for edge in &self.files[fi].imports {
            let Some(target) = edge.resolution.internal_target() else {
                continue;
            };
            let Some(&ti) = self.index_of.get(target) else {
                continue;
            };
            if edge.alias.as_deref() == Some(local) {
                out.push((ti, String::new()));
            }
            for name in &edge.names {
                if name.local() == local {
                    out.push((ti, name.name.clone()));
                }
            }
        }
        out
    }

    fn class_entry(&self, fi: usize, class_name: &str) -> Option<&'a SymbolEntry> {
        if let Some(entry) = self.symbols.get(class_name) {
            if entry.kind == SymbolKind::Class {
                return Some(entry);
            }
        }
        let short = short_name(class_name);
        self.lookup(fi, short, None, &|e| e.kind == SymbolKind::Class)
    }

    /// A method of `class`, preferring a definition over a body-less declaration.
    ///
    /// Out-of-line definitions live in files that include the class's file.
    fn method_of_class(&self, class: &SymbolEntry, method: &str) -> Option<&'a SymbolEntry> {
        let class_path = self.files[class.file].path.as_str();
        let mut candidates = self.symbols.named(method).filter(|e| {
            e.kind == SymbolKind::Method
                && e.class.as_deref() == Some(class.name.as_str())
                && (e.file == class.file
                    || self.files[e.file].dependencies.iter().any(|d| d == class_path))
        });
        let first = candidates.next()?;
        if !first.is_declaration {
            return Some(first);
        }
        candidates.find(|e| !e.is_declaration).or(Some(first))
    }

    /// Follow resolved bases breadth-first looking for an inherited method.
    fn inherited_method(&self, fi: usize, class_name: &str, method: &str) -> Option<&'a SymbolEntry> {
        let mut queue: VecDeque<&'a SymbolEntry> = self.class_entry(fi, class_name).into_iter().collect();
        let mut seen: HashSet<&str> = HashSet::new();
        while let Some(class) = queue.pop_front() {
            if !seen.insert(class.qualified.as_str()) {
                continue;
            }
            if let Some(hit) = self.method_of_class(class, method) {
                return Some(hit);
            }
            let Some(record) = self.files[class.file]
                .classes
                .iter()
                .find(|c| c.qualified_name == class.qualified)
            else {
                continue;
            };
            for base in &record.bases {
                if let Some(base_entry) = self.class_entry(class.file, base) {
                    queue.push_back(base_entry);
                }
            }
        }
        None
    }

    /// Map a matched symbol to a callable: classes become their constructor.
    fn callable(&self, entry: &SymbolEntry) -> Option<QualifiedName> {
        match entry.kind {
            SymbolKind::Class => entry.constructor.clone(),
            _ => Some(entry.qualified.clone()),
        }
    }

    /// Top-level function or class named `name` defined in file `ti`.
    fn top_level_in(&self, ti: usize, name: &str) -> Option<&'a SymbolEntry> {
        self.symbols
            .named(name)
            .find(|e| e.file == ti && e.kind != SymbolKind::Method)
    }

    fn resolve_call(&self, fi: usize, caller_class: Option<&str>, site: &CallSite) -> Option<QualifiedName> {
        match &site.receiver {
            CallReceiver::Bare => {
                let member_lookup = site.member_lookup;
                let accept = |e: &SymbolEntry| match e.kind {
                    SymbolKind::Function | SymbolKind::Class => true,
                    SymbolKind::Method => {
                        member_lookup && caller_class.is_some() && e.class.as_deref() == caller_class
                    }
                };
                if let Some(entry) = self.lookup_same_file(fi, &site.name, caller_class, &accept) {
                    return self.callable(entry);
                }
                if member_lookup {
                    if let Some(method) = caller_class.and_then(|c| self.inherited_method(fi, c, &site.name)) {
                        return Some(method.qualified.clone());
                    }
                }
                for (ti, original) in self.import_bindings(fi, &site.name) {
                    if original.is_empty() {
                        continue;
                    }
                    if let Some(entry) = self.top_level_in(ti, &original) {
                        return self.callable(entry);
                    }
                }
                self.lookup(fi, &site.name, caller_class, &accept)
                    .and_then(|e| self.callable(e))
            }
            CallReceiver::SelfRef => {
                let class = caller_class?;
                self.inherited_method(fi, class, &site.name)
                    .map(|e| e.qualified.clone())
            }
            CallReceiver::Named(receiver) => {
                let receiver_short = short_name(receiver);
                if let Some(class) = self.class_entry(fi, receiver_short) {
                    if let Some(method) = self.inherited_method(class.file, &class.name, &site.name) {
                        return Some(method.qualified.clone());
                    }
                }
                for (ti, original) in self.import_bindings(fi, receiver) {
                    // Bindings naming a symbol of the target were handled as classes above.
                    let binds_module = original.is_empty() || self.top_level_in(ti, &original).is_none();
                    if !binds_module {
                        continue;
                    }
                    if let Some(entry) = self.top_level_in(ti, &site.name) {
                        return self.callable(entry);
                    }
                }
                self.unique_method(fi, &site.name)
            }
        }
    }

    fn lookup_same_file(
        &self,
        fi: usize,
        name: &str,
        scope_class: Option<&str>,
        accept: &dyn Fn(&SymbolEntry) -> bool,
    ) -> Option<&'a SymbolEntry> {
        let candidates: Vec<&'a SymbolEntry> = self
            .symbols
            .named(name)
            .filter(|e| e.file == fi && accept(e))
            .collect();
        candidates
            .iter()
            .find(|e| e.class.as_deref() == scope_class)
            .or_else(|| candidates.first())
            .copied()
    }

    /// A method call on an arbitrary object: only resolved when exactly one
    /// method of that name exists in this file and its imports.
    fn unique_method(&self, fi: usize, name: &str) -> Option<QualifiedName> {
        let reachable = reachable_files(self.files, &self.index_of, fi);
        let candidates: Vec<&SymbolEntry> = self
            .symbols
            .named(name)
            .filter(|e| e.kind == SymbolKind::Method && (e.file == fi || reachable.contains(&e.file)))
            .collect();
        let definitions: Vec<&SymbolEntry> = candidates.iter().copied().filter(|e| !e.is_declaration).collect();
        let pool = if definitions.is_empty() { candidates } else { definitions };
        match pool.as_slice() {
            [only] => Some(only.qualified.clone()),
            _ => None,
        }
    }
}

fn resolve_bases(files: &mut [FileRecord], symbols: &SymbolTable) {
    let mut updates: Vec<(usize, usize, usize, String)> = Vec::new();
    {
        let resolver = Resolver::new(files, symbols);
        for (fi, file) in files.iter().enumerate() {
            for (ci, class) in file.classes.iter().enumerate() {
                for (bi, base) in class.bases.iter().enumerate() {
                    if let Some(entry) = resolver.class_entry(fi, base) {
                        if entry.qualified != class.qualified_name {
                            updates.push((fi, ci, bi, entry.qualified.0.clone()));
                        }
                    }
                }
            }
        }
    }
    for (fi, ci, bi, qualified) in updates {
        files[fi].classes[ci].bases[bi] = qualified;
    }
}

/// Methods redefining a method of a resolved base are interface-mandated overrides.
fn mark_overrides(files: &mut [FileRecord]) {
    let mut methods_by_class: HashMap<String, HashSet<String>> = HashMap::new();
    let mut bases_by_class: HashMap<String, Vec<String>> = HashMap::new();
    for file in files.iter() {
        for class in &file.classes {
            methods_by_class.insert(
                class.qualified_name.0.clone(),
                class.methods.iter().map(|m| m.name.clone()).collect(),
            );
            bases_by_class.insert(class.qualified_name.0.clone(), class.bases.clone());
        }
    }

    for file in files.iter_mut() {
        for class in &mut file.classes {
            let mut inherited: HashSet<&String> = HashSet::new();
            let mut stack: Vec<&String> = class.bases.iter().collect();
            let mut seen: HashSet<&String> = HashSet::new();
            while let Some(base) = stack.pop() {
                if !seen.insert(base) {
                    continue;
                }
                if let Some(names) = methods_by_class.get(base) {
                    inherited.extend(names.iter());
                }
                if let Some(more) = bases_by_class.get(base) {
                    stack.extend(more.iter());
                }
            }
            for method in &mut class.methods {
                if inherited.contains(&method.name) {
                    method.is_special = true;
                }
            }
        }
    }
}

fn function_mut(files: &mut [FileRecord], loc: FunctionLocation) -> &mut FunctionSymbol {
    let file = &mut files[loc.file];
    match loc.class {
        Some(ci) => &mut file.classes[ci].methods[loc.index],
        None => &mut file.functions[loc.index],
    }
}

fn resolve_calls(files: &mut [FileRecord], symbols: &SymbolTable) {
    // (caller, site index, callee)
    let mut links: Vec<(FunctionLocation, usize, QualifiedName)> = Vec::new();
    let mut module_links: Vec<(usize, usize, QualifiedName)> = Vec::new();
    {
        let resolver = Resolver::new(files, symbols);
        for (fi, file) in files.iter().enumerate() {
            for (index, function) in file.functions.iter().enumerate() {
                let loc = FunctionLocation {
                    file: fi,
                    class: None,
                    index,
                };
                for (si, site) in function.call_sites.iter().enumerate() {
                    if let Some(target) = resolver.resolve_call(fi, function.class_name.as_deref(), site) {
                        links.push((loc, si, target));
                    }
                }
            }
            for (ci, class) in file.classes.iter().enumerate() {
                for (index, method) in class.methods.iter().enumerate() {
                    let loc = FunctionLocation {
                        file: fi,
                        class: Some(ci),
                        index,
                    };
                    for (si, site) in method.call_sites.iter().enumerate() {
                        if let Some(target) = resolver.resolve_call(fi, Some(class.name.as_str()), site) {
                            links.push((loc, si, target));
                        }
                    }
                }
            }
            for (si, site) in file.module_calls.iter().enumerate() {
                if let Some(target) = resolver.resolve_call(fi, None, site) {
                    module_links.push((fi, si, target));
                }
            }
        }
    }

    for (caller_loc, si, callee) in links {
        let Some(callee_loc) = symbols.get(callee.as_str()).and_then(|e| e.function) else {
            continue;
        };
        link(files, caller_loc, si, callee_loc, callee);
    }
    for (fi, si, target) in module_links {
        files[fi].module_calls[si].resolved = Some(target);
    }

    for file in files.iter_mut() {
        for function in file.all_functions_mut() {
            function.calls = function.call_sites.iter().map(CallSite::target).collect();
            if function.calls.contains(function.qualified_name.as_str()) {
                function.is_recursive = true;
            }
        }
    }
}

/// Record one resolved edge on both endpoints.
fn link(
    files: &mut [FileRecord],
    caller_loc: FunctionLocation,
    site_index: usize,
    callee_loc: FunctionLocation,
    callee: QualifiedName,
) {
    let caller = function_mut(files, caller_loc);
    caller.call_sites[site_index].resolved = Some(callee.clone());
    caller.calls.insert(callee.0);
    let caller_name = caller.qualified_name.0.clone();
    function_mut(files, callee_loc).called_by.insert(caller_name);
}

/// Check that every resolved edge is recorded on both ends and points at real symbols.
pub fn verify_call_symmetry(files: &IndexMap<String, FileRecord>) -> Result<(), AnalysisError> {
    let mut functions: HashMap<&str, &FunctionSymbol> = HashMap::new();
    for file in files.values() {
        for function in file.all_functions() {
            functions.insert(function.qualified_name.as_str(), function);
        }
        for edge in &file.imports {
            if let Some(target) = edge.resolution.internal_target() {
                if !files.contains_key(target) {
                    return Err(AnalysisError::DanglingImport {
                        source_path: edge.source.clone(),
                        target: target.to_string(),
                    });
                }
            }
        }
    }

    for (name, function) in &functions {
        for site in &function.call_sites {
            let Some(callee_name) = &site.resolved else {
                continue;
            };
            let Some(callee) = functions.get(callee_name.as_str()) else {
                return Err(AnalysisError::DanglingCallEdge {
                    caller: name.to_string(),
                    callee: callee_name.0.clone(),
                });
            };
            if !function.calls.contains(callee_name.as_str()) {
                return Err(AnalysisError::OneSidedCallEdge {
                    caller: name.to_string(),
                    callee: callee_name.0.clone(),
                    missing_side: "calls",
                });
            }
            if !callee.called_by.contains(*name) {
                return Err(AnalysisError::OneSidedCallEdge {
                    caller: name.to_string(),
                    callee: callee_name.0.clone(),
                    missing_side: "called_by",
                });
            }
        }
        for caller_name in &function.called_by {
            let Some(caller) = functions.get(caller_name.as_str()) else {
                return Err(AnalysisError::DanglingCallEdge {
                    caller: caller_name.clone(),
                    callee: name.to_string(),
                });
            };
            if !caller.calls.contains(*name) {
                return Err(AnalysisError::OneSidedCallEdge {
                    caller: caller_name.clone(),
                    callee: name.to_string(),
                    missing_side: "calls",
                });
            }
        }
    }
    Ok(())
}
