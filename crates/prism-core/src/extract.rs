//! Shared extraction machinery.
//!
//! Language crates discover definitions with their own grammar and hand each
//! one to a [`FileBuilder`], which walks bodies with the language's
//! [`BodySyntax`] hooks and assembles the [`FileRecord`].

use std::collections::{BTreeSet, HashMap, HashSet};

use tree_sitter::Node;

use crate::metrics::FileMetrics;
use crate::scope::{ScopeId, ScopeKind, ScopeTree, VariableTracker};
use crate::syntax::{line_range, named_children, start_line, BodySyntax, LanguageProfile, WriteTarget};
use crate::types::{
    CallReceiver, CallSite, ClassSymbol, Diagnostic, FileRecord, FunctionSymbol, ImportEdge,
    Language, LineRange, Parameter, QualifiedName, Visibility,
};

/// Syntax-level description of a function, before its body is analysed.
#[derive(Debug, Clone)]
pub struct FunctionDraft<'t> {
    pub name: String,
    pub class_name: Option<String>,
    pub lines: LineRange,
    pub body: Option<Node<'t>>,
    pub parameters: Vec<Parameter>,
    pub return_type: Option<String>,
    pub docstring: Option<String>,
    pub decorators: Vec<String>,
    pub is_async: bool,
    pub is_generator: bool,
    pub is_static: bool,
    pub is_abstract: bool,
    pub is_constructor: bool,
    pub is_special: bool,
    pub is_exported: bool,
    pub is_entry: bool,
    pub visibility: Visibility,
}

impl<'t> FunctionDraft<'t> {
    pub fn new(name: impl Into<String>, node: Node<'t>) -> Self {
        Self {
            name: name.into(),
            class_name: None,
            lines: line_range(node),
            body: None,
            parameters: Vec::new(),
            return_type: None,
            docstring: None,
            decorators: Vec::new(),
            is_async: false,
            is_generator: false,
            is_static: false,
            is_abstract: false,
            is_constructor: false,
            is_special: false,
            is_exported: false,
            is_entry: false,
            visibility: Visibility::Public,
        }
    }
}

/// What the walker learned from one body.
#[derive(Debug, Default)]
pub struct BodyFacts {
    pub decisions: u32,
    pub max_nesting: u32,
    pub calls: Vec<CallSite>,
    pub instantiations: Vec<String>,
    pub returned: Vec<String>,
    pub outer_writes: Vec<String>,
    pub io_calls: Vec<String>,
    pub nondeterministic: Vec<String>,
    pub yields: bool,
    pub awaits: bool,
    /// Identifier reads with their lines, for telling calls from references.
    pub reads: Vec<(String, usize)>,
}

/// Accumulates one file's symbols while a language crate walks its tree.
pub struct FileBuilder<'s> {
    path: String,
    language: Language,
    source: &'s str,
    scopes: ScopeTree,
    variables: VariableTracker,
    functions: Vec<FunctionSymbol>,
    /// Functions defined inside bodies or module-level blocks.
    nested: Vec<FunctionSymbol>,
    classes: Vec<ClassSymbol>,
    imports: Vec<ImportEdge>,
    namespaces: Vec<String>,
    module_calls: Vec<CallSite>,
    diagnostics: Vec<Diagnostic>,
}

impl<'s> FileBuilder<'s> {
    pub fn new(path: &str, language: Language, source: &'s str) -> Self {
        Self {
            path: path.to_string(),
            language,
            source,
            scopes: ScopeTree::new(),
            variables: VariableTracker::new(),
            functions: Vec::new(),
            nested: Vec::new(),
            classes: Vec::new(),
            imports: Vec::new(),
            namespaces: Vec::new(),
            module_calls: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn source(&self) -> &'s str {
        self.source
    }

    pub fn root_scope(&self) -> ScopeId {
        self.scopes.root()
    }

    pub fn open_scope(&mut self, parent: ScopeId, kind: ScopeKind, name: Option<&str>) -> ScopeId {
        self.scopes.add(parent, kind, name)
    }

    pub fn add_import(&mut self, mut edge: ImportEdge) {
        edge.source = self.path.clone();
        self.imports.push(edge);
    }

    pub fn add_namespace(&mut self, namespace: &str) {
        if !self.namespaces.iter().any(|n| n == namespace) {
            self.namespaces.push(namespace.to_string());
        }
    }

    pub fn add_module_call(&mut self, call: CallSite) {
        self.module_calls.push(call);
    }

    pub fn add_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn push_function(&mut self, function: FunctionSymbol) {
        self.functions.push(function);
    }

    pub fn push_class(&mut self, class: ClassSymbol) {
        self.classes.push(class);
    }

    /// Attach a method to an already pushed class of the given name.
    ///
    /// Returns the method back when no such class exists in this file.
    pub fn attach_method(&mut self, class: &str, method: FunctionSymbol) -> Result<(), FunctionSymbol> {
        match self.classes.iter_mut().rev().find(|c| c.name == class) {
            Some(target) => {
                // An out-of-line definition replaces a body-less declaration.
                if let Some(slot) = target
                    .methods
                    .iter_mut()
                    .find(|m| m.name == method.name && m.is_declaration && !m.is_abstract)
                {
                    let mut method = method;
                    method.is_static |= slot.is_static;
                    method.is_special |= slot.is_special;
                    method.is_constructor |= slot.is_constructor;
                    method.visibility = slot.visibility;
                    if method.docstring.is_none() {
                        method.docstring = slot.docstring.take();
                        method.has_documentation = slot.has_documentation;
                    }
                    *slot = method;
                } else {
                    target.methods.push(method);
                }
                Ok(())
            }
            None => Err(method),
        }
    }

    /// Walk a statement that runs at module (or namespace) level.
    ///
    /// Calls become module calls; declarations land in `scope`. Functions
    /// defined inside the statement (a conditional `def`) become symbols.
    pub fn walk_module_statement(&mut self, node: Node<'_>, scope: ScopeId, syntax: &dyn BodySyntax) {
        let (facts, nested) = {
            let mut walker = BodyWalker::new(syntax, self.source, &mut self.scopes, &mut self.variables, None);
            let nested = walker.walk(node, scope);
            (walker.facts, nested)
        };
        self.module_calls.extend(facts.calls);
        self.build_nested(nested, syntax);
    }

    /// Analyse a function draft's body and produce the symbol.
    ///
    /// Functions defined in the body are built too and land in the record
    /// after the top-level ones. One the body hands out by name (`return
    /// wrapper`) counts as called from the enclosing function.
    pub fn build_function(
        &mut self,
        draft: FunctionDraft<'_>,
        parent_scope: ScopeId,
        syntax: &dyn BodySyntax,
    ) -> FunctionSymbol {
        let scope = self
            .scopes
            .add(parent_scope, ScopeKind::Function, Some(&draft.name));
        for param in &draft.parameters {
            self.scopes.declare(scope, &param.name);
        }

        let is_declaration = draft.body.is_none();
        let (mut facts, nested) = match draft.body {
            Some(body) => {
                let mut walker =
                    BodyWalker::new(syntax, self.source, &mut self.scopes, &mut self.variables, Some(scope));
                let nested = walker.walk(body, scope);
                (walker.facts, nested)
            }
            None => (BodyFacts::default(), Vec::new()),
        };
        for name in self.build_nested(nested, syntax) {
            if let Some(line) = escaping_reference(&facts, &name) {
                facts.calls.push(CallSite::new(name, CallReceiver::Bare, line));
            }
        }

        let is_recursive = facts.calls.iter().any(|site| {
            site.name == draft.name
                && match &site.receiver {
                    CallReceiver::Bare => true,
                    CallReceiver::SelfRef => draft.class_name.is_some(),
                    CallReceiver::Named(recv) => draft.class_name.as_deref() == Some(recv.as_str()),
                }
        });

        let mut side_effects: Vec<String> = Vec::new();
        for write in &facts.outer_writes {
            push_unique(&mut side_effects, format!("writes {write}"));
        }
        for io in &facts.io_calls {
            push_unique(&mut side_effects, format!("calls {io}"));
        }
        let is_pure = facts.outer_writes.is_empty()
            && facts.io_calls.is_empty()
            && facts.nondeterministic.is_empty();

        let calls: BTreeSet<String> = facts.calls.iter().map(|c| c.raw.clone()).collect();
        let has_documentation = draft
            .docstring
            .as_deref()
            .is_some_and(|d| !d.trim().is_empty());

        FunctionSymbol {
            qualified_name: QualifiedName::new(&self.path, draft.class_name.as_deref(), &draft.name),
            name: draft.name,
            class_name: draft.class_name,
            parameters: draft.parameters,
            return_type: draft.return_type,
            lines: draft.lines,
            complexity: 1 + facts.decisions,
            max_nesting: facts.max_nesting,
            calls,
            called_by: BTreeSet::new(),
            call_sites: facts.calls,
            docstring: draft.docstring,
            has_documentation,
            decorators: draft.decorators,
            is_pure,
            has_side_effects: !side_effects.is_empty(),
            side_effects,
            is_async: draft.is_async || facts.awaits,
            is_generator: draft.is_generator || facts.yields,
            is_recursive,
            is_static: draft.is_static,
            is_abstract: draft.is_abstract,
            is_declaration,
            is_constructor: draft.is_constructor,
            is_special: draft.is_special || draft.is_constructor,
            is_exported: draft.is_exported,
            is_entry: draft.is_entry,
            visibility: draft.visibility,
            instantiates: dedup(facts.instantiations),
            returns_new: dedup(facts.returned),
            coupling: 0,
        }
    }

    /// Build the functions among `nested` and return their names.
    fn build_nested(&mut self, nested: Vec<(Node<'_>, ScopeId)>, syntax: &dyn BodySyntax) -> Vec<String> {
        let mut names = Vec::new();
        for (node, scope) in nested {
            let Some(draft) = syntax.nested_function(node, self.source) else {
                continue;
            };
            if draft.name.is_empty() {
                continue;
            }
            let function = self.build_function(draft, scope, syntax);
            names.push(function.name.clone());
            self.nested.push(function);
        }
        names
    }

    /// Assemble the record. Qualified names are made unique within the file.
    pub fn finish(self) -> FileRecord {
        let mut record = FileRecord::empty(&self.path, self.language);
        record.line_count = self.source.lines().count();
        record.size_bytes = self.source.len() as u64;
        record.functions = self.functions;
        record.functions.extend(self.nested);
        record.classes = self.classes;
        record.imports = self.imports;
        record.variables = self.variables.finish();
        record.scopes = self.scopes;
        record.namespaces = self.namespaces;
        record.module_calls = self.module_calls;
        record.diagnostics = self.diagnostics;
        record.metrics = FileMetrics::default();

        let path = record.path.clone();
        for class in &mut record.classes {
            class.qualified_name = QualifiedName::new(&path, None, &class.name);
            class.has_documentation = class
                .docstring
                .as_deref()
                .is_some_and(|d| !d.trim().is_empty());
        }

        let mut seen: HashMap<String, usize> = HashMap::new();
        for function in record.all_functions_mut() {
            let base = function.qualified_name.0.clone();
            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            if *count > 1 {
                function.qualified_name = QualifiedName(format!("{base}#{count}"));
            }
        }
        record
    }
}

/// Line of a read of `name` that is not the callee of a bare call, if any.
fn escaping_reference(facts: &BodyFacts, name: &str) -> Option<usize> {
    let calls = facts
        .calls
        .iter()
        .filter(|c| c.name == name && c.receiver == CallReceiver::Bare)
        .count();
    let reads: Vec<usize> = facts
        .reads
        .iter()
        .filter(|(read, _)| read == name)
        .map(|&(_, line)| line)
        .collect();
    if reads.len() > calls {
        reads.last().copied()
    } else {
        None
    }
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !list.contains(&item) {
        list.push(item);
    }
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut out = Vec::new();
    for item in items {
        push_unique(&mut out, item);
    }
    out
}

enum Step<'t> {
    Enter { node: Node<'t>, scope: ScopeId, is_root: bool },
    Leave { nests: bool, returns: bool },
}

/// Depth-first walk over one body, collecting [`BodyFacts`].
struct BodyWalker<'a, 's> {
    syntax: &'a dyn BodySyntax,
    profile: &'static LanguageProfile,
    source: &'s str,
    scopes: &'a mut ScopeTree,
    variables: &'a mut VariableTracker,
    /// `None` when walking module-level code.
    function_scope: Option<ScopeId>,
    facts: BodyFacts,
    skip_reads: HashSet<usize>,
    return_depth: u32,
    nesting: u32,
}

impl<'a, 's> BodyWalker<'a, 's> {
    fn new(
        syntax: &'a dyn BodySyntax,
        source: &'s str,
        scopes: &'a mut ScopeTree,
        variables: &'a mut VariableTracker,
        function_scope: Option<ScopeId>,
    ) -> Self {
        Self {
            syntax,
            profile: syntax.profile(),
            source,
            scopes,
            variables,
            function_scope,
            facts: BodyFacts::default(),
            skip_reads: HashSet::new(),
            return_depth: 0,
            nesting: 0,
        }
    }

    /// Walk `root` depth-first without recursing, so deep expressions cannot
    /// exhaust the stack. Returns nested definitions with their scopes.
    fn walk<'t>(&mut self, root: Node<'t>, scope: ScopeId) -> Vec<(Node<'t>, ScopeId)> {
        let mut nested = Vec::new();
        let mut stack = vec![Step::Enter {
            node: root,
            scope,
            is_root: true,
        }];
        while let Some(step) = stack.pop() {
            match step {
                Step::Leave { nests, returns } => {
                    if nests {
                        self.nesting -= 1;
                    }
                    if returns {
                        self.return_depth -= 1;
                    }
                }
                Step::Enter { node, scope, is_root } => {
                    if !is_root && self.profile.definition_kinds.contains(&node.kind()) {
                        nested.push((node, scope));
                        continue;
                    }
                    let (scope, nests, returns) = self.enter(node, scope, is_root);
                    stack.push(Step::Leave { nests, returns });
                    let children = named_children(node);
                    stack.extend(children.into_iter().rev().map(|child| Step::Enter {
                        node: child,
                        scope,
                        is_root: false,
                    }));
                }
            }
        }
        nested
    }

    /// Record one node's own facts. Returns the scope for its children and
    /// whether it raised nesting or return depth.
    fn enter(&mut self, node: Node<'_>, scope: ScopeId, is_root: bool) -> (ScopeId, bool, bool) {
        let kind = node.kind();
        self.facts.decisions += self.profile.decision_points(node);

        let nests = self.profile.nesting_kinds.contains(&kind);
        if nests {
            self.nesting += 1;
            self.facts.max_nesting = self.facts.max_nesting.max(self.nesting);
        }
        let returns = self.profile.return_kinds.contains(&kind);
        if returns {
            self.return_depth += 1;
        }

        let scope = if !is_root && self.profile.block_scope_kinds.contains(&kind) {
            self.scopes.add(scope, ScopeKind::Block, None)
        } else {
            scope
        };

        for name in self.syntax.outer_bindings(node, self.source) {
            self.scopes.bind_outer(scope, &name);
        }
        for binding in self.syntax.declarations(node, self.source) {
            self.skip_reads.insert(binding.node_id);
            self.scopes.declare(scope, &binding.name);
            self.variables
                .declare(scope, &binding.name, binding.type_hint.clone(), binding.line, binding.is_const);
            if binding.initialized {
                self.variables.assign(scope, &binding.name);
            }
        }
        for target in self.syntax.writes(node, self.source) {
            self.record_write(&target, scope);
        }

        if self.profile.call_kinds.contains(&kind) {
            if let Some(site) = self.syntax.call_site(node, self.source) {
                if self.function_scope.is_some() {
                    if self.profile.is_io_call(&site) {
                        self.facts.io_calls.push(site.raw.clone());
                    }
                    if self.profile.is_nondeterministic_call(&site) {
                        self.facts.nondeterministic.push(site.raw.clone());
                    }
                }
                self.facts.calls.push(site);
            }
        }
        if let Some(type_name) = self.syntax.instantiation(node, self.source) {
            if self.return_depth > 0 {
                self.facts.returned.push(type_name.clone());
            }
            self.facts.instantiations.push(type_name);
        }
        if self.profile.yield_kinds.contains(&kind) {
            self.facts.yields = true;
        }
        if self.profile.await_kinds.contains(&kind) {
            self.facts.awaits = true;
        }

        if let Some(name) = self.syntax.identifier(node, self.source) {
            if !self.skip_reads.contains(&node.id()) {
                if let Some(found) = self.scopes.resolve(scope, &name) {
                    self.variables.read(found, &name);
                }
                if self.function_scope.is_some() && self.profile.io_identifiers.contains(&name.as_str()) {
                    self.facts.io_calls.push(name.clone());
                }
                self.facts.reads.push((name, start_line(node)));
            }
        }

        (scope, nests, returns)
    }

    fn is_local(&self, scope: ScopeId) -> bool {
        match self.function_scope {
            Some(function) => self.scopes.is_within(scope, function),
            None => true,
        }
    }

    fn record_write(&mut self, target: &WriteTarget, scope: ScopeId) {
        self.skip_reads.insert(target.node_id);
        let in_function = self.function_scope.is_some();

        if self.profile.is_self_name(&target.base) {
            if in_function {
                self.facts.outer_writes.push(target.path());
            }
            return;
        }

        let resolved = self.scopes.resolve(scope, &target.base).filter(|&found| {
            // Assignment in a function rebinds locally unless the name was declared outer.
            !(in_function
                && self.profile.assignment_declares
                && !self.is_local(found)
                && !self.scopes.is_outer_bound(scope, &target.base))
        });

        match &target.member {
            None => match resolved {
                Some(found) => {
                    self.variables.assign(found, &target.base);
                    if in_function && !self.is_local(found) {
                        self.facts.outer_writes.push(target.base.clone());
                    }
                }
                None => {
                    let outer_bound = self.scopes.is_outer_bound(scope, &target.base);
                    if in_function && (outer_bound || !self.profile.assignment_declares) {
                        self.facts.outer_writes.push(target.base.clone());
                    } else {
                        self.scopes.declare(scope, &target.base);
                        self.variables.declare(
                            scope,
                            &target.base,
                            target.type_hint.clone(),
                            target.line,
                            false,
                        );
                        self.variables.assign(scope, &target.base);
                    }
                }
            },
            Some(_) => {
                let local = self
                    .scopes
                    .resolve(scope, &target.base)
                    .is_some_and(|found| self.is_local(found));
                if in_function && !local {
                    self.facts.outer_writes.push(target.path());
                }
            }
        }
    }
}
