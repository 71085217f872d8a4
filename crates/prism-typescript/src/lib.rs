use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tree_sitter::{Language as Grammar, Node, Parser, Query, QueryCursor, StreamingIterator};

use prism_core::analyzer::{LanguageExtractor, ParsedFile};
use prism_core::error::ExtractError;
use prism_core::extract::{FileBuilder, FunctionDraft};
use prism_core::resolve::{join_normalized, parent_dir, Resolution, ResolveContext};
use prism_core::scope::{ScopeId, ScopeKind};
use prism_core::syntax::{
    has_token, leading_comment, line_range, named_children, node_str, node_text, start_line, strip_quotes,
    Binding, BodySyntax, LanguageProfile, WriteTarget,
};
use prism_core::types::{
    CallReceiver, CallSite, ClassKind, ClassSymbol, FieldDecl, FileRecord, ImportEdge, ImportedName, Language,
    Parameter, Visibility,
};

/// Grammar flavour used for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    JavaScript,
    TypeScript,
    Tsx,
}

impl Dialect {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("tsx") => Dialect::Tsx,
            Some("ts" | "mts" | "cts") => Dialect::TypeScript,
            _ => Dialect::JavaScript,
        }
    }

    fn language(self) -> Language {
        match self {
            Dialect::JavaScript => Language::JavaScript,
            Dialect::TypeScript | Dialect::Tsx => Language::TypeScript,
        }
    }
}

/// Holds queries compiled for a specific dialect.
struct QuerySet {
    import_query: Query,
}

// Static imports, re-exports, `require()` and dynamic `import()`.
const IMPORT_QUERY_SRC: &str = r#"
(import_statement
  source: (string) @path) @import

(export_statement
  source: (string) @path) @import

(call_expression
  function: (identifier) @fn
  arguments: (arguments . (string) @path)
  (#eq? @fn "require")) @import

(call_expression
  function: (import)
  arguments: (arguments . (string) @path)) @import
"#;

fn compile_queries(language: &Grammar) -> Result<QuerySet> {
    Ok(QuerySet {
        import_query: Query::new(language, IMPORT_QUERY_SRC).context("failed to compile import query")?,
    })
}

static PROFILE: LanguageProfile = LanguageProfile {
    branch_kinds: &["if_statement", "ternary_expression"],
    loop_kinds: &["for_statement", "for_in_statement", "while_statement", "do_statement"],
    arm_kinds: &["switch_case"],
    handler_kinds: &["catch_clause"],
    logical_kinds: &["binary_expression"],
    logical_operators: &["&&", "||", "??"],
    nesting_kinds: &[
        "if_statement",
        "for_statement",
        "for_in_statement",
        "while_statement",
        "do_statement",
        "switch_statement",
        "try_statement",
    ],
    definition_kinds: &[
        "function_declaration",
        "generator_function_declaration",
        "class_declaration",
        "abstract_class_declaration",
        "class",
        "method_definition",
        "interface_declaration",
    ],
    block_scope_kinds: &[
        "statement_block",
        "for_statement",
        "for_in_statement",
        "catch_clause",
        "arrow_function",
        "function_expression",
        "generator_function",
    ],
    call_kinds: &["call_expression", "new_expression"],
    return_kinds: &["return_statement"],
    yield_kinds: &["yield_expression"],
    await_kinds: &["await_expression"],
    io_calls: &[
        "console.*",
        "fetch",
        "alert",
        "prompt",
        "XMLHttpRequest",
        "process.stdout.*",
        "process.stderr.*",
        "process.exit",
        "fs.*",
        "child_process.*",
        "http.*",
        "https.*",
        "axios.*",
        "document.*",
        "window.*",
        "localStorage.*",
        "sessionStorage.*",
    ],
    nondeterministic_calls: &["Math.random", "Date.now", "Date", "performance.now", "crypto.*"],
    io_identifiers: &[],
    self_names: &["this"],
    assignment_declares: false,
};

const EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs", "mts", "cts", "svelte", "d.ts"];

/// Body hooks shared by the JavaScript and TypeScript grammars.
pub struct ScriptSyntax;

pub static SYNTAX: ScriptSyntax = ScriptSyntax;

impl BodySyntax for ScriptSyntax {
    fn profile(&self) -> &'static LanguageProfile {
        &PROFILE
    }

    fn call_site(&self, node: Node<'_>, source: &str) -> Option<CallSite> {
        let line = start_line(node);
        let callee = match node.kind() {
            "call_expression" => node.child_by_field_name("function")?,
            "new_expression" => node.child_by_field_name("constructor")?,
            _ => return None,
        };
        match callee.kind() {
            "identifier" => Some(CallSite::new(node_text(callee, source), CallReceiver::Bare, line)),
            "member_expression" => {
                let object = callee.child_by_field_name("object")?;
                let name = field_text(callee, "property", source)?;
                let receiver = match object.kind() {
                    "this" => CallReceiver::SelfRef,
                    _ => CallReceiver::Named(normalize_chain(node_str(object, source))),
                };
                Some(CallSite::new(name, receiver, line).with_raw(normalize_chain(node_str(callee, source))))
            }
            _ => None,
        }
    }

    fn instantiation(&self, node: Node<'_>, source: &str) -> Option<String> {
        if node.kind() != "new_expression" {
            return None;
        }
        let constructor = node.child_by_field_name("constructor")?;
        match constructor.kind() {
            "identifier" => Some(node_text(constructor, source)),
            "member_expression" => field_text(constructor, "property", source),
            _ => None,
        }
    }

    fn declarations(&self, node: Node<'_>, source: &str) -> Vec<Binding> {
        let mut out = Vec::new();
        match node.kind() {
            "variable_declarator" => {
                let Some(name) = node.child_by_field_name("name") else {
                    return out;
                };
                let is_const = node.parent().is_some_and(|p| has_token(p, "const"));
                let initialized = node.child_by_field_name("value").is_some();
                let type_hint = type_annotation(node, source);
                pattern_bindings(name, source, &mut out);
                for binding in &mut out {
                    binding.is_const = is_const;
                    binding.initialized = initialized;
                    binding.type_hint = type_hint.clone();
                }
            }
            "for_in_statement" => {
                if node.child_by_field_name("kind").is_some() {
                    if let Some(left) = node.child_by_field_name("left") {
                        pattern_bindings(left, source, &mut out);
                    }
                }
            }
            "catch_clause" => {
                if let Some(param) = node.child_by_field_name("parameter") {
                    pattern_bindings(param, source, &mut out);
                }
            }
            "arrow_function" | "function_expression" | "generator_function" => {
                if let Some(param) = node.child_by_field_name("parameter") {
                    pattern_bindings(param, source, &mut out);
                }
                if let Some(params) = node.child_by_field_name("parameters") {
                    for param in named_children(params) {
                        let pattern = param.child_by_field_name("pattern").unwrap_or(param);
                        pattern_bindings(pattern, source, &mut out);
                    }
                }
            }
            _ => {}
        }
        out
    }

    fn writes(&self, node: Node<'_>, source: &str) -> Vec<WriteTarget> {
        let mut out = Vec::new();
        let target = match node.kind() {
            "assignment_expression" | "augmented_assignment_expression" => node.child_by_field_name("left"),
            "update_expression" => node.child_by_field_name("argument"),
            _ => None,
        };
        if let Some(target) = target {
            write_targets(target, source, &mut out);
        }
        out
    }

    fn nested_function<'t>(&self, node: Node<'t>, source: &str) -> Option<FunctionDraft<'t>> {
        if !matches!(node.kind(), "function_declaration" | "generator_function_declaration") {
            return None;
        }
        let name = field_text(node, "name", source)?;
        Some(function_draft(name, node, node, source))
    }

    fn identifier(&self, node: Node<'_>, source: &str) -> Option<String> {
        matches!(node.kind(), "identifier" | "shorthand_property_identifier").then(|| node_text(node, source))
    }
}

fn binding(node: Node<'_>, source: &str) -> Binding {
    Binding {
        name: node_text(node, source),
        type_hint: None,
        is_const: false,
        initialized: true,
        node_id: node.id(),
        line: start_line(node),
    }
}

fn pattern_bindings(node: Node<'_>, source: &str, out: &mut Vec<Binding>) {
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        match current.kind() {
            "identifier" | "shorthand_property_identifier_pattern" => out.push(binding(current, source)),
            "object_pattern" | "array_pattern" | "rest_pattern" => {
                stack.extend(named_children(current).into_iter().rev());
            }
            "pair_pattern" => stack.extend(current.child_by_field_name("value")),
            "assignment_pattern" | "object_assignment_pattern" => stack.extend(current.child_by_field_name("left")),
            _ => {}
        }
    }
}

fn write_targets(node: Node<'_>, source: &str, out: &mut Vec<WriteTarget>) {
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        match current.kind() {
            "identifier" | "shorthand_property_identifier_pattern" => out.push(WriteTarget {
                base: node_text(current, source),
                member: None,
                type_hint: None,
                node_id: current.id(),
                line: start_line(current),
            }),
            "member_expression" | "subscript_expression" => {
                let Some(root) = chain_root(current) else {
                    continue;
                };
                let base = node_text(root, source);
                let text = normalize_chain(node_str(current, source));
                let member = text
                    .strip_prefix(base.as_str())
                    .unwrap_or(&text)
                    .trim_start_matches('.')
                    .to_string();
                out.push(WriteTarget {
                    base,
                    member: Some(member),
                    type_hint: None,
                    node_id: root.id(),
                    line: start_line(current),
                });
            }
            "array_pattern" | "object_pattern" | "parenthesized_expression" => {
                stack.extend(named_children(current).into_iter().rev());
            }
            "pair_pattern" => stack.extend(current.child_by_field_name("value")),
            _ => {}
        }
    }
}

/// Leftmost identifier (or `this`) of a member or subscript chain.
fn chain_root(node: Node<'_>) -> Option<Node<'_>> {
    let mut current = node;
    loop {
        match current.kind() {
            "identifier" | "this" => return Some(current),
            "member_expression" | "subscript_expression" => current = current.child_by_field_name("object")?,
            "parenthesized_expression" | "non_null_expression" => current = current.named_child(0)?,
            _ => return None,
        }
    }
}

fn field_text(node: Node<'_>, field: &str, source: &str) -> Option<String> {
    node.child_by_field_name(field).map(|n| node_text(n, source))
}

/// Compact a receiver chain: no whitespace, optional chaining folded to `.`, no `!` assertions.
fn normalize_chain(text: &str) -> String {
    let compact: String = text.split_whitespace().collect();
    compact.replace("?.", ".").replace("!.", ".")
}

/// The `type` annotation of a node, without the leading colon.
fn type_annotation(node: Node<'_>, source: &str) -> Option<String> {
    let annotation = node.child_by_field_name("type")?;
    let text = node_str(annotation, source).trim_start_matches(':').trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn return_annotation(node: Node<'_>, source: &str) -> Option<String> {
    let annotation = node.child_by_field_name("return_type")?;
    let text = node_str(annotation, source).trim_start_matches(':').trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn is_doc_comment(text: &str) -> bool {
    text.starts_with("/**") || text.starts_with("//")
}

/// JSDoc `@param {T} name` and `@returns {T}` tags.
#[derive(Debug, Default)]
struct JsDoc {
    params: Vec<(String, String)>,
    returns: Option<String>,
}

impl JsDoc {
    fn parse(doc: &str) -> Self {
        let mut parsed = JsDoc::default();
        for line in doc.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("@param") {
                if let Some((ty, rest)) = braced(rest) {
                    let name = rest
                        .split_whitespace()
                        .next()
                        .unwrap_or_default()
                        .trim_start_matches('[')
                        .trim_start_matches("...");
                    let name = name.split(['=', ']']).next().unwrap_or_default();
                    if !name.is_empty() {
                        parsed.params.push((name.to_string(), ty));
                    }
                }
            } else if let Some(rest) = line.strip_prefix("@returns").or_else(|| line.strip_prefix("@return")) {
                parsed.returns = braced(rest).map(|(ty, _)| ty);
            }
        }
        parsed
    }

    fn apply(&self, draft: &mut FunctionDraft<'_>) {
        for param in &mut draft.parameters {
            if param.type_hint.is_none() {
                param.type_hint = self
                    .params
                    .iter()
                    .find(|(name, _)| *name == param.name)
                    .map(|(_, ty)| ty.clone());
            }
        }
        if draft.return_type.is_none() {
            draft.return_type = self.returns.clone();
        }
    }
}

/// Split `{Type} rest` into the type and the remainder.
fn braced(text: &str) -> Option<(String, &str)> {
    let text = text.trim_start();
    let inner = text.strip_prefix('{')?;
    let mut depth = 1;
    for (i, c) in inner.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((inner[..i].trim().to_string(), &inner[i + 1..]));
                }
            }
            _ => {}
        }
    }
    None
}

fn parameters(node: Node<'_>, source: &str) -> Vec<Parameter> {
    let mut out = Vec::new();
    if let Some(single) = node.child_by_field_name("parameter") {
        out.push(Parameter::new(node_text(single, source), None));
        return out;
    }
    let Some(list) = node.child_by_field_name("parameters") else {
        return out;
    };
    for param in named_children(list) {
        match param.kind() {
            "identifier" => out.push(Parameter::new(node_text(param, source), None)),
            "assignment_pattern" => {
                let mut p = Parameter::new(field_text(param, "left", source).unwrap_or_default(), None);
                p.default = field_text(param, "right", source);
                out.push(p);
            }
            "rest_pattern" => out.push(Parameter::new(
                node_str(param, source).trim_start_matches("...").to_string(),
                None,
            )),
            "object_pattern" | "array_pattern" => out.push(Parameter::new(normalize_chain(node_str(param, source)), None)),
            "required_parameter" | "optional_parameter" => {
                let Some(pattern) = param.child_by_field_name("pattern") else {
                    continue;
                };
                if pattern.kind() == "this" {
                    continue;
                }
                let name = node_str(pattern, source).trim_start_matches("...");
                let mut p = Parameter::new(normalize_chain(name), type_annotation(param, source));
                p.default = field_text(param, "value", source);
                out.push(p);
            }
            _ => {}
        }
    }
    out
}

fn accessibility(node: Node<'_>, source: &str) -> Option<Visibility> {
    named_children(node)
        .into_iter()
        .find(|c| c.kind() == "accessibility_modifier")
        .and_then(|m| Visibility::from_keyword(node_str(m, source)))
}

/// A function-valued expression: `() => {}`, `function () {}`.
fn is_function_value(node: Node<'_>) -> bool {
    matches!(
        node.kind(),
        "arrow_function" | "function_expression" | "function" | "generator_function"
    )
}

/// Build a draft from any function-like node. `doc_anchor` is the statement the docs sit above.
fn function_draft<'t>(name: String, node: Node<'t>, doc_anchor: Node<'_>, source: &str) -> FunctionDraft<'t> {
    let mut draft = FunctionDraft::new(name, node);
    draft.body = node.child_by_field_name("body");
    draft.parameters = parameters(node, source);
    draft.return_type = return_annotation(node, source);
    draft.is_async = has_token(node, "async");
    draft.is_generator = node.kind().contains("generator") || has_token(node, "*");
    draft.docstring = leading_comment(doc_anchor, source, is_doc_comment);
    if let Some(doc) = draft.docstring.as_deref() {
        JsDoc::parse(doc).apply(&mut draft);
    }
    draft
}

/// Names exported through `export { a, b as c }` without a source.
fn export_clause_names(root: Node<'_>, source: &str) -> HashSet<String> {
    let mut names = HashSet::new();
    for statement in named_children(root) {
        if statement.kind() != "export_statement" || statement.child_by_field_name("source").is_some() {
            continue;
        }
        for clause in named_children(statement).into_iter().filter(|c| c.kind() == "export_clause") {
            for specifier in named_children(clause) {
                if let Some(name) = field_text(specifier, "name", source) {
                    names.insert(name);
                }
            }
        }
    }
    names
}

/// Walks one program tree into a [`FileBuilder`].
struct ProgramWalker<'b, 's> {
    builder: &'b mut FileBuilder<'s>,
    source: &'s str,
    exported: HashSet<String>,
}

impl<'b, 's> ProgramWalker<'b, 's> {
    fn walk(&mut self, container: Node<'_>, scope: ScopeId) {
        for item in named_children(container) {
            self.statement(item, scope);
        }
    }

    fn statement(&mut self, item: Node<'_>, scope: ScopeId) {
        match item.kind() {
            "import_statement" | "comment" | "empty_statement" => {}
            "export_statement" => self.export(item, scope),
            "expression_statement" => {
                // `namespace X {}` parses as an expression statement in some grammar versions.
                match item.named_child(0) {
                    Some(inner) if inner.kind() == "internal_module" => self.namespace(inner, scope),
                    _ => self.builder.walk_module_statement(item, scope, &SYNTAX),
                }
            }
            _ => {
                if !self.declaration(item, item, scope, false) {
                    self.builder.walk_module_statement(item, scope, &SYNTAX);
                }
            }
        }
    }

    fn export(&mut self, item: Node<'_>, scope: ScopeId) {
        if let Some(declaration) = item.child_by_field_name("declaration") {
            if !self.declaration(declaration, item, scope, true) {
                self.builder.walk_module_statement(declaration, scope, &SYNTAX);
            }
            return;
        }
        if let Some(value) = item.child_by_field_name("value") {
            if is_function_value(value) {
                let mut draft = function_draft("default".to_string(), value, item, self.source);
                draft.is_exported = true;
                let function = self.builder.build_function(draft, scope, &SYNTAX);
                self.builder.push_function(function);
            } else {
                self.builder.walk_module_statement(value, scope, &SYNTAX);
            }
        }
    }

    /// Handle a declaration node. Returns false when `node` is not one.
    fn declaration(&mut self, node: Node<'_>, doc_anchor: Node<'_>, scope: ScopeId, exported: bool) -> bool {
        let source = self.source;
        match node.kind() {
            "function_declaration" | "generator_function_declaration" | "function_signature" => {
                let Some(name) = field_text(node, "name", source) else {
                    return true;
                };
                let mut draft = function_draft(name, node, doc_anchor, source);
                draft.is_exported = exported || self.exported.contains(&draft.name);
                draft.is_entry = draft.name == "main";
                let function = self.builder.build_function(draft, scope, &SYNTAX);
                self.builder.push_function(function);
            }
            "class_declaration" | "abstract_class_declaration" => self.class(node, doc_anchor, scope, exported),
            "interface_declaration" => self.interface(node, doc_anchor, scope, exported),
            "enum_declaration" => self.enumeration(node, doc_anchor, exported),
            "lexical_declaration" | "variable_declaration" => self.variables(node, doc_anchor, scope, exported),
            "internal_module" | "module" => self.namespace(node, scope),
            "ambient_declaration" => {
                for inner in named_children(node) {
                    self.declaration(inner, doc_anchor, scope, exported);
                }
            }
            "type_alias_declaration" => {}
            _ => return false,
        }
        true
    }

    fn namespace(&mut self, node: Node<'_>, scope: ScopeId) {
        let name = field_text(node, "name", self.source).map(|n| strip_quotes(&n));
        if let Some(name) = name.as_deref() {
            self.builder.add_namespace(name);
        }
        let inner = self.builder.open_scope(scope, ScopeKind::Namespace, name.as_deref());
        if let Some(body) = node.child_by_field_name("body") {
            self.walk(body, inner);
        }
    }

    /// `const f = () => {}` becomes a function; other declarators are module code.
    fn variables(&mut self, node: Node<'_>, doc_anchor: Node<'_>, scope: ScopeId, exported: bool) {
        let source = self.source;
        for declarator in named_children(node) {
            if declarator.kind() != "variable_declarator" {
                continue;
            }
            let value = declarator.child_by_field_name("value");
            let name = declarator.child_by_field_name("name");
            match (name, value) {
                (Some(name), Some(value)) if name.kind() == "identifier" && is_function_value(value) => {
                    let mut draft = function_draft(node_text(name, source), value, doc_anchor, source);
                    draft.lines = line_range(declarator);
                    draft.is_exported = exported || self.exported.contains(&draft.name);
                    draft.is_entry = draft.name == "main";
                    let function = self.builder.build_function(draft, scope, &SYNTAX);
                    self.builder.push_function(function);
                }
                _ => self.builder.walk_module_statement(declarator, scope, &SYNTAX),
            }
        }
    }

    fn class(&mut self, node: Node<'_>, doc_anchor: Node<'_>, scope: ScopeId, exported: bool) {
        let source = self.source;
        let Some(name) = field_text(node, "name", source) else {
            return;
        };
        let mut class = ClassSymbol::new(name.clone(), ClassKind::Class, line_range(node));
        class.is_exported = exported || self.exported.contains(&name);
        class.is_abstract = node.kind() == "abstract_class_declaration";
        class.docstring = leading_comment(doc_anchor, source, is_doc_comment);
        class.decorators = named_children(node)
            .into_iter()
            .filter(|c| c.kind() == "decorator")
            .map(|d| node_str(d, source).trim_start_matches('@').trim().to_string())
            .collect();
        class.bases = heritage(node, source);

        let class_scope = self.builder.open_scope(scope, ScopeKind::Class, Some(&name));
        if let Some(body) = node.child_by_field_name("body") {
            for member in named_children(body) {
                self.class_member(member, &mut class, class_scope);
            }
        }
        class.is_abstract |= class.methods.iter().any(|m| m.is_abstract);
        self.builder.push_class(class);
    }

    fn class_member(&mut self, member: Node<'_>, class: &mut ClassSymbol, class_scope: ScopeId) {
        let source = self.source;
        match member.kind() {
            "method_definition" | "abstract_method_signature" | "method_signature" => {
                let Some(name) = field_text(member, "name", source) else {
                    return;
                };
                let mut draft = function_draft(name.clone(), member, member, source);
                draft.class_name = Some(class.name.clone());
                draft.is_static = has_token(member, "static");
                draft.is_abstract = member.kind() == "abstract_method_signature" || has_token(member, "abstract");
                draft.is_constructor = name == "constructor";
                draft.is_special = has_token(member, "get") || has_token(member, "set");
                draft.visibility = member_visibility(member, &name, source);

                if draft.is_constructor {
                    constructor_fields(member, source, &mut class.fields);
                }
                if let Some(body) = draft.body {
                    collect_this_fields(body, source, &draft.parameters, &mut class.fields);
                }
                let method = self.builder.build_function(draft, class_scope, &SYNTAX);
                class.methods.push(method);
            }
            "public_field_definition" | "field_definition" => {
                let name_node = member
                    .child_by_field_name("name")
                    .or_else(|| member.child_by_field_name("property"));
                let Some(name_node) = name_node else {
                    return;
                };
                let name = node_text(name_node, source);
                let value = member.child_by_field_name("value");
                if let Some(value) = value.filter(|v| is_function_value(*v)) {
                    // Arrow-function properties behave as bound methods.
                    let mut draft = function_draft(name.clone(), value, member, source);
                    draft.lines = line_range(member);
                    draft.class_name = Some(class.name.clone());
                    draft.is_static = has_token(member, "static");
                    draft.visibility = member_visibility(member, &name, source);
                    let method = self.builder.build_function(draft, class_scope, &SYNTAX);
                    class.methods.push(method);
                    return;
                }
                let type_hint = type_annotation(member, source)
                    .or_else(|| value.and_then(|v| SYNTAX.instantiation(v, source)));
                add_field(
                    &mut class.fields,
                    FieldDecl {
                        visibility: member_visibility(member, &name, source),
                        name: name.trim_start_matches('#').to_string(),
                        type_hint,
                        is_static: has_token(member, "static"),
                        line: start_line(member),
                    },
                );
                if let Some(value) = value {
                    self.builder.walk_module_statement(value, class_scope, &SYNTAX);
                }
            }
            "class_static_block" => self.builder.walk_module_statement(member, class_scope, &SYNTAX),
            _ => {}
        }
    }

    fn interface(&mut self, node: Node<'_>, doc_anchor: Node<'_>, scope: ScopeId, exported: bool) {
        let source = self.source;
        let Some(name) = field_text(node, "name", source) else {
            return;
        };
        let mut class = ClassSymbol::new(name.clone(), ClassKind::Interface, line_range(node));
        class.is_exported = exported || self.exported.contains(&name);
        class.is_abstract = true;
        class.docstring = leading_comment(doc_anchor, source, is_doc_comment);
        class.bases = named_children(node)
            .into_iter()
            .filter(|c| c.kind() == "extends_type_clause")
            .flat_map(named_children)
            .map(|t| base_name(node_str(t, source)))
            .collect();

        let class_scope = self.builder.open_scope(scope, ScopeKind::Class, Some(&name));
        if let Some(body) = node.child_by_field_name("body") {
            for member in named_children(body) {
                match member.kind() {
                    "method_signature" => {
                        let Some(method_name) = field_text(member, "name", source) else {
                            continue;
                        };
                        let mut draft = function_draft(method_name, member, member, source);
                        draft.class_name = Some(name.clone());
                        draft.is_abstract = true;
                        let method = self.builder.build_function(draft, class_scope, &SYNTAX);
                        class.methods.push(method);
                    }
                    "property_signature" => {
                        if let Some(field) = field_text(member, "name", source) {
                            add_field(
                                &mut class.fields,
                                FieldDecl {
                                    name: field,
                                    type_hint: type_annotation(member, source),
                                    is_static: false,
                                    visibility: Visibility::Public,
                                    line: start_line(member),
                                },
                            );
                        }
                    }
                    _ => {}
                }
            }
        }
        self.builder.push_class(class);
    }

    fn enumeration(&mut self, node: Node<'_>, doc_anchor: Node<'_>, exported: bool) {
        let source = self.source;
        let Some(name) = field_text(node, "name", source) else {
            return;
        };
        let mut class = ClassSymbol::new(name.clone(), ClassKind::Enum, line_range(node));
        class.is_exported = exported || self.exported.contains(&name);
        class.docstring = leading_comment(doc_anchor, source, is_doc_comment);
        if let Some(body) = node.child_by_field_name("body") {
            for member in named_children(body) {
                let member_name = match member.kind() {
                    "enum_assignment" => field_text(member, "name", source),
                    "property_identifier" | "string" => Some(strip_quotes(node_str(member, source))),
                    _ => None,
                };
                if let Some(member_name) = member_name {
                    class.fields.push(FieldDecl {
                        name: member_name,
                        type_hint: Some(name.clone()),
                        is_static: true,
                        visibility: Visibility::Public,
                        line: start_line(member),
                    });
                }
            }
        }
        self.builder.push_class(class);
    }
}

fn member_visibility(member: Node<'_>, name: &str, source: &str) -> Visibility {
    if name.starts_with('#') {
        return Visibility::Private;
    }
    accessibility(member, source).unwrap_or(Visibility::Public)
}

/// `Base<T>` -> `Base`.
fn base_name(text: &str) -> String {
    text.split('<').next().unwrap_or(text).trim().to_string()
}

/// Superclass and implemented interfaces.
fn heritage(class: Node<'_>, source: &str) -> Vec<String> {
    let mut bases = Vec::new();
    for clause in named_children(class).into_iter().filter(|c| c.kind() == "class_heritage") {
        for part in named_children(clause) {
            match part.kind() {
                "extends_clause" => {
                    if let Some(value) = part.child_by_field_name("value") {
                        bases.push(base_name(node_str(value, source)));
                    }
                }
                "implements_clause" => {
                    bases.extend(named_children(part).into_iter().map(|t| base_name(node_str(t, source))));
                }
                // The JavaScript grammar puts the superclass expression directly in the heritage.
                _ => bases.push(base_name(node_str(part, source))),
            }
        }
    }
    bases
}

fn add_field(fields: &mut Vec<FieldDecl>, field: FieldDecl) {
    match fields.iter_mut().find(|f| f.name == field.name) {
        Some(existing) => {
            if existing.type_hint.is_none() {
                existing.type_hint = field.type_hint;
            }
        }
        None => fields.push(field),
    }
}

/// TypeScript parameter properties: `constructor(private repo: Repo)`.
fn constructor_fields(ctor: Node<'_>, source: &str, fields: &mut Vec<FieldDecl>) {
    let Some(list) = ctor.child_by_field_name("parameters") else {
        return;
    };
    for param in named_children(list) {
        let Some(visibility) = accessibility(param, source)
            .or_else(|| has_token(param, "readonly").then_some(Visibility::Public))
        else {
            continue;
        };
        if let Some(name) = field_text(param, "pattern", source) {
            add_field(
                fields,
                FieldDecl {
                    name,
                    type_hint: type_annotation(param, source),
                    is_static: false,
                    visibility,
                    line: start_line(param),
                },
            );
        }
    }
}

/// Fields assigned through `this.x = ...` in a method body.
fn collect_this_fields(node: Node<'_>, source: &str, params: &[Parameter], fields: &mut Vec<FieldDecl>) {
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if PROFILE.definition_kinds.contains(&current.kind()) || current.kind() == "function_expression" {
            continue;
        }
        if current.kind() == "assignment_expression" {
            if let Some(field) = this_field(current, source, params) {
                add_field(fields, field);
            }
        }
        stack.extend(named_children(current).into_iter().rev());
    }
}

fn this_field(node: Node<'_>, source: &str, params: &[Parameter]) -> Option<FieldDecl> {
    let left = node.child_by_field_name("left").filter(|l| l.kind() == "member_expression")?;
    if !left.child_by_field_name("object").is_some_and(|o| o.kind() == "this") {
        return None;
    }
    let name = field_text(left, "property", source)?;
    let type_hint = node.child_by_field_name("right").and_then(|right| match right.kind() {
        "new_expression" => SYNTAX.instantiation(right, source),
        "identifier" => {
            let ident = node_str(right, source);
            params.iter().find(|p| p.name == ident).and_then(|p| p.type_hint.clone())
        }
        _ => None,
    });
    Some(FieldDecl {
        visibility: if name.starts_with('#') { Visibility::Private } else { Visibility::Public },
        name: name.trim_start_matches('#').to_string(),
        type_hint,
        is_static: false,
        line: start_line(node),
    })
}

/// Import bindings from the statement (or declarator) around an import capture.
fn import_edge(import: Node<'_>, specifier: String, source: &str) -> ImportEdge {
    let mut edge = ImportEdge::new("", specifier, start_line(import));
    match import.kind() {
        "import_statement" => {
            for clause in named_children(import).into_iter().filter(|c| c.kind() == "import_clause") {
                for part in named_children(clause) {
                    match part.kind() {
                        // Default imports are taken to bind the target's same-named symbol.
                        "identifier" => edge.names.push(ImportedName::new(node_text(part, source), None)),
                        "namespace_import" => {
                            edge.alias = named_children(part).first().map(|n| node_text(*n, source));
                        }
                        "named_imports" => {
                            for specifier in named_children(part) {
                                if let Some(name) = field_text(specifier, "name", source) {
                                    edge.names
                                        .push(ImportedName::new(name, field_text(specifier, "alias", source)));
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        "export_statement" => {
            for clause in named_children(import).into_iter().filter(|c| c.kind() == "export_clause") {
                for specifier in named_children(clause) {
                    if let Some(name) = field_text(specifier, "name", source) {
                        edge.names.push(ImportedName::new(name, field_text(specifier, "alias", source)));
                    }
                }
            }
        }
        "call_expression" => {
            let declarator = import.parent().filter(|p| p.kind() == "variable_declarator");
            if let Some(target) = declarator.and_then(|d| d.child_by_field_name("name")) {
                match target.kind() {
                    "identifier" => edge.alias = Some(node_text(target, source)),
                    "object_pattern" => {
                        for part in named_children(target) {
                            match part.kind() {
                                "shorthand_property_identifier_pattern" => {
                                    edge.names.push(ImportedName::new(node_text(part, source), None))
                                }
                                "pair_pattern" => {
                                    if let (Some(key), Some(value)) =
                                        (field_text(part, "key", source), field_text(part, "value", source))
                                    {
                                        edge.names.push(ImportedName::new(key, Some(value)));
                                    }
                                }
                                _ => {}
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
    edge
}

/// Package name of a bare specifier; `@scope/name` keeps both segments.
fn package_name(specifier: &str) -> String {
    let mut parts = specifier.split('/');
    let first = parts.next().unwrap_or(specifier);
    match (first.starts_with('@'), parts.next()) {
        (true, Some(second)) => format!("{first}/{second}"),
        _ => first.to_string(),
    }
}

/// Candidate project files for a root-relative module path.
fn module_file(ctx: &ResolveContext<'_>, base: &str) -> Option<String> {
    if ctx.contains(base) {
        return Some(base.to_string());
    }
    let mut candidates: Vec<String> = Vec::new();
    // ESM sources import `./x.js` for a `./x.ts` file.
    for js in [".js", ".jsx", ".mjs", ".cjs"] {
        if let Some(stem) = base.strip_suffix(js) {
            candidates.extend(["ts", "tsx", "mts", "cts"].iter().map(|ext| format!("{stem}.{ext}")));
        }
    }
    candidates.extend(EXTENSIONS.iter().map(|ext| format!("{base}.{ext}")));
    candidates.extend(EXTENSIONS.iter().map(|ext| {
        if base.is_empty() {
            format!("index.{ext}")
        } else {
            format!("{base}/index.{ext}")
        }
    }));
    ctx.first_existing(candidates)
}

/// Resolve a JavaScript-family import specifier (shared with Svelte components).
pub fn resolve_specifier(edge: &ImportEdge, ctx: &ResolveContext<'_>) -> Resolution {
    let specifier = edge.specifier.as_str();
    let internal = |found: Option<String>| match found {
        Some(file) => Resolution::Internal(vec![file]),
        None => Resolution::Unresolved,
    };

    if let Some(rewritten) = ctx.apply_alias(specifier) {
        return internal(module_file(ctx, &rewritten));
    }
    if specifier.starts_with("./") || specifier.starts_with("../") || specifier == "." || specifier == ".." {
        return internal(join_normalized(parent_dir(&edge.source), specifier).and_then(|p| module_file(ctx, &p)));
    }
    if let Some(rooted) = specifier.strip_prefix('/') {
        return internal(join_normalized("", rooted).and_then(|p| module_file(ctx, &p)));
    }
    Resolution::External(package_name(specifier))
}

/// JavaScript and TypeScript extractor using tree-sitter.
pub struct TypeScriptExtractor {
    js_language: Grammar,
    ts_language: Grammar,
    tsx_language: Grammar,
    js_queries: QuerySet,
    ts_queries: QuerySet,
    tsx_queries: QuerySet,
}

impl TypeScriptExtractor {
    pub fn new() -> Result<Self> {
        let js_language: Grammar = tree_sitter_javascript::LANGUAGE.into();
        let ts_language: Grammar = tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into();
        let tsx_language: Grammar = tree_sitter_typescript::LANGUAGE_TSX.into();

        let js_queries = compile_queries(&js_language)?;
        let ts_queries = compile_queries(&ts_language)?;
        let tsx_queries = compile_queries(&tsx_language)?;

        Ok(Self {
            js_language,
            ts_language,
            tsx_language,
            js_queries,
            ts_queries,
            tsx_queries,
        })
    }

    pub fn grammar(&self, dialect: Dialect) -> &Grammar {
        match dialect {
            Dialect::JavaScript => &self.js_language,
            Dialect::TypeScript => &self.ts_language,
            Dialect::Tsx => &self.tsx_language,
        }
    }

    fn queries(&self, dialect: Dialect) -> &QuerySet {
        match dialect {
            Dialect::JavaScript => &self.js_queries,
            Dialect::TypeScript => &self.ts_queries,
            Dialect::Tsx => &self.tsx_queries,
        }
    }

    fn extract_imports(&self, root: Node<'_>, source: &str, dialect: Dialect) -> Vec<ImportEdge> {
        let query = &self.queries(dialect).import_query;
        let path_idx = query.capture_names().iter().position(|n| *n == "path").unwrap_or(0);
        let import_idx = query.capture_names().iter().position(|n| *n == "import").unwrap_or(0);

        let mut edges = Vec::new();
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(query, root, source.as_bytes());
        while let Some(m) = matches.next() {
            let path = m.captures.iter().find(|c| c.index as usize == path_idx);
            let import = m.captures.iter().find(|c| c.index as usize == import_idx);
            if let (Some(path), Some(import)) = (path, import) {
                let specifier = strip_quotes(node_str(path.node, source));
                edges.push(import_edge(import.node, specifier, source));
            }
        }
        edges
    }

    /// Extract a parsed program into `builder`. Svelte components reuse this for their scripts.
    pub fn extract_program(&self, builder: &mut FileBuilder<'_>, root: Node<'_>, dialect: Dialect) {
        let source = builder.source();
        for edge in self.extract_imports(root, source, dialect) {
            builder.add_import(edge);
        }
        let scope = builder.root_scope();
        let mut walker = ProgramWalker {
            exported: export_clause_names(root, source),
            builder,
            source,
        };
        walker.walk(root, scope);
    }
}

impl LanguageExtractor for TypeScriptExtractor {
    fn language(&self) -> Language {
        Language::TypeScript
    }

    fn file_extensions(&self) -> &[&str] {
        &["ts", "tsx", "mts", "cts", "js", "jsx", "mjs", "cjs"]
    }

    fn language_for_path(&self, path: &Path) -> Language {
        Dialect::for_path(path).language()
    }

    fn parse_file(&self, path: &Path, content: &str) -> Result<ParsedFile, ExtractError> {
        let dialect = Dialect::for_path(path);
        let mut parser = Parser::new();
        parser
            .set_language(self.grammar(dialect))
            .map_err(|e| ExtractError::Grammar {
                language: dialect.language().to_string(),
                message: e.to_string(),
            })?;
        let tree = parser.parse(content, None).ok_or_else(|| ExtractError::ParseAborted {
            path: path.display().to_string(),
        })?;
        Ok(ParsedFile {
            path: path.to_path_buf(),
            language: dialect.language(),
            tree,
            content: content.to_string(),
        })
    }

    fn extract(&self, parsed: &ParsedFile) -> FileRecord {
        let path = parsed.relative_path();
        let mut builder = FileBuilder::new(&path, parsed.language, &parsed.content);
        self.extract_program(&mut builder, parsed.tree.root_node(), Dialect::for_path(&parsed.path));
        builder.finish()
    }

    fn resolve_import(&self, edge: &ImportEdge, ctx: &ResolveContext<'_>) -> Resolution {
        resolve_specifier(edge, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::config::ResolveConfig;
    use prism_core::types::FunctionSymbol;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn extract(path: &str, content: &str) -> FileRecord {
        let extractor = TypeScriptExtractor::new().unwrap();
        let parsed = extractor.parse_file(&PathBuf::from(path), content).unwrap();
        extractor.extract(&parsed)
    }

    fn function<'a>(record: &'a FileRecord, name: &str) -> &'a FunctionSymbol {
        record
            .all_functions()
            .find(|f| f.name == name)
            .unwrap_or_else(|| panic!("no function {name}"))
    }

    #[test]
    fn test_functions_classes_and_arrows() {
        let content = r#"import { helper } from "./helper";

export function run(items: string[]): number {
  return items.length;
}

const double = (x) => x * 2;

export class UserService {
  constructor(private repo: UserRepository) {}

  async find(id: string): Promise<User> {
    return this.repo.load(id);
  }

  static create(): UserService {
    return new UserService(new UserRepository());
  }
}
"#;
        let record = extract("src/service.ts", content);
        assert_eq!(record.language, Language::TypeScript);
        let names: Vec<&str> = record.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["run", "double"]);

        let run = function(&record, "run");
        assert!(run.is_exported);
        assert_eq!(run.lines.start, 3);
        assert_eq!(run.lines.end, 5);
        assert_eq!(run.return_type.as_deref(), Some("number"));
        assert_eq!(run.parameters[0].type_hint.as_deref(), Some("string[]"));
        assert!(!function(&record, "double").is_exported);

        let class = &record.classes[0];
        assert!(class.is_exported);
        assert_eq!(class.methods.len(), 3);
        assert!(class.methods[0].is_constructor);
        assert_eq!(class.fields[0].name, "repo");
        assert_eq!(class.fields[0].type_hint.as_deref(), Some("UserRepository"));
        assert_eq!(class.fields[0].visibility, Visibility::Private);

        let find = function(&record, "find");
        assert!(find.is_async);
        assert_eq!(find.call_sites[0].receiver, CallReceiver::Named("this.repo".to_string()));
        assert_eq!(find.call_sites[0].raw, "this.repo.load");

        let create = function(&record, "create");
        assert!(create.is_static);
        assert_eq!(create.returns_new, vec!["UserService", "UserRepository"]);
    }

    #[test]
    fn test_complexity_and_nesting() {
        let content = r#"
function zero() { return 1; }
function one(x) { if (x) { return 1; } return 0; }
function three(xs, y) {
  for (const x of xs) {
    if (x && y) { return x; }
  }
  return null;
}
function cases(k) {
  switch (k) {
    case 1: return "a";
    case 2: return "b";
    default: return "c";
  }
}
"#;
        let record = extract("c.js", content);
        assert_eq!(record.language, Language::JavaScript);
        assert_eq!(function(&record, "zero").complexity, 1);
        assert_eq!(function(&record, "one").complexity, 2);
        assert_eq!(function(&record, "three").complexity, 4);
        assert_eq!(function(&record, "three").max_nesting, 2);
        assert_eq!(function(&record, "cases").complexity, 2);
    }

    #[test]
    fn test_purity_and_side_effects() {
        let content = r#"
let counter = 0;
function pure(a, b) { const total = a + b; return total; }
function bump() { counter += 1; }
function log(msg) { console.log(msg); }
function roll() { return Math.floor(Math.random() * 6); }
function local() { let n = 0; n++; return [1, 2].map((v) => { const w = v + n; return w; }); }
class Counter {
  tick() { this.count++; }
}
"#;
        let record = extract("p.js", content);
        assert!(function(&record, "pure").is_pure);
        assert!(function(&record, "local").is_pure);

        let bump = function(&record, "bump");
        assert_eq!(bump.side_effects, vec!["writes counter"]);

        let log = function(&record, "log");
        assert_eq!(log.side_effects, vec!["calls console.log"]);

        let roll = function(&record, "roll");
        assert!(!roll.is_pure);
        assert!(!roll.has_side_effects);

        let tick = function(&record, "tick");
        assert_eq!(tick.side_effects, vec!["writes this.count"]);
    }

    #[test]
    fn test_import_forms() {
        let content = r#"
import Default, { a, b as c } from "./mod";
import * as ns from "../lib/ns";
import "./side-effect.css";
export { x } from "./reexport";
const fs = require("fs");
const { join, resolve: res } = require("path");
async function load() { return import("./lazy"); }
"#;
        let record = extract("src/app/index.js", content);
        let specs: Vec<&str> = record.imports.iter().map(|i| i.specifier.as_str()).collect();
        assert_eq!(
            specs,
            vec!["./mod", "../lib/ns", "./side-effect.css", "./reexport", "fs", "path", "./lazy"]
        );
        let first = &record.imports[0];
        assert!(first.binds("Default") && first.binds("a") && first.binds("c"));
        assert!(!first.binds("b"));
        assert_eq!(record.imports[1].alias.as_deref(), Some("ns"));
        assert_eq!(record.imports[4].alias.as_deref(), Some("fs"));
        assert!(record.imports[5].binds("join") && record.imports[5].binds("res"));
    }

    #[test]
    fn test_resolve_specifiers() {
        let extractor = TypeScriptExtractor::new().unwrap();
        let files: HashSet<String> = [
            "src/app/index.ts",
            "src/app/util.ts",
            "src/lib/index.ts",
            "src/lib/store.svelte",
            "src/types.d.ts",
            "src/esm.ts",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        let namespaces = BTreeMap::new();
        let config = ResolveConfig::default();
        let ctx = ResolveContext {
            files: &files,
            namespaces: &namespaces,
            config: &config,
        };
        let resolve = |spec: &str| extractor.resolve_import(&ImportEdge::new("src/app/index.ts", spec, 1), &ctx);
        let internal = |path: &str| Resolution::Internal(vec![path.to_string()]);

        assert_eq!(resolve("./util"), internal("src/app/util.ts"));
        assert_eq!(resolve("../lib"), internal("src/lib/index.ts"));
        assert_eq!(resolve("../lib/store.svelte"), internal("src/lib/store.svelte"));
        assert_eq!(resolve("../types"), internal("src/types.d.ts"));
        assert_eq!(resolve("../esm.js"), internal("src/esm.ts"));
        assert_eq!(resolve("$lib/store.svelte"), internal("src/lib/store.svelte"));
        assert_eq!(resolve("./missing"), Resolution::Unresolved);
        assert_eq!(resolve("@scope/pkg/sub"), Resolution::External("@scope/pkg".to_string()));
        assert_eq!(resolve("lodash/fp"), Resolution::External("lodash".to_string()));
    }

    #[test]
    fn test_jsdoc_fills_missing_types() {
        let content = r#"
/**
 * Sum two numbers.
 * @param {number} a first
 * @param {number} [b=0] second
 * @returns {number}
 */
function add(a, b = 0) {
  return a + b;
}
"#;
        let record = extract("m.js", content);
        let add = function(&record, "add");
        assert!(add.has_documentation);
        assert_eq!(add.parameters[0].type_hint.as_deref(), Some("number"));
        assert_eq!(add.parameters[1].type_hint.as_deref(), Some("number"));
        assert_eq!(add.parameters[1].default.as_deref(), Some("0"));
        assert_eq!(add.return_type.as_deref(), Some("number"));
    }

    #[test]
    fn test_interfaces_enums_and_heritage() {
        let content = r#"
export interface Shape extends Named {
  name: string;
  area(): number;
}

enum Color { Red, Green = "g" }

abstract class Base implements Shape {
  name = "base";
  abstract area(): number;
}

class Square extends Base {
  #side: number = 1;
  area(): number { return this.#side * this.#side; }
}
"#;
        let record = extract("shapes.ts", content);
        let shape = &record.classes[0];
        assert_eq!(shape.kind, ClassKind::Interface);
        assert_eq!(shape.bases, vec!["Named"]);
        assert!(shape.methods[0].is_abstract);
        assert_eq!(shape.fields[0].type_hint.as_deref(), Some("string"));

        let color = &record.classes[1];
        assert_eq!(color.kind, ClassKind::Enum);
        let members: Vec<&str> = color.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(members, vec!["Red", "Green"]);

        let base = &record.classes[2];
        assert!(base.is_abstract);
        assert_eq!(base.bases, vec!["Shape"]);

        let square = &record.classes[3];
        assert_eq!(square.bases, vec!["Base"]);
        assert_eq!(square.fields[0].name, "side");
        assert_eq!(square.fields[0].visibility, Visibility::Private);
    }

    #[test]
    fn test_module_calls_and_entries() {
        let content = r#"
function main() { start(); }
function start() {}
export default function () { return 1; }
main();
"#;
        let record = extract("index.ts", content);
        assert!(function(&record, "main").is_entry);
        assert!(function(&record, "default").is_exported);
        let calls: Vec<&str> = record.module_calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(calls, vec!["main"]);
    }

    #[test]
    fn test_record_serializes_to_json() {
        let record = extract("x.ts", "export const f = () => 1;\n");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["functions"][0]["name"], "f");
        assert_eq!(json["functions"][0]["is_exported"], true);
    }

    #[test]
    fn test_nested_function_declarations() {
        let content = r#"
function outer(items) {
  function visit(item) { return format(item); }
  return items.map(visit);
}
function format(x) { return String(x); }
if (typeof window !== "undefined") {
  function boot() { outer([]); }
  boot();
}
"#;
        let record = extract("w.js", content);
        let names: Vec<&str> = record.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["outer", "format", "visit", "boot"]);

        let visit = function(&record, "visit");
        assert_eq!(visit.lines.start, 3);
        assert_eq!(visit.call_sites[0].raw, "format");
        // Passed to `map`, so `outer` is what hands it a caller.
        let outer = function(&record, "outer");
        assert!(outer.calls.contains("visit"));
        assert_eq!(outer.call_sites.last().map(|c| c.line), Some(4));

        assert_eq!(function(&record, "boot").call_sites[0].raw, "outer");
        let calls: Vec<&str> = record.module_calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(calls, vec!["boot"]);
    }
}
