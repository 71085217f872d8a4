use std::path::Path;

use anyhow::{Context, Result};
use tree_sitter::{Language as Grammar, Node, Parser, Query, QueryCursor, StreamingIterator};

use prism_core::analyzer::{LanguageExtractor, ParsedFile};
use prism_core::error::ExtractError;
use prism_core::extract::{FileBuilder, FunctionDraft};
use prism_core::resolve::{join_normalized, parent_dir, Resolution, ResolveContext};
use prism_core::scope::{ScopeId, ScopeKind};
use prism_core::syntax::{
    children, find_descendant, leading_comment, line_range, named_children, node_str, node_text, start_line, Binding,
    BodySyntax, LanguageProfile, WriteTarget,
};
use prism_core::types::{
    CallReceiver, CallSite, ClassKind, ClassSymbol, FieldDecl, FileRecord, FunctionSymbol, ImportEdge, Language,
    Parameter, Visibility,
};

const INCLUDE_QUERY_SRC: &str = r#"
(preproc_include
  path: (_) @path) @include
"#;

static PROFILE: LanguageProfile = LanguageProfile {
    branch_kinds: &["if_statement", "conditional_expression"],
    loop_kinds: &["for_statement", "for_range_loop", "while_statement", "do_statement"],
    arm_kinds: &["case_statement"],
    handler_kinds: &["catch_clause"],
    logical_kinds: &["binary_expression"],
    logical_operators: &["&&", "||", "and", "or"],
    nesting_kinds: &[
        "if_statement",
        "for_statement",
        "for_range_loop",
        "while_statement",
        "do_statement",
        "switch_statement",
        "try_statement",
    ],
    definition_kinds: &["function_definition", "class_specifier", "struct_specifier", "union_specifier"],
    block_scope_kinds: &[
        "compound_statement",
        "for_statement",
        "for_range_loop",
        "catch_clause",
        "lambda_expression",
    ],
    call_kinds: &["call_expression", "new_expression"],
    return_kinds: &["return_statement"],
    yield_kinds: &["co_yield_statement"],
    await_kinds: &["co_await_expression"],
    io_calls: &[
        "printf",
        "puts",
        "putchar",
        "scanf",
        "getchar",
        "fprintf",
        "fputs",
        "fopen",
        "fclose",
        "fread",
        "fwrite",
        "fflush",
        "perror",
        "system",
        "exit",
        "std::printf",
        "std::puts",
        "std::getline",
        "std::exit",
        "std::system",
        "std::filesystem.*",
    ],
    nondeterministic_calls: &["rand", "srand", "time", "clock", "std::rand", "std::time", "std::chrono.*"],
    io_identifiers: &["cout", "cerr", "clog", "cin"],
    self_names: &["this"],
    assignment_declares: false,
};

/// Body hooks for the C++ grammar.
struct CppSyntax;

static SYNTAX: CppSyntax = CppSyntax;

impl BodySyntax for CppSyntax {
    fn profile(&self) -> &'static LanguageProfile {
        &PROFILE
    }

    fn call_site(&self, node: Node<'_>, source: &str) -> Option<CallSite> {
        let line = start_line(node);
        if node.kind() == "new_expression" {
            let type_name = type_name(node.child_by_field_name("type")?, source);
            return Some(CallSite::new(type_name, CallReceiver::Bare, line));
        }
        let function = node.child_by_field_name("function")?;
        match function.kind() {
            "identifier" => Some(CallSite::new(node_text(function, source), CallReceiver::Bare, line).with_member_lookup()),
            "template_function" => {
                let name = field_text(function, "name", source)?;
                Some(CallSite::new(name, CallReceiver::Bare, line).with_member_lookup())
            }
            "qualified_identifier" => {
                let raw = compact(node_str(function, source));
                let mut parts = segments(&raw);
                let name = parts.pop()?;
                if parts.is_empty() {
                    return Some(CallSite::new(name, CallReceiver::Bare, line));
                }
                Some(CallSite::new(name, CallReceiver::Named(parts.join("::")), line).with_raw(raw))
            }
            "field_expression" => {
                let object = function.child_by_field_name("argument")?;
                let field = function.child_by_field_name("field")?;
                let name = segments(node_str(field, source)).pop()?;
                let receiver = match object.kind() {
                    "this" => CallReceiver::SelfRef,
                    _ => CallReceiver::Named(compact(node_str(object, source))),
                };
                Some(CallSite::new(name, receiver, line).with_raw(compact(node_str(function, source))))
            }
            _ => None,
        }
    }

    fn instantiation(&self, node: Node<'_>, source: &str) -> Option<String> {
        match node.kind() {
            "new_expression" => Some(type_name(node.child_by_field_name("type")?, source)),
            "call_expression" => {
                // std::make_unique<T>(...) and std::make_shared<T>(...)
                let function = node.child_by_field_name("function")?;
                let template = find_descendant(function, &["template_function"])?;
                let name = field_text(template, "name", source)?;
                if !matches!(name.as_str(), "make_unique" | "make_shared") {
                    return None;
                }
                let args = template.child_by_field_name("arguments")?;
                let first = named_children(args).into_iter().next()?;
                Some(type_name(first, source))
            }
            _ => None,
        }
    }

    fn declarations(&self, node: Node<'_>, source: &str) -> Vec<Binding> {
        let mut out = Vec::new();
        match node.kind() {
            "declaration" => {
                let is_const = named_children(node)
                    .iter()
                    .any(|c| c.kind() == "type_qualifier" && node_str(*c, source) == "const");
                let type_hint = field_text(node, "type", source);
                let mut cursor = node.walk();
                for declarator in node.children_by_field_name("declarator", &mut cursor) {
                    if function_declarator(declarator).is_some() {
                        continue;
                    }
                    let Some(name) = declarator_name(declarator) else {
                        continue;
                    };
                    out.push(Binding {
                        name: node_text(name, source),
                        type_hint: type_hint.clone(),
                        is_const,
                        initialized: declarator.kind() == "init_declarator",
                        node_id: name.id(),
                        line: start_line(name),
                    });
                }
            }
            "for_range_loop" => {
                if let Some(name) = node.child_by_field_name("declarator").and_then(declarator_name) {
                    out.push(Binding {
                        name: node_text(name, source),
                        type_hint: field_text(node, "type", source),
                        is_const: false,
                        initialized: true,
                        node_id: name.id(),
                        line: start_line(name),
                    });
                }
            }
            "catch_clause" | "lambda_expression" => {
                let list = node
                    .child_by_field_name("parameters")
                    .or_else(|| node.child_by_field_name("declarator").and_then(|d| d.child_by_field_name("parameters")));
                if let Some(list) = list {
                    for param in parameters(list, source) {
                        if param.name != "_" {
                            out.push(Binding {
                                name: param.name,
                                type_hint: param.type_hint,
                                is_const: false,
                                initialized: true,
                                node_id: usize::MAX,
                                line: start_line(node),
                            });
                        }
                    }
                }
            }
            _ => {}
        }
        out
    }

    fn writes(&self, node: Node<'_>, source: &str) -> Vec<WriteTarget> {
        let target = match node.kind() {
            "assignment_expression" => node.child_by_field_name("left"),
            "update_expression" => node.child_by_field_name("argument"),
            _ => None,
        };
        let Some(target) = target else {
            return Vec::new();
        };
        let Some(root) = chain_root(target) else {
            return Vec::new();
        };
        let base = node_text(root, source);
        let member = (root.id() != target.id()).then(|| {
            let text = compact(node_str(target, source));
            text.trim_start_matches('*')
                .strip_prefix(base.as_str())
                .unwrap_or(&text)
                .trim_start_matches("->")
                .trim_start_matches('.')
                .to_string()
        });
        vec![WriteTarget {
            base,
            member,
            type_hint: None,
            node_id: root.id(),
            line: start_line(target),
        }]
    }
}

/// Leftmost identifier (or `this`) written through by an assignment target.
fn chain_root(node: Node<'_>) -> Option<Node<'_>> {
    let mut current = node;
    loop {
        match current.kind() {
            "identifier" | "this" => return Some(current),
            "field_expression" | "subscript_expression" | "pointer_expression" => {
                current = current.child_by_field_name("argument")?
            }
            "parenthesized_expression" => current = current.named_child(0)?,
            _ => return None,
        }
    }
}

fn field_text(node: Node<'_>, field: &str, source: &str) -> Option<String> {
    node.child_by_field_name(field).map(|n| node_text(n, source))
}

fn compact(text: &str) -> String {
    text.split_whitespace().collect()
}

/// Collapse runs of whitespace to single spaces.
fn squeeze(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `a::B<T>::c` -> `["a", "B", "c"]`.
fn segments(text: &str) -> Vec<String> {
    let mut plain = String::new();
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            _ if depth == 0 => plain.push(c),
            _ => {}
        }
    }
    plain
        .split("::")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Unqualified type name, without template arguments or pointer marks.
fn type_name(node: Node<'_>, source: &str) -> String {
    let text = node_str(node, source).trim_end_matches(['*', '&', ' ']);
    segments(text).pop().unwrap_or_else(|| text.to_string())
}

/// The next declarator inward, through pointer, reference and init wrappers.
fn inner_declarator(node: Node<'_>) -> Option<Node<'_>> {
    node.child_by_field_name("declarator").or_else(|| match node.kind() {
        "reference_declarator" | "parenthesized_declarator" => node.named_child(0),
        _ => None,
    })
}

/// Innermost name node of a possibly wrapped declarator.
fn declarator_name(node: Node<'_>) -> Option<Node<'_>> {
    match node.kind() {
        "identifier" | "field_identifier" | "qualified_identifier" | "destructor_name" | "operator_name"
        | "template_function" | "type_identifier" => Some(node),
        _ => inner_declarator(node).and_then(declarator_name),
    }
}

fn function_declarator(node: Node<'_>) -> Option<Node<'_>> {
    match node.kind() {
        "function_declarator" => Some(node),
        "pointer_declarator" | "reference_declarator" | "parenthesized_declarator" => {
            inner_declarator(node).and_then(function_declarator)
        }
        _ => None,
    }
}

/// Pointer and reference marks wrapped around a declarator's name.
fn declarator_marks(node: Node<'_>) -> String {
    let mut marks = String::new();
    let mut current = Some(node);
    while let Some(n) = current {
        match n.kind() {
            "pointer_declarator" => marks.push('*'),
            "reference_declarator" => marks.push('&'),
            "function_declarator" => break,
            _ => {}
        }
        current = inner_declarator(n);
    }
    marks
}

fn parameters(list: Node<'_>, source: &str) -> Vec<Parameter> {
    let mut out = Vec::new();
    for param in named_children(list) {
        if !matches!(
            param.kind(),
            "parameter_declaration" | "optional_parameter_declaration" | "variadic_parameter_declaration"
        ) {
            continue;
        }
        let declarator = param.child_by_field_name("declarator");
        let name = declarator.and_then(declarator_name);
        let type_end = name.map_or_else(
            || {
                param
                    .child_by_field_name("default_value")
                    .map_or(param.end_byte(), |d| d.start_byte())
            },
            |n| n.start_byte(),
        );
        let type_text = squeeze(source.get(param.start_byte()..type_end).unwrap_or_default());
        let type_text = type_text.trim_end_matches('=').trim().to_string();
        if name.is_none() && type_text == "void" {
            continue;
        }
        let mut p = Parameter::new(
            name.map(|n| node_text(n, source)).unwrap_or_else(|| "_".to_string()),
            (!type_text.is_empty()).then_some(type_text),
        );
        p.default = field_text(param, "default_value", source);
        out.push(p);
    }
    out
}

fn is_doc_comment(text: &str) -> bool {
    text.starts_with("//") || text.starts_with("/*")
}

fn has_specifier(node: Node<'_>, kind: &str, text: &str, source: &str) -> bool {
    named_children(node)
        .iter()
        .any(|c| c.kind() == kind && node_str(*c, source) == text)
}

fn is_virtual(node: Node<'_>, source: &str) -> bool {
    children(node)
        .iter()
        .any(|c| node_str(*c, source) == "virtual")
}

fn is_pure_virtual(node: Node<'_>, source: &str) -> bool {
    let text = compact(node_str(node, source));
    text.ends_with("=0;") || text.ends_with("=0")
}

/// Name of a function plus the class it belongs to, from its declarator.
struct FunctionName {
    name: String,
    owner: Option<String>,
}

fn function_name(declarator: Node<'_>, source: &str) -> Option<FunctionName> {
    let name_node = function_declarator(declarator)?.child_by_field_name("declarator")?;
    let mut parts = segments(&compact(node_str(name_node, source)));
    let name = parts.pop()?;
    Some(FunctionName {
        name,
        owner: parts.pop(),
    })
}

/// Walks a translation unit into a [`FileBuilder`].
struct UnitWalker<'b, 's> {
    builder: &'b mut FileBuilder<'s>,
    source: &'s str,
    /// Namespaces declared in this file, fully qualified.
    namespaces: Vec<String>,
    /// Out-of-line methods whose class is not in this file.
    detached: Vec<FunctionSymbol>,
}

impl<'b, 's> UnitWalker<'b, 's> {
    fn walk(&mut self, container: Node<'_>, scope: ScopeId, namespace: &str) {
        for item in named_children(container) {
            self.item(item, scope, namespace);
        }
    }

    fn item(&mut self, item: Node<'_>, scope: ScopeId, namespace: &str) {
        match item.kind() {
            "preproc_include" | "comment" | "using_declaration" | "alias_declaration" | "preproc_def"
            | "preproc_function_def" | "preproc_call" | "type_definition" if !has_class_body(item) => {}
            "preproc_ifdef" | "preproc_if" | "preproc_else" | "preproc_elif" | "preproc_elifdef" => {
                let condition = item.child_by_field_name("condition").or_else(|| item.child_by_field_name("name"));
                for child in named_children(item) {
                    if condition.is_some_and(|c| c.id() == child.id()) {
                        continue;
                    }
                    self.item(child, scope, namespace);
                }
            }
            "linkage_specification" => {
                if let Some(body) = item.child_by_field_name("body") {
                    if body.kind() == "declaration_list" {
                        self.walk(body, scope, namespace);
                    } else {
                        self.item(body, scope, namespace);
                    }
                }
            }
            "namespace_definition" => {
                let name = field_text(item, "name", self.source).map(|n| compact(&n));
                let full = match (name, namespace.is_empty()) {
                    (Some(name), true) => name,
                    (Some(name), false) => format!("{namespace}::{name}"),
                    (None, _) => namespace.to_string(),
                };
                if !full.is_empty() {
                    self.builder.add_namespace(&full);
                    self.namespaces.push(full.clone());
                }
                let inner = self.builder.open_scope(scope, ScopeKind::Namespace, Some(&full));
                if let Some(body) = item.child_by_field_name("body") {
                    self.walk(body, inner, &full);
                }
            }
            "template_declaration" => {
                for child in named_children(item) {
                    if child.kind() != "template_parameter_list" {
                        self.item(child, scope, namespace);
                    }
                }
            }
            "function_definition" => self.function(item, scope),
            "class_specifier" | "struct_specifier" | "union_specifier" | "enum_specifier" => {
                self.class(item, item, scope)
            }
            "declaration" | "type_definition" => {
                if let Some(ty) = item.child_by_field_name("type").filter(|t| has_class_body(*t)) {
                    self.class(ty, item, scope);
                }
                if let Some(declarator) = item.child_by_field_name("declarator") {
                    if function_declarator(declarator).is_some() {
                        self.function(item, scope);
                        return;
                    }
                }
                if item.kind() == "declaration" {
                    self.builder.walk_module_statement(item, scope, &SYNTAX);
                }
            }
            _ => self.builder.walk_module_statement(item, scope, &SYNTAX),
        }
    }

    /// Free function, out-of-line method, or prototype.
    fn function(&mut self, node: Node<'_>, scope: ScopeId) {
        let source = self.source;
        let Some(declarator) = node.child_by_field_name("declarator") else {
            return;
        };
        let Some(FunctionName { name, owner }) = function_name(declarator, source) else {
            return;
        };
        // `ns::helper()` is a free function; `Class::method()` is a method.
        let owner = owner.filter(|o| !self.namespaces.iter().any(|ns| segments(ns).last() == Some(o)));

        let mut draft = self.draft(node, declarator, name, owner.as_deref());
        draft.is_entry = owner.is_none() && draft.name == "main";
        let function = self.builder.build_function(draft, scope, &SYNTAX);
        match owner {
            Some(class) => {
                if let Err(method) = self.builder.attach_method(&class, function) {
                    self.detached.push(method);
                }
            }
            None => self.builder.push_function(function),
        }
    }

    fn draft<'t>(
        &self,
        node: Node<'t>,
        declarator: Node<'t>,
        name: String,
        class: Option<&str>,
    ) -> FunctionDraft<'t> {
        let source = self.source;
        let mut draft = FunctionDraft::new(name, node);
        draft.class_name = class.map(str::to_string);
        draft.body = node.child_by_field_name("body");
        draft.parameters = function_declarator(declarator)
            .and_then(|f| f.child_by_field_name("parameters"))
            .map(|list| parameters(list, source))
            .unwrap_or_default();
        draft.return_type = node
            .child_by_field_name("type")
            .map(|t| format!("{}{}", squeeze(node_str(t, source)), declarator_marks(declarator)));
        draft.docstring = leading_comment(node, source, is_doc_comment);
        draft.is_static = has_specifier(node, "storage_class_specifier", "static", source);
        if let Some(class) = class {
            let short = segments(class).pop().unwrap_or_default();
            draft.is_constructor = draft.name == short;
            draft.is_special = draft.name.starts_with('~') || draft.name.starts_with("operator");
        }
        draft.is_abstract = is_virtual(node, source) && is_pure_virtual(node, source);
        draft
    }

    fn class(&mut self, node: Node<'_>, doc_anchor: Node<'_>, scope: ScopeId) {
        let source = self.source;
        let Some(name) = node.child_by_field_name("name").map(|n| type_name(n, source)) else {
            return;
        };
        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        let kind = match node.kind() {
            "struct_specifier" | "union_specifier" => ClassKind::Struct,
            "enum_specifier" => ClassKind::Enum,
            _ => ClassKind::Class,
        };
        let mut class = ClassSymbol::new(name.clone(), kind, line_range(node));
        class.docstring = leading_comment(doc_anchor, source, is_doc_comment);

        if kind == ClassKind::Enum {
            for enumerator in named_children(body).into_iter().filter(|e| e.kind() == "enumerator") {
                if let Some(member) = field_text(enumerator, "name", source) {
                    class.fields.push(FieldDecl {
                        name: member,
                        type_hint: Some(name.clone()),
                        is_static: true,
                        visibility: Visibility::Public,
                        line: start_line(enumerator),
                    });
                }
            }
            self.builder.push_class(class);
            return;
        }

        class.bases = named_children(node)
            .into_iter()
            .filter(|c| c.kind() == "base_class_clause")
            .flat_map(named_children)
            .filter(|b| matches!(b.kind(), "type_identifier" | "qualified_identifier" | "template_type"))
            .map(|b| type_name(b, source))
            .collect();

        let class_scope = self.builder.open_scope(scope, ScopeKind::Class, Some(&name));
        let mut access = if kind == ClassKind::Struct {
            Visibility::Public
        } else {
            Visibility::Private
        };
        for member in named_children(body) {
            self.member(member, &mut class, class_scope, &mut access);
        }
        class.is_abstract = class.methods.iter().any(|m| m.is_abstract);
        self.builder.push_class(class);
    }

    fn member(&mut self, member: Node<'_>, class: &mut ClassSymbol, class_scope: ScopeId, access: &mut Visibility) {
        let source = self.source;
        match member.kind() {
            "access_specifier" => {
                let keyword = node_str(member, source).trim_end_matches(':').trim();
                *access = Visibility::from_keyword(keyword).unwrap_or(*access);
            }
            "template_declaration" => {
                for child in named_children(member) {
                    if child.kind() != "template_parameter_list" {
                        self.member(child, class, class_scope, access);
                    }
                }
            }
            "function_definition" | "field_declaration" | "declaration" => {
                let mut cursor = member.walk();
                let declarators: Vec<Node<'_>> = member.children_by_field_name("declarator", &mut cursor).collect();

                if let Some(&declarator) = declarators.iter().find(|d| function_declarator(**d).is_some()) {
                    let Some(FunctionName { name, .. }) = function_name(declarator, source) else {
                        return;
                    };
                    let mut draft = self.draft(member, declarator, name, Some(&class.name));
                    draft.visibility = *access;
                    let method = self.builder.build_function(draft, class_scope, &SYNTAX);
                    class.methods.push(method);
                    return;
                }

                if let Some(ty) = member.child_by_field_name("type").filter(|t| has_class_body(*t)) {
                    self.class(ty, member, class_scope);
                }
                let type_text = member.child_by_field_name("type").map(|t| squeeze(node_str(t, source)));
                let is_static = has_specifier(member, "storage_class_specifier", "static", source);
                for declarator in declarators {
                    let Some(field) = declarator_name(declarator) else {
                        continue;
                    };
                    class.fields.push(FieldDecl {
                        name: node_text(field, source),
                        type_hint: type_text.as_ref().map(|t| format!("{t}{}", declarator_marks(declarator))),
                        is_static,
                        visibility: *access,
                        line: start_line(member),
                    });
                }
            }
            _ => {}
        }
    }
}

fn has_class_body(node: Node<'_>) -> bool {
    matches!(
        node.kind(),
        "class_specifier" | "struct_specifier" | "union_specifier" | "enum_specifier"
    ) && node.child_by_field_name("body").is_some()
        || node
            .child_by_field_name("type")
            .is_some_and(|t| t.id() != node.id() && has_class_body(t))
}

/// C and C++ extractor using tree-sitter.
pub struct CppExtractor {
    grammar: Grammar,
    include_query: Query,
}

impl CppExtractor {
    pub fn new() -> Result<Self> {
        let grammar: Grammar = tree_sitter_cpp::LANGUAGE.into();
        let include_query =
            Query::new(&grammar, INCLUDE_QUERY_SRC).context("failed to compile C++ include query")?;
        Ok(Self { grammar, include_query })
    }

    /// Includes as written: quoted paths bare, system headers as `<name>`.
    fn extract_includes(&self, parsed: &ParsedFile) -> Vec<ImportEdge> {
        let source = parsed.content.as_str();
        let path_idx = self
            .include_query
            .capture_names()
            .iter()
            .position(|n| *n == "path")
            .unwrap_or(0);
        let mut edges = Vec::new();
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&self.include_query, parsed.tree.root_node(), source.as_bytes());
        while let Some(m) = matches.next() {
            for capture in m.captures {
                if capture.index as usize != path_idx {
                    continue;
                }
                let node = capture.node;
                let raw = node_str(node, source).trim();
                let specifier = match node.kind() {
                    "system_lib_string" => raw.to_string(),
                    _ => raw.trim_matches('"').to_string(),
                };
                edges.push(ImportEdge::new("", specifier, start_line(node)));
            }
        }
        edges
    }
}

impl LanguageExtractor for CppExtractor {
    fn language(&self) -> Language {
        Language::Cpp
    }

    fn file_extensions(&self) -> &[&str] {
        &["c", "h", "cc", "cpp", "cxx", "hpp", "hh", "hxx"]
    }

    fn parse_file(&self, path: &Path, content: &str) -> Result<ParsedFile, ExtractError> {
        let mut parser = Parser::new();
        parser
            .set_language(&self.grammar)
            .map_err(|e| ExtractError::Grammar {
                language: "cpp".to_string(),
                message: e.to_string(),
            })?;
        let tree = parser.parse(content, None).ok_or_else(|| ExtractError::ParseAborted {
            path: path.display().to_string(),
        })?;
        Ok(ParsedFile {
            path: path.to_path_buf(),
            language: Language::Cpp,
            tree,
            content: content.to_string(),
        })
    }

    fn extract(&self, parsed: &ParsedFile) -> FileRecord {
        let path = parsed.relative_path();
        let mut builder = FileBuilder::new(&path, Language::Cpp, &parsed.content);
        for edge in self.extract_includes(parsed) {
            builder.add_import(edge);
        }
        let scope = builder.root_scope();
        let detached = {
            let mut walker = UnitWalker {
                source: builder.source(),
                builder: &mut builder,
                namespaces: Vec::new(),
                detached: Vec::new(),
            };
            walker.walk(parsed.tree.root_node(), scope, "");
            walker.detached
        };
        // Methods of classes declared elsewhere (usually a header) stay top-level.
        for method in detached {
            builder.push_function(method);
        }
        builder.finish()
    }

    fn resolve_import(&self, edge: &ImportEdge, ctx: &ResolveContext<'_>) -> Resolution {
        let specifier = edge.specifier.as_str();
        if let Some(header) = specifier.strip_prefix('<') {
            return Resolution::External(header.trim_end_matches('>').to_string());
        }
        let mut bases = vec![parent_dir(&edge.source).to_string()];
        bases.extend(ctx.include_dirs().iter().cloned());
        bases.push(String::new());
        let found = ctx.first_existing(bases.iter().filter_map(|base| join_normalized(base, specifier)));
        match found {
            Some(file) => Resolution::Internal(vec![file]),
            None => Resolution::Unresolved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::config::ResolveConfig;
    use std::collections::{BTreeMap, HashSet};
    use std::path::PathBuf;

    fn extract(path: &str, content: &str) -> FileRecord {
        let extractor = CppExtractor::new().unwrap();
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
    fn test_functions_classes_and_out_of_line_methods() {
        let content = r#"#include "widget.h"

int add(int a, int b) {
    return a + b;
}

class Widget {
public:
    Widget(int size);
    int size() const { return size_; }
    void grow(int by);
private:
    int size_;
};

Widget::Widget(int size) : size_(size) {}

void Widget::grow(int by) {
    size_ += by;
}

int main() {
    Widget w(add(1, 2));
    w.grow(3);
    return 0;
}
"#;
        let record = extract("src/main.cpp", content);
        let names: Vec<&str> = record.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["add", "main"]);
        assert_eq!(record.functions[0].lines.start, 3);
        assert_eq!(record.functions[0].lines.end, 5);
        assert!(function(&record, "main").is_entry);

        let widget = &record.classes[0];
        assert_eq!(widget.qualified_name.as_str(), "src/main.cpp::Widget");
        assert_eq!(widget.methods.len(), 3);
        let ctor = &widget.methods[0];
        assert!(ctor.is_constructor);
        assert!(!ctor.is_declaration);
        assert_eq!(ctor.lines.start, 16);
        assert_eq!(ctor.visibility, Visibility::Public);
        let grow = &widget.methods[2];
        assert_eq!(grow.qualified_name.as_str(), "src/main.cpp::Widget::grow");
        assert_eq!(grow.side_effects, vec!["writes size_"]);
        assert_eq!(widget.fields[0].name, "size_");
        assert_eq!(widget.fields[0].visibility, Visibility::Private);

        let main = function(&record, "main");
        let calls: Vec<&str> = main.call_sites.iter().map(|c| c.raw.as_str()).collect();
        assert_eq!(calls, vec!["add", "w.grow"]);
    }

    #[test]
    fn test_complexity_counts_decision_points() {
        let content = r#"
int zero() { return 1; }
int one(int x) { if (x) { return 1; } return 0; }
int three(int* xs, int n, bool y) {
    for (int i = 0; i < n; i++) {
        if (xs[i] && y) { return xs[i]; }
    }
    return 0;
}
"#;
        let record = extract("c.cc", content);
        assert_eq!(function(&record, "zero").complexity, 1);
        assert_eq!(function(&record, "one").complexity, 2);
        assert_eq!(function(&record, "three").complexity, 4);
        assert_eq!(function(&record, "three").max_nesting, 2);
        assert!(function(&record, "three").is_pure);
        let params: Vec<(&str, Option<&str>)> = function(&record, "three")
            .parameters
            .iter()
            .map(|p| (p.name.as_str(), p.type_hint.as_deref()))
            .collect();
        assert_eq!(params, vec![("xs", Some("int*")), ("n", Some("int")), ("y", Some("bool"))]);
    }

    #[test]
    fn test_includes_and_resolution() {
        let content = "#include <vector>\n#include \"util/strings.h\"\n#include \"config.h\"\n#include \"missing.h\"\n";
        let record = extract("src/app/main.cpp", content);
        let specs: Vec<&str> = record.imports.iter().map(|i| i.specifier.as_str()).collect();
        assert_eq!(specs, vec!["<vector>", "util/strings.h", "config.h", "missing.h"]);

        let extractor = CppExtractor::new().unwrap();
        let files: HashSet<String> = ["src/app/main.cpp", "include/util/strings.h", "src/app/config.h"]
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
        let resolved: Vec<Resolution> = record
            .imports
            .iter()
            .map(|edge| extractor.resolve_import(edge, &ctx))
            .collect();
        assert_eq!(
            resolved,
            vec![
                Resolution::External("vector".to_string()),
                Resolution::Internal(vec!["include/util/strings.h".to_string()]),
                Resolution::Internal(vec!["src/app/config.h".to_string()]),
                Resolution::Unresolved,
            ]
        );
    }

    #[test]
    fn test_namespaces_and_header_guards() {
        let content = r#"#ifndef SHAPES_H
#define SHAPES_H

namespace geo {
namespace detail {
double square(double x);
}

/// Base of all shapes.
class Shape {
public:
    virtual ~Shape() {}
    virtual double area() const = 0;
};

struct Circle : public Shape {
    double r;
    double area() const override { return 3.14 * r * r; }
};

enum class Color { Red, Green };
}

#endif
"#;
        let record = extract("shapes.h", content);
        assert_eq!(record.namespaces, vec!["geo", "geo::detail"]);
        let square = function(&record, "square");
        assert!(square.is_declaration);

        let shape = &record.classes[0];
        assert_eq!(shape.name, "Shape");
        assert_eq!(shape.docstring.as_deref(), Some("Base of all shapes."));
        assert!(shape.is_abstract);
        assert!(shape.is_interface_like());
        assert!(shape.methods[0].is_special);

        let circle = &record.classes[1];
        assert_eq!(circle.kind, ClassKind::Struct);
        assert_eq!(circle.bases, vec!["Shape"]);
        assert_eq!(circle.fields[0].visibility, Visibility::Public);

        let color = &record.classes[2];
        assert_eq!(color.kind, ClassKind::Enum);
        assert_eq!(color.fields.len(), 2);
    }

    #[test]
    fn test_singleton_shape() {
        let content = r#"
class Registry {
public:
    static Registry& instance() {
        static Registry* inst = new Registry();
        return *inst;
    }
private:
    Registry() {}
    static Registry* instance_;
};
"#;
        let record = extract("registry.hpp", content);
        let class = &record.classes[0];
        assert_eq!(class.fields[0].name, "instance_");
        assert!(class.fields[0].is_static);
        assert_eq!(class.fields[0].type_hint.as_deref(), Some("Registry*"));
        let accessor = &class.methods[0];
        assert!(accessor.is_static);
        assert_eq!(accessor.return_type.as_deref(), Some("Registry&"));
        assert_eq!(accessor.instantiates, vec!["Registry"]);
        let ctor = class.constructor().unwrap();
        assert_eq!(ctor.visibility, Visibility::Private);
    }

    #[test]
    fn test_io_and_detached_methods() {
        let content = r#"
#include "engine.h"

void Engine::start() {
    printf("starting\n");
    this->running = true;
}

int counter = 0;
void tick() { counter++; }
void show(int v) { std::cout << v; }
"#;
        let record = extract("engine.cpp", content);
        let start = function(&record, "start");
        assert_eq!(start.class_name.as_deref(), Some("Engine"));
        assert_eq!(start.qualified_name.as_str(), "engine.cpp::Engine::start");
        assert_eq!(start.side_effects, vec!["writes this.running", "calls printf"]);
        assert_eq!(function(&record, "tick").side_effects, vec!["writes counter"]);
        assert_eq!(function(&record, "show").side_effects, vec!["calls cout"]);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["language"], "cpp");
    }
}
