use std::path::Path;

use anyhow::{Context, Result};
use tree_sitter::{Language as Grammar, Node, Parser, Query, QueryCursor, StreamingIterator};

use prism_core::analyzer::{LanguageExtractor, ParsedFile};
use prism_core::error::ExtractError;
use prism_core::extract::{FileBuilder, FunctionDraft};
use prism_core::resolve::{Resolution, ResolveContext};
use prism_core::scope::{ScopeId, ScopeKind};
use prism_core::syntax::{
    children, has_token, leading_comment, line_range, named_children, node_str, node_text, start_line, Binding,
    BodySyntax, LanguageProfile, WriteTarget,
};
use prism_core::types::{
    CallReceiver, CallSite, ClassKind, ClassSymbol, FieldDecl, FileRecord, ImportEdge, ImportedName, Language,
    Parameter, Visibility,
};

const USING_QUERY_SRC: &str = r#"
(using_directive) @using
"#;

static PROFILE: LanguageProfile = LanguageProfile {
    branch_kinds: &["if_statement", "conditional_expression"],
    loop_kinds: &["for_statement", "foreach_statement", "while_statement", "do_statement"],
    arm_kinds: &["switch_section", "switch_expression_arm"],
    handler_kinds: &["catch_clause"],
    logical_kinds: &["binary_expression"],
    logical_operators: &["&&", "||", "??"],
    nesting_kinds: &[
        "if_statement",
        "for_statement",
        "foreach_statement",
        "while_statement",
        "do_statement",
        "switch_statement",
        "try_statement",
        "using_statement",
        "lock_statement",
    ],
    definition_kinds: &[
        "local_function_statement",
        "class_declaration",
        "struct_declaration",
        "interface_declaration",
        "record_declaration",
    ],
    block_scope_kinds: &[
        "block",
        "for_statement",
        "foreach_statement",
        "catch_clause",
        "using_statement",
        "lambda_expression",
        "anonymous_method_expression",
    ],
    call_kinds: &["invocation_expression", "object_creation_expression"],
    return_kinds: &["return_statement", "arrow_expression_clause"],
    yield_kinds: &["yield_statement"],
    await_kinds: &["await_expression"],
    io_calls: &[
        "Console.*",
        "File.*",
        "Directory.*",
        "Process.*",
        "Debug.*",
        "Trace.*",
        "System.Console.*",
        "System.IO.*",
        "Environment.Exit",
    ],
    nondeterministic_calls: &["Guid.NewGuid", "Random.*", "Stopwatch.*", "Environment.TickCount*"],
    io_identifiers: &[],
    self_names: &["this"],
    assignment_declares: false,
};

/// Body hooks for the C# grammar.
struct CSharpSyntax;

static SYNTAX: CSharpSyntax = CSharpSyntax;

impl BodySyntax for CSharpSyntax {
    fn profile(&self) -> &'static LanguageProfile {
        &PROFILE
    }

    fn call_site(&self, node: Node<'_>, source: &str) -> Option<CallSite> {
        let line = start_line(node);
        if node.kind() == "object_creation_expression" {
            let type_name = type_name(node_str(node.child_by_field_name("type")?, source));
            return Some(CallSite::new(type_name, CallReceiver::Bare, line));
        }
        let function = node.child_by_field_name("function")?;
        match function.kind() {
            "identifier" | "generic_name" => {
                let name = strip_generics(node_str(function, source));
                Some(CallSite::new(name, CallReceiver::Bare, line).with_member_lookup())
            }
            "member_access_expression" => {
                let object = function.child_by_field_name("expression")?;
                let name = strip_generics(node_str(function.child_by_field_name("name")?, source));
                let receiver = match object.kind() {
                    "this" | "this_expression" => CallReceiver::SelfRef,
                    _ => CallReceiver::Named(strip_generics(&compact(node_str(object, source)))),
                };
                let raw = strip_generics(&compact(node_str(function, source)));
                Some(CallSite::new(name, receiver, line).with_raw(raw))
            }
            _ => None,
        }
    }

    fn instantiation(&self, node: Node<'_>, source: &str) -> Option<String> {
        (node.kind() == "object_creation_expression")
            .then(|| node.child_by_field_name("type"))
            .flatten()
            .map(|t| type_name(node_str(t, source)))
    }

    fn nested_function<'t>(&self, node: Node<'t>, source: &str) -> Option<FunctionDraft<'t>> {
        if node.kind() != "local_function_statement" {
            return None;
        }
        let mut draft = method_draft(node, source, None, Visibility::Private);
        draft.is_entry = false;
        Some(draft)
    }

    fn declarations(&self, node: Node<'_>, source: &str) -> Vec<Binding> {
        let mut out = Vec::new();
        match node.kind() {
            "variable_declaration" => {
                let is_const = node
                    .parent()
                    .is_some_and(|p| modifiers(p, source).iter().any(|m| m == "const"));
                let type_hint = field_text(node, "type", source).filter(|t| t != "var");
                for declarator in named_children(node)
                    .into_iter()
                    .filter(|d| d.kind() == "variable_declarator")
                {
                    let Some(name) = declarator_name(declarator) else {
                        continue;
                    };
                    out.push(Binding {
                        name: node_text(name, source),
                        type_hint: type_hint.clone(),
                        is_const,
                        initialized: has_token(declarator, "="),
                        node_id: name.id(),
                        line: start_line(name),
                    });
                }
            }
            "foreach_statement" => {
                if let Some(name) = node.child_by_field_name("left").filter(|l| l.kind() == "identifier") {
                    out.push(Binding {
                        name: node_text(name, source),
                        type_hint: field_text(node, "type", source).filter(|t| t != "var"),
                        is_const: false,
                        initialized: true,
                        node_id: name.id(),
                        line: start_line(name),
                    });
                }
            }
            "catch_declaration" | "declaration_expression" => {
                if let Some(name) = node.child_by_field_name("name") {
                    out.push(Binding {
                        name: node_text(name, source),
                        type_hint: field_text(node, "type", source).filter(|t| t != "var"),
                        is_const: false,
                        initialized: true,
                        node_id: name.id(),
                        line: start_line(name),
                    });
                }
            }
            "lambda_expression" => {
                if let Some(params) = node.child_by_field_name("parameters") {
                    let names: Vec<Node<'_>> = match params.kind() {
                        "identifier" => vec![params],
                        _ => named_children(params)
                            .into_iter()
                            .filter_map(|p| p.child_by_field_name("name"))
                            .collect(),
                    };
                    for name in names {
                        out.push(Binding {
                            name: node_text(name, source),
                            type_hint: None,
                            is_const: false,
                            initialized: true,
                            node_id: name.id(),
                            line: start_line(name),
                        });
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
            "postfix_unary_expression" | "prefix_unary_expression"
                if has_token(node, "++") || has_token(node, "--") =>
            {
                node.named_child(0)
            }
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
            text.strip_prefix(base.as_str())
                .unwrap_or(&text)
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

fn chain_root(node: Node<'_>) -> Option<Node<'_>> {
    let mut current = node;
    loop {
        match current.kind() {
            "identifier" | "this" | "this_expression" => return Some(current),
            "member_access_expression" | "element_access_expression" => {
                current = current.child_by_field_name("expression")?
            }
            "parenthesized_expression" => current = current.named_child(0)?,
            _ => return None,
        }
    }
}

fn declarator_name(declarator: Node<'_>) -> Option<Node<'_>> {
    declarator
        .child_by_field_name("name")
        .or_else(|| named_children(declarator).into_iter().find(|c| c.kind() == "identifier"))
}

fn field_text(node: Node<'_>, field: &str, source: &str) -> Option<String> {
    node.child_by_field_name(field).map(|n| squeeze(node_str(n, source)))
}

fn compact(text: &str) -> String {
    text.split_whitespace().collect()
}

fn squeeze(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop `<...>` type argument lists, including nested ones.
fn strip_generics(text: &str) -> String {
    let mut out = String::new();
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

/// `System.Collections.Generic.List<int>` -> `List`.
fn type_name(text: &str) -> String {
    let plain = strip_generics(text);
    let plain = plain.trim_end_matches(['?', '[', ']']);
    plain.rsplit('.').next().unwrap_or(plain).to_string()
}

/// Modifier keywords on a declaration, in source order.
fn modifiers(node: Node<'_>, source: &str) -> Vec<String> {
    const KEYWORDS: &[&str] = &[
        "public", "private", "protected", "internal", "static", "abstract", "virtual", "override", "sealed",
        "async", "const", "readonly", "extern", "partial", "new",
    ];
    children(node)
        .into_iter()
        .filter(|c| c.kind() == "modifier" || (!c.is_named() && KEYWORDS.contains(&c.kind())))
        .map(|c| node_text(c, source))
        .collect()
}

fn visibility(mods: &[String], default: Visibility) -> Visibility {
    let has = |m: &str| mods.iter().any(|x| x == m);
    match (has("private"), has("protected"), has("internal"), has("public")) {
        (_, _, _, true) => Visibility::Public,
        (_, true, _, _) => Visibility::Protected,
        (true, _, _, _) => Visibility::Private,
        (_, _, true, _) => Visibility::Internal,
        _ => default,
    }
}

fn attributes(node: Node<'_>, source: &str) -> Vec<String> {
    named_children(node)
        .into_iter()
        .filter(|c| c.kind() == "attribute_list")
        .flat_map(named_children)
        .filter(|a| a.kind() == "attribute")
        .filter_map(|a| a.child_by_field_name("name").map(|n| compact(node_str(n, source))))
        .collect()
}

fn bases(node: Node<'_>, source: &str) -> Vec<String> {
    named_children(node)
        .into_iter()
        .filter(|c| c.kind() == "base_list")
        .flat_map(|list| {
            strip_generics(node_str(list, source).trim_start_matches(':'))
                .split(',')
                .map(|b| type_name(b.trim()))
                .filter(|b| !b.is_empty())
                .collect::<Vec<_>>()
        })
        .collect()
}

fn parameters(list: Node<'_>, source: &str) -> Vec<Parameter> {
    named_children(list)
        .into_iter()
        .filter(|p| p.kind() == "parameter")
        .filter_map(|p| {
            let name = p.child_by_field_name("name")?;
            let mut param = Parameter::new(node_text(name, source), field_text(p, "type", source));
            let text = node_str(p, source);
            param.default = text
                .get(name.end_byte() - p.start_byte()..)
                .and_then(|rest| rest.split_once('='))
                .map(|(_, value)| value.trim().to_string());
            Some(param)
        })
        .collect()
}

fn is_doc_comment(text: &str) -> bool {
    text.starts_with("//") || text.starts_with("/*")
}

/// Walks a compilation unit into a [`FileBuilder`].
struct UnitWalker<'b, 's> {
    builder: &'b mut FileBuilder<'s>,
    source: &'s str,
}

impl<'b, 's> UnitWalker<'b, 's> {
    fn walk(&mut self, container: Node<'_>, scope: ScopeId, namespace: &str) {
        let mut scope = scope;
        let mut namespace = namespace.to_string();
        for item in named_children(container) {
            match item.kind() {
                "file_scoped_namespace_declaration" => {
                    // Everything after `namespace X;` belongs to X, whether the grammar
                    // nests it under this node or leaves it as siblings.
                    let name = field_text(item, "name", self.source).map(|n| compact(&n));
                    if let Some(name) = name {
                        namespace = join_namespace(&namespace, &name);
                        self.builder.add_namespace(&namespace);
                        scope = self.builder.open_scope(scope, ScopeKind::Namespace, Some(&namespace));
                    }
                    let name_id = item.child_by_field_name("name").map(|n| n.id());
                    for child in named_children(item) {
                        if Some(child.id()) != name_id {
                            self.item(child, scope, &namespace);
                        }
                    }
                }
                _ => self.item(item, scope, &namespace),
            }
        }
    }

    fn item(&mut self, item: Node<'_>, scope: ScopeId, namespace: &str) {
        match item.kind() {
            "namespace_declaration" => {
                let Some(name) = field_text(item, "name", self.source).map(|n| compact(&n)) else {
                    return;
                };
                let full = join_namespace(namespace, &name);
                self.builder.add_namespace(&full);
                let inner = self.builder.open_scope(scope, ScopeKind::Namespace, Some(&full));
                if let Some(body) = item.child_by_field_name("body") {
                    self.walk(body, inner, &full);
                }
            }
            "class_declaration" | "struct_declaration" | "interface_declaration" | "record_declaration"
            | "record_struct_declaration" | "enum_declaration" => self.class(item, scope),
            "global_statement" => {
                for child in named_children(item) {
                    if child.kind() == "local_function_statement" {
                        let draft = method_draft(child, self.source, None, Visibility::Private);
                        let function = self.builder.build_function(draft, scope, &SYNTAX);
                        self.builder.push_function(function);
                    } else {
                        self.builder.walk_module_statement(child, scope, &SYNTAX);
                    }
                }
            }
            _ => {}
        }
    }

    fn class(&mut self, node: Node<'_>, scope: ScopeId) {
        let source = self.source;
        let Some(name) = field_text(node, "name", source) else {
            return;
        };
        let kind = match node.kind() {
            "interface_declaration" => ClassKind::Interface,
            "struct_declaration" => ClassKind::Struct,
            "enum_declaration" => ClassKind::Enum,
            "record_declaration" | "record_struct_declaration" => ClassKind::Record,
            _ => ClassKind::Class,
        };
        let mods = modifiers(node, source);
        let mut class = ClassSymbol::new(name.clone(), kind, line_range(node));
        class.docstring = leading_comment(node, source, is_doc_comment);
        class.decorators = attributes(node, source);
        class.bases = bases(node, source);
        class.is_abstract = kind == ClassKind::Interface || mods.iter().any(|m| m == "abstract");

        // Positional record parameters are public properties.
        if let Some(list) = named_children(node).into_iter().find(|c| c.kind() == "parameter_list") {
            for param in parameters(list, source) {
                class.fields.push(FieldDecl {
                    name: param.name,
                    type_hint: param.type_hint,
                    is_static: false,
                    visibility: Visibility::Public,
                    line: start_line(list),
                });
            }
        }

        let class_scope = self.builder.open_scope(scope, ScopeKind::Class, Some(&name));
        let member_default = if kind == ClassKind::Interface {
            Visibility::Public
        } else {
            Visibility::Private
        };
        if let Some(body) = node.child_by_field_name("body") {
            for member in named_children(body) {
                self.member(member, &mut class, class_scope, member_default);
            }
        }
        self.builder.push_class(class);
    }

    fn member(&mut self, member: Node<'_>, class: &mut ClassSymbol, class_scope: ScopeId, default: Visibility) {
        let source = self.source;
        match member.kind() {
            "method_declaration" | "constructor_declaration" | "destructor_declaration" | "operator_declaration" => {
                let mut draft = method_draft(member, source, Some(&class.name), default);
                if class.kind == ClassKind::Interface && draft.body.is_none() && !draft.is_static {
                    draft.is_abstract = true;
                }
                let method = self.builder.build_function(draft, class_scope, &SYNTAX);
                class.methods.push(method);
            }
            "field_declaration" => {
                let mods = modifiers(member, source);
                let is_static = mods.iter().any(|m| m == "static" || m == "const");
                let vis = visibility(&mods, default);
                let Some(declaration) = named_children(member)
                    .into_iter()
                    .find(|c| c.kind() == "variable_declaration")
                else {
                    return;
                };
                let type_hint = field_text(declaration, "type", source);
                for declarator in named_children(declaration)
                    .into_iter()
                    .filter(|d| d.kind() == "variable_declarator")
                {
                    if let Some(name) = declarator_name(declarator) {
                        class.fields.push(FieldDecl {
                            name: node_text(name, source),
                            type_hint: type_hint.clone(),
                            is_static,
                            visibility: vis,
                            line: start_line(declarator),
                        });
                    }
                }
            }
            "property_declaration" => {
                let mods = modifiers(member, source);
                if let Some(name) = field_text(member, "name", source) {
                    class.fields.push(FieldDecl {
                        name,
                        type_hint: field_text(member, "type", source),
                        is_static: mods.iter().any(|m| m == "static"),
                        visibility: visibility(&mods, default),
                        line: start_line(member),
                    });
                }
            }
            "enum_member_declaration" => {
                if let Some(name) = field_text(member, "name", source) {
                    class.fields.push(FieldDecl {
                        name,
                        type_hint: Some(class.name.clone()),
                        is_static: true,
                        visibility: Visibility::Public,
                        line: start_line(member),
                    });
                }
            }
            "class_declaration" | "struct_declaration" | "interface_declaration" | "record_declaration"
            | "record_struct_declaration" | "enum_declaration" => self.class(member, class_scope),
            _ => {}
        }
    }
}

/// Draft for a method, constructor, operator, or local function.
fn method_draft<'t>(node: Node<'t>, source: &str, class: Option<&str>, default: Visibility) -> FunctionDraft<'t> {
    let mods = modifiers(node, source);
    let has = |m: &str| mods.iter().any(|x| x == m);
    let name = match node.kind() {
        "destructor_declaration" => format!("~{}", field_text(node, "name", source).unwrap_or_default()),
        "operator_declaration" => format!(
            "operator{}",
            field_text(node, "operator", source).unwrap_or_default()
        ),
        _ => field_text(node, "name", source).unwrap_or_default(),
    };
    let mut draft = FunctionDraft::new(name, node);
    draft.class_name = class.map(str::to_string);
    draft.body = node.child_by_field_name("body");
    draft.parameters = node
        .child_by_field_name("parameters")
        .map(|list| parameters(list, source))
        .unwrap_or_default();
    draft.return_type = field_text(node, "returns", source).or_else(|| field_text(node, "type", source));
    draft.docstring = leading_comment(node, source, is_doc_comment);
    draft.decorators = attributes(node, source);
    draft.is_async = has("async");
    draft.is_static = has("static");
    draft.is_abstract = has("abstract");
    draft.is_constructor = node.kind() == "constructor_declaration";
    draft.is_special = matches!(node.kind(), "destructor_declaration" | "operator_declaration");
    draft.visibility = visibility(&mods, default);
    draft.is_entry = draft.name == "Main" && draft.is_static;
    draft
}

fn join_namespace(outer: &str, name: &str) -> String {
    if outer.is_empty() {
        name.to_string()
    } else {
        format!("{outer}.{name}")
    }
}

/// C# extractor using tree-sitter.
pub struct CSharpExtractor {
    grammar: Grammar,
    using_query: Query,
}

impl CSharpExtractor {
    pub fn new() -> Result<Self> {
        let grammar: Grammar = tree_sitter_c_sharp::LANGUAGE.into();
        let using_query =
            Query::new(&grammar, USING_QUERY_SRC).context("failed to compile C# using query")?;
        Ok(Self { grammar, using_query })
    }

    /// `using A.B;`, `using static A.B.C;`, `using X = A.B;`, `global using A;`.
    fn extract_usings(&self, parsed: &ParsedFile) -> Vec<ImportEdge> {
        let source = parsed.content.as_str();
        let mut edges = Vec::new();
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&self.using_query, parsed.tree.root_node(), source.as_bytes());
        while let Some(m) = matches.next() {
            for capture in m.captures {
                let node = capture.node;
                let text = squeeze(node_str(node, source));
                let mut rest = text.as_str();
                rest = rest.strip_prefix("global ").unwrap_or(rest);
                rest = rest.strip_prefix("using ").unwrap_or(rest);
                let is_static = rest.starts_with("static ");
                rest = rest.strip_prefix("static ").unwrap_or(rest);
                let rest = rest.trim_end_matches(';').trim();

                let (alias, target) = match rest.split_once('=') {
                    Some((alias, target)) => (Some(alias.trim().to_string()), target.trim()),
                    None => (None, rest),
                };
                let target = target.replace(' ', "");
                if target.is_empty() {
                    continue;
                }
                let mut edge = ImportEdge::new("", target.clone(), start_line(node));
                edge.alias = alias;
                if is_static {
                    edge.names.push(ImportedName::new(type_name(&target), None));
                }
                edges.push(edge);
            }
        }
        edges
    }
}

impl LanguageExtractor for CSharpExtractor {
    fn language(&self) -> Language {
        Language::CSharp
    }

    fn file_extensions(&self) -> &[&str] {
        &["cs"]
    }

    fn parse_file(&self, path: &Path, content: &str) -> Result<ParsedFile, ExtractError> {
        let mut parser = Parser::new();
        parser
            .set_language(&self.grammar)
            .map_err(|e| ExtractError::Grammar {
                language: "csharp".to_string(),
                message: e.to_string(),
            })?;
        let tree = parser.parse(content, None).ok_or_else(|| ExtractError::ParseAborted {
            path: path.display().to_string(),
        })?;
        Ok(ParsedFile {
            path: path.to_path_buf(),
            language: Language::CSharp,
            tree,
            content: content.to_string(),
        })
    }

    fn extract(&self, parsed: &ParsedFile) -> FileRecord {
        let path = parsed.relative_path();
        let mut builder = FileBuilder::new(&path, Language::CSharp, &parsed.content);
        for edge in self.extract_usings(parsed) {
            builder.add_import(edge);
        }
        let scope = builder.root_scope();
        let mut walker = UnitWalker {
            source: builder.source(),
            builder: &mut builder,
        };
        walker.walk(parsed.tree.root_node(), scope, "");
        builder.finish()
    }

    fn resolve_import(&self, edge: &ImportEdge, ctx: &ResolveContext<'_>) -> Resolution {
        let specifier = edge.specifier.as_str();
        let mut declaring = ctx.namespace_files(specifier);
        // `using static A.B.Util;` and `using U = A.B.Util;` name a type inside a namespace.
        if declaring.is_empty() && (edge.alias.is_some() || !edge.names.is_empty()) {
            if let Some((parent, _)) = specifier.rsplit_once('.') {
                declaring = ctx.namespace_files(parent);
            }
        }
        if declaring.is_empty() {
            let package = specifier.split('.').next().unwrap_or(specifier);
            return Resolution::External(package.to_string());
        }
        let targets: Vec<String> = declaring.iter().filter(|f| **f != edge.source).cloned().collect();
        if targets.is_empty() {
            Resolution::Unresolved
        } else {
            Resolution::Internal(targets)
        }
    }
}
