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
    has_token, line_range, named_children, node_str, node_text, start_line, strip_quotes, Binding,
    BodySyntax, LanguageProfile, WriteTarget,
};
use prism_core::types::{
    short_name, CallReceiver, CallSite, ClassKind, ClassSymbol, FieldDecl, FileRecord, ImportEdge,
    ImportedName, Language, Parameter, Visibility,
};

const IMPORT_QUERY_SRC: &str = r#"
[
  (import_statement)
  (import_from_statement)
] @import
"#;

static PROFILE: LanguageProfile = LanguageProfile {
    branch_kinds: &["if_statement", "elif_clause", "conditional_expression"],
    loop_kinds: &["for_statement", "while_statement"],
    arm_kinds: &["case_clause"],
    handler_kinds: &["except_clause", "except_group_clause"],
    logical_kinds: &["boolean_operator"],
    logical_operators: &["and", "or"],
    nesting_kinds: &[
        "if_statement",
        "for_statement",
        "while_statement",
        "try_statement",
        "with_statement",
        "match_statement",
    ],
    definition_kinds: &["function_definition", "class_definition", "decorated_definition"],
    block_scope_kinds: &[
        "list_comprehension",
        "set_comprehension",
        "dictionary_comprehension",
        "generator_expression",
    ],
    call_kinds: &["call"],
    return_kinds: &["return_statement"],
    yield_kinds: &["yield"],
    await_kinds: &["await"],
    io_calls: &[
        "print",
        "open",
        "input",
        "exec",
        "os.*",
        "sys.stdout.*",
        "sys.stderr.*",
        "subprocess.*",
        "shutil.*",
        "socket.*",
        "requests.*",
        "urllib.*",
        "logging.*",
        "json.dump",
        "pickle.dump",
    ],
    nondeterministic_calls: &[
        "random.*",
        "secrets.*",
        "uuid.uuid1",
        "uuid.uuid4",
        "time.time",
        "time.monotonic",
        "time.perf_counter",
        "datetime.now",
        "datetime.utcnow",
        "datetime.datetime.now",
        "datetime.datetime.utcnow",
        "os.urandom",
    ],
    io_identifiers: &[],
    self_names: &["self", "cls"],
    assignment_declares: true,
};

const ENUM_BASES: &[&str] = &["Enum", "IntEnum", "StrEnum", "Flag", "IntFlag"];
const ABSTRACT_BASES: &[&str] = &["ABC", "ABCMeta"];

/// Body hooks for the Python grammar.
struct PythonSyntax;

static SYNTAX: PythonSyntax = PythonSyntax;

impl BodySyntax for PythonSyntax {
    fn profile(&self) -> &'static LanguageProfile {
        &PROFILE
    }

    fn call_site(&self, node: Node<'_>, source: &str) -> Option<CallSite> {
        let function = node.child_by_field_name("function")?;
        let line = start_line(node);
        match function.kind() {
            "identifier" => Some(CallSite::new(node_text(function, source), CallReceiver::Bare, line)),
            "attribute" => {
                let object = function.child_by_field_name("object")?;
                let name = field_text(function, "attribute", source)?;
                let receiver = compact(node_str(object, source));
                let receiver = if PROFILE.is_self_name(&receiver) {
                    CallReceiver::SelfRef
                } else {
                    CallReceiver::Named(receiver)
                };
                Some(CallSite::new(name, receiver, line).with_raw(compact(node_str(function, source))))
            }
            _ => None,
        }
    }

    fn instantiation(&self, node: Node<'_>, source: &str) -> Option<String> {
        if node.kind() != "call" || node.parent().is_some_and(|p| p.kind() == "raise_statement") {
            return None;
        }
        let function = node.child_by_field_name("function")?;
        let name = match function.kind() {
            "identifier" => node_text(function, source),
            "attribute" => field_text(function, "attribute", source)?,
            _ => return None,
        };
        looks_like_type(&name).then_some(name)
    }

    fn declarations(&self, node: Node<'_>, source: &str) -> Vec<Binding> {
        let mut out = Vec::new();
        match node.kind() {
            "for_statement" | "for_in_clause" => {
                if let Some(left) = node.child_by_field_name("left") {
                    pattern_identifiers(left, source, &mut out);
                }
            }
            "as_pattern_target" => pattern_identifiers(node, source, &mut out),
            _ => {}
        }
        out
    }

    fn writes(&self, node: Node<'_>, source: &str) -> Vec<WriteTarget> {
        let mut out = Vec::new();
        match node.kind() {
            "assignment" | "augmented_assignment" => {
                let type_hint = field_text(node, "type", source);
                if let Some(left) = node.child_by_field_name("left") {
                    write_targets(left, source, type_hint, &mut out);
                }
            }
            "named_expression" => {
                if let Some(name) = node.child_by_field_name("name") {
                    write_targets(name, source, None, &mut out);
                }
            }
            _ => {}
        }
        out
    }

    fn outer_bindings(&self, node: Node<'_>, source: &str) -> Vec<String> {
        match node.kind() {
            "global_statement" | "nonlocal_statement" => named_children(node)
                .into_iter()
                .filter(|c| c.kind() == "identifier")
                .map(|c| node_text(c, source))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn nested_function<'t>(&self, node: Node<'t>, source: &str) -> Option<FunctionDraft<'t>> {
        let (definition, decorators) = unwrap_decorated(node, source);
        if definition.kind() != "function_definition" {
            return None;
        }
        let mut draft = function_draft(definition, source, None, decorators);
        // Only a registration decorator makes an inner function an entry.
        draft.is_entry = draft.decorators.iter().any(|d| is_registration(d));
        Some(draft)
    }

    fn identifier(&self, node: Node<'_>, source: &str) -> Option<String> {
        if node.kind() != "identifier" {
            return None;
        }
        let parent = node.parent()?;
        let is_field = |field: &str| parent.child_by_field_name(field).is_some_and(|n| n.id() == node.id());
        match parent.kind() {
            "attribute" if is_field("attribute") => None,
            "keyword_argument" if is_field("name") => None,
            _ => Some(node_text(node, source)),
        }
    }
}

fn pattern_identifiers(node: Node<'_>, source: &str, out: &mut Vec<Binding>) {
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        match current.kind() {
            "identifier" => out.push(Binding {
                name: node_text(current, source),
                type_hint: None,
                is_const: false,
                initialized: true,
                node_id: current.id(),
                line: start_line(current),
            }),
            "pattern_list" | "tuple_pattern" | "list_pattern" | "as_pattern_target" | "parenthesized_expression" => {
                stack.extend(named_children(current).into_iter().rev());
            }
            _ => {}
        }
    }
}

fn write_targets(node: Node<'_>, source: &str, type_hint: Option<String>, out: &mut Vec<WriteTarget>) {
    // Only a target written directly carries the annotation.
    let mut stack = vec![(node, type_hint)];
    while let Some((current, type_hint)) = stack.pop() {
        match current.kind() {
            "identifier" => out.push(WriteTarget {
                base: node_text(current, source),
                member: None,
                type_hint,
                node_id: current.id(),
                line: start_line(current),
            }),
            "pattern_list" | "tuple_pattern" | "list_pattern" => {
                stack.extend(named_children(current).into_iter().rev().map(|child| (child, None)));
            }
            "attribute" | "subscript" => {
                let Some(root) = root_identifier(current) else {
                    continue;
                };
                let base = node_text(root, source);
                let text = compact(node_str(current, source));
                let member = text
                    .strip_prefix(base.as_str())
                    .unwrap_or(&text)
                    .trim_start_matches('.')
                    .to_string();
                out.push(WriteTarget {
                    base,
                    member: Some(member),
                    type_hint,
                    node_id: root.id(),
                    line: start_line(current),
                });
            }
            _ => {}
        }
    }
}

/// Leftmost identifier of an attribute or subscript chain.
fn root_identifier(node: Node<'_>) -> Option<Node<'_>> {
    let mut current = node;
    loop {
        match current.kind() {
            "identifier" => return Some(current),
            "attribute" => current = current.child_by_field_name("object")?,
            "subscript" => current = current.child_by_field_name("value")?,
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

/// CapWords names are classes by convention.
fn looks_like_type(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase) && name.chars().any(char::is_lowercase)
}

fn visibility(name: &str) -> Visibility {
    if name.starts_with("__") && !name.ends_with("__") {
        Visibility::Private
    } else if name.starts_with('_') && !name.ends_with("__") {
        Visibility::Protected
    } else {
        Visibility::Public
    }
}

fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

/// Docstring of a `block`: a string literal as its first statement.
fn docstring(body: Node<'_>, source: &str) -> Option<String> {
    let first = named_children(body).into_iter().find(|c| c.kind() != "comment")?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = named_children(first).into_iter().next()?;
    if string.kind() != "string" {
        return None;
    }
    let raw = node_str(string, source).trim_start_matches(|c: char| "rRbBuUfF".contains(c));
    let text = strip_quotes(raw);
    let cleaned: Vec<&str> = text.lines().map(str::trim).collect();
    let cleaned = cleaned.join("\n").trim().to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Peel a `decorated_definition`, returning the definition and decorator texts.
fn unwrap_decorated<'t>(node: Node<'t>, source: &str) -> (Node<'t>, Vec<String>) {
    if node.kind() != "decorated_definition" {
        return (node, Vec::new());
    }
    let decorators = named_children(node)
        .into_iter()
        .filter(|c| c.kind() == "decorator")
        .map(|d| node_str(d, source).trim_start_matches('@').trim().to_string())
        .collect();
    let definition = node.child_by_field_name("definition").unwrap_or(node);
    (definition, decorators)
}

fn parameters(node: Node<'_>, source: &str, skip_receiver: bool) -> Vec<Parameter> {
    let mut out = Vec::new();
    for (i, child) in named_children(node).into_iter().enumerate() {
        let param = match child.kind() {
            "identifier" => Parameter::new(node_text(child, source), None),
            "typed_parameter" => {
                let name = named_children(child)
                    .into_iter()
                    .next()
                    .map(|n| splat_name(n, source))
                    .unwrap_or_default();
                Parameter::new(name, field_text(child, "type", source))
            }
            "default_parameter" | "typed_default_parameter" => {
                let mut param = Parameter::new(
                    field_text(child, "name", source).unwrap_or_default(),
                    field_text(child, "type", source),
                );
                param.default = field_text(child, "value", source);
                param
            }
            "list_splat_pattern" | "dictionary_splat_pattern" => Parameter::new(splat_name(child, source), None),
            _ => continue,
        };
        if i == 0 && skip_receiver && PROFILE.is_self_name(&param.name) {
            continue;
        }
        out.push(param);
    }
    out
}

fn splat_name(node: Node<'_>, source: &str) -> String {
    node_str(node, source).trim_start_matches('*').to_string()
}

fn is_accessor(decorator: &str) -> bool {
    decorator.ends_with(".setter") || decorator.ends_with(".getter") || decorator.ends_with(".deleter")
}

/// Framework registration (`@app.route("/")`, `@pytest.fixture`) hands the function to a caller we never see.
fn is_registration(decorator: &str) -> bool {
    (decorator.contains('.') || decorator.contains('(')) && !is_accessor(decorator)
}

fn function_draft<'t>(
    node: Node<'t>,
    source: &str,
    class: Option<&str>,
    decorators: Vec<String>,
) -> FunctionDraft<'t> {
    let name = field_text(node, "name", source).unwrap_or_default();
    let is_staticmethod = decorators.iter().any(|d| d == "staticmethod");
    let is_classmethod = decorators.iter().any(|d| d == "classmethod");

    let mut draft = FunctionDraft::new(name.clone(), node);
    draft.class_name = class.map(str::to_string);
    draft.body = node.child_by_field_name("body");
    draft.docstring = draft.body.and_then(|b| docstring(b, source));
    draft.parameters = node
        .child_by_field_name("parameters")
        .map(|p| parameters(p, source, class.is_some() && !is_staticmethod))
        .unwrap_or_default();
    draft.return_type = field_text(node, "return_type", source);
    draft.is_async = has_token(node, "async");
    draft.is_static = is_staticmethod || is_classmethod;
    draft.is_abstract = decorators.iter().any(|d| short_name(d) == "abstractmethod");
    draft.is_constructor = class.is_some() && name == "__init__";
    // Properties are read, not called; accessor decorators count as special.
    let is_property = decorators.iter().any(|d| d == "property" || is_accessor(d));
    draft.is_special = (class.is_some() && is_dunder(&name)) || is_property;
    draft.is_entry = if class.is_some() {
        decorators.iter().any(|d| is_registration(d))
    } else {
        name == "main" || name.starts_with("test_") || decorators.iter().any(|d| is_registration(d))
    };
    draft.visibility = visibility(&name);
    draft.decorators = decorators;
    draft
}

/// Names listed in a module-level `__all__`.
fn exported_names(root: Node<'_>, source: &str) -> HashSet<String> {
    let mut names = HashSet::new();
    for statement in named_children(root) {
        if statement.kind() != "expression_statement" {
            continue;
        }
        for assignment in named_children(statement) {
            if assignment.kind() != "assignment" {
                continue;
            }
            if field_text(assignment, "left", source).as_deref() != Some("__all__") {
                continue;
            }
            if let Some(right) = assignment.child_by_field_name("right") {
                for item in named_children(right) {
                    if item.kind() == "string" {
                        names.insert(strip_quotes(node_str(item, source)));
                    }
                }
            }
        }
    }
    names
}

/// Type of the value assigned to a field, where it can be read off the syntax.
fn infer_field_type(value: Node<'_>, source: &str, params: &[Parameter]) -> Option<String> {
    match value.kind() {
        "call" => {
            let function = value.child_by_field_name("function")?;
            let name = match function.kind() {
                "identifier" => node_text(function, source),
                "attribute" => field_text(function, "attribute", source)?,
                _ => return None,
            };
            looks_like_type(&name).then_some(name)
        }
        "identifier" => {
            let name = node_str(value, source);
            params
                .iter()
                .find(|p| p.name == name)
                .and_then(|p| p.type_hint.clone())
        }
        _ => None,
    }
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

/// Fields assigned through `self.` or `cls.` anywhere in a method body.
fn collect_instance_fields(node: Node<'_>, source: &str, params: &[Parameter], fields: &mut Vec<FieldDecl>) {
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if matches!(
            current.kind(),
            "function_definition" | "class_definition" | "decorated_definition" | "lambda"
        ) {
            continue;
        }
        if matches!(current.kind(), "assignment" | "augmented_assignment") {
            if let Some(field) = instance_field(current, source, params) {
                add_field(fields, field);
            }
        }
        stack.extend(named_children(current).into_iter().rev());
    }
}

/// `self.name = value` or `cls.name = value` as a field declaration.
fn instance_field(node: Node<'_>, source: &str, params: &[Parameter]) -> Option<FieldDecl> {
    let left = node.child_by_field_name("left").filter(|l| l.kind() == "attribute")?;
    let receiver = left.child_by_field_name("object").map(|o| node_str(o, source))?;
    if receiver != "self" && receiver != "cls" {
        return None;
    }
    let name = field_text(left, "attribute", source)?;
    let type_hint = field_text(node, "type", source).or_else(|| {
        node.child_by_field_name("right")
            .and_then(|right| infer_field_type(right, source, params))
    });
    Some(FieldDecl {
        visibility: visibility(&name),
        name,
        type_hint,
        is_static: receiver == "cls",
        line: start_line(node),
    })
}

fn extract_class(
    builder: &mut FileBuilder<'_>,
    node: Node<'_>,
    decorators: Vec<String>,
    scope: ScopeId,
    exported: &HashSet<String>,
) {
    let source = builder.source();
    let Some(name) = field_text(node, "name", source) else {
        return;
    };

    let mut bases = Vec::new();
    let mut abstract_meta = false;
    if let Some(args) = node.child_by_field_name("superclasses") {
        for arg in named_children(args) {
            match arg.kind() {
                "identifier" | "attribute" => bases.push(node_text(arg, source)),
                "subscript" => {
                    if let Some(value) = arg.child_by_field_name("value") {
                        bases.push(node_text(value, source));
                    }
                }
                "keyword_argument" => {
                    let is_meta = field_text(arg, "name", source).as_deref() == Some("metaclass");
                    let value = field_text(arg, "value", source).unwrap_or_default();
                    abstract_meta |= is_meta && ABSTRACT_BASES.contains(&short_name(&value));
                }
                _ => {}
            }
        }
    }

    let kind = if bases.iter().any(|b| short_name(b) == "Protocol") {
        ClassKind::Interface
    } else if bases.iter().any(|b| ENUM_BASES.contains(&short_name(b))) {
        ClassKind::Enum
    } else {
        ClassKind::Class
    };

    let mut class = ClassSymbol::new(name.clone(), kind, line_range(node));
    class.is_exported = exported.contains(&name);
    let is_dataclass = decorators.iter().any(|d| d.contains("dataclass"));
    class.decorators = decorators;

    let class_scope = builder.open_scope(scope, ScopeKind::Class, Some(&name));
    let is_test_class = name.starts_with("Test");
    if let Some(body) = node.child_by_field_name("body") {
        class.docstring = docstring(body, source);
        for item in named_children(body) {
            match item.kind() {
                "function_definition" | "decorated_definition" | "class_definition" => {
                    let (definition, decos) = unwrap_decorated(item, source);
                    match definition.kind() {
                        "function_definition" => {
                            let mut draft = function_draft(definition, source, Some(&name), decos);
                            if kind == ClassKind::Interface {
                                draft.is_abstract = true;
                            }
                            draft.is_entry |= is_test_class && draft.name.starts_with("test_");
                            if let Some(body) = draft.body {
                                collect_instance_fields(body, source, &draft.parameters, &mut class.fields);
                            }
                            let method = builder.build_function(draft, class_scope, &SYNTAX);
                            class.methods.push(method);
                        }
                        "class_definition" => extract_class(builder, definition, decos, scope, exported),
                        _ => {}
                    }
                }
                "expression_statement" => {
                    for assignment in named_children(item) {
                        if assignment.kind() != "assignment" {
                            continue;
                        }
                        let Some(left) = assignment.child_by_field_name("left") else {
                            continue;
                        };
                        if left.kind() != "identifier" {
                            continue;
                        }
                        let field_name = node_text(left, source);
                        let type_hint = field_text(assignment, "type", source).or_else(|| {
                            assignment
                                .child_by_field_name("right")
                                .and_then(|right| infer_field_type(right, source, &[]))
                        });
                        add_field(
                            &mut class.fields,
                            FieldDecl {
                                visibility: visibility(&field_name),
                                name: field_name,
                                type_hint,
                                is_static: !is_dataclass,
                                line: start_line(assignment),
                            },
                        );
                    }
                    builder.walk_module_statement(item, class_scope, &SYNTAX);
                }
                _ => {}
            }
        }
    }

    class.is_abstract = abstract_meta
        || kind == ClassKind::Interface
        || bases.iter().any(|b| ABSTRACT_BASES.contains(&short_name(b)))
        || class.methods.iter().any(|m| m.is_abstract);
    class.bases = bases;
    builder.push_class(class);
}

/// Python extractor using tree-sitter.
pub struct PythonExtractor {
    grammar: Grammar,
    import_query: Query,
}

impl PythonExtractor {
    pub fn new() -> Result<Self> {
        let grammar: Grammar = tree_sitter_python::LANGUAGE.into();
        let import_query =
            Query::new(&grammar, IMPORT_QUERY_SRC).context("failed to compile Python import query")?;
        Ok(Self { grammar, import_query })
    }

    fn extract_imports(&self, parsed: &ParsedFile) -> Vec<ImportEdge> {
        let source = parsed.content.as_str();
        let mut edges = Vec::new();
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&self.import_query, parsed.tree.root_node(), source.as_bytes());
        while let Some(m) = matches.next() {
            for capture in m.captures {
                let node = capture.node;
                let line = start_line(node);
                match node.kind() {
                    "import_statement" => {
                        let mut cursor = node.walk();
                        for name in node.children_by_field_name("name", &mut cursor) {
                            let (module, alias) = aliased(name, source);
                            let mut edge = ImportEdge::new("", module.clone(), line);
                            edge.alias = Some(alias.unwrap_or(module));
                            edges.push(edge);
                        }
                    }
                    "import_from_statement" => {
                        let Some(module) = field_text(node, "module_name", source) else {
                            continue;
                        };
                        let mut edge = ImportEdge::new("", compact(&module), line);
                        let mut cursor = node.walk();
                        for name in node.children_by_field_name("name", &mut cursor) {
                            let (name, alias) = aliased(name, source);
                            edge.names.push(ImportedName::new(name, alias));
                        }
                        edges.push(edge);
                    }
                    _ => {}
                }
            }
        }
        edges
    }
}

/// `(name, alias)` of a `dotted_name` or `aliased_import`.
fn aliased(node: Node<'_>, source: &str) -> (String, Option<String>) {
    if node.kind() == "aliased_import" {
        let name = field_text(node, "name", source).unwrap_or_default();
        (name, field_text(node, "alias", source))
    } else {
        (node_text(node, source), None)
    }
}

fn join(base: &str, rel: &str) -> Option<String> {
    join_normalized(base, rel)
}

/// Files an import of `module` (with `names`) refers to, searched under `base`.
///
/// A plain module wins. Otherwise the package's submodules named by the
/// import; the package `__init__.py` only when none matched. The importing
/// file itself is never a candidate.
fn module_files(ctx: &ResolveContext<'_>, importer: &str, base: &str, module: &str, names: &[&str]) -> Vec<String> {
    let module_path = module.replace('.', "/");
    let Some(dir) = join(base, &module_path) else {
        return Vec::new();
    };
    if !module_path.is_empty() {
        if let Some(file) = ctx.first_existing([format!("{dir}.py"), format!("{dir}.pyi")]) {
            return if file == importer { Vec::new() } else { vec![file] };
        }
    }

    let mut found = Vec::new();
    for name in names {
        let Some(sub) = join(&dir, name) else {
            continue;
        };
        if let Some(file) = ctx.first_existing([format!("{sub}.py"), format!("{sub}/__init__.py")]) {
            if file != importer && !found.contains(&file) {
                found.push(file);
            }
        }
    }
    if found.is_empty() {
        let init = join(&dir, "__init__.py").filter(|p| p != importer && ctx.contains(p));
        found.extend(init);
    }
    found
}

/// Module-level statements of `block`. Definitions guarded by `if`, `try`,
/// or `with` are still module definitions; the guards run as module code.
fn module_block(builder: &mut FileBuilder<'_>, block: Node<'_>, module: ScopeId, exported: &HashSet<String>) {
    let source = builder.source();
    for item in named_children(block) {
        match item.kind() {
            "function_definition" | "decorated_definition" | "class_definition" => {
                let (definition, decorators) = unwrap_decorated(item, source);
                match definition.kind() {
                    "function_definition" => {
                        let mut draft = function_draft(definition, source, None, decorators);
                        draft.is_exported = exported.contains(&draft.name);
                        let function = builder.build_function(draft, module, &SYNTAX);
                        builder.push_function(function);
                    }
                    "class_definition" => extract_class(builder, definition, decorators, module, exported),
                    _ => {}
                }
            }
            "if_statement" | "try_statement" | "with_statement" => module_compound(builder, item, module, exported),
            "import_statement" | "import_from_statement" | "future_import_statement" | "comment" => {}
            _ => builder.walk_module_statement(item, module, &SYNTAX),
        }
    }
}

/// Split a compound statement into its guard expressions, walked as module
/// code, and its blocks, searched for definitions.
fn module_compound(builder: &mut FileBuilder<'_>, node: Node<'_>, module: ScopeId, exported: &HashSet<String>) {
    for child in named_children(node) {
        match child.kind() {
            "block" => module_block(builder, child, module, exported),
            "elif_clause" | "else_clause" | "except_clause" | "except_group_clause" | "finally_clause" => {
                module_compound(builder, child, module, exported)
            }
            "comment" => {}
            _ => builder.walk_module_statement(child, module, &SYNTAX),
        }
    }
}

impl LanguageExtractor for PythonExtractor {
    fn language(&self) -> Language {
        Language::Python
    }

    fn file_extensions(&self) -> &[&str] {
        &["py", "pyi"]
    }

    fn parse_file(&self, path: &Path, content: &str) -> Result<ParsedFile, ExtractError> {
        let mut parser = Parser::new();
        parser
            .set_language(&self.grammar)
            .map_err(|e| ExtractError::Grammar {
                language: "python".to_string(),
                message: e.to_string(),
            })?;
        let tree = parser.parse(content, None).ok_or_else(|| ExtractError::ParseAborted {
            path: path.display().to_string(),
        })?;
        Ok(ParsedFile {
            path: path.to_path_buf(),
            language: Language::Python,
            tree,
            content: content.to_string(),
        })
    }

    fn extract(&self, parsed: &ParsedFile) -> FileRecord {
        let path = parsed.relative_path();
        let source = parsed.content.as_str();
        let root = parsed.tree.root_node();
        let mut builder = FileBuilder::new(&path, Language::Python, source);
        for edge in self.extract_imports(parsed) {
            builder.add_import(edge);
        }

        let exported = exported_names(root, source);
        let module = builder.root_scope();
        module_block(&mut builder, root, module, &exported);
        builder.finish()
    }

    fn resolve_import(&self, edge: &ImportEdge, ctx: &ResolveContext<'_>) -> Resolution {
        let specifier = edge.specifier.as_str();
        let level = specifier.chars().take_while(|c| *c == '.').count();
        let module = &specifier[level..];
        let names: Vec<&str> = edge.names.iter().map(|n| n.name.as_str()).collect();

        if level > 0 {
            let mut base = Some(parent_dir(&edge.source).to_string());
            for _ in 1..level {
                base = base.and_then(|b| join(&b, ".."));
            }
            let Some(base) = base else {
                return Resolution::Unresolved;
            };
            let found = module_files(ctx, &edge.source, &base, module, &names);
            return if found.is_empty() {
                Resolution::Unresolved
            } else {
                Resolution::Internal(found)
            };
        }

        for base in ["", parent_dir(&edge.source)] {
            let found = module_files(ctx, &edge.source, base, module, &names);
            if !found.is_empty() {
                return Resolution::Internal(found);
            }
        }
        let package = module.split('.').next().unwrap_or(module);
        Resolution::External(package.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::config::ResolveConfig;
    use prism_core::types::{DiagnosticKind, SourceFile};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn extract(path: &str, content: &str) -> FileRecord {
        let extractor = PythonExtractor::new().unwrap();
        let parsed = extractor.parse_file(&PathBuf::from(path), content).unwrap();
        extractor.extract(&parsed)
    }

    fn function<'a>(record: &'a FileRecord, name: &str) -> &'a prism_core::types::FunctionSymbol {
        record
            .all_functions()
            .find(|f| f.name == name)
            .unwrap_or_else(|| panic!("no function {name}"))
    }

    #[test]
    fn test_counts_and_line_ranges() {
        let content = r#"import os

def first():
    return 1


def second(a, b=2):
    """Adds."""
    return a + b


class Service:
    """A service."""

    def __init__(self, repo):
        self.repo = repo

    def run(self):
        return self.repo.load()
"#;
        let record = extract("app/service.py", content);
        assert_eq!(record.functions.len(), 2);
        assert_eq!(record.classes.len(), 1);
        assert_eq!(record.functions[0].lines.start, 3);
        assert_eq!(record.functions[0].lines.end, 4);
        assert_eq!(record.functions[1].lines.start, 7);
        assert_eq!(record.functions[1].lines.end, 9);

        let class = &record.classes[0];
        assert_eq!(class.qualified_name.as_str(), "app/service.py::Service");
        assert_eq!(class.lines.start, 12);
        assert_eq!(class.lines.end, 19);
        assert_eq!(class.methods.len(), 2);
        assert_eq!(class.methods[1].qualified_name.as_str(), "app/service.py::Service::run");
        assert_eq!(class.docstring.as_deref(), Some("A service."));
        assert!(class.methods[0].is_constructor);
        assert!(class.methods[0].is_special);
    }

    #[test]
    fn test_complexity_counts_decision_points() {
        let content = r#"
def zero():
    return 1

def one(x):
    if x:
        return 1
    return 0

def three(xs, y):
    for x in xs:
        if x and y:
            return x
    return None
"#;
        let record = extract("c.py", content);
        assert_eq!(function(&record, "zero").complexity, 1);
        assert_eq!(function(&record, "one").complexity, 2);
        assert_eq!(function(&record, "three").complexity, 4);
        assert_eq!(function(&record, "three").max_nesting, 2);
    }

    #[test]
    fn test_parameters_docstring_and_types() {
        let content = r#"
class Repo:
    def save(self, item: "Item", *args, retries: int = 3, **kwargs) -> bool:
        '''Persist an item.'''
        return True
"#;
        let record = extract("r.py", content);
        let save = function(&record, "save");
        let names: Vec<&str> = save.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["item", "args", "retries", "kwargs"]);
        assert_eq!(save.parameters[0].type_hint.as_deref(), Some("\"Item\""));
        assert_eq!(save.parameters[2].default.as_deref(), Some("3"));
        assert_eq!(save.return_type.as_deref(), Some("bool"));
        assert_eq!(save.docstring.as_deref(), Some("Persist an item."));
        assert!(save.has_documentation);
    }

    #[test]
    fn test_purity_and_side_effects() {
        let content = r#"
counter = 0

def pure(a, b):
    total = a + b
    return total

def bump():
    global counter
    counter += 1

def shout(msg):
    print(msg)

def roll():
    return random.randint(1, 6)

def shadow():
    counter = 5
    return counter
"#;
        let record = extract("p.py", content);
        assert!(function(&record, "pure").is_pure);
        assert!(function(&record, "shadow").is_pure);

        let bump = function(&record, "bump");
        assert!(!bump.is_pure);
        assert!(bump.has_side_effects);
        assert_eq!(bump.side_effects, vec!["writes counter"]);

        let shout = function(&record, "shout");
        assert_eq!(shout.side_effects, vec!["calls print"]);

        let roll = function(&record, "roll");
        assert!(!roll.is_pure);
        assert!(!roll.has_side_effects);
    }

    #[test]
    fn test_async_generator_and_recursion_flags() {
        let content = r#"
async def fetch(client):
    return await client.get()

def numbers(n):
    for i in range(n):
        yield i

def fact(n):
    if n <= 1:
        return 1
    return n * fact(n - 1)
"#;
        let record = extract("f.py", content);
        assert!(function(&record, "fetch").is_async);
        assert!(function(&record, "numbers").is_generator);
        assert!(function(&record, "fact").is_recursive);
        assert!(!function(&record, "numbers").is_recursive);
    }

    #[test]
    fn test_imports_keep_bindings() {
        let content = r#"
import os
import pkg.tools as tools
from . import helpers
from ..core.models import User as U, Order
from typing import *
"#;
        let record = extract("app/api/views.py", content);
        let specs: Vec<&str> = record.imports.iter().map(|i| i.specifier.as_str()).collect();
        assert_eq!(specs, vec!["os", "pkg.tools", ".", "..core.models", "typing"]);
        assert_eq!(record.imports[0].alias.as_deref(), Some("os"));
        assert_eq!(record.imports[1].alias.as_deref(), Some("tools"));
        assert!(record.imports[3].binds("U"));
        assert!(record.imports[3].binds("Order"));
        assert!(record.imports[4].names.is_empty());
        assert!(record.imports.iter().all(|i| i.resolution.is_unresolved()));
    }

    #[test]
    fn test_resolve_import_rules() {
        let extractor = PythonExtractor::new().unwrap();
        let files: HashSet<String> = [
            "app/__init__.py",
            "app/api/views.py",
            "app/api/helpers.py",
            "app/core/models.py",
            "pkg/tools/__init__.py",
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

        let edge = |spec: &str, names: &[&str]| {
            let mut edge = ImportEdge::new("app/api/views.py", spec, 1);
            edge.names = names.iter().map(|n| ImportedName::new(*n, None)).collect();
            edge
        };

        assert_eq!(
            extractor.resolve_import(&edge(".", &["helpers"]), &ctx),
            Resolution::Internal(vec!["app/api/helpers.py".to_string()])
        );
        assert_eq!(
            extractor.resolve_import(&edge("..core.models", &["User"]), &ctx),
            Resolution::Internal(vec!["app/core/models.py".to_string()])
        );
        assert_eq!(
            extractor.resolve_import(&edge("pkg.tools", &[]), &ctx),
            Resolution::Internal(vec!["pkg/tools/__init__.py".to_string()])
        );
        assert_eq!(
            extractor.resolve_import(&edge("app.core", &["models"]), &ctx),
            Resolution::Internal(vec!["app/core/models.py".to_string()])
        );
        assert_eq!(
            extractor.resolve_import(&edge("requests.adapters", &[]), &ctx),
            Resolution::External("requests".to_string())
        );
        assert_eq!(extractor.resolve_import(&edge(".missing", &[]), &ctx), Resolution::Unresolved);
    }

    #[test]
    fn test_fields_visibility_and_singleton_shape() {
        let content = r#"
class Config:
    _instance = None

    def __init__(self, source: Loader):
        self._source = source
        self.cache = Cache()
        self.__secret = 1

    @classmethod
    def get_instance(cls):
        if cls._instance is None:
            cls._instance = Config(Loader())
        return cls._instance
"#;
        let record = extract("cfg.py", content);
        let class = &record.classes[0];
        let fields: Vec<(&str, Option<&str>, bool)> = class
            .fields
            .iter()
            .map(|f| (f.name.as_str(), f.type_hint.as_deref(), f.is_static))
            .collect();
        assert_eq!(
            fields,
            vec![
                ("_instance", Some("Config"), true),
                ("_source", Some("Loader"), false),
                ("cache", Some("Cache"), false),
                ("__secret", None, false),
            ]
        );
        assert_eq!(class.fields[1].visibility, Visibility::Protected);
        assert_eq!(class.fields[3].visibility, Visibility::Private);

        let accessor = function(&record, "get_instance");
        assert!(accessor.is_static);
        assert!(accessor.parameters.is_empty());
        assert_eq!(accessor.decorators, vec!["classmethod"]);
        assert!(accessor.instantiates.contains(&"Config".to_string()));
    }

    #[test]
    fn test_abstract_and_protocol_classes() {
        let content = r#"
from abc import ABC, abstractmethod

class Shape(ABC):
    @abstractmethod
    def area(self): ...

class Drawable(Protocol):
    def draw(self) -> None: ...

class Color(Enum):
    RED = 1
"#;
        let record = extract("s.py", content);
        assert!(record.classes[0].is_abstract);
        assert!(record.classes[0].methods[0].is_abstract);
        assert!(record.classes[0].is_interface_like());
        assert_eq!(record.classes[1].kind, ClassKind::Interface);
        assert!(record.classes[1].methods[0].is_abstract);
        assert_eq!(record.classes[2].kind, ClassKind::Enum);
    }

    #[test]
    fn test_entry_flags_and_module_calls() {
        let content = r#"
__all__ = ["api"]

def api():
    pass

def main():
    helper()

def test_helper():
    assert helper() is None

def helper():
    return None

@app.route("/")
def index():
    return "ok"

if __name__ == "__main__":
    main()
"#;
        let record = extract("main.py", content);
        assert!(function(&record, "api").is_exported);
        assert!(!function(&record, "helper").is_exported);
        assert!(function(&record, "main").is_entry);
        assert!(function(&record, "test_helper").is_entry);
        assert!(function(&record, "index").is_entry);
        assert!(!function(&record, "helper").is_entry);
        let module_calls: Vec<&str> = record.module_calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(module_calls, vec!["main"]);
    }

    #[test]
    fn test_module_variables_and_constants() {
        let content = "MAX_SIZE = 10\nname = 'a'\nname = 'b'\n\ndef f():\n    return MAX_SIZE\n";
        let record = extract("v.py", content);
        let max = record.variables.iter().find(|v| v.name == "MAX_SIZE").unwrap();
        assert!(max.is_constant);
        assert_eq!(max.usage_count, 1);
        let name = record.variables.iter().find(|v| v.name == "name").unwrap();
        assert_eq!(name.assignment_count, 2);
        assert!(!name.is_constant);
    }

    #[test]
    fn test_syntax_error_yields_partial_record() {
        let extractor = PythonExtractor::new().unwrap();
        let source = SourceFile::new(
            "broken.py",
            Language::Python,
            "def ok():\n    return 1\n\ndef broken(:\n    pass\n",
        );
        let record = extractor.extract_source(&source);
        assert!(record.functions.iter().any(|f| f.name == "ok"));
        assert!(record
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::ParseFailure && d.path.as_deref() == Some("broken.py")));
        assert_eq!(record.line_count, 5);
    }

    #[test]
    fn test_self_calls_and_attribute_reads() {
        let content = r#"
class Greeter:
    def greet(self, name):
        return self.format(name)

    def format(self, name):
        return name.upper()
"#;
        let record = extract("g.py", content);
        let greet = function(&record, "greet");
        assert_eq!(greet.call_sites[0].receiver, CallReceiver::SelfRef);
        assert_eq!(greet.call_sites[0].raw, "self.format");
        let format = function(&record, "format");
        assert_eq!(format.call_sites[0].receiver, CallReceiver::Named("name".to_string()));
        assert!(format.is_pure);
    }

    #[test]
    fn test_package_init_does_not_import_itself() {
        let extractor = PythonExtractor::new().unwrap();
        let files: HashSet<String> = ["pkg/__init__.py", "pkg/models.py", "pkg/util.py", "app.py"]
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
        let edge = |source: &str, spec: &str, names: &[&str]| {
            let mut edge = ImportEdge::new(source, spec, 1);
            edge.names = names.iter().map(|n| ImportedName::new(*n, None)).collect();
            edge
        };

        assert_eq!(
            extractor.resolve_import(&edge("pkg/__init__.py", ".", &["models"]), &ctx),
            Resolution::Internal(vec!["pkg/models.py".to_string()])
        );
        // A name defined in the package itself has nowhere else to go.
        assert_eq!(
            extractor.resolve_import(&edge("pkg/__init__.py", ".", &["VERSION"]), &ctx),
            Resolution::Unresolved
        );
        assert_eq!(
            extractor.resolve_import(&edge("app.py", "pkg", &["models", "VERSION"]), &ctx),
            Resolution::Internal(vec!["pkg/models.py".to_string()])
        );
        assert_eq!(
            extractor.resolve_import(&edge("app.py", "pkg", &["VERSION"]), &ctx),
            Resolution::Internal(vec!["pkg/__init__.py".to_string()])
        );
        assert_eq!(
            extractor.resolve_import(&edge("pkg/models.py", ".util", &[]), &ctx),
            Resolution::Internal(vec!["pkg/util.py".to_string()])
        );
    }

    #[test]
    fn test_definitions_under_module_guards() {
        let content = r#"
import json

try:
    from ujson import loads
except ImportError:
    def loads(text):
        return json.loads(text)

if DEBUG:
    def configured():
        return loads("{}")
else:
    def configured():
        return None

with open("settings.ini") as handle:
    class Settings:
        def value(self):
            return 1

def main():
    configured()
"#;
        let record = extract("compat.py", content);
        let names: Vec<&str> = record.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["loads", "configured", "configured", "main"]);
        assert_eq!(record.functions[2].qualified_name.as_str(), "compat.py::configured#2");
        assert_eq!(function(&record, "loads").call_sites[0].raw, "json.loads");
        assert_eq!(record.classes[0].name, "Settings");
        assert_eq!(record.classes[0].methods[0].name, "value");

        let module_calls: Vec<&str> = record.module_calls.iter().map(|c| c.raw.as_str()).collect();
        assert_eq!(module_calls, vec!["open"]);
    }

    #[test]
    fn test_nested_functions_are_symbols() {
        let content = r#"
def helper():
    return 1

def main():
    def inner():
        return helper()
    return inner()

def logged(func):
    @functools.wraps(func)
    def wrapper(*args):
        return func(*args)
    return wrapper
"#;
        let record = extract("n.py", content);
        let names: Vec<&str> = record.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["helper", "main", "logged", "inner", "wrapper"]);

        let inner = function(&record, "inner");
        assert_eq!(inner.qualified_name.as_str(), "n.py::inner");
        assert_eq!(inner.lines.start, 6);
        assert!(!inner.is_entry);
        let inner_calls: Vec<&str> = inner.call_sites.iter().map(|c| c.raw.as_str()).collect();
        assert_eq!(inner_calls, vec!["helper"]);

        // `inner()` is a plain call; `return wrapper` hands the function out.
        let main_calls: Vec<&str> = function(&record, "main").call_sites.iter().map(|c| c.raw.as_str()).collect();
        assert_eq!(main_calls, vec!["inner"]);
        let logged = function(&record, "logged");
        assert!(logged.calls.contains("wrapper"));
        assert_eq!(logged.call_sites.last().map(|c| c.line), Some(14));
        assert_eq!(function(&record, "wrapper").decorators, vec!["functools.wraps(func)"]);
    }

    #[test]
    fn test_nested_callees_are_not_dead() {
        use prism_core::config::Config;
        use prism_core::{AnalysisPipeline, ExtractorRegistry};

        let sources = vec![SourceFile::new(
            "jobs.py",
            Language::Python,
            "def helper():\n    return 1\n\n\ndef main():\n    def inner():\n        return helper()\n    return inner()\n\n\ndef logged(func):\n    def wrapper():\n        return func()\n    return wrapper\n",
        )];
        let registry = ExtractorRegistry::new().with(Box::new(PythonExtractor::new().unwrap()));
        let analysis = AnalysisPipeline::new(registry, Config::default())
            .analyze_sources("/tmp/jobs", "jobs", sources)
            .unwrap();
        assert_eq!(analysis.dead_code, vec!["jobs.py::logged".to_string()]);
        let helper = &analysis.files["jobs.py"].functions[0];
        assert!(helper.called_by.contains("jobs.py::inner"));
    }

    #[test]
    fn test_deeply_nested_expression() {
        let depth = 10_000;
        let content = format!(
            "def deep():\n    return {}Point(){}\n",
            "(".repeat(depth),
            ")".repeat(depth)
        );
        let extractor = PythonExtractor::new().unwrap();
        let record = extractor.extract_source(&SourceFile::new("deep.py", Language::Python, content));
        let deep = function(&record, "deep");
        assert_eq!(deep.complexity, 1);
        assert_eq!(deep.returns_new, vec!["Point"]);
        assert!(record.diagnostics.is_empty());
    }
}
