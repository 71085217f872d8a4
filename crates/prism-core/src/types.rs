use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::metrics::FileMetrics;
use crate::scope::{ScopeId, ScopeTree};

/// Source languages with an extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Cpp,
    CSharp,
    Svelte,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::Python,
        Language::JavaScript,
        Language::TypeScript,
        Language::Cpp,
        Language::CSharp,
        Language::Svelte,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Cpp => "cpp",
            Language::CSharp => "csharp",
            Language::Svelte => "svelte",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "python" | "py" => Ok(Language::Python),
            "javascript" | "js" => Ok(Language::JavaScript),
            "typescript" | "ts" => Ok(Language::TypeScript),
            "cpp" | "c++" | "c" => Ok(Language::Cpp),
            "csharp" | "c#" | "cs" => Ok(Language::CSharp),
            "svelte" => Ok(Language::Svelte),
            _ => Err(anyhow::anyhow!("unknown language: {s}")),
        }
    }
}

/// Globally unique symbol identifier: "path::Class::name" or "path::name".
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QualifiedName(pub String);

impl QualifiedName {
    pub fn new(path: &str, class: Option<&str>, name: &str) -> Self {
        match class {
            Some(class) => Self(format!("{path}::{class}::{name}")),
            None => Self(format!("{path}::{name}")),
        }
    }

    /// The file part of the name.
    pub fn file(&self) -> &str {
        self.0.split("::").next().unwrap_or_default()
    }

    /// The trailing segment, without any overload suffix.
    pub fn short_name(&self) -> &str {
        short_name(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Last `::` or `.` separated segment of a possibly qualified name, minus any `#n` suffix.
pub fn short_name(name: &str) -> &str {
    let tail = name.rsplit("::").next().unwrap_or(name);
    let tail = tail.rsplit('.').next().unwrap_or(tail);
    tail.split('#').next().unwrap_or(tail)
}

/// Inclusive, 1-based line span.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub type_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, type_hint: Option<String>) -> Self {
        Self {
            name: name.into(),
            type_hint,
            default: None,
        }
    }
}

/// What a call was made on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum CallReceiver {
    /// `helper()`
    #[default]
    Bare,
    /// `self.helper()`, `this.helper()`
    SelfRef,
    /// `utils.helper()`, `Config::load()`
    Named(String),
}

/// A call expression as written, plus its resolution once aggregated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    pub name: String,
    pub receiver: CallReceiver,
    pub raw: String,
    pub line: usize,
    /// Bare names may bind to members of the enclosing class.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub member_lookup: bool,
    #[serde(default)]
    pub resolved: Option<QualifiedName>,
}

impl CallSite {
    pub fn new(name: impl Into<String>, receiver: CallReceiver, line: usize) -> Self {
        let name = name.into();
        let raw = match &receiver {
            CallReceiver::Bare => name.clone(),
            CallReceiver::SelfRef => format!("self.{name}"),
            CallReceiver::Named(recv) => format!("{recv}.{name}"),
        };
        Self {
            name,
            receiver,
            raw,
            line,
            member_lookup: false,
            resolved: None,
        }
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = raw.into();
        self
    }

    pub fn with_member_lookup(mut self) -> Self {
        self.member_lookup = true;
        self
    }

    /// The name recorded in a function's call set: resolved target, else the raw text.
    pub fn target(&self) -> String {
        match &self.resolved {
            Some(qn) => qn.0.clone(),
            None => self.raw.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSymbol {
    pub name: String,
    pub qualified_name: QualifiedName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    pub parameters: Vec<Parameter>,
    pub return_type: Option<String>,
    pub lines: LineRange,
    pub complexity: u32,
    pub max_nesting: u32,
    pub calls: BTreeSet<String>,
    pub called_by: BTreeSet<String>,
    pub call_sites: Vec<CallSite>,
    pub docstring: Option<String>,
    pub has_documentation: bool,
    pub decorators: Vec<String>,
    pub is_pure: bool,
    pub has_side_effects: bool,
    pub side_effects: Vec<String>,
    pub is_async: bool,
    pub is_generator: bool,
    pub is_recursive: bool,
    pub is_static: bool,
    pub is_abstract: bool,
    /// Declared without a body (prototype, interface member).
    pub is_declaration: bool,
    pub is_constructor: bool,
    pub is_special: bool,
    pub is_exported: bool,
    pub is_entry: bool,
    pub visibility: Visibility,
    pub instantiates: Vec<String>,
    pub returns_new: Vec<String>,
    pub coupling: usize,
}

impl FunctionSymbol {
    /// A bodiless, call-free symbol; extractors fill in the rest.
    pub fn new(path: &str, class_name: Option<&str>, name: impl Into<String>, lines: LineRange) -> Self {
        let name = name.into();
        Self {
            qualified_name: QualifiedName::new(path, class_name, &name),
            name,
            class_name: class_name.map(str::to_string),
            parameters: Vec::new(),
            return_type: None,
            lines,
            complexity: 1,
            max_nesting: 0,
            calls: BTreeSet::new(),
            called_by: BTreeSet::new(),
            call_sites: Vec::new(),
            docstring: None,
            has_documentation: false,
            decorators: Vec::new(),
            is_pure: true,
            has_side_effects: false,
            side_effects: Vec::new(),
            is_async: false,
            is_generator: false,
            is_recursive: false,
            is_static: false,
            is_abstract: false,
            is_declaration: false,
            is_constructor: false,
            is_special: false,
            is_exported: false,
            is_entry: false,
            visibility: Visibility::Public,
            instantiates: Vec::new(),
            returns_new: Vec::new(),
            coupling: 0,
        }
    }

    pub fn is_method(&self) -> bool {
        self.class_name.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Private,
    Internal,
}

impl Visibility {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "public" => Some(Visibility::Public),
            "protected" => Some(Visibility::Protected),
            "private" => Some(Visibility::Private),
            "internal" => Some(Visibility::Internal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub type_hint: Option<String>,
    pub is_static: bool,
    pub visibility: Visibility,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassKind {
    #[default]
    Class,
    Interface,
    Struct,
    Enum,
    Record,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassSymbol {
    pub name: String,
    pub qualified_name: QualifiedName,
    pub kind: ClassKind,
    pub methods: Vec<FunctionSymbol>,
    pub fields: Vec<FieldDecl>,
    pub bases: Vec<String>,
    pub lines: LineRange,
    pub docstring: Option<String>,
    pub has_documentation: bool,
    pub decorators: Vec<String>,
    pub is_abstract: bool,
    pub is_exported: bool,
    pub coupling: usize,
}

impl ClassSymbol {
    pub fn new(name: impl Into<String>, kind: ClassKind, lines: LineRange) -> Self {
        Self {
            name: name.into(),
            qualified_name: QualifiedName(String::new()),
            kind,
            methods: Vec::new(),
            fields: Vec::new(),
            bases: Vec::new(),
            lines,
            docstring: None,
            has_documentation: false,
            decorators: Vec::new(),
            is_abstract: false,
            is_exported: false,
            coupling: 0,
        }
    }

    /// Interface-shaped: an interface, or an abstract class whose ordinary methods are all abstract.
    pub fn is_interface_like(&self) -> bool {
        self.kind == ClassKind::Interface
            || (self.is_abstract
                && !self.methods.is_empty()
                && self
                    .methods
                    .iter()
                    .filter(|m| !m.is_special)
                    .all(|m| m.is_abstract))
    }

    pub fn constructor(&self) -> Option<&FunctionSymbol> {
        self.methods.iter().find(|m| m.is_constructor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSymbol {
    pub name: String,
    #[serde(rename = "type")]
    pub type_hint: Option<String>,
    pub assignment_count: u32,
    pub usage_count: u32,
    pub scope: ScopeId,
    pub is_constant: bool,
    pub line: usize,
}

/// One name bound by an import statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedName {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl ImportedName {
    pub fn new(name: impl Into<String>, alias: Option<String>) -> Self {
        Self {
            name: name.into(),
            alias,
        }
    }

    /// The name visible in the importing file.
    pub fn local(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ImportResolution {
    Internal {
        target: String,
    },
    External {
        package: String,
    },
    #[default]
    Unresolved,
}

impl ImportResolution {
    pub fn internal_target(&self) -> Option<&str> {
        match self {
            ImportResolution::Internal { target } => Some(target),
            _ => None,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, ImportResolution::Unresolved)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportEdge {
    pub source: String,
    pub specifier: String,
    pub names: Vec<ImportedName>,
    /// Local name bound to the whole module (`import x as y`, `import * as y`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub line: usize,
    pub resolution: ImportResolution,
}

impl ImportEdge {
    pub fn new(source: impl Into<String>, specifier: impl Into<String>, line: usize) -> Self {
        Self {
            source: source.into(),
            specifier: specifier.into(),
            names: Vec::new(),
            alias: None,
            line,
            resolution: ImportResolution::Unresolved,
        }
    }

    /// Apply a resolution. Only an unresolved edge changes, and never back to unresolved.
    pub fn upgrade(&mut self, resolution: ImportResolution) -> bool {
        if !self.resolution.is_unresolved() || resolution.is_unresolved() {
            return false;
        }
        self.resolution = resolution;
        true
    }

    pub fn binds(&self, local: &str) -> bool {
        self.alias.as_deref() == Some(local) || self.names.iter().any(|n| n.local() == local)
    }
}

/// Severity of a diagnostic or smell
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            _ => Err(anyhow::anyhow!("unknown severity: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    ParseFailure,
    ReadFailure,
    SkippedFile,
    Timeout,
    InvariantViolation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub path: Option<String>,
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub message: String,
    pub line: Option<usize>,
}

impl Diagnostic {
    pub fn parse_failure(path: &str, message: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            path: Some(path.to_string()),
            kind: DiagnosticKind::ParseFailure,
            severity: Severity::Warning,
            message: message.into(),
            line,
        }
    }

    pub fn read_failure(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: Some(path.to_string()),
            kind: DiagnosticKind::ReadFailure,
            severity: Severity::Warning,
            message: message.into(),
            line: None,
        }
    }

    pub fn skipped(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: Some(path.to_string()),
            kind: DiagnosticKind::SkippedFile,
            severity: Severity::Info,
            message: message.into(),
            line: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            path: None,
            kind: DiagnosticKind::Timeout,
            severity: Severity::Error,
            message: message.into(),
            line: None,
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self {
            path: None,
            kind: DiagnosticKind::InvariantViolation,
            severity: Severity::Error,
            message: message.into(),
            line: None,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.path, self.line) {
            (Some(path), Some(line)) => write!(f, "{path}:{line}: {}", self.message),
            (Some(path), None) => write!(f, "{path}: {}", self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

/// One input file as delivered by the walker.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub relative_path: String,
    pub language: Language,
    pub content: String,
    pub size_bytes: u64,
    pub modified_time: Option<String>,
}

impl SourceFile {
    pub fn new(relative_path: impl Into<String>, language: Language, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            relative_path: normalize_path(&relative_path.into()),
            language,
            size_bytes: content.len() as u64,
            content,
            modified_time: None,
        }
    }
}

/// Per-file analysis result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub language: Language,
    pub size_bytes: u64,
    pub last_modified: Option<String>,
    pub line_count: usize,
    pub functions: Vec<FunctionSymbol>,
    pub classes: Vec<ClassSymbol>,
    pub imports: Vec<ImportEdge>,
    pub variables: Vec<VariableSymbol>,
    pub scopes: ScopeTree,
    pub namespaces: Vec<String>,
    pub module_calls: Vec<CallSite>,
    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,
    pub metrics: FileMetrics,
    pub diagnostics: Vec<Diagnostic>,
}

impl FileRecord {
    pub fn empty(path: &str, language: Language) -> Self {
        Self {
            path: path.to_string(),
            language,
            size_bytes: 0,
            last_modified: None,
            line_count: 0,
            functions: Vec::new(),
            classes: Vec::new(),
            imports: Vec::new(),
            variables: Vec::new(),
            scopes: ScopeTree::new(),
            namespaces: Vec::new(),
            module_calls: Vec::new(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
            metrics: FileMetrics::default(),
            diagnostics: Vec::new(),
        }
    }

    /// Top-level functions followed by every class's methods.
    pub fn all_functions(&self) -> impl Iterator<Item = &FunctionSymbol> {
        self.functions
            .iter()
            .chain(self.classes.iter().flat_map(|c| c.methods.iter()))
    }

    pub fn all_functions_mut(&mut self) -> impl Iterator<Item = &mut FunctionSymbol> {
        self.functions
            .iter_mut()
            .chain(self.classes.iter_mut().flat_map(|c| c.methods.iter_mut()))
    }

    pub fn has_parse_failure(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::ParseFailure)
    }
}

/// Forward slashes, no leading `./`.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    unified.trim_start_matches("./").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_name_formatting() {
        let f = QualifiedName::new("src/a.py", None, "helper");
        assert_eq!(f.0, "src/a.py::helper");
        let m = QualifiedName::new("src/a.py", Some("Service"), "run");
        assert_eq!(m.to_string(), "src/a.py::Service::run");
        assert_eq!(m.file(), "src/a.py");
        assert_eq!(m.short_name(), "run");
    }

    #[test]
    fn test_short_name_strips_overload_suffix() {
        assert_eq!(short_name("a.cpp::Shape::area#2"), "area");
        assert_eq!(short_name("abc.ABC"), "ABC");
        assert_eq!(short_name("plain"), "plain");
    }

    #[test]
    fn test_import_upgrade_never_downgrades() {
        let mut edge = ImportEdge::new("a.py", "b", 1);
        assert!(!edge.upgrade(ImportResolution::Unresolved));
        assert!(edge.upgrade(ImportResolution::Internal {
            target: "b.py".to_string()
        }));
        assert!(!edge.upgrade(ImportResolution::External {
            package: "b".to_string()
        }));
        assert_eq!(edge.resolution.internal_target(), Some("b.py"));
    }

    #[test]
    fn test_import_binds_alias_and_names() {
        let mut edge = ImportEdge::new("a.ts", "./util", 1);
        edge.names.push(ImportedName::new("helper", Some("h".to_string())));
        edge.alias = Some("util".to_string());
        assert!(edge.binds("h"));
        assert!(edge.binds("util"));
        assert!(!edge.binds("helper"));
    }

    #[test]
    fn test_language_parse() {
        assert_eq!("py".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("C#".parse::<Language>().unwrap(), Language::CSharp);
        assert!("tsx".parse::<Language>().is_err());
        assert_eq!(Language::Cpp.to_string(), "cpp");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
    }

    #[test]
    fn test_call_site_target_prefers_resolution() {
        let mut site = CallSite::new("save", CallReceiver::Named("repo".into()), 3);
        assert_eq!(site.target(), "repo.save");
        site.resolved = Some(QualifiedName("a.py::Repo::save".into()));
        assert_eq!(site.target(), "a.py::Repo::save");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./src\\a.py"), "src/a.py");
    }
}
