use std::path::{Path, PathBuf};

use tracing::debug;
use tree_sitter::Tree;

use crate::error::ExtractError;
use crate::resolve::{ResolveContext, Resolution};
use crate::syntax::first_error;
use crate::types::{Diagnostic, FileRecord, ImportEdge, Language, SourceFile};

/// A parsed source file with its tree-sitter AST and original content.
pub struct ParsedFile {
    pub path: PathBuf,
    pub language: Language,
    pub tree: Tree,
    pub content: String,
}

impl ParsedFile {
    /// Normalized relative path used in qualified names.
    pub fn relative_path(&self) -> String {
        crate::types::normalize_path(&self.path.to_string_lossy())
    }
}

/// Trait that each language extractor must implement.
pub trait LanguageExtractor: Send + Sync {
    /// Primary language tag (e.g. Python).
    fn language(&self) -> Language;

    /// File extensions this extractor handles, without the dot.
    fn file_extensions(&self) -> &[&str];

    /// Language tag for a specific path. Extractors covering a dialect family override this.
    fn language_for_path(&self, _path: &Path) -> Language {
        self.language()
    }

    /// Parse a source file into a [`ParsedFile`].
    fn parse_file(&self, path: &Path, content: &str) -> Result<ParsedFile, ExtractError>;

    /// Extract the unresolved per-file record.
    fn extract(&self, parsed: &ParsedFile) -> FileRecord;

    /// Resolve one import edge of a file this extractor produced.
    fn resolve_import(&self, edge: &ImportEdge, ctx: &ResolveContext<'_>) -> Resolution;

    /// Parse and extract, degrading to a partial record on failure.
    fn extract_source(&self, source: &SourceFile) -> FileRecord {
        let path = Path::new(&source.relative_path);
        let mut record = match self.parse_file(path, &source.content) {
            Ok(parsed) => {
                let mut record = self.extract(&parsed);
                if let Some(error) = first_error(parsed.tree.root_node()) {
                    let line = error.start_position().row + 1;
                    let message = if error.is_missing() {
                        format!("syntax error: missing {}", error.kind())
                    } else {
                        "syntax error; extraction continued past it".to_string()
                    };
                    debug!(path = %source.relative_path, line, "partial parse");
                    record.diagnostics.push(Diagnostic::parse_failure(
                        &source.relative_path,
                        message,
                        Some(line),
                    ));
                }
                record
            }
            Err(e) => {
                debug!(path = %source.relative_path, error = %e, "parse failed");
                let mut record = FileRecord::empty(&source.relative_path, source.language);
                record
                    .diagnostics
                    .push(Diagnostic::parse_failure(&source.relative_path, e.to_string(), None));
                record
            }
        };
        record.language = source.language;
        record.size_bytes = source.size_bytes;
        record.last_modified = source.modified_time.clone();
        record.line_count = source.content.lines().count();
        record
    }
}

/// The set of extractors available to a run, looked up by extension or language.
#[derive(Default)]
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn LanguageExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, extractor: Box<dyn LanguageExtractor>) {
        self.extractors.push(extractor);
    }

    pub fn with(mut self, extractor: Box<dyn LanguageExtractor>) -> Self {
        self.register(extractor);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    pub fn for_path(&self, path: &Path) -> Option<&dyn LanguageExtractor> {
        let ext = path.extension()?.to_str()?;
        self.extractors
            .iter()
            .find(|e| e.file_extensions().iter().any(|x| x.eq_ignore_ascii_case(ext)))
            .map(|e| e.as_ref())
    }

    /// Language of a path, if some extractor claims it.
    pub fn detect_language(&self, path: &Path) -> Option<Language> {
        self.for_path(path).map(|e| e.language_for_path(path))
    }

    pub fn for_language(&self, language: Language) -> Option<&dyn LanguageExtractor> {
        self.extractors
            .iter()
            .find(|e| e.language() == language)
            .or_else(|| {
                // Dialects (JavaScript under the TypeScript extractor) match by any claimed path.
                self.extractors.iter().find(|e| {
                    e.file_extensions().iter().any(|ext| {
                        e.language_for_path(Path::new(&format!("f.{ext}"))) == language
                    })
                })
            })
            .map(|e| e.as_ref())
    }
}
