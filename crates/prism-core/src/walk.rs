//! Deterministic discovery of source files under a project root.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::analyzer::ExtractorRegistry;
use crate::config::ProjectConfig;
use crate::entry::build_globset;
use crate::types::{normalize_path, Diagnostic, Language, SourceFile};

/// Build output, dependency caches, and VCS metadata.
pub const IGNORED_DIRS: &[&str] = &[
    "__pycache__",
    "node_modules",
    ".git",
    "venv",
    ".venv",
    "build",
    "dist",
    "target",
    "bin",
    "obj",
];

/// Files ready for extraction, plus problems met on the way.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub sources: Vec<SourceFile>,
    pub diagnostics: Vec<Diagnostic>,
}

fn is_ignored(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || (entry.file_type().is_dir() && IGNORED_DIRS.contains(&name.as_ref()))
}

/// Walk `root` in file-name order and read every file some extractor claims.
pub fn collect_sources(
    root: &Path,
    registry: &ExtractorRegistry,
    config: &ProjectConfig,
    languages: Option<&[Language]>,
) -> Result<WalkOutcome> {
    let excludes = build_globset(&config.exclude_patterns)?;
    let base: PathBuf = if root.is_file() {
        root.parent().map(Path::to_path_buf).unwrap_or_default()
    } else {
        root.to_path_buf()
    };

    let mut outcome = WalkOutcome::default();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .map(|p| relative(&base, p))
                    .unwrap_or_default();
                warn!(path = %path, error = %e, "skipping unreadable entry");
                outcome.diagnostics.push(Diagnostic::read_failure(&path, e.to_string()));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let rel_path = relative(&base, entry.path());
        if excludes.is_match(&rel_path) {
            debug!(path = %rel_path, "excluded by pattern");
            continue;
        }
        let Some(language) = registry.detect_language(entry.path()) else {
            continue;
        };
        if languages.is_some_and(|selected| !selected.contains(&language)) {
            continue;
        }

        match read_source(entry.path(), &rel_path, language, config.max_file_bytes) {
            Ok(source) => outcome.sources.push(source),
            Err(diagnostic) => {
                warn!("{diagnostic}");
                outcome.diagnostics.push(diagnostic);
            }
        }
    }

    debug!(
        files = outcome.sources.len(),
        skipped = outcome.diagnostics.len(),
        "walk finished"
    );
    Ok(outcome)
}

fn relative(base: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    normalize_path(&rel.to_string_lossy())
}

fn read_source(path: &Path, rel_path: &str, language: Language, max_bytes: u64) -> Result<SourceFile, Diagnostic> {
    let metadata = std::fs::metadata(path).map_err(|e| Diagnostic::read_failure(rel_path, e.to_string()))?;
    if metadata.len() > max_bytes {
        return Err(Diagnostic::skipped(
            rel_path,
            format!("{} bytes exceeds the {max_bytes} byte limit", metadata.len()),
        ));
    }
    let bytes = std::fs::read(path).map_err(|e| Diagnostic::read_failure(rel_path, e.to_string()))?;
    let content = String::from_utf8(bytes)
        .map_err(|_| Diagnostic::read_failure(rel_path, "file is not valid UTF-8"))?;

    let mut source = SourceFile::new(rel_path, language, content);
    source.size_bytes = metadata.len();
    source.modified_time = metadata
        .modified()
        .ok()
        .map(|t| DateTime::<Utc>::from(t).to_rfc3339());
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{LanguageExtractor, ParsedFile};
    use crate::error::ExtractError;
    use crate::resolve::{ResolveContext, Resolution};
    use crate::types::{DiagnosticKind, FileRecord, ImportEdge};
    use std::fs;

    /// Claims `.py` files without parsing them.
    struct PyStub;

    impl LanguageExtractor for PyStub {
        fn language(&self) -> Language {
            Language::Python
        }
        fn file_extensions(&self) -> &[&str] {
            &["py"]
        }
        fn parse_file(&self, path: &Path, _content: &str) -> Result<ParsedFile, ExtractError> {
            Err(ExtractError::ParseAborted {
                path: path.display().to_string(),
            })
        }
        fn extract(&self, parsed: &ParsedFile) -> FileRecord {
            FileRecord::empty(&parsed.relative_path(), Language::Python)
        }
        fn resolve_import(&self, _edge: &ImportEdge, _ctx: &ResolveContext<'_>) -> Resolution {
            Resolution::Unresolved
        }
    }

    fn registry() -> ExtractorRegistry {
        ExtractorRegistry::new().with(Box::new(PyStub))
    }

    #[test]
    fn test_walk_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/pkg")).unwrap();
        fs::create_dir_all(root.join("node_modules/lib")).unwrap();
        fs::create_dir_all(root.join(".hidden")).unwrap();
        fs::create_dir_all(root.join("migrations")).unwrap();
        fs::write(root.join("src/b.py"), "x = 1\n").unwrap();
        fs::write(root.join("src/a.py"), "y = 2\n").unwrap();
        fs::write(root.join("src/pkg/c.py"), "").unwrap();
        fs::write(root.join("src/notes.txt"), "ignored").unwrap();
        fs::write(root.join("node_modules/lib/x.py"), "").unwrap();
        fs::write(root.join(".hidden/y.py"), "").unwrap();
        fs::write(root.join("migrations/0001.py"), "").unwrap();

        let outcome = collect_sources(root, &registry(), &ProjectConfig::default(), None).unwrap();
        let paths: Vec<&str> = outcome.sources.iter().map(|s| s.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["src/a.py", "src/b.py", "src/pkg/c.py"]);
        assert!(outcome.diagnostics.is_empty());
        assert!(outcome.sources[0].modified_time.is_some());
        assert_eq!(outcome.sources[0].size_bytes, 6);
    }

    #[test]
    fn test_oversized_and_binary_files_become_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("big.py"), "a".repeat(64)).unwrap();
        fs::write(root.join("bin.py"), [0xff, 0xfe, 0x00]).unwrap();
        let config = ProjectConfig {
            max_file_bytes: 32,
            ..ProjectConfig::default()
        };

        let outcome = collect_sources(root, &registry(), &config, None).unwrap();
        assert!(outcome.sources.is_empty());
        let kinds: Vec<DiagnosticKind> = outcome.diagnostics.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![DiagnosticKind::SkippedFile, DiagnosticKind::ReadFailure]);
    }

    #[test]
    fn test_language_filter() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "").unwrap();
        let outcome = collect_sources(
            dir.path(),
            &registry(),
            &ProjectConfig::default(),
            Some(&[Language::Cpp]),
        )
        .unwrap();
        assert!(outcome.sources.is_empty());
    }
}
