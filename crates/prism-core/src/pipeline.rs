use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::aggregate::{aggregate, verify_call_symmetry};
use crate::analysis::{ProjectAnalysis, StructureNode};
use crate::analyzer::ExtractorRegistry;
use crate::cache::AnalysisCache;
use crate::callgraph::CallGraph;
use crate::config::Config;
use crate::entry::{entry_files, entry_functions, mark_entry_functions};
use crate::graph::DependencyGraph;
use crate::metrics::{compute_file_metrics, compute_project_metrics};
use crate::patterns::detect_patterns;
use crate::smells::detect_smells;
use crate::types::{Diagnostic, FileRecord, SourceFile};
use crate::walk::collect_sources;

/// Reusable analysis pipeline: walk, extract in parallel, resolve, then derive graphs and findings.
pub struct AnalysisPipeline {
    registry: ExtractorRegistry,
    config: Config,
}

/// Where a run is allowed to stop.
#[derive(Debug, Clone, Copy)]
struct Budget {
    deadline: Option<Instant>,
}

impl Budget {
    fn new(limit: Option<Duration>) -> Self {
        Self {
            deadline: limit.map(|d| Instant::now() + d),
        }
    }

    fn exhausted(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

impl AnalysisPipeline {
    pub fn new(registry: ExtractorRegistry, config: Config) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run a full analysis on the given project path.
    pub fn analyze(&self, project_path: &Path) -> Result<ProjectAnalysis> {
        self.analyze_inner(project_path, false)
    }

    /// Run an incremental analysis, reusing cached extraction for unchanged files.
    pub fn analyze_incremental(&self, project_path: &Path) -> Result<ProjectAnalysis> {
        self.analyze_inner(project_path, true)
    }

    fn analyze_inner(&self, project_path: &Path, incremental: bool) -> Result<ProjectAnalysis> {
        let budget = Budget::new(self.config.project.max_duration_secs.map(Duration::from_secs));
        let root: PathBuf = project_path
            .canonicalize()
            .with_context(|| format!("cannot analyse '{}'", project_path.display()))?;
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string());

        let languages = self.config.selected_languages()?;
        let walk = collect_sources(&root, &self.registry, &self.config.project, languages.as_deref())?;
        info!(files = walk.sources.len(), root = %root.display(), "analysing project");

        let cache_root = if root.is_file() {
            root.parent().map(Path::to_path_buf).unwrap_or_else(|| root.clone())
        } else {
            root.clone()
        };
        let mut cache = if incremental {
            match AnalysisCache::load(&cache_root, &self.config.project.cache_dir) {
                Ok(cache) => Some(cache),
                Err(e) => {
                    warn!("ignoring analysis cache: {e:#}");
                    Some(AnalysisCache::new())
                }
            }
        } else {
            None
        };

        let (records, mut diagnostics) = self.extract_all(&walk.sources, cache.as_ref(), budget);

        if let Some(cache) = cache.as_mut() {
            for (source, record) in walk.sources.iter().zip(records.iter()) {
                if let Some(record) = record {
                    cache.insert(source.relative_path.clone(), &source.content, record.clone());
                }
            }
            let existing: Vec<String> = walk.sources.iter().map(|s| s.relative_path.clone()).collect();
            cache.prune(&existing);
            if let Err(e) = cache.save(&cache_root, &self.config.project.cache_dir) {
                warn!("failed to save analysis cache: {e:#}");
            }
        }

        let mut run_diagnostics = walk.diagnostics;
        run_diagnostics.append(&mut diagnostics);
        let records: Vec<FileRecord> = records.into_iter().flatten().collect();
        self.finish(root.display().to_string(), name, records, run_diagnostics, budget)
    }

    /// Analyse in-memory sources without touching the filesystem.
    pub fn analyze_sources(&self, root_path: &str, name: &str, sources: Vec<SourceFile>) -> Result<ProjectAnalysis> {
        let budget = Budget::new(self.config.project.max_duration_secs.map(Duration::from_secs));
        let (records, diagnostics) = self.extract_all(&sources, None, budget);
        let records: Vec<FileRecord> = records.into_iter().flatten().collect();
        self.finish(root_path.to_string(), name.to_string(), records, diagnostics, budget)
    }

    /// Extract every source in parallel. Order matches `sources`; `None` marks files
    /// skipped because the budget ran out.
    fn extract_all(
        &self,
        sources: &[SourceFile],
        cache: Option<&AnalysisCache>,
        budget: Budget,
    ) -> (Vec<Option<FileRecord>>, Vec<Diagnostic>) {
        let started = Instant::now();
        let records: Vec<Option<FileRecord>> = sources
            .par_iter()
            .map(|source| {
                if budget.exhausted() {
                    return None;
                }
                if let Some(cached) = cache.and_then(|c| c.get(&source.relative_path, &source.content)) {
                    let mut record = cached.clone();
                    record.last_modified = source.modified_time.clone();
                    return Some(record);
                }
                let Some(extractor) = self.registry.for_language(source.language) else {
                    debug!(path = %source.relative_path, "no extractor for language");
                    return Some(FileRecord::empty(&source.relative_path, source.language));
                };
                let record = extractor.extract_source(source);
                for diagnostic in &record.diagnostics {
                    warn!("{diagnostic}");
                }
                Some(record)
            })
            .collect();

        let mut diagnostics = Vec::new();
        let skipped = records.iter().filter(|r| r.is_none()).count();
        if skipped > 0 {
            warn!(skipped, "analysis budget exhausted during extraction");
            diagnostics.push(Diagnostic::timeout(format!(
                "analysis budget exhausted; {skipped} of {} files were not extracted",
                sources.len()
            )));
        }
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "extraction finished");
        (records, diagnostics)
    }

    fn finish(
        &self,
        root_path: String,
        name: String,
        records: Vec<FileRecord>,
        mut diagnostics: Vec<Diagnostic>,
        budget: Budget,
    ) -> Result<ProjectAnalysis> {
        let mut complete = diagnostics.iter().all(|d| d.kind != crate::types::DiagnosticKind::Timeout);

        let resolved = aggregate(records, &self.registry, &self.config.resolve);
        let mut files: IndexMap<String, FileRecord> = resolved.files;
        if let Err(e) = verify_call_symmetry(&files) {
            warn!("invariant violation after resolution: {e}");
            diagnostics.push(Diagnostic::invariant(e.to_string()));
        }

        for record in files.values_mut() {
            compute_file_metrics(record);
        }
        let entry_points = entry_files(&files, &self.config.entry_points)?;
        let entries = entry_functions(&files, &self.config.entry_points);
        mark_entry_functions(&mut files, &entries);

        let skip_findings = budget.exhausted();
        if skip_findings {
            complete = false;
            diagnostics.push(Diagnostic::timeout(
                "analysis budget exhausted after resolution; pattern and smell detection skipped",
            ));
        }

        let ((dependency_graph, function_graph), (patterns, smells)) = rayon::join(
            || (DependencyGraph::from_files(&files), CallGraph::from_files(&files)),
            || {
                if skip_findings {
                    (Vec::new(), Vec::new())
                } else {
                    (
                        detect_patterns(&files, &self.config.patterns),
                        detect_smells(&files, &self.config.smells),
                    )
                }
            },
        );

        let dependency_cycles = dependency_graph.find_cycles();
        let topological_order = dependency_graph.topological_order();
        let dead_code = function_graph.dead_code(&files, &entries);
        let unreachable = function_graph.unreachable(&files, &entries);
        let call_graph = function_graph.summary();
        let metrics = compute_project_metrics(&files);

        let mut languages = BTreeMap::new();
        for record in files.values() {
            *languages.entry(record.language).or_insert(0) += 1;
        }
        let structure = StructureNode::build(&name, files.values().map(|f| (f.path.as_str(), f.size_bytes)));

        info!(
            files = files.len(),
            cycles = dependency_cycles.len(),
            dead = dead_code.len(),
            patterns = patterns.len(),
            "analysis complete"
        );

        Ok(ProjectAnalysis {
            root_path,
            name,
            total_files: files.len(),
            total_lines: metrics.total_lines,
            languages,
            structure,
            entry_points,
            entry_functions: entries.into_iter().collect(),
            dependency_cycles,
            topological_order,
            dead_code,
            unreachable,
            call_graph,
            patterns,
            smells,
            metrics,
            diagnostics,
            complete,
            files,
            dependency_graph,
            function_graph,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{LanguageExtractor, ParsedFile};
    use crate::error::ExtractError;
    use crate::resolve::{ResolveContext, Resolution};
    use crate::types::{DiagnosticKind, ImportEdge, Language};

    /// Claims `.py` files and yields one empty record per file.
    struct Blank;

    impl LanguageExtractor for Blank {
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

    fn pipeline(config: Config) -> AnalysisPipeline {
        AnalysisPipeline::new(ExtractorRegistry::new().with(Box::new(Blank)), config)
    }

    fn sources() -> Vec<SourceFile> {
        vec![
            SourceFile::new("src/a.py", Language::Python, "x = 1\n"),
            SourceFile::new("b.py", Language::Python, "y = 2\nz = 3\n"),
        ]
    }

    #[test]
    fn test_analyze_sources_keeps_order_and_counts() {
        let analysis = pipeline(Config::default())
            .analyze_sources("/tmp/demo", "demo", sources())
            .unwrap();
        assert!(analysis.complete);
        assert_eq!(analysis.total_files, 2);
        assert_eq!(analysis.total_lines, 3);
        assert_eq!(analysis.files.keys().collect::<Vec<_>>(), vec!["src/a.py", "b.py"]);
        assert_eq!(analysis.languages.get(&Language::Python), Some(&2));
        assert_eq!(analysis.topological_order.as_ref().map(Vec::len), Some(2));
        // Parse failures stay per-file and never abort the run.
        assert!(analysis.files["b.py"].has_parse_failure());
    }

    #[test]
    fn test_exhausted_budget_marks_run_incomplete() {
        let mut config = Config::default();
        config.project.max_duration_secs = Some(0);
        let analysis = pipeline(config).analyze_sources("/tmp/demo", "demo", sources()).unwrap();
        assert!(!analysis.complete);
        assert!(analysis.files.is_empty());
        assert!(analysis
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::Timeout));
    }

    #[test]
    fn test_incremental_run_writes_cache() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        let pipeline = pipeline(Config::default());

        let first = pipeline.analyze_incremental(dir.path()).unwrap();
        assert!(dir.path().join(".prism-cache/cache.json").exists());
        let second = pipeline.analyze_incremental(dir.path()).unwrap();
        assert_eq!(first.total_files, second.total_files);
        assert_eq!(second.files["a.py"].line_count, 1);
    }
}
