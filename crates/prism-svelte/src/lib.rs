//! Svelte single-file components.
//!
//! `<script>` blocks are parsed in place with the JavaScript or TypeScript
//! grammar restricted to their byte ranges, so every node keeps its position
//! in the component. Event handlers referenced from markup (`on:click={save}`,
//! `onclick={() => reset()}`) become module-level calls.

use std::ops::Range;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use tree_sitter::{Parser, Point};

use prism_core::analyzer::{LanguageExtractor, ParsedFile};
use prism_core::error::ExtractError;
use prism_core::extract::FileBuilder;
use prism_core::resolve::{Resolution, ResolveContext};
use prism_core::types::{CallReceiver, CallSite, FileRecord, ImportEdge, Language};
use prism_typescript::{resolve_specifier, Dialect, TypeScriptExtractor};

const SCRIPT_BLOCK: &str = r"(?s)<script(\s[^>]*)?>(.*?)</script\s*>";
const STYLE_BLOCK: &str = r"(?s)<style(\s[^>]*)?>.*?</style\s*>";
const HANDLER_ATTR: &str = r"(?:^|\s)on:?[A-Za-z]+(?:\|[A-Za-z|]+)?\s*=\s*\{([^}]*)\}";
const CALLEE: &str = r"([A-Za-z_$][\w$]*(?:\.[A-Za-z_$][\w$]*)*)\s*\(";
const IDENTIFIER: &str = r"^[A-Za-z_$][\w$]*$";

/// One `<script>` element's content.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScriptBlock {
    content: Range<usize>,
    typescript: bool,
}

/// Svelte component extractor.
pub struct SvelteExtractor {
    scripts: TypeScriptExtractor,
    script_block: Regex,
    style_block: Regex,
    handler_attr: Regex,
    callee: Regex,
    identifier: Regex,
}

impl SvelteExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            scripts: TypeScriptExtractor::new().context("failed to build script extractor")?,
            script_block: Regex::new(SCRIPT_BLOCK).context("invalid script block pattern")?,
            style_block: Regex::new(STYLE_BLOCK).context("invalid style block pattern")?,
            handler_attr: Regex::new(HANDLER_ATTR).context("invalid handler pattern")?,
            callee: Regex::new(CALLEE).context("invalid callee pattern")?,
            identifier: Regex::new(IDENTIFIER).context("invalid identifier pattern")?,
        })
    }

    fn script_blocks(&self, content: &str) -> Vec<ScriptBlock> {
        self.script_block
            .captures_iter(content)
            .filter_map(|caps| {
                let body = caps.get(2)?;
                let attrs = caps.get(1).map_or("", |m| m.as_str());
                Some(ScriptBlock {
                    content: body.range(),
                    typescript: is_typescript(attrs),
                })
            })
            .collect()
    }

    fn dialect(blocks: &[ScriptBlock]) -> Dialect {
        if blocks.iter().any(|b| b.typescript) {
            Dialect::TypeScript
        } else {
            Dialect::JavaScript
        }
    }

    /// Handler references in markup, skipping script and style elements.
    fn markup_calls(&self, content: &str) -> Vec<CallSite> {
        let excluded: Vec<Range<usize>> = self
            .script_block
            .find_iter(content)
            .chain(self.style_block.find_iter(content))
            .map(|m| m.range())
            .collect();

        let mut calls = Vec::new();
        for caps in self.handler_attr.captures_iter(content) {
            let Some(expr) = caps.get(1) else {
                continue;
            };
            if excluded.iter().any(|r| r.contains(&expr.start())) {
                continue;
            }
            let text = expr.as_str().trim();
            let line = line_at(content, expr.start());
            if self.identifier.is_match(text) {
                calls.push(CallSite::new(text, CallReceiver::Bare, line));
                continue;
            }
            for callee in self.callee.captures_iter(text).filter_map(|c| c.get(1)) {
                let raw = callee.as_str();
                let site = match raw.rsplit_once('.') {
                    Some((receiver, name)) => CallSite::new(name, CallReceiver::Named(receiver.to_string()), line),
                    None => CallSite::new(raw, CallReceiver::Bare, line),
                };
                calls.push(site);
            }
        }
        calls
    }
}

fn is_typescript(attrs: &str) -> bool {
    let attrs = attrs.replace('\'', "\"");
    attrs.contains("lang=\"ts\"") || attrs.contains("lang=\"typescript\"")
}

fn line_at(content: &str, offset: usize) -> usize {
    content.as_bytes()[..offset.min(content.len())]
        .iter()
        .filter(|&&b| b == b'\n')
        .count()
        + 1
}

fn point_at(content: &str, offset: usize) -> Point {
    let before = &content.as_bytes()[..offset.min(content.len())];
    let row = before.iter().filter(|&&b| b == b'\n').count();
    let column = before.iter().rev().take_while(|&&b| b != b'\n').count();
    Point::new(row, column)
}

impl LanguageExtractor for SvelteExtractor {
    fn language(&self) -> Language {
        Language::Svelte
    }

    fn file_extensions(&self) -> &[&str] {
        &["svelte"]
    }

    fn parse_file(&self, path: &Path, content: &str) -> Result<ParsedFile, ExtractError> {
        let blocks = self.script_blocks(content);
        let mut parser = Parser::new();
        parser
            .set_language(self.scripts.grammar(Self::dialect(&blocks)))
            .map_err(|e| ExtractError::Grammar {
                language: "svelte".to_string(),
                message: e.to_string(),
            })?;

        // An empty range list would mean "the whole file"; a component with no
        // script parses as an empty program instead.
        let tree = if blocks.is_empty() {
            parser.parse("", None)
        } else {
            let ranges: Vec<tree_sitter::Range> = blocks
                .iter()
                .map(|b| tree_sitter::Range {
                    start_byte: b.content.start,
                    end_byte: b.content.end,
                    start_point: point_at(content, b.content.start),
                    end_point: point_at(content, b.content.end),
                })
                .collect();
            parser
                .set_included_ranges(&ranges)
                .map_err(|e| ExtractError::InvalidRange {
                    path: path.display().to_string(),
                    message: format!("{e:?}"),
                })?;
            parser.parse(content, None)
        };
        let tree = tree.ok_or_else(|| ExtractError::ParseAborted {
            path: path.display().to_string(),
        })?;
        Ok(ParsedFile {
            path: path.to_path_buf(),
            language: Language::Svelte,
            tree,
            content: content.to_string(),
        })
    }

    fn extract(&self, parsed: &ParsedFile) -> FileRecord {
        let path = parsed.relative_path();
        let content = parsed.content.as_str();
        let dialect = Self::dialect(&self.script_blocks(content));
        let mut builder = FileBuilder::new(&path, Language::Svelte, content);
        self.scripts
            .extract_program(&mut builder, parsed.tree.root_node(), dialect);
        for call in self.markup_calls(content) {
            builder.add_module_call(call);
        }
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
    use std::collections::{BTreeMap, HashSet};
    use std::path::PathBuf;

    fn extract(path: &str, content: &str) -> FileRecord {
        let extractor = SvelteExtractor::new().unwrap();
        let parsed = extractor.parse_file(&PathBuf::from(path), content).unwrap();
        extractor.extract(&parsed)
    }

    const COUNTER: &str = r#"<script lang="ts">
  import { save } from './api';
  export let title: string;

  function handleClick(): void {
    save(title);
  }
</script>

<h1>{title}</h1>
<button on:click={handleClick}>Save</button>
<button onclick={() => reset()}>Reset</button>

<style>
  button { color: red; }
</style>
"#;

    #[test]
    fn test_script_symbols_keep_component_positions() {
        let record = extract("src/Counter.svelte", COUNTER);
        assert_eq!(record.language, Language::Svelte);
        assert_eq!(record.functions.len(), 1);
        let handler = &record.functions[0];
        assert_eq!(handler.name, "handleClick");
        assert_eq!(handler.qualified_name.as_str(), "src/Counter.svelte::handleClick");
        assert_eq!(handler.lines.start, 5);
        assert_eq!(handler.lines.end, 7);
        assert_eq!(handler.return_type.as_deref(), Some("void"));

        assert_eq!(record.imports.len(), 1);
        assert_eq!(record.imports[0].specifier, "./api");
        assert_eq!(record.imports[0].line, 2);
    }

    #[test]
    fn test_markup_handlers_become_module_calls() {
        let record = extract("src/Counter.svelte", COUNTER);
        let calls: Vec<(&str, usize)> = record
            .module_calls
            .iter()
            .map(|c| (c.raw.as_str(), c.line))
            .collect();
        assert_eq!(calls, vec![("handleClick", 11), ("reset", 12)]);
    }

    #[test]
    fn test_javascript_script_and_module_block() {
        let content = r#"<script context="module">
  export function preload() { return fetchAll(); }
</script>

<script>
  let items = [];
  const remove = (item) => { items = items.filter((i) => i !== item); };
</script>

{#each items as item}
  <li on:click|preventDefault={() => store.remove(item)}>{item}</li>
{/each}
"#;
        let record = extract("List.svelte", content);
        let names: Vec<&str> = record.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["preload", "remove"]);
        assert!(record.functions[0].is_exported);
        assert_eq!(record.functions[1].lines.start, 7);

        assert_eq!(record.module_calls.len(), 1);
        assert_eq!(record.module_calls[0].raw, "store.remove");
        assert_eq!(record.module_calls[0].receiver, CallReceiver::Named("store".to_string()));
    }

    #[test]
    fn test_markup_only_component() {
        let record = extract("Static.svelte", "<p>Hello</p>\n<button on:click={missing}>x</button>\n");
        assert!(record.functions.is_empty());
        assert!(record.imports.is_empty());
        assert_eq!(record.line_count, 2);
        assert_eq!(record.module_calls[0].raw, "missing");
        assert!(!record.has_parse_failure());
    }

    #[test]
    fn test_component_imports_resolve_like_scripts() {
        let content = "<script>\n  import Child from './Child.svelte';\n  import { writable } from 'svelte/store';\n</script>\n<Child />\n";
        let record = extract("src/App.svelte", content);
        let files: HashSet<String> = ["src/App.svelte", "src/Child.svelte"]
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
        let extractor = SvelteExtractor::new().unwrap();
        let resolved: Vec<Resolution> = record
            .imports
            .iter()
            .map(|edge| extractor.resolve_import(edge, &ctx))
            .collect();
        assert_eq!(
            resolved,
            vec![
                Resolution::Internal(vec!["src/Child.svelte".to_string()]),
                Resolution::External("svelte".to_string()),
            ]
        );

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["language"], "svelte");
    }

    #[test]
    fn test_script_lang_detection() {
        let extractor = SvelteExtractor::new().unwrap();
        let blocks = extractor.script_blocks("<script lang='ts'>let a: number = 1;</script>");
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].typescript);
        assert_eq!(SvelteExtractor::dialect(&blocks), Dialect::TypeScript);
        assert_eq!(SvelteExtractor::dialect(&[]), Dialect::JavaScript);
    }
}
