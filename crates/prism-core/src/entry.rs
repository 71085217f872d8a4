//! Entry points: files and functions invoked from outside the project.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use indexmap::IndexMap;

use crate::config::EntryPointConfig;
use crate::types::FileRecord;

/// File names that start a program by convention.
pub const ENTRY_FILE_NAMES: &[&str] = &[
    "main.py",
    "__main__.py",
    "app.py",
    "run.py",
    "manage.py",
    "index.js",
    "main.js",
    "app.js",
    "server.js",
    "index.ts",
    "main.ts",
    "app.ts",
    "server.ts",
    "main.cpp",
    "main.cc",
    "main.c",
    "Program.cs",
    "App.svelte",
];

pub(crate) fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).with_context(|| format!("invalid glob pattern '{pattern}'"))?;
        builder.add(glob);
    }
    builder.build().context("failed to build glob set")
}

/// Entry files in traversal order: conventional names plus configured globs.
pub fn entry_files(files: &IndexMap<String, FileRecord>, config: &EntryPointConfig) -> Result<Vec<String>> {
    let extra = build_globset(&config.files)?;
    Ok(files
        .keys()
        .filter(|path| {
            let file_name = path.rsplit('/').next().unwrap_or(path.as_str());
            ENTRY_FILE_NAMES.contains(&file_name) || extra.is_match(path.as_str())
        })
        .cloned()
        .collect())
}

/// Qualified names of every entry function.
///
/// Extractor-flagged functions, targets of module-level calls, configured
/// names, and (optionally) exported functions.
pub fn entry_functions(files: &IndexMap<String, FileRecord>, config: &EntryPointConfig) -> BTreeSet<String> {
    let mut entries: BTreeSet<String> = config.functions.iter().cloned().collect();
    for record in files.values() {
        for site in &record.module_calls {
            if let Some(target) = &site.resolved {
                entries.insert(target.0.clone());
            }
        }
        for function in record.all_functions() {
            if function.is_entry || (config.exports_are_entry_points && function.is_exported) {
                entries.insert(function.qualified_name.0.clone());
            }
        }
    }
    entries
}

/// Flag every entry function on its symbol.
pub fn mark_entry_functions(files: &mut IndexMap<String, FileRecord>, entries: &BTreeSet<String>) {
    for record in files.values_mut() {
        for function in record.all_functions_mut() {
            if entries.contains(function.qualified_name.as_str()) {
                function.is_entry = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CallReceiver, CallSite, FunctionSymbol, Language, LineRange, QualifiedName};

    fn files(paths: &[&str]) -> IndexMap<String, FileRecord> {
        paths
            .iter()
            .map(|p| (p.to_string(), FileRecord::empty(p, Language::Python)))
            .collect()
    }

    #[test]
    fn test_conventional_entry_files() {
        let files = files(&["src/main.py", "src/util.py", "web/index.ts", "tools/cli.py"]);
        let config = EntryPointConfig {
            files: vec!["tools/*.py".to_string()],
            ..EntryPointConfig::default()
        };
        assert_eq!(
            entry_files(&files, &config).unwrap(),
            vec!["src/main.py", "web/index.ts", "tools/cli.py"]
        );
    }

    #[test]
    fn test_invalid_glob_is_an_error() {
        let config = EntryPointConfig {
            files: vec!["src/[".to_string()],
            ..EntryPointConfig::default()
        };
        assert!(entry_files(&files(&["a.py"]), &config).is_err());
    }

    #[test]
    fn test_entry_function_sources() {
        let mut files = files(&["a.py"]);
        let record = files.get_mut("a.py").unwrap();
        let mut main = FunctionSymbol::new("a.py", None, "main", LineRange::new(1, 2));
        main.is_entry = true;
        let mut exported = FunctionSymbol::new("a.py", None, "api", LineRange::new(3, 4));
        exported.is_exported = true;
        record.functions.push(main);
        record.functions.push(exported);
        record.functions.push(FunctionSymbol::new("a.py", None, "boot", LineRange::new(5, 6)));
        let mut call = CallSite::new("boot", CallReceiver::Bare, 8);
        call.resolved = Some(QualifiedName("a.py::boot".into()));
        record.module_calls.push(call);

        let config = EntryPointConfig {
            functions: vec!["lib.py::hook".to_string()],
            ..EntryPointConfig::default()
        };
        let entries = entry_functions(&files, &config);
        let expected: BTreeSet<String> = ["a.py::main", "a.py::api", "a.py::boot", "lib.py::hook"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(entries, expected);

        let config = EntryPointConfig {
            exports_are_entry_points: false,
            ..EntryPointConfig::default()
        };
        assert!(!entry_functions(&files, &config).contains("a.py::api"));

        mark_entry_functions(&mut files, &entries);
        assert!(files["a.py"].functions[2].is_entry);
    }
}
