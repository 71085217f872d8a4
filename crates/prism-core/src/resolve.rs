//! Project-wide lookup tables used by per-language import resolution.

use std::collections::{BTreeMap, HashSet};

use crate::config::ResolveConfig;

/// Outcome of resolving one import specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// One or more project files (a namespace may span several).
    Internal(Vec<String>),
    External(String),
    Unresolved,
}

/// Read-only view of the project handed to [`LanguageExtractor::resolve_import`].
///
/// [`LanguageExtractor::resolve_import`]: crate::analyzer::LanguageExtractor::resolve_import
pub struct ResolveContext<'a> {
    pub files: &'a HashSet<String>,
    /// Declared namespace -> files declaring it, in traversal order.
    pub namespaces: &'a BTreeMap<String, Vec<String>>,
    pub config: &'a ResolveConfig,
}

impl<'a> ResolveContext<'a> {
    pub fn contains(&self, path: &str) -> bool {
        self.files.contains(path)
    }

    /// First candidate that is a project file.
    pub fn first_existing<I>(&self, candidates: I) -> Option<String>
    where
        I: IntoIterator<Item = String>,
    {
        candidates.into_iter().find(|c| self.contains(c))
    }

    pub fn namespace_files(&self, namespace: &str) -> &'a [String] {
        self.namespaces
            .get(namespace)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Rewrite a specifier through the longest matching configured alias.
    pub fn apply_alias(&self, specifier: &str) -> Option<String> {
        let mut aliases: Vec<(&String, &String)> = self.config.aliases.iter().collect();
        aliases.sort_by_key(|(alias, _)| std::cmp::Reverse(alias.len()));
        for (alias, target) in aliases {
            let alias = alias.trim_end_matches('/');
            let target = target.trim_end_matches('/');
            if specifier == alias {
                return Some(target.to_string());
            }
            if let Some(rest) = specifier.strip_prefix(alias) {
                if let Some(rest) = rest.strip_prefix('/') {
                    return Some(join_normalized(target, rest).unwrap_or_else(|| format!("{target}/{rest}")));
                }
            }
        }
        None
    }

    pub fn include_dirs(&self) -> &'a [String] {
        &self.config.include_dirs
    }
}

/// Directory part of a relative path ("" for top-level files).
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Join `rel` onto `base_dir`, folding `.` and `..`. `None` if it climbs above the root.
pub fn join_normalized(base_dir: &str, rel: &str) -> Option<String> {
    let mut parts: Vec<&str> = base_dir.split('/').filter(|p| !p.is_empty()).collect();
    for segment in rel.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context<'a>(
        files: &'a HashSet<String>,
        namespaces: &'a BTreeMap<String, Vec<String>>,
        config: &'a ResolveConfig,
    ) -> ResolveContext<'a> {
        ResolveContext {
            files,
            namespaces,
            config,
        }
    }

    #[test]
    fn test_join_normalized() {
        assert_eq!(join_normalized("src/app", "../lib/util").as_deref(), Some("src/lib/util"));
        assert_eq!(join_normalized("src", "./a").as_deref(), Some("src/a"));
        assert_eq!(join_normalized("", "a/b").as_deref(), Some("a/b"));
        assert_eq!(join_normalized("src", "../../x"), None);
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("src/app/main.ts"), "src/app");
        assert_eq!(parent_dir("main.py"), "");
    }

    #[test]
    fn test_alias_longest_match_wins() {
        let files = HashSet::new();
        let namespaces = BTreeMap::new();
        let mut config = ResolveConfig::default();
        config.aliases.insert("@".to_string(), "src".to_string());
        config.aliases.insert("@ui".to_string(), "src/components/ui".to_string());
        let ctx = context(&files, &namespaces, &config);

        assert_eq!(ctx.apply_alias("@ui/button").as_deref(), Some("src/components/ui/button"));
        assert_eq!(ctx.apply_alias("@/lib/api").as_deref(), Some("src/lib/api"));
        assert_eq!(ctx.apply_alias("react"), None);
    }

    #[test]
    fn test_first_existing() {
        let files: HashSet<String> = ["src/a.ts".to_string()].into_iter().collect();
        let namespaces = BTreeMap::new();
        let config = ResolveConfig::default();
        let ctx = context(&files, &namespaces, &config);
        let found = ctx.first_existing(vec!["src/a.js".to_string(), "src/a.ts".to_string()]);
        assert_eq!(found.as_deref(), Some("src/a.ts"));
    }
}
