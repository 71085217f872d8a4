use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

pub const CONFIG_FILE: &str = ".prism.toml";

/// Top-level configuration from `.prism.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub entry_points: EntryPointConfig,
    #[serde(default)]
    pub resolve: ResolveConfig,
    #[serde(default)]
    pub patterns: PatternConfig,
    #[serde(default)]
    pub smells: SmellConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Languages to analyse; empty means every supported language.
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Overall budget for one run. Unlimited when absent.
    #[serde(default)]
    pub max_duration_secs: Option<u64>,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        "**/*.min.js".to_string(),
        "**/*.d.ts".to_string(),
        "**/migrations/**".to_string(),
    ]
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

fn default_cache_dir() -> String {
    ".prism-cache".to_string()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            languages: Vec::new(),
            exclude_patterns: default_exclude_patterns(),
            max_file_bytes: default_max_file_bytes(),
            max_duration_secs: None,
            cache_dir: default_cache_dir(),
        }
    }
}

/// Extra entry points beyond the naming conventions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryPointConfig {
    /// Glob patterns of files to treat as entry points.
    #[serde(default)]
    pub files: Vec<String>,
    /// Qualified names of functions to treat as entry points.
    #[serde(default)]
    pub functions: Vec<String>,
    #[serde(default = "default_true")]
    pub exports_are_entry_points: bool,
}

fn default_true() -> bool {
    true
}

impl Default for EntryPointConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            functions: Vec::new(),
            exports_are_entry_points: true,
        }
    }
}

/// Module resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveConfig {
    /// Specifier prefix -> project directory (`$lib` -> `src/lib`).
    #[serde(default = "default_aliases")]
    pub aliases: BTreeMap<String, String>,
    /// Search directories for quoted C/C++ includes.
    #[serde(default = "default_include_dirs")]
    pub include_dirs: Vec<String>,
}

fn default_aliases() -> BTreeMap<String, String> {
    let mut aliases = BTreeMap::new();
    aliases.insert("$lib".to_string(), "src/lib".to_string());
    aliases
}

fn default_include_dirs() -> Vec<String> {
    vec!["include".to_string(), "src".to_string()]
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            aliases: default_aliases(),
            include_dirs: default_include_dirs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternConfig {
    /// Matches below this confidence are dropped.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

fn default_min_confidence() -> f64 {
    0.3
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
        }
    }
}

/// Thresholds for code smell detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmellConfig {
    #[serde(default = "default_max_function_length")]
    pub max_function_length: usize,
    #[serde(default = "default_max_class_length")]
    pub max_class_length: usize,
    #[serde(default = "default_max_parameters")]
    pub max_parameters: usize,
    #[serde(default = "default_max_complexity")]
    pub max_complexity: u32,
    #[serde(default = "default_max_nesting_depth")]
    pub max_nesting_depth: u32,
    #[serde(default = "default_max_methods")]
    pub max_methods: usize,
    #[serde(default = "default_max_fields")]
    pub max_fields: usize,
}

fn default_max_function_length() -> usize {
    50
}
fn default_max_class_length() -> usize {
    200
}
fn default_max_parameters() -> usize {
    5
}
fn default_max_complexity() -> u32 {
    10
}
fn default_max_nesting_depth() -> u32 {
    3
}
fn default_max_methods() -> usize {
    20
}
fn default_max_fields() -> usize {
    15
}

impl Default for SmellConfig {
    fn default() -> Self {
        Self {
            max_function_length: default_max_function_length(),
            max_class_length: default_max_class_length(),
            max_parameters: default_max_parameters(),
            max_complexity: default_max_complexity(),
            max_nesting_depth: default_max_nesting_depth(),
            max_methods: default_max_methods(),
            max_fields: default_max_fields(),
        }
    }
}

impl Config {
    /// Load configuration from a `.prism.toml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        let config: Config = toml::from_str(&content).with_context(|| {
            format!(
                "failed to parse '{}'. Run `prism init` to create a valid config file",
                path.display()
            )
        })?;
        Ok(config)
    }

    /// Load from `.prism.toml` in the given directory or any ancestor, or return defaults.
    pub fn load_or_default(dir: &Path) -> Self {
        let start = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        let mut current = start.as_path();
        loop {
            let config_path = current.join(CONFIG_FILE);
            if config_path.exists() {
                return match Self::load(&config_path) {
                    Ok(config) => config,
                    Err(e) => {
                        warn!(
                            "failed to load config from '{}': {e:#}. Using defaults.",
                            config_path.display()
                        );
                        Self::default()
                    }
                };
            }
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        Self::default()
    }

    /// Languages selected by `[project].languages`, or `None` for all.
    pub fn selected_languages(&self) -> Result<Option<Vec<crate::types::Language>>> {
        if self.project.languages.is_empty() {
            return Ok(None);
        }
        let languages = self
            .project
            .languages
            .iter()
            .map(|l| l.parse())
            .collect::<Result<Vec<_>>>()
            .context("invalid entry in [project].languages")?;
        Ok(Some(languages))
    }

    /// Generate default TOML content for `prism init`.
    pub fn default_toml() -> String {
        r#"# Prism - cross-language structure analysis configuration

[project]
# Languages to analyse: python, javascript, typescript, cpp, csharp, svelte.
# Leave empty to analyse everything prism understands.
languages = []
exclude_patterns = ["**/*.min.js", "**/*.d.ts", "**/migrations/**"]
max_file_bytes = 1048576
# Abort the run (keeping partial results) after this many seconds.
# max_duration_secs = 120
cache_dir = ".prism-cache"

[entry_points]
# Files and functions that are invoked from outside the project.
files = []
functions = []
exports_are_entry_points = true

[resolve]
include_dirs = ["include", "src"]

[resolve.aliases]
"$lib" = "src/lib"

[patterns]
min_confidence = 0.3

[smells]
max_function_length = 50
max_class_length = 200
max_parameters = 5
max_complexity = 10
max_nesting_depth = 3
max_methods = 20
max_fields = 15
"#
        .to_string()
    }
}
