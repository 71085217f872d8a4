pub mod check;
pub mod json;
pub mod text;

/// Output format selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(anyhow::anyhow!("unknown format: {s} (expected text or json)")),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use prism_core::config::Config;
    use prism_core::types::{Language, SourceFile};
    use prism_core::{AnalysisPipeline, ExtractorRegistry, ProjectAnalysis};
    use prism_python::PythonExtractor;

    /// Two modules importing each other, one unused function.
    pub fn cyclic_project() -> ProjectAnalysis {
        let sources = vec![
            SourceFile::new(
                "a.py",
                Language::Python,
                "import b\n\n\ndef main():\n    b.helper()\n\n\ndef unused():\n    pass\n",
            ),
            SourceFile::new("b.py", Language::Python, "import a\n\n\ndef helper():\n    return 1\n"),
        ];
        pipeline().analyze_sources("/tmp/demo", "demo", sources).unwrap()
    }

    pub fn clean_project() -> ProjectAnalysis {
        let sources = vec![SourceFile::new(
            "main.py",
            Language::Python,
            "def main():\n    \"\"\"Entry.\"\"\"\n    return 0\n",
        )];
        pipeline().analyze_sources("/tmp/clean", "clean", sources).unwrap()
    }

    fn pipeline() -> AnalysisPipeline {
        let registry = ExtractorRegistry::new().with(Box::new(PythonExtractor::new().unwrap()));
        AnalysisPipeline::new(registry, Config::default())
    }
}
