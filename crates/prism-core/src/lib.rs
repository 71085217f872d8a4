pub mod aggregate;
pub mod analysis;
pub mod analyzer;
pub mod cache;
pub mod callgraph;
pub mod config;
pub mod entry;
pub mod error;
pub mod extract;
pub mod graph;
pub mod metrics;
pub mod patterns;
pub mod pipeline;
pub mod resolve;
pub mod scope;
pub mod smells;
pub mod syntax;
pub mod types;
pub mod walk;

pub use analysis::{ProjectAnalysis, StructureNode};
pub use analyzer::{ExtractorRegistry, LanguageExtractor, ParsedFile};
pub use callgraph::CallGraph;
pub use config::Config;
pub use error::{AnalysisError, ExtractError};
pub use graph::DependencyGraph;
pub use pipeline::AnalysisPipeline;
pub use types::*;
