use thiserror::Error;

/// Failure to turn one file's text into a syntax tree.
///
/// These never escape the extraction boundary; the pipeline converts them
/// into a [`Diagnostic`](crate::types::Diagnostic) on a partial record.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to load {language} grammar: {message}")]
    Grammar { language: String, message: String },

    #[error("parser produced no tree for '{path}'")]
    ParseAborted { path: String },

    #[error("invalid embedded source range in '{path}': {message}")]
    InvalidRange { path: String, message: String },
}

/// Violations of the aggregate's structural invariants.
///
/// Raised only by verification helpers; a correct aggregation never produces one.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("call edge {caller} -> {callee} is missing from {missing_side}")]
    OneSidedCallEdge {
        caller: String,
        callee: String,
        missing_side: &'static str,
    },

    #[error("call edge {caller} -> {callee} points at an unknown symbol")]
    DanglingCallEdge { caller: String, callee: String },

    #[error("import {source_path} -> {target} is internal but the target is not part of the project")]
    DanglingImport { source_path: String, target: String },
}
