//! Errors raised while loading workflow documents

use std::path::PathBuf;

/// Error types for workflow loading and rendering
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Invalid role {role:?} in prompt header at line {line}")]
    InvalidRole { line: usize, role: String },

    #[error("Unknown activity kind for {name:?} at line {line}")]
    UnknownActivityKind { line: usize, name: String },

    #[error("Invalid edge label {label:?} at line {line}")]
    InvalidEdgeLabel { line: usize, label: String },

    #[error("Malformed line {line}: {text}")]
    MalformedLine { line: usize, text: String },

    #[error("Invalid edge at line {line}: {text}")]
    InvalidEdge { line: usize, text: String },

    #[error("Workflow has no START activity")]
    MissingStart,

    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Template error: {0}")]
    Template(String),
}

impl WorkflowError {
    /// Attach the path to an IO error
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        WorkflowError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<handlebars::RenderError> for WorkflowError {
    fn from(e: handlebars::RenderError) -> Self {
        WorkflowError::Template(e.to_string())
    }
}

impl From<handlebars::TemplateError> for WorkflowError {
    fn from(e: handlebars::TemplateError) -> Self {
        WorkflowError::Template(e.to_string())
    }
}
