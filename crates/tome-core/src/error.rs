use std::path::PathBuf;

/// Rejected capture input; the only error class surfaced synchronously to callers.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CaptureError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("path escapes the knowledge directory: {0}")]
    PathEscape(String),
    #[error("document not found: {0}")]
    DocumentNotFound(String),
    #[error("section '{title}' not found in {document}")]
    SectionNotFound { document: String, title: String },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReasoningError {
    /// The session ran out of context or similar resources; a reset may help.
    #[error("reasoning session exhausted: {0}")]
    ContextExhausted(String),
    #[error("reasoning invocation failed: {0}")]
    Invocation(String),
    #[error("reasoning timed out after {0}s")]
    Timeout(u64),
    #[error("reasoning output malformed: {0}")]
    Malformed(String),
}
