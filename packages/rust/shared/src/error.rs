//! Error types for doctrans.
//!
//! Library crates use [`DocTransError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all doctrans operations.
#[derive(Debug, thiserror::Error)]
pub enum DocTransError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Input or state precondition violated (empty text, wrong status, ...).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Unknown session, chunk, or template id.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Template rendering or ChatML parse/validate failure.
    #[error("prompt build error: {message}")]
    PromptBuild { message: String },

    /// LLM provider call failed (network, auth, quota, content filter).
    #[error("provider error{}: {message}", format_provider_tag(.status, .code))]
    Provider {
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocTransError>;

fn format_provider_tag(status: &Option<u16>, code: &Option<String>) -> String {
    match (status, code) {
        (Some(s), Some(c)) => format!(" ({s} {c})"),
        (Some(s), None) => format!(" ({s})"),
        (None, Some(c)) => format!(" ({c})"),
        (None, None) => String::new(),
    }
}

impl DocTransError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a not-found error for the given entity kind and id.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create a prompt build error from any displayable message.
    pub fn prompt_build(msg: impl Into<String>) -> Self {
        Self::PromptBuild {
            message: msg.into(),
        }
    }

    /// Create a provider error.
    pub fn provider(status: Option<u16>, code: Option<&str>, msg: impl Into<String>) -> Self {
        Self::Provider {
            status,
            code: code.map(str::to_string),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this failure is confined to a single chunk.
    ///
    /// Chunk-scoped errors mark the chunk failed and the run continues;
    /// everything else aborts the run.
    pub fn is_chunk_scoped(&self) -> bool {
        matches!(self, Self::PromptBuild { .. } | Self::Provider { .. })
    }
}
