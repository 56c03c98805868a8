//! Error types for template lookup, resolution, and execution.
//!
//! Registry and resolution errors are caller-input errors and are always
//! surfaced. Execution errors wrap whatever the executor reported and are
//! never cached. An empty result set is *not* an error anywhere in this crate.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure reported by a [`crate::executor::QueryExecutor`].
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors from the registry, resolver, and cached execution layer.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("query namespace '{0}' not found")]
    NamespaceNotFound(String),

    #[error("query '{key}' not found in namespace '{namespace}'")]
    TemplateNotFound { namespace: String, key: String },

    #[error("query namespace '{0}' is already registered")]
    DuplicateNamespace(String),

    #[error("invalid template '{namespace}.{key}': {reason}")]
    InvalidTemplate {
        namespace: String,
        key: String,
        reason: String,
    },

    #[error("invalid query key '{0}': expected '<namespace>.<key>'")]
    InvalidQueryKey(String),

    #[error("template '{template}' requires parameter '{name}'")]
    MissingParameter { template: String, name: String },

    #[error("template '{template}' references unknown placeholder '{{{name}}}'")]
    UnknownPlaceholder { template: String, name: String },

    #[error(
        "template '{template}' substitutes text parameter '{name}' as a literal; use '{{:{name}}}' to bind it"
    )]
    UnsafeLiteral { template: String, name: String },

    #[error("failed to read template source {path}: {source}")]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse template source {path}: {source}")]
    SourceParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("execution of '{address}' failed: {source}")]
    ExecutionFailed {
        address: String,
        #[source]
        source: ExecutorError,
    },
}

impl QueryError {
    /// True for errors caused by the caller's template address or parameters.
    pub fn is_caller_error(&self) -> bool {
        !matches!(
            self,
            Self::ExecutionFailed { .. } | Self::SourceRead { .. } | Self::SourceParse { .. }
        )
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, QueryError>;
