//! Error types for context and import resolution

use thiserror::Error;

use crate::installation::ObjectRef;
use crate::schema::LoaderError;

/// Result type for resolution operations
pub type Result<T> = std::result::Result<T, ImportError>;

/// Resolution errors
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("unable to resolve context of installation {installation}: {reason}")]
    ContextResolution { installation: ObjectRef, reason: String },

    #[error("import {import} of installation {installation} is not ready: {reason}")]
    ImportNotReady {
        installation: ObjectRef,
        import: String,
        reason: String,
    },

    #[error("import {import} (from {from}) of installation {installation} not found{}", suggestion_hint(.suggestion))]
    ImportNotFound {
        installation: ObjectRef,
        import: String,
        from: String,
        suggestion: Option<String>,
    },

    #[error("import {import} does not satisfy its schema: {}", .violations.join("; "))]
    SchemaValidationFailed { import: String, violations: Vec<String> },

    #[error("unable to load schema of import {import}: {source}")]
    SchemaLoader {
        import: String,
        #[source]
        source: LoaderError,
    },

    #[error("import {name} is declared more than once")]
    DuplicateImport { name: String },

    #[error("{} imports failed: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<ImportError>),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error kinds callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ContextResolution,
    ImportNotReady,
    ImportNotFound,
    SchemaValidationFailed,
    SchemaLoader,
    InvalidDefinition,
    Store,
}

impl ImportError {
    /// Kind of this error
    ///
    /// An aggregate reports the kind of its first fatal member, or
    /// `ImportNotReady` when every member is retryable.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImportError::ContextResolution { .. } => ErrorKind::ContextResolution,
            ImportError::ImportNotReady { .. } => ErrorKind::ImportNotReady,
            ImportError::ImportNotFound { .. } => ErrorKind::ImportNotFound,
            ImportError::SchemaValidationFailed { .. } => ErrorKind::SchemaValidationFailed,
            ImportError::SchemaLoader { .. } => ErrorKind::SchemaLoader,
            ImportError::DuplicateImport { .. } | ImportError::InvalidState(_) => {
                ErrorKind::InvalidDefinition
            }
            ImportError::Store(_) | ImportError::Io(_) | ImportError::Json(_) => ErrorKind::Store,
            ImportError::Aggregate(errors) => errors
                .iter()
                .map(ImportError::kind)
                .find(|kind| *kind != ErrorKind::ImportNotReady)
                .unwrap_or(ErrorKind::ImportNotReady),
        }
    }

    /// Whether the caller should retry on the next trigger instead of reporting
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::ImportNotReady
    }

    /// Whether this error, or any member of an aggregate, is of `kind`
    pub fn has_kind(&self, kind: ErrorKind) -> bool {
        match self {
            ImportError::Aggregate(errors) => errors.iter().any(|e| e.has_kind(kind)),
            other => other.kind() == kind,
        }
    }

    /// Flatten nested aggregates into their members
    pub fn into_errors(self) -> Vec<ImportError> {
        match self {
            ImportError::Aggregate(errors) => {
                errors.into_iter().flat_map(ImportError::into_errors).collect()
            }
            other => vec![other],
        }
    }
}

pub fn is_context_resolution_error(err: &ImportError) -> bool {
    err.has_kind(ErrorKind::ContextResolution)
}

pub fn is_import_not_ready_error(err: &ImportError) -> bool {
    err.has_kind(ErrorKind::ImportNotReady)
}

pub fn is_import_not_found_error(err: &ImportError) -> bool {
    err.has_kind(ErrorKind::ImportNotFound)
}

pub fn is_schema_validation_failed_error(err: &ImportError) -> bool {
    err.has_kind(ErrorKind::SchemaValidationFailed)
}

pub fn is_schema_loader_error(err: &ImportError) -> bool {
    err.has_kind(ErrorKind::SchemaLoader)
}

fn suggestion_hint(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(candidate) => format!(" (did you mean {:?}?)", candidate),
        None => String::new(),
    }
}

fn join_errors(errors: &[ImportError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
