//! Error types for annotation conversion, schema building and validation.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while turning type hints into fields.
///
/// These surface at schema build time for eagerly converted fields, or at
/// first use for thunked fields.
#[derive(Debug, Clone, Error)]
pub enum ConversionError {
    #[error("no field factory found for {hint}")]
    UnregisteredType { hint: String },

    #[error(
        "mismatched hints and record fields on {class}. Got hints: {} but record fields: {}",
        hints.join(", "),
        fields.join(", ")
    )]
    MismatchedHints {
        class: String,
        hints: Vec<String>,
        fields: Vec<String>,
    },

    #[error("no schema named {name} is registered")]
    UnknownSchema { name: String },
}

/// Base error family for everything this crate reports while describing
/// classes and building schemas.
#[derive(Debug, Clone, Error)]
pub enum AnnotationError {
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("invalid type hint \"{hint}\": {message}")]
    InvalidHint { hint: String, message: String },

    #[error("cannot create a consistent method resolution order for {name}")]
    InconsistentHierarchy { name: String },

    #[error("invalid configuration for {schema}: {message}")]
    Configuration { schema: String, message: String },
}

impl AnnotationError {
    /// Returns the conversion error if this is one.
    pub fn as_conversion(&self) -> Option<&ConversionError> {
        match self {
            AnnotationError::Conversion(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        2
    }
}

/// Errors while reading model descriptions and payload documents.
#[derive(Debug, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid model: {message}")]
    InvalidModel { message: String },

    #[error(transparent)]
    Annotation(#[from] AnnotationError),
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. } | LoadError::ReadError { .. } => 3,
            _ => 2,
        }
    }
}

/// Errors during dump, load and validation.
#[derive(Debug, Error)]
pub enum ValidateError {
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("invalid schema: {message}")]
    InvalidSchema { message: String },

    #[error("validation failed with {} error(s)", errors.len())]
    Invalid { errors: Vec<FieldError> },
}

impl ValidateError {
    /// Single error at the given path.
    pub fn at(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidateError::Invalid {
            errors: vec![FieldError {
                path: path.into(),
                message: message.into(),
            }],
        }
    }

    /// Prefix every collected error path with `segment`.
    pub(crate) fn nest(self, segment: &str) -> Self {
        match self {
            ValidateError::Invalid { errors } => ValidateError::Invalid {
                errors: errors
                    .into_iter()
                    .map(|e| FieldError {
                        path: format!("/{}{}", escape_pointer(segment), e.path),
                        message: e.message,
                    })
                    .collect(),
            },
            other => other,
        }
    }

    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ValidateError::Invalid { .. } => 1,
            _ => 2,
        }
    }
}

/// Single field error with path context.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FieldError {
    /// JSON Pointer (RFC 6901) to the invalid value.
    pub path: String,
    /// Human-readable error message.
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}
