//! Error taxonomy for the step engine.
//!
//! Every failure that can reach the [`StepsManager`](crate::steps_manager::StepsManager)
//! boundary is a [`SheetError`]. The variants mirror what the caller needs to
//! decide next:
//!
//! - [`SheetError::InvalidParams`]: the edit was rejected before anything ran.
//! - [`SheetError::Execution`]: the tabular engine failed while running a step.
//!   The [`ExecutionErrorKind`] says why, so a front-end can pick a message.
//! - [`SheetError::Upgrade`]: a saved analysis could not be migrated.
//! - [`SheetError::OptimizationInvariantViolation`]: the optimizer changed the
//!   meaning of the generated code. Only tests should ever see this one.
//!
//! ## Conversions
//!
//! `From` impls exist for the error types of the crates we call into, so the
//! `?` operator works inside performers:
//!
//! ```no_run
//! use sheetstep::error::{Result, SheetError};
//! use polars::prelude::*;
//!
//! fn height(path: &str) -> Result<usize> {
//!     // PolarsError converts into SheetError::Execution with a classified kind
//!     let df = LazyCsvReader::new(path).finish()?.collect()?;
//!     Ok(df.height())
//! }
//! ```
//!
//! ## Context Extension Trait
//!
//! [`ResultExt`] adds `.context()` to any `Result` whose error converts into
//! a [`SheetError`], keeping the variant and prefixing the message:
//!
//! ```no_run
//! use sheetstep::error::ResultExt;
//!
//! fn load() -> sheetstep::error::Result<String> {
//!     std::fs::read_to_string("analysis.json").context("Failed to read saved analysis")
//! }
//! ```

use polars::error::PolarsError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why the tabular engine failed while executing a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    /// A column the step needs is not there.
    MissingColumn,
    /// Values could not be interpreted as the required type.
    TypeMismatch,
    /// An external data source (file, warehouse) could not be reached.
    ConnectionFailure,
    /// The step would create a header or key that already exists.
    DuplicateValue,
    /// The formula could not be parsed or evaluated.
    FormulaError,
    /// Anything else.
    Unknown,
}

impl ExecutionErrorKind {
    /// Stable identifier sent to the front-end.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingColumn => "missing_column",
            Self::TypeMismatch => "type_mismatch",
            Self::ConnectionFailure => "connection_failure",
            Self::DuplicateValue => "duplicate_value",
            Self::FormulaError => "formula_error",
            Self::Unknown => "unknown",
        }
    }

    /// Classify an engine error by its cause.
    pub fn classify(err: &PolarsError) -> Self {
        match err {
            PolarsError::ColumnNotFound(_)
            | PolarsError::SchemaFieldNotFound(_)
            | PolarsError::StructFieldNotFound(_) => Self::MissingColumn,
            PolarsError::SchemaMismatch(_) | PolarsError::InvalidOperation(_) => {
                Self::TypeMismatch
            }
            PolarsError::Duplicate(_) => Self::DuplicateValue,
            PolarsError::IO { .. } => Self::ConnectionFailure,
            PolarsError::Context { error, .. } => Self::classify(error),
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for step engine operations.
#[derive(Debug)]
pub enum SheetError {
    /// Params failed shape or semantic validation; nothing was applied.
    InvalidParams(String),

    /// The tabular engine raised while a performer was executing.
    Execution {
        kind: ExecutionErrorKind,
        message: String,
    },

    /// A persisted step has no upgrade path to the current schema.
    Upgrade(String),

    /// Optimized code no longer reproduces the un-optimized result.
    OptimizationInvariantViolation(String),

    /// No step with this `step_type` exists.
    UnknownStep(String),

    /// I/O errors (reading saved analyses, writing exports)
    Io(std::io::Error),

    /// JSON (de)serialization errors
    Serialization(String),

    /// Generic error with context
    Other(String),
}

impl SheetError {
    /// Shorthand for an [`SheetError::InvalidParams`].
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::InvalidParams(msg.into())
    }

    /// Shorthand for an [`SheetError::Execution`] of the given kind.
    pub fn execution(kind: ExecutionErrorKind, msg: impl Into<String>) -> Self {
        Self::Execution {
            kind,
            message: msg.into(),
        }
    }

    /// Identifier used as `error_kind` in responses.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidParams(_) => "invalid_params",
            Self::Execution { kind, .. } => kind.as_str(),
            Self::Upgrade(_) => "upgrade_error",
            Self::OptimizationInvariantViolation(_) => "optimization_invariant_violation",
            Self::UnknownStep(_) => "unknown_step",
            Self::Io(_) => "io_error",
            Self::Serialization(_) => "serialization_error",
            Self::Other(_) => "unknown",
        }
    }

    /// Typed error object handed back to whoever sent the edit event.
    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            error_kind: self.error_kind().to_owned(),
            message: self.to_string(),
            traceback: match self {
                Self::Io(e) => Some(format!("{e:?}")),
                _ => None,
            },
        }
    }
}

impl fmt::Display for SheetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParams(msg) => write!(f, "Invalid params: {msg}"),
            Self::Execution { kind, message } => write!(f, "Execution error ({kind}): {message}"),
            Self::Upgrade(msg) => write!(f, "Upgrade error: {msg}"),
            Self::OptimizationInvariantViolation(msg) => {
                write!(f, "Optimization invariant violated: {msg}")
            }
            Self::UnknownStep(step_type) => write!(f, "Unknown step type: {step_type}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for SheetError {}

impl From<std::io::Error> for SheetError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<anyhow::Error> for SheetError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<serde_json::Error> for SheetError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<PolarsError> for SheetError {
    fn from(err: PolarsError) -> Self {
        Self::Execution {
            kind: ExecutionErrorKind::classify(&err),
            message: err.to_string(),
        }
    }
}

impl From<rust_xlsxwriter::XlsxError> for SheetError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        Self::Execution {
            kind: ExecutionErrorKind::ConnectionFailure,
            message: err.to_string(),
        }
    }
}

impl From<SheetError> for String {
    fn from(err: SheetError) -> Self {
        err.to_string()
    }
}

/// `{ error_kind, message, traceback? }` as sent back for a failed edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

/// Result type alias for step engine operations.
pub type Result<T> = std::result::Result<T, SheetError>;

/// Extension trait to add context to results.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, msg: impl Into<String>) -> Result<T>;

    /// Add context using a closure (lazy evaluation).
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<SheetError>,
{
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| prefix(e.into(), &msg.into()))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| prefix(e.into(), &f()))
    }
}

/// Prefix the message but keep the variant, so classification survives context.
fn prefix(err: SheetError, msg: &str) -> SheetError {
    match err {
        SheetError::InvalidParams(m) => SheetError::InvalidParams(format!("{msg}: {m}")),
        SheetError::Execution { kind, message } => SheetError::Execution {
            kind,
            message: format!("{msg}: {message}"),
        },
        SheetError::Upgrade(m) => SheetError::Upgrade(format!("{msg}: {m}")),
        SheetError::OptimizationInvariantViolation(m) => {
            SheetError::OptimizationInvariantViolation(format!("{msg}: {m}"))
        }
        other => SheetError::Other(format!("{msg}: {other}")),
    }
}
