//! Centralized error types for mailpipe.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors produced by a blob store.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The object does not exist. This is the only storage failure the
    /// idempotency probe treats as a decision rather than a fault.
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// The bucket or key cannot be mapped onto the store.
    #[error("Invalid object key '{0}'")]
    InvalidKey(String),

    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Any other backend failure.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// `true` for the distinguished not-found signal.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors produced while handing a message to a mail transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Sender or recipients could not be derived from the message headers.
    #[error("Cannot build envelope: {0}")]
    Envelope(String),

    /// SMTP transport-level failure (connection, authentication, rejection).
    #[error("SMTP transport error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    /// The file outbox could not be written.
    #[error("File transport error: {0}")]
    File(#[from] lettre::transport::file::Error),

    /// The file outbox directory could not be prepared.
    #[error("Outbox I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// All errors produced by the composer and dispatcher stages.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A required field is missing or malformed.
    #[error("Invalid request field `{field}`: {reason}")]
    Validation { field: String, reason: String },

    /// Neither `body.text` nor `body.html` was supplied.
    #[error("Request is missing body content (no text, no html)")]
    MissingBodyContent,

    /// A body field is present but is not a plain string.
    #[error("Request has invalid body content: `{field}` must be a string if provided")]
    InvalidBodyContent { field: String },

    /// An attachment could not be fetched or decoded.
    #[error("Failed to resolve attachment '{reference}': {reason}")]
    AttachmentResolution { reference: String, reason: String },

    /// A resolved attachment could not be turned into a MIME part.
    #[error("Failed to build attachment part '{filename}': {reason}")]
    AttachmentPart { filename: String, reason: String },

    /// Template rendering failed.
    #[error("Template rendering error: {0}")]
    Render(String),

    /// The MIME message could not be assembled.
    #[error("Message build error: {0}")]
    Build(String),

    /// Unexpected blob store failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Transport submission failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The dispatch did not finish inside the invocation's time budget.
    #[error("Deadline exceeded after {budget:?}")]
    DeadlineExceeded { budget: Duration },
}

/// Convenience alias for `Result<T, PipelineError>`.
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Create a `Validation` variant naming the offending field.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
