//! Error taxonomy for the transfer pipelines.
//!
//! Every failure from an external collaborator is classified here so the
//! retry layer can tell retryable conditions from fatal ones. Only
//! [`TransferError::Transient`] is ever retried; everything else aborts the
//! operation immediately (a partial-batch failure inside a bulk response is
//! not an error at this level — see `bulk`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    /// Network failure or service unavailability. Retried with a fixed delay
    /// up to the configured attempt bound.
    #[error("transient i/o failure: {0}")]
    Transient(String),

    /// The remote object or index does not exist. Never retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote object's first byte does not match the configured root
    /// kind. A configuration error, never retried.
    #[error("root kind mismatch: expected {expected}, object starts with {found:?}")]
    RootMismatch { expected: &'static str, found: char },

    /// The scroll token expired server-side. The cursor cannot be resumed.
    #[error("scroll cursor expired: {0}")]
    CursorExpired(String),

    /// The decoder accumulated more than the configured cap without finding
    /// an element boundary. Usually a malformed or non-JSON object.
    #[error("decode buffer exceeded {cap} bytes without an element boundary")]
    BufferOverflow { cap: usize },

    /// The index rejected a bulk mutation outright (fatal error policy).
    #[error("bulk request rejected: {0}")]
    BulkRejected(String),

    /// The annotation service returned a non-success response.
    #[error("annotation failed: {0}")]
    Annotation(String),

    /// Invalid configuration detected at runtime.
    #[error("configuration error: {0}")]
    Config(String),
}

impl TransferError {
    /// Whether the retry layer may re-attempt the failed call.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransferError::Transient(_))
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        TransferError::Transient(err.to_string())
    }
}
