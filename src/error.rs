//! Error taxonomy for the scan/index engine.
//!
//! Every failure that crosses a component boundary is classified into one
//! of these variants so that callers can map it to a distinct externally
//! visible status class. Scan-internal recovery (skipping a document,
//! terminating a task with an `End` result) keys off the same taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    /// An endpoint adapter failed to open, page, or fetch.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Unsupported or inconsistent configuration.
    #[error("unsupported configuration: {0}")]
    Configuration(String),

    /// A malformed or inapplicable request.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The requester is not allowed to perform the operation.
    #[error("not authorized: {0}")]
    Authorization(String),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Externally visible status class, one per error variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    BadRequest,
    Forbidden,
    ServerError,
    BadGateway,
    ServiceUnavailable,
}

impl ScanError {
    pub fn status_class(&self) -> StatusClass {
        match self {
            ScanError::Validation(_) => StatusClass::BadRequest,
            ScanError::Authorization(_) => StatusClass::Forbidden,
            ScanError::Internal(_) => StatusClass::ServerError,
            ScanError::Connection(_) => StatusClass::BadGateway,
            ScanError::Configuration(_) => StatusClass::ServiceUnavailable,
        }
    }
}
