//! Service-level error taxonomy.
//!
//! Store failures never leak outward: the cause is logged at the call site
//! and callers only ever see the opaque `Internal` variant.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// A test or test case the caller referenced does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The request itself was malformed (empty capture batch, bad status).
    #[error("{0}")]
    BadRequest(String),

    /// Any store failure. The underlying cause goes to the log only.
    #[error("internal failure")]
    Internal,
}
