//! Caller-facing error taxonomy.
//!
//! Index failures are deliberately absent: they stop at the coordinator and
//! query router and are only ever logged.

use thiserror::Error;

use crate::storage::StoreError;

#[derive(Debug, Error)]
pub enum CameraError {
    /// Uniqueness (or other constraint) violation on write. Never retried.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// The record exists but the caller may not modify it.
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for CameraError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => CameraError::Conflict(msg),
            StoreError::NotFound(msg) => CameraError::NotFound(msg),
            other => CameraError::Store(other),
        }
    }
}

pub type CameraResult<T> = Result<T, CameraError>;
