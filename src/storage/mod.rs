//! Primary record store: SQLite schema, connection pool, and camera CRUD.

use std::time::Duration;

use thiserror::Error;

pub mod pool;
pub mod sqlite;

pub use pool::{ConnectionPool, PoolConfig, PooledConnection};
pub use sqlite::{CameraStore, UpdateOutcome};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A constraint (unique `camera_id`, unknown owner, ...) rejected the
    /// write. The transaction has been rolled back.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("timed out after {0:?} waiting for a database connection")]
    PoolTimeout(Duration),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
