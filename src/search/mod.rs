//! Secondary search index: the client seam, its backends, and the read path.
//!
//! The index is best-effort. Nothing here is authoritative for existence or
//! ownership; [`query::QueryRouter`] re-checks every hit against the store.

use std::sync::Arc;

use thiserror::Error;

use crate::model::types::{CameraDocument, DocumentPatch};

pub mod http;
pub mod query;
pub mod tantivy;

pub use http::{HttpIndexConfig, HttpSearchIndex};
pub use query::QueryRouter;
pub use tantivy::TantivyIndex;

#[derive(Debug, Error)]
pub enum IndexError {
    /// Could not reach the index (connect failure, timeout, closed writer).
    #[error("search index unavailable: {0}")]
    Unavailable(String),
    /// A partial update targeted a document the index does not have.
    #[error("document '{0}' not found in index")]
    DocumentMissing(String),
    #[error("search index returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("tantivy error: {0}")]
    Tantivy(#[from] ::tantivy::TantivyError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Paging reached past [`MAX_RESULT_WINDOW`].
    #[error("result window too large: offset {offset} exceeds {max}", max = MAX_RESULT_WINDOW)]
    ResultWindow { offset: usize },
}

pub type IndexResult<T> = Result<T, IndexError>;

/// Best-effort document index keyed by `camera_id`.
///
/// Implementations must report failures as `IndexError` and never panic into
/// the caller; the caller decides whether a failure matters.
pub trait SearchIndex: Send + Sync {
    /// Insert or fully replace the document.
    fn upsert(&self, doc: &CameraDocument) -> IndexResult<()>;

    /// Merge `patch` into an existing document. Fails with
    /// [`IndexError::DocumentMissing`] when there is nothing to merge into.
    fn partial_update(&self, camera_id: &str, patch: &DocumentPatch) -> IndexResult<()>;

    /// Remove the document. Removing an unknown id is not an error.
    fn delete(&self, camera_id: &str) -> IndexResult<()>;

    /// Match `query` across name, description, location and camera id.
    /// Returns camera ids in relevance order.
    fn search(&self, query: &str, size: usize, offset: usize) -> IndexResult<Vec<String>>;

    /// Short label for logs.
    fn backend(&self) -> &'static str;
}

/// Shared handle passed to the coordinator and the query router.
pub type SharedIndex = Arc<dyn SearchIndex>;

/// Deepest hit any backend will page to (Elasticsearch's default
/// `index.max_result_window`).
pub const MAX_RESULT_WINDOW: usize = 10_000;

/// Fit `size` into the result window starting at `offset`.
///
/// Returns the number of hits to request, which may be smaller than `size`.
/// An offset at or past the window is an error.
pub fn bounded_window(size: usize, offset: usize) -> IndexResult<usize> {
    if offset >= MAX_RESULT_WINDOW {
        return Err(IndexError::ResultWindow { offset });
    }
    Ok(size.min(MAX_RESULT_WINDOW - offset))
}

/// Stand-in used when the configured backend could not be opened. Every
/// call fails with [`IndexError::Unavailable`].
#[derive(Debug, Clone)]
pub struct UnavailableIndex {
    reason: String,
}

impl UnavailableIndex {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn fail<T>(&self) -> IndexResult<T> {
        Err(IndexError::Unavailable(self.reason.clone()))
    }
}

impl SearchIndex for UnavailableIndex {
    fn upsert(&self, _doc: &CameraDocument) -> IndexResult<()> {
        self.fail()
    }

    fn partial_update(&self, _camera_id: &str, _patch: &DocumentPatch) -> IndexResult<()> {
        self.fail()
    }

    fn delete(&self, _camera_id: &str) -> IndexResult<()> {
        self.fail()
    }

    fn search(&self, _query: &str, _size: usize, _offset: usize) -> IndexResult<Vec<String>> {
        self.fail()
    }

    fn backend(&self) -> &'static str {
        "unavailable"
    }
}

/// Field names searched by every backend.
pub const SEARCH_FIELDS: [&str; 4] = ["name", "description", "location", "camera_id"];
