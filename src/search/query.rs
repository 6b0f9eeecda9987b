//! Read path: direct owner listing, or index search re-validated against
//! the primary store.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::SharedIndex;
use crate::error::{CameraError, CameraResult};
use crate::model::types::{Camera, ListParams, Principal};
use crate::storage::CameraStore;

/// How a listing was resolved. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    SearchThenVerify,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::SearchThenVerify => "search_then_verify",
        }
    }
}

pub struct QueryRouter {
    store: Arc<CameraStore>,
    index: SharedIndex,
}

impl QueryRouter {
    pub fn new(store: Arc<CameraStore>, index: SharedIndex) -> Self {
        Self { store, index }
    }

    pub fn strategy(params: &ListParams) -> Strategy {
        if params.query_text().is_some() {
            Strategy::SearchThenVerify
        } else {
            Strategy::Direct
        }
    }

    /// List the principal's cameras, optionally filtered by free text.
    ///
    /// With query text the order is the index's relevance order and the
    /// result may be shorter than `limit`: candidates that no longer exist,
    /// are tombstoned, or belong to someone else are dropped. An unavailable
    /// index yields an empty list, not an error.
    pub fn list(&self, principal: &Principal, params: &ListParams) -> CameraResult<Vec<Camera>> {
        let strategy = Self::strategy(params);
        info!(
            strategy = strategy.as_str(),
            owner_id = principal.user_id,
            skip = params.skip,
            limit = params.limit,
            "list_start"
        );
        match params.query_text() {
            None => Ok(self.store.list_by_owner(
                principal.user_id,
                params.skip,
                params.limit,
                params.include_deleted,
            )?),
            Some(q) => self.search_then_verify(principal, q, params.skip, params.limit),
        }
    }

    fn search_then_verify(
        &self,
        principal: &Principal,
        query: &str,
        skip: usize,
        limit: usize,
    ) -> CameraResult<Vec<Camera>> {
        let candidates = match self.index.search(query, limit, skip) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(
                    backend = self.index.backend(),
                    query,
                    error = %e,
                    "index search failed; returning no results"
                );
                return Ok(Vec::new());
            }
        };

        let mut out = Vec::with_capacity(candidates.len());
        for camera_id in &candidates {
            match self.store.get_by_external_id(camera_id)? {
                Some(camera) if !camera.is_deleted && camera.is_owned_by(principal) => {
                    out.push(camera);
                }
                Some(_) => debug!(camera_id = %camera_id, "dropping deleted or foreign search hit"),
                None => debug!(camera_id = %camera_id, "dropping search hit missing from store"),
            }
        }
        debug!(
            candidates = candidates.len(),
            returned = out.len(),
            "search_then_verify done"
        );
        Ok(out)
    }

    /// Fetch one camera visible to the principal. Missing, tombstoned and
    /// foreign-owned records all read as not found.
    pub fn get(&self, principal: &Principal, camera_id: &str) -> CameraResult<Camera> {
        match self.store.get_by_external_id(camera_id)? {
            Some(camera) if !camera.is_deleted && camera.is_owned_by(principal) => Ok(camera),
            _ => Err(CameraError::NotFound(format!("camera '{camera_id}'"))),
        }
    }
}
