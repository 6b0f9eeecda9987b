//! Write path: commit to the primary store, then mirror into the search index.
//!
//! The primary store decides the outcome of every operation. Index
//! propagation runs strictly after the commit and its result is logged and
//! dropped; it can neither fail the caller nor undo the committed change.
//! There is no background reconciliation, so a missed propagation stays
//! missing until the next successful write to the same camera (an update
//! falls back to a full upsert when the partial update finds no document).

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{CameraError, CameraResult};
use crate::model::types::{Camera, CameraDocument, CameraPatch, DocumentPatch, NewCamera, Principal};
use crate::search::{IndexError, SharedIndex};
use crate::storage::{CameraStore, UpdateOutcome};

/// A committed primary-store change.
#[derive(Debug, Clone, Copy)]
pub enum PrimaryChange<'a> {
    Created(&'a Camera),
    Updated(&'a UpdateOutcome),
    SoftDeleted(&'a Camera),
    HardDeleted(&'a Camera),
}

impl PrimaryChange<'_> {
    pub fn op(&self) -> &'static str {
        match self {
            PrimaryChange::Created(_) => "create",
            PrimaryChange::Updated(_) => "update",
            PrimaryChange::SoftDeleted(_) => "soft_delete",
            PrimaryChange::HardDeleted(_) => "hard_delete",
        }
    }

    pub fn camera_id(&self) -> &str {
        match self {
            PrimaryChange::Created(c)
            | PrimaryChange::SoftDeleted(c)
            | PrimaryChange::HardDeleted(c) => &c.camera_id,
            PrimaryChange::Updated(o) => &o.camera.camera_id,
        }
    }
}

/// Index calls to attempt for a committed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropagationPlan {
    /// Nothing changed; the index is left alone.
    Skip,
    Upsert(CameraDocument),
    /// Partial update, falling back to a full upsert if it fails.
    PatchOrUpsert {
        patch: DocumentPatch,
        fallback: CameraDocument,
    },
    Patch(DocumentPatch),
    Delete,
}

impl PropagationPlan {
    /// Pure mapping from a committed change to the index work it implies.
    pub fn for_change(change: &PrimaryChange<'_>) -> Self {
        match change {
            PrimaryChange::Created(camera) => PropagationPlan::Upsert(camera.to_document()),
            PrimaryChange::Updated(outcome) if !outcome.changed => PropagationPlan::Skip,
            PrimaryChange::Updated(outcome) => PropagationPlan::PatchOrUpsert {
                patch: outcome.camera.to_update_patch(),
                fallback: outcome.camera.to_document(),
            },
            PrimaryChange::SoftDeleted(camera) => {
                PropagationPlan::Patch(camera.to_tombstone_patch())
            }
            PrimaryChange::HardDeleted(_) => PropagationPlan::Delete,
        }
    }
}

/// What happened to the index. Logged, never returned to callers.
#[derive(Debug)]
pub enum Propagation {
    Applied,
    /// The partial update failed and the full upsert fallback succeeded.
    Repaired { first: IndexError },
    Skipped,
    Failed(IndexError),
    /// Both the partial update and the fallback upsert failed.
    FallbackFailed { first: IndexError, fallback: IndexError },
}

impl Propagation {
    pub fn succeeded(&self) -> bool {
        matches!(
            self,
            Propagation::Applied | Propagation::Repaired { .. } | Propagation::Skipped
        )
    }
}

pub struct Coordinator {
    store: Arc<CameraStore>,
    index: SharedIndex,
}

impl Coordinator {
    pub fn new(store: Arc<CameraStore>, index: SharedIndex) -> Self {
        Self { store, index }
    }

    pub fn store(&self) -> &Arc<CameraStore> {
        &self.store
    }

    pub fn index(&self) -> &SharedIndex {
        &self.index
    }

    /// Create a camera owned by the principal. Fails only on validation or
    /// primary-store errors; the index upsert is best-effort.
    pub fn create(&self, principal: &Principal, new: &NewCamera) -> CameraResult<Camera> {
        new.validate()?;
        let camera = self.store.create(new, principal.user_id)?;
        info!(
            camera_id = %camera.camera_id,
            owner_id = camera.owner_id,
            "camera created"
        );
        self.propagate(PrimaryChange::Created(&camera));
        Ok(camera)
    }

    /// Partially update an owned camera. A patch that changes nothing
    /// returns the stored record and leaves the index untouched.
    pub fn update(
        &self,
        principal: &Principal,
        camera_id: &str,
        patch: &CameraPatch,
    ) -> CameraResult<Camera> {
        patch.validate()?;
        let camera = self.owned(principal, camera_id)?;
        let outcome = self.store.apply_update(&camera, patch)?;
        if outcome.changed {
            info!(camera_id, "camera updated");
        }
        self.propagate(PrimaryChange::Updated(&outcome));
        Ok(outcome.camera)
    }

    /// Tombstone an owned camera. Always writes, even when already deleted.
    pub fn soft_delete(&self, principal: &Principal, camera_id: &str) -> CameraResult<Camera> {
        let camera = self.owned(principal, camera_id)?;
        let deleted = self.store.soft_delete(&camera)?;
        info!(camera_id, "camera soft-deleted");
        self.propagate(PrimaryChange::SoftDeleted(&deleted));
        Ok(deleted)
    }

    /// Remove a camera for good. Allowed for the owner or a superuser.
    pub fn hard_delete(&self, principal: &Principal, camera_id: &str) -> CameraResult<()> {
        let camera = self.existing(camera_id)?;
        let owned = camera.is_owned_by(principal);
        if !owned && !principal.is_superuser {
            return Err(CameraError::Forbidden(format!(
                "user {} may not delete camera '{camera_id}'",
                principal.user_id
            )));
        }
        self.store.hard_delete(&camera)?;
        info!(camera_id, by_superuser = !owned, "camera hard-deleted");
        self.propagate(PrimaryChange::HardDeleted(&camera));
        Ok(())
    }

    fn existing(&self, camera_id: &str) -> CameraResult<Camera> {
        self.store
            .get_by_external_id(camera_id)?
            .ok_or_else(|| CameraError::NotFound(format!("camera '{camera_id}'")))
    }

    fn owned(&self, principal: &Principal, camera_id: &str) -> CameraResult<Camera> {
        let camera = self.existing(camera_id)?;
        if !camera.is_owned_by(principal) {
            return Err(CameraError::Forbidden(format!(
                "camera '{camera_id}' belongs to another user"
            )));
        }
        Ok(camera)
    }

    /// Run the index side of a committed change and log the outcome.
    fn propagate(&self, change: PrimaryChange<'_>) {
        let plan = PropagationPlan::for_change(&change);
        let outcome = self.execute(change.camera_id(), plan);
        log_propagation(&change, self.index.backend(), &outcome);
    }

    fn execute(&self, camera_id: &str, plan: PropagationPlan) -> Propagation {
        let applied = |r: Result<(), IndexError>| match r {
            Ok(()) => Propagation::Applied,
            Err(e) => Propagation::Failed(e),
        };
        match plan {
            PropagationPlan::Skip => Propagation::Skipped,
            PropagationPlan::Upsert(doc) => applied(self.index.upsert(&doc)),
            PropagationPlan::Patch(patch) => applied(self.index.partial_update(camera_id, &patch)),
            PropagationPlan::Delete => applied(self.index.delete(camera_id)),
            PropagationPlan::PatchOrUpsert { patch, fallback } => {
                match self.index.partial_update(camera_id, &patch) {
                    Ok(()) => Propagation::Applied,
                    Err(first) => {
                        debug!(camera_id, error = %first, "partial update failed; upserting full document");
                        match self.index.upsert(&fallback) {
                            Ok(()) => Propagation::Repaired { first },
                            Err(fallback) => Propagation::FallbackFailed { first, fallback },
                        }
                    }
                }
            }
        }
    }
}

fn log_propagation(change: &PrimaryChange<'_>, backend: &str, outcome: &Propagation) {
    let op = change.op();
    let camera_id = change.camera_id();
    match outcome {
        Propagation::Applied => debug!(op, camera_id, backend, "index propagation applied"),
        Propagation::Skipped => debug!(op, camera_id, backend, "index propagation skipped"),
        Propagation::Repaired { first } => info!(
            op,
            camera_id,
            backend,
            error = %first,
            "index document repaired by full upsert"
        ),
        Propagation::Failed(e) => warn!(
            op,
            camera_id,
            backend,
            error = %e,
            "index propagation failed; primary change kept"
        ),
        Propagation::FallbackFailed { first, fallback } => warn!(
            op,
            camera_id,
            backend,
            error = %first,
            fallback_error = %fallback,
            "index propagation failed; primary change kept"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Camera {
        Camera {
            id: 1,
            camera_id: "cam-1".into(),
            name: "Lobby".into(),
            description: None,
            location: Some("north".into()),
            is_active: true,
            is_deleted: false,
            owner_id: 1,
            created_at: 1_700_000_000_000,
            updated_at: 1_700_000_000_500,
        }
    }

    #[test]
    fn create_plans_full_upsert() {
        let cam = camera();
        assert_eq!(
            PropagationPlan::for_change(&PrimaryChange::Created(&cam)),
            PropagationPlan::Upsert(cam.to_document())
        );
    }

    #[test]
    fn unchanged_update_plans_nothing() {
        let outcome = UpdateOutcome {
            camera: camera(),
            changed: false,
        };
        assert_eq!(
            PropagationPlan::for_change(&PrimaryChange::Updated(&outcome)),
            PropagationPlan::Skip
        );
    }

    #[test]
    fn changed_update_plans_patch_with_upsert_fallback() {
        let outcome = UpdateOutcome {
            camera: camera(),
            changed: true,
        };
        match PropagationPlan::for_change(&PrimaryChange::Updated(&outcome)) {
            PropagationPlan::PatchOrUpsert { patch, fallback } => {
                assert_eq!(patch.name.as_deref(), Some("Lobby"));
                assert_eq!(fallback, outcome.camera.to_document());
            }
            other => panic!("unexpected plan {other:?}"),
        }
    }

    #[test]
    fn deletes_plan_flags_or_removal() {
        let mut cam = camera();
        cam.is_deleted = true;
        cam.is_active = false;
        assert_eq!(
            PropagationPlan::for_change(&PrimaryChange::SoftDeleted(&cam)),
            PropagationPlan::Patch(cam.to_tombstone_patch())
        );
        assert_eq!(
            PropagationPlan::for_change(&PrimaryChange::HardDeleted(&cam)),
            PropagationPlan::Delete
        );
    }

    #[test]
    fn propagation_success_classification() {
        assert!(Propagation::Applied.succeeded());
        assert!(Propagation::Skipped.succeeded());
        assert!(
            Propagation::Repaired {
                first: IndexError::DocumentMissing("x".into())
            }
            .succeeded()
        );
        assert!(!Propagation::Failed(IndexError::Unavailable("down".into())).succeeded());
    }
}
