mod util;

use camera_registry::error::CameraError;
use camera_registry::model::types::{CameraPatch, ListParams, NewCamera, Principal};
use std::sync::atomic::Ordering;
use util::{Harness, IndexCall, TestTracing};

fn lobby() -> NewCamera {
    NewCamera::new("cam-lobby", "Lobby")
        .with_description("main entrance")
        .with_location("building A")
}

#[test]
fn create_mirrors_document_into_index() {
    let h = Harness::new();
    let alice = h.principal("alice");

    let camera = h.registry.coordinator.create(&alice, &lobby()).unwrap();

    assert_eq!(camera.owner_id, alice.user_id);
    assert!(camera.is_active);
    assert!(!camera.is_deleted);
    assert_eq!(h.index.calls(), vec![IndexCall::Upsert(camera.to_document())]);
    assert_eq!(h.index.doc("cam-lobby").unwrap().name, "Lobby");
}

#[test]
fn create_succeeds_when_index_is_down() {
    let h = Harness::new();
    let alice = h.principal("alice");
    h.index.fail_all(true);
    let tracing = TestTracing::new();
    let _guard = tracing.install();

    let camera = h.registry.coordinator.create(&alice, &lobby()).unwrap();

    let stored = h.store.get_by_external_id("cam-lobby").unwrap().unwrap();
    assert_eq!(stored, camera);
    assert_eq!(h.index.len(), 0);
    tracing.assert_contains("index propagation failed");
}

#[test]
fn duplicate_camera_id_is_conflict_without_index_call() {
    let h = Harness::new();
    let alice = h.principal("alice");
    let bob = h.principal("bob");
    let first = h.registry.coordinator.create(&alice, &lobby()).unwrap();
    h.index.clear_calls();

    let err = h
        .registry
        .coordinator
        .create(&bob, &NewCamera::new("cam-lobby", "Other"))
        .unwrap_err();

    assert!(matches!(err, CameraError::Conflict(_)), "{err:?}");
    assert!(h.index.calls().is_empty());
    let stored = h.store.get_by_external_id("cam-lobby").unwrap().unwrap();
    assert_eq!(stored, first);
    assert!(h.store.list_by_owner(bob.user_id, 0, 10, true).unwrap().is_empty());
}

#[test]
fn invalid_payload_never_reaches_store() {
    let h = Harness::new();
    let alice = h.principal("alice");

    let err = h
        .registry
        .coordinator
        .create(&alice, &NewCamera::new("", "Nameless"))
        .unwrap_err();
    assert!(matches!(err, CameraError::Invalid(_)));

    let err = h
        .registry
        .coordinator
        .create(&alice, &NewCamera::new("cam-x", "n".repeat(256)))
        .unwrap_err();
    assert!(matches!(err, CameraError::Invalid(_)));
    assert!(h.index.calls().is_empty());
    assert!(h.store.list_by_owner(alice.user_id, 0, 10, true).unwrap().is_empty());
}

#[test]
fn empty_patch_is_a_noop() {
    let h = Harness::new();
    let alice = h.principal("alice");
    let created = h.registry.coordinator.create(&alice, &lobby()).unwrap();
    h.index.clear_calls();

    let same = h
        .registry
        .coordinator
        .update(&alice, "cam-lobby", &CameraPatch::default())
        .unwrap();
    assert_eq!(same, created);

    // Setting a field to its current value is also a no-op.
    let same = h
        .registry
        .coordinator
        .update(&alice, "cam-lobby", &CameraPatch::default().name("Lobby"))
        .unwrap();
    assert_eq!(same.updated_at, created.updated_at);
    assert!(h.index.calls().is_empty());
}

#[test]
fn update_patches_index_document() {
    let h = Harness::new();
    let alice = h.principal("alice");
    h.registry.coordinator.create(&alice, &lobby()).unwrap();
    h.index.clear_calls();

    let updated = h
        .registry
        .coordinator
        .update(
            &alice,
            "cam-lobby",
            &CameraPatch::default().name("Front lobby").clear_location(),
        )
        .unwrap();

    assert_eq!(updated.name, "Front lobby");
    assert_eq!(updated.location, None);
    assert_eq!(updated.description.as_deref(), Some("main entrance"));
    let calls = h.index.calls();
    assert_eq!(calls.len(), 1);
    assert!(matches!(&calls[0], IndexCall::PartialUpdate(id, _) if id == "cam-lobby"));
    let doc = h.index.doc("cam-lobby").unwrap();
    assert_eq!(doc.name, "Front lobby");
    assert_eq!(doc.location, None);
}

#[test]
fn missing_index_document_is_repaired_by_upsert() {
    let h = Harness::new();
    let alice = h.principal("alice");
    h.index.fail_upsert.store(true, Ordering::SeqCst);
    h.registry.coordinator.create(&alice, &lobby()).unwrap();
    h.index.fail_upsert.store(false, Ordering::SeqCst);
    assert!(h.index.doc("cam-lobby").is_none());
    h.index.clear_calls();

    let updated = h
        .registry
        .coordinator
        .update(&alice, "cam-lobby", &CameraPatch::default().active(false))
        .unwrap();

    let calls = h.index.calls();
    assert_eq!(calls.len(), 2);
    assert!(matches!(calls[0], IndexCall::PartialUpdate(..)));
    assert_eq!(calls[1], IndexCall::Upsert(updated.to_document()));
    assert!(!h.index.doc("cam-lobby").unwrap().is_active);
}

#[test]
fn update_succeeds_when_patch_and_fallback_fail() {
    let h = Harness::new();
    let alice = h.principal("alice");
    let created = h.registry.coordinator.create(&alice, &lobby()).unwrap();
    h.index.fail_all(true);

    let updated = h
        .registry
        .coordinator
        .update(&alice, "cam-lobby", &CameraPatch::default().description("side door"))
        .unwrap();

    assert_eq!(updated.description.as_deref(), Some("side door"));
    assert!(updated.updated_at >= created.updated_at);
    let stored = h.store.get_by_external_id("cam-lobby").unwrap().unwrap();
    assert_eq!(stored, updated);
    // Index still holds the pre-update document.
    assert_eq!(
        h.index.doc("cam-lobby").unwrap().description.as_deref(),
        Some("main entrance")
    );
}

#[test]
fn soft_delete_tombstones_and_patches_flags() {
    let h = Harness::new();
    let alice = h.principal("alice");
    h.registry.coordinator.create(&alice, &lobby()).unwrap();
    h.index.clear_calls();

    let deleted = h.registry.coordinator.soft_delete(&alice, "cam-lobby").unwrap();

    assert!(deleted.is_deleted);
    assert!(!deleted.is_active);
    assert!(h.store.list_by_owner(alice.user_id, 0, 10, false).unwrap().is_empty());
    let all = h.store.list_by_owner(alice.user_id, 0, 10, true).unwrap();
    assert_eq!(all.len(), 1);
    assert!(!all[0].is_active);

    match &h.index.calls()[..] {
        [IndexCall::PartialUpdate(id, patch)] => {
            assert_eq!(id, "cam-lobby");
            assert_eq!(patch, &deleted.to_tombstone_patch());
        }
        other => panic!("unexpected calls {other:?}"),
    }
    let doc = h.index.doc("cam-lobby").unwrap();
    assert!(doc.is_deleted);
    assert!(!doc.is_active);
}

#[test]
fn soft_delete_survives_index_failure() {
    let h = Harness::new();
    let alice = h.principal("alice");
    h.registry.coordinator.create(&alice, &lobby()).unwrap();
    h.index.fail_all(true);

    h.registry.coordinator.soft_delete(&alice, "cam-lobby").unwrap();

    assert!(h.store.get_by_external_id("cam-lobby").unwrap().unwrap().is_deleted);
    assert!(!h.index.doc("cam-lobby").unwrap().is_deleted);
}

#[test]
fn hard_delete_removes_row_and_document() {
    let h = Harness::new();
    let alice = h.principal("alice");
    h.registry.coordinator.create(&alice, &lobby()).unwrap();

    h.registry.coordinator.hard_delete(&alice, "cam-lobby").unwrap();

    assert!(h.store.get_by_external_id("cam-lobby").unwrap().is_none());
    assert!(h.index.doc("cam-lobby").is_none());
    let err = h
        .registry
        .coordinator
        .hard_delete(&alice, "cam-lobby")
        .unwrap_err();
    assert!(matches!(err, CameraError::NotFound(_)));
}

#[test]
fn hard_delete_succeeds_when_index_is_down() {
    let h = Harness::new();
    let alice = h.principal("alice");
    h.registry.coordinator.create(&alice, &lobby()).unwrap();
    h.index.fail_delete.store(true, Ordering::SeqCst);

    h.registry.coordinator.hard_delete(&alice, "cam-lobby").unwrap();

    assert!(h.store.get_by_external_id("cam-lobby").unwrap().is_none());
    // The stale document stays until a later delete reaches the index.
    assert!(h.index.doc("cam-lobby").is_some());
}

#[test]
fn non_owner_is_forbidden_and_superuser_may_purge() {
    let h = Harness::new();
    let alice = h.principal("alice");
    let bob = h.principal("bob");
    let root = h.superuser("root").principal();
    h.registry.coordinator.create(&alice, &lobby()).unwrap();

    let patch = CameraPatch::default().name("Hijacked");
    assert!(matches!(
        h.registry.coordinator.update(&bob, "cam-lobby", &patch),
        Err(CameraError::Forbidden(_))
    ));
    assert!(matches!(
        h.registry.coordinator.soft_delete(&bob, "cam-lobby"),
        Err(CameraError::Forbidden(_))
    ));
    assert!(matches!(
        h.registry.coordinator.hard_delete(&bob, "cam-lobby"),
        Err(CameraError::Forbidden(_))
    ));
    assert!(matches!(
        h.registry.coordinator.update(&bob, "cam-ghost", &patch),
        Err(CameraError::NotFound(_))
    ));
    assert_eq!(
        h.store.get_by_external_id("cam-lobby").unwrap().unwrap().name,
        "Lobby"
    );

    h.registry.coordinator.hard_delete(&root, "cam-lobby").unwrap();
    assert!(h.store.get_by_external_id("cam-lobby").unwrap().is_none());
}

#[test]
fn principal_without_user_row_cannot_create() {
    let h = Harness::new();
    let err = h
        .registry
        .coordinator
        .create(&Principal::user(999), &lobby())
        .unwrap_err();
    assert!(matches!(err, CameraError::Conflict(_)), "{err:?}");
    assert!(h.index.calls().is_empty());
}

#[test]
fn full_lifecycle_keeps_router_in_step() {
    let h = Harness::new();
    let alice = h.principal("alice");
    h.registry.coordinator.create(&alice, &lobby()).unwrap();

    let found = h
        .registry
        .router
        .list(&alice, &ListParams::search("entrance"))
        .unwrap();
    assert_eq!(found.len(), 1);

    h.registry.coordinator.soft_delete(&alice, "cam-lobby").unwrap();
    let found = h
        .registry
        .router
        .list(&alice, &ListParams::search("entrance"))
        .unwrap();
    assert!(found.is_empty());
}
