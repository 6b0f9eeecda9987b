//! Domain types shared by the store, the search index, and the coordinator.

pub mod types;

pub use types::{
    Camera, CameraDocument, CameraPatch, DocumentPatch, FieldUpdate, ListParams, NewCamera,
    NewUser, Principal, User,
};
