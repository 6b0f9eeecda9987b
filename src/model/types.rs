//! Camera, user, and index-document structs.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CameraError;

pub const MAX_CAMERA_ID_LEN: usize = 100;
pub const MAX_NAME_LEN: usize = 255;
pub const MAX_LOCATION_LEN: usize = 255;
pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 150;

/// Authoritative camera row as stored in the primary store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Camera {
    /// Internal row id; never used as identity outside the store.
    pub id: i64,
    /// External identity, also the search document id.
    pub camera_id: String,
    pub name: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub is_active: bool,
    /// Tombstone flag. Only ever moves from false to true.
    pub is_deleted: bool,
    pub owner_id: i64,
    /// Unix millis.
    pub created_at: i64,
    /// Unix millis, bumped on every write that changed something.
    pub updated_at: i64,
}

impl Camera {
    pub fn is_owned_by(&self, principal: &Principal) -> bool {
        self.owner_id == principal.user_id
    }

    /// Full search document mirroring this record.
    pub fn to_document(&self) -> CameraDocument {
        CameraDocument {
            camera_id: self.camera_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            location: self.location.clone(),
            owner_id: self.owner_id,
            is_active: self.is_active,
            is_deleted: self.is_deleted,
            created_at: millis_to_rfc3339(self.created_at),
            updated_at: millis_to_rfc3339(self.updated_at),
        }
    }

    /// Mutable attributes only, as sent after an update.
    pub fn to_update_patch(&self) -> DocumentPatch {
        DocumentPatch {
            name: Some(self.name.clone()),
            description: Some(self.description.clone()),
            location: Some(self.location.clone()),
            is_active: Some(self.is_active),
            is_deleted: Some(self.is_deleted),
            updated_at: Some(millis_to_rfc3339(self.updated_at)),
        }
    }

    /// Deletion flags only, as sent after a soft delete.
    pub fn to_tombstone_patch(&self) -> DocumentPatch {
        DocumentPatch {
            is_active: Some(false),
            is_deleted: Some(true),
            updated_at: Some(millis_to_rfc3339(self.updated_at)),
            ..DocumentPatch::default()
        }
    }
}

/// Payload for creating a camera. The owner comes from the caller's principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCamera {
    pub camera_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl NewCamera {
    pub fn new(camera_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            camera_id: camera_id.into(),
            name: name.into(),
            description: None,
            location: None,
            is_active: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn validate(&self) -> Result<(), CameraError> {
        check_len("camera_id", &self.camera_id, 1, MAX_CAMERA_ID_LEN)?;
        check_len("name", &self.name, 1, MAX_NAME_LEN)?;
        if let Some(location) = &self.location {
            check_len("location", location, 0, MAX_LOCATION_LEN)?;
        }
        Ok(())
    }
}

/// Per-field intent of a partial update.
///
/// Absent and `null` both deserialize to `Keep`; clearing a nullable field
/// has to be requested with `Clear` explicitly. Decode-only: JSON has no
/// spelling for `Clear` that is distinct from `Keep`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldUpdate<T> {
    #[default]
    Keep,
    Set(T),
    Clear,
}

impl<T> FieldUpdate<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, FieldUpdate::Keep)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for FieldUpdate<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<T>::deserialize(deserializer)? {
            Some(value) => FieldUpdate::Set(value),
            None => FieldUpdate::Keep,
        })
    }
}

impl<T> From<Option<T>> for FieldUpdate<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldUpdate::Keep, FieldUpdate::Set)
    }
}

/// Partial update of a camera's mutable attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CameraPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: FieldUpdate<String>,
    #[serde(default)]
    pub location: FieldUpdate<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl CameraPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_keep()
            && self.location.is_keep()
            && self.is_active.is_none()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = FieldUpdate::Set(description.into());
        self
    }

    pub fn clear_description(mut self) -> Self {
        self.description = FieldUpdate::Clear;
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = FieldUpdate::Set(location.into());
        self
    }

    pub fn clear_location(mut self) -> Self {
        self.location = FieldUpdate::Clear;
        self
    }

    pub fn active(mut self, is_active: bool) -> Self {
        self.is_active = Some(is_active);
        self
    }

    pub fn validate(&self) -> Result<(), CameraError> {
        if let Some(name) = &self.name {
            check_len("name", name, 1, MAX_NAME_LEN)?;
        }
        if let FieldUpdate::Set(location) = &self.location {
            check_len("location", location, 0, MAX_LOCATION_LEN)?;
        }
        Ok(())
    }

    /// Apply to `camera` in place, returning whether any value changed.
    /// Does not touch `updated_at`.
    pub fn apply_to(&self, camera: &mut Camera) -> bool {
        let mut changed = false;
        if let Some(name) = &self.name
            && *name != camera.name
        {
            camera.name = name.clone();
            changed = true;
        }
        changed |= apply_nullable(&self.description, &mut camera.description);
        changed |= apply_nullable(&self.location, &mut camera.location);
        if let Some(active) = self.is_active
            && active != camera.is_active
        {
            camera.is_active = active;
            changed = true;
        }
        changed
    }
}

fn apply_nullable(update: &FieldUpdate<String>, slot: &mut Option<String>) -> bool {
    let next = match update {
        FieldUpdate::Keep => return false,
        FieldUpdate::Set(value) => Some(value.clone()),
        FieldUpdate::Clear => None,
    };
    if *slot == next {
        return false;
    }
    *slot = next;
    true
}

/// Search index mirror of a camera, keyed by `camera_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDocument {
    pub camera_id: String,
    pub name: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub owner_id: i64,
    pub is_active: bool,
    pub is_deleted: bool,
    /// RFC 3339.
    pub created_at: String,
    /// RFC 3339.
    pub updated_at: String,
}

/// Partial document update. `None` fields are omitted from the request;
/// `Some(None)` on a nullable field serializes as an explicit `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_deleted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl DocumentPatch {
    /// Merge into an existing document.
    pub fn apply_to(&self, doc: &mut CameraDocument) {
        if let Some(name) = &self.name {
            doc.name = name.clone();
        }
        if let Some(description) = &self.description {
            doc.description = description.clone();
        }
        if let Some(location) = &self.location {
            doc.location = location.clone();
        }
        if let Some(active) = self.is_active {
            doc.is_active = active;
        }
        if let Some(deleted) = self.is_deleted {
            doc.is_deleted = deleted;
        }
        if let Some(updated_at) = &self.updated_at {
            doc.updated_at = updated_at.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub created_at: i64,
}

impl User {
    pub fn principal(&self) -> Principal {
        Principal {
            user_id: self.id,
            is_superuser: self.is_superuser,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub is_superuser: bool,
}

impl NewUser {
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            is_superuser: false,
        }
    }

    pub fn superuser(mut self) -> Self {
        self.is_superuser = true;
        self
    }

    pub fn validate(&self) -> Result<(), CameraError> {
        check_len("username", &self.username, MIN_USERNAME_LEN, MAX_USERNAME_LEN)?;
        if !self.email.contains('@') {
            return Err(CameraError::Invalid(format!(
                "email '{}' is not an address",
                self.email
            )));
        }
        Ok(())
    }
}

/// Authenticated caller identity supplied by the request layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: i64,
    pub is_superuser: bool,
}

impl Principal {
    pub fn user(user_id: i64) -> Self {
        Self {
            user_id,
            is_superuser: false,
        }
    }

    pub fn superuser(user_id: i64) -> Self {
        Self {
            user_id,
            is_superuser: true,
        }
    }
}

/// Read request parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListParams {
    pub q: Option<String>,
    pub skip: usize,
    pub limit: usize,
    pub include_deleted: bool,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            q: None,
            skip: 0,
            limit: 20,
            include_deleted: false,
        }
    }
}

impl ListParams {
    pub fn page(skip: usize, limit: usize) -> Self {
        Self {
            skip,
            limit,
            ..Self::default()
        }
    }

    pub fn search(q: impl Into<String>) -> Self {
        Self {
            q: Some(q.into()),
            ..Self::default()
        }
    }

    /// Query text, if any non-blank text was given.
    pub fn query_text(&self) -> Option<&str> {
        self.q.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }
}

fn check_len(field: &str, value: &str, min: usize, max: usize) -> Result<(), CameraError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(CameraError::Invalid(format!(
            "{field} must be between {min} and {max} characters (got {len})"
        )));
    }
    Ok(())
}

pub fn millis_to_rfc3339(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .unwrap_or_default()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
