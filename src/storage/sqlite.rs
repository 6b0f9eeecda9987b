//! `SQLite` backend: schema, migrations, and the camera/user CRUD.
//!
//! Every mutating call runs in its own transaction on a pooled connection.
//! A constraint violation rolls the transaction back (the `Transaction` is
//! dropped uncommitted) and surfaces as [`StoreError::Conflict`].

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::{debug, info};

use super::pool::{ConnectionPool, PoolConfig};
use super::{StoreError, StoreResult};
use crate::model::types::{Camera, CameraPatch, NewCamera, NewUser, User};

/// Public schema version constant for external checks.
pub const CURRENT_SCHEMA_VERSION: i64 = SCHEMA_VERSION;

const SCHEMA_VERSION: i64 = 2;

const MIGRATION_V1: &str = r"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    is_active INTEGER NOT NULL DEFAULT 1,
    is_superuser INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS cameras (
    id INTEGER PRIMARY KEY,
    camera_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    description TEXT,
    location TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    owner_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
";

const MIGRATION_V2: &str = r"
-- Owner-scoped listing is ordered newest first
CREATE INDEX IF NOT EXISTS idx_cameras_owner_created ON cameras(owner_id, created_at DESC, id DESC);
";

const CAMERA_COLUMNS: &str = "id, camera_id, name, description, location, is_active, is_deleted, owner_id, created_at, updated_at";

const USER_COLUMNS: &str = "id, username, email, is_active, is_superuser, created_at";

/// Result of [`CameraStore::apply_update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Record as it stands after the call.
    pub camera: Camera,
    /// False when the patch matched the stored values and nothing was written.
    pub changed: bool,
}

/// Authoritative store for cameras and their owners.
#[derive(Debug)]
pub struct CameraStore {
    pool: ConnectionPool,
}

impl CameraStore {
    /// Open (creating if needed) the database at `path` with default pool settings.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, PoolConfig::default())
    }

    pub fn open_with(path: &Path, config: PoolConfig) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating db directory {}", parent.display()))?;
        }

        let pool = ConnectionPool::new(path, config);
        {
            let mut conn = pool
                .get()
                .with_context(|| format!("opening sqlite db at {}", path.display()))?;
            init_meta(&conn)?;
            migrate(&mut conn)?;
        }
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn schema_version(&self) -> Result<i64> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT value FROM meta WHERE key='schema_version'",
            [],
            |row| row.get::<_, String>(0).map(|s| s.parse().unwrap_or(0)),
        )
        .optional()?
        .ok_or_else(|| anyhow!("schema_version missing"))
    }

    pub fn now_millis() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }

    // -------------------------------------------------------------------------
    // Users
    // -------------------------------------------------------------------------

    pub fn create_user(&self, user: &NewUser) -> StoreResult<User> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO users (username, email, is_active, is_superuser, created_at)
             VALUES (?1, ?2, 1, ?3, ?4)",
            params![
                user.username,
                user.email,
                user.is_superuser,
                Self::now_millis()
            ],
        )
        .map_err(|e| write_error(e, || format!("user '{}' already exists", user.username)))?;
        let created = tx.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            [tx.last_insert_rowid()],
            row_to_user,
        )?;
        tx.commit()?;
        info!(user_id = created.id, username = %created.username, "created user");
        Ok(created)
    }

    pub fn get_user(&self, id: i64) -> StoreResult<Option<User>> {
        let conn = self.pool.get()?;
        Ok(conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [id],
                row_to_user,
            )
            .optional()?)
    }

    pub fn get_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let conn = self.pool.get()?;
        Ok(conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                [username],
                row_to_user,
            )
            .optional()?)
    }

    // -------------------------------------------------------------------------
    // Cameras
    // -------------------------------------------------------------------------

    /// Insert a camera owned by `owner_id`. A duplicate `camera_id` (or an
    /// unknown owner) is a [`StoreError::Conflict`] and leaves no row behind.
    pub fn create(&self, camera: &NewCamera, owner_id: i64) -> StoreResult<Camera> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let now = Self::now_millis();
        tx.execute(
            "INSERT INTO cameras (camera_id, name, description, location, is_active, is_deleted, owner_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?7)",
            params![
                camera.camera_id,
                camera.name,
                camera.description,
                camera.location,
                camera.is_active,
                owner_id,
                now
            ],
        )
        .map_err(|e| write_error(e, || format!("camera_id '{}' already exists", camera.camera_id)))?;
        let created = tx.query_row(
            &format!("SELECT {CAMERA_COLUMNS} FROM cameras WHERE id = ?1"),
            [tx.last_insert_rowid()],
            row_to_camera,
        )?;
        tx.commit()?;
        Ok(created)
    }

    pub fn get_by_external_id(&self, camera_id: &str) -> StoreResult<Option<Camera>> {
        let conn = self.pool.get()?;
        Ok(select_camera(&conn, camera_id)?)
    }

    /// Owner's cameras, newest first, with `skip`/`limit` pagination.
    pub fn list_by_owner(
        &self,
        owner_id: i64,
        skip: usize,
        limit: usize,
        include_deleted: bool,
    ) -> StoreResult<Vec<Camera>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CAMERA_COLUMNS} FROM cameras
             WHERE owner_id = ?1 AND (?2 OR is_deleted = 0)
             ORDER BY created_at DESC, id DESC
             LIMIT ?3 OFFSET ?4"
        ))?;
        let rows = stmt.query_map(
            params![
                owner_id,
                include_deleted,
                i64::try_from(limit).unwrap_or(i64::MAX),
                i64::try_from(skip).unwrap_or(i64::MAX)
            ],
            row_to_camera,
        )?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Apply the fields present in `patch` to the stored row for `camera`.
    ///
    /// The patch is compared against the row read inside the transaction, so
    /// `changed` reflects what was actually stored. `updated_at` is only
    /// bumped when something changed.
    pub fn apply_update(&self, camera: &Camera, patch: &CameraPatch) -> StoreResult<UpdateOutcome> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut current = select_camera(&tx, &camera.camera_id)?
            .ok_or_else(|| StoreError::NotFound(format!("camera '{}'", camera.camera_id)))?;

        if !patch.apply_to(&mut current) {
            debug!(camera_id = %current.camera_id, "update patch is a no-op");
            return Ok(UpdateOutcome {
                camera: current,
                changed: false,
            });
        }

        current.updated_at = Self::now_millis();
        tx.execute(
            "UPDATE cameras SET name = ?1, description = ?2, location = ?3, is_active = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                current.name,
                current.description,
                current.location,
                current.is_active,
                current.updated_at,
                current.id
            ],
        )
        .map_err(|e| write_error(e, || format!("update of camera '{}' rejected", camera.camera_id)))?;
        tx.commit()?;
        Ok(UpdateOutcome {
            camera: current,
            changed: true,
        })
    }

    /// Tombstone the camera. Always writes, even if it is already deleted.
    pub fn soft_delete(&self, camera: &Camera) -> StoreResult<Camera> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let rows = tx.execute(
            "UPDATE cameras SET is_deleted = 1, is_active = 0, updated_at = ?1 WHERE camera_id = ?2",
            params![Self::now_millis(), camera.camera_id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("camera '{}'", camera.camera_id)));
        }
        let deleted = select_camera(&tx, &camera.camera_id)?
            .ok_or_else(|| StoreError::NotFound(format!("camera '{}'", camera.camera_id)))?;
        tx.commit()?;
        Ok(deleted)
    }

    /// Physically remove the row. Irreversible.
    pub fn hard_delete(&self, camera: &Camera) -> StoreResult<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let rows = tx.execute(
            "DELETE FROM cameras WHERE camera_id = ?1",
            [&camera.camera_id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("camera '{}'", camera.camera_id)));
        }
        tx.commit()?;
        Ok(())
    }
}

fn select_camera(conn: &Connection, camera_id: &str) -> rusqlite::Result<Option<Camera>> {
    conn.query_row(
        &format!("SELECT {CAMERA_COLUMNS} FROM cameras WHERE camera_id = ?1"),
        [camera_id],
        row_to_camera,
    )
    .optional()
}

fn row_to_camera(row: &rusqlite::Row<'_>) -> rusqlite::Result<Camera> {
    Ok(Camera {
        id: row.get(0)?,
        camera_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        location: row.get(4)?,
        is_active: row.get(5)?,
        is_deleted: row.get(6)?,
        owner_id: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        is_active: row.get(3)?,
        is_superuser: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Constraint violations become `Conflict`; everything else stays a database error.
fn write_error(err: rusqlite::Error, describe: impl FnOnce() -> String) -> StoreError {
    if let rusqlite::Error::SqliteFailure(code, detail) = &err
        && code.code == rusqlite::ErrorCode::ConstraintViolation
    {
        let detail = detail.as_deref().unwrap_or("constraint violation");
        return StoreError::Conflict(format!("{} ({detail})", describe()));
    }
    StoreError::Database(err)
}

fn init_meta(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;
    // Start at version 0 so migrate() applies the full schema on first open.
    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES('schema_version', '0')",
        [],
    )?;
    Ok(())
}

fn migrate(conn: &mut Connection) -> Result<()> {
    let current: i64 = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0).map(|s| s.parse().unwrap_or(0)),
        )
        .optional()?
        .unwrap_or(0);

    if current == SCHEMA_VERSION {
        return Ok(());
    }
    if current > SCHEMA_VERSION {
        return Err(anyhow!(
            "schema version {current} is newer than supported version {SCHEMA_VERSION}"
        ));
    }

    let tx = conn.transaction()?;
    if current < 1 {
        tx.execute_batch(MIGRATION_V1)?;
    }
    if current < 2 {
        tx.execute_batch(MIGRATION_V2)?;
    }
    tx.execute(
        "UPDATE meta SET value = ?1 WHERE key = 'schema_version'",
        [SCHEMA_VERSION.to_string()],
    )?;
    tx.commit()?;
    info!(from = current, to = SCHEMA_VERSION, "migrated camera schema");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (CameraStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = CameraStore::open(&dir.path().join("cameras.db")).unwrap();
        (store, dir)
    }

    #[test]
    fn schema_version_set_on_open() {
        let (store, _dir) = store();
        assert_eq!(store.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn reopen_keeps_data_and_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cameras.db");
        {
            let store = CameraStore::open(&path).unwrap();
            let owner = store.create_user(&NewUser::new("alice", "a@x")).unwrap();
            store.create(&NewCamera::new("cam-1", "Lobby"), owner.id).unwrap();
        }
        let store = CameraStore::open(&path).unwrap();
        assert_eq!(store.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
        assert!(store.get_by_external_id("cam-1").unwrap().is_some());
    }

    #[test]
    fn newer_schema_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cameras.db");
        {
            let store = CameraStore::open(&path).unwrap();
            let conn = store.pool().get().unwrap();
            conn.execute("UPDATE meta SET value = '99' WHERE key = 'schema_version'", [])
                .unwrap();
        }
        assert!(CameraStore::open(&path).is_err());
    }

    #[test]
    fn unknown_owner_is_a_conflict() {
        let (store, _dir) = store();
        let err = store.create(&NewCamera::new("cam-1", "Lobby"), 999).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.get_by_external_id("cam-1").unwrap().is_none());
    }

    #[test]
    fn duplicate_username_is_a_conflict() {
        let (store, _dir) = store();
        store.create_user(&NewUser::new("alice", "a@x")).unwrap();
        let err = store.create_user(&NewUser::new("alice", "b@x")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(
            store.get_user_by_username("alice").unwrap().unwrap().email,
            "a@x"
        );
    }

    #[test]
    fn update_of_vanished_row_is_not_found() {
        let (store, _dir) = store();
        let owner = store.create_user(&NewUser::new("alice", "a@x")).unwrap();
        let cam = store.create(&NewCamera::new("cam-1", "Lobby"), owner.id).unwrap();
        store.hard_delete(&cam).unwrap();
        let err = store
            .apply_update(&cam, &CameraPatch::default().name("Hall"))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(matches!(
            store.hard_delete(&cam).unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn connections_return_to_pool_after_errors() {
        let (store, _dir) = store();
        let owner = store.create_user(&NewUser::new("alice", "a@x")).unwrap();
        store.create(&NewCamera::new("cam-1", "Lobby"), owner.id).unwrap();
        for _ in 0..10 {
            let _ = store.create(&NewCamera::new("cam-1", "Lobby"), owner.id);
        }
        let open = store.pool().open_count();
        assert!(open <= store.pool().config().max_size);
        assert_eq!(store.pool().idle_count(), open);
    }

    #[test]
    fn now_millis_returns_reasonable_value() {
        let ts = CameraStore::now_millis();
        assert!(ts > 1_577_836_800_000);
        assert!(ts < 4_102_444_800_000);
    }
}
