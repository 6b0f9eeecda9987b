use camera_registry::app::Registry;
use camera_registry::model::types::{CameraDocument, DocumentPatch, NewUser, Principal, User};
use camera_registry::search::{IndexError, IndexResult, SearchIndex, SharedIndex};
use camera_registry::storage::CameraStore;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: Arc<Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Assert that the captured log output contains the provided substring.
    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// One call made against [`FakeIndex`].
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq)]
pub enum IndexCall {
    Upsert(CameraDocument),
    PartialUpdate(String, DocumentPatch),
    Delete(String),
    Search(String, usize, usize),
}

/// In-memory index that records every call and can be told to fail.
///
/// Search returns the scripted ids when set, otherwise every stored
/// document whose name, description, location or id contains the query.
#[allow(dead_code)]
#[derive(Default)]
pub struct FakeIndex {
    docs: Mutex<BTreeMap<String, CameraDocument>>,
    calls: Mutex<Vec<IndexCall>>,
    scripted_hits: Mutex<Option<Vec<String>>>,
    pub fail_upsert: AtomicBool,
    pub fail_partial_update: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_search: AtomicBool,
}

#[allow(dead_code)]
impl FakeIndex {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail_upsert.store(fail, Ordering::SeqCst);
        self.fail_partial_update.store(fail, Ordering::SeqCst);
        self.fail_delete.store(fail, Ordering::SeqCst);
        self.fail_search.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<IndexCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn doc(&self, camera_id: &str) -> Option<CameraDocument> {
        self.docs.lock().unwrap().get(camera_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.docs.lock().unwrap().len()
    }

    /// Force search results, e.g. ids that are stale in the store.
    pub fn script_hits(&self, ids: &[&str]) {
        *self.scripted_hits.lock().unwrap() = Some(ids.iter().map(|s| s.to_string()).collect());
    }

    /// Drop a document behind the coordinator's back.
    pub fn forget(&self, camera_id: &str) {
        self.docs.lock().unwrap().remove(camera_id);
    }

    fn record(&self, call: IndexCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn unavailable(flag: &AtomicBool) -> IndexResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(IndexError::Unavailable("fake index down".into()))
        } else {
            Ok(())
        }
    }
}

impl SearchIndex for FakeIndex {
    fn upsert(&self, doc: &CameraDocument) -> IndexResult<()> {
        self.record(IndexCall::Upsert(doc.clone()));
        Self::unavailable(&self.fail_upsert)?;
        self.docs
            .lock()
            .unwrap()
            .insert(doc.camera_id.clone(), doc.clone());
        Ok(())
    }

    fn partial_update(&self, camera_id: &str, patch: &DocumentPatch) -> IndexResult<()> {
        self.record(IndexCall::PartialUpdate(camera_id.to_string(), patch.clone()));
        Self::unavailable(&self.fail_partial_update)?;
        let mut docs = self.docs.lock().unwrap();
        let doc = docs
            .get_mut(camera_id)
            .ok_or_else(|| IndexError::DocumentMissing(camera_id.to_string()))?;
        patch.apply_to(doc);
        Ok(())
    }

    fn delete(&self, camera_id: &str) -> IndexResult<()> {
        self.record(IndexCall::Delete(camera_id.to_string()));
        Self::unavailable(&self.fail_delete)?;
        self.docs.lock().unwrap().remove(camera_id);
        Ok(())
    }

    fn search(&self, query: &str, size: usize, offset: usize) -> IndexResult<Vec<String>> {
        self.record(IndexCall::Search(query.to_string(), size, offset));
        Self::unavailable(&self.fail_search)?;
        if let Some(ids) = self.scripted_hits.lock().unwrap().clone() {
            return Ok(ids.into_iter().skip(offset).take(size).collect());
        }
        let needle = query.to_lowercase();
        let docs = self.docs.lock().unwrap();
        Ok(docs
            .values()
            .filter(|d| {
                [
                    Some(d.name.as_str()),
                    d.description.as_deref(),
                    d.location.as_deref(),
                    Some(d.camera_id.as_str()),
                ]
                .into_iter()
                .flatten()
                .any(|s| s.to_lowercase().contains(&needle))
            })
            .map(|d| d.camera_id.clone())
            .skip(offset)
            .take(size)
            .collect())
    }

    fn backend(&self) -> &'static str {
        "fake"
    }
}

/// Registry over a temp SQLite file and a [`FakeIndex`].
#[allow(dead_code)]
pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<CameraStore>,
    pub index: Arc<FakeIndex>,
    pub registry: Registry,
}

#[allow(dead_code)]
impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(CameraStore::open(&dir.path().join("cameras.db")).unwrap());
        let index = FakeIndex::new();
        let shared: SharedIndex = index.clone();
        let registry = Registry::from_parts(store.clone(), shared);
        Self {
            dir,
            store,
            index,
            registry,
        }
    }

    pub fn user(&self, username: &str) -> User {
        self.store
            .create_user(&NewUser::new(username, format!("{username}@example.com")))
            .unwrap()
    }

    pub fn superuser(&self, username: &str) -> User {
        self.store
            .create_user(&NewUser::new(username, format!("{username}@example.com")).superuser())
            .unwrap()
    }

    pub fn principal(&self, username: &str) -> Principal {
        self.user(username).principal()
    }
}
