//! Embedded Tantivy backend for the camera search index.
//!
//! One document per `camera_id`; `camera_id` is indexed as a raw token so a
//! write can replace the previous document by term. Every write commits and
//! reloads the reader, which keeps the index consistent with what the
//! coordinator believes it wrote at the cost of write throughput.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tantivy::collector::TopDocs;
use tantivy::query::{QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, STORED, STRING, Schema, TEXT, Value};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use tracing::{debug, warn};

use super::{IndexError, IndexResult, SearchIndex, bounded_window};
use crate::model::types::{CameraDocument, DocumentPatch};

const SCHEMA_VERSION: &str = "v1";

const WRITER_HEAP_BYTES: usize = 50_000_000;

#[derive(Clone, Copy)]
pub struct Fields {
    pub camera_id: Field,
    pub name: Field,
    pub description: Field,
    pub location: Field,
    pub owner_id: Field,
    pub is_active: Field,
    pub is_deleted: Field,
    pub created_at: Field,
    pub updated_at: Field,
}

pub struct TantivyIndex {
    index: Index,
    writer: Mutex<IndexWriter>,
    reader: IndexReader,
    fields: Fields,
}

impl std::fmt::Debug for TantivyIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TantivyIndex").finish_non_exhaustive()
    }
}

impl TantivyIndex {
    pub fn open_or_create(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("creating index directory {}", path.display()))?;
        let index = if path.join("meta.json").exists() {
            Index::open_in_dir(path)?
        } else {
            Index::create_in_dir(path, build_schema())?
        };
        Self::from_index(index)
    }

    /// In-memory index, mostly for tests and benchmarks.
    pub fn in_memory() -> Result<Self> {
        Self::from_index(Index::create_in_ram(build_schema()))
    }

    fn from_index(index: Index) -> Result<Self> {
        let fields = fields_from_schema(&index.schema())?;
        let writer = index
            .writer_with_num_threads(1, WRITER_HEAP_BYTES)
            .with_context(|| "create index writer")?;
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .with_context(|| "create index reader")?;
        Ok(Self {
            index,
            writer: Mutex::new(writer),
            reader,
            fields,
        })
    }

    /// Number of live documents visible to searches.
    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Stored document for `camera_id`, if indexed.
    pub fn get(&self, camera_id: &str) -> IndexResult<Option<CameraDocument>> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(
            Term::from_field_text(self.fields.camera_id, camera_id),
            IndexRecordOption::Basic,
        );
        let top = searcher.search(&query, &TopDocs::with_limit(1))?;
        match top.first() {
            Some((_, addr)) => {
                let doc: TantivyDocument = searcher.doc(*addr)?;
                Ok(Some(self.to_camera_document(&doc)))
            }
            None => Ok(None),
        }
    }

    fn write(&self, camera_id: &str, doc: Option<TantivyDocument>) -> IndexResult<()> {
        let mut writer = self.writer.lock();
        writer.delete_term(Term::from_field_text(self.fields.camera_id, camera_id));
        let staged = match doc {
            Some(doc) => writer.add_document(doc).map(|_| ()),
            None => Ok(()),
        };
        let committed = staged.and_then(|()| writer.commit().map(|_| ()));
        self.settle(&mut writer, committed)
    }

    /// Reload readers after a commit, or drop everything staged since the
    /// last commit so it cannot land with a later, unrelated one.
    fn settle(&self, writer: &mut IndexWriter, committed: tantivy::Result<()>) -> IndexResult<()> {
        if let Err(e) = committed {
            if let Err(rollback) = writer.rollback() {
                warn!(error = %rollback, "index rollback failed");
            }
            return Err(e.into());
        }
        self.reader.reload()?;
        Ok(())
    }

    fn to_tantivy_document(&self, doc: &CameraDocument) -> TantivyDocument {
        let f = &self.fields;
        let mut d = TantivyDocument::default();
        d.add_text(f.camera_id, &doc.camera_id);
        d.add_text(f.name, &doc.name);
        if let Some(description) = &doc.description {
            d.add_text(f.description, description);
        }
        if let Some(location) = &doc.location {
            d.add_text(f.location, location);
        }
        d.add_i64(f.owner_id, doc.owner_id);
        d.add_bool(f.is_active, doc.is_active);
        d.add_bool(f.is_deleted, doc.is_deleted);
        d.add_text(f.created_at, &doc.created_at);
        d.add_text(f.updated_at, &doc.updated_at);
        d
    }

    fn to_camera_document(&self, doc: &TantivyDocument) -> CameraDocument {
        let f = &self.fields;
        let text = |field: Field| {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        let flag = |field: Field| doc.get_first(field).and_then(|v| v.as_bool());
        CameraDocument {
            camera_id: text(f.camera_id).unwrap_or_default(),
            name: text(f.name).unwrap_or_default(),
            description: text(f.description),
            location: text(f.location),
            owner_id: doc
                .get_first(f.owner_id)
                .and_then(|v| v.as_i64())
                .unwrap_or_default(),
            is_active: flag(f.is_active).unwrap_or(false),
            is_deleted: flag(f.is_deleted).unwrap_or(false),
            created_at: text(f.created_at).unwrap_or_default(),
            updated_at: text(f.updated_at).unwrap_or_default(),
        }
    }
}

impl SearchIndex for TantivyIndex {
    fn upsert(&self, doc: &CameraDocument) -> IndexResult<()> {
        self.write(&doc.camera_id, Some(self.to_tantivy_document(doc)))
    }

    fn partial_update(&self, camera_id: &str, patch: &DocumentPatch) -> IndexResult<()> {
        let mut doc = self
            .get(camera_id)?
            .ok_or_else(|| IndexError::DocumentMissing(camera_id.to_string()))?;
        patch.apply_to(&mut doc);
        self.upsert(&doc)
    }

    fn delete(&self, camera_id: &str) -> IndexResult<()> {
        self.write(camera_id, None)
    }

    fn search(&self, query: &str, size: usize, offset: usize) -> IndexResult<Vec<String>> {
        let size = bounded_window(size, offset)?;
        if size == 0 {
            return Ok(Vec::new());
        }
        let f = &self.fields;
        let parser = QueryParser::for_index(
            &self.index,
            vec![f.name, f.description, f.location, f.camera_id],
        );
        let (parsed, errors) = parser.parse_query_lenient(query);
        if !errors.is_empty() {
            debug!(query, errors = errors.len(), "lenient query parse dropped terms");
        }
        let searcher = self.reader.searcher();
        let top = searcher.search(&parsed, &TopDocs::with_limit(size).and_offset(offset))?;
        let mut ids = Vec::with_capacity(top.len());
        for (_score, addr) in top {
            let doc: TantivyDocument = searcher.doc(addr)?;
            if let Some(id) = doc.get_first(f.camera_id).and_then(|v| v.as_str()) {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    fn backend(&self) -> &'static str {
        "tantivy"
    }
}

pub fn build_schema() -> Schema {
    let mut schema_builder = Schema::builder();
    schema_builder.add_text_field("camera_id", STRING | STORED);
    schema_builder.add_text_field("name", TEXT | STORED);
    schema_builder.add_text_field("description", TEXT | STORED);
    schema_builder.add_text_field("location", TEXT | STORED);
    schema_builder.add_i64_field("owner_id", STORED);
    schema_builder.add_bool_field("is_active", STORED);
    schema_builder.add_bool_field("is_deleted", STORED);
    schema_builder.add_text_field("created_at", STORED);
    schema_builder.add_text_field("updated_at", STORED);
    schema_builder.build()
}

pub fn fields_from_schema(schema: &Schema) -> Result<Fields> {
    let field = |name: &str| {
        schema
            .get_field(name)
            .with_context(|| format!("schema missing {name}"))
    };
    Ok(Fields {
        camera_id: field("camera_id")?,
        name: field("name")?,
        description: field("description")?,
        location: field("location")?,
        owner_id: field("owner_id")?,
        is_active: field("is_active")?,
        is_deleted: field("is_deleted")?,
        created_at: field("created_at")?,
        updated_at: field("updated_at")?,
    })
}

pub fn index_dir(base: &Path) -> Result<PathBuf> {
    let dir = base.join("index").join(SCHEMA_VERSION);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
