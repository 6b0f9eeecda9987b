//! Elasticsearch-compatible index client over HTTP.
//!
//! Uses the blocking `reqwest` client with a short timeout so a slow or dead
//! index bounds the propagation step instead of stalling the caller.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde_json::{Value, json};
use tracing::debug;

use super::{IndexError, IndexResult, SEARCH_FIELDS, SearchIndex, bounded_window};
use crate::model::types::{CameraDocument, DocumentPatch};

pub const DEFAULT_INDEX_NAME: &str = "cameras_index";

#[derive(Debug, Clone)]
pub struct HttpIndexConfig {
    /// Base URL, e.g. `http://localhost:9200`.
    pub host: String,
    pub index: String,
    pub timeout: Duration,
}

impl HttpIndexConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            index: DEFAULT_INDEX_NAME.to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

pub struct HttpSearchIndex {
    client: Client,
    base: String,
    index: String,
}

impl std::fmt::Debug for HttpSearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSearchIndex")
            .field("base", &self.base)
            .field("index", &self.index)
            .finish()
    }
}

impl HttpSearchIndex {
    pub fn new(config: &HttpIndexConfig) -> IndexResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .user_agent(concat!("camreg/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let host = config.host.trim_end_matches('/');
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{host}")
        };
        Ok(Self {
            client,
            base,
            index: config.index.clone(),
        })
    }

    fn doc_url(&self, camera_id: &str) -> String {
        format!(
            "{}/{}/_doc/{}",
            self.base,
            self.index,
            urlencoding::encode(camera_id)
        )
    }

    fn update_url(&self, camera_id: &str) -> String {
        format!(
            "{}/{}/_update/{}",
            self.base,
            self.index,
            urlencoding::encode(camera_id)
        )
    }

    fn search_url(&self) -> String {
        format!("{}/{}/_search", self.base, self.index)
    }
}

impl SearchIndex for HttpSearchIndex {
    fn upsert(&self, doc: &CameraDocument) -> IndexResult<()> {
        let resp = self
            .client
            .put(self.doc_url(&doc.camera_id))
            .json(doc)
            .send()
            .map_err(transport_error)?;
        expect_success(resp).map(|_| ())
    }

    fn partial_update(&self, camera_id: &str, patch: &DocumentPatch) -> IndexResult<()> {
        let resp = self
            .client
            .post(self.update_url(camera_id))
            .json(&update_body(patch))
            .send()
            .map_err(transport_error)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(IndexError::DocumentMissing(camera_id.to_string()));
        }
        expect_success(resp).map(|_| ())
    }

    fn delete(&self, camera_id: &str) -> IndexResult<()> {
        let resp = self
            .client
            .delete(self.doc_url(camera_id))
            .send()
            .map_err(transport_error)?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!(camera_id, "index delete: document already absent");
            return Ok(());
        }
        expect_success(resp).map(|_| ())
    }

    fn search(&self, query: &str, size: usize, offset: usize) -> IndexResult<Vec<String>> {
        let size = bounded_window(size, offset)?;
        let resp = self
            .client
            .post(self.search_url())
            .json(&search_body(query, size, offset))
            .send()
            .map_err(transport_error)?;
        let body: Value = expect_success(resp)?.json()?;
        Ok(hit_ids(&body))
    }

    fn backend(&self) -> &'static str {
        "http"
    }
}

fn transport_error(e: reqwest::Error) -> IndexError {
    if e.is_connect() || e.is_timeout() {
        IndexError::Unavailable(e.to_string())
    } else {
        IndexError::Http(e)
    }
}

fn expect_success(resp: Response) -> IndexResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(IndexError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Body of `POST /{index}/_update/{id}`.
pub fn update_body(patch: &DocumentPatch) -> Value {
    json!({ "doc": patch })
}

/// Body of `POST /{index}/_search`: a multi-field match with paging.
pub fn search_body(query: &str, size: usize, offset: usize) -> Value {
    json!({
        "query": {
            "multi_match": {
                "query": query,
                "fields": SEARCH_FIELDS,
            }
        },
        "size": size,
        "from": offset,
    })
}

/// Camera ids from a search response, in hit order. Prefers the stored
/// `camera_id` and falls back to the document `_id`.
pub fn hit_ids(body: &Value) -> Vec<String> {
    body.get("hits")
        .and_then(|h| h.get("hits"))
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| {
                    hit.get("_source")
                        .and_then(|s| s.get("camera_id"))
                        .or_else(|| hit.get("_id"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default()
}
