//! Runtime configuration: defaults, then an optional TOML file, then
//! environment variables (a `.env` file is honoured through `dotenvy`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::search::http::{DEFAULT_INDEX_NAME, HttpIndexConfig};
use crate::storage::PoolConfig;

pub const DB_FILE_NAME: &str = "cameras.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBackend {
    /// Elasticsearch-compatible server over HTTP.
    Http,
    /// Tantivy index under the data directory.
    Embedded,
}

impl std::str::FromStr for IndexBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" | "elasticsearch" => Ok(IndexBackend::Http),
            "embedded" | "tantivy" => Ok(IndexBackend::Embedded),
            other => bail!("unknown index backend '{other}' (expected http or embedded)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// `None` picks http when a host is set, embedded otherwise.
    pub backend: Option<IndexBackend>,
    pub host: Option<String>,
    pub name: String,
    pub timeout: Duration,
}

impl IndexConfig {
    pub fn resolved_backend(&self) -> IndexBackend {
        match (self.backend, &self.host) {
            (Some(backend), _) => backend,
            (None, Some(_)) => IndexBackend::Http,
            (None, None) => IndexBackend::Embedded,
        }
    }

    pub fn http(&self) -> Result<HttpIndexConfig> {
        let host = self
            .host
            .clone()
            .context("http index backend needs ELASTICSEARCH_HOST or index.host")?;
        Ok(HttpIndexConfig {
            host,
            index: self.name.clone(),
            timeout: self.timeout,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    db_path: Option<PathBuf>,
    pub index: IndexConfig,
    pub pool: PoolConfig,
    pub log_level: String,
    log_dir: Option<PathBuf>,
}

impl Config {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            db_path: None,
            index: IndexConfig {
                backend: None,
                host: None,
                name: DEFAULT_INDEX_NAME.to_string(),
                timeout: Duration::from_secs(5),
            },
            pool: PoolConfig::default(),
            log_level: "info".to_string(),
            log_dir: None,
        }
    }

    /// Defaults, then `file` (if given), then environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut cfg = Self::with_data_dir(crate::default_data_dir());
        if let Some(path) = file {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            let parsed: FileConfig = toml::from_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?;
            cfg.merge_file(parsed)?;
        }
        cfg.merge_env()?;
        Ok(cfg)
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(DB_FILE_NAME))
    }

    pub fn set_db_path(&mut self, path: impl Into<PathBuf>) {
        self.db_path = Some(path.into());
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("logs"))
    }

    fn merge_file(&mut self, file: FileConfig) -> Result<()> {
        if let Some(dir) = file.data_dir {
            self.data_dir = dir;
        }
        if let Some(db) = file.db_path {
            self.db_path = Some(db);
        }
        if let Some(index) = file.index {
            if let Some(backend) = index.backend {
                self.index.backend = Some(backend.parse()?);
            }
            if index.host.is_some() {
                self.index.host = index.host;
            }
            if let Some(name) = index.name {
                self.index.name = name;
            }
            if let Some(ms) = index.timeout_ms {
                self.index.timeout = Duration::from_millis(ms);
            }
        }
        if let Some(pool) = file.pool {
            if let Some(size) = pool.size {
                self.pool.max_size = size.max(1);
            }
            if let Some(ms) = pool.timeout_ms {
                self.pool.checkout_timeout = Duration::from_millis(ms);
            }
        }
        if let Some(log) = file.log {
            if let Some(level) = log.level {
                self.log_level = level;
            }
            if log.dir.is_some() {
                self.log_dir = log.dir;
            }
        }
        Ok(())
    }

    fn merge_env(&mut self) -> Result<()> {
        if let Ok(dir) = dotenvy::var("CAMREG_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(db) = dotenvy::var("CAMREG_DB") {
            self.db_path = Some(PathBuf::from(db));
        }
        if let Ok(backend) = dotenvy::var("CAMREG_INDEX_BACKEND") {
            self.index.backend = Some(backend.parse()?);
        }
        if let Ok(host) = dotenvy::var("ELASTICSEARCH_HOST")
            && !host.trim().is_empty()
        {
            self.index.host = Some(host);
        }
        if let Ok(name) = dotenvy::var("ELASTICSEARCH_INDEX") {
            self.index.name = name;
        }
        if let Ok(val) = dotenvy::var("CAMREG_INDEX_TIMEOUT_MS")
            && let Ok(ms) = val.parse()
        {
            self.index.timeout = Duration::from_millis(ms);
        }
        if let Ok(val) = dotenvy::var("CAMREG_POOL_SIZE")
            && let Ok(n) = val.parse::<usize>()
        {
            self.pool.max_size = n.max(1);
        }
        if let Ok(val) = dotenvy::var("CAMREG_POOL_TIMEOUT_MS")
            && let Ok(ms) = val.parse()
        {
            self.pool.checkout_timeout = Duration::from_millis(ms);
        }
        if let Ok(level) = dotenvy::var("LOG_LEVEL") {
            self.log_level = level;
        }
        if let Ok(dir) = dotenvy::var("CAMREG_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    index: Option<FileIndex>,
    pool: Option<FilePool>,
    log: Option<FileLog>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileIndex {
    backend: Option<String>,
    host: Option<String>,
    name: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FilePool {
    size: Option<usize>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileLog {
    level: Option<String>,
    dir: Option<PathBuf>,
}
