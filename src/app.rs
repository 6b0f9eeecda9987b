//! Process wiring: open the store and the index once and hand out shared
//! handles to the coordinator and the query router.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{Config, IndexBackend};
use crate::indexer::Coordinator;
use crate::search::{
    HttpSearchIndex, QueryRouter, SharedIndex, TantivyIndex, UnavailableIndex, tantivy::index_dir,
};
use crate::storage::CameraStore;

pub struct Registry {
    pub store: Arc<CameraStore>,
    pub index: SharedIndex,
    pub coordinator: Coordinator,
    pub router: QueryRouter,
}

impl Registry {
    /// Open the primary store (applying migrations) and the configured index.
    ///
    /// Must be called off the async runtime: the http backend builds a
    /// blocking client.
    pub fn open(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
        let db_path = config.db_path();
        let store = Arc::new(CameraStore::open_with(&db_path, config.pool)?);
        let index = open_index(config)?;
        info!(
            db = %db_path.display(),
            backend = index.backend(),
            "registry opened"
        );
        Ok(Self::from_parts(store, index))
    }

    pub fn from_parts(store: Arc<CameraStore>, index: SharedIndex) -> Self {
        Self {
            coordinator: Coordinator::new(store.clone(), index.clone()),
            router: QueryRouter::new(store.clone(), index.clone()),
            store,
            index,
        }
    }
}

/// Build the configured index. A missing http host is a configuration error;
/// a backend that cannot be opened (held lock, corrupt or unwritable
/// directory) is replaced by [`UnavailableIndex`] so the store stays usable.
fn open_index(config: &Config) -> Result<SharedIndex> {
    let opened: Result<SharedIndex> = match config.index.resolved_backend() {
        IndexBackend::Http => {
            let http = config.index.http()?;
            HttpSearchIndex::new(&http)
                .context("building search index client")
                .map(|index| Arc::new(index) as SharedIndex)
        }
        IndexBackend::Embedded => index_dir(&config.data_dir)
            .and_then(|dir| TantivyIndex::open_or_create(&dir))
            .map(|index| Arc::new(index) as SharedIndex),
    };
    Ok(opened.unwrap_or_else(|e| {
        warn!(error = %format!("{e:#}"), "search index unavailable; continuing without it");
        Arc::new(UnavailableIndex::new(format!("{e:#}")))
    }))
}

/// Install the global subscriber: stderr plus a daily-rolling file under
/// the log dir. Keep the returned guard alive until exit so the file writer
/// flushes.
pub fn init_logging(config: &Config) -> Result<WorkerGuard> {
    let log_dir = config.log_dir();
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating log dir {}", log_dir.display()))?;
    let appender = tracing_appender::rolling::daily(&log_dir, "camreg.log");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .try_init()
        .context("installing tracing subscriber")?;
    Ok(guard)
}
