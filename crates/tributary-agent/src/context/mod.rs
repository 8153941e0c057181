//! Checkpoint context
//!
//! A `Context` persists named offset values so sources can resume after a
//! restart. The backend is picked once from a connection string:
//!
//! - `kv://host:port/prefix` (or `redis://...`): key-value store, keys
//!   namespaced under `prefix`
//! - anything else (`file:///dir/record`, a plain path): one JSON record
//!   file `record` inside directory `dir`
//!
//! Callers only ever see `Arc<dyn Context>`; nothing branches on the
//! backend after construction.

mod file;
mod kv;
mod memory;

pub use file::FileContext;
pub use kv::KvContext;
pub use memory::MemoryContext;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::{ConnectorError, ConnectorResult};

/// Persisted name -> value store for offsets.
///
/// Last write wins. Implementations are safe to share between sources.
#[async_trait]
pub trait Context: Send + Sync {
    /// Store `value` under `name`, replacing any previous value
    async fn store(&self, name: &str, value: &str) -> ConnectorResult<()>;

    /// Load the value stored under `name`, `None` if never stored
    async fn load(&self, name: &str) -> ConnectorResult<Option<String>>;

    /// Backend kind
    fn kind(&self) -> ContextKind;

    /// Human readable location, without credentials
    fn location(&self) -> String;
}

/// Shared handle to a checkpoint context
pub type SharedContext = Arc<dyn Context>;

/// Checkpoint backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// Key-value store
    Kv,
    /// Local JSON record file
    File,
    /// Process memory
    Memory,
}

impl std::fmt::Display for ContextKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kv => write!(f, "kv"),
            Self::File => write!(f, "file"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Where a connection string points, before any backend is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextTarget {
    /// Key-value backend
    Kv {
        /// `redis://` endpoint (may carry credentials)
        endpoint: String,
        /// Key namespace, leading separator stripped
        namespace: String,
    },
    /// Local-file backend
    File {
        /// Storage directory
        dir: PathBuf,
        /// Record file name
        record: String,
    },
}

impl ContextTarget {
    /// Resolve a checkpoint connection string
    pub fn parse(dsn: &str) -> ConnectorResult<Self> {
        let dsn = dsn.trim();
        if dsn.is_empty() {
            return Err(ConnectorError::config("checkpoint location is empty"));
        }

        let path = match url::Url::parse(dsn) {
            Ok(url) if matches!(url.scheme(), "kv" | "redis") => return Self::kv(url),
            Ok(url) => url.path().to_string(),
            // no scheme at all: a plain filesystem path
            Err(url::ParseError::RelativeUrlWithoutBase) => dsn.to_string(),
            Err(e) => {
                return Err(ConnectorError::config(format!(
                    "cannot parse checkpoint location '{}': {}",
                    dsn, e
                )))
            }
        };

        Self::file(&path)
    }

    fn kv(url: url::Url) -> ConnectorResult<Self> {
        if url.host_str().map_or(true, str::is_empty) {
            return Err(ConnectorError::config(format!(
                "checkpoint location '{}' has no host",
                url.scheme()
            )));
        }

        let namespace = url.path().trim_start_matches('/').to_string();

        let mut endpoint = url;
        endpoint
            .set_scheme("redis")
            .map_err(|_| ConnectorError::config("cannot derive kv endpoint"))?;
        endpoint.set_path("/");
        endpoint.set_query(None);
        endpoint.set_fragment(None);

        Ok(Self::Kv {
            endpoint: endpoint.to_string(),
            namespace,
        })
    }

    fn file(path: &str) -> ConnectorResult<Self> {
        let path = Path::new(path);
        let record = path
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                ConnectorError::config(format!(
                    "checkpoint path '{}' has no record name",
                    path.display()
                ))
            })?
            .to_string();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        Ok(Self::File { dir, record })
    }

    /// Backend kind this target selects
    pub fn kind(&self) -> ContextKind {
        match self {
            Self::Kv { .. } => ContextKind::Kv,
            Self::File { .. } => ContextKind::File,
        }
    }
}

/// Build a checkpoint context from a connection string.
///
/// Only parsing happens here; the kv connection is opened on first use
/// and the record file is created on first store.
pub fn new_context(dsn: &str) -> ConnectorResult<SharedContext> {
    let context: SharedContext = match ContextTarget::parse(dsn)? {
        ContextTarget::Kv {
            endpoint,
            namespace,
        } => {
            debug!(namespace = %namespace, "Storing offsets in kv backend");
            Arc::new(KvContext::new(&endpoint, namespace)?)
        }
        ContextTarget::File { dir, record } => {
            debug!(dir = %dir.display(), record = %record, "Storing offsets in file backend");
            Arc::new(FileContext::new(dir, record))
        }
    };
    Ok(context)
}
