//! Local-file checkpoint backend
//!
//! All names live in one JSON object inside `dir/record`. Every store
//! rewrites the record atomically (temp file, fsync, rename) while holding
//! an async lock, so concurrent sources never lose each other's updates.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::{Context, ContextKind};
use crate::error::{ConnectorError, ConnectorResult};

type Record = BTreeMap<String, String>;

/// Checkpoint context backed by a JSON record file
pub struct FileContext {
    dir: PathBuf,
    record: String,
    write_lock: Mutex<()>,
}

impl FileContext {
    /// Create a context storing into `dir/record`. Nothing touches the
    /// filesystem until the first store or load.
    pub fn new(dir: impl Into<PathBuf>, record: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            record: record.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Full path of the record file
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.record)
    }

    async fn read_record(path: &Path) -> ConnectorResult<Record> {
        match fs::read(path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Record::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                ConnectorError::checkpoint(format!(
                    "corrupt checkpoint record {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Record::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_record(&self, record: &Record) -> ConnectorResult<()> {
        fs::create_dir_all(&self.dir).await?;

        let file_path = self.path();
        let temp_path = self.dir.join(format!(".{}.tmp", self.record));
        let json = serde_json::to_vec_pretty(record)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &file_path).await?;
        Ok(())
    }
}

#[async_trait]
impl Context for FileContext {
    async fn store(&self, name: &str, value: &str) -> ConnectorResult<()> {
        let _guard = self.write_lock.lock().await;

        let mut record = Self::read_record(&self.path()).await?;
        record.insert(name.to_string(), value.to_string());
        self.write_record(&record).await?;

        debug!(name, value, path = %self.path().display(), "Stored checkpoint");
        Ok(())
    }

    async fn load(&self, name: &str) -> ConnectorResult<Option<String>> {
        // readers wait for an in-flight store so they never see a stale record
        let _guard = self.write_lock.lock().await;
        let record = Self::read_record(&self.path()).await?;
        Ok(record.get(name).cloned())
    }

    fn kind(&self) -> ContextKind {
        ContextKind::File
    }

    fn location(&self) -> String {
        self.path().display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_and_load() {
        let dir = TempDir::new().unwrap();
        let ctx = FileContext::new(dir.path(), "offsets");

        ctx.store("app-log.offset", "42").await.unwrap();
        assert_eq!(ctx.load("app-log.offset").await.unwrap(), Some("42".into()));

        ctx.store("app-log.offset", "43").await.unwrap();
        assert_eq!(ctx.load("app-log.offset").await.unwrap(), Some("43".into()));
    }

    #[tokio::test]
    async fn test_missing_record_and_name() {
        let dir = TempDir::new().unwrap();
        let ctx = FileContext::new(dir.path().join("nested"), "offsets");

        assert_eq!(ctx.load("nothing").await.unwrap(), None);

        ctx.store("a", "1").await.unwrap();
        assert_eq!(ctx.load("b").await.unwrap(), None);
        assert!(ctx.path().exists());
    }

    #[tokio::test]
    async fn test_names_share_one_record() {
        let dir = TempDir::new().unwrap();
        let ctx = FileContext::new(dir.path(), "offsets");

        ctx.store("a", "1").await.unwrap();
        ctx.store("b", "2").await.unwrap();

        let raw = std::fs::read_to_string(ctx.path()).unwrap();
        let record: Record = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.len(), 2);
        assert!(!dir.path().join(".offsets.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("offsets"), "{not json").unwrap();
        let ctx = FileContext::new(dir.path(), "offsets");

        assert!(matches!(
            ctx.load("a").await,
            Err(ConnectorError::Checkpoint(_))
        ));
    }
}
