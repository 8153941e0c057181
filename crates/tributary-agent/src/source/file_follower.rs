//! Resumable file follower
//!
//! Tails a growing text file and emits one event per line. The local
//! offset counts lines already delivered: on start that many lines are
//! skipped, so after a restart with offset `N` the first event is line
//! `N + 1`.
//!
//! Rotation is noticed at EOF, when the path points to a different file
//! (new inode) or the file became shorter than what was read
//! (truncation). Either way the follower reopens the path and continues
//! from its first line. The offset keeps counting across rotations.

use async_trait::async_trait;
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use validator::Validate;

use super::action::{Action, ActionDescription};
use super::lifecycle::SourceBase;
use super::Source;
use crate::error::{ConnectorError, ConnectorResult, SourceStatus};
use crate::event::Event;

/// Connector type identifier
pub const FILE_FOLLOWER_TYPE: &str = "fileReadingFollower";

/// File follower configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
pub struct FileFollowerConfig {
    /// File to follow
    #[validate(length(min = 1))]
    pub path: String,

    /// Lines to skip before the first event (replaced by the handshake)
    #[serde(default)]
    pub offset: u64,

    /// How long to wait at EOF before checking for new data
    #[serde(default = "default_poll_interval_ms")]
    #[validate(range(min = 1, max = 60000))]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    250
}

/// Source emitting each line of a followed file
pub struct FileFollower {
    base: Arc<SourceBase>,
    config: FileFollowerConfig,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl FileFollower {
    /// Create a follower; the configured offset seeds the local offset
    pub fn new(base: SourceBase, config: FileFollowerConfig) -> Self {
        base.set_offset(config.offset);
        Self {
            base: Arc::new(base),
            config,
            reader: Mutex::new(None),
        }
    }

    /// Shared lifecycle state
    pub fn base(&self) -> &SourceBase {
        &self.base
    }

    /// Followed path
    pub fn path(&self) -> &Path {
        Path::new(&self.config.path)
    }
}

#[async_trait]
impl Source for FileFollower {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn connector_type(&self) -> &'static str {
        FILE_FOLLOWER_TYPE
    }

    fn is_enabled(&self) -> bool {
        self.base.is_enabled()
    }

    async fn init(&self) -> ConnectorResult<()> {
        self.base.begin();
        Ok(())
    }

    async fn start(&self) -> ConnectorResult<()> {
        self.base.wait_for_meta().await?;

        let mut reader = self.reader.lock();
        if reader.is_some() {
            return Err(ConnectorError::State(format!(
                "source '{}' is already reading",
                self.base.name()
            )));
        }

        let base = self.base.clone();
        let path = PathBuf::from(&self.config.path);
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        info!(
            source = %base.name(),
            path = %path.display(),
            offset = base.offset(),
            "Following file"
        );

        *reader = Some(tokio::spawn(async move {
            match follow(&base, &path, poll).await {
                Ok(()) | Err(ConnectorError::Stopped) => {
                    debug!(source = %base.name(), "Follow loop ended");
                }
                Err(e) => {
                    error!(source = %base.name(), path = %path.display(), error = %e, "Error while reading file");
                    base.set_status(SourceStatus::Failed);
                }
            }
        }));
        Ok(())
    }

    async fn stop(&self) -> ConnectorResult<()> {
        self.base.stop();
        // once the reader is gone nothing more reaches the channel
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            if let Err(e) = reader.await {
                warn!(source = %self.base.name(), error = %e, "Reader task ended abnormally");
            }
        }
        Ok(())
    }

    async fn handle(&self, action: Action) -> ConnectorResult<()> {
        match action {
            Action::SourceMeta(meta) => self.base.apply_meta(&meta),
            other => Err(ConnectorError::UnsupportedAction(other.name().to_string())),
        }
    }

    async fn status(&self) -> SourceStatus {
        self.base.status()
    }

    async fn health_check(&self) -> bool {
        self.base.is_healthy()
    }

    fn meta(&self) -> serde_json::Map<String, serde_json::Value> {
        self.base.meta()
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::Value::String("String".to_string())
    }

    fn available_actions(&self) -> BTreeMap<String, ActionDescription> {
        BTreeMap::new()
    }

    fn take_output(&self) -> Option<tokio::sync::mpsc::Receiver<Event>> {
        self.base.take_output()
    }
}

/// Identity of an open file, used to notice rotation
#[cfg(unix)]
fn file_identity(meta: &std::fs::Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn file_identity(_meta: &std::fs::Metadata) -> Option<(u64, u64)> {
    None
}

/// An open handle on the followed file
struct Followed {
    reader: BufReader<File>,
    identity: Option<(u64, u64)>,
    position: u64,
}

impl Followed {
    async fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path).await?;
        let identity = file_identity(&file.metadata().await?);
        Ok(Self {
            reader: BufReader::new(file),
            identity,
            position: 0,
        })
    }

    async fn rewind(&mut self) -> std::io::Result<()> {
        self.reader.seek(SeekFrom::Start(0)).await?;
        self.position = 0;
        Ok(())
    }
}

/// What the path looks like compared to the open handle
enum PathState {
    Unchanged,
    Missing,
    Replaced,
    Truncated,
}

async fn inspect(path: &Path, followed: &Followed) -> std::io::Result<PathState> {
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(PathState::Missing),
        Err(e) => return Err(e),
    };
    if followed.identity.is_some() && file_identity(&meta) != followed.identity {
        return Ok(PathState::Replaced);
    }
    if meta.len() < followed.position {
        return Ok(PathState::Truncated);
    }
    Ok(PathState::Unchanged)
}

fn line_text(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

async fn deliver(base: &SourceBase, skip: &mut u64, raw: &[u8]) -> ConnectorResult<()> {
    if *skip > 0 {
        *skip -= 1;
        return Ok(());
    }
    base.emit(Event::line(FILE_FOLLOWER_TYPE, base.agent(), line_text(raw)))
        .await
}

/// Read loop. Returns `Ok` once the source is stopped.
async fn follow(base: &SourceBase, path: &Path, poll: Duration) -> ConnectorResult<()> {
    let mut status = base.subscribe();
    let mut skip = base.offset();
    let mut followed = Followed::open(path).await?;
    let mut pending: Vec<u8> = Vec::new();

    loop {
        if base.is_stopped() {
            return Ok(());
        }

        let read = followed.reader.read_until(b'\n', &mut pending).await?;
        followed.position += read as u64;

        if pending.last() == Some(&b'\n') {
            deliver(base, &mut skip, &pending).await?;
            pending.clear();
            continue;
        }
        if read > 0 {
            // partial line, wait for the rest
            continue;
        }

        // EOF: check for rotation before waiting
        match inspect(path, &followed).await? {
            PathState::Unchanged if skip > 0 => {
                // fewer lines than the stored offset: not the file the offset was taken from
                warn!(
                    source = %base.name(),
                    path = %path.display(),
                    unread = skip,
                    "File shorter than stored offset, reading from start"
                );
                pending.clear();
                skip = 0;
                followed.rewind().await?;
            }
            PathState::Unchanged | PathState::Missing => {
                tokio::select! {
                    _ = tokio::time::sleep(poll) => {}
                    _ = status.changed() => {}
                }
            }
            PathState::Truncated => {
                warn!(source = %base.name(), path = %path.display(), "File truncated, reading from start");
                pending.clear();
                skip = 0;
                followed.rewind().await?;
            }
            PathState::Replaced => {
                // the old file is complete, so a trailing partial line is a line
                if !pending.is_empty() {
                    deliver(base, &mut skip, &pending).await?;
                    pending.clear();
                }
                info!(source = %base.name(), path = %path.display(), "File rotated, reopening");
                skip = 0;
                followed = Followed::open(path).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_text_trims_terminators() {
        assert_eq!(line_text(b"hello\n"), "hello");
        assert_eq!(line_text(b"hello\r\n"), "hello");
        assert_eq!(line_text(b"\n"), "");
        assert_eq!(line_text(b"tail"), "tail");
    }

    #[test]
    fn test_config_defaults() {
        let config: FileFollowerConfig = serde_yaml::from_str("path: /var/log/app.log").unwrap();
        assert_eq!(config.offset, 0);
        assert_eq!(config.poll_interval_ms, 250);
        assert!(config.validate().is_ok());

        let config: FileFollowerConfig = serde_yaml::from_str("path: ''").unwrap();
        assert!(config.validate().is_err());
    }
}
