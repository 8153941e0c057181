//! Agent runner
//!
//! Drives the configured sources the way a controller would: init, offset
//! handshake from the checkpoint context, start, drain the output channels
//! and persist offsets on every commit tick and once more at shutdown.
//!
//! Persisted offsets are those of the last event written out, never of
//! events still waiting in a channel. After a crash the undelivered tail
//! is read again.
//!
//! ```text
//! ┌──────────┐  SourceMeta   ┌──────────┐  events   ┌────────┐
//! │ Context  │──────────────▶│  Source  │──────────▶│ stdout │
//! │ (offsets)│◀──────────────│          │           └────────┘
//! └──────────┘  meta() tick  └──────────┘
//! ```

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::{AgentConfig, AgentSettings, SourceConfig};
use crate::context::{new_context, SharedContext};
use crate::error::{AgentError, ConnectorError, Result, SourceStatus};
use crate::event::{Event, Position};
use crate::source::{Meta, Source, SourceBase, SourceRegistry, SOURCE_META};

/// Checkpoint key holding a source's local offset
pub fn offset_key(source: &str) -> String {
    format!("{}.offset", source)
}

/// Checkpoint key holding a source's agent-wide offset
pub fn offset_agent_key(source: &str) -> String {
    format!("{}.offset_agent", source)
}

/// Build one source from its config
pub fn build_source(
    name: &str,
    config: &SourceConfig,
    settings: &AgentSettings,
    registry: &SourceRegistry,
) -> Result<Arc<dyn Source>> {
    let base = SourceBase::new(
        name,
        settings.agent_info(),
        settings.standalone,
        settings.channel_capacity,
    )
    .with_enabled(config.enabled);

    registry
        .create(&config.connector_type, base, &config.config)
        .map_err(|e| AgentError::source(name, e.to_string()))
}

/// Health of one source, as logged on every commit tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceHealth {
    /// Source name
    pub name: String,
    /// Current status
    pub status: SourceStatus,
    /// Result of `health_check`
    pub healthy: bool,
}

/// Offsets of the last event a drain task wrote out
type Delivered = Arc<parking_lot::Mutex<Option<Position>>>;

/// Local controller for a set of sources
pub struct Agent {
    settings: AgentSettings,
    context: SharedContext,
    sources: Vec<Arc<dyn Source>>,
    // one slot per source, same order as `sources`
    delivered: Vec<Delivered>,
}

impl Agent {
    /// Create an agent without sources
    pub fn new(settings: AgentSettings, context: SharedContext) -> Self {
        Self {
            settings,
            context,
            sources: Vec::new(),
            delivered: Vec::new(),
        }
    }

    /// Build the agent and every enabled source from config
    pub fn from_config(config: &AgentConfig, registry: &SourceRegistry) -> Result<Self> {
        let context = new_context(&config.agent.checkpoint)
            .map_err(|e| AgentError::config(format!("agent.checkpoint: {}", e)))?;

        let mut agent = Self::new(config.agent.clone(), context);
        for (name, source_config) in config.enabled_sources() {
            agent.add_source(build_source(name, source_config, &config.agent, registry)?);
        }
        Ok(agent)
    }

    /// Add a source
    pub fn add_source(&mut self, source: Arc<dyn Source>) {
        self.sources.push(source);
        self.delivered.push(Arc::default());
    }

    /// All sources
    pub fn sources(&self) -> &[Arc<dyn Source>] {
        &self.sources
    }

    /// Source by name
    pub fn source(&self, name: &str) -> Option<&Arc<dyn Source>> {
        self.sources.iter().find(|s| s.name() == name)
    }

    /// Checkpoint context
    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    fn delivered_slot(&self, name: &str) -> Option<&Delivered> {
        self.sources
            .iter()
            .position(|s| s.name() == name)
            .map(|idx| &self.delivered[idx])
    }

    /// Run `init` on every source. Failures are logged; a SQL source
    /// without a schema snapshot still accepts queries.
    pub async fn init_sources(&self) {
        for source in &self.sources {
            match source.init().await {
                Ok(()) => debug!(source = %source.name(), "Source initialized"),
                Err(e) => warn!(source = %source.name(), error = %e, "Source init failed"),
            }
        }
    }

    async fn load_offset(&self, key: &str) -> Result<u64> {
        let stored = self
            .context
            .load(key)
            .await
            .map_err(|e| AgentError::Checkpoint(format!("cannot load '{}': {}", key, e)))?;

        match stored {
            None => Ok(0),
            Some(value) => value.trim().parse::<u64>().map_err(|_| {
                AgentError::Checkpoint(format!("'{}' holds '{}', not an offset", key, value))
            }),
        }
    }

    /// Offsets stored for `source`; never-stored offsets are zero
    pub async fn load_meta(&self, source: &str) -> Result<Meta> {
        Ok(Meta::new(
            self.load_offset(&offset_key(source)).await?,
            self.load_offset(&offset_agent_key(source)).await?,
        ))
    }

    /// Deliver the stored offsets to `source` as a `SourceMeta` action
    pub async fn handshake(&self, source: &dyn Source) -> Result<()> {
        let meta = self.load_meta(source.name()).await?;
        source
            .process(SOURCE_META, &meta.to_payload())
            .await
            .map_err(|e| AgentError::source(source.name(), e.to_string()))?;
        if let Some(slot) = self.delivered_slot(source.name()) {
            *slot.lock() = Some(Position {
                offset: meta.offset,
                offset_agent: meta.offset_agent,
            });
        }
        debug!(
            source = %source.name(),
            offset = meta.offset,
            offset_agent = meta.offset_agent,
            "Stored offsets delivered"
        );
        Ok(())
    }

    /// Store the offsets of every event written out so far. Events still
    /// queued in a source's channel are not counted. Returns how many
    /// sources were persisted; failures are logged.
    pub async fn persist(&self) -> usize {
        let mut persisted = 0;
        for (source, delivered) in self.sources.iter().zip(&self.delivered) {
            if source.meta().is_empty() {
                // no handshake yet, nothing to store
                continue;
            }
            let Some(position) = *delivered.lock() else {
                // nothing written since start
                continue;
            };

            let name = source.name();
            let stored = async {
                self.context
                    .store(&offset_key(name), &position.offset.to_string())
                    .await?;
                self.context
                    .store(&offset_agent_key(name), &position.offset_agent.to_string())
                    .await
            }
            .await;

            match stored {
                Ok(()) => persisted += 1,
                Err(e) => error!(source = %name, error = %e, "Failed to persist offsets"),
            }
        }
        debug!(sources = persisted, location = %self.context.location(), "Offsets persisted");
        persisted
    }

    /// Query and log every source's health
    pub async fn health(&self) -> Vec<SourceHealth> {
        let mut report = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let status = source.status().await;
            let healthy = source.health_check().await;
            if healthy {
                debug!(source = %source.name(), %status, "Source healthy");
            } else {
                warn!(source = %source.name(), %status, "Source unhealthy");
            }
            report.push(SourceHealth {
                name: source.name().to_string(),
                status,
                healthy,
            });
        }
        report
    }

    /// Run until `shutdown` resolves, writing events to stdout
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.run_with_output(shutdown, Arc::new(Mutex::new(tokio::io::stdout())))
            .await
    }

    /// Run until `shutdown` resolves, writing events as JSON lines to `out`
    pub async fn run_with_output<F, W>(self, shutdown: F, out: Arc<Mutex<W>>) -> Result<()>
    where
        F: Future<Output = ()>,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        if self.sources.is_empty() {
            warn!("No enabled sources found in configuration");
            return Ok(());
        }

        self.init_sources().await;

        if !self.settings.standalone {
            for source in &self.sources {
                if let Err(e) = self.handshake(source.as_ref()).await {
                    error!(source = %source.name(), error = %e, "Handshake failed");
                }
            }
        }

        let (stop_tx, stop_rx) = watch::channel(false);

        let mut drains = Vec::with_capacity(self.sources.len());
        for (source, delivered) in self.sources.iter().zip(&self.delivered) {
            match source.take_output() {
                Some(rx) => drains.push(tokio::spawn(drain(
                    source.name().to_string(),
                    rx,
                    out.clone(),
                    delivered.clone(),
                    stop_rx.clone(),
                ))),
                None => warn!(source = %source.name(), "Output channel already taken"),
            }
        }

        let mut starts = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let source = source.clone();
            starts.push(tokio::spawn(async move {
                match source.start().await {
                    Ok(()) => debug!(source = %source.name(), "Source started"),
                    Err(ConnectorError::Stopped) => {
                        debug!(source = %source.name(), "Source stopped before start")
                    }
                    Err(e) => error!(source = %source.name(), error = %e, "Source failed to start"),
                }
            }));
        }

        info!(
            sources = self.sources.len(),
            standalone = self.settings.standalone,
            "Agent running"
        );

        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.settings.commit_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.persist().await;
                    self.health().await;
                }
            }
        }

        info!("Initiating graceful shutdown...");
        for source in &self.sources {
            if let Err(e) = source.stop().await {
                warn!(source = %source.name(), error = %e, "Failed to stop source");
            }
        }
        let _ = stop_tx.send(true);

        for handle in starts.into_iter().chain(drains) {
            if let Err(e) = handle.await {
                warn!(error = %e, "Agent task ended abnormally");
            }
        }

        let persisted = self.persist().await;
        info!(sources = persisted, "Shutdown complete");
        Ok(())
    }
}

/// Write one event as a JSON line. Returns whether it reached `out`.
async fn write_event<W>(source: &str, out: &Mutex<W>, event: &Event) -> bool
where
    W: AsyncWrite + Unpin,
{
    let line = match event.to_json_line() {
        Ok(line) => line,
        Err(e) => {
            error!(source = %source, error = %e, "Failed to encode event");
            return false;
        }
    };

    let mut out = out.lock().await;
    let written = async {
        out.write_all(line.as_bytes()).await?;
        out.write_all(b"\n").await?;
        out.flush().await
    }
    .await;
    match written {
        Ok(()) => true,
        Err(e) => {
            error!(source = %source, error = %e, "Failed to write event");
            false
        }
    }
}

async fn forward<W>(source: &str, out: &Mutex<W>, delivered: &Delivered, event: Event)
where
    W: AsyncWrite + Unpin,
{
    if write_event(source, out, &event).await {
        if let Some(position) = event.position() {
            *delivered.lock() = Some(position);
        }
    }
}

/// Forward events until the agent stops, then flush what is buffered.
/// Every event written moves the source's delivered offsets forward.
async fn drain<W>(
    source: String,
    mut rx: mpsc::Receiver<Event>,
    out: Arc<Mutex<W>>,
    delivered: Delivered,
    mut stop: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => forward(&source, &out, &delivered, event).await,
                None => break,
            },
            _ = stop.changed() => {
                while let Ok(event) = rx.try_recv() {
                    forward(&source, &out, &delivered, event).await;
                }
                break;
            }
        }
    }
    debug!(source = %source, "Output drained");
}
