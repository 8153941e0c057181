//! Shared source lifecycle
//!
//! `SourceBase` holds what every connector has in common: identity, the
//! output channel, the two offsets and the status. Connectors own a
//! `SourceBase` (behind an `Arc` when a background task needs it) and
//! delegate the handshake and event emission to it.
//!
//! ```text
//! Created ──init──▶ WaitingForMeta ──SourceMeta──▶ Running ◀──▶ Unhealthy
//!    │                    │                           │
//!    └─(standalone)───────┴───────────────────────────┴──▶ Failed / Stopped
//! ```

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::action::Meta;
use crate::error::{ConnectorError, ConnectorResult, SourceStatus};
use crate::event::{AgentInfo, Event, Position};

/// Lifecycle state and output plumbing shared by all connectors
pub struct SourceBase {
    name: String,
    agent: AgentInfo,
    standalone: bool,
    enabled: bool,
    output: mpsc::Sender<Event>,
    receiver: Mutex<Option<mpsc::Receiver<Event>>>,
    offset: AtomicU64,
    offset_agent: AtomicU64,
    // set once offsets are authoritative: after the handshake, or at once
    // when standalone
    ready: AtomicBool,
    status: watch::Sender<SourceStatus>,
    // serializes emitters so stamped positions follow channel order
    emitting: tokio::sync::Mutex<()>,
}

impl SourceBase {
    /// Create a source base with a bounded output channel
    pub fn new(
        name: impl Into<String>,
        agent: AgentInfo,
        standalone: bool,
        channel_capacity: usize,
    ) -> Self {
        let (output, receiver) = mpsc::channel(channel_capacity.max(1));
        let (status, _) = watch::channel(SourceStatus::Created);
        Self {
            name: name.into(),
            agent,
            standalone,
            enabled: true,
            output,
            receiver: Mutex::new(Some(receiver)),
            offset: AtomicU64::new(0),
            offset_agent: AtomicU64::new(0),
            ready: AtomicBool::new(false),
            status,
            emitting: tokio::sync::Mutex::new(()),
        }
    }

    /// Mark the source as enabled or disabled (builder pattern)
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Source name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning agent identity
    pub fn agent(&self) -> &AgentInfo {
        &self.agent
    }

    /// Whether the agent runs without a controller
    pub fn is_standalone(&self) -> bool {
        self.standalone
    }

    /// Whether the source is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current status
    pub fn status(&self) -> SourceStatus {
        *self.status.borrow()
    }

    /// Watch status changes
    pub fn subscribe(&self) -> watch::Receiver<SourceStatus> {
        self.status.subscribe()
    }

    /// True iff the source is running
    pub fn is_healthy(&self) -> bool {
        self.status() == SourceStatus::Running
    }

    /// Whether `stop` was called
    pub fn is_stopped(&self) -> bool {
        self.status() == SourceStatus::Stopped
    }

    /// Change status. `Stopped` is final; nothing moves a source out of it.
    pub fn set_status(&self, to: SourceStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == to || *current == SourceStatus::Stopped {
                return false;
            }
            *current = to;
            true
        });
        if changed {
            debug!(source = %self.name, status = %to, "Status changed");
        }
    }

    /// Leave `Created`: wait for the handshake, or run straight away in
    /// standalone mode. Later calls are no-ops.
    pub fn begin(&self) {
        if self.status() != SourceStatus::Created {
            return;
        }
        if self.standalone {
            self.ready.store(true, Ordering::SeqCst);
            self.set_status(SourceStatus::Running);
        } else {
            self.set_status(SourceStatus::WaitingForMeta);
        }
    }

    /// Apply the controller's handshake and switch to `Running`
    pub fn apply_meta(&self, meta: &Meta) -> ConnectorResult<()> {
        match self.status() {
            SourceStatus::Created | SourceStatus::WaitingForMeta => {}
            SourceStatus::Stopped => return Err(ConnectorError::Stopped),
            other => {
                return Err(ConnectorError::State(format!(
                    "source '{}' already past handshake ({})",
                    self.name, other
                )))
            }
        }

        self.offset.store(meta.offset, Ordering::SeqCst);
        self.offset_agent.store(meta.offset_agent, Ordering::SeqCst);
        self.ready.store(true, Ordering::SeqCst);
        self.set_status(SourceStatus::Running);

        info!(
            source = %self.name,
            offset = meta.offset,
            offset_agent = meta.offset_agent,
            "Handshake complete"
        );
        Ok(())
    }

    /// Block until the handshake is done.
    ///
    /// Standalone sources return at once. Otherwise this waits for a status
    /// change to `Running`, and fails if the source is stopped or failed
    /// first.
    pub async fn wait_for_meta(&self) -> ConnectorResult<()> {
        if self.standalone {
            self.begin();
        }

        let mut rx = self.subscribe();
        let reached = rx
            .wait_for(|s| *s == SourceStatus::Running || s.is_terminal())
            .await
            .map(|s| *s)
            .map_err(|_| ConnectorError::Internal("status channel closed".to_string()))?;

        match reached {
            SourceStatus::Running => Ok(()),
            SourceStatus::Stopped => Err(ConnectorError::Stopped),
            other => Err(ConnectorError::State(format!(
                "source '{}' is {} while waiting for meta",
                self.name, other
            ))),
        }
    }

    /// Stop the source. Idempotent.
    pub fn stop(&self) {
        if !self.is_stopped() {
            self.set_status(SourceStatus::Stopped);
            info!(source = %self.name, "Source stopped");
        }
    }

    /// Record a connectivity probe result. Only flips between `Running`
    /// and `Unhealthy`; other states are left alone.
    pub fn record_probe(&self, reachable: bool) {
        match (self.status(), reachable) {
            (SourceStatus::Running, false) => {
                warn!(source = %self.name, "Connectivity probe failed");
                self.set_status(SourceStatus::Unhealthy);
            }
            (SourceStatus::Unhealthy, true) => {
                info!(source = %self.name, "Connectivity restored");
                self.set_status(SourceStatus::Running);
            }
            _ => {}
        }
    }

    /// Connector-local offset
    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }

    /// Agent-wide offset
    pub fn offset_agent(&self) -> u64 {
        self.offset_agent.load(Ordering::SeqCst)
    }

    /// Seed the local offset before the handshake
    pub fn set_offset(&self, offset: u64) {
        self.offset.store(offset, Ordering::SeqCst);
    }

    /// Hand an event to the consumer and advance both offsets by one.
    ///
    /// The event is stamped with the offsets it completes, so a consumer
    /// can commit exactly what it has written. Waits while the channel is
    /// full; `stop` releases the wait with `ConnectorError::Stopped`.
    pub async fn emit(&self, mut event: Event) -> ConnectorResult<()> {
        let _guard = self.emitting.lock().await;
        if self.is_stopped() {
            return Err(ConnectorError::Stopped);
        }

        let before = Position {
            offset: self.offset(),
            offset_agent: self.offset_agent(),
        };
        let position = Position {
            offset: before.offset + 1,
            offset_agent: before.offset_agent + 1,
        };
        event.position = Some(position);

        // advance first so a receiver never sees an event ahead of the offsets
        self.store_position(position);
        let mut status = self.subscribe();
        let sent = tokio::select! {
            sent = self.output.send(event) => sent.map_err(|_| {
                ConnectorError::State(format!("output channel of '{}' is closed", self.name))
            }),
            _ = async {
                let _ = status.wait_for(|s| *s == SourceStatus::Stopped).await;
            } => Err(ConnectorError::Stopped),
        };
        if sent.is_err() {
            self.store_position(before);
        }
        sent
    }

    fn store_position(&self, position: Position) {
        self.offset.store(position.offset, Ordering::SeqCst);
        self.offset_agent.store(position.offset_agent, Ordering::SeqCst);
    }

    /// Take the output receiver. Only the first call gets it.
    pub fn take_output(&self) -> Option<mpsc::Receiver<Event>> {
        self.receiver.lock().take()
    }

    /// `{}` before the handshake, afterwards `{offset, offset_agent}` of
    /// everything enqueued so far
    pub fn meta(&self) -> Map<String, Value> {
        let mut meta = Map::new();
        if self.ready.load(Ordering::SeqCst) {
            meta.insert("offset".to_string(), json!(self.offset()));
            meta.insert("offset_agent".to_string(), json!(self.offset_agent()));
        }
        meta
    }
}

impl std::fmt::Debug for SourceBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceBase")
            .field("name", &self.name)
            .field("status", &self.status())
            .field("standalone", &self.standalone)
            .field("offset", &self.offset())
            .field("offset_agent", &self.offset_agent())
            .finish()
    }
}
