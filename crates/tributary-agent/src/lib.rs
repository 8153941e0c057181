//! tributary-agent - Pluggable ingestion agent
//!
//! Sources attach to upstream producers (a growing log file, a MySQL or
//! PostgreSQL database) and push envelope events onto a channel. Offsets
//! are handed to a source by its controller before it may stream, and
//! persisted through a checkpoint [`Context`](context::Context).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        tributary-agent                          │
//! │  Agent runner ── SourceRegistry ── Context (file, kv, memory)   │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                          Sources                                │
//! │  ├── fileReadingFollower (resumable tail with rotation)         │
//! │  ├── MysqlQuery          (QueryEngine + MySQL dialect)          │
//! │  └── postgresqlQuery     (QueryEngine + PostgreSQL dialect)     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                       tributary-rdbc                            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Library Usage
//!
//! ```rust,ignore
//! use tributary_agent::{AgentInfo, FileFollower, FileFollowerConfig, Source, SourceBase};
//!
//! let base = SourceBase::new("app-log", AgentInfo::new("acme", "prod", "a-1"), true, 1024);
//! let follower = FileFollower::new(base, FileFollowerConfig {
//!     path: "/var/log/app.log".into(),
//!     offset: 0,
//!     poll_interval_ms: 250,
//! });
//! let mut events = follower.take_output().unwrap();
//! follower.init().await?;
//! follower.start().await?;
//! while let Some(event) = events.recv().await {
//!     println!("{}", event.to_json_line()?);
//! }
//! ```
//!
//! # CLI Usage (Binary)
//!
//! ```bash
//! # Run all sources
//! tributary -c tributary.yaml
//!
//! # Validate configuration
//! tributary -c tributary.yaml validate
//!
//! # Run a statement through a SQL source
//! tributary -c tributary.yaml query orders-db "SELECT 1"
//! ```

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod retry;
pub mod source;
pub mod types;

// Re-export SensitiveString at crate root for convenience
pub use types::SensitiveString;

pub use agent::{build_source, Agent, SourceHealth};
pub use config::{AgentConfig, AgentSettings, SourceConfig};
pub use context::{new_context, Context, ContextKind, SharedContext};
pub use error::{AgentError, ConnectorError, ConnectorResult, Result, SourceStatus};
pub use event::{AgentInfo, Event, Position};
pub use retry::{RetryConfig, RetrySettings};
pub use source::{
    create_source_registry, Action, FileFollower, FileFollowerConfig, Meta, QueryEngine,
    QuerySource, Source, SourceBase, SourceFactory, SourceRegistry,
};
