//! Agent configuration
//!
//! ```yaml
//! agent:
//!   tenant: acme
//!   environment: prod
//!   checkpoint: file:///var/lib/tributary/offsets
//! sources:
//!   app-log:
//!     type: fileReadingFollower
//!     config:
//!       path: /var/log/app.log
//! ```
//!
//! `${VAR}` and `${VAR:-default}` are expanded from the environment before
//! the YAML is parsed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use crate::context::ContextTarget;
use crate::event::AgentInfo;
use crate::source::SourceRegistry;

/// Pre-compiled regex for environment variable expansion
/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    /// Agent identity and runtime settings
    pub agent: AgentSettings,

    /// Sources by name
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
}

/// Agent identity and runtime settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentSettings {
    /// Tenant id stamped on every event
    pub tenant: String,

    /// Deployment environment stamped on every event
    pub environment: String,

    /// Agent id; generated when absent
    #[serde(default = "default_uuid")]
    pub uuid: String,

    /// Run without a controller: no handshake, sources start at once
    #[serde(default)]
    pub standalone: bool,

    /// Checkpoint location (`file://...`, a plain path, or `kv://host:port/ns`)
    #[serde(default = "default_checkpoint")]
    pub checkpoint: String,

    /// How often offsets are persisted
    #[serde(default = "default_commit_interval_ms")]
    pub commit_interval_ms: u64,

    /// Output channel capacity per source
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_checkpoint() -> String {
    "tributary.offsets".to_string()
}

fn default_commit_interval_ms() -> u64 {
    5000
}

fn default_channel_capacity() -> usize {
    1024
}

impl AgentSettings {
    /// Identity stamped on events
    pub fn agent_info(&self) -> AgentInfo {
        AgentInfo::new(&self.tenant, &self.environment, &self.uuid)
    }
}

/// One configured source
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    /// Connector type identifier (e.g. `fileReadingFollower`)
    #[serde(rename = "type")]
    pub connector_type: String,

    /// Whether the source is built at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Connector-specific configuration
    #[serde(default)]
    pub config: serde_yaml::Value,
}

fn default_true() -> bool {
    true
}

impl AgentConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text, expanding environment variables
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let expanded = Self::expand_env_vars(content);

        let config: Self = serde_yaml::from_str(&expanded)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;
        Ok(config)
    }

    /// Expand environment variables in the format ${VAR} or ${VAR:-default}
    fn expand_env_vars(content: &str) -> String {
        ENV_VAR_REGEX
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default = caps.get(2).map(|m| m.as_str());

                std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
            })
            .to_string()
    }

    /// Validate agent settings and every source config against `registry`
    pub fn validate(&self, registry: &SourceRegistry) -> anyhow::Result<()> {
        if self.agent.tenant.trim().is_empty() {
            anyhow::bail!("agent.tenant must not be empty");
        }
        if self.agent.uuid.trim().is_empty() {
            anyhow::bail!("agent.uuid must not be empty");
        }
        if self.agent.commit_interval_ms == 0 {
            anyhow::bail!("agent.commit_interval_ms must be greater than zero");
        }
        if self.agent.channel_capacity == 0 {
            anyhow::bail!("agent.channel_capacity must be greater than zero");
        }
        if !self.agent.standalone {
            ContextTarget::parse(&self.agent.checkpoint)
                .map_err(|e| anyhow::anyhow!("agent.checkpoint: {}", e))?;
        }

        for (name, source) in &self.sources {
            let factory = registry.get(&source.connector_type).ok_or_else(|| {
                anyhow::anyhow!(
                    "Source '{}': unknown connector type '{}'",
                    name,
                    source.connector_type
                )
            })?;
            if !source.enabled {
                tracing::debug!("Source '{}' is disabled, skipping config validation", name);
                continue;
            }
            factory
                .validate(&source.config)
                .map_err(|e| anyhow::anyhow!("Source '{}': {}", name, e))?;
        }

        Ok(())
    }

    /// Get enabled sources
    pub fn enabled_sources(&self) -> impl Iterator<Item = (&String, &SourceConfig)> {
        self.sources.iter().filter(|(_, s)| s.enabled)
    }
}
