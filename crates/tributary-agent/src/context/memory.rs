//! In-memory checkpoint backend

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{Context, ContextKind};
use crate::error::ConnectorResult;

/// Checkpoint context that lives only as long as the process
#[derive(Debug, Default)]
pub struct MemoryContext {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored names
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Whether nothing has been stored
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

#[async_trait]
impl Context for MemoryContext {
    async fn store(&self, name: &str, value: &str) -> ConnectorResult<()> {
        self.values
            .write()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn load(&self, name: &str) -> ConnectorResult<Option<String>> {
        Ok(self.values.read().get(name).cloned())
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Memory
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
