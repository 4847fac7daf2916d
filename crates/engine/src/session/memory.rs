use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{session::SessionStore, workflow::WorkflowContext, Error, Result};

/// Process-local store, lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, WorkflowContext>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn load(&self, session_key: &str) -> Result<Option<WorkflowContext>> {
        Ok(self.sessions.read().await.get(session_key).cloned())
    }

    async fn save(
        &self,
        session_key: &str,
        context: &WorkflowContext,
        expected: Option<u64>,
    ) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let found = sessions.get(session_key).map(|stored| stored.version);
        if found != expected {
            return Err(Error::VersionConflict {
                session_key: session_key.to_string(),
                expected,
                found,
            });
        }

        debug!("Saving session {} at version {}", session_key, context.version);
        sessions.insert(session_key.to_string(), context.clone());
        Ok(())
    }

    async fn clear(&self, session_key: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if let Some(stored) = sessions.get_mut(session_key) {
            debug!("Clearing session {}", session_key);
            stored.clear();
            stored.version += 1;
        }
        Ok(())
    }
}
