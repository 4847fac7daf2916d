mod config;
mod factory;
mod memory;
mod sqlite;

pub use config::{DatabaseConfig, DatabaseType};
pub use factory::create_store;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::workflow::WorkflowContext;

/// Persistence port for per-session workflow contexts.
///
/// Writes are optimistic: `save` succeeds only if the stored version still
/// equals `expected` (`None` meaning nothing is stored yet), otherwise it
/// fails with [`crate::Error::VersionConflict`]. The version written is the
/// one carried by the context.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    // Prepare the backing storage
    async fn init(&self) -> crate::Result<()>;

    async fn load(&self, session_key: &str) -> crate::Result<Option<WorkflowContext>>;

    async fn save(
        &self,
        session_key: &str,
        context: &WorkflowContext,
        expected: Option<u64>,
    ) -> crate::Result<()>;

    /// Unconditionally reset the session. A cleared session keeps its
    /// version (bumped), so stale writers still conflict afterwards.
    async fn clear(&self, session_key: &str) -> crate::Result<()>;
}
