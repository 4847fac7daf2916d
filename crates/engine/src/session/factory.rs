use crate::session::{DatabaseConfig, DatabaseType, MemoryStore, SessionStore, SqliteStore};
use std::path::Path;
use std::sync::Arc;

pub async fn create_store(config: &DatabaseConfig) -> crate::Result<Arc<dyn SessionStore>> {
    config.validate().map_err(crate::Error::Config)?;

    match config.db_type {
        DatabaseType::Memory => Ok(Arc::new(MemoryStore::new())),
        DatabaseType::Sqlite => {
            let path = config
                .sqlite_path
                .as_ref()
                .ok_or_else(|| crate::Error::Config("SQLite path not configured".into()))?
                .to_str()
                .ok_or_else(|| crate::Error::Config("SQLite path is not valid UTF-8".into()))?;
            let url = if path == ":memory:" || path.starts_with("sqlite:") {
                path.to_string()
            } else {
                if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                format!("sqlite://{}", path)
            };
            Ok(Arc::new(SqliteStore::new(&url, config.max_connections).await?))
        }
    }
}
