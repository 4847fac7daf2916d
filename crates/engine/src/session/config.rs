use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub db_type: DatabaseType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<PathBuf>,

    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Memory,
    Sqlite,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: DatabaseType::Memory,
            sqlite_path: None,
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            db_type: DatabaseType::Sqlite,
            sqlite_path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.db_type == DatabaseType::Sqlite && self.sqlite_path.is_none() {
            return Err("SQLite path is required for SQLite database type".to_string());
        }
        if self.max_connections == 0 {
            return Err("max_connections must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(DatabaseConfig::default().validate().is_ok());
        assert!(DatabaseConfig::sqlite("data/sessions.db").validate().is_ok());

        let missing_path = DatabaseConfig {
            db_type: DatabaseType::Sqlite,
            ..Default::default()
        };
        assert!(missing_path.validate().is_err());

        let no_connections = DatabaseConfig {
            max_connections: 0,
            ..Default::default()
        };
        assert!(no_connections.validate().is_err());
    }
}
