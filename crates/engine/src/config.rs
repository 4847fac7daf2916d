use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::session::{DatabaseConfig, DatabaseType};
use crate::workflow::ExecutorConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub engine: EngineConfig,
    pub content: ContentConfig,
    pub commands: CommandConfig,
    pub database: DatabaseConfig,
    pub verification: VerificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub max_auto_steps: usize,
    pub history_limit: usize,
    pub action_timeout_secs: u64,
    /// Workflow started when a message arrives for an idle session
    pub auto_start_workflow: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_auto_steps: 25,
            history_limit: 50,
            action_timeout_secs: 10,
            auto_start_workflow: None,
        }
    }
}

impl EngineConfig {
    pub fn executor(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_auto_steps: self.max_auto_steps,
            history_limit: self.history_limit,
        }
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    pub workflows_dir: PathBuf,
    pub locales_dir: PathBuf,
    pub default_locale: String,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            workflows_dir: PathBuf::from("workflows"),
            locales_dir: PathBuf::from("locales"),
            default_locale: "fr".to_string(),
        }
    }
}

/// Words recognised as system commands, compared case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    pub back: Vec<String>,
    pub cancel: Vec<String>,
    pub restart: Vec<String>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            back: vec!["retour".to_string(), "back".to_string()],
            cancel: vec!["annuler".to_string(), "cancel".to_string()],
            restart: vec!["recommencer".to_string(), "restart".to_string()],
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct VerificationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Bearer token for the gateway, never logged
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,
}

impl std::fmt::Debug for VerificationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationConfig")
            .field("base_url", &self.base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            content: ContentConfig::default(),
            commands: CommandConfig::default(),
            database: DatabaseConfig::default(),
            verification: VerificationConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> crate::Result<Self> {
        // Load environment variables from .env file if it exists
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let config = Config {
            engine: EngineConfig {
                max_auto_steps: parse_var(&var, "ENGINE_MAX_AUTO_STEPS", defaults.engine.max_auto_steps)?,
                history_limit: parse_var(&var, "ENGINE_HISTORY_LIMIT", defaults.engine.history_limit)?,
                action_timeout_secs: parse_var(
                    &var,
                    "ACTION_TIMEOUT_SECS",
                    defaults.engine.action_timeout_secs,
                )?,
                auto_start_workflow: var("AUTO_START_WORKFLOW"),
            },
            content: ContentConfig {
                workflows_dir: var("WORKFLOWS_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.content.workflows_dir),
                locales_dir: var("LOCALES_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.content.locales_dir),
                default_locale: var("DEFAULT_LOCALE").unwrap_or(defaults.content.default_locale),
            },
            commands: CommandConfig {
                back: var("BACK_COMMANDS").map(|v| split_list(&v)).unwrap_or(defaults.commands.back),
                cancel: var("CANCEL_COMMANDS")
                    .map(|v| split_list(&v))
                    .unwrap_or(defaults.commands.cancel),
                restart: var("RESTART_COMMANDS")
                    .map(|v| split_list(&v))
                    .unwrap_or(defaults.commands.restart),
            },
            database: DatabaseConfig {
                db_type: match var("DATABASE_TYPE")
                    .unwrap_or_else(|| "memory".to_string())
                    .to_lowercase()
                    .as_str()
                {
                    "memory" => DatabaseType::Memory,
                    "sqlite" => DatabaseType::Sqlite,
                    other => {
                        return Err(crate::Error::Config(format!(
                            "Unsupported DATABASE_TYPE `{}`",
                            other
                        )))
                    }
                },
                sqlite_path: Some(
                    var("SQLITE_PATH")
                        .map(PathBuf::from)
                        .unwrap_or_else(|| PathBuf::from("data/sessions.db")),
                ),
                max_connections: parse_var(
                    &var,
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                )?,
            },
            verification: VerificationConfig {
                base_url: var("VERIFICATION_BASE_URL"),
                auth_token: var("VERIFICATION_AUTH_TOKEN"),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.engine.max_auto_steps == 0 {
            return Err(crate::Error::Config("ENGINE_MAX_AUTO_STEPS must be at least 1".into()));
        }
        if self.engine.history_limit < 2 {
            return Err(crate::Error::Config("ENGINE_HISTORY_LIMIT must be at least 2".into()));
        }
        if self.engine.action_timeout_secs == 0 {
            return Err(crate::Error::Config("ACTION_TIMEOUT_SECS must be at least 1".into()));
        }
        self.database.validate().map_err(crate::Error::Config)?;
        Ok(())
    }
}

fn parse_var<F, T>(var: &F, key: &str, default: T) -> crate::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| crate::Error::Config(format!("Invalid value `{}` for {}", raw, key))),
        None => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(pairs: &[(&str, &str)]) -> crate::Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_map(&[]).unwrap();
        assert_eq!(config.engine.max_auto_steps, 25);
        assert_eq!(config.engine.history_limit, 50);
        assert_eq!(config.engine.action_timeout(), Duration::from_secs(10));
        assert_eq!(config.content.default_locale, "fr");
        assert_eq!(config.database.db_type, DatabaseType::Memory);
        assert!(config.engine.auto_start_workflow.is_none());
        assert!(config.commands.back.contains(&"retour".to_string()));
    }

    #[test]
    fn test_overrides() {
        let config = from_map(&[
            ("ENGINE_MAX_AUTO_STEPS", "10"),
            ("AUTO_START_WORKFLOW", "onboarding"),
            ("CANCEL_COMMANDS", " Stop, QUIT ,,"),
            ("DATABASE_TYPE", "SQLite"),
            ("SQLITE_PATH", ":memory:"),
        ])
        .unwrap();
        assert_eq!(config.engine.max_auto_steps, 10);
        assert_eq!(config.engine.auto_start_workflow.as_deref(), Some("onboarding"));
        assert_eq!(config.commands.cancel, vec!["stop", "quit"]);
        assert_eq!(config.database.db_type, DatabaseType::Sqlite);
        assert_eq!(config.database.sqlite_path, Some(PathBuf::from(":memory:")));
    }

    #[test]
    fn test_auth_token_is_redacted() {
        let config = from_map(&[
            ("VERIFICATION_BASE_URL", "http://gateway.local"),
            ("VERIFICATION_AUTH_TOKEN", "s3cret"),
        ])
        .unwrap();
        assert_eq!(config.verification.auth_token.as_deref(), Some("s3cret"));
        assert!(!format!("{:?}", config).contains("s3cret"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(from_map(&[("ENGINE_MAX_AUTO_STEPS", "many")]).is_err());
        assert!(from_map(&[("ENGINE_MAX_AUTO_STEPS", "0")]).is_err());
        assert!(from_map(&[("DATABASE_TYPE", "postgres")]).is_err());
        assert!(from_map(&[("DATABASE_MAX_CONNECTIONS", "0")]).is_err());
    }
}
