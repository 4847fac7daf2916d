use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use tracing::{debug, error, info};

use crate::{session::SessionStore, workflow::WorkflowContext, Error, Result};

pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        info!("Connecting to SQLite database: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Every connection to `:memory:` opens its own database, so pin one
        // connection and never recycle it.
        let pool_options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections)
        };

        let pool = pool_options.connect_with(options).await.map_err(|e| {
            error!("Failed to connect to SQLite: {}", e);
            Error::Sqlx(e)
        })?;

        Ok(Self { pool })
    }

    async fn stored_version(&self, session_key: &str) -> Result<Option<u64>> {
        let row = sqlx::query("SELECT version FROM sessions WHERE session_key = ?1")
            .bind(session_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get::<i64, _>("version") as u64))
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn init(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to run migrations: {}", e);
                Error::Migrate(e)
            })?;

        Ok(())
    }

    async fn load(&self, session_key: &str) -> Result<Option<WorkflowContext>> {
        debug!("Loading session: {}", session_key);

        let row = sqlx::query("SELECT context, version FROM sessions WHERE session_key = ?1")
            .bind(session_key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.get("context");
                let mut context: WorkflowContext = serde_json::from_str(&raw)?;
                context.version = row.get::<i64, _>("version") as u64;
                Ok(Some(context))
            }
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        session_key: &str,
        context: &WorkflowContext,
        expected: Option<u64>,
    ) -> Result<()> {
        debug!("Saving session {} at version {}", session_key, context.version);

        let json = serde_json::to_string(context)?;
        let now = Utc::now().to_rfc3339();

        let result = match expected {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO sessions (session_key, context, version, updated_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(session_key) DO NOTHING
                    "#,
                )
                .bind(session_key)
                .bind(&json)
                .bind(context.version as i64)
                .bind(&now)
                .execute(&self.pool)
                .await?
            }
            Some(version) => {
                sqlx::query(
                    r#"
                    UPDATE sessions
                    SET context = ?1, version = ?2, updated_at = ?3
                    WHERE session_key = ?4 AND version = ?5
                    "#,
                )
                .bind(&json)
                .bind(context.version as i64)
                .bind(&now)
                .bind(session_key)
                .bind(version as i64)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(Error::VersionConflict {
                session_key: session_key.to_string(),
                expected,
                found: self.stored_version(session_key).await?,
            });
        }

        Ok(())
    }

    async fn clear(&self, session_key: &str) -> Result<()> {
        debug!("Clearing session: {}", session_key);

        let json = serde_json::to_string(&WorkflowContext::new())?;
        sqlx::query(
            r#"
            UPDATE sessions
            SET context = ?1, version = version + 1, updated_at = ?2
            WHERE session_key = ?3
            "#,
        )
        .bind(json)
        .bind(Utc::now().to_rfc3339())
        .bind(session_key)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
