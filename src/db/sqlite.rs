use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::info;

use crate::db::models::{push_patch, SessionRow, OPEN_STATUS_GUARD, SESSION_COLUMNS};
use crate::db::store::{SessionStore, StoreError};
use crate::types::{AnalysisSession, NewSession, SessionPatch};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// Embedded, file-backed session store for self-hosted installs.
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Open (creating if missing) the database file at `path` and run migrations.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::Database(sqlx::Error::Io(e)))?;
            }
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{path}"))?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        MIGRATOR.run(&pool).await?;
        info!("SQLite session store ready at {path}");
        Ok(Self { pool })
    }

    /// Private in-memory database. One connection, so every query sees the same data.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM analysis_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn apply_patch(&self, id: &str, patch: &SessionPatch, guarded: bool) -> Result<u64, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE analysis_sessions SET ");
        push_patch(&mut qb, patch, Utc::now().timestamp_millis());
        qb.push(" WHERE id = ");
        qb.push_bind(id.to_string());
        if guarded {
            qb.push(OPEN_STATUS_GUARD);
        }
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn create(&self, session: NewSession) -> Result<String, StoreError> {
        let started_at = session.started_at.timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO analysis_sessions (
                id, user_id, market_url, platform, market_identifier,
                status, started_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, 'pending', ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.market_url)
        .bind(session.platform.as_str())
        .bind(&session.market_identifier)
        .bind(started_at)
        .bind(started_at)
        .bind(started_at)
        .execute(&self.pool)
        .await?;
        Ok(session.id)
    }

    async fn update(&self, id: &str, patch: &SessionPatch) -> Result<(), StoreError> {
        if self.apply_patch(id, patch, false).await? == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn update_if_open(&self, id: &str, patch: &SessionPatch) -> Result<bool, StoreError> {
        if self.apply_patch(id, patch, true).await? > 0 {
            return Ok(true);
        }
        if self.exists(id).await? {
            Ok(false)
        } else {
            Err(StoreError::NotFound(id.to_string()))
        }
    }

    async fn get_history(
        &self,
        user_id: &str,
        limit: i64,
        completed_only: bool,
    ) -> Result<Vec<AnalysisSession>, StoreError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM analysis_sessions \
             WHERE user_id = ? {} \
             ORDER BY completed_at DESC NULLS LAST, started_at DESC \
             LIMIT ?",
            if completed_only { "AND status = 'completed'" } else { "" }
        );
        let rows: Vec<SessionRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(AnalysisSession::try_from).collect()
    }

    async fn get_by_id(&self, id: &str, user_id: &str) -> Result<Option<AnalysisSession>, StoreError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM analysis_sessions WHERE id = ? AND user_id = ?");
        let row: Option<SessionRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(AnalysisSession::try_from).transpose()
    }

    async fn delete(&self, id: &str, user_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM analysis_sessions WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
