use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use tracing::info;

use crate::db::models::{push_patch, SessionRow, OPEN_STATUS_GUARD, SESSION_COLUMNS};
use crate::db::store::{SessionStore, StoreError};
use crate::types::{AnalysisSession, NewSession, SessionPatch};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgres");

/// Remote relational session store for hosted deployments.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await?;
        MIGRATOR.run(&pool).await?;
        info!("PostgreSQL session store ready ({max_connections} max connections)");
        Ok(Self { pool })
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1::BIGINT FROM analysis_sessions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn apply_patch(&self, id: &str, patch: &SessionPatch, guarded: bool) -> Result<u64, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE analysis_sessions SET ");
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
impl SessionStore for PgSessionStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn create(&self, session: NewSession) -> Result<String, StoreError> {
        let started_at = session.started_at.timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO analysis_sessions (
                id, user_id, market_url, platform, market_identifier,
                status, started_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, 'pending', $6, $6, $6)
            "#,
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.market_url)
        .bind(session.platform.as_str())
        .bind(&session.market_identifier)
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
             WHERE user_id = $1 {} \
             ORDER BY completed_at DESC NULLS LAST, started_at DESC \
             LIMIT $2",
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
        let sql = format!("SELECT {SESSION_COLUMNS} FROM analysis_sessions WHERE id = $1 AND user_id = $2");
        let row: Option<SessionRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(AnalysisSession::try_from).transpose()
    }

    async fn delete(&self, id: &str, user_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM analysis_sessions WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
