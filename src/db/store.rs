use async_trait::async_trait;
use thiserror::Error;

use crate::types::{AnalysisSession, NewSession, SessionPatch};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("session {0} not found")]
    NotFound(String),

    #[error("corrupt session row {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Persistence contract for analysis sessions.
///
/// Backends are chosen once at startup; everything above this trait is
/// backend-agnostic. Reads and deletes always filter on the owning user.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Short backend name for logs and `/health`.
    fn backend(&self) -> &'static str;

    async fn create(&self, session: NewSession) -> Result<String, StoreError>;

    /// Apply `patch` unconditionally. `NotFound` if no row has `id`.
    async fn update(&self, id: &str, patch: &SessionPatch) -> Result<(), StoreError>;

    /// Apply `patch` only while the session is not yet terminal.
    ///
    /// Returns `Ok(false)` when the row exists but is already terminal, in which
    /// case nothing was written. `NotFound` if no row has `id`.
    async fn update_if_open(&self, id: &str, patch: &SessionPatch) -> Result<bool, StoreError>;

    /// Sessions owned by `user_id`, most recently completed first.
    async fn get_history(
        &self,
        user_id: &str,
        limit: i64,
        completed_only: bool,
    ) -> Result<Vec<AnalysisSession>, StoreError>;

    async fn get_by_id(&self, id: &str, user_id: &str) -> Result<Option<AnalysisSession>, StoreError>;

    /// Returns whether a row was removed.
    async fn delete(&self, id: &str, user_id: &str) -> Result<bool, StoreError>;
}
