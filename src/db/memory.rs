use std::cmp::Reverse;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::db::store::{SessionStore, StoreError};
use crate::types::{AnalysisSession, NewSession, SessionPatch, SessionStatus};

/// Process-local session store. Nothing survives a restart.
///
/// The conditional update holds the entry's shard lock across the status check
/// and the write, so it is atomic with respect to other writers.
#[derive(Default)]
pub struct MemorySessionStore {
    /// session_id → session
    sessions: DashMap<String, AnalysisSession>,
}

impl MemorySessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, session: NewSession) -> Result<String, StoreError> {
        let id = session.id.clone();
        self.sessions.insert(id.clone(), session.into_session());
        Ok(id)
    }

    async fn update(&self, id: &str, patch: &SessionPatch) -> Result<(), StoreError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        patch.apply_to(&mut entry);
        Ok(())
    }

    async fn update_if_open(&self, id: &str, patch: &SessionPatch) -> Result<bool, StoreError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if entry.status.is_terminal() {
            return Ok(false);
        }
        patch.apply_to(&mut entry);
        Ok(true)
    }

    async fn get_history(
        &self,
        user_id: &str,
        limit: i64,
        completed_only: bool,
    ) -> Result<Vec<AnalysisSession>, StoreError> {
        let mut sessions: Vec<AnalysisSession> = self
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .filter(|s| !completed_only || s.status == SessionStatus::Completed)
            .map(|s| s.value().clone())
            .collect();
        // completed_at DESC NULLS LAST, then started_at DESC
        sessions.sort_by_key(|s| (s.completed_at.is_none(), Reverse(s.completed_at), Reverse(s.started_at)));
        sessions.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(sessions)
    }

    async fn get_by_id(&self, id: &str, user_id: &str) -> Result<Option<AnalysisSession>, StoreError> {
        Ok(self
            .sessions
            .get(id)
            .filter(|s| s.user_id == user_id)
            .map(|s| s.value().clone()))
    }

    async fn delete(&self, id: &str, user_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .sessions
            .remove_if(id, |_, s| s.user_id == user_id)
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Platform;
    use chrono::{Duration, Utc};

    fn new_session(id: &str, user: &str) -> NewSession {
        NewSession {
            id: id.to_string(),
            user_id: user.to_string(),
            market_url: format!("https://kalshi.com/markets/{id}"),
            platform: Platform::Kalshi,
            market_identifier: id.to_string(),
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn owner_filter_applies_to_reads_and_deletes() {
        let store = MemorySessionStore::new();
        store.create(new_session("a", "u1")).await.unwrap();
        assert!(store.get_by_id("a", "u2").await.unwrap().is_none());
        assert!(!store.delete("a", "u2").await.unwrap());
        assert_eq!(store.len(), 1);
        assert!(store.delete("a", "u1").await.unwrap());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn conditional_update_is_first_writer_wins() {
        let store = MemorySessionStore::new();
        store.create(new_session("a", "u1")).await.unwrap();
        let complete = SessionPatch {
            status: Some(SessionStatus::Completed),
            ..Default::default()
        };
        let fail = SessionPatch {
            status: Some(SessionStatus::Failed),
            error_message: Some("late".to_string()),
            ..Default::default()
        };
        assert!(store.update_if_open("a", &complete).await.unwrap());
        assert!(!store.update_if_open("a", &fail).await.unwrap());
        let s = store.get_by_id("a", "u1").await.unwrap().unwrap();
        assert_eq!(s.status, SessionStatus::Completed);
        assert!(s.error_message.is_none());
    }

    #[tokio::test]
    async fn history_sorts_completed_first_newest_first() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        store.create(new_session("open", "u1")).await.unwrap();
        for (id, ago) in [("older", 20), ("newer", 1)] {
            store.create(new_session(id, "u1")).await.unwrap();
            store
                .update(
                    id,
                    &SessionPatch {
                        status: Some(SessionStatus::Completed),
                        completed_at: Some(now - Duration::seconds(ago)),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        let all = store.get_history("u1", 10, false).await.unwrap();
        let ids: Vec<_> = all.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["newer", "older", "open"]);

        let completed = store.get_history("u1", 1, true).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, "newer");
    }
}
