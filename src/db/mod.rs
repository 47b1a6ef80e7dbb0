pub mod memory;
pub mod models;
pub mod postgres;
pub mod sqlite;
pub mod store;

use std::sync::Arc;

use crate::config::{Config, StoreBackend};

pub use memory::MemorySessionStore;
pub use postgres::PgSessionStore;
pub use sqlite::SqliteSessionStore;
pub use store::{SessionStore, StoreError};

/// Build the configured backend. Called once at startup.
pub async fn open_store(cfg: &Config) -> Result<Arc<dyn SessionStore>, StoreError> {
    let store: Arc<dyn SessionStore> = match cfg.store_backend {
        StoreBackend::Sqlite => Arc::new(SqliteSessionStore::open(&cfg.db_path).await?),
        StoreBackend::Postgres => {
            let url = cfg.database_url.as_deref().unwrap_or_default();
            Arc::new(PgSessionStore::connect(url, cfg.db_max_connections).await?)
        }
        StoreBackend::Memory => MemorySessionStore::new(),
    };
    Ok(store)
}
