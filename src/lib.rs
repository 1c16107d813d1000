//! Refbook: versioned reference dictionaries served over HTTP.
//!
//! Refbooks hold dated versions of code/value elements. Queries either name a
//! version explicitly or get the one in force today.

use std::sync::Arc;

pub mod api;
pub mod auth;
pub mod config;
pub mod fixtures;
pub mod postgres_storage;
pub mod query;
pub mod requests;
pub mod resolver;
pub mod sqlite_storage;
pub mod storage;

use config::{StorageBackendKind, StorageConfig};
use storage::{InMemoryStorage, RefbookStore, StorageError};

/// Opens the configured backend. SQLite and PostgreSQL clients block, so call
/// this outside the async runtime.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn RefbookStore>, StorageError> {
    let store: Arc<dyn RefbookStore> = match config.backend {
        StorageBackendKind::Memory => Arc::new(InMemoryStorage::new()),
        StorageBackendKind::Sqlite => Arc::new(sqlite_storage::SqliteStorage::new(&config.path)?),
        StorageBackendKind::Postgres => {
            let url = config.url.as_deref()
                .ok_or_else(|| StorageError::Other("storage.url is required for the postgres backend".to_string()))?;
            Arc::new(postgres_storage::PostgresStorage::new(url)?)
        }
    };
    Ok(store)
}
