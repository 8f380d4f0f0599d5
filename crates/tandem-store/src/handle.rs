//! Async access to the [`Database`].
//!
//! `rusqlite::Connection` is blocking and not `Sync`, so the handle keeps it
//! behind a mutex and runs each call on tokio's blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::database::Database;
use crate::error::{Result, StoreError};

/// Cheaply cloneable, shared handle to one open database.
#[derive(Clone)]
pub struct StoreHandle {
    db: Arc<Mutex<Database>>,
}

impl StoreHandle {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open_at(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Run `f` against the database on the blocking thread pool.
    pub async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut guard = db.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::TaskJoin(e.to_string()))?
    }
}
