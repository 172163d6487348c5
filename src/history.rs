//! Download history: the persisted set of record ids already fetched.
//!
//! The store keeps a single JSON list, so every `add` is a read-merge-write of
//! the whole list. Writers go through one async mutex so concurrent successes
//! never lose an entry.

use crate::db::Database;
use crate::error::Result;
use crate::types::Task;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Idempotent membership and append over the persisted history list
pub struct HistoryStore {
    db: Arc<Database>,
    write_lock: Mutex<()>,
}

impl HistoryStore {
    /// Wrap the database's history list
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            write_lock: Mutex::new(()),
        }
    }

    /// Whether `unique_id` was already recorded
    pub async fn contains(&self, unique_id: &str) -> Result<bool> {
        let ids = self.db.load_history_list().await?;
        Ok(ids.iter().any(|id| id == unique_id))
    }

    /// Record `unique_id`; returns `false` when it was already present
    pub async fn add(&self, unique_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let mut ids = self.db.load_history_list().await?;
        if ids.iter().any(|id| id == unique_id) {
            return Ok(false);
        }
        ids.push(unique_id.to_string());
        self.db.store_history_list(&ids).await?;

        tracing::debug!(unique_id, size = ids.len(), "history updated");
        Ok(true)
    }

    /// Block history writers until the guard drops
    #[cfg(test)]
    pub(crate) async fn lock_writes(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    /// Forget every recorded id
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.db.clear_history_list().await
    }

    /// All recorded ids
    pub async fn snapshot(&self) -> Result<HashSet<String>> {
        Ok(self.db.load_history_list().await?.into_iter().collect())
    }

    /// Number of recorded ids
    pub async fn len(&self) -> Result<usize> {
        Ok(self.snapshot().await?.len())
    }

    /// Whether nothing has been recorded
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Drop tasks whose record was already downloaded, keeping order
    pub async fn filter_new(&self, tasks: Vec<Task>) -> Result<Vec<Task>> {
        let seen = self.snapshot().await?;
        Ok(tasks
            .into_iter()
            .filter(|t| !seen.contains(&t.unique_id))
            .collect())
    }
}
