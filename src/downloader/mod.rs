//! Core downloader implementation split into focused submodules.
//!
//! The `BitableDownloader` struct and its methods are organized by domain:
//! - [`pipeline`] - Run orchestration: fetch, normalize, resolve, deduplicate, dispatch
//! - [`control`] - Control surface (stop, reset, clear history, settings)
//! - [`scheduler`] - Bounded-concurrency queue and run state
//! - [`executor`] - Single-task submission with timeout

mod control;
mod executor;
mod pipeline;
mod scheduler;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::history::HistoryStore;
use crate::source::{AttachmentResolver, FeishuClient, RecordSource};
use crate::transfer::{HttpTransfer, TransferBackend};
use crate::types::Event;
use scheduler::QueueScheduler;
use std::sync::Arc;

/// Pluggable collaborators of the pipeline
#[derive(Clone)]
pub struct Services {
    /// Table record source
    pub source: Arc<dyn RecordSource>,
    /// Attachment token resolver
    pub resolver: Arc<dyn AttachmentResolver>,
    /// Transfer backend receiving one submission per task
    pub transfer: Arc<dyn TransferBackend>,
}

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct BitableDownloader {
    /// Database instance for settings and history
    /// Public for integration tests to inspect persisted state
    pub db: Arc<Database>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Download history over the database
    pub(crate) history: Arc<HistoryStore>,
    /// Run state and dispatch loop
    pub(crate) scheduler: Arc<QueueScheduler>,
    /// Source, resolver and transfer backend
    pub(crate) services: Services,
}

impl BitableDownloader {
    /// Create a new BitableDownloader instance
    ///
    /// This initializes all core components:
    /// - Opens/creates the SQLite database and runs migrations
    /// - Creates the Feishu API client and the HTTP transfer backend
    /// - Sets up the event broadcast channel
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(config.download_root())
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create download directory '{}': {}",
                        config.download_root().display(),
                        e
                    ),
                ))
            })?;

        let client = Arc::new(FeishuClient::new(
            config.api_base_url.clone(),
            config.download.request_timeout,
        )?);
        let transfer = Arc::new(HttpTransfer::new(
            config.download_root().clone(),
            config.download.request_timeout,
        )?);

        let services = Services {
            source: client.clone(),
            resolver: client,
            transfer,
        };

        Self::with_services(config, services).await
    }

    /// Create a downloader with custom source, resolver and transfer backend
    pub async fn with_services(config: Config, services: Services) -> Result<Self> {
        config.validate()?;

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);

        // Create broadcast channel with buffer size of 1000 events
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        let history = Arc::new(HistoryStore::new(db.clone()));
        let scheduler = Arc::new(QueueScheduler::new(&config.download));

        Ok(Self {
            db,
            event_tx,
            config: Arc::new(config),
            history,
            scheduler,
            services,
        })
    }

    /// Subscribe to run events
    ///
    /// Multiple subscribers each receive every event. A subscriber that falls
    /// more than 1000 events behind gets `RecvError::Lagged`.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Having no subscribers is not an error.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Static configuration this downloader was built with
    pub fn config(&self) -> &Config {
        &self.config
    }
}
