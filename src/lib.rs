//! # bitable-dl
//!
//! Bulk media downloader for Feishu/Lark Bitable tables.
//!
//! ## Design Philosophy
//!
//! bitable-dl is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Exactly-once per record** - A persisted history keeps later runs from
//!   fetching the same record twice
//! - **Bounded** - At most `max_concurrent_downloads` submissions are in flight
//!
//! ## Pipeline
//!
//! Records are fetched page by page, their media fields are normalized into
//! tasks (hyperlinks, URL text and attachment lists), attachment tokens are
//! resolved to temporary URLs, tasks already in the history are dropped, and
//! the rest are dispatched to the transfer backend.
//!
//! ## Quick Start
//!
//! ```no_run
//! use bitable_dl::{BitableDownloader, Config, SourceSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = BitableDownloader::new(Config::default()).await?;
//!
//!     downloader
//!         .save_settings(&SourceSettings {
//!             app_id: "cli_xxx".to_string(),
//!             app_secret: "secret".to_string(),
//!             base_token: "bascnXXX".to_string(),
//!             table_id: "tblXXX".to_string(),
//!             field_video: "Video".to_string(),
//!             field_script: "Script No".to_string(),
//!             save_dir: "FeishuVideos".to_string(),
//!         })
//!         .await?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let run = downloader.start(None).await?;
//!     let summary = run.await?;
//!     println!("{}/{} transfers started", summary.completed, summary.total);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Core downloader implementation (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Download history over the config store
pub mod history;
/// Record normalization into download tasks
pub mod normalize;
/// Attachment token resolution
pub mod resolver;
/// Remote record source and attachment resolver
pub mod source;
/// Transfer backends
pub mod transfer;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{Config, FileCollisionAction, SettingKey, SourceSettings};
pub use db::Database;
pub use downloader::{BitableDownloader, Services};
pub use error::{DatabaseError, Error, Result};
pub use history::HistoryStore;
pub use normalize::{FieldValue, Record};
pub use source::{AttachmentResolver, FeishuClient, RecordSource};
pub use transfer::{HttpTransfer, TransferBackend, TransferRequest};
pub use types::{
    Event, FinishKind, Outcome, ParseStats, Progress, RunPhase, RunSummary, Task, TransferHandle,
};

/// Helper function to run the downloader with graceful signal handling.
///
/// Waits for a termination signal, stops the active run (if any) and returns
/// once it has finalized.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use bitable_dl::{BitableDownloader, Config, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = BitableDownloader::new(Config::default()).await?;
///     let _run = downloader.start(None).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(downloader).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: BitableDownloader) -> Result<()> {
    wait_for_signal().await;
    match downloader.stop().await {
        Ok(()) => Ok(()),
        // Nothing running, or already finalized
        Err(Error::InvalidState { phase, .. }) => {
            tracing::debug!(%phase, "no active run to stop");
            downloader.wait_until_idle().await;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
