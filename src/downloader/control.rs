//! Run control: stop, reset, history and settings management.

use crate::config::SourceSettings;
use crate::error::Result;
use crate::types::{Event, Progress};

use super::BitableDownloader;

impl BitableDownloader {
    /// Stop the active run
    ///
    /// Pending tasks are discarded and never executed. Executions already in
    /// flight get up to `stop_wait_timeout` to settle; the run then finalizes
    /// in the stopped state whether or not they did. Returns once finalized.
    ///
    /// A stopped run must be [`reset`](Self::reset) before the next start.
    /// Fails with [`crate::Error::InvalidState`] when no run is active.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use bitable_dl::*;
    /// # async fn example(downloader: BitableDownloader) -> Result<()> {
    /// let _run = downloader.start(None).await?;
    /// downloader.stop().await?;
    /// downloader.reset()?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn stop(&self) -> Result<()> {
        self.scheduler.request_stop()?;
        self.scheduler.wait_until_settled().await;
        Ok(())
    }

    /// Return a finalized run to idle, clearing progress counters
    ///
    /// The download history is left untouched.
    pub fn reset(&self) -> Result<()> {
        self.scheduler.reset()?;
        tracing::debug!("run state reset");
        Ok(())
    }

    /// Forget every downloaded record so the next run fetches them again
    pub async fn clear_history(&self) -> Result<()> {
        self.history.clear().await?;
        tracing::info!("download history cleared");
        self.emit_event(Event::HistoryCleared);
        Ok(())
    }

    /// Number of records in the download history
    pub async fn history_len(&self) -> Result<usize> {
        self.history.len().await
    }

    /// Current run progress
    pub fn progress(&self) -> Progress {
        self.scheduler.progress()
    }

    /// Wait until no run is active
    pub async fn wait_until_idle(&self) {
        self.scheduler.wait_until_settled().await;
    }

    /// Load the persisted source settings
    pub async fn settings(&self) -> Result<SourceSettings> {
        self.db.load_source_settings().await
    }

    /// Persist source settings for later runs
    pub async fn save_settings(&self, settings: &SourceSettings) -> Result<()> {
        self.db.save_source_settings(settings).await?;
        tracing::info!(
            app_id = %crate::utils::mask_sensitive(&settings.app_id, 4, 4),
            table_id = %settings.table_id,
            "settings saved"
        );
        Ok(())
    }
}
