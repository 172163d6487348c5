//! Run orchestration: fetch, normalize, resolve, deduplicate, dispatch.

use super::BitableDownloader;
use super::executor::TaskExecutor;
use crate::config::SourceSettings;
use crate::error::Result;
use crate::normalize::{FieldMapping, normalize};
use crate::resolver::resolve_attachments;
use crate::source::{Credentials, RecordQuery};
use crate::types::{Event, FinishKind, RunSummary, Task};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Why a run ended before anything was dispatched
enum EarlyFinish {
    Cancelled,
    NoRecords,
    NoTasks,
    AllDownloaded,
    Error(String),
}

impl BitableDownloader {
    /// Start a run with the persisted source settings
    ///
    /// `start_script_no` keeps only records whose script number is at least this
    /// one; it is never persisted.
    ///
    /// Returns a handle resolving to the run's summary. Fails with
    /// [`crate::Error::InvalidState`] when a run is already active or a stopped
    /// run has not been reset.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use bitable_dl::*;
    /// # async fn example(downloader: BitableDownloader) -> Result<()> {
    /// let run = downloader.start(Some("AIT000100")).await?;
    /// let summary = run.await.map_err(|e| Error::Other(e.to_string()))?;
    /// println!("{} of {} started", summary.completed, summary.total);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn start(&self, start_script_no: Option<&str>) -> Result<JoinHandle<RunSummary>> {
        let settings = self.db.load_source_settings().await?;
        self.start_with_settings(settings, start_script_no)
    }

    /// Start a run with explicit source settings
    pub fn start_with_settings(
        &self,
        settings: SourceSettings,
        start_script_no: Option<&str>,
    ) -> Result<JoinHandle<RunSummary>> {
        let settings = settings.trimmed();
        let cancel = self.scheduler.begin()?;
        self.emit_event(Event::RunStarted);
        tracing::info!(
            app_id = %crate::utils::mask_sensitive(&settings.app_id, 4, 4),
            table_id = %settings.table_id,
            start_script_no,
            "run started"
        );

        let this = self.clone();
        let start_script_no = start_script_no
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Ok(tokio::spawn(async move {
            this.run_pipeline(settings, start_script_no, cancel).await
        }))
    }

    async fn run_pipeline(
        &self,
        settings: SourceSettings,
        start_script_no: Option<String>,
        cancel: CancellationToken,
    ) -> RunSummary {
        let tasks = match self.prepare(&settings, start_script_no, &cancel).await {
            Ok(tasks) => tasks,
            Err(early) => return self.finish_early(early, &cancel),
        };

        let executor = Arc::new(TaskExecutor::new(
            self.services.transfer.clone(),
            settings.save_dir_or_default(),
            self.config.download.submit_timeout,
        ));
        let summary = self
            .scheduler
            .run(tasks, cancel, executor, self.history.clone(), &self.event_tx)
            .await;

        self.emit_finished(&summary);
        summary
    }

    /// Produce the deduplicated task list, or the reason there is nothing to run
    async fn prepare(
        &self,
        settings: &SourceSettings,
        start_script_no: Option<String>,
        cancel: &CancellationToken,
    ) -> std::result::Result<Vec<Task>, EarlyFinish> {
        settings.validate().map_err(|e| EarlyFinish::Error(e.to_string()))?;

        let credentials = Credentials {
            app_id: settings.app_id.clone(),
            app_secret: settings.app_secret.clone(),
        };
        let token = cancellable(cancel, self.services.source.authenticate(&credentials)).await?;

        let mut field_names = vec![settings.field_video.clone()];
        if let Some(script) = settings.script_field() {
            field_names.push(script.to_string());
        }
        let query = RecordQuery {
            base_token: settings.base_token.clone(),
            table_id: settings.table_id.clone(),
            field_names,
        };
        let records = cancellable(cancel, self.services.source.fetch_records(&token, &query)).await?;

        self.emit_event(Event::RecordsFetched {
            count: records.len(),
        });
        if records.is_empty() {
            return Err(EarlyFinish::NoRecords);
        }

        let mapping = FieldMapping {
            field_video: settings.field_video.clone(),
            field_script: settings.script_field().map(str::to_string),
            start_script_no,
        };
        let normalized = normalize(&records, &mapping);
        if let Some(missing) = normalized.missing_field {
            return Err(EarlyFinish::Error(missing.to_string()));
        }

        let mut tasks = normalized.tasks;
        if !normalized.pending.is_empty() {
            let resolved = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EarlyFinish::Cancelled),
                resolved = resolve_attachments(
                    self.services.resolver.as_ref(),
                    &token,
                    normalized.pending,
                ) => resolved,
            };
            tasks.extend(resolved);
        }

        self.emit_event(Event::TasksParsed {
            tasks: tasks.len(),
            stats: normalized.stats,
        });
        tracing::info!(tasks = tasks.len(), stats = ?normalized.stats, "records parsed");
        if tasks.is_empty() {
            return Err(EarlyFinish::NoTasks);
        }

        let parsed = tasks.len();
        let tasks = self
            .history
            .filter_new(tasks)
            .await
            .map_err(|e| EarlyFinish::Error(e.to_string()))?;
        self.emit_event(Event::Deduplicated {
            parsed,
            new: tasks.len(),
        });
        tracing::info!(parsed, new = tasks.len(), "deduplicated against history");
        if tasks.is_empty() {
            return Err(EarlyFinish::AllDownloaded);
        }

        if cancel.is_cancelled() {
            return Err(EarlyFinish::Cancelled);
        }
        Ok(tasks)
    }

    fn finish_early(&self, early: EarlyFinish, cancel: &CancellationToken) -> RunSummary {
        match &early {
            EarlyFinish::Cancelled => tracing::info!("run stopped before dispatch"),
            EarlyFinish::NoRecords => tracing::info!("no records in table"),
            EarlyFinish::NoTasks => tracing::info!("no links parsed"),
            EarlyFinish::AllDownloaded => tracing::info!("all files already downloaded"),
            EarlyFinish::Error(message) => {
                tracing::error!(error = %message, "run failed");
                self.emit_event(Event::RunError {
                    message: message.clone(),
                });
            }
        }

        let kind = if cancel.is_cancelled() {
            FinishKind::Stopped
        } else {
            FinishKind::Completed
        };
        let summary = self.scheduler.finish(kind, 0, 0);
        self.emit_finished(&summary);
        summary
    }

    fn emit_finished(&self, summary: &RunSummary) {
        tracing::info!(
            kind = ?summary.kind,
            completed = summary.completed,
            total = summary.total,
            abandoned = summary.abandoned,
            "run finished"
        );
        self.emit_event(Event::RunFinished {
            kind: summary.kind,
            completed: summary.completed,
            total: summary.total,
        });
    }
}

/// Await a fallible stage unless the run is stopped first
async fn cancellable<T>(
    cancel: &CancellationToken,
    stage: impl Future<Output = Result<T>>,
) -> std::result::Result<T, EarlyFinish> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EarlyFinish::Cancelled),
        result = stage => result.map_err(|e| {
            if e.is_remote() {
                tracing::warn!(error = %e, "remote call failed");
            }
            EarlyFinish::Error(e.to_string())
        }),
    }
}
