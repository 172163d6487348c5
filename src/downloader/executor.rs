//! Task executor: one task, one submission, one settlement.

use crate::config::FileCollisionAction;
use crate::transfer::{TransferBackend, TransferRequest};
use crate::types::{Outcome, Task};
use crate::utils::{confine_relative_dir, sanitize_filename};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Submits tasks to the transfer backend under a submit timeout
pub(crate) struct TaskExecutor {
    backend: Arc<dyn TransferBackend>,
    save_dir: PathBuf,
    submit_timeout: Duration,
}

impl TaskExecutor {
    pub(crate) fn new(backend: Arc<dyn TransferBackend>, save_dir: &str, submit_timeout: Duration) -> Self {
        Self {
            backend,
            save_dir: confine_relative_dir(save_dir),
            submit_timeout,
        }
    }

    /// Relative destination: `<save_dir>/<sanitized filename>.<extension>`
    pub(crate) fn destination(&self, task: &Task) -> PathBuf {
        self.save_dir
            .join(format!("{}.{}", sanitize_filename(&task.filename), task.extension))
    }

    /// Submit one task and settle on whichever comes first: the backend's answer
    /// or the submit timeout
    ///
    /// A backend answer arriving after the timeout is logged and discarded.
    pub(crate) async fn execute(&self, task: &Task) -> Outcome {
        let Some(url) = task.url.as_deref().filter(|u| !u.is_empty()) else {
            tracing::warn!(unique_id = %task.unique_id, filename = %task.filename, "task has no URL");
            return Outcome::Rejected("empty url".to_string());
        };

        let request = TransferRequest {
            url: url.to_string(),
            destination: self.destination(task),
            collision: FileCollisionAction::Rename,
        };
        tracing::debug!(
            filename = %task.filename,
            destination = %request.destination.display(),
            "submitting transfer"
        );

        let (tx, rx) = oneshot::channel();
        let backend = self.backend.clone();
        let filename = task.filename.clone();
        tokio::spawn(async move {
            let result = backend.submit(request).await;
            if let Err(late) = tx.send(result) {
                match late {
                    Ok(handle) => {
                        tracing::debug!(%filename, %handle, "late acceptance after timeout ignored")
                    }
                    Err(e) => {
                        tracing::debug!(%filename, error = %e, "late failure after timeout ignored")
                    }
                }
            }
        });

        tokio::select! {
            biased;
            answer = rx => match answer {
                Ok(Ok(handle)) => Outcome::Accepted(handle),
                Ok(Err(e)) => Outcome::Rejected(e.to_string()),
                Err(_) => Outcome::Rejected("transfer submission aborted".to_string()),
            },
            _ = tokio::time::sleep(self.submit_timeout) => Outcome::TimedOutPossiblyAccepted,
        }
    }
}
