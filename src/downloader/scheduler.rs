//! Queue scheduler: bounded-concurrency dispatch with cooperative stop.
//!
//! One scheduler owns the run state for the lifetime of the downloader. A run
//! moves through `idle -> running -> (stopping | completing) -> idle`, with
//! `stopped` as a parking state that only [`QueueScheduler::reset`] leaves.
//!
//! All counter updates happen on the task driving [`QueueScheduler::run`];
//! executions overlap in wall-clock time but settle one at a time through the
//! `JoinSet`.

use super::executor::TaskExecutor;
use crate::config::DownloadConfig;
use crate::error::{Error, Result};
use crate::history::HistoryStore;
use crate::types::{Event, FinishKind, Outcome, Progress, RunPhase, RunSummary, Task};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, interval_at, sleep_until};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct RunState {
    phase: RunPhase,
    completed: usize,
    total: usize,
    active: usize,
    cancel: Option<CancellationToken>,
}

/// Run-state owner and dispatch loop
pub(crate) struct QueueScheduler {
    limit: usize,
    stop_wait_timeout: Duration,
    stop_poll_interval: Duration,
    state: Mutex<RunState>,
    phase_tx: watch::Sender<RunPhase>,
}

impl QueueScheduler {
    pub(crate) fn new(config: &DownloadConfig) -> Self {
        let (phase_tx, _rx) = watch::channel(RunPhase::Idle);
        Self {
            limit: config.max_concurrent_downloads.max(1),
            stop_wait_timeout: config.stop_wait_timeout,
            stop_poll_interval: config.stop_poll_interval,
            state: Mutex::new(RunState::default()),
            phase_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        // State stays consistent across a panic in a holder; keep going
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_phase(&self, state: &mut RunState, phase: RunPhase) {
        state.phase = phase;
        self.phase_tx.send_replace(phase);
    }

    /// Claim the scheduler for a new run
    ///
    /// Only accepted from `idle`; counters are reset and a fresh cancellation
    /// token is handed out for the run.
    pub(crate) fn begin(&self) -> Result<CancellationToken> {
        let mut state = self.lock();
        if state.phase != RunPhase::Idle {
            return Err(Error::InvalidState {
                operation: "start".to_string(),
                phase: state.phase.to_string(),
            });
        }
        let cancel = CancellationToken::new();
        state.completed = 0;
        state.total = 0;
        state.active = 0;
        state.cancel = Some(cancel.clone());
        self.set_phase(&mut state, RunPhase::Running);
        Ok(cancel)
    }

    /// Ask the current run to stop
    ///
    /// Repeated requests while already stopping are accepted and do nothing.
    pub(crate) fn request_stop(&self) -> Result<()> {
        let mut state = self.lock();
        match state.phase {
            RunPhase::Running => {
                self.set_phase(&mut state, RunPhase::DrainingStop);
                if let Some(cancel) = &state.cancel {
                    cancel.cancel();
                }
                tracing::info!(
                    active = state.active,
                    completed = state.completed,
                    total = state.total,
                    "stop requested"
                );
                Ok(())
            }
            RunPhase::DrainingStop => Ok(()),
            phase => Err(Error::InvalidState {
                operation: "stop".to_string(),
                phase: phase.to_string(),
            }),
        }
    }

    /// Return a finalized scheduler to the idle baseline
    pub(crate) fn reset(&self) -> Result<()> {
        let mut state = self.lock();
        if state.phase.is_active() {
            return Err(Error::InvalidState {
                operation: "reset".to_string(),
                phase: state.phase.to_string(),
            });
        }
        state.completed = 0;
        state.total = 0;
        state.active = 0;
        state.cancel = None;
        self.set_phase(&mut state, RunPhase::Idle);
        Ok(())
    }

    pub(crate) fn progress(&self) -> Progress {
        let state = self.lock();
        Progress {
            completed: state.completed,
            total: state.total,
            active: state.active,
            phase: state.phase,
        }
    }

    /// Finalize the run; a stopped run parks in `stopped` until reset
    pub(crate) fn finish(&self, kind: FinishKind, abandoned: usize, still_active: usize) -> RunSummary {
        let mut state = self.lock();
        state.cancel = None;
        let next = match kind {
            FinishKind::Completed => RunPhase::Idle,
            FinishKind::Stopped => RunPhase::Stopped,
        };
        self.set_phase(&mut state, next);
        RunSummary {
            kind,
            completed: state.completed,
            total: state.total,
            abandoned,
            still_active,
        }
    }

    /// Wait until no run owns the scheduler
    pub(crate) async fn wait_until_settled(&self) {
        let mut rx = self.phase_tx.subscribe();
        let _ = rx.wait_for(|phase| !phase.is_active()).await;
    }

    /// Dispatch `tasks` until the queue drains or `cancel` fires
    pub(crate) async fn run(
        &self,
        tasks: Vec<Task>,
        cancel: CancellationToken,
        executor: Arc<TaskExecutor>,
        history: Arc<HistoryStore>,
        events: &broadcast::Sender<Event>,
    ) -> RunSummary {
        let total = tasks.len();
        {
            let mut state = self.lock();
            state.total = total;
            state.completed = 0;
        }
        tracing::info!(total, limit = self.limit, "dispatching tasks");

        let mut pending: VecDeque<Task> = tasks.into();
        let mut running: JoinSet<(Task, Outcome)> = JoinSet::new();

        let stopped = loop {
            if !cancel.is_cancelled() {
                while running.len() < self.limit
                    && let Some(task) = pending.pop_front()
                {
                    self.admit(task, &mut running, &executor, events);
                }
            }

            if running.is_empty() {
                break cancel.is_cancelled();
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break true,
                joined = running.join_next() => {
                    if let Some(joined) = joined {
                        self.settle(joined, &cancel, &history, events).await;
                    }
                }
            }
        };

        if !stopped {
            {
                let mut state = self.lock();
                self.set_phase(&mut state, RunPhase::Completing);
            }
            let summary = self.finish(FinishKind::Completed, 0, 0);
            tracing::info!(completed = summary.completed, total, "queue drained");
            return summary;
        }

        let abandoned = pending.len();
        pending.clear();
        tracing::info!(abandoned, active = running.len(), "discarded pending tasks");
        let _ = events.send(Event::Stopping { abandoned });

        let still_active = self.drain(&mut running).await;
        if still_active > 0 {
            tracing::warn!(
                active = still_active,
                "stop wait elapsed; transfers may still be running in the background"
            );
            let _ = events.send(Event::BackgroundTransfers {
                active: still_active,
            });
            running.detach_all();
        }

        self.finish(FinishKind::Stopped, abandoned, still_active)
    }

    fn admit(
        &self,
        task: Task,
        running: &mut JoinSet<(Task, Outcome)>,
        executor: &Arc<TaskExecutor>,
        events: &broadcast::Sender<Event>,
    ) {
        let active = {
            let mut state = self.lock();
            state.active += 1;
            state.active
        };
        tracing::debug!(
            unique_id = %task.unique_id,
            filename = %task.filename,
            active,
            "starting task"
        );
        let _ = events.send(Event::TaskStarted {
            unique_id: task.unique_id.clone(),
            filename: task.filename.clone(),
        });

        let executor = executor.clone();
        running.spawn(async move {
            let outcome = executor.execute(&task).await;
            (task, outcome)
        });
    }

    fn release_slot(&self) -> usize {
        let mut state = self.lock();
        state.active = state.active.saturating_sub(1);
        state.active
    }

    /// Apply the user-visible effects of one settlement during a live run
    async fn settle(
        &self,
        joined: std::result::Result<(Task, Outcome), JoinError>,
        cancel: &CancellationToken,
        history: &HistoryStore,
        events: &broadcast::Sender<Event>,
    ) {
        let (task, outcome) = match joined {
            Ok(settled) => settled,
            Err(e) => {
                self.release_slot();
                tracing::error!(error = %e, "task execution aborted");
                return;
            }
        };

        if outcome.counts_as_success()
            && let Err(e) = history.add(&task.unique_id).await
        {
            tracing::error!(unique_id = %task.unique_id, error = %e, "failed to record history");
        }

        // A stop that landed during the history write silences this settlement
        if cancel.is_cancelled() {
            let active = self.release_slot();
            tracing::debug!(
                unique_id = %task.unique_id,
                filename = %task.filename,
                ?outcome,
                active,
                "settled during stop; events suppressed"
            );
            return;
        }

        let (completed, total) = {
            let mut state = self.lock();
            state.active = state.active.saturating_sub(1);
            if outcome.counts_as_success() {
                state.completed += 1;
            }
            (state.completed, state.total)
        };

        let (unique_id, filename) = (task.unique_id, task.filename);
        match outcome {
            Outcome::Accepted(handle) => {
                tracing::info!(%unique_id, %filename, %handle, completed, total, "transfer accepted");
                let _ = events.send(Event::TaskAccepted {
                    unique_id,
                    filename,
                    handle,
                });
            }
            Outcome::TimedOutPossiblyAccepted => {
                tracing::warn!(
                    %unique_id,
                    %filename,
                    completed,
                    total,
                    "transfer submission timed out; counting as started"
                );
                let _ = events.send(Event::TaskTimedOut {
                    unique_id,
                    filename,
                });
            }
            Outcome::Rejected(error) => {
                tracing::warn!(%unique_id, %filename, %error, "transfer failed");
                let _ = events.send(Event::TaskFailed {
                    unique_id,
                    filename,
                    error,
                });
            }
        }

        let _ = events.send(Event::Progress { completed, total });
    }

    /// Let in-flight executions settle after a stop, up to the wait cap
    ///
    /// Returns how many were still unsettled when the cap elapsed.
    async fn drain(&self, running: &mut JoinSet<(Task, Outcome)>) -> usize {
        let deadline = Instant::now() + self.stop_wait_timeout;
        let mut poll = interval_at(Instant::now() + self.stop_poll_interval, self.stop_poll_interval);

        while !running.is_empty() {
            tokio::select! {
                Some(joined) = running.join_next() => {
                    let active = self.release_slot();
                    if let Ok((task, outcome)) = joined {
                        tracing::debug!(
                            unique_id = %task.unique_id,
                            filename = %task.filename,
                            ?outcome,
                            active,
                            "settled after stop; ignoring"
                        );
                    }
                }
                _ = poll.tick() => {
                    tracing::debug!(active = running.len(), "waiting for in-flight tasks");
                }
                _ = sleep_until(deadline) => break,
            }
        }

        running.len()
    }
}
