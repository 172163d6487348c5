//! Core types and events

use serde::{Deserialize, Serialize};

/// Extension used whenever a file's type cannot be inferred
pub const DEFAULT_EXTENSION: &str = "mp4";

/// One normalized unit of download work
///
/// `unique_id` is the owning record's id, so every file of a record shares it:
/// deduplication works at record granularity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Resolved absolute URL (absent until an attachment token is resolved)
    pub url: Option<String>,
    /// Human-meaningful base name (script number, or the record id)
    pub filename: String,
    /// File extension without the leading dot
    pub extension: String,
    /// Id of the record this task came from
    pub unique_id: String,
}

impl Task {
    /// Create a task with a direct URL
    pub fn with_url(
        url: impl Into<String>,
        filename: impl Into<String>,
        extension: impl Into<String>,
        unique_id: impl Into<String>,
    ) -> Self {
        Self {
            url: Some(url.into()),
            filename: filename.into(),
            extension: extension.into(),
            unique_id: unique_id.into(),
        }
    }
}

/// Opaque handle returned by a transfer backend that accepted a submission
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferHandle(pub u64);

impl std::fmt::Display for TransferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a single task execution settled
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The transfer backend accepted the submission
    Accepted(TransferHandle),
    /// The backend did not answer within the submit timeout; the transfer may still start
    TimedOutPossiblyAccepted,
    /// The task could not be submitted
    Rejected(String),
}

impl Outcome {
    /// Timeouts count the same as acceptance for progress and history
    pub fn counts_as_success(&self) -> bool {
        !matches!(self, Outcome::Rejected(_))
    }
}

/// Lifecycle phase of the queue scheduler
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Nothing pending or active; `start` is accepted
    #[default]
    Idle,
    /// Fetching records or dispatching tasks
    Running,
    /// `stop` was requested; waiting for in-flight executions to settle
    DrainingStop,
    /// The queue emptied naturally; finalizing
    Completing,
    /// Finalized after a stop; `reset` is required before the next `start`
    Stopped,
}

impl RunPhase {
    /// Whether a run currently owns the scheduler
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RunPhase::Running | RunPhase::DrainingStop | RunPhase::Completing
        )
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunPhase::Idle => "idle",
            RunPhase::Running => "running",
            RunPhase::DrainingStop => "stopping",
            RunPhase::Completing => "completing",
            RunPhase::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Which terminal path a run took
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishKind {
    /// Queue drained (or the run ended early without dispatching)
    Completed,
    /// The user stopped the run
    Stopped,
}

/// Snapshot of run progress
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Tasks that settled successfully (including soft-success timeouts)
    pub completed: usize,
    /// Tasks admitted to the queue for this run
    pub total: usize,
    /// Executions currently in flight
    pub active: usize,
    /// Current scheduler phase
    pub phase: RunPhase,
}

/// Final accounting of one run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Terminal path taken
    pub kind: FinishKind,
    /// Successful settlements counted before the run stopped or drained
    pub completed: usize,
    /// Tasks handed to the scheduler
    pub total: usize,
    /// Pending tasks discarded by `stop`
    pub abandoned: usize,
    /// Executions still unsettled when the stop drain gave up
    pub still_active: usize,
}

/// Counters gathered while normalizing records
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseStats {
    /// Records with a hyperlink-object media field
    pub links: usize,
    /// Records with a plain URL string media field
    pub texts: usize,
    /// Attachment entries carrying a storage token
    pub attachments: usize,
    /// Records whose media field was empty or absent
    pub skipped: usize,
    /// Records whose media field had an unrecognized shape
    pub unrecognized: usize,
    /// Records excluded by the start script-number filter
    pub script_filtered: usize,
}

/// Event emitted during a run
///
/// Consumers subscribe via [`crate::BitableDownloader::subscribe`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A run was accepted and is fetching records
    RunStarted,

    /// Records were fetched from the table
    RecordsFetched {
        /// Number of records across all pages
        count: usize,
    },

    /// Records were normalized into tasks
    TasksParsed {
        /// Tasks with a usable URL after attachment resolution
        tasks: usize,
        /// Normalization counters
        stats: ParseStats,
    },

    /// Tasks were compared against the download history
    Deduplicated {
        /// Tasks before deduplication
        parsed: usize,
        /// Tasks not yet in the history
        new: usize,
    },

    /// A task was admitted and handed to the executor
    TaskStarted {
        /// Owning record id
        unique_id: String,
        /// Task base filename
        filename: String,
    },

    /// The transfer backend accepted a task
    TaskAccepted {
        /// Owning record id
        unique_id: String,
        /// Task base filename
        filename: String,
        /// Backend handle
        handle: TransferHandle,
    },

    /// The transfer backend did not answer in time; counted as success
    TaskTimedOut {
        /// Owning record id
        unique_id: String,
        /// Task base filename
        filename: String,
    },

    /// A task could not be submitted
    TaskFailed {
        /// Owning record id
        unique_id: String,
        /// Task base filename
        filename: String,
        /// Failure reason
        error: String,
    },

    /// Progress counters changed
    Progress {
        /// Successful settlements so far
        completed: usize,
        /// Tasks in this run
        total: usize,
    },

    /// Stop was requested; pending tasks were discarded
    Stopping {
        /// Number of pending tasks discarded
        abandoned: usize,
    },

    /// The stop drain gave up with executions still in flight
    BackgroundTransfers {
        /// Executions still unsettled
        active: usize,
    },

    /// A fatal error ended the run
    RunError {
        /// User-facing message
        message: String,
    },

    /// The run reached a terminal state
    RunFinished {
        /// Terminal path taken
        kind: FinishKind,
        /// Successful settlements
        completed: usize,
        /// Tasks in this run
        total: usize,
    },

    /// The download history was cleared
    HistoryCleared,
}
