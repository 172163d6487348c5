//! Shared test helpers: in-memory collaborators and a temp-dir downloader.

use crate::config::{Config, SourceSettings};
use crate::downloader::{BitableDownloader, Services};
use crate::error::{Error, Result};
use crate::normalize::Record;
use crate::source::{
    AccessToken, AttachmentResolver, Credentials, RecordQuery, RecordSource, ResolvedAttachment,
};
use crate::transfer::{TransferBackend, TransferRequest};
use crate::types::{Event, RunSummary, TransferHandle};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::Semaphore;

/// Record source serving a fixed record list
#[derive(Default)]
pub(crate) struct FakeSource {
    pub(crate) records: Mutex<Vec<Record>>,
    pub(crate) auth_error: Option<(i64, String)>,
    pub(crate) fetch_delay: Duration,
    pub(crate) fetch_calls: AtomicUsize,
    pub(crate) last_query: Mutex<Option<RecordQuery>>,
}

impl FakeSource {
    pub(crate) fn with_records(records: Vec<Record>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Default::default()
        }
    }
}

#[async_trait]
impl RecordSource for FakeSource {
    async fn authenticate(&self, _credentials: &Credentials) -> Result<AccessToken> {
        if let Some((code, msg)) = &self.auth_error {
            return Err(Error::Api {
                operation: "authentication".into(),
                code: *code,
                message: msg.clone(),
            });
        }
        Ok(AccessToken("t-test".into()))
    }

    async fn fetch_records(&self, _token: &AccessToken, query: &RecordQuery) -> Result<Vec<Record>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_query.lock().unwrap() = Some(query.clone());
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        Ok(self.records.lock().unwrap().clone())
    }
}

/// Resolves every token to `https://tmp.example/<token>`
#[derive(Default)]
pub(crate) struct FakeResolver {
    pub(crate) batches: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl AttachmentResolver for FakeResolver {
    async fn resolve(
        &self,
        _token: &AccessToken,
        file_tokens: &[String],
    ) -> Result<Vec<ResolvedAttachment>> {
        self.batches.lock().unwrap().push(file_tokens.to_vec());
        Ok(file_tokens
            .iter()
            .map(|t| ResolvedAttachment {
                file_token: t.clone(),
                url: format!("https://tmp.example/{t}"),
            })
            .collect())
    }
}

/// Transfer backend that records submissions and tracks concurrency
pub(crate) struct MockTransfer {
    pub(crate) submissions: Mutex<Vec<TransferRequest>>,
    in_flight: AtomicUsize,
    pub(crate) max_in_flight: AtomicUsize,
    next_handle: AtomicU64,
    /// Submissions block on this until permits are added (None = answer immediately)
    gate: Option<Semaphore>,
    /// Artificial acceptance latency
    pub(crate) latency: Duration,
    pub(crate) fail_urls: Mutex<HashSet<String>>,
    pub(crate) hang_urls: Mutex<HashSet<String>>,
}

impl MockTransfer {
    pub(crate) fn new() -> Self {
        Self {
            submissions: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            next_handle: AtomicU64::new(1),
            gate: None,
            latency: Duration::ZERO,
            fail_urls: Mutex::new(HashSet::new()),
            hang_urls: Mutex::new(HashSet::new()),
        }
    }

    /// Every submission waits for [`MockTransfer::release`]
    pub(crate) fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    pub(crate) fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::new()
        }
    }

    pub(crate) fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub(crate) fn fail(&self, url: &str) {
        self.fail_urls.lock().unwrap().insert(url.to_string());
    }

    pub(crate) fn hang(&self, url: &str) {
        self.hang_urls.lock().unwrap().insert(url.to_string());
    }

    pub(crate) fn submitted_urls(&self) -> Vec<String> {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.url.clone())
            .collect()
    }

    pub(crate) fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    /// Poll until at least `n` submissions arrived
    pub(crate) async fn wait_for_submissions(&self, n: usize) {
        for _ in 0..200 {
            if self.submission_count() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {} submissions, saw {}",
            n,
            self.submission_count()
        );
    }
}

#[async_trait]
impl TransferBackend for MockTransfer {
    async fn submit(&self, request: TransferRequest) -> Result<TransferHandle> {
        let url = request.url.clone();
        self.submissions.lock().unwrap().push(request);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let hang = self.hang_urls.lock().unwrap().contains(&url);
        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let fail = self.fail_urls.lock().unwrap().contains(&url);
        if fail {
            return Err(Error::Transfer(format!("refused {url}")));
        }
        Ok(TransferHandle(self.next_handle.fetch_add(1, Ordering::SeqCst)))
    }
}

/// Settings that pass validation
pub(crate) fn test_settings() -> SourceSettings {
    SourceSettings {
        app_id: "cli_test".into(),
        app_secret: "secret".into(),
        base_token: "bascnTest".into(),
        table_id: "tblTest".into(),
        field_video: "Video".into(),
        field_script: "Script".into(),
        save_dir: "Clips".into(),
    }
}

/// Record whose media field is a hyperlink to `https://cdn.example/<id>.mp4`
pub(crate) fn link_record(id: &str, script: Option<&str>) -> Record {
    let mut fields = serde_json::Map::new();
    fields.insert(
        "Video".into(),
        serde_json::json!({"link": format!("https://cdn.example/{id}.mp4"), "text": id}),
    );
    if let Some(script) = script {
        fields.insert("Script".into(), serde_json::json!(script));
    }
    Record::from_raw(id, &fields)
}

pub(crate) fn test_config(temp_dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = temp_dir.path().join("test.db");
    config.download.download_root = temp_dir.path().join("downloads");
    config.download.max_concurrent_downloads = 3;
    config.download.submit_timeout = Duration::from_secs(5);
    config.download.stop_wait_timeout = Duration::from_secs(5);
    config.download.stop_poll_interval = Duration::from_millis(50);
    config
}

/// Helper to create a test downloader over the given fakes.
/// Returns the downloader and the tempdir (which must be kept alive).
pub(crate) async fn create_test_downloader(
    source: Arc<FakeSource>,
    transfer: Arc<MockTransfer>,
) -> (BitableDownloader, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let config = test_config(&temp_dir);
    create_test_downloader_with_config(config, source, transfer, temp_dir).await
}

pub(crate) async fn create_test_downloader_with_config(
    config: Config,
    source: Arc<FakeSource>,
    transfer: Arc<MockTransfer>,
    temp_dir: tempfile::TempDir,
) -> (BitableDownloader, tempfile::TempDir) {
    let services = Services {
        source,
        resolver: Arc::new(FakeResolver::default()),
        transfer,
    };
    let downloader = BitableDownloader::with_services(config, services)
        .await
        .unwrap();
    (downloader, temp_dir)
}

/// Start a run with [`test_settings`] and wait for its summary
pub(crate) async fn run_to_end(downloader: &BitableDownloader, start: Option<&str>) -> RunSummary {
    downloader
        .start_with_settings(test_settings(), start)
        .unwrap()
        .await
        .unwrap()
}

/// Drain every event currently buffered in `rx`
pub(crate) fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
