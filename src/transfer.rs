//! Transfer backend: the facility that actually moves bytes to disk.
//!
//! A submission is *accepted* once the remote answered with a success status and
//! a destination file was created; the body then streams in the background. The
//! scheduler only ever waits for acceptance.

use crate::config::FileCollisionAction;
use crate::error::{Error, Result};
use crate::types::TransferHandle;
use crate::utils::create_unique_file;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// One request to the transfer backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferRequest {
    /// Remote URL
    pub url: String,
    /// Destination relative to the backend's root directory
    pub destination: PathBuf,
    /// What to do when the destination already exists
    pub collision: FileCollisionAction,
}

/// Facility that accepts transfer submissions
///
/// Implementations must not prompt; a request either yields a handle or an error.
#[async_trait]
pub trait TransferBackend: Send + Sync {
    /// Submit one transfer, resolving once it has been accepted or refused
    async fn submit(&self, request: TransferRequest) -> Result<TransferHandle>;
}

/// HTTP(S) transfer backend writing beneath a root directory
pub struct HttpTransfer {
    client: reqwest::Client,
    root: PathBuf,
    next_handle: AtomicU64,
    active: Arc<AtomicUsize>,
}

impl HttpTransfer {
    /// Create a backend that writes beneath `root`
    ///
    /// `connect_timeout` bounds connection setup only; bodies may take as long as they need.
    pub fn new(root: impl Into<PathBuf>, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("bitable-dl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            root: root.into(),
            next_handle: AtomicU64::new(1),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Bodies still streaming to disk
    pub fn active_transfers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransferBackend for HttpTransfer {
    async fn submit(&self, request: TransferRequest) -> Result<TransferHandle> {
        let response = self.client.get(&request.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transfer(format!(
                "HTTP {} for {}",
                status,
                request.destination.display()
            )));
        }

        let target = self.root.join(&request.destination);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let (path, mut file) = create_unique_file(&target, request.collision).await?;

        let handle = TransferHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        tracing::debug!(%handle, path = %path.display(), "transfer accepted");

        self.active.fetch_add(1, Ordering::SeqCst);
        let active = self.active.clone();
        tokio::spawn(async move {
            let mut response = response;
            let result: Result<u64> = async {
                let mut written = 0u64;
                while let Some(chunk) = response.chunk().await? {
                    file.write_all(&chunk).await?;
                    written += chunk.len() as u64;
                }
                file.flush().await?;
                Ok(written)
            }
            .await;

            match result {
                Ok(bytes) => {
                    tracing::info!(%handle, path = %path.display(), bytes, "transfer finished")
                }
                Err(e) => {
                    tracing::warn!(%handle, path = %path.display(), error = %e, "transfer interrupted")
                }
            }
            active.fetch_sub(1, Ordering::SeqCst);
        });

        Ok(handle)
    }
}
