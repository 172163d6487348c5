//! Remote data source seams
//!
//! Two traits separate the pipeline from the Feishu/Lark open platform:
//! - [`RecordSource`] authenticates and pages through table records
//! - [`AttachmentResolver`] turns attachment storage tokens into temporary URLs
//!
//! [`FeishuClient`] implements both over HTTPS. Tests swap in in-memory fakes.

use crate::error::Result;
use crate::normalize::Record;
use async_trait::async_trait;

mod feishu;

pub use feishu::FeishuClient;

/// Records requested per page
pub const PAGE_SIZE: usize = 100;

/// App credentials used to obtain a tenant access token
#[derive(Clone)]
pub struct Credentials {
    /// App id
    pub app_id: String,
    /// App secret
    pub app_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("app_id", &self.app_id)
            .field("app_secret", &crate::utils::mask_sensitive(&self.app_secret, 2, 2))
            .finish()
    }
}

/// Bearer token for one run (never cached across runs)
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(pub String);

impl AccessToken {
    /// Raw token value for the Authorization header
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AccessToken({})", crate::utils::mask_sensitive(&self.0, 8, 8))
    }
}

/// Which table to read and which fields to return
#[derive(Clone, Debug, Default)]
pub struct RecordQuery {
    /// Bitable app (base) token
    pub base_token: String,
    /// Table id
    pub table_id: String,
    /// Restrict the returned fields; empty means all fields
    pub field_names: Vec<String>,
}

/// A storage token with its temporary download URL
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedAttachment {
    /// Storage token that was resolved
    pub file_token: String,
    /// Temporary download URL
    pub url: String,
}

/// Paginated source of table records
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Exchange app credentials for an access token
    async fn authenticate(&self, credentials: &Credentials) -> Result<AccessToken>;

    /// Fetch every record of the table, following page tokens until none is returned
    async fn fetch_records(&self, token: &AccessToken, query: &RecordQuery) -> Result<Vec<Record>>;
}

/// Batch resolver for attachment storage tokens
#[async_trait]
pub trait AttachmentResolver: Send + Sync {
    /// Resolve one batch of tokens
    ///
    /// Tokens missing from the returned list were not resolved.
    async fn resolve(&self, token: &AccessToken, file_tokens: &[String])
    -> Result<Vec<ResolvedAttachment>>;
}
