//! Feishu/Lark open platform client

use super::{
    AccessToken, AttachmentResolver, Credentials, PAGE_SIZE, RecordQuery, RecordSource,
    ResolvedAttachment,
};
use crate::error::{Error, Result};
use crate::normalize::Record;
use crate::utils::mask_sensitive;
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

const AUTH_PATH: &str = "/open-apis/auth/v3/tenant_access_token/internal";
const BATCH_DOWNLOAD_URL_PATH: &str = "/open-apis/drive/v1/medias/batch_get_tmp_download_url";

/// Common response envelope: `code` 0 means success
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    tenant_access_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RecordPage {
    #[serde(default)]
    items: Option<Vec<Record>>,
    #[serde(default)]
    page_token: Option<String>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Default, Deserialize)]
struct TmpUrls {
    #[serde(default)]
    tmp_download_urls: Vec<TmpUrl>,
}

#[derive(Debug, Deserialize)]
struct TmpUrl {
    file_token: String,
    tmp_download_url: String,
}

/// HTTPS client for tenant authentication, Bitable records and drive media
#[derive(Clone, Debug)]
pub struct FeishuClient {
    http: reqwest::Client,
    base_url: String,
}

impl FeishuClient {
    /// Create a client for the given open platform base URL
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("bitable-dl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Read a response body as JSON, mapping non-JSON error pages to an API error
    async fn read_json<T: DeserializeOwned>(
        response: reqwest::Response,
        operation: &str,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        match serde_json::from_str(&body) {
            Ok(parsed) => Ok(parsed),
            Err(e) if status.is_success() => Err(Error::Serialization(e)),
            Err(_) => Err(Error::Api {
                operation: operation.to_string(),
                code: i64::from(status.as_u16()),
                message: status
                    .canonical_reason()
                    .unwrap_or("unexpected response")
                    .to_string(),
            }),
        }
    }

    /// Unwrap an envelope, turning a non-zero code into an API error
    fn open_envelope<T: Default>(envelope: Envelope<T>, operation: &str) -> Result<T> {
        if envelope.code != 0 {
            return Err(Error::Api {
                operation: operation.to_string(),
                code: envelope.code,
                message: envelope.msg,
            });
        }
        Ok(envelope.data.unwrap_or_default())
    }
}

#[async_trait]
impl RecordSource for FeishuClient {
    async fn authenticate(&self, credentials: &Credentials) -> Result<AccessToken> {
        tracing::debug!(
            app_id = %mask_sensitive(&credentials.app_id, 4, 4),
            "requesting tenant access token"
        );

        let response = self
            .http
            .post(self.url(AUTH_PATH))
            .json(&serde_json::json!({
                "app_id": credentials.app_id,
                "app_secret": credentials.app_secret,
            }))
            .send()
            .await?;

        let parsed: TokenResponse = Self::read_json(response, "authentication").await?;
        if parsed.code != 0 {
            return Err(Error::Api {
                operation: "authentication".to_string(),
                code: parsed.code,
                message: parsed.msg,
            });
        }

        match parsed.tenant_access_token.filter(|t| !t.is_empty()) {
            Some(token) => {
                tracing::debug!(token = %mask_sensitive(&token, 8, 8), "authenticated");
                Ok(AccessToken(token))
            }
            None => Err(Error::Api {
                operation: "authentication".to_string(),
                code: parsed.code,
                message: "response carried no tenant_access_token".to_string(),
            }),
        }
    }

    async fn fetch_records(&self, token: &AccessToken, query: &RecordQuery) -> Result<Vec<Record>> {
        let url = self.url(&format!(
            "/open-apis/bitable/v1/apps/{}/tables/{}/records",
            urlencoding::encode(&query.base_token),
            urlencoding::encode(&query.table_id)
        ));
        let field_names = if query.field_names.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&query.field_names)?)
        };

        let mut records = Vec::new();
        let mut page_token: Option<String> = None;
        let mut page = 0usize;

        loop {
            page += 1;
            let operation = format!("fetch records page {}", page);

            let mut params: Vec<(&str, String)> = vec![("page_size", PAGE_SIZE.to_string())];
            if let Some(names) = &field_names {
                params.push(("field_names", names.clone()));
            }
            if let Some(pt) = &page_token {
                params.push(("page_token", pt.clone()));
            }

            let response = self
                .http
                .get(&url)
                .bearer_auth(token.as_str())
                .query(&params)
                .send()
                .await?;

            let envelope: Envelope<RecordPage> = Self::read_json(response, &operation).await?;
            let data = Self::open_envelope(envelope, &operation)?;

            let items = data.items.unwrap_or_default();
            tracing::debug!(page, items = items.len(), has_more = data.has_more, "fetched records page");
            records.extend(items);

            match data.page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        tracing::info!(records = records.len(), pages = page, "fetched table records");
        Ok(records)
    }
}

#[async_trait]
impl AttachmentResolver for FeishuClient {
    async fn resolve(
        &self,
        token: &AccessToken,
        file_tokens: &[String],
    ) -> Result<Vec<ResolvedAttachment>> {
        let joined = file_tokens
            .iter()
            .map(|t| urlencoding::encode(t).into_owned())
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{}?file_tokens={}", self.url(BATCH_DOWNLOAD_URL_PATH), joined);

        let response = self.http.get(url).bearer_auth(token.as_str()).send().await?;

        let operation = "resolve attachment batch";
        let envelope: Envelope<TmpUrls> = Self::read_json(response, operation).await?;
        let data = Self::open_envelope(envelope, operation)?;

        Ok(data
            .tmp_download_urls
            .into_iter()
            .map(|u| ResolvedAttachment {
                file_token: u.file_token,
                url: u.tmp_download_url,
            })
            .collect())
    }
}
