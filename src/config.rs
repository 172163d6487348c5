//! Configuration types for bitable-dl
//!
//! Two layers of configuration exist:
//! - [`Config`] - static, process-level settings (API endpoint, directories,
//!   concurrency and timeouts, database location).
//! - [`SourceSettings`] - the user-editable key set persisted in the config
//!   store (`appId`, `appSecret`, `baseToken`, `tableId`, `fieldVideo`,
//!   `fieldScript`, `saveDir`).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Sub-directory used beneath the download root when `saveDir` is not configured
pub const DEFAULT_SAVE_DIR: &str = "FeishuVideos";

/// Download behavior configuration (directories, concurrency, timeouts)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Root directory that every destination path is joined beneath (default: "./downloads")
    #[serde(default = "default_download_root")]
    pub download_root: PathBuf,

    /// Maximum concurrent task executions (default: 3)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// How long to wait for the transfer backend to accept a submission (default: 10 seconds)
    ///
    /// A submission that has not settled by then is counted as a soft success.
    #[serde(default = "default_submit_timeout", with = "duration_serde")]
    pub submit_timeout: Duration,

    /// Upper bound on the drain after `stop()` (default: 30 seconds)
    #[serde(default = "default_stop_wait_timeout", with = "duration_serde")]
    pub stop_wait_timeout: Duration,

    /// How often the stop drain checks for in-flight executions (default: 500 ms)
    #[serde(default = "default_stop_poll_interval", with = "millis_serde")]
    pub stop_poll_interval: Duration,

    /// Per-request timeout for Bitable API calls (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_root: default_download_root(),
            max_concurrent_downloads: default_max_concurrent(),
            submit_timeout: default_submit_timeout(),
            stop_wait_timeout: default_stop_wait_timeout(),
            stop_poll_interval: default_stop_poll_interval(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./bitable-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for BitableDownloader
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the Feishu/Lark open platform (default: "https://open.feishu.cn")
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            download: DownloadConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl Config {
    /// Root directory for downloaded files
    pub fn download_root(&self) -> &PathBuf {
        &self.download.download_root
    }

    /// Check the settings that would make the scheduler misbehave
    pub fn validate(&self) -> Result<()> {
        if self.download.max_concurrent_downloads == 0 {
            return Err(Error::config(
                "max_concurrent_downloads must be at least 1",
                "max_concurrent_downloads",
            ));
        }
        if self.download.submit_timeout.is_zero() {
            return Err(Error::config(
                "submit_timeout must be greater than zero",
                "submit_timeout",
            ));
        }
        if self.download.stop_poll_interval.is_zero() {
            return Err(Error::config(
                "stop_poll_interval must be greater than zero",
                "stop_poll_interval",
            ));
        }
        if url::Url::parse(&self.api_base_url).is_err() {
            return Err(Error::config(
                format!("invalid API base URL: {}", self.api_base_url),
                "api_base_url",
            ));
        }
        Ok(())
    }
}

/// File collision handling strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCollisionAction {
    /// Append (1), (2), etc. to filename (default)
    #[default]
    Rename,
    /// Overwrite existing file
    Overwrite,
    /// Skip the file, keep existing
    Skip,
}

/// Keys of the persisted config store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SettingKey {
    /// Feishu app id
    AppId,
    /// Feishu app secret
    AppSecret,
    /// Bitable app (base) token
    BaseToken,
    /// Table id within the base
    TableId,
    /// Field holding the media reference
    FieldVideo,
    /// Field holding the script number
    FieldScript,
    /// Sub-directory for saved files
    SaveDir,
    /// Persisted list of downloaded record ids
    DownloadHistory,
}

impl SettingKey {
    /// The editable source settings, in display order
    pub const SOURCE: [SettingKey; 7] = [
        SettingKey::AppId,
        SettingKey::AppSecret,
        SettingKey::BaseToken,
        SettingKey::TableId,
        SettingKey::FieldVideo,
        SettingKey::FieldScript,
        SettingKey::SaveDir,
    ];

    /// Storage key name
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::AppId => "appId",
            SettingKey::AppSecret => "appSecret",
            SettingKey::BaseToken => "baseToken",
            SettingKey::TableId => "tableId",
            SettingKey::FieldVideo => "fieldVideo",
            SettingKey::FieldScript => "fieldScript",
            SettingKey::SaveDir => "saveDir",
            SettingKey::DownloadHistory => "downloadHistory",
        }
    }
}

impl std::fmt::Display for SettingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-editable source settings persisted in the config store
///
/// Empty strings are treated the same as unset values.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceSettings {
    /// Feishu app id
    pub app_id: String,
    /// Feishu app secret
    pub app_secret: String,
    /// Bitable app (base) token
    pub base_token: String,
    /// Table id within the base
    pub table_id: String,
    /// Field holding the media reference (hyperlink, URL text or attachments)
    pub field_video: String,
    /// Field holding the script number used for filenames and filtering
    pub field_script: String,
    /// Sub-directory beneath the download root
    pub save_dir: String,
}

impl SourceSettings {
    /// Value for a single key (the history key has no place here and yields `None`)
    pub fn get(&self, key: SettingKey) -> Option<&str> {
        let value = match key {
            SettingKey::AppId => &self.app_id,
            SettingKey::AppSecret => &self.app_secret,
            SettingKey::BaseToken => &self.base_token,
            SettingKey::TableId => &self.table_id,
            SettingKey::FieldVideo => &self.field_video,
            SettingKey::FieldScript => &self.field_script,
            SettingKey::SaveDir => &self.save_dir,
            SettingKey::DownloadHistory => return None,
        };
        Some(value.as_str())
    }

    /// Set a single key; values are trimmed the way the settings form stored them
    pub fn set(&mut self, key: SettingKey, value: &str) {
        let value = value.trim().to_string();
        match key {
            SettingKey::AppId => self.app_id = value,
            SettingKey::AppSecret => self.app_secret = value,
            SettingKey::BaseToken => self.base_token = value,
            SettingKey::TableId => self.table_id = value,
            SettingKey::FieldVideo => self.field_video = value,
            SettingKey::FieldScript => self.field_script = value,
            SettingKey::SaveDir => self.save_dir = value,
            SettingKey::DownloadHistory => {}
        }
    }

    /// Same settings with surrounding whitespace stripped from every value
    #[must_use]
    pub fn trimmed(mut self) -> Self {
        for key in SettingKey::SOURCE {
            if let Some(value) = self.get(key).map(str::to_string) {
                self.set(key, &value);
            }
        }
        self
    }

    /// Script-number field, if configured
    pub fn script_field(&self) -> Option<&str> {
        Some(self.field_script.as_str()).filter(|f| !f.is_empty())
    }

    /// Save directory, falling back to [`DEFAULT_SAVE_DIR`]
    pub fn save_dir_or_default(&self) -> &str {
        if self.save_dir.is_empty() {
            DEFAULT_SAVE_DIR
        } else {
            &self.save_dir
        }
    }

    /// Reject settings that cannot possibly produce a run
    pub fn validate(&self) -> Result<()> {
        if self.app_id.is_empty() || self.app_secret.is_empty() {
            let key = if self.app_id.is_empty() {
                SettingKey::AppId
            } else {
                SettingKey::AppSecret
            };
            return Err(Error::config("configure App ID and Secret first", key.as_str()));
        }
        if self.base_token.is_empty() {
            return Err(Error::config(
                "base token is not configured",
                SettingKey::BaseToken.as_str(),
            ));
        }
        if self.table_id.is_empty() {
            return Err(Error::config(
                "table id is not configured",
                SettingKey::TableId.as_str(),
            ));
        }
        if self.field_video.is_empty() {
            return Err(Error::config(
                "media field name is not configured",
                SettingKey::FieldVideo.as_str(),
            ));
        }
        Ok(())
    }
}

fn default_api_base_url() -> String {
    "https://open.feishu.cn".to_string()
}

fn default_download_root() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_max_concurrent() -> usize {
    3
}

fn default_submit_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_stop_wait_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_stop_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./bitable-dl.db")
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
