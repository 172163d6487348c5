//! Config store: key/value settings, source settings and the history list.

use crate::config::{SettingKey, SourceSettings};
use crate::error::DatabaseError;
use crate::{Error, Result};

use super::Database;

impl Database {
    /// Read a single setting
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to read setting {}: {}",
                    key, e
                )))
            })
    }

    /// Insert or replace a single setting
    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to write setting {}: {}",
                key, e
            )))
        })?;

        Ok(())
    }

    /// Remove a setting; returns whether it existed
    pub async fn remove_setting(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to remove setting {}: {}",
                    key, e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Load the editable source settings; unset keys come back empty
    pub async fn load_source_settings(&self) -> Result<SourceSettings> {
        let mut settings = SourceSettings::default();
        for key in SettingKey::SOURCE {
            if let Some(value) = self.get_setting(key.as_str()).await? {
                settings.set(key, &value);
            }
        }
        Ok(settings)
    }

    /// Persist every editable source setting
    pub async fn save_source_settings(&self, settings: &SourceSettings) -> Result<()> {
        for key in SettingKey::SOURCE {
            let value = settings.get(key).unwrap_or_default();
            self.set_setting(key.as_str(), value.trim()).await?;
        }
        Ok(())
    }

    /// Read the persisted history list (empty when never written)
    pub async fn load_history_list(&self) -> Result<Vec<String>> {
        match self.get_setting(SettingKey::DownloadHistory.as_str()).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    /// Overwrite the persisted history list
    pub async fn store_history_list(&self, ids: &[String]) -> Result<()> {
        let raw = serde_json::to_string(ids)?;
        self.set_setting(SettingKey::DownloadHistory.as_str(), &raw)
            .await
    }

    /// Drop the persisted history list
    pub async fn clear_history_list(&self) -> Result<()> {
        self.remove_setting(SettingKey::DownloadHistory.as_str())
            .await?;
        Ok(())
    }
}
