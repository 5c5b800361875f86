//! Settings repository
//!
//! Key/value store for integration tokens and site-level settings.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;

/// LinkedIn OAuth access token
pub const LINKEDIN_ACCESS_TOKEN: &str = "linkedin_access_token";
/// LinkedIn member URN (`urn:li:person:...`) posts are authored as
pub const LINKEDIN_MEMBER_URN: &str = "linkedin_member_urn";
/// Expiry of the LinkedIn token (RFC 3339)
pub const LINKEDIN_TOKEN_EXPIRES_AT: &str = "linkedin_token_expires_at";
/// Pending OAuth `state` value, cleared by the callback
pub const LINKEDIN_OAUTH_STATE: &str = "linkedin_oauth_state";

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn get_all(&self) -> Result<HashMap<String, String>>;

    /// Insert or replace a setting
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

pub struct SqlxSettingsRepository {
    pool: DynDatabasePool,
}

impl SqlxSettingsRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SettingsRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SettingsRepository for SqlxSettingsRepository {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = on_pool!(self.pool, |conn| {
            sqlx::query_scalar::<_, String>(
                "SELECT setting_value FROM settings WHERE setting_key = ?",
            )
            .bind(key)
            .fetch_optional(conn)
            .await
            .context("Failed to get setting")?
        });
        Ok(value)
    }

    async fn get_all(&self) -> Result<HashMap<String, String>> {
        let rows = on_pool!(self.pool, |conn| {
            sqlx::query_as::<_, (String, String)>(
                "SELECT setting_key, setting_value FROM settings",
            )
            .fetch_all(conn)
            .await
            .context("Failed to list settings")?
        });
        Ok(rows.into_iter().collect())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let sql = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                "INSERT INTO settings (setting_key, setting_value, updated_at) VALUES (?, ?, ?) \
                 ON CONFLICT(setting_key) DO UPDATE SET \
                 setting_value = excluded.setting_value, updated_at = excluded.updated_at"
            }
            DatabaseDriver::Mysql => {
                "INSERT INTO settings (setting_key, setting_value, updated_at) VALUES (?, ?, ?) \
                 ON DUPLICATE KEY UPDATE \
                 setting_value = VALUES(setting_value), updated_at = VALUES(updated_at)"
            }
        };
        let now = Utc::now();
        on_pool!(self.pool, |conn| {
            sqlx::query(sql)
                .bind(key)
                .bind(value)
                .bind(now)
                .execute(conn)
                .await
                .with_context(|| format!("Failed to store setting {}", key))?;
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        on_pool!(self.pool, |conn| {
            sqlx::query("DELETE FROM settings WHERE setting_key = ?")
                .bind(key)
                .execute(conn)
                .await
                .context("Failed to delete setting")?;
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::migrated_pool;

    #[tokio::test]
    async fn test_set_overwrites_existing_value() {
        let repo = SqlxSettingsRepository::new(migrated_pool().await);

        repo.set(LINKEDIN_ACCESS_TOKEN, "first").await.unwrap();
        repo.set(LINKEDIN_ACCESS_TOKEN, "second").await.unwrap();

        assert_eq!(
            repo.get(LINKEDIN_ACCESS_TOKEN).await.unwrap().as_deref(),
            Some("second")
        );
        assert_eq!(repo.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_setting() {
        let repo = SqlxSettingsRepository::new(migrated_pool().await);
        repo.set("site_tagline", "Ship it").await.unwrap();
        repo.delete("site_tagline").await.unwrap();
        assert!(repo.get("site_tagline").await.unwrap().is_none());
    }
}
